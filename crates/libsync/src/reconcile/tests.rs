use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::*;
use crate::adapter::{AnalysisAdapter, DeclarationNamespace, RegisterError};
use crate::cache::Content;
use crate::surface::SurfaceKind;
use crate::transport::{FetchError, FetchTransport};

#[derive(Default)]
struct MockTransport {
	fetch_count: AtomicUsize,
	failing: parking_lot::Mutex<HashSet<String>>,
	gates: parking_lot::Mutex<HashMap<String, Arc<Notify>>>,
	started: Arc<Notify>,
}

impl MockTransport {
	fn fail(&self, locator: &ResourceLocator) {
		self.failing.lock().insert(locator.as_str().to_string());
	}

	fn heal(&self, locator: &ResourceLocator) {
		self.failing.lock().remove(locator.as_str());
	}

	/// Holds fetches of `locator` until the returned gate is notified.
	fn gate(&self, locator: &ResourceLocator) -> Arc<Notify> {
		let gate = Arc::new(Notify::new());
		self.gates.lock().insert(locator.as_str().to_string(), gate.clone());
		gate
	}

	fn count(&self) -> usize {
		self.fetch_count.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl FetchTransport for MockTransport {
	async fn fetch_text(&self, locator: &ResourceLocator) -> std::result::Result<String, FetchError> {
		self.fetch_count.fetch_add(1, Ordering::SeqCst);
		let gate = self.gates.lock().get(locator.as_str()).cloned();
		if let Some(gate) = gate {
			self.started.notify_one();
			gate.notified().await;
		}
		if self.failing.lock().contains(locator.as_str()) {
			return Err(FetchError::Network("connection reset".into()));
		}
		Ok(format!("declare module '{locator}';"))
	}
}

struct Harness {
	transport: Arc<MockTransport>,
	namespace: Arc<DeclarationNamespace>,
	session: Arc<LibrarySession>,
}

fn harness() -> Harness {
	let transport = Arc::new(MockTransport::default());
	let namespace = Arc::new(DeclarationNamespace::new());
	let cache = Arc::new(ContentCache::new(transport.clone()));
	let session = Arc::new(LibrarySession::new(
		cache,
		AdapterSet::in_namespace(&namespace),
		Resolver::default(),
	));
	Harness {
		transport,
		namespace,
		session,
	}
}

fn locator(name: &str) -> ResourceLocator {
	ResourceLocator::parse(&format!("https://unpkg.com/@types/{name}/index.d.ts")).unwrap()
}

fn locators(names: &[&str]) -> Vec<ResourceLocator> {
	let mut locators: Vec<_> = names.iter().map(|n| locator(n)).collect();
	locators.sort();
	locators
}

const TS: LanguageVariant = LanguageVariant::TypeScript;

#[tokio::test]
async fn test_first_pass_registers_everything() {
	let h = harness();
	let report = h.session.reconcile(locators(&["lodash", "react"]), TS).unwrap().settle().await;

	assert_eq!(report.registered, locators(&["lodash", "react"]));
	assert!(report.removed.is_empty());
	assert!(report.failed.is_empty());
	assert_eq!(h.session.active_locators(), locators(&["lodash", "react"]));
	assert_eq!(h.namespace.locators(TS), locators(&["lodash", "react"]));
	assert_eq!(h.session.bound_variant(), Some(TS));
	assert_eq!(h.session.pending_count(), 0);
}

#[tokio::test]
async fn test_duplicate_locators_collapse() {
	let h = harness();
	let desired = vec![locator("lodash"), locator("lodash"), locator("lodash")];
	let report = h.session.reconcile(desired, TS).unwrap().settle().await;

	assert_eq!(report.registered, locators(&["lodash"]));
	assert_eq!(h.transport.count(), 1);
	assert_eq!(h.namespace.registration_count(), 1);
}

#[tokio::test]
async fn test_same_set_twice_is_idempotent() {
	let h = harness();
	h.session.reconcile(locators(&["lodash", "react"]), TS).unwrap().settle().await;
	let fetches = h.transport.count();
	let registrations = h.namespace.registration_count();

	let outcomes = h.session.reconcile(locators(&["lodash", "react"]), TS).unwrap();
	assert_eq!(outcomes.pending(), 0);
	let report = outcomes.settle().await;

	assert!(report.is_noop());
	assert_eq!(h.transport.count(), fetches);
	assert_eq!(h.namespace.registration_count(), registrations);
	assert_eq!(h.namespace.disposal_count(), 0);
}

#[tokio::test]
async fn test_disjoint_sets_swap_registrations() {
	let h = harness();
	h.session
		.reconcile(locators(&["a", "b", "c"]), TS)
		.unwrap()
		.settle()
		.await;

	let report = h.session.reconcile(locators(&["d", "e"]), TS).unwrap().settle().await;

	let mut removed = report.removed.clone();
	removed.sort();
	assert_eq!(removed, locators(&["a", "b", "c"]));
	assert_eq!(report.registered, locators(&["d", "e"]));
	assert_eq!(h.namespace.disposal_count(), 3);
	assert_eq!(h.namespace.registration_count(), 5);
	assert_eq!(h.session.active_locators(), locators(&["d", "e"]));
	assert_eq!(h.namespace.locators(TS), locators(&["d", "e"]));
}

#[tokio::test]
async fn test_overlapping_sets_only_touch_the_difference() {
	let h = harness();
	h.session.reconcile(locators(&["a", "b"]), TS).unwrap().settle().await;

	let report = h.session.reconcile(locators(&["b", "c"]), TS).unwrap().settle().await;

	assert_eq!(report.removed, locators(&["a"]));
	assert_eq!(report.registered, locators(&["c"]));
	assert_eq!(h.session.active_locators(), locators(&["b", "c"]));
	assert_eq!(h.namespace.registration_count(), 3);
}

#[tokio::test]
async fn test_concurrent_passes_share_one_fetch_and_registration() {
	let h = harness();
	let lodash = locator("lodash");
	let gate = h.transport.gate(&lodash);

	let first = h.session.reconcile([lodash.clone()], TS).unwrap();
	let first = tokio::spawn(first.settle());
	h.transport.started.notified().await;

	// The addition is already in flight, so the second pass has nothing to add.
	let second = h.session.reconcile([lodash.clone()], TS).unwrap();
	assert_eq!(second.pending(), 0);

	gate.notify_one();
	let first = first.await.unwrap();
	let second = second.settle().await;

	assert_eq!(first.registered, vec![lodash.clone()]);
	assert!(second.is_noop());
	assert_eq!(h.transport.count(), 1);
	assert_eq!(h.namespace.registration_count(), 1);
	assert_eq!(h.session.active_locators(), vec![lodash]);
}

#[tokio::test]
async fn test_sessions_sharing_a_cache_fetch_once() {
	let transport = Arc::new(MockTransport::default());
	let cache = Arc::new(ContentCache::new(transport.clone()));
	let namespace = Arc::new(DeclarationNamespace::new());
	let lodash = locator("lodash");
	let gate = transport.gate(&lodash);

	let js = Arc::new(LibrarySession::new(cache.clone(), AdapterSet::in_namespace(&namespace), Resolver::default()));
	let ts = Arc::new(LibrarySession::new(cache, AdapterSet::in_namespace(&namespace), Resolver::default()));

	let a = tokio::spawn(js.reconcile([lodash.clone()], LanguageVariant::JavaScript).unwrap().settle());
	transport.started.notified().await;
	let b = tokio::spawn(ts.reconcile([lodash.clone()], TS).unwrap().settle());
	tokio::time::sleep(std::time::Duration::from_millis(50)).await;
	gate.notify_one();

	let (a, b) = tokio::join!(a, b);
	assert_eq!(a.unwrap().registered, vec![lodash.clone()]);
	assert_eq!(b.unwrap().registered, vec![lodash.clone()]);
	assert_eq!(transport.count(), 1);
	assert!(namespace.contains(LanguageVariant::JavaScript, &lodash));
	assert!(namespace.contains(TS, &lodash));
}

#[tokio::test]
async fn test_one_failure_does_not_block_the_batch() {
	let h = harness();
	let names = ["a", "b", "broken", "d", "e"];
	let broken = locator("broken");
	h.transport.fail(&broken);

	let report = h.session.reconcile(locators(&names), TS).unwrap().settle().await;

	assert_eq!(report.registered, locators(&["a", "b", "d", "e"]));
	assert_eq!(report.failed.len(), 1);
	let (failed, error) = &report.failed[0];
	assert_eq!(failed, &broken);
	assert!(matches!(error, Error::Fetch { source: FetchError::Network(_), .. }));
	assert!(!h.session.is_active(&broken));
	assert!(!h.session.cache().contains(&broken));
	assert_eq!(h.session.active_count(), 4);
}

#[tokio::test]
async fn test_failed_locator_is_retried_next_pass() {
	let h = harness();
	let broken = locator("broken");
	h.transport.fail(&broken);

	let report = h.session.reconcile([broken.clone()], TS).unwrap().settle().await;
	assert_eq!(report.failed.len(), 1);

	h.transport.heal(&broken);
	let report = h.session.reconcile([broken.clone()], TS).unwrap().settle().await;
	assert_eq!(report.registered, vec![broken.clone()]);
	assert_eq!(h.transport.count(), 2);
}

#[tokio::test]
async fn test_readding_a_removed_locator_reuses_cache() {
	let h = harness();
	let lodash = locator("lodash");

	h.session.reconcile([lodash.clone()], TS).unwrap().settle().await;
	let report = h.session.reconcile(Vec::new(), TS).unwrap().settle().await;
	assert_eq!(report.removed, vec![lodash.clone()]);
	assert_eq!(h.session.active_count(), 0);

	let report = h.session.reconcile([lodash.clone()], TS).unwrap().settle().await;
	assert_eq!(report.registered, vec![lodash.clone()]);
	assert_eq!(h.transport.count(), 1);
	assert_eq!(h.namespace.registration_count(), 2);
	assert_eq!(h.namespace.disposal_count(), 1);
}

#[tokio::test]
async fn test_superseded_addition_is_disposed_on_settle() {
	let h = harness();
	let lodash = locator("lodash");
	let gate = h.transport.gate(&lodash);

	let first = h.session.reconcile([lodash.clone()], TS).unwrap();
	let first = tokio::spawn(first.settle());
	h.transport.started.notified().await;

	let second = h.session.reconcile(Vec::new(), TS).unwrap();
	assert!(second.removed().is_empty());

	gate.notify_one();
	let first = first.await.unwrap();

	assert_eq!(first.discarded, vec![lodash.clone()]);
	assert!(first.registered.is_empty());
	assert_eq!(h.session.active_count(), 0);
	assert!(h.namespace.is_empty());
	assert_eq!(h.namespace.registration_count(), 1);
	assert_eq!(h.namespace.disposal_count(), 1);
	// The content itself is still cached for later passes.
	assert!(h.session.cache().contains(&lodash));
}

#[tokio::test]
async fn test_readded_while_in_flight_is_kept() {
	let h = harness();
	let lodash = locator("lodash");
	let gate = h.transport.gate(&lodash);

	let first = tokio::spawn(h.session.reconcile([lodash.clone()], TS).unwrap().settle());
	h.transport.started.notified().await;

	h.session.reconcile(Vec::new(), TS).unwrap();
	let third = h.session.reconcile([lodash.clone()], TS).unwrap();
	assert_eq!(third.pending(), 0);

	gate.notify_one();
	let first = first.await.unwrap();
	assert_eq!(first.registered, vec![lodash.clone()]);
	assert_eq!(h.session.active_locators(), vec![lodash]);
}

#[tokio::test]
async fn test_variant_is_bound_until_teardown() {
	let h = harness();
	h.session
		.reconcile(locators(&["lodash"]), LanguageVariant::JavaScript)
		.unwrap()
		.settle()
		.await;

	let err = h.session.reconcile(locators(&["lodash"]), TS).unwrap_err();
	assert_eq!(
		err,
		Error::VariantMismatch {
			bound: LanguageVariant::JavaScript,
			requested: TS,
		}
	);
	// Rejected before doing anything.
	assert_eq!(h.session.active_locators(), locators(&["lodash"]));
	assert_eq!(h.namespace.locators(LanguageVariant::JavaScript), locators(&["lodash"]));

	assert_eq!(h.session.teardown(), 1);
	assert_eq!(h.session.bound_variant(), None);

	let report = h.session.reconcile(locators(&["lodash"]), TS).unwrap().settle().await;
	assert_eq!(report.registered, locators(&["lodash"]));
	assert_eq!(h.namespace.locators(TS), locators(&["lodash"]));
	assert!(h.namespace.locators(LanguageVariant::JavaScript).is_empty());
	assert_eq!(h.transport.count(), 1);
}

#[tokio::test]
async fn test_rebind_switches_variant() {
	let h = harness();
	let js = DesiredState::new(["@types/lodash"], LanguageVariant::JavaScript, SurfaceKind::General);
	let ts = DesiredState::new(["@types/lodash"], TS, SurfaceKind::General);

	let first = h.session.rebind(&js).unwrap().settle().await;
	assert_eq!(first.registered.len(), 2);
	assert_eq!(h.session.bound_variant(), Some(LanguageVariant::JavaScript));

	assert!(matches!(h.session.apply(&ts), Err(Error::VariantMismatch { .. })));

	let second = h.session.rebind(&ts).unwrap().settle().await;
	assert_eq!(second.registered, first.registered);
	assert_eq!(h.session.bound_variant(), Some(TS));
	assert_eq!(h.namespace.locators(TS), first.registered);
	assert!(h.namespace.locators(LanguageVariant::JavaScript).is_empty());
	// Content fetched for the first variant is reused.
	assert_eq!(h.transport.count(), 2);

	// Same variant again is an ordinary pass.
	assert!(h.session.rebind(&ts).unwrap().settle().await.is_noop());
}

#[tokio::test]
async fn test_rebind_rejects_invalid_event_without_teardown() {
	let h = harness();
	h.session.reconcile(locators(&["lodash"]), TS).unwrap().settle().await;

	let request = DesiredState {
		references: vec!["@types/react".into()],
		language_variant: "javascript".into(),
		surface_kind: "sidebar".into(),
	};
	let err = h.session.rebind(&request).unwrap_err();

	assert_eq!(err, Error::InvalidSurface("sidebar".into()));
	assert_eq!(h.session.active_locators(), locators(&["lodash"]));
	assert_eq!(h.session.bound_variant(), Some(TS));
}

#[tokio::test]
async fn test_teardown_disposes_in_flight_additions_on_settle() {
	let h = harness();
	let lodash = locator("lodash");
	let react = locator("react");
	let gate = h.transport.gate(&react);

	h.session.reconcile([lodash.clone()], TS).unwrap().settle().await;
	let pass = tokio::spawn(h.session.reconcile([lodash.clone(), react.clone()], TS).unwrap().settle());
	h.transport.started.notified().await;

	assert_eq!(h.session.teardown(), 1);
	gate.notify_one();
	let report = pass.await.unwrap();

	assert_eq!(report.discarded, vec![react]);
	assert_eq!(h.session.active_count(), 0);
	assert!(h.namespace.is_empty());
}

#[tokio::test]
async fn test_invalid_surface_rejects_before_any_work() {
	let h = harness();
	let request = DesiredState {
		references: vec!["@types/lodash".into()],
		language_variant: "typescript".into(),
		surface_kind: "sidebar".into(),
	};

	let err = h.session.apply(&request).unwrap_err();
	assert_eq!(err, Error::InvalidSurface("sidebar".into()));
	assert_eq!(h.transport.count(), 0);
	assert_eq!(h.session.bound_variant(), None);
}

#[tokio::test]
async fn test_apply_resolves_references_and_implicits() {
	let h = harness();
	let request = DesiredState::new(
		["@types/office-js", "dt~jquery", "not-a-library"],
		LanguageVariant::JavaScript,
		SurfaceKind::Restricted,
	);

	let report = h.session.apply(&request).unwrap().settle().await;

	let registered: Vec<_> = report.registered.iter().map(ResourceLocator::as_str).collect();
	assert_eq!(
		registered,
		vec![
			"https://appsforoffice.microsoft.com/lib/1/hosted/office.d.ts",
			"https://raw.githubusercontent.com/DefinitelyTyped/DefinitelyTyped/master/types/jquery/index.d.ts",
			"https://unpkg.com/@types/custom-functions-runtime/index.d.ts",
		]
	);
	assert!(!h.session.is_active(&locator("office-js")));
}

struct RejectingAdapter;

#[async_trait]
impl AnalysisAdapter for RejectingAdapter {
	async fn register(&self, _content: Content, _key: &ResourceLocator) -> std::result::Result<Box<dyn Registration>, RegisterError> {
		Err(RegisterError("declaration namespace is read-only".into()))
	}
}

struct PanickingAdapter;

#[async_trait]
impl AnalysisAdapter for PanickingAdapter {
	async fn register(&self, _content: Content, _key: &ResourceLocator) -> std::result::Result<Box<dyn Registration>, RegisterError> {
		panic!("engine crashed")
	}
}

#[tokio::test]
async fn test_register_failure_leaves_no_registration() {
	let transport = Arc::new(MockTransport::default());
	let cache = Arc::new(ContentCache::new(transport.clone()));
	let adapters = AdapterSet::new(Arc::new(RejectingAdapter), Arc::new(PanickingAdapter));
	let js = Arc::new(LibrarySession::new(cache.clone(), adapters.clone(), Resolver::default()));
	let ts = Arc::new(LibrarySession::new(cache, adapters, Resolver::default()));
	let lodash = locator("lodash");

	let report = js.reconcile([lodash.clone()], LanguageVariant::JavaScript).unwrap().settle().await;
	assert!(matches!(&report.failed[..], [(l, Error::Register { message, .. })] if *l == lodash && message.contains("read-only")));
	assert_eq!(js.active_count(), 0);
	assert_eq!(js.pending_count(), 0);

	let report = ts.reconcile([lodash.clone()], TS).unwrap().settle().await;
	assert!(matches!(&report.failed[..], [(_, Error::Register { message, .. })] if message.contains("panicked")));
	assert_eq!(ts.active_count(), 0);
	assert_eq!(transport.count(), 1);
}

#[tokio::test]
async fn test_events_are_forwarded_to_the_channel() {
	let transport = Arc::new(MockTransport::default());
	let namespace = Arc::new(DeclarationNamespace::new());
	let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
	let session = Arc::new(
		LibrarySession::new(
			Arc::new(ContentCache::new(transport.clone())),
			AdapterSet::in_namespace(&namespace),
			Resolver::default(),
		)
		.with_events(tx),
	);
	let ok = locator("ok");
	let broken = locator("broken");
	transport.fail(&broken);

	session.reconcile([ok.clone(), broken.clone()], TS).unwrap().settle().await;

	let mut events = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
	events.sort_by(|a, b| a.locator().cmp(b.locator()));
	assert!(matches!(&events[0], LibraryEvent::RegistrationFailed { locator, .. } if *locator == broken));
	assert_eq!(events[1], LibraryEvent::Registered { locator: ok });
	assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_outcomes_stream_yields_each_addition() {
	let h = harness();
	let mut outcomes = h.session.reconcile(locators(&["a", "b", "c"]), TS).unwrap();

	let mut seen = Vec::new();
	while let Some(event) = outcomes.next().await {
		assert!(matches!(event, LibraryEvent::Registered { .. }));
		seen.push(event.locator().clone());
	}
	seen.sort();
	assert_eq!(seen, locators(&["a", "b", "c"]));
}

#[tokio::test]
async fn test_dropping_the_session_releases_registrations() {
	let h = harness();
	h.session.reconcile(locators(&["a", "b"]), TS).unwrap().settle().await;
	assert_eq!(h.namespace.len(), 2);

	let Harness { namespace, session, .. } = h;
	drop(session);
	assert!(namespace.is_empty());
	assert_eq!(namespace.disposal_count(), 2);
}
