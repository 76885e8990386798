//! Registration reconciliation for one editing surface.
//!
//! A [`LibrarySession`] owns the active registration set of a surface. Each
//! pass diffs the desired locators against that set, disposes what is no
//! longer wanted and spawns one independent fetch-and-register task per new
//! locator. Outcomes stream back through [`ReconcileOutcomes`] and, when a
//! sender is attached, the session's event channel.
//!
//! Only the settled end state is guaranteed: once every task of the latest
//! pass has finished, the active keys equal that pass's desired set.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::adapter::{AdapterSet, Registration};
use crate::cache::ContentCache;
use crate::event::{DesiredState, LibraryEvent, LibraryEventSender};
use crate::locator::ResourceLocator;
use crate::resolve::Resolver;
use crate::surface::LanguageVariant;
use crate::{Error, Result};

#[cfg(test)]
mod tests;

/// A locator currently registered with the analysis engine.
struct ActiveRegistration {
	variant: LanguageVariant,
	handle: Box<dyn Registration>,
}

#[derive(Default)]
struct SessionState {
	/// Live registrations keyed by locator.
	active: HashMap<ResourceLocator, ActiveRegistration>,
	/// Desired set of the most recent pass.
	desired: HashSet<ResourceLocator>,
	/// Additions in flight, keyed by locator, valued by ticket.
	pending: HashMap<ResourceLocator, u64>,
	/// Variant every registration of this surface uses until teardown.
	variant: Option<LanguageVariant>,
	next_ticket: u64,
}

/// Session-scoped registry of library registrations for one editing surface.
///
/// Sessions are independent: each owns its active set, so several surfaces can
/// reconcile concurrently. The [`ContentCache`] may be private to the session
/// or shared between sessions.
pub struct LibrarySession {
	state: Mutex<SessionState>,
	cache: Arc<ContentCache>,
	adapters: AdapterSet,
	resolver: Resolver,
	events: Option<LibraryEventSender>,
}

impl LibrarySession {
	/// Creates a session registering through `adapters`.
	pub fn new(cache: Arc<ContentCache>, adapters: AdapterSet, resolver: Resolver) -> Self {
		Self {
			state: Mutex::new(SessionState::default()),
			cache,
			adapters,
			resolver,
			events: None,
		}
	}

	/// Forwards user-visible outcomes to `events`.
	pub fn with_events(mut self, events: LibraryEventSender) -> Self {
		self.events = Some(events);
		self
	}

	/// Resolves a desired-state event and reconciles against it.
	///
	/// # Errors
	///
	/// Rejects the whole call with [`Error::InvalidSurface`],
	/// [`Error::InvalidVariant`] or [`Error::VariantMismatch`] before any
	/// fetch or registration work begins.
	pub fn apply(self: &Arc<Self>, request: &DesiredState) -> Result<ReconcileOutcomes> {
		let (variant, surface) = request.validate()?;
		let locators = self.resolver.resolve_all(&request.references, surface, variant);
		debug!(%surface, %variant, references = request.references.len(), locators = locators.len(), "Resolved library references");
		self.reconcile(locators, variant)
	}

	/// Like [`apply`](Self::apply), but switches language variant instead of
	/// rejecting the event.
	///
	/// If the session is bound to a different variant, every registration is
	/// torn down first and the session rebinds to the event's variant.
	///
	/// # Errors
	///
	/// Rejects an invalid surface kind or variant before tearing anything down.
	pub fn rebind(self: &Arc<Self>, request: &DesiredState) -> Result<ReconcileOutcomes> {
		request.validate()?;
		match self.apply(request) {
			Err(Error::VariantMismatch { bound, requested }) => {
				let released = self.teardown();
				info!(%bound, %requested, released, "Switching language variant");
				self.apply(request)
			}
			other => other,
		}
	}

	/// Runs one reconciliation pass.
	///
	/// Removals are applied before this returns. Additions run as spawned
	/// tasks whose outcomes are yielded by the returned stream; dropping the
	/// stream does not cancel them.
	///
	/// # Errors
	///
	/// Returns [`Error::VariantMismatch`] if the session is bound to a different
	/// variant.
	pub fn reconcile<I>(self: &Arc<Self>, desired: I, variant: LanguageVariant) -> Result<ReconcileOutcomes>
	where
		I: IntoIterator<Item = ResourceLocator>,
	{
		let desired: HashSet<ResourceLocator> = desired.into_iter().collect();

		let (stale, additions) = {
			let mut state = self.state.lock();
			if let Some(bound) = state.variant
				&& bound != variant
			{
				return Err(Error::VariantMismatch {
					bound,
					requested: variant,
				});
			}
			state.variant = Some(variant);

			let stale_keys: Vec<ResourceLocator> = state.active.keys().filter(|l| !desired.contains(*l)).cloned().collect();
			let stale: Vec<(ResourceLocator, ActiveRegistration)> = stale_keys
				.into_iter()
				.filter_map(|l| state.active.remove_entry(&l))
				.collect();

			let mut to_add: Vec<ResourceLocator> = desired
				.iter()
				.filter(|l| !state.active.contains_key(*l) && !state.pending.contains_key(*l))
				.cloned()
				.collect();
			to_add.sort();

			let additions: Vec<(ResourceLocator, u64)> = to_add
				.into_iter()
				.map(|locator| {
					state.next_ticket += 1;
					let ticket = state.next_ticket;
					state.pending.insert(locator.clone(), ticket);
					(locator, ticket)
				})
				.collect();

			state.desired = desired;
			(stale, additions)
		};

		info!(%variant, removing = stale.len(), adding = additions.len(), "Reconciling libraries");

		let mut removed = Vec::with_capacity(stale.len());
		for (locator, registration) in stale {
			debug!(%locator, variant = %registration.variant, "Disposing library");
			dispose(&locator, registration.handle);
			removed.push(locator);
		}

		let tasks = FuturesUnordered::new();
		for (locator, ticket) in additions {
			trace!(%locator, ticket, "libsync.add.spawn");
			let session = Arc::clone(self);
			let task = tokio::spawn(session.add(locator.clone(), variant, ticket));
			tasks.push(
				async move {
					task.await.unwrap_or_else(|e| LibraryEvent::RegistrationFailed {
						locator: locator.clone(),
						error: Error::Register {
							locator,
							message: format!("registration task failed: {e}"),
						},
					})
				}
				.boxed(),
			);
		}

		Ok(ReconcileOutcomes { removed, tasks })
	}

	/// Disposes every registration and forgets the desired set and variant.
	///
	/// Additions still in flight are disposed when they settle. Returns the
	/// number of registrations released.
	pub fn teardown(&self) -> usize {
		let released: Vec<(ResourceLocator, ActiveRegistration)> = {
			let mut state = self.state.lock();
			state.desired.clear();
			state.pending.clear();
			state.variant = None;
			state.active.drain().collect()
		};

		let count = released.len();
		for (locator, registration) in released {
			dispose(&locator, registration.handle);
		}
		if count > 0 {
			info!(released = count, "Tore down library session");
		}
		count
	}

	/// Sorted locators with a live registration.
	pub fn active_locators(&self) -> Vec<ResourceLocator> {
		let mut locators: Vec<_> = self.state.lock().active.keys().cloned().collect();
		locators.sort();
		locators
	}

	/// Number of live registrations.
	pub fn active_count(&self) -> usize {
		self.state.lock().active.len()
	}

	/// Returns true if `locator` has a live registration.
	pub fn is_active(&self, locator: &ResourceLocator) -> bool {
		self.state.lock().active.contains_key(locator)
	}

	/// Number of additions still in flight.
	pub fn pending_count(&self) -> usize {
		self.state.lock().pending.len()
	}

	/// Variant this session is bound to, if any pass has run since teardown.
	pub fn bound_variant(&self) -> Option<LanguageVariant> {
		self.state.lock().variant
	}

	/// The content cache this session fetches through.
	pub fn cache(&self) -> &Arc<ContentCache> {
		&self.cache
	}

	/// One fetch-and-register task.
	async fn add(self: Arc<Self>, locator: ResourceLocator, variant: LanguageVariant, ticket: u64) -> LibraryEvent {
		let result = AssertUnwindSafe(self.fetch_and_register(&locator, variant))
			.catch_unwind()
			.await
			.unwrap_or_else(|_| {
				Err(Error::Register {
					locator: locator.clone(),
					message: "analysis adapter panicked".into(),
				})
			});

		let (event, orphan) = {
			let mut state = self.state.lock();
			let current = state.pending.get(&locator) == Some(&ticket);
			if current {
				state.pending.remove(&locator);
			}
			let wanted = current && state.desired.contains(&locator) && state.variant == Some(variant);

			match result {
				Ok(handle) if wanted => {
					state.active.insert(locator.clone(), ActiveRegistration { variant, handle });
					(LibraryEvent::Registered { locator: locator.clone() }, None)
				}
				Ok(handle) => (LibraryEvent::Discarded { locator: locator.clone() }, Some(handle)),
				Err(error) if wanted => (LibraryEvent::RegistrationFailed { locator: locator.clone(), error }, None),
				Err(_) => (LibraryEvent::Discarded { locator: locator.clone() }, None),
			}
		};

		match &event {
			LibraryEvent::Registered { .. } => info!(%locator, %variant, "Registered library"),
			LibraryEvent::RegistrationFailed { error, .. } => warn!(%locator, %error, "Library registration failed"),
			LibraryEvent::Discarded { .. } => debug!(%locator, "Discarded superseded library addition"),
		}

		if let Some(handle) = orphan {
			dispose(&locator, handle);
		}

		if event.is_user_visible()
			&& let Some(events) = &self.events
		{
			let _ = events.send(event.clone());
		}

		event
	}

	async fn fetch_and_register(&self, locator: &ResourceLocator, variant: LanguageVariant) -> Result<Box<dyn Registration>> {
		let content = self.cache.get_or_fetch(locator).await.map_err(|source| Error::Fetch {
			locator: locator.clone(),
			source,
		})?;

		self.adapters
			.for_variant(variant)
			.register(content, locator)
			.await
			.map_err(|e| Error::Register {
				locator: locator.clone(),
				message: e.0,
			})
	}
}

impl Drop for LibrarySession {
	fn drop(&mut self) {
		self.teardown();
	}
}

impl std::fmt::Debug for LibrarySession {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("LibrarySession")
			.field("variant", &state.variant)
			.field("active", &state.active.len())
			.field("pending", &state.pending.len())
			.finish_non_exhaustive()
	}
}

/// Releases a registration, containing a panicking handle.
fn dispose(locator: &ResourceLocator, handle: Box<dyn Registration>) {
	if std::panic::catch_unwind(AssertUnwindSafe(|| handle.dispose())).is_err() {
		warn!(%locator, "Library disposal panicked");
	}
}

/// Stream of per-locator outcomes of one reconciliation pass.
pub struct ReconcileOutcomes {
	removed: Vec<ResourceLocator>,
	tasks: FuturesUnordered<BoxFuture<'static, LibraryEvent>>,
}

impl ReconcileOutcomes {
	/// Locators disposed by this pass.
	pub fn removed(&self) -> &[ResourceLocator] {
		&self.removed
	}

	/// Number of additions not yet settled.
	pub fn pending(&self) -> usize {
		self.tasks.len()
	}

	/// Waits for every addition and summarizes the pass.
	pub async fn settle(mut self) -> ReconcileReport {
		let mut report = ReconcileReport {
			removed: std::mem::take(&mut self.removed),
			..ReconcileReport::default()
		};
		while let Some(event) = self.tasks.next().await {
			match event {
				LibraryEvent::Registered { locator } => report.registered.push(locator),
				LibraryEvent::RegistrationFailed { locator, error } => report.failed.push((locator, error)),
				LibraryEvent::Discarded { locator } => report.discarded.push(locator),
			}
		}
		report.registered.sort();
		report.failed.sort_by(|a, b| a.0.cmp(&b.0));
		report.discarded.sort();
		report
	}
}

impl Stream for ReconcileOutcomes {
	type Item = LibraryEvent;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		Pin::new(&mut self.tasks).poll_next(cx)
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		self.tasks.size_hint()
	}
}

impl std::fmt::Debug for ReconcileOutcomes {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReconcileOutcomes")
			.field("removed", &self.removed)
			.field("pending", &self.tasks.len())
			.finish()
	}
}

/// Summary of a settled reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
	/// Locators disposed.
	pub removed: Vec<ResourceLocator>,
	/// Locators newly registered.
	pub registered: Vec<ResourceLocator>,
	/// Locators whose fetch or registration failed.
	pub failed: Vec<(ResourceLocator, Error)>,
	/// Additions that settled after being superseded.
	pub discarded: Vec<ResourceLocator>,
}

impl ReconcileReport {
	/// Returns true if the pass changed nothing.
	pub fn is_noop(&self) -> bool {
		self.removed.is_empty() && self.registered.is_empty() && self.failed.is_empty() && self.discarded.is_empty()
	}
}
