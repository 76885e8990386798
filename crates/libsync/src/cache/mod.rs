//! Declaration content cache.
//!
//! Maps each [`ResourceLocator`] to its fetched text. Entries are created on
//! the first successful fetch and are never evicted; failures are never
//! stored, so a later request retries the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tokio::sync::{Mutex, watch};
use tracing::{debug, warn};

use crate::locator::ResourceLocator;
use crate::store::ContentStore;
use crate::transport::{FetchError, FetchTransport};


/// Fetched declaration text, shared between the cache and its callers.
pub type Content = Arc<str>;

type FetchResult = Result<Content, FetchError>;

/// Tracking state for a fetch in progress.
struct InFlightFetch {
	tx: watch::Sender<Option<Arc<FetchResult>>>,
	rx: watch::Receiver<Option<Arc<FetchResult>>>,
}

type InFlightMap = Arc<Mutex<HashMap<ResourceLocator, Arc<InFlightFetch>>>>;

/// Fetch-or-reuse cache for declaration content.
///
/// Concurrent requests for one locator collapse into a single transport
/// fetch (singleflight): the first caller becomes the leader and performs the
/// fetch, later callers wait on a `watch` channel and receive the leader's
/// result.
///
/// # Concurrency
///
/// - `entries`: `RwLock` for read-heavy lookups, never held across an await
/// - `inflight`: async `Mutex` gate ensuring one transport fetch per locator
pub struct ContentCache {
	entries: RwLock<HashMap<ResourceLocator, Content>>,
	store: Option<Arc<dyn ContentStore>>,
	transport: Arc<dyn FetchTransport>,
	inflight: InFlightMap,
	fetches: AtomicUsize,
}

impl ContentCache {
	/// Creates an empty cache fetching through `transport`.
	pub fn new(transport: Arc<dyn FetchTransport>) -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
			store: None,
			transport,
			inflight: Arc::new(Mutex::new(HashMap::new())),
			fetches: AtomicUsize::new(0),
		}
	}

	/// Adds a backing store consulted before the network and written after
	/// every successful fetch.
	pub fn with_store(mut self, store: Arc<dyn ContentStore>) -> Self {
		self.store = Some(store);
		self
	}

	/// Returns the content for `locator`, fetching it if not yet cached.
	///
	/// # Singleflight Protocol
	///
	/// 1. Fast path: return cached content (memory, then backing store)
	/// 2. Leader election under the inflight gate
	/// 3. Leader re-checks the cache, fetches, stores on success and publishes
	///    the result to waiters
	/// 4. Waiters receive the published result directly
	///
	/// # Errors
	///
	/// Returns the transport error if the fetch fails. Nothing is cached in
	/// that case.
	pub async fn get_or_fetch(&self, locator: &ResourceLocator) -> Result<Content, FetchError> {
		// 1. Fast path
		if let Some(content) = self.lookup(locator).await {
			debug!(%locator, "Declaration cache hit");
			return Ok(content);
		}

		// 2. Leader election
		let (inflight, is_leader) = {
			let mut inflight_map = self.inflight.lock().await;
			if let Some(f) = inflight_map.get(locator) {
				(f.clone(), false)
			} else {
				let (tx, rx) = watch::channel(None);
				let f = Arc::new(InFlightFetch { tx, rx });
				inflight_map.insert(locator.clone(), f.clone());
				(f, true)
			}
		};

		if !is_leader {
			// 3a. Wait for leader
			let mut rx = inflight.rx.clone();
			loop {
				let result = rx.borrow().as_ref().cloned();
				if let Some(res) = result {
					return (*res).clone();
				}
				if rx.changed().await.is_err() {
					return Err(FetchError::Aborted);
				}
			}
		}

		// 3b. Leader work
		let guard = FetchGuard {
			locator: locator.clone(),
			inflight_map: Arc::clone(&self.inflight),
			inflight,
			completed: false,
		};

		// A previous leader may have finished between the fast path and election.
		if let Some(content) = self.lookup(locator).await {
			return guard.complete(Ok(content));
		}

		self.fetches.fetch_add(1, Ordering::SeqCst);
		debug!(%locator, "Fetching declaration");

		let result = match self.transport.fetch_text(locator).await {
			Ok(text) => {
				let content: Content = Arc::from(text);
				self.entries.write().insert(locator.clone(), content.clone());
				self.persist(locator, content.clone()).await;
				Ok(content)
			}
			Err(e) => {
				warn!(%locator, error = %e, "Declaration fetch failed");
				Err(e)
			}
		};

		guard.complete(result)
	}

	/// Returns content cached in memory, without fetching or reading the
	/// backing store.
	pub fn get(&self, locator: &ResourceLocator) -> Option<Content> {
		self.entries.read().get(locator).cloned()
	}

	/// Returns true if `locator` is cached in memory.
	pub fn contains(&self, locator: &ResourceLocator) -> bool {
		self.entries.read().contains_key(locator)
	}

	/// Number of locators cached in memory.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns true if nothing is cached in memory.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Number of transport fetches started by this cache.
	pub fn fetch_count(&self) -> usize {
		self.fetches.load(Ordering::SeqCst)
	}

	/// Memory lookup, falling back to the backing store.
	///
	/// Store I/O runs on the blocking pool.
	async fn lookup(&self, locator: &ResourceLocator) -> Option<Content> {
		if let Some(content) = self.get(locator) {
			return Some(content);
		}
		let store = Arc::clone(self.store.as_ref()?);
		let key = locator.clone();
		let stored = tokio::task::spawn_blocking(move || {
			if store.contains(key.as_str()) {
				store.get(key.as_str())
			} else {
				None
			}
		})
		.await
		.unwrap_or_else(|e| {
			warn!(%locator, error = %e, "Backing store lookup failed");
			None
		})?;
		debug!(%locator, "Declaration restored from backing store");
		Some(self.entries.write().entry(locator.clone()).or_insert(stored).clone())
	}

	/// Writes fetched content to the backing store, if any.
	async fn persist(&self, locator: &ResourceLocator, content: Content) {
		let Some(store) = self.store.clone() else {
			return;
		};
		let key = locator.clone();
		if let Err(e) = tokio::task::spawn_blocking(move || store.insert(key.as_str(), content)).await {
			warn!(%locator, error = %e, "Backing store write failed");
		}
	}
}

impl std::fmt::Debug for ContentCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ContentCache")
			.field("entries", &self.len())
			.field("has_store", &self.store.is_some())
			.field("fetches", &self.fetch_count())
			.finish()
	}
}

/// Guard that un-wedges the inflight map if the leader is dropped before
/// publishing a result.
struct FetchGuard {
	locator: ResourceLocator,
	inflight_map: InFlightMap,
	inflight: Arc<InFlightFetch>,
	completed: bool,
}

impl FetchGuard {
	fn complete(mut self, res: FetchResult) -> FetchResult {
		self.completed = true;

		// 1) publish result to waiters (sync, no await points)
		let _ = self.inflight.tx.send(Some(Arc::new(res.clone())));

		// 2) release the inflight slot so later requests start fresh
		self.release();

		res
	}

	fn release(&self) {
		if let Ok(mut map) = self.inflight_map.try_lock() {
			remove_if_current(&mut map, &self.locator, &self.inflight);
			return;
		}

		let Ok(handle) = tokio::runtime::Handle::try_current() else {
			return;
		};
		let locator = self.locator.clone();
		let inflight_map = Arc::clone(&self.inflight_map);
		let inflight = Arc::clone(&self.inflight);
		handle.spawn(async move {
			let mut map = inflight_map.lock().await;
			remove_if_current(&mut map, &locator, &inflight);
		});
	}
}

impl Drop for FetchGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}

		// Leader exited early: publish a deterministic error so waiters don't
		// hang, then free the slot for a retry.
		let _ = self.inflight.tx.send(Some(Arc::new(Err(FetchError::Aborted))));
		self.release();
	}
}

fn remove_if_current(map: &mut HashMap<ResourceLocator, Arc<InFlightFetch>>, locator: &ResourceLocator, inflight: &Arc<InFlightFetch>) {
	if map.get(locator).is_some_and(|current| Arc::ptr_eq(current, inflight)) {
		map.remove(locator);
	}
}
