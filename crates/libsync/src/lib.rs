//! Library synchronization for the analysis engine.
//!
//! Keeps an analysis engine supplied with exactly the declaration libraries a
//! snippet references, fetching each at most once per session and releasing
//! registrations that are no longer wanted.
//!
//! The pieces, leaves first:
//!
//! - [`resolve::Resolver`]: author references to canonical [`ResourceLocator`]s.
//! - [`cache::ContentCache`]: fetch-or-reuse content with one in-flight fetch per
//!   locator, optionally backed by a [`store::ContentStore`].
//! - [`adapter::AdapterSet`]: one [`adapter::AnalysisAdapter`] per
//!   [`LanguageVariant`].
//! - [`reconcile::LibrarySession`]: the per-surface registry that diffs desired
//!   against active registrations and drives fetch, register and dispose.
//!
//! ## Usage
//!
//! ```no_run
//! # async fn run() -> xeno_libsync::Result<()> {
//! use std::sync::Arc;
//!
//! use futures::StreamExt;
//! use xeno_libsync::adapter::{AdapterSet, DeclarationNamespace};
//! use xeno_libsync::cache::ContentCache;
//! use xeno_libsync::config::SyncConfig;
//! use xeno_libsync::reconcile::LibrarySession;
//! use xeno_libsync::resolve::Resolver;
//! use xeno_libsync::transport::HttpTransport;
//! use xeno_libsync::{DesiredState, LanguageVariant, SurfaceKind};
//!
//! let config = SyncConfig::default();
//! let cache = Arc::new(ContentCache::new(Arc::new(HttpTransport::new(config.fetch_timeout))));
//! let namespace = Arc::new(DeclarationNamespace::new());
//! let session = Arc::new(LibrarySession::new(cache, AdapterSet::in_namespace(&namespace), Resolver::new(config)));
//!
//! let request = DesiredState::new(["@types/lodash"], LanguageVariant::TypeScript, SurfaceKind::General);
//! let mut outcomes = session.apply(&request)?;
//! while let Some(event) = outcomes.next().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub mod adapter;
pub mod cache;
pub mod config;
pub mod event;
pub mod locator;
pub mod reconcile;
pub mod resolve;
pub mod store;
pub mod surface;
pub mod transport;

pub use event::{DesiredState, LibraryEvent, LibraryEventReceiver, LibraryEventSender};
pub use locator::ResourceLocator;
pub use reconcile::{LibrarySession, ReconcileOutcomes, ReconcileReport};
pub use surface::{LanguageVariant, SurfaceKind};
pub use transport::FetchError;

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
///
/// Cloneable so per-locator failures can travel through outcome streams and
/// event channels.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// The surface kind of a request is not recognized.
	#[error("invalid surface kind: {0}")]
	InvalidSurface(String),
	/// The language variant of a request is not recognized.
	#[error("invalid language variant: {0}")]
	InvalidVariant(String),
	/// The session's registrations use a different language variant.
	#[error("session is bound to {bound}, cannot reconcile for {requested}")]
	VariantMismatch {
		/// Variant of the existing registration set.
		bound: LanguageVariant,
		/// Variant the rejected request asked for.
		requested: LanguageVariant,
	},
	/// Fetching a locator's content failed.
	#[error("failed to fetch {locator}: {source}")]
	Fetch {
		/// The failing locator.
		locator: ResourceLocator,
		/// The transport error.
		#[source]
		source: FetchError,
	},
	/// The analysis engine rejected a registration.
	#[error("failed to register {locator}: {message}")]
	Register {
		/// The failing locator.
		locator: ResourceLocator,
		/// Why the engine refused it.
		message: String,
	},
}
