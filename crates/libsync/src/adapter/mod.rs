//! Analysis-engine adapters.
//!
//! The engine is consumed through two capabilities: registering declaration
//! content under a key, and disposing that registration later. One adapter
//! exists per [`LanguageVariant`]; [`AdapterSet`] dispatches between them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

use crate::cache::Content;
use crate::locator::ResourceLocator;
use crate::surface::LanguageVariant;


/// The engine refused a registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RegisterError(pub String);

/// Live registration in the analysis engine.
pub trait Registration: Send {
	/// Releases the registration. Must not fail.
	fn dispose(self: Box<Self>);
}

/// Registration target for one language variant.
#[async_trait]
pub trait AnalysisAdapter: Send + Sync {
	/// Registers `content` under `key`, returning its disposal handle.
	async fn register(&self, content: Content, key: &ResourceLocator) -> Result<Box<dyn Registration>, RegisterError>;
}

/// One adapter per language variant.
#[derive(Clone)]
pub struct AdapterSet {
	javascript: Arc<dyn AnalysisAdapter>,
	typescript: Arc<dyn AnalysisAdapter>,
}

impl AdapterSet {
	/// Creates a set from the two variant targets.
	pub fn new(javascript: Arc<dyn AnalysisAdapter>, typescript: Arc<dyn AnalysisAdapter>) -> Self {
		Self { javascript, typescript }
	}

	/// Creates a set of [`NamespaceAdapter`]s sharing `namespace`.
	pub fn in_namespace(namespace: &Arc<DeclarationNamespace>) -> Self {
		Self::new(
			Arc::new(NamespaceAdapter::new(LanguageVariant::JavaScript, namespace.clone())),
			Arc::new(NamespaceAdapter::new(LanguageVariant::TypeScript, namespace.clone())),
		)
	}

	/// Returns the adapter for `variant`.
	pub fn for_variant(&self, variant: LanguageVariant) -> Arc<dyn AnalysisAdapter> {
		match variant {
			LanguageVariant::JavaScript => self.javascript.clone(),
			LanguageVariant::TypeScript => self.typescript.clone(),
		}
	}
}

impl std::fmt::Debug for AdapterSet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AdapterSet").finish_non_exhaustive()
	}
}

struct NamespaceEntry {
	id: u64,
	content: Content,
}

/// In-process declaration namespace shared by both language variants.
///
/// Each variant registers into its own slot of the namespace, mirroring an
/// engine with one declaration store and per-variant registration targets.
#[derive(Default)]
pub struct DeclarationNamespace {
	libs: RwLock<HashMap<(LanguageVariant, ResourceLocator), NamespaceEntry>>,
	next_id: AtomicU64,
	registrations: AtomicUsize,
	disposals: AtomicUsize,
}

impl DeclarationNamespace {
	/// Creates an empty namespace.
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns true if `locator` is registered for `variant`.
	pub fn contains(&self, variant: LanguageVariant, locator: &ResourceLocator) -> bool {
		self.libs.read().contains_key(&(variant, locator.clone()))
	}

	/// Returns the registered content for `locator` under `variant`.
	pub fn get(&self, variant: LanguageVariant, locator: &ResourceLocator) -> Option<Content> {
		self.libs.read().get(&(variant, locator.clone())).map(|e| e.content.clone())
	}

	/// Sorted locators registered for `variant`.
	pub fn locators(&self, variant: LanguageVariant) -> Vec<ResourceLocator> {
		let mut locators: Vec<_> = self
			.libs
			.read()
			.keys()
			.filter(|(v, _)| *v == variant)
			.map(|(_, l)| l.clone())
			.collect();
		locators.sort();
		locators
	}

	/// Number of live registrations across both variants.
	pub fn len(&self) -> usize {
		self.libs.read().len()
	}

	/// Returns true if nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.libs.read().is_empty()
	}

	/// Total registrations performed.
	pub fn registration_count(&self) -> usize {
		self.registrations.load(Ordering::SeqCst)
	}

	/// Total disposals performed.
	pub fn disposal_count(&self) -> usize {
		self.disposals.load(Ordering::SeqCst)
	}

	fn insert(&self, variant: LanguageVariant, locator: ResourceLocator, content: Content) -> u64 {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);
		self.libs.write().insert((variant, locator), NamespaceEntry { id, content });
		self.registrations.fetch_add(1, Ordering::SeqCst);
		id
	}

	fn remove(&self, variant: LanguageVariant, locator: &ResourceLocator, id: u64) {
		let key = (variant, locator.clone());
		let mut libs = self.libs.write();
		// A newer registration under the same key is not ours to drop.
		if libs.get(&key).is_some_and(|e| e.id == id) {
			libs.remove(&key);
		}
		self.disposals.fetch_add(1, Ordering::SeqCst);
	}
}

impl std::fmt::Debug for DeclarationNamespace {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DeclarationNamespace")
			.field("live", &self.len())
			.field("registrations", &self.registration_count())
			.field("disposals", &self.disposal_count())
			.finish()
	}
}

/// Adapter registering into a [`DeclarationNamespace`] slot.
#[derive(Debug, Clone)]
pub struct NamespaceAdapter {
	variant: LanguageVariant,
	namespace: Arc<DeclarationNamespace>,
}

impl NamespaceAdapter {
	/// Creates the adapter for `variant`.
	pub fn new(variant: LanguageVariant, namespace: Arc<DeclarationNamespace>) -> Self {
		Self { variant, namespace }
	}
}

#[async_trait]
impl AnalysisAdapter for NamespaceAdapter {
	async fn register(&self, content: Content, key: &ResourceLocator) -> Result<Box<dyn Registration>, RegisterError> {
		let id = self.namespace.insert(self.variant, key.clone(), content);
		Ok(Box::new(NamespaceRegistration {
			namespace: self.namespace.clone(),
			variant: self.variant,
			locator: key.clone(),
			id,
		}))
	}
}

struct NamespaceRegistration {
	namespace: Arc<DeclarationNamespace>,
	variant: LanguageVariant,
	locator: ResourceLocator,
	id: u64,
}

impl Registration for NamespaceRegistration {
	fn dispose(self: Box<Self>) {
		self.namespace.remove(self.variant, &self.locator, self.id);
	}
}
