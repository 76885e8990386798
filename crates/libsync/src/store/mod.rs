//! Backing stores for fetched declaration content.
//!
//! A store outlives individual reconciliation passes and lets the
//! [`ContentCache`](crate::cache::ContentCache) skip the network for content
//! fetched earlier. Store failures are never fatal: they are logged and
//! treated as misses.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing::warn;


/// Keyed persistence capability.
pub trait ContentStore: Send + Sync {
	/// Returns true if `key` has stored content.
	fn contains(&self, key: &str) -> bool;

	/// Returns the stored content for `key`.
	fn get(&self, key: &str) -> Option<Arc<str>>;

	/// Stores `content` under `key`, replacing any previous value.
	fn insert(&self, key: &str, content: Arc<str>);
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: RwLock<HashMap<String, Arc<str>>>,
}

impl MemoryStore {
	/// Creates an empty store.
	pub fn new() -> Self {
		Self::default()
	}

	/// Number of stored entries.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns true if nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}
}

impl ContentStore for MemoryStore {
	fn contains(&self, key: &str) -> bool {
		self.entries.read().contains_key(key)
	}

	fn get(&self, key: &str) -> Option<Arc<str>> {
		self.entries.read().get(key).cloned()
	}

	fn insert(&self, key: &str, content: Arc<str>) {
		self.entries.write().insert(key.to_string(), content);
	}
}

/// Directory-backed store with one file per key.
///
/// File names are the URL-safe base64 encoding of the key's SHA-256 digest,
/// so any locator maps to a flat file name of fixed length.
#[derive(Debug, Clone)]
pub struct DirStore {
	root: PathBuf,
}

impl DirStore {
	/// Opens a store rooted at `root`, creating the directory if needed.
	pub fn open(root: impl Into<PathBuf>) -> std::io::Result<Self> {
		let root = root.into();
		std::fs::create_dir_all(&root)?;
		Ok(Self { root })
	}

	/// Directory holding the stored files.
	pub fn root(&self) -> &Path {
		&self.root
	}

	fn path_for(&self, key: &str) -> PathBuf {
		let mut hasher = Sha256::new();
		hasher.update(key.as_bytes());
		self.root.join(format!("{}.d.ts", URL_SAFE_NO_PAD.encode(hasher.finalize())))
	}
}

impl ContentStore for DirStore {
	fn contains(&self, key: &str) -> bool {
		self.path_for(key).is_file()
	}

	fn get(&self, key: &str) -> Option<Arc<str>> {
		let path = self.path_for(key);
		match std::fs::read_to_string(&path) {
			Ok(content) => Some(Arc::from(content)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
			Err(e) => {
				warn!(key, path = %path.display(), error = %e, "Failed to read stored declaration");
				None
			}
		}
	}

	fn insert(&self, key: &str, content: Arc<str>) {
		let path = self.path_for(key);
		// Write then rename so readers never observe a truncated file.
		let tmp = path.with_extension("tmp");
		let result = std::fs::write(&tmp, content.as_bytes()).and_then(|()| std::fs::rename(&tmp, &path));
		if let Err(e) = result {
			warn!(key, path = %path.display(), error = %e, "Failed to persist declaration");
			let _ = std::fs::remove_file(&tmp);
		}
	}
}
