//! Library reference resolution.
//!
//! Turns author-declared library references into canonical
//! [`ResourceLocator`]s. Three reference shapes are recognized, checked in
//! order:
//!
//! 1. `@types/<package>`: the package's declaration index on the CDN.
//! 2. `dt~<name>`: the package's index file in the community declaration
//!    repository.
//! 3. Any path ending in `.d.ts`: used as-is when absolute, otherwise rooted
//!    at the CDN.
//!
//! Everything else is dropped silently. On the restricted surface, references
//! to host-object packages resolve to nothing because that surface registers
//! its own superseding declarations.

use tracing::trace;

use crate::config::SyncConfig;
use crate::locator::ResourceLocator;
use crate::surface::{LanguageVariant, SurfaceKind};


const SCOPED_TYPES_PREFIX: &str = "@types/";
const REGISTRY_PREFIX: &str = "dt~";
const DECLARATION_SUFFIX: &str = ".d.ts";
const INDEX_FILE: &str = "index.d.ts";

/// Resolves library references against a [`SyncConfig`].
#[derive(Debug, Clone, Default)]
pub struct Resolver {
	config: SyncConfig,
}

impl Resolver {
	/// Creates a resolver for the given configuration.
	pub fn new(config: SyncConfig) -> Self {
		Self { config }
	}

	/// Returns the configuration this resolver uses.
	pub fn config(&self) -> &SyncConfig {
		&self.config
	}

	/// Resolves a single reference.
	///
	/// Returns `None` for unrecognized references and for host-object packages
	/// on the restricted surface.
	pub fn resolve(&self, reference: &str, surface: SurfaceKind) -> Option<ResourceLocator> {
		let reference = reference.trim();
		if reference.is_empty() {
			return None;
		}

		let suppress_host = surface == SurfaceKind::Restricted;

		let raw = if let Some(package) = reference.strip_prefix(SCOPED_TYPES_PREFIX) {
			if package_name(package).is_empty() {
				trace!(reference, "scoped-types reference without a package name");
				return None;
			}
			if suppress_host && self.config.is_host_package(package_name(package)) {
				trace!(reference, "suppressed host package on restricted surface");
				return None;
			}
			format!("{}{}", self.config.cdn_root, index_path(reference))
		} else if let Some(name) = reference.strip_prefix(REGISTRY_PREFIX) {
			let name = name.trim_matches('/');
			if name.is_empty() {
				return None;
			}
			if suppress_host && self.config.is_host_package(package_name(name)) {
				trace!(reference, "suppressed host package on restricted surface");
				return None;
			}
			format!("{}{}/{INDEX_FILE}", self.config.definitely_typed_root, name)
		} else if has_declaration_suffix(reference) {
			if suppress_host && self.refers_to_host_package(reference) {
				trace!(reference, "suppressed host declaration file on restricted surface");
				return None;
			}
			if is_absolute_url(reference) {
				reference.to_string()
			} else {
				format!("{}{}", self.config.cdn_root, reference.trim_start_matches('/'))
			}
		} else {
			trace!(reference, "unrecognized library reference");
			return None;
		};

		ResourceLocator::parse(&raw)
	}

	/// Resolves an authored reference list plus the surface's implicit
	/// references.
	///
	/// Implicit references are appended after the authored ones. Unresolvable
	/// entries are dropped; order is otherwise preserved and duplicates are
	/// kept.
	pub fn resolve_all<S: AsRef<str>>(&self, references: &[S], surface: SurfaceKind, variant: LanguageVariant) -> Vec<ResourceLocator> {
		references
			.iter()
			.map(AsRef::as_ref)
			.chain(self.config.implicit_references(surface, variant))
			.filter_map(|r| self.resolve(r, surface))
			.collect()
	}

	/// Checks whether any path segment names a host-object package directory.
	fn refers_to_host_package(&self, reference: &str) -> bool {
		let path = reference.split(['?', '#']).next().unwrap_or(reference);
		let path = match path.split_once("://") {
			Some((_, rest)) => rest.split_once('/').map_or("", |(_, p)| p),
			None => path,
		};
		let mut segments = path.split('/').filter(|s| !s.is_empty()).peekable();
		while let Some(segment) = segments.next() {
			// The final segment is the file itself, not a package directory.
			if segments.peek().is_none() {
				break;
			}
			if self.config.is_host_package(segment) {
				return true;
			}
		}
		false
	}
}

/// Strips any sub-path from a package reference (`lodash/fp` → `lodash`).
fn package_name(package: &str) -> &str {
	package.split('/').next().unwrap_or(package)
}

/// Path to the declaration index for a scoped-types reference.
fn index_path(reference: &str) -> String {
	let reference = reference.trim_end_matches('/');
	if has_declaration_suffix(reference) {
		reference.to_string()
	} else {
		format!("{reference}/{INDEX_FILE}")
	}
}

fn has_declaration_suffix(reference: &str) -> bool {
	reference.len() >= DECLARATION_SUFFIX.len()
		&& reference
			.get(reference.len() - DECLARATION_SUFFIX.len()..)
			.is_some_and(|s| s.eq_ignore_ascii_case(DECLARATION_SUFFIX))
}

fn is_absolute_url(reference: &str) -> bool {
	let lower = reference.get(..8).unwrap_or(reference).to_ascii_lowercase();
	lower.starts_with("http://") || lower.starts_with("https://")
}
