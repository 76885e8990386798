//! Canonical resource locators.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use url::Url;

/// Canonical absolute fetch address of a declaration resource.
///
/// This is the identity key for the cache, the active registration set and the
/// analysis engine. Only absolute `http`/`https` URLs are accepted; the stored
/// form is the normalized serialization produced by [`Url`], so two spellings
/// of the same address collapse to one key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceLocator(Arc<str>);

impl ResourceLocator {
	/// Parses an absolute `http(s)` URL into a locator.
	pub fn parse(raw: &str) -> Option<Self> {
		let url = Url::parse(raw.trim()).ok()?;
		if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
			return None;
		}
		Some(Self(Arc::from(url.as_str())))
	}

	/// Returns the locator as a string slice.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for ResourceLocator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ResourceLocator").field(&&*self.0).finish()
	}
}

impl fmt::Display for ResourceLocator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl AsRef<str> for ResourceLocator {
	fn as_ref(&self) -> &str {
		&self.0
	}
}

impl Borrow<str> for ResourceLocator {
	fn borrow(&self) -> &str {
		&self.0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn accepts_http_and_https_only() {
		assert!(ResourceLocator::parse("https://unpkg.com/@types/lodash/index.d.ts").is_some());
		assert!(ResourceLocator::parse("http://localhost:3000/lib.d.ts").is_some());
		assert!(ResourceLocator::parse("file:///tmp/lib.d.ts").is_none());
		assert!(ResourceLocator::parse("lodash/index.d.ts").is_none());
		assert!(ResourceLocator::parse("").is_none());
	}

	#[test]
	fn equivalent_spellings_collapse() {
		let a = ResourceLocator::parse("HTTPS://UNPKG.com/a/index.d.ts").unwrap();
		let b = ResourceLocator::parse("  https://unpkg.com/a/index.d.ts").unwrap();
		assert_eq!(a, b);
		assert_eq!(a.as_str(), "https://unpkg.com/a/index.d.ts");
	}
}
