//! Editing-surface and language-variant identities.

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// The editing context a reference list was authored in.
///
/// The restricted surface hosts custom-capability snippets. It ships its own
/// host-object declarations, so the stock host packages are suppressed there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
	/// General scripting surface.
	General,
	/// Restricted capability-authoring surface.
	Restricted,
}

impl SurfaceKind {
	/// Stable identifier used in configuration and input events.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::General => "general",
			Self::Restricted => "restricted",
		}
	}
}

impl FromStr for SurfaceKind {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"general" => Ok(Self::General),
			"restricted" => Ok(Self::Restricted),
			other => Err(Error::InvalidSurface(other.to_string())),
		}
	}
}

impl fmt::Display for SurfaceKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Language variant of the analysis engine a surface registers into.
///
/// Both variants read from one declaration namespace, but each has its own
/// registration target (see [`crate::adapter::AdapterSet`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageVariant {
	/// Dynamically-typed scripting variant.
	JavaScript,
	/// Statically-typed superset variant.
	TypeScript,
}

impl LanguageVariant {
	/// Stable identifier used in configuration and input events.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::JavaScript => "javascript",
			Self::TypeScript => "typescript",
		}
	}
}

impl FromStr for LanguageVariant {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"javascript" | "js" => Ok(Self::JavaScript),
			"typescript" | "ts" => Ok(Self::TypeScript),
			other => Err(Error::InvalidVariant(other.to_string())),
		}
	}
}

impl fmt::Display for LanguageVariant {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn surface_kind_parses_case_insensitively() {
		assert_eq!("General".parse::<SurfaceKind>().unwrap(), SurfaceKind::General);
		assert_eq!(" restricted ".parse::<SurfaceKind>().unwrap(), SurfaceKind::Restricted);
	}

	#[test]
	fn unknown_surface_kind_is_rejected() {
		let err = "notebook".parse::<SurfaceKind>().unwrap_err();
		assert!(matches!(err, Error::InvalidSurface(ref s) if s == "notebook"));
	}

	#[test]
	fn language_variant_accepts_short_names() {
		assert_eq!("ts".parse::<LanguageVariant>().unwrap(), LanguageVariant::TypeScript);
		assert_eq!("JavaScript".parse::<LanguageVariant>().unwrap(), LanguageVariant::JavaScript);
		assert!("python".parse::<LanguageVariant>().is_err());
	}
}
