//! Library synchronization configuration parsed from KDL.
//!
//! Every field has a default, so an empty document is a valid configuration.
//!
//! # KDL Format
//!
//! ```kdl
//! cdn-root "https://unpkg.com/"
//! definitely-typed-root "https://raw.githubusercontent.com/DefinitelyTyped/DefinitelyTyped/master/types/"
//! host-packages office-js office-js-preview
//! fetch-timeout-secs 30
//!
//! // Implicit references appended before resolution
//! implicit general "https://unpkg.com/@microsoft/office-js-helpers@0.7.4/dist/office.helpers.d.ts"
//! implicit restricted "https://unpkg.com/@types/custom-functions-runtime/index.d.ts"
//! implicit restricted variant=typescript "https://appsforoffice.microsoft.com/lib/beta/hosted/office.d.ts"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use kdl::{KdlDocument, KdlNode};
use thiserror::Error;

use crate::surface::{LanguageVariant, SurfaceKind};


/// Default package CDN root.
pub const DEFAULT_CDN_ROOT: &str = "https://unpkg.com/";

/// Default root of the community type-declaration repository.
pub const DEFAULT_DEFINITELY_TYPED_ROOT: &str = "https://raw.githubusercontent.com/DefinitelyTyped/DefinitelyTyped/master/types/";

/// Default network fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Errors from configuration parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// KDL syntax error.
	#[error("failed to parse KDL: {0}")]
	Kdl(#[from] kdl::KdlError),

	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// A node carried a value of the wrong shape.
	#[error("invalid value for '{node}': {reason}")]
	InvalidValue {
		/// Name of the offending node.
		node: String,
		/// What was wrong with it.
		reason: String,
	},
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// An implicit reference appended for a surface before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplicitReference {
	/// Surface the reference applies to.
	pub surface: SurfaceKind,
	/// Restricts the reference to one language variant when set.
	pub variant: Option<LanguageVariant>,
	/// The raw reference string.
	pub reference: String,
}

impl ImplicitReference {
	fn applies_to(&self, surface: SurfaceKind, variant: LanguageVariant) -> bool {
		self.surface == surface && self.variant.is_none_or(|v| v == variant)
	}
}

/// Settings for reference resolution and fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
	/// Root of the public package CDN, always ending in `/`.
	pub cdn_root: String,
	/// Root of the community type-declaration repository, always ending in `/`.
	pub definitely_typed_root: String,
	/// Host-object package names suppressed on the restricted surface.
	pub host_packages: Vec<String>,
	/// Network fetch timeout.
	pub fetch_timeout: Duration,
	/// Implicit references, in declaration order.
	pub implicit: Vec<ImplicitReference>,
}

impl Default for SyncConfig {
	fn default() -> Self {
		let implicit = |surface, variant, reference: &str| ImplicitReference {
			surface,
			variant,
			reference: reference.to_string(),
		};
		Self {
			cdn_root: DEFAULT_CDN_ROOT.to_string(),
			definitely_typed_root: DEFAULT_DEFINITELY_TYPED_ROOT.to_string(),
			host_packages: vec!["office-js".to_string(), "office-js-preview".to_string()],
			fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
			implicit: vec![
				implicit(
					SurfaceKind::General,
					None,
					"https://unpkg.com/@microsoft/office-js-helpers@0.7.4/dist/office.helpers.d.ts",
				),
				implicit(SurfaceKind::Restricted, None, "https://unpkg.com/@types/custom-functions-runtime/index.d.ts"),
				implicit(
					SurfaceKind::Restricted,
					Some(LanguageVariant::JavaScript),
					"https://appsforoffice.microsoft.com/lib/1/hosted/office.d.ts",
				),
				implicit(
					SurfaceKind::Restricted,
					Some(LanguageVariant::TypeScript),
					"https://appsforoffice.microsoft.com/lib/beta/hosted/office.d.ts",
				),
			],
		}
	}
}

impl SyncConfig {
	/// Parses a KDL string, starting from [`SyncConfig::default`].
	///
	/// Any `implicit` node replaces the default implicit references wholesale.
	pub fn parse(input: &str) -> Result<Self> {
		let mut config = Self::default();
		config.merge(ConfigOverrides::parse(input)?);
		Ok(config)
	}

	/// Loads configuration from a file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let mut config = Self::default();
		config.merge(ConfigOverrides::load(path)?);
		Ok(config)
	}

	/// Applies every value `overrides` sets explicitly.
	///
	/// Later layers win, including when they restate a default.
	pub fn merge(&mut self, overrides: ConfigOverrides) {
		if let Some(root) = overrides.cdn_root {
			self.cdn_root = root;
		}
		if let Some(root) = overrides.definitely_typed_root {
			self.definitely_typed_root = root;
		}
		if let Some(packages) = overrides.host_packages {
			self.host_packages = packages;
		}
		if let Some(timeout) = overrides.fetch_timeout {
			self.fetch_timeout = timeout;
		}
		if let Some(implicit) = overrides.implicit {
			self.implicit = implicit;
		}
	}

	/// Implicit references for a surface and variant, in declaration order.
	pub fn implicit_references(&self, surface: SurfaceKind, variant: LanguageVariant) -> impl Iterator<Item = &str> {
		self.implicit
			.iter()
			.filter(move |i| i.applies_to(surface, variant))
			.map(|i| i.reference.as_str())
	}

	/// Returns true if `package` names a host-object package, ignoring any
	/// `@version` suffix.
	pub fn is_host_package(&self, package: &str) -> bool {
		let name = package.split_once('@').map_or(package, |(name, _)| name);
		self.host_packages.iter().any(|p| p.eq_ignore_ascii_case(name))
	}
}

/// Values a single configuration layer sets explicitly.
///
/// Unset fields leave the layer below untouched when merged into a
/// [`SyncConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
	/// Explicit `cdn-root`, normalized to end in `/`.
	pub cdn_root: Option<String>,
	/// Explicit `definitely-typed-root`, normalized to end in `/`.
	pub definitely_typed_root: Option<String>,
	/// Explicit `host-packages`.
	pub host_packages: Option<Vec<String>>,
	/// Explicit `fetch-timeout-secs`.
	pub fetch_timeout: Option<Duration>,
	/// All `implicit` nodes, if the layer has any.
	pub implicit: Option<Vec<ImplicitReference>>,
}

impl ConfigOverrides {
	/// Parses the nodes present in a KDL string.
	pub fn parse(input: &str) -> Result<Self> {
		let doc: KdlDocument = input.parse()?;
		let mut overrides = Self {
			cdn_root: string_arg(&doc, "cdn-root")?.map(with_trailing_slash),
			definitely_typed_root: string_arg(&doc, "definitely-typed-root")?.map(with_trailing_slash),
			..Self::default()
		};

		if let Some(node) = doc.get("host-packages") {
			overrides.host_packages = Some(
				node.entries()
					.iter()
					.filter(|e| e.name().is_none())
					.filter_map(|e| e.value().as_string())
					.map(String::from)
					.collect(),
			);
		}
		if let Some(value) = doc.get_arg("fetch-timeout-secs") {
			let secs = value
				.as_integer()
				.and_then(|i| u64::try_from(i).ok())
				.filter(|&s| s > 0)
				.ok_or_else(|| invalid("fetch-timeout-secs", "expected a positive integer"))?;
			overrides.fetch_timeout = Some(Duration::from_secs(secs));
		}

		let implicit_nodes: Vec<&KdlNode> = doc.nodes().iter().filter(|n| n.name().value() == "implicit").collect();
		if !implicit_nodes.is_empty() {
			let mut implicit = Vec::new();
			for node in implicit_nodes {
				implicit.extend(parse_implicit_node(node)?);
			}
			overrides.implicit = Some(implicit);
		}

		Ok(overrides)
	}

	/// Loads a configuration layer from a file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
			path: path.to_path_buf(),
			error: e,
		})?;
		Self::parse(&content)
	}
}

/// Parses `implicit <surface> [variant=<variant>] <reference>...`.
fn parse_implicit_node(node: &KdlNode) -> Result<Vec<ImplicitReference>> {
	let mut positional = node.entries().iter().filter(|e| e.name().is_none());

	let surface = positional
		.next()
		.and_then(|e| e.value().as_string())
		.ok_or_else(|| invalid("implicit", "missing surface kind"))?
		.parse::<SurfaceKind>()
		.map_err(|e| invalid("implicit", &e.to_string()))?;

	let variant = node
		.get("variant")
		.map(|v| {
			v.as_string()
				.ok_or_else(|| invalid("implicit", "variant must be a string"))?
				.parse::<LanguageVariant>()
				.map_err(|e| invalid("implicit", &e.to_string()))
		})
		.transpose()?;

	Ok(positional
		.filter_map(|e| e.value().as_string())
		.map(|reference| ImplicitReference {
			surface,
			variant,
			reference: reference.to_string(),
		})
		.collect())
}

fn string_arg<'a>(doc: &'a KdlDocument, node: &str) -> Result<Option<&'a str>> {
	match doc.get_arg(node) {
		None => Ok(None),
		Some(value) => value.as_string().map(Some).ok_or_else(|| invalid(node, "expected a string")),
	}
}

fn with_trailing_slash(root: &str) -> String {
	let root = root.trim();
	if root.ends_with('/') {
		root.to_string()
	} else {
		format!("{root}/")
	}
}

fn invalid(node: &str, reason: &str) -> ConfigError {
	ConfigError::InvalidValue {
		node: node.to_string(),
		reason: reason.to_string(),
	}
}
