//! Input and output events of the synchronization engine.

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::locator::ResourceLocator;
use crate::surface::{LanguageVariant, SurfaceKind};
use crate::{Error, Result};

/// A "desired state changed" event from the editing surface.
///
/// The variant and surface arrive as raw strings and are validated by
/// [`DesiredState::validate`] before any reconciliation work starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DesiredState {
	/// Library references as authored.
	#[serde(default)]
	pub references: Vec<String>,
	/// Language variant identifier (`javascript` or `typescript`).
	pub language_variant: String,
	/// Surface kind identifier (`general` or `restricted`).
	pub surface_kind: String,
}

impl DesiredState {
	/// Creates an event from already-typed parts.
	pub fn new<I, S>(references: I, variant: LanguageVariant, surface: SurfaceKind) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			references: references.into_iter().map(Into::into).collect(),
			language_variant: variant.as_str().to_string(),
			surface_kind: surface.as_str().to_string(),
		}
	}

	/// Parses the variant and surface identifiers.
	///
	/// # Errors
	///
	/// Returns [`Error::InvalidSurface`] or [`Error::InvalidVariant`] for
	/// unrecognized identifiers.
	pub fn validate(&self) -> Result<(LanguageVariant, SurfaceKind)> {
		let surface = self.surface_kind.parse()?;
		let variant = self.language_variant.parse()?;
		Ok((variant, surface))
	}
}

/// Per-locator outcome of a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryEvent {
	/// The locator's declarations are now live in the analysis engine.
	Registered {
		/// The registered locator.
		locator: ResourceLocator,
	},
	/// Fetching or registering the locator failed. Non-fatal.
	RegistrationFailed {
		/// The failing locator.
		locator: ResourceLocator,
		/// What went wrong.
		error: Error,
	},
	/// The addition settled after the locator stopped being desired and its
	/// registration was released immediately.
	Discarded {
		/// The discarded locator.
		locator: ResourceLocator,
	},
}

impl LibraryEvent {
	/// Locator the event concerns.
	pub fn locator(&self) -> &ResourceLocator {
		match self {
			Self::Registered { locator } | Self::RegistrationFailed { locator, .. } | Self::Discarded { locator } => locator,
		}
	}

	/// Returns true for events the surrounding UI should display.
	pub fn is_user_visible(&self) -> bool {
		!matches!(self, Self::Discarded { .. })
	}
}

/// Sender for library events.
pub type LibraryEventSender = mpsc::UnboundedSender<LibraryEvent>;

/// Receiver for library events.
pub type LibraryEventReceiver = mpsc::UnboundedReceiver<LibraryEvent>;
