//! Global behavior switches for one serialization session.
//!
//! A small set of boolean features threaded into the resolvers that
//! consult them, rather than a constellation of loose bool params.

use enumset::{EnumSet, EnumSetType};

/// Toggleable behaviors a [`FuryConfig`] may enable.
///
/// More may be added in future releases.
#[derive(EnumSetType, Debug)]
pub enum FuryFeature {
    /// Track reference identity for eligible types by default. Individual
    /// types can still opt out via
    /// [`crate::class_resolver::ClassResolver::opt_out_of_ref_tracking`].
    TrackReferences,
}

/// Per-session configuration consulted by [`crate::class_resolver::ClassResolver`]
/// and threaded into [`crate::map_codec`] calls.
#[derive(Debug, Clone, Default)]
pub struct FuryConfig {
    features: EnumSet<FuryFeature>,
}

impl FuryConfig {
    /// A config with no features enabled: no reference tracking.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables reference tracking by default.
    pub fn with_track_references(mut self, enabled: bool) -> Self {
        if enabled {
            self.features.insert(FuryFeature::TrackReferences);
        } else {
            self.features.remove(FuryFeature::TrackReferences);
        }
        self
    }

    /// Whether reference tracking is on by default under this config.
    pub fn tracks_references(&self) -> bool {
        self.features.contains(FuryFeature::TrackReferences)
    }
}
