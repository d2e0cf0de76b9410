//! Error types shared by the buffer, resolvers, and codecs in this crate.

use thiserror::Error;

/// Errors raised while encoding or decoding the wire formats in this crate.
///
/// An alphabet violation is not represented here: it signals a bug in
/// [`crate::metastring`]'s encoding selection, not a recoverable failure,
/// and is raised as a panic at the point of violation instead.
#[derive(Debug, Error)]
pub enum FuryError {
    /// A chunk size byte was negative, a reference flag byte was
    /// unrecognized, or some other wire-level invariant was violated.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// The buffer ran out of bytes before a read completed.
    #[error("truncated: expected {expected} more byte(s), found {found}")]
    Truncation {
        /// Number of bytes the read required.
        expected: usize,
        /// Number of bytes actually available.
        found: usize,
    },

    /// A [`crate::metastring::MetaString`] was encoded from a string longer
    /// than 32767 characters.
    #[error("string of {0} characters exceeds the 32767 character limit for MetaString")]
    OversizedString(usize),

    /// A map was read into a target type with no accessible no-argument
    /// constructor (no [`crate::map_codec::MapFactory`] produced a
    /// container for the requested type).
    #[error("no accessible no-argument constructor for the requested map type")]
    MissingConstructor,
}

/// Convenience alias used throughout this crate.
pub type FuryResult<T> = Result<T, FuryError>;
