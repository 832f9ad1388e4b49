//! Crate error types (spec.md §7 "Error handling design").
//!
//! The parser never raises errors itself — every syntactic problem is a
//! recorded diagnostic (crate::diagnostics) and parsing continues. What
//! *can* fail outright are the lowering build step and the render sinks,
//! matching spec.md's split between "non-fatal warnings" and "build
//! errors"/"render errors". Following the teacher's own error shape
//! (`Result<T, String>`-style compiler errors, hand-written `Display`
//! rather than `thiserror`), these stay plain enums with manual `Display`.

use std::fmt;

/// Lowering/build failure (spec.md §7 "Build errors"): allocation failure
/// or an internal invariant violation. The parser itself never produces
/// one of these; only `ScriptLowering` can fail a build.
#[derive(Debug, Clone)]
pub enum BuildError {
    /// An internal invariant the lowering passes depend on didn't hold
    /// (spec.md's "converted node missing at some level").
    InvariantViolation(String),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::InvariantViolation(msg) => write!(f, "build failed: {msg}"),
        }
    }
}

impl std::error::Error for BuildError {}

/// Render-time failure from an audio sink (spec.md §7 "Render errors").
#[derive(Debug, Clone)]
pub enum SinkError {
    Device(String),
    Wav(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Device(msg) => write!(f, "audio device error: {msg}"),
            SinkError::Wav(msg) => write!(f, "WAV output error: {msg}"),
        }
    }
}

impl std::error::Error for SinkError {}
