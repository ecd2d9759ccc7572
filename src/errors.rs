//! Error types for the term-internal crate.
//!
//! This module defines a unified error enumeration used across RF2 release
//! ingestion, branch/commit handling, store access, integrity analysis, and
//! MRCM maintenance. It integrates with `thiserror` to provide rich
//! `Display` implementations and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - Validation errors come from user input and are never retried.
//! - Store errors are transient and propagate so the caller can roll back.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the term-internal library.
///
/// - Used across ingestion, branching, integrity checks and MRCM updates.
/// - Implements `std::error::Error` via `thiserror`.
pub enum TermError {
    /// Invalid user input: unknown branch, bad path relationship, bad job
    /// parameters. Surfaced synchronously, never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Operation requested in a state it cannot run in, for example an
    /// incremental integrity check on the root branch or a fix branch that
    /// has not been rebased.
    #[error("Illegal runtime state: {0}")]
    RuntimeState(String),

    /// A stored value could not be deserialised, most commonly an OWL axiom
    /// expression that does not parse.
    #[error("Failed to deserialise axiom: {0}")]
    Conversion(String),

    /// Failure in the backing index store. Propagated upward; ingestion
    /// rolls back the open commit.
    #[error("Store error: {0}")]
    Store(String),

    /// The branch commit lock is already taken. No automatic retry.
    #[error("Branch `{0}` is locked by another commit")]
    LockContention(String),

    /// Unknown branch path.
    #[error("Branch `{0}` does not exist")]
    BranchNotFound(String),

    /// Unknown import job id.
    #[error("Import job `{0}` does not exist")]
    ImportJobNotFound(String),

    /// Malformed RF2 content: unexpected header or wrong column count.
    #[error("Invalid RF2 content in `{file}`: {detail}")]
    InvalidRf2Content { file: String, detail: String },

    /// I/O error from an RF2 source reader.
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation error while mapping store documents.
    #[error("Document mapping error: {0}")]
    Mapping(#[from] serde_json::Error),
}
