//! Crate-wide error taxonomy.
//!
//! Mirrors the error *kinds* of the translation pipeline rather than a
//! one-variant-per-failure-site design: `DocxParse` and `Structure` are
//! always fatal, `ModelLoad` is fatal only for the role it affects,
//! `Protocol` failures are attached to a translation unit and drive repair
//! rather than aborting the document.

use std::fmt;

/// Errors surfaced by the translation pipeline.
#[derive(Debug)]
pub enum DocError {
    /// Malformed zip or XML; fatal, aborts the document.
    DocxParse(String),
    /// Inference engine unavailable or model file missing when required.
    ModelLoad(String),
    /// Sentinel/number/NT integrity violation surviving deterministic
    /// repair. Carries the offending translation unit id.
    Protocol { tu_id: u32, detail: String },
    /// Post-projection structure-hash mismatch on an XML part. Fatal.
    Structure(String),
    /// Filesystem or zip I/O failure.
    Io(String),
}

impl fmt::Display for DocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocError::DocxParse(msg) => write!(f, "failed to parse docx package: {msg}"),
            DocError::ModelLoad(msg) => write!(f, "model load failed: {msg}"),
            DocError::Protocol { tu_id, detail } => {
                write!(f, "translation protocol error in TU#{tu_id}: {detail}")
            }
            DocError::Structure(msg) => write!(f, "structure hash mismatch: {msg}"),
            DocError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for DocError {}

impl From<std::io::Error> for DocError {
    fn from(err: std::io::Error) -> Self {
        DocError::Io(err.to_string())
    }
}

impl From<zip::result::ZipError> for DocError {
    fn from(err: zip::result::ZipError) -> Self {
        DocError::DocxParse(err.to_string())
    }
}

impl From<quick_xml::Error> for DocError {
    fn from(err: quick_xml::Error) -> Self {
        DocError::DocxParse(err.to_string())
    }
}

/// A non-fatal translation protocol violation. Unlike [`DocError::Protocol`],
/// this is constructed and discarded entirely within `protocol`/`review`
/// validation paths and never crosses a `Result` boundary that could abort
/// the document; it is turned into a `protocol_error` quality tag instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolViolation(pub String);

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ProtocolViolation {}
