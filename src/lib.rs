//! Format-preserving OOXML document translation core.
//!
//! This crate ingests an Office Open XML word-processing package (`.docx`),
//! extracts translatable text while tracking its formatting provenance,
//! coordinates translation through a sentinel-protected placeholder
//! protocol, repairs and validates candidate translations deterministically,
//! and projects the results back into the original XML runs such that every
//! non-text byte of document structure is preserved.
//!
//! # Pipeline
//!
//! ```text
//! Package I/O -> (Extractor + Freezer + Hierarchy) -> TU list
//!             -> Translation driver -> Normalizer/Validator -> Review/Repair
//!             -> Projector -> Package I/O
//! ```
//!
//! The entry point is [`pipeline::translate_file`].

pub mod checkpoint;
pub mod chunking;
pub mod config;
pub mod driver;
pub mod error;
pub mod extract;
pub mod freezer;
pub mod hierarchy;
pub mod ir;
pub mod legal_refs;
pub mod models;
pub mod package;
pub mod pipeline;
pub mod progress;
pub mod project;
pub mod protocol;
pub mod quality;
pub mod review;
pub mod sentinels;
pub mod textutil;

pub use error::DocError;
pub use pipeline::translate_file;
