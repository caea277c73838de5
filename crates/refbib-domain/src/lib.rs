//! Domain types shared across the refbib crates
//!
//! This crate provides the canonical data shapes produced by every
//! bibliography source and consumed by the resolution pipeline:
//! - Record: a normalized bibliographic entry with a stable citation key
//! - RecordAuthor: family/given name pair
//! - CitationCluster: one citation occurrence in a document
//! - Attachment field parsing for BibTeX/BibDesk `file` fields

pub mod attachment;
pub mod citation;
pub mod record;

pub use attachment::*;
pub use citation::*;
pub use record::*;
