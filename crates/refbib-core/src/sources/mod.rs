//! Bibliography sources
//!
//! Local files go through [`loader::SourceLoader`]; a running reference
//! manager goes through [`remote::RemoteClient`]. Both normalize into
//! canonical records via [`convert`].

pub mod convert;
pub mod loader;
pub mod remote;

pub use convert::{records_from_json, RawConverterRecord};
pub use loader::SourceLoader;
pub use remote::{merge_by_id, RefreshOutcome, RemoteClient};
