//! Bibliography resolution and caching engine
//!
//! `refbib-core` loads bibliography sources (local files through an
//! external converter, or a running reference manager over HTTP/RPC)
//! into a global record cache, binds documents to per-scope record sets
//! and citation engines, and resolves document text into rendered
//! citations and a bibliography.
//!
//! The entry point is [`BibService`]:
//!
//! ```no_run
//! use refbib_core::{BibService, ResolverConfig};
//!
//! # async fn run() -> refbib_core::Result<()> {
//! let mut config = ResolverConfig::default();
//! config.sources.bibliography_paths.push("refs.bib".into());
//! let service = BibService::new(config)?;
//! service.initialize().await?;
//! let meta = serde_json::json!({});
//! let bib = service
//!     .resolve("notes/paper.md".as_ref(), &meta, "As shown by [@doe2020].")
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod http;
pub mod scan;
pub mod scope;
pub mod search;
pub mod service;
pub mod sources;
pub mod styles;

pub use config::{RemoteGroup, ResolverConfig};
pub use engine::{Bibliography, CitationEngine, EngineFactory, EngineInputs};
pub use error::{RefbibError, Result};
pub use host::{ResolutionSink, SourceWatcher};
pub use scan::CitationScanner;
pub use scope::ScopeSettings;
pub use service::{BibService, BibServiceBuilder, DocumentSnapshot};

pub use refbib_domain as domain;
