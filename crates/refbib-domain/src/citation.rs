//! Citation cluster shapes
//!
//! A cluster is one citation occurrence in a document: an ordered list of
//! cited keys plus optional locator text, with the byte span it occupies.

use serde::{Deserialize, Serialize};

/// A single cited item within a cluster.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterItem {
    /// Citation key, without the leading `@`.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    /// Whether the author name is suppressed (`[-@key]`).
    #[serde(default)]
    pub suppress_author: bool,
}

impl ClusterItem {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }
}

/// One citation occurrence: all keys cited together at one location.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationCluster {
    pub items: Vec<ClusterItem>,
    /// Byte offset of the cluster start in the document content.
    pub from: usize,
    /// Byte offset one past the cluster end.
    pub to: usize,
}

impl CitationCluster {
    pub fn new(items: Vec<ClusterItem>, from: usize, to: usize) -> Self {
        Self { items, from, to }
    }

    /// Keys cited by this cluster, in order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.id.as_str())
    }
}

/// A rendered citation: the cluster it came from plus formatted markup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedCitation {
    pub cluster: CitationCluster,
    /// Formatted inline markup for the whole cluster. `None` when any key
    /// in the cluster failed to resolve.
    pub markup: Option<String>,
    /// Footnote position, for note styles only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_index: Option<usize>,
}
