//! Citation scanning
//!
//! Extracts citation clusters from document text. The resolution
//! pipeline only needs the [`CitationScanner`] trait; the built-in
//! [`PandocScanner`] understands pandoc-style citations: bracketed
//! clusters like `[see @doe2020, p. 3; also @smith2019]` and bare
//! `@doe2020` mentions.

use lazy_static::lazy_static;
use refbib_domain::{CitationCluster, ClusterItem};
use regex::Regex;

/// Turns document text into citation clusters, in document order.
pub trait CitationScanner: Send + Sync {
    fn clusters(&self, content: &str) -> Vec<CitationCluster>;
}

lazy_static! {
    static ref BRACKETED: Regex = Regex::new(r"\[([^\[\]]*@[^\[\]]+)\]").unwrap();
    static ref CITE_KEY: Regex =
        Regex::new(r"(-?)@([a-zA-Z0-9_](?:[a-zA-Z0-9_:.#$&+?/-]*[a-zA-Z0-9])?)").unwrap();
    static ref BARE_KEY: Regex =
        Regex::new(r"(^|[\s(])(-?)@([a-zA-Z0-9_](?:[a-zA-Z0-9_:.#$&+?/-]*[a-zA-Z0-9])?)").unwrap();
}

pub struct PandocScanner;

impl CitationScanner for PandocScanner {
    fn clusters(&self, content: &str) -> Vec<CitationCluster> {
        let mut clusters: Vec<CitationCluster> = Vec::new();
        let mut bracket_spans: Vec<(usize, usize)> = Vec::new();

        for m in BRACKETED.find_iter(content) {
            bracket_spans.push((m.start(), m.end()));
            let inner = &content[m.start() + 1..m.end() - 1];
            let items = parse_cluster_body(inner);
            if !items.is_empty() {
                clusters.push(CitationCluster::new(items, m.start(), m.end()));
            }
        }

        for caps in BARE_KEY.captures_iter(content) {
            let key = caps.get(3).expect("key group");
            let at = caps.get(2).expect("sign group").start();
            if bracket_spans.iter().any(|(s, e)| at >= *s && at < *e) {
                continue;
            }
            let mut item = ClusterItem::new(key.as_str());
            item.suppress_author = !caps[2].is_empty();
            clusters.push(CitationCluster::new(vec![item], at, key.end()));
        }

        clusters.sort_by_key(|c| c.from);
        clusters
    }
}

/// Parse the inside of a bracketed cluster: items separated by `;`,
/// each with optional prefix before `@` and locator/suffix after the key.
fn parse_cluster_body(inner: &str) -> Vec<ClusterItem> {
    let mut items = Vec::new();
    for part in inner.split(';') {
        let Some(caps) = CITE_KEY.captures(part) else {
            continue;
        };
        let whole = caps.get(0).expect("match");
        let mut item = ClusterItem::new(&caps[2]);
        item.suppress_author = !caps[1].is_empty();

        let prefix = part[..whole.start()].trim();
        if !prefix.is_empty() {
            item.prefix = Some(prefix.to_string());
        }

        let rest = part[whole.end()..].trim();
        if let Some(after_comma) = rest.strip_prefix(',') {
            let locator = after_comma.trim();
            if !locator.is_empty() {
                item.locator = Some(locator.to_string());
            }
        } else if !rest.is_empty() {
            item.suffix = Some(rest.to_string());
        }

        items.push(item);
    }
    items
}
