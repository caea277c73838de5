//! Style and locale resolution
//!
//! Fetch-or-cache across three tiers: in-memory map, on-disk cache
//! directory, network. Each tier populates the one above it on a miss.
//! Locale codes are normalized against the supported-locale table with a
//! region-to-base-language fallback.

use crate::error::{RefbibError, Result};
use crate::http::HttpClient;
use arc_swap::ArcSwap;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const LOCALES_BASE_URL: &str =
    "https://raw.githubusercontent.com/citation-style-language/locales/master";

/// Locales with a published definition file.
const SUPPORTED_LOCALES: &[&str] = &[
    "af-ZA", "ar", "bg-BG", "ca-AD", "cs-CZ", "cy-GB", "da-DK", "de-AT", "de-CH", "de-DE",
    "el-GR", "en-GB", "en-US", "es-CL", "es-ES", "es-MX", "et-EE", "eu", "fa-IR", "fi-FI",
    "fr-CA", "fr-FR", "he-IL", "hi-IN", "hr-HR", "hu-HU", "id-ID", "is-IS", "it-IT", "ja-JP",
    "km-KH", "ko-KR", "la", "lt-LT", "lv-LV", "mn-MN", "nb-NO", "nl-NL", "nn-NO", "pl-PL",
    "pt-BR", "pt-PT", "ro-RO", "ru-RU", "sk-SK", "sl-SI", "sr-RS", "sv-SE", "th-TH", "tr-TR",
    "uk-UA", "vi-VN", "zh-CN", "zh-TW",
];

/// Bare language code to its default region variant.
const LANG_BASES: &[(&str, &str)] = &[
    ("af", "af-ZA"),
    ("ar", "ar"),
    ("bg", "bg-BG"),
    ("ca", "ca-AD"),
    ("cs", "cs-CZ"),
    ("cy", "cy-GB"),
    ("da", "da-DK"),
    ("de", "de-DE"),
    ("el", "el-GR"),
    ("en", "en-US"),
    ("es", "es-ES"),
    ("et", "et-EE"),
    ("eu", "eu"),
    ("fa", "fa-IR"),
    ("fi", "fi-FI"),
    ("fr", "fr-FR"),
    ("he", "he-IL"),
    ("hi", "hi-IN"),
    ("hr", "hr-HR"),
    ("hu", "hu-HU"),
    ("id", "id-ID"),
    ("is", "is-IS"),
    ("it", "it-IT"),
    ("ja", "ja-JP"),
    ("km", "km-KH"),
    ("ko", "ko-KR"),
    ("la", "la"),
    ("lt", "lt-LT"),
    ("lv", "lv-LV"),
    ("mn", "mn-MN"),
    ("nb", "nb-NO"),
    ("nl", "nl-NL"),
    ("nn", "nn-NO"),
    ("pl", "pl-PL"),
    ("pt", "pt-PT"),
    ("ro", "ro-RO"),
    ("ru", "ru-RU"),
    ("sk", "sk-SK"),
    ("sl", "sl-SI"),
    ("sr", "sr-RS"),
    ("sv", "sv-SE"),
    ("th", "th-TH"),
    ("tr", "tr-TR"),
    ("uk", "uk-UA"),
    ("vi", "vi-VN"),
    ("zh", "zh-CN"),
];

lazy_static! {
    static ref LOCALE_DECLARATION: Regex = Regex::new(r#"locale="([^"]+)""#).unwrap();
}

type TextCache = ArcSwap<HashMap<String, Arc<str>>>;

pub struct StyleResolver {
    cache_dir: PathBuf,
    http: HttpClient,
    styles: TextCache,
    locales: TextCache,
}

impl StyleResolver {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        Ok(Self {
            cache_dir,
            http: HttpClient::new(FETCH_TIMEOUT)?,
            styles: ArcSwap::from_pointee(HashMap::new()),
            locales: ArcSwap::from_pointee(HashMap::new()),
        })
    }

    pub fn cached_style(&self, key: &str) -> Option<Arc<str>> {
        self.styles.load().get(key).cloned()
    }

    pub fn cached_locale(&self, code: &str) -> Option<Arc<str>> {
        self.locales.load().get(code).cloned()
    }

    /// Look up style text by id. An `http(s)` id goes through the disk
    /// cache and the network; anything else is read as an explicit file
    /// path.
    pub async fn resolve_style(&self, id_or_path: &str) -> Result<Arc<str>> {
        if let Some(text) = self.cached_style(id_or_path) {
            return Ok(text);
        }

        let text: Arc<str> = if id_or_path.starts_with("http") {
            let file_name = id_or_path
                .rsplit('/')
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or("style.csl");
            self.fetch_through_disk(id_or_path, file_name).await?
        } else {
            let path = Path::new(id_or_path);
            let data = tokio::fs::read_to_string(path)
                .await
                .map_err(|_| RefbibError::NotFound(path.to_path_buf()))?;
            data.into()
        };

        insert(&self.styles, id_or_path, text.clone());
        Ok(text)
    }

    /// Look up locale XML by normalized code.
    pub async fn resolve_locale(&self, code: &str) -> Result<Arc<str>> {
        if let Some(text) = self.cached_locale(code) {
            return Ok(text);
        }

        let file_name = format!("locales-{code}.xml");
        let url = format!("{LOCALES_BASE_URL}/{file_name}");
        let text = self.fetch_through_disk(&url, &file_name).await?;
        insert(&self.locales, code, text.clone());
        Ok(text)
    }

    /// Disk tier then network tier; a network hit is written back to disk.
    async fn fetch_through_disk(&self, url: &str, file_name: &str) -> Result<Arc<str>> {
        let disk_path = self.cache_dir.join(file_name);
        if let Ok(data) = tokio::fs::read_to_string(&disk_path).await {
            debug!(file = file_name, "style cache hit on disk");
            return Ok(data.into());
        }

        let data = self.http.get_text(url).await?;
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        if let Err(e) = tokio::fs::write(&disk_path, &data).await {
            debug!(file = file_name, error = %e, "failed to write style cache");
        }
        Ok(data.into())
    }

    pub fn clear(&self) {
        self.styles.store(Arc::new(HashMap::new()));
        self.locales.store(Arc::new(HashMap::new()));
    }

    /// The full set of locales a style requires: `en-US`, the requested
    /// codes, and every `locale="..."` declaration embedded in the style
    /// text, all normalized.
    pub fn required_locales(style_text: &str, requested: &[&str]) -> Vec<String> {
        let mut raw: Vec<&str> = vec![DEFAULT_BASE_LOCALE];
        raw.extend(requested.iter().copied());
        for caps in LOCALE_DECLARATION.captures_iter(style_text) {
            if let Some(m) = caps.get(1) {
                raw.extend(m.as_str().split_whitespace());
            }
        }
        normalize_locales(&raw)
    }
}

const DEFAULT_BASE_LOCALE: &str = "en-US";

fn insert(cache: &TextCache, key: &str, text: Arc<str>) {
    cache.rcu(|map| {
        let mut next = HashMap::clone(map);
        next.insert(key.to_string(), text.clone());
        next
    });
}

/// Normalize locale codes through the fallback hierarchy: exact region
/// code, then base language code. Unknown codes are dropped; order is
/// preserved and duplicates removed.
pub fn normalize_locales(codes: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for code in codes {
        let code = code.trim();
        if code.is_empty() {
            continue;
        }
        let trimmed: String = code.split('-').take(2).collect::<Vec<_>>().join("-");
        let resolved = if SUPPORTED_LOCALES.contains(&trimmed.as_str()) {
            Some(trimmed)
        } else {
            let base = code.split('-').next().unwrap_or(code);
            LANG_BASES
                .iter()
                .find(|(b, _)| *b == base)
                .map(|(_, full)| full.to_string())
        };
        if let Some(resolved) = resolved {
            if !out.contains(&resolved) {
                out.push(resolved);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_exact_and_base() {
        assert_eq!(normalize_locales(&["en-US"]), vec!["en-US"]);
        assert_eq!(normalize_locales(&["de"]), vec!["de-DE"]);
        assert_eq!(normalize_locales(&["pt-XX"]), vec!["pt-PT"]);
    }

    #[test]
    fn test_normalize_drops_unknown_and_dedupes() {
        assert_eq!(
            normalize_locales(&["en-US", "xx-YY", "en", "fr-FR"]),
            vec!["en-US", "fr-FR"]
        );
    }

    #[test]
    fn test_required_locales_from_style_text() {
        let style = r#"<style><text locale="de-DE fr"/><term locale="ja-JP"/></style>"#;
        let locales = StyleResolver::required_locales(style, &["es-ES"]);
        assert_eq!(locales, vec!["en-US", "es-ES", "de-DE", "fr-FR", "ja-JP"]);
    }

    #[tokio::test]
    async fn test_explicit_path_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = StyleResolver::new(dir.path().to_path_buf()).unwrap();
        let err = resolver.resolve_style("/no/such/style.csl").await.unwrap_err();
        assert!(matches!(err, RefbibError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_disk_tier_backfills_memory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("locales-de-DE.xml"), "<locale/>").unwrap();
        let resolver = StyleResolver::new(dir.path().to_path_buf()).unwrap();
        let text = resolver.resolve_locale("de-DE").await.unwrap();
        assert_eq!(&*text, "<locale/>");
        assert!(resolver.cached_locale("de-DE").is_some());
    }

    #[tokio::test]
    async fn test_explicit_style_path_cached_by_key() {
        let dir = tempfile::tempdir().unwrap();
        let style_path = dir.path().join("mine.csl");
        std::fs::write(&style_path, "<style/>").unwrap();
        let resolver = StyleResolver::new(dir.path().to_path_buf()).unwrap();
        let key = style_path.to_string_lossy().into_owned();
        resolver.resolve_style(&key).await.unwrap();
        assert!(resolver.cached_style(&key).is_some());
    }
}
