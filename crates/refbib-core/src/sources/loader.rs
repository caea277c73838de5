//! Local bibliography source loading
//!
//! Loads a bibliography file into canonical records, going through an
//! external converter for non-JSON formats. Converter output is cached
//! on disk keyed by a content hash of path, mtime, and size, so an
//! unchanged file never reruns the converter.

use crate::error::{RefbibError, Result};
use crate::sources::convert::records_from_json;
use refbib_domain::{parse_file_field, Record};
use refbib_bibtex::scan_extras;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tokio::process::Command;
use tracing::{debug, warn};

const CONVERTER_TIMEOUT: Duration = Duration::from_secs(120);
const CONVERTER_ATTEMPTS: u32 = 3;
const CONVERTER_RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct SourceLoader {
    converter_path: Option<PathBuf>,
    project_root: Option<PathBuf>,
    cache_dir: PathBuf,
}

impl SourceLoader {
    pub fn new(
        converter_path: Option<PathBuf>,
        project_root: Option<PathBuf>,
        cache_dir: PathBuf,
    ) -> Self {
        Self {
            converter_path,
            project_root,
            cache_dir,
        }
    }

    /// Locate a bibliography file, retrying relative paths against the
    /// project root.
    pub fn resolve_path(&self, path: &Path) -> Result<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if path.is_relative() {
            if let Some(root) = &self.project_root {
                let anchored = root.join(path);
                if anchored.exists() {
                    return Ok(anchored);
                }
            }
        }
        Err(RefbibError::NotFound(path.to_path_buf()))
    }

    /// Load one bibliography file into canonical records.
    pub async fn load_file(&self, path: &Path) -> Result<Vec<Record>> {
        let path = self.resolve_path(path)?;
        let meta = tokio::fs::metadata(&path).await?;
        let mtime_ms = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let artifact = self.artifact_path(&path, mtime_ms, meta.len());

        if let Ok(cached) = tokio::fs::read_to_string(&artifact).await {
            match serde_json::from_str::<Vec<Record>>(&cached) {
                Ok(records) => {
                    debug!(path = %path.display(), "record cache hit");
                    return Ok(records);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "discarding bad cache artifact"),
            }
        }

        let is_json = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut records = if is_json {
            let data = tokio::fs::read_to_string(&path).await?;
            records_from_json(&data).map_err(|e| RefbibError::Parse(e.to_string()))?
        } else {
            let output = self.run_converter(&path).await?;
            records_from_json(&output).map_err(|e| RefbibError::Parse(e.to_string()))?
        };

        let is_bibtex = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("bib"))
            .unwrap_or(false);
        if is_bibtex {
            self.attach_extras(&path, &mut records).await;
        }
        for record in &mut records {
            record.source_file = Some(path.clone());
        }

        if let Err(e) = self.write_artifact(&artifact, &records).await {
            warn!(path = %path.display(), error = %e, "failed to write record cache");
        }
        Ok(records)
    }

    /// BibTeX carries fields the converter drops: entry line numbers,
    /// `file` attachments, and `add_date`. Re-scan the raw text for them.
    async fn attach_extras(&self, path: &Path, records: &mut [Record]) {
        let Ok(text) = tokio::fs::read_to_string(path).await else {
            return;
        };
        let extras = scan_extras(&text);
        let root = path.parent();
        for record in records {
            if let Some(extra) = extras.get(&record.id) {
                record.source_line = Some(extra.line);
                record.added = extra.added.clone();
                if let Some(file_field) = &extra.file {
                    record.attachments = parse_file_field(file_field, root);
                }
            }
        }
    }

    async fn run_converter(&self, path: &Path) -> Result<String> {
        let converter = self.converter_path.as_ref().ok_or_else(|| {
            RefbibError::ExternalTool(format!(
                "no converter configured for '{}'",
                path.display()
            ))
        })?;
        if !converter.exists() {
            return Err(RefbibError::ExternalTool(format!(
                "converter '{}' does not exist",
                converter.display()
            )));
        }

        let mut last_error = String::new();
        for attempt in 1..=CONVERTER_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(CONVERTER_RETRY_DELAY).await;
            }
            let run = Command::new(converter)
                .arg(path)
                .arg("-t")
                .arg("csljson")
                .arg("--quiet")
                .output();
            match tokio::time::timeout(CONVERTER_TIMEOUT, run).await {
                Ok(Ok(output)) if output.status.success() => {
                    return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
                }
                Ok(Ok(output)) => {
                    last_error = String::from_utf8_lossy(&output.stderr).into_owned();
                    warn!(path = %path.display(), attempt, "converter exited nonzero");
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    warn!(path = %path.display(), attempt, error = %e, "converter failed to run");
                }
                Err(_) => {
                    last_error = "timed out".to_string();
                    warn!(path = %path.display(), attempt, "converter timed out");
                }
            }
        }
        Err(RefbibError::ExternalTool(format!(
            "converter failed for '{}': {last_error}",
            path.display()
        )))
    }

    fn artifact_path(&self, path: &Path, mtime_ms: u128, size: u64) -> PathBuf {
        let fingerprint = format!("{}_{}_{}", path.display(), mtime_ms, size);
        let digest = Sha256::digest(fingerprint.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        self.cache_dir.join(format!("record-cache-{hex}.json"))
    }

    async fn write_artifact(&self, artifact: &Path, records: &[Record]) -> Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let data = serde_json::to_string(records)?;
        tokio::fs::write(artifact, data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(dir: &Path) -> SourceLoader {
        SourceLoader::new(None, None, dir.join("cache"))
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = loader(dir.path())
            .load_file(Path::new("/no/such.bib"))
            .await
            .unwrap_err();
        assert!(matches!(err, RefbibError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_project_root_retry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("refs.json"), "[]").unwrap();
        let loader = SourceLoader::new(
            None,
            Some(dir.path().to_path_buf()),
            dir.path().join("cache"),
        );
        let records = loader.load_file(Path::new("refs.json")).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_json_file_loads_without_converter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.json");
        std::fs::write(
            &path,
            r#"[{"id":"doe2020","type":"article","title":"Things"}]"#,
        )
        .unwrap();
        let records = loader(dir.path()).load_file(&path).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "doe2020");
        assert_eq!(records[0].source_file.as_deref(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_bib_without_converter_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.bib");
        std::fs::write(&path, "@article{x2020, title={X}}").unwrap();
        let err = loader(dir.path()).load_file(&path).await.unwrap_err();
        assert!(matches!(err, RefbibError::ExternalTool(_)));
    }

    #[tokio::test]
    async fn test_missing_converter_binary_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("refs.bib");
        std::fs::write(&path, "@article{x2020, title={X}}").unwrap();
        let loader = SourceLoader::new(
            Some(PathBuf::from("/no/such/converter")),
            None,
            dir.path().join("cache"),
        );
        let err = loader.load_file(&path).await.unwrap_err();
        assert!(matches!(err, RefbibError::ExternalTool(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_converter_output_cached_by_content_hash() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let converter = dir.path().join("fake-converter.sh");
        std::fs::write(
            &converter,
            "#!/bin/sh\necho '[{\"id\":\"doe2020\",\"type\":\"article\"}]'\n",
        )
        .unwrap();
        std::fs::set_permissions(&converter, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = dir.path().join("refs.bib");
        std::fs::write(&path, "@article{doe2020, title={X}}").unwrap();

        let loader = SourceLoader::new(
            Some(converter.clone()),
            None,
            dir.path().join("cache"),
        );
        let first = loader.load_file(&path).await.unwrap();
        assert_eq!(first[0].id, "doe2020");

        // Break the converter; the cache must satisfy the second load.
        std::fs::write(&converter, "#!/bin/sh\nexit 1\n").unwrap();
        let second = loader.load_file(&path).await.unwrap();
        assert_eq!(second[0].id, "doe2020");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_bibtex_extras_attached() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let converter = dir.path().join("fake-converter.sh");
        std::fs::write(
            &converter,
            "#!/bin/sh\necho '[{\"id\":\"doe2020\",\"type\":\"article\"}]'\n",
        )
        .unwrap();
        std::fs::set_permissions(&converter, std::fs::Permissions::from_mode(0o755)).unwrap();

        std::fs::write(dir.path().join("paper.pdf"), "x").unwrap();
        let path = dir.path().join("refs.bib");
        std::fs::write(
            &path,
            "@article{doe2020,\n  title = {X},\n  file = {:paper.pdf:PDF},\n  add_date = {2024-01-01}\n}\n",
        )
        .unwrap();

        let loader = SourceLoader::new(Some(converter), None, dir.path().join("cache"));
        let records = loader.load_file(&path).await.unwrap();
        assert_eq!(records[0].source_line, Some(1));
        assert_eq!(records[0].added.as_deref(), Some("2024-01-01"));
        assert_eq!(records[0].attachments.len(), 1);
        assert!(records[0].attachments[0].ends_with("paper.pdf"));
    }
}
