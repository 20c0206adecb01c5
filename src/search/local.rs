use crate::error::NexusError;
use crate::search::SearchProvider;
use crate::search::filter::{classify_dir, classify_file, is_excluded_path};
use crate::search::scoring::{Candidate, FileCategory, Scorer};
use crate::types::search::{EntryKind, ResultMetadata, SearchResult, Source};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

const STAT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub modified: Option<DateTime<Utc>>,
}

/// The operating system's file-name search facility.
#[async_trait]
pub trait FileSearchBackend: Send + Sync {
    /// Up to `max_results` paths under `root` whose names match `query`.
    async fn find(
        &self,
        query: &str,
        root: &Path,
        max_results: usize,
    ) -> Result<Vec<PathBuf>, NexusError>;

    /// `None` when the path no longer exists.
    async fn stat(&self, path: &Path) -> Result<Option<FileStat>, NexusError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(FileStat {
                is_dir: meta.is_dir(),
                modified: meta.modified().ok().map(DateTime::<Utc>::from),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn search_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.chars().filter(|c| !matches!(c, '"' | '\\' | '*')).collect::<String>())
        .filter(|t| !t.is_empty())
        .collect()
}

async fn run_command(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<String, NexusError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(timeout, child)
        .await
        .map_err(|_| NexusError::Timeout(format!("{program} did not finish in {timeout:?}")))?
        .map_err(|e| NexusError::Subprocess(format!("failed to run {program}: {e}")))?;

    if !output.status.success() {
        // Exit status 1 with no output is how `locate` reports "nothing found".
        if output.status.code() == Some(1) && output.stdout.is_empty() {
            return Ok(String::new());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(NexusError::Subprocess(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// macOS Spotlight via `mdfind`.
pub struct SpotlightBackend {
    timeout: Duration,
}

impl SpotlightBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn build_query(terms: &[String]) -> String {
        terms
            .iter()
            .map(|t| format!("kMDItemDisplayName == \"*{t}*\"cdw"))
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

#[async_trait]
impl FileSearchBackend for SpotlightBackend {
    async fn find(
        &self,
        query: &str,
        root: &Path,
        max_results: usize,
    ) -> Result<Vec<PathBuf>, NexusError> {
        let terms = search_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let args = vec![
            "-onlyin".to_string(),
            root.to_string_lossy().into_owned(),
            Self::build_query(&terms),
        ];
        let stdout = run_command("mdfind", &args, self.timeout).await?;
        Ok(stdout
            .lines()
            .filter(|l| !l.is_empty())
            .take(max_results)
            .map(PathBuf::from)
            .collect())
    }
}

/// `locate` database lookup, for platforms without Spotlight.
pub struct LocateBackend {
    timeout: Duration,
}

impl LocateBackend {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl FileSearchBackend for LocateBackend {
    async fn find(
        &self,
        query: &str,
        root: &Path,
        max_results: usize,
    ) -> Result<Vec<PathBuf>, NexusError> {
        let terms = search_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        // The limit applies before the root filter, so over-ask.
        let mut args = vec![
            "-i".to_string(),
            "-b".to_string(),
            "-A".to_string(),
            "-l".to_string(),
            max_results.saturating_mul(4).to_string(),
        ];
        args.extend(terms);
        let stdout = run_command("locate", &args, self.timeout).await?;
        Ok(stdout
            .lines()
            .map(PathBuf::from)
            .filter(|p| p.starts_with(root))
            .take(max_results)
            .collect())
    }
}

/// The native backend for the current platform.
pub fn platform_backend(timeout: Duration) -> Arc<dyn FileSearchBackend> {
    if cfg!(target_os = "macos") {
        Arc::new(SpotlightBackend::new(timeout))
    } else {
        Arc::new(LocateBackend::new(timeout))
    }
}

/// Local files and folders under one root directory.
pub struct LocalSearchProvider {
    backend: Arc<dyn FileSearchBackend>,
    root: PathBuf,
    scorer: Arc<dyn Scorer>,
}

impl LocalSearchProvider {
    pub fn new(backend: Arc<dyn FileSearchBackend>, root: PathBuf, scorer: Arc<dyn Scorer>) -> Self {
        Self {
            backend,
            root,
            scorer,
        }
    }

    fn to_result(
        &self,
        query: &str,
        path: PathBuf,
        stat: FileStat,
        now: DateTime<Utc>,
    ) -> Option<SearchResult> {
        let name = path.file_name()?.to_string_lossy().into_owned();
        let category = if stat.is_dir {
            classify_dir(&name)?
        } else {
            classify_file(&name)?
        };
        let score = self.scorer.score(
            query,
            &Candidate {
                name: &name,
                category,
                modified: stat.modified,
            },
            now,
        );
        let kind = if stat.is_dir && category != FileCategory::Application {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        let path = path.to_string_lossy().into_owned();
        Some(SearchResult {
            id: path.clone(),
            name,
            path: Some(path),
            kind,
            source: Source::Local,
            score,
            metadata: ResultMetadata {
                modified_time: stat.modified.map(|m| m.to_rfc3339()),
                ..ResultMetadata::default()
            },
        })
    }
}

#[async_trait]
impl SearchProvider for LocalSearchProvider {
    fn source(&self) -> Source {
        Source::Local
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, NexusError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let wanted = limit.saturating_mul(3).max(20);
        let paths = self.backend.find(query, &self.root, wanted).await?;
        let found = paths.len();
        let candidates: Vec<PathBuf> = paths
            .into_iter()
            .filter(|p| !is_excluded_path(p, &self.root))
            .collect();

        let backend = &self.backend;
        let stats: Vec<(PathBuf, Result<Option<FileStat>, NexusError>)> = stream::iter(candidates)
            .map(|path| async move {
                let stat = backend.stat(&path).await;
                (path, stat)
            })
            .buffer_unordered(STAT_CONCURRENCY)
            .collect()
            .await;

        let now = Utc::now();
        let mut results: Vec<SearchResult> = stats
            .into_iter()
            .filter_map(|(path, stat)| match stat {
                Ok(Some(stat)) => self.to_result(query, path, stat, now),
                Ok(None) => None,
                Err(e) => {
                    warn!(path = %path.display(), "stat failed: {}", e);
                    None
                }
            })
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(limit);
        debug!(found, returned = results.len(), "Local search done");
        Ok(results)
    }
}
