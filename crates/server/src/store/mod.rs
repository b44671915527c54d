// Versioned document store.
//
// Pure pass-through: bytes in, bytes out, no interpretation of content.
// Every version is an immutable row; the newest row per key is the latest.
// Each call is bounded by the configured storage timeout, and timeouts or
// driver failures surface as `BackendUnavailable`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use inkwell_common::path::file_name;
use inkwell_common::protocol::http::{ListDocumentsQuery, DEFAULT_LIST_EXTENSIONS};
use inkwell_common::types::{DocumentEntry, DocumentKey, VersionInfo};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};
use uuid::Uuid;

const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("document {key} not found")]
    NotFound { key: String },

    #[error("version {version_id} of {key} not found")]
    VersionNotFound { key: String, version_id: String },

    #[error("version store unavailable: {0}")]
    BackendUnavailable(String),
}

impl StoreError {
    fn not_found(key: &DocumentKey) -> Self {
        Self::NotFound { key: key.to_string() }
    }

    fn version_not_found(key: &DocumentKey, version_id: &str) -> Self {
        Self::VersionNotFound { key: key.to_string(), version_id: version_id.to_string() }
    }
}

// ── Listing filter ─────────────────────────────────────────────────

/// Which documents a bucket listing returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFilter {
    prefix: Option<String>,
    /// Lowercased; matched against the file name only.
    search: Option<String>,
    /// Lowercased, each with a leading dot.
    extensions: Vec<String>,
    recursive: bool,
}

impl Default for DocumentFilter {
    fn default() -> Self {
        Self {
            prefix: None,
            search: None,
            extensions: DEFAULT_LIST_EXTENSIONS.iter().map(|ext| ext.to_string()).collect(),
            recursive: true,
        }
    }
}

impl DocumentFilter {
    pub fn from_query(query: &ListDocumentsQuery) -> Self {
        let prefix = query
            .prefix
            .as_deref()
            .map(|prefix| prefix.trim().trim_start_matches('/'))
            .filter(|prefix| !prefix.is_empty())
            .map(ToOwned::to_owned);
        let search = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|search| !search.is_empty())
            .map(str::to_lowercase);

        let mut extensions: Vec<String> = query
            .extensions
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(|ext| {
                let ext = ext.to_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .collect();
        if extensions.is_empty() {
            extensions = Self::default().extensions;
        }

        let recursive = query.recursive.unwrap_or(true) || search.is_some();

        Self { prefix, search, extensions, recursive }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn in_prefix(&self, path: &str) -> bool {
        self.prefix.as_deref().is_none_or(|prefix| path.starts_with(prefix))
    }

    pub fn matches(&self, path: &str) -> bool {
        if !self.in_prefix(path) {
            return false;
        }

        let lowered = path.to_lowercase();
        if !self.extensions.iter().any(|ext| lowered.ends_with(ext.as_str())) {
            return false;
        }

        match &self.search {
            Some(search) => file_name(&lowered).contains(search.as_str()),
            None => true,
        }
    }

    /// Narrow the latest documents under the prefix to the listing. A
    /// non-recursive listing shows each immediate subdirectory once, dated
    /// by its newest document, whatever extensions it holds.
    pub fn select(&self, documents: Vec<DocumentEntry>) -> Vec<DocumentEntry> {
        let mut directories: BTreeMap<String, DocumentEntry> = BTreeMap::new();
        let mut selected = Vec::new();

        for document in documents {
            if !self.recursive {
                let below = self
                    .prefix
                    .as_deref()
                    .and_then(|prefix| document.name.strip_prefix(prefix))
                    .unwrap_or(&document.name);
                if let Some((child, _)) = below.split_once('/') {
                    let parent = &document.name[..document.name.len() - below.len()];
                    let name = format!("{parent}{child}/");
                    directories
                        .entry(name.clone())
                        .and_modify(|dir| {
                            dir.last_modified = dir.last_modified.max(document.last_modified);
                        })
                        .or_insert_with(|| DocumentEntry::directory(name, document.last_modified));
                    continue;
                }
            }
            if self.matches(&document.name) {
                selected.push(document);
            }
        }

        selected.extend(directories.into_values());
        selected.sort_by(|a, b| a.name.cmp(&b.name));
        selected
    }
}

// ── Store ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct VersionStore {
    backend: StoreBackend,
    timeout: Duration,
}

#[derive(Clone)]
enum StoreBackend {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryVersionTable>>),
}

#[derive(Default)]
struct MemoryVersionTable {
    /// Oldest first.
    versions: HashMap<DocumentKey, Vec<StoredVersion>>,
}

#[derive(Clone)]
struct StoredVersion {
    version_id: String,
    created_at: DateTime<Utc>,
    /// `None` marks a deletion.
    content: Option<Vec<u8>>,
}

impl StoredVersion {
    fn info(&self, is_latest: bool) -> VersionInfo {
        VersionInfo {
            version_id: self.version_id.clone(),
            created_at: self.created_at,
            size: self.content.as_ref().map_or(0, |content| content.len() as u64),
            is_latest,
            is_delete_marker: self.content.is_none(),
        }
    }
}

impl VersionStore {
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory(Arc::new(RwLock::new(MemoryVersionTable::default()))),
            timeout: DEFAULT_STORAGE_TIMEOUT,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self { backend: StoreBackend::Postgres(pool), timeout: DEFAULT_STORAGE_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Write `content` as the new latest version of `key`.
    pub async fn put_version(
        &self,
        key: &DocumentKey,
        content: Vec<u8>,
    ) -> Result<VersionInfo, StoreError> {
        let version = self
            .bounded("put_version", async {
                match &self.backend {
                    StoreBackend::Postgres(pool) => put_version_pg(pool, key, content).await,
                    StoreBackend::Memory(table) => Ok(put_version_mem(table, key, content).await),
                }
            })
            .await?;

        debug!(%key, version_id = %version.version_id, size = version.size, "version stored");
        Ok(version)
    }

    /// All versions of `key`, newest first.
    pub async fn list_versions(&self, key: &DocumentKey) -> Result<Vec<VersionInfo>, StoreError> {
        let versions = self
            .bounded("list_versions", async {
                match &self.backend {
                    StoreBackend::Postgres(pool) => list_versions_pg(pool, key).await,
                    StoreBackend::Memory(table) => Ok(list_versions_mem(table, key).await),
                }
            })
            .await?;

        if versions.is_empty() {
            return Err(StoreError::not_found(key));
        }
        Ok(versions)
    }

    pub async fn get_version(
        &self,
        key: &DocumentKey,
        version_id: &str,
    ) -> Result<Vec<u8>, StoreError> {
        self.get_version_with_info(key, version_id).await.map(|(_, content)| content)
    }

    pub async fn get_version_with_info(
        &self,
        key: &DocumentKey,
        version_id: &str,
    ) -> Result<(VersionInfo, Vec<u8>), StoreError> {
        self.bounded("get_version", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => get_version_pg(pool, key, version_id).await,
                StoreBackend::Memory(table) => get_version_mem(table, key, version_id).await,
            }
        })
        .await
    }

    pub async fn get_latest(&self, key: &DocumentKey) -> Result<Vec<u8>, StoreError> {
        self.get_latest_with_info(key).await.map(|(_, content)| content)
    }

    /// Latest version of `key`. A key whose latest version is a delete
    /// marker counts as absent.
    pub async fn get_latest_with_info(
        &self,
        key: &DocumentKey,
    ) -> Result<(VersionInfo, Vec<u8>), StoreError> {
        self.bounded("get_latest", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => get_latest_pg(pool, key).await,
                StoreBackend::Memory(table) => get_latest_mem(table, key).await,
            }
        })
        .await
    }

    /// Latest, non-deleted documents in `bucket` accepted by `filter`,
    /// sorted by path.
    pub async fn list_documents(
        &self,
        bucket: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentEntry>, StoreError> {
        let documents = self
            .bounded("list_documents", async {
                match &self.backend {
                    StoreBackend::Postgres(pool) => list_documents_pg(pool, bucket, filter).await,
                    StoreBackend::Memory(table) => {
                        Ok(list_documents_mem(table, bucket, filter).await)
                    }
                }
            })
            .await?;

        Ok(filter.select(documents))
    }

    /// Buckets holding at least one version.
    pub async fn list_buckets(&self) -> Result<Vec<String>, StoreError> {
        self.bounded("list_buckets", async {
            match &self.backend {
                StoreBackend::Postgres(pool) => list_buckets_pg(pool).await,
                StoreBackend::Memory(table) => Ok(list_buckets_mem(table).await),
            }
        })
        .await
    }

    async fn bounded<T, F>(&self, operation: &'static str, future: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                warn!(operation, timeout_ms, "version store call timed out");
                Err(StoreError::BackendUnavailable(format!(
                    "{operation} timed out after {timeout_ms}ms"
                )))
            }
        }
    }

    #[cfg(test)]
    pub(crate) async fn put_delete_marker(&self, key: &DocumentKey) {
        if let StoreBackend::Memory(table) = &self.backend {
            table.write().await.versions.entry(key.clone()).or_default().push(StoredVersion {
                version_id: Uuid::now_v7().to_string(),
                created_at: Utc::now(),
                content: None,
            });
        }
    }
}

// ── Memory backend ─────────────────────────────────────────────────

async fn put_version_mem(
    table: &RwLock<MemoryVersionTable>,
    key: &DocumentKey,
    content: Vec<u8>,
) -> VersionInfo {
    let mut table = table.write().await;
    let history = table.versions.entry(key.clone()).or_default();

    // Keep created_at monotonic so newest-first ordering never ties backwards.
    let mut created_at = Utc::now();
    if let Some(previous) = history.last() {
        created_at = created_at.max(previous.created_at);
    }

    let stored =
        StoredVersion { version_id: Uuid::now_v7().to_string(), created_at, content: Some(content) };
    let info = stored.info(true);
    history.push(stored);
    info
}

async fn list_versions_mem(table: &RwLock<MemoryVersionTable>, key: &DocumentKey) -> Vec<VersionInfo> {
    let table = table.read().await;
    let Some(history) = table.versions.get(key) else {
        return Vec::new();
    };

    let newest = history.len().saturating_sub(1);
    history.iter().enumerate().rev().map(|(index, stored)| stored.info(index == newest)).collect()
}

async fn get_version_mem(
    table: &RwLock<MemoryVersionTable>,
    key: &DocumentKey,
    version_id: &str,
) -> Result<(VersionInfo, Vec<u8>), StoreError> {
    let table = table.read().await;
    let history = table.versions.get(key).ok_or_else(|| StoreError::not_found(key))?;
    let newest = history.len().saturating_sub(1);

    let (index, stored) = history
        .iter()
        .enumerate()
        .find(|(_, stored)| stored.version_id == version_id)
        .ok_or_else(|| StoreError::version_not_found(key, version_id))?;
    let content =
        stored.content.clone().ok_or_else(|| StoreError::version_not_found(key, version_id))?;

    Ok((stored.info(index == newest), content))
}

async fn get_latest_mem(
    table: &RwLock<MemoryVersionTable>,
    key: &DocumentKey,
) -> Result<(VersionInfo, Vec<u8>), StoreError> {
    let table = table.read().await;
    let latest = table
        .versions
        .get(key)
        .and_then(|history| history.last())
        .ok_or_else(|| StoreError::not_found(key))?;
    let content = latest.content.clone().ok_or_else(|| StoreError::not_found(key))?;

    Ok((latest.info(true), content))
}

async fn list_documents_mem(
    table: &RwLock<MemoryVersionTable>,
    bucket: &str,
    filter: &DocumentFilter,
) -> Vec<DocumentEntry> {
    let table = table.read().await;
    table
        .versions
        .iter()
        .filter(|(key, _)| key.bucket() == bucket && filter.in_prefix(key.path()))
        .filter_map(|(key, history)| {
            let latest = history.last()?;
            let content = latest.content.as_ref()?;
            Some(DocumentEntry::document(
                key.path().to_string(),
                content.len() as u64,
                latest.created_at,
            ))
        })
        .collect()
}

async fn list_buckets_mem(table: &RwLock<MemoryVersionTable>) -> Vec<String> {
    let table = table.read().await;
    let buckets: BTreeSet<&str> = table.versions.keys().map(DocumentKey::bucket).collect();
    buckets.into_iter().map(ToOwned::to_owned).collect()
}

// ── Postgres backend ───────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct VersionRow {
    version_id: Uuid,
    created_at: DateTime<Utc>,
    size: i64,
    is_delete_marker: bool,
    is_latest: bool,
}

impl VersionRow {
    fn into_info(self) -> VersionInfo {
        VersionInfo {
            version_id: self.version_id.to_string(),
            created_at: self.created_at,
            size: u64::try_from(self.size).unwrap_or_default(),
            is_latest: self.is_latest,
            is_delete_marker: self.is_delete_marker,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VersionContentRow {
    #[sqlx(flatten)]
    version: VersionRow,
    content: Option<Vec<u8>>,
}

async fn put_version_pg(
    pool: &PgPool,
    key: &DocumentKey,
    content: Vec<u8>,
) -> Result<VersionInfo, StoreError> {
    let size = content.len() as i64;
    let row = sqlx::query_as::<_, VersionRow>(
        r#"
INSERT INTO document_versions (bucket, path, version_id, content, size)
VALUES ($1, $2, $3, $4, $5)
RETURNING version_id, created_at, size, is_delete_marker, TRUE AS is_latest
        "#,
    )
    .bind(key.bucket())
    .bind(key.path())
    .bind(Uuid::now_v7())
    .bind(content)
    .bind(size)
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(row.into_info())
}

async fn list_versions_pg(pool: &PgPool, key: &DocumentKey) -> Result<Vec<VersionInfo>, StoreError> {
    let rows = sqlx::query_as::<_, VersionRow>(
        r#"
SELECT version_id,
       created_at,
       size,
       is_delete_marker,
       seq = MAX(seq) OVER () AS is_latest
FROM document_versions
WHERE bucket = $1
  AND path = $2
ORDER BY seq DESC
        "#,
    )
    .bind(key.bucket())
    .bind(key.path())
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows.into_iter().map(VersionRow::into_info).collect())
}

async fn get_version_pg(
    pool: &PgPool,
    key: &DocumentKey,
    version_id: &str,
) -> Result<(VersionInfo, Vec<u8>), StoreError> {
    let Ok(parsed_id) = Uuid::parse_str(version_id) else {
        return Err(StoreError::version_not_found(key, version_id));
    };

    let row = sqlx::query_as::<_, VersionContentRow>(
        r#"
SELECT version_id,
       created_at,
       size,
       is_delete_marker,
       seq = (
           SELECT MAX(seq) FROM document_versions WHERE bucket = $1 AND path = $2
       ) AS is_latest,
       content
FROM document_versions
WHERE bucket = $1
  AND path = $2
  AND version_id = $3
        "#,
    )
    .bind(key.bucket())
    .bind(key.path())
    .bind(parsed_id)
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;

    match row {
        Some(VersionContentRow { version, content: Some(content) }) => {
            Ok((version.into_info(), content))
        }
        _ => Err(StoreError::version_not_found(key, version_id)),
    }
}

async fn get_latest_pg(
    pool: &PgPool,
    key: &DocumentKey,
) -> Result<(VersionInfo, Vec<u8>), StoreError> {
    let row = sqlx::query_as::<_, VersionContentRow>(
        r#"
SELECT version_id, created_at, size, is_delete_marker, TRUE AS is_latest, content
FROM document_versions
WHERE bucket = $1
  AND path = $2
ORDER BY seq DESC
LIMIT 1
        "#,
    )
    .bind(key.bucket())
    .bind(key.path())
    .fetch_optional(pool)
    .await
    .map_err(map_sqlx_error)?;

    match row {
        Some(VersionContentRow { version, content: Some(content) }) => {
            Ok((version.into_info(), content))
        }
        _ => Err(StoreError::not_found(key)),
    }
}

#[derive(sqlx::FromRow)]
struct LatestDocumentRow {
    path: String,
    size: i64,
    created_at: DateTime<Utc>,
    is_delete_marker: bool,
}

async fn list_documents_pg(
    pool: &PgPool,
    bucket: &str,
    filter: &DocumentFilter,
) -> Result<Vec<DocumentEntry>, StoreError> {
    let rows = sqlx::query_as::<_, LatestDocumentRow>(
        r#"
SELECT DISTINCT ON (path) path, size, created_at, is_delete_marker
FROM document_versions
WHERE bucket = $1
  AND ($2::TEXT IS NULL OR starts_with(path, $2))
ORDER BY path, seq DESC
        "#,
    )
    .bind(bucket)
    .bind(filter.prefix())
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(rows
        .into_iter()
        .filter(|row| !row.is_delete_marker)
        .map(|row| {
            DocumentEntry::document(
                row.path,
                u64::try_from(row.size).unwrap_or_default(),
                row.created_at,
            )
        })
        .collect())
}

async fn list_buckets_pg(pool: &PgPool) -> Result<Vec<String>, StoreError> {
    sqlx::query_scalar::<_, String>("SELECT DISTINCT bucket FROM document_versions ORDER BY bucket")
        .fetch_all(pool)
        .await
        .map_err(map_sqlx_error)
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    error!(error = %error, "version store query failed");
    StoreError::BackendUnavailable(error.to_string())
}
