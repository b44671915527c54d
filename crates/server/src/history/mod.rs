// Version selectors and side-by-side comparison.
//
// Comparison only fetches; diffing the two bodies is left to the client.

use inkwell_common::protocol::http::{ComparisonEnvelope, VersionContent};
use inkwell_common::types::{DocumentKey, VersionInfo};

use crate::store::{StoreError, VersionStore};

/// Names one version of a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Latest,
    /// The version before the latest.
    Previous,
    Id(String),
}

impl VersionSelector {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.eq_ignore_ascii_case("latest") {
            Self::Latest
        } else if trimmed.eq_ignore_ascii_case("previous") {
            Self::Previous
        } else {
            Self::Id(trimmed.to_string())
        }
    }

    fn parse_or(raw: Option<&str>, default: Self) -> Self {
        raw.filter(|raw| !raw.trim().is_empty()).map(Self::parse).unwrap_or(default)
    }

    fn label(&self) -> &str {
        match self {
            Self::Latest => "latest",
            Self::Previous => "previous",
            Self::Id(id) => id,
        }
    }
}

/// Resolve `selector` against `versions` (newest first). Delete markers have
/// no content and are never selected by `latest` or `previous`.
pub fn resolve<'a>(versions: &'a [VersionInfo], selector: &VersionSelector) -> Option<&'a VersionInfo> {
    let mut readable = versions.iter().filter(|version| !version.is_delete_marker);
    match selector {
        VersionSelector::Latest => readable.next(),
        VersionSelector::Previous => readable.nth(1),
        VersionSelector::Id(id) => versions.iter().find(|version| &version.version_id == id),
    }
}

/// Fetch two versions of `key` for external diffing. Defaults to
/// `previous` → `latest`.
pub async fn compare(
    store: &VersionStore,
    key: &DocumentKey,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<ComparisonEnvelope, StoreError> {
    let from = VersionSelector::parse_or(from, VersionSelector::Previous);
    let to = VersionSelector::parse_or(to, VersionSelector::Latest);

    let versions = store.list_versions(key).await?;
    let from = resolved_id(key, &versions, &from)?;
    let to = resolved_id(key, &versions, &to)?;

    Ok(ComparisonEnvelope {
        from: version_content(store, key, &from).await?,
        to: version_content(store, key, &to).await?,
    })
}

/// One version's metadata plus its body as text.
pub async fn version_content(
    store: &VersionStore,
    key: &DocumentKey,
    version_id: &str,
) -> Result<VersionContent, StoreError> {
    let (version, content) = store.get_version_with_info(key, version_id).await?;
    Ok(VersionContent { version, content: String::from_utf8_lossy(&content).into_owned() })
}

fn resolved_id(
    key: &DocumentKey,
    versions: &[VersionInfo],
    selector: &VersionSelector,
) -> Result<String, StoreError> {
    resolve(versions, selector).map(|version| version.version_id.clone()).ok_or_else(|| {
        StoreError::VersionNotFound { key: key.to_string(), version_id: selector.label().to_string() }
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn info(id: &str, is_latest: bool, is_delete_marker: bool) -> VersionInfo {
        VersionInfo {
            version_id: id.into(),
            created_at: Utc::now(),
            size: 1,
            is_latest,
            is_delete_marker,
        }
    }

    fn key() -> DocumentKey {
        DocumentKey::new("team-docs", "docs/a.md").expect("valid key")
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(VersionSelector::parse("LATEST"), VersionSelector::Latest);
        assert_eq!(VersionSelector::parse(" Previous "), VersionSelector::Previous);
        assert_eq!(VersionSelector::parse("v1"), VersionSelector::Id("v1".into()));
    }

    #[test]
    fn previous_skips_delete_markers() {
        let versions = [info("v3", true, true), info("v2", false, false), info("v1", false, false)];
        assert_eq!(resolve(&versions, &VersionSelector::Latest).unwrap().version_id, "v2");
        assert_eq!(resolve(&versions, &VersionSelector::Previous).unwrap().version_id, "v1");
        assert!(resolve(&versions, &VersionSelector::Id("v9".into())).is_none());
    }

    #[tokio::test]
    async fn compare_defaults_to_previous_and_latest() {
        let store = VersionStore::memory();
        let doc = key();
        let first = store.put_version(&doc, b"first".to_vec()).await.unwrap();
        let second = store.put_version(&doc, b"second".to_vec()).await.unwrap();

        let comparison = compare(&store, &doc, None, None).await.unwrap();
        assert_eq!(comparison.from.version.version_id, first.version_id);
        assert_eq!(comparison.from.content, "first");
        assert_eq!(comparison.to.version.version_id, second.version_id);
        assert_eq!(comparison.to.content, "second");
        assert!(comparison.to.version.is_latest);
    }

    #[tokio::test]
    async fn compare_with_explicit_ids() {
        let store = VersionStore::memory();
        let doc = key();
        let first = store.put_version(&doc, b"first".to_vec()).await.unwrap();
        store.put_version(&doc, b"second".to_vec()).await.unwrap();
        let third = store.put_version(&doc, b"third".to_vec()).await.unwrap();

        let comparison =
            compare(&store, &doc, Some(&third.version_id), Some(&first.version_id)).await.unwrap();
        assert_eq!(comparison.from.content, "third");
        assert_eq!(comparison.to.content, "first");
    }

    #[tokio::test]
    async fn single_version_has_no_previous() {
        let store = VersionStore::memory();
        let doc = key();
        store.put_version(&doc, b"only".to_vec()).await.unwrap();

        let error = compare(&store, &doc, None, None).await.unwrap_err();
        assert!(matches!(error, StoreError::VersionNotFound { version_id, .. } if version_id == "previous"));
    }

    #[tokio::test]
    async fn delete_marker_is_skipped_by_keywords() {
        let store = VersionStore::memory();
        let doc = key();
        store.put_version(&doc, b"first".to_vec()).await.unwrap();
        store.put_version(&doc, b"second".to_vec()).await.unwrap();
        store.put_delete_marker(&doc).await;

        let comparison = compare(&store, &doc, None, None).await.unwrap();
        assert_eq!(comparison.from.content, "first");
        assert_eq!(comparison.to.content, "second");
        assert!(!comparison.to.version.is_latest);
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let store = VersionStore::memory();
        let error = compare(&store, &key(), None, None).await.unwrap_err();
        assert!(matches!(error, StoreError::NotFound { .. }));
    }
}
