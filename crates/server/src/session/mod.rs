// Document editing sessions.
//
// A session binds one identity to one document key: it holds the lease while
// editing, keeps it alive with a heartbeat task, caches the baseline it
// loaded, and turns saves into new versions. Losing the lease never ends the
// session; it drops to read-only and keeps serving the loaded content.

mod heartbeat;

use std::sync::Arc;
use std::time::Duration;

use inkwell_common::content::{extract, ContentError, Extraction};
use inkwell_common::protocol::http::ComparisonEnvelope;
use inkwell_common::protocol::ws::{ModeReason, SessionMode};
use inkwell_common::types::{DocumentKey, VersionInfo};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use self::heartbeat::HeartbeatHandle;
use crate::history;
use crate::lock::{LockError, LockManager, DEFAULT_HEARTBEAT_INTERVAL};
use crate::store::{StoreError, VersionStore};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub heartbeat_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is read-only")]
    ReadOnly { holder: Option<String> },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Content(#[from] ContentError),

    #[error("document changed since it was loaded")]
    Stale { latest_version_id: Option<String> },

    #[error("session is closed")]
    Closed,
}

/// What the session last loaded or saved.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub raw: Vec<u8>,
    pub extraction: Extraction,
    /// `None` until the document's first version exists.
    pub version: Option<VersionInfo>,
}

impl Baseline {
    fn new(raw: Vec<u8>, path: &str, version: Option<VersionInfo>) -> Self {
        let extraction = extract(&raw, path);
        Self { raw, extraction, version }
    }
}

/// Current mode as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeSnapshot {
    pub mode: SessionMode,
    /// The other identity holding the lease, when known.
    pub holder: Option<String>,
    /// `None` for the mode the session was opened in.
    pub reason: Option<ModeReason>,
}

impl ModeSnapshot {
    pub(crate) fn editing() -> Self {
        Self { mode: SessionMode::Editing, holder: None, reason: None }
    }

    pub(crate) fn read_only(holder: Option<String>, reason: ModeReason) -> Self {
        Self { mode: SessionMode::ReadOnly, holder, reason: Some(reason) }
    }
}

/// Lock errors that mean the lease is gone, with the mode change they cause.
pub(crate) fn lease_loss(error: &LockError) -> Option<(ModeReason, Option<String>)> {
    match error {
        LockError::Conflict { holder } => Some((ModeReason::Conflict, Some(holder.clone()))),
        LockError::LockLost { holder } => Some((ModeReason::LockLost, Some(holder.clone()))),
        LockError::NotFound => Some((ModeReason::LeaseMissing, None)),
        LockError::InvalidTtl | LockError::BackendUnavailable(_) => None,
    }
}

pub struct DocumentSession {
    key: DocumentKey,
    identity: String,
    locks: LockManager,
    store: VersionStore,
    config: SessionConfig,
    baseline: Baseline,
    mode_tx: Arc<watch::Sender<ModeSnapshot>>,
    heartbeat: Option<HeartbeatHandle>,
    closed: bool,
}

impl DocumentSession {
    /// Open `key` for editing. When another identity holds the lease the
    /// session opens read-only and reports that holder.
    pub async fn open(
        locks: LockManager,
        store: VersionStore,
        key: DocumentKey,
        identity: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let identity = identity.into();

        let snapshot = match locks.acquire(&key, &identity).await {
            Ok(_) => ModeSnapshot::editing(),
            Err(LockError::Conflict { holder }) => {
                ModeSnapshot { mode: SessionMode::ReadOnly, holder: Some(holder), reason: None }
            }
            Err(error) => return Err(error.into()),
        };

        let baseline = match load_baseline(&store, &key).await {
            Ok(baseline) => baseline,
            Err(error) => {
                if snapshot.mode.is_editing() {
                    if let Err(release_error) = locks.release(&key, &identity).await {
                        warn!(%key, identity = %identity, error = %release_error, "failed to release lease after open failure");
                    }
                }
                return Err(error.into());
            }
        };

        let session = Self::assemble(locks, store, key, identity, config, baseline, snapshot);
        info!(
            key = %session.key,
            identity = %session.identity,
            mode = ?session.mode().mode,
            "document session opened"
        );
        Ok(session)
    }

    /// Open without attempting to lock, for identities that may only read.
    pub async fn open_read_only(
        locks: LockManager,
        store: VersionStore,
        key: DocumentKey,
        identity: impl Into<String>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let identity = identity.into();
        let holder = locks.status(&key).await?.map(|lease| lease.holder);
        let baseline = load_baseline(&store, &key).await?;

        let snapshot = ModeSnapshot { mode: SessionMode::ReadOnly, holder, reason: None };
        let session = Self::assemble(locks, store, key, identity, config, baseline, snapshot);
        debug!(key = %session.key, identity = %session.identity, "read-only document session opened");
        Ok(session)
    }

    fn assemble(
        locks: LockManager,
        store: VersionStore,
        key: DocumentKey,
        identity: String,
        config: SessionConfig,
        baseline: Baseline,
        snapshot: ModeSnapshot,
    ) -> Self {
        let editing = snapshot.mode.is_editing();
        let (mode_tx, _) = watch::channel(snapshot);
        let mut session = Self {
            key,
            identity,
            locks,
            store,
            config,
            baseline,
            mode_tx: Arc::new(mode_tx),
            heartbeat: None,
            closed: false,
        };
        if editing {
            session.start_heartbeat();
        }
        session
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    pub fn mode(&self) -> ModeSnapshot {
        self.mode_tx.borrow().clone()
    }

    /// Mode changes published by the heartbeat task and by `save`/`reacquire`.
    pub fn subscribe(&self) -> watch::Receiver<ModeSnapshot> {
        self.mode_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Save `edited_text` as a new version. The lease is re-validated first;
    /// losing it turns the session read-only and writes nothing.
    pub async fn save(&mut self, edited_text: &str) -> Result<VersionInfo, SessionError> {
        self.ensure_open()?;
        let snapshot = self.mode();
        if !snapshot.mode.is_editing() {
            return Err(SessionError::ReadOnly { holder: snapshot.holder });
        }

        self.revalidate_lease().await?;

        let content = self.baseline.extraction.render(edited_text)?;
        let version = self.store.put_version(&self.key, content.clone()).await?;
        self.baseline = Baseline::new(content, self.key.path(), Some(version.clone()));

        info!(
            key = %self.key,
            identity = %self.identity,
            version_id = %version.version_id,
            size = version.size,
            "document saved"
        );
        Ok(version)
    }

    /// Fetch two versions for diffing; `previous` → `latest` by default.
    pub async fn compare(
        &self,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<ComparisonEnvelope, SessionError> {
        self.ensure_open()?;
        Ok(history::compare(&self.store, &self.key, from, to).await?)
    }

    /// Try to take the lease again after losing it (or after opening
    /// read-only). On success the baseline is reloaded from the latest
    /// version and the heartbeat resumes.
    pub async fn reacquire(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if let Some(handle) = self.heartbeat.take() {
            handle.stop().await;
        }

        self.locks.acquire(&self.key, &self.identity).await?;
        let baseline = match load_baseline(&self.store, &self.key).await {
            Ok(baseline) => baseline,
            Err(error) => {
                if let Err(release_error) = self.locks.release(&self.key, &self.identity).await {
                    warn!(key = %self.key, identity = %self.identity, error = %release_error, "failed to release lease after reload failure");
                }
                self.mode_tx.send_replace(ModeSnapshot::read_only(None, ModeReason::LeaseMissing));
                return Err(error.into());
            }
        };

        self.baseline = baseline;
        self.mode_tx.send_replace(ModeSnapshot {
            mode: SessionMode::Editing,
            holder: None,
            reason: Some(ModeReason::Reacquired),
        });
        self.start_heartbeat();
        info!(key = %self.key, identity = %self.identity, "document lease reacquired");
        Ok(())
    }

    /// Stop the heartbeat and release the lease. Idempotent.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(handle) = self.heartbeat.take() {
            handle.stop().await;
        }
        self.locks.release(&self.key, &self.identity).await?;
        info!(key = %self.key, identity = %self.identity, "document session closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn start_heartbeat(&mut self) {
        self.heartbeat = Some(HeartbeatHandle::spawn(
            self.locks.clone(),
            self.key.clone(),
            self.identity.clone(),
            self.config.heartbeat_interval,
            self.mode_tx.clone(),
        ));
    }

    async fn revalidate_lease(&mut self) -> Result<(), SessionError> {
        match self.locks.heartbeat(&self.key, &self.identity).await {
            Ok(_) => Ok(()),
            Err(LockError::NotFound) => self.retake_lapsed_lease().await,
            Err(error) => Err(self.lose_lease(error)),
        }
    }

    /// Nobody holds the key, but someone may have saved while our lease was
    /// lapsed. The lease is only kept when the latest version is still the
    /// baseline this session edits.
    async fn retake_lapsed_lease(&mut self) -> Result<(), SessionError> {
        if let Err(error) = self.locks.acquire(&self.key, &self.identity).await {
            return Err(self.lose_lease(error));
        }

        let latest = match self.store.list_versions(&self.key).await {
            Ok(versions) => versions.into_iter().next().map(|version| version.version_id),
            Err(StoreError::NotFound { .. }) => None,
            Err(error) => return Err(error.into()),
        };
        let loaded = self.baseline.version.as_ref().map(|version| version.version_id.as_str());
        if latest.as_deref() == loaded {
            return Ok(());
        }

        if let Err(error) = self.locks.release(&self.key, &self.identity).await {
            warn!(key = %self.key, identity = %self.identity, %error, "failed to release lease over a stale baseline");
        }
        self.drop_to_read_only(ModeReason::LeaseMissing, None);
        Err(SessionError::Stale { latest_version_id: latest })
    }

    fn lose_lease(&mut self, error: LockError) -> SessionError {
        if let Some((reason, holder)) = lease_loss(&error) {
            self.drop_to_read_only(reason, holder);
        }
        error.into()
    }

    fn drop_to_read_only(&mut self, reason: ModeReason, holder: Option<String>) {
        if let Some(mut handle) = self.heartbeat.take() {
            handle.cancel();
        }
        warn!(key = %self.key, identity = %self.identity, ?reason, "lease lost before save");
        self.mode_tx.send_replace(ModeSnapshot::read_only(holder, reason));
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.heartbeat.take();
        if !self.mode_tx.borrow().mode.is_editing() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, identity = %self.identity, "session dropped outside a runtime; lease left to expire");
            return;
        };
        let locks = self.locks.clone();
        let key = self.key.clone();
        let identity = self.identity.clone();
        runtime.spawn(async move {
            if let Err(error) = locks.release(&key, &identity).await {
                warn!(%key, identity = %identity, error = %error, "best-effort lease release failed");
            }
        });
    }
}

async fn load_baseline(store: &VersionStore, key: &DocumentKey) -> Result<Baseline, StoreError> {
    match store.get_latest_with_info(key).await {
        Ok((version, raw)) => Ok(Baseline::new(raw, key.path(), Some(version))),
        Err(StoreError::NotFound { .. }) => Ok(Baseline::new(Vec::new(), key.path(), None)),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use inkwell_common::content::SelectionKind;
    use serde_json::{json, Value};

    use super::*;

    fn key(path: &str) -> DocumentKey {
        DocumentKey::new("team-docs", path).expect("valid key")
    }

    fn config() -> SessionConfig {
        SessionConfig { heartbeat_interval: Duration::from_secs(30) }
    }

    fn backends() -> (LockManager, VersionStore) {
        (LockManager::memory(Duration::from_secs(90)), VersionStore::memory())
    }

    #[tokio::test]
    async fn open_selects_field_and_save_reinjects_it() {
        let (locks, store) = backends();
        let doc = key("docs/a.json");
        store
            .put_version(&doc, br#"{"title":"X","content":"hello"}"#.to_vec())
            .await
            .unwrap();

        let mut session =
            DocumentSession::open(locks.clone(), store.clone(), doc.clone(), "alice", config())
                .await
                .unwrap();
        assert_eq!(session.mode().mode, SessionMode::Editing);
        assert_eq!(session.baseline().extraction.text, "hello");
        assert_eq!(session.baseline().extraction.field_key(), Some("content"));

        let version = session.save("hello world").await.unwrap();
        assert!(version.is_latest);

        let stored: Value = serde_json::from_slice(&store.get_latest(&doc).await.unwrap()).unwrap();
        assert_eq!(stored, json!({ "title": "X", "content": "hello world" }));
        assert_eq!(session.baseline().version.as_ref(), Some(&version));
        assert_eq!(session.baseline().extraction.text, "hello world");

        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn second_identity_opens_read_only_and_cannot_save() {
        let (locks, store) = backends();
        let doc = key("docs/a.md");

        let mut alice =
            DocumentSession::open(locks.clone(), store.clone(), doc.clone(), "alice", config())
                .await
                .unwrap();
        let mut bob =
            DocumentSession::open(locks.clone(), store.clone(), doc.clone(), "bob", config())
                .await
                .unwrap();

        let mode = bob.mode();
        assert_eq!(mode.mode, SessionMode::ReadOnly);
        assert_eq!(mode.holder.as_deref(), Some("alice"));
        assert!(matches!(
            bob.save("nope").await,
            Err(SessionError::ReadOnly { holder: Some(holder) }) if holder == "alice"
        ));

        alice.close().await.unwrap();
        bob.reacquire().await.unwrap();
        let mode = bob.mode();
        assert_eq!(mode.mode, SessionMode::Editing);
        assert_eq!(mode.reason, Some(ModeReason::Reacquired));
        bob.save("mine now").await.unwrap();
        bob.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_document_opens_with_empty_baseline() {
        let (locks, store) = backends();
        let doc = key("docs/new.md");

        let mut session =
            DocumentSession::open(locks, store.clone(), doc.clone(), "alice", config())
                .await
                .unwrap();
        assert!(session.baseline().version.is_none());
        assert_eq!(session.baseline().extraction.text, "");
        assert_eq!(session.baseline().extraction.selection_kind(), SelectionKind::PlainText);

        session.save("first words").await.unwrap();
        assert_eq!(store.get_latest(&doc).await.unwrap(), b"first words");
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn save_after_takeover_reports_lock_lost_and_turns_read_only() {
        let locks = LockManager::memory(Duration::from_millis(200));
        let store = VersionStore::memory();
        let doc = key("docs/a.md");

        let mut alice =
            DocumentSession::open(locks.clone(), store.clone(), doc.clone(), "alice", config())
                .await
                .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        locks.acquire(&doc, "bob").await.unwrap();

        let error = alice.save("too late").await.unwrap_err();
        assert!(matches!(error, SessionError::Lock(LockError::LockLost { ref holder }) if holder == "bob"));
        let mode = alice.mode();
        assert_eq!(mode.mode, SessionMode::ReadOnly);
        assert_eq!(mode.reason, Some(ModeReason::LockLost));
        assert!(matches!(store.list_versions(&doc).await, Err(StoreError::NotFound { .. })));

        // Closing must not disturb bob's lease.
        alice.close().await.unwrap();
        assert_eq!(locks.status(&doc).await.unwrap().map(|lease| lease.holder), Some("bob".into()));
    }

    #[tokio::test]
    async fn save_reacquires_an_own_expired_lease() {
        let locks = LockManager::memory(Duration::from_millis(200));
        let store = VersionStore::memory();
        let doc = key("docs/a.md");

        let mut session =
            DocumentSession::open(locks.clone(), store.clone(), doc.clone(), "alice", config())
                .await
                .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        session.save("still mine").await.unwrap();
        assert_eq!(
            locks.status(&doc).await.unwrap().map(|lease| lease.holder),
            Some("alice".into())
        );
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn save_over_a_lapsed_lease_refuses_when_another_version_landed() {
        let locks = LockManager::memory(Duration::from_millis(200));
        let store = VersionStore::memory();
        let doc = key("docs/a.md");
        store.put_version(&doc, b"v1".to_vec()).await.unwrap();

        let mut alice =
            DocumentSession::open(locks.clone(), store.clone(), doc.clone(), "alice", config())
                .await
                .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        locks.acquire(&doc, "bob").await.unwrap();
        let bobs = store.put_version(&doc, b"bob's important edit".to_vec()).await.unwrap();
        locks.release(&doc, "bob").await.unwrap();

        let error = alice.save("alice stale edit based on v1").await.unwrap_err();
        assert!(matches!(
            error,
            SessionError::Stale { latest_version_id: Some(ref id) } if *id == bobs.version_id
        ));
        let mode = alice.mode();
        assert_eq!(mode.mode, SessionMode::ReadOnly);
        assert_eq!(mode.reason, Some(ModeReason::LeaseMissing));
        assert_eq!(store.get_latest(&doc).await.unwrap(), b"bob's important edit");
        assert!(locks.status(&doc).await.unwrap().is_none());

        alice.reacquire().await.unwrap();
        assert_eq!(alice.baseline().extraction.text, "bob's important edit");
        alice.save("alice, on top of bob").await.unwrap();
        assert_eq!(store.list_versions(&doc).await.unwrap().len(), 3);
        alice.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases() {
        let (locks, store) = backends();
        let doc = key("docs/a.md");
        let mut session =
            DocumentSession::open(locks.clone(), store, doc.clone(), "alice", config())
                .await
                .unwrap();

        session.close().await.unwrap();
        session.close().await.unwrap();
        assert!(session.is_closed());
        assert!(locks.status(&doc).await.unwrap().is_none());
        assert!(matches!(session.save("x").await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn dropping_an_open_session_releases_the_lease() {
        let (locks, store) = backends();
        let doc = key("docs/a.md");
        let session =
            DocumentSession::open(locks.clone(), store, doc.clone(), "alice", config())
                .await
                .unwrap();
        drop(session);

        for _ in 0..50 {
            if locks.status(&doc).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("lease should be released after drop");
    }

    #[tokio::test]
    async fn read_only_session_never_locks() {
        let (locks, store) = backends();
        let doc = key("docs/a.md");
        store.put_version(&doc, b"text".to_vec()).await.unwrap();

        let mut viewer =
            DocumentSession::open_read_only(locks.clone(), store, doc.clone(), "vera", config())
                .await
                .unwrap();
        assert_eq!(viewer.mode().mode, SessionMode::ReadOnly);
        assert_eq!(viewer.baseline().extraction.text, "text");
        assert!(locks.status(&doc).await.unwrap().is_none());
        viewer.close().await.unwrap();
    }

    #[tokio::test]
    async fn compare_reads_history_through_the_session() {
        let (locks, store) = backends();
        let doc = key("docs/a.md");
        let mut session =
            DocumentSession::open(locks, store, doc, "alice", config()).await.unwrap();
        session.save("one").await.unwrap();
        session.save("two").await.unwrap();

        let comparison = session.compare(None, None).await.unwrap();
        assert_eq!(comparison.from.content, "one");
        assert_eq!(comparison.to.content, "two");
        session.close().await.unwrap();
    }
}
