//! Expiring, fingerprint-bound sessions persisted one record per id through the
//! record store. Expired sessions read as absent and are removed by a periodic sweep.

use std::{
    sync::{Arc, Mutex},
    time::Duration as StdDuration,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use vaultline_core::{
    clock::{Clock, SystemClock},
    error::{VaultError, VaultResult},
    locks::KeyLocks,
    medium::StorageMedium,
};
use vaultline_storage::RecordStore;

pub const SESSION_SCHEMA_VERSION: u32 = 1;
const SESSION_PREFIX: &str = "session/";

pub const IP_MISMATCH: &str = "IP address mismatch";
pub const USER_AGENT_MISMATCH: &str = "User agent mismatch";
pub const NOT_FOUND_OR_EXPIRED: &str = "Session not found or expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub default_timeout_minutes: i64,
    /// Hard ceiling on remaining lifetime, at creation and after every extension.
    pub max_timeout_minutes: i64,
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_timeout_minutes: 30,
            max_timeout_minutes: 24 * 60,
            cleanup_interval_secs: 5 * 60,
        }
    }
}

/// Session payload: a JSON object merged key by key on update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionData(Map<String, Value>);

impl SessionData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Shallow merge: keys in `other` replace keys here.
    pub fn merge(&mut self, other: SessionData) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for SessionData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Option<String>,
    pub data: SessionData,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub schema_version: u32,
}

impl SessionRecord {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub user_id: Option<String>,
    pub timeout_minutes: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionValidation {
    pub valid: bool,
    pub reason: Option<String>,
}

impl SessionValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn rejected(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub total_sessions: usize,
    pub active_sessions: usize,
    pub expired_sessions: usize,
    /// Mean of `last_accessed_at - created_at` over stored sessions.
    pub average_session_duration: StdDuration,
    pub last_cleanup: Option<DateTime<Utc>>,
}

/// Session lifecycle on top of a shared record store. Every read-modify-write of a
/// session runs under that session's key lock, including the cleanup sweep.
pub struct SessionManager<M: StorageMedium> {
    store: Arc<RecordStore<M>>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    locks: KeyLocks,
    last_cleanup: Mutex<Option<DateTime<Utc>>>,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl<M: StorageMedium + 'static> SessionManager<M> {
    pub fn new(store: Arc<RecordStore<M>>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            locks: KeyLocks::new(),
            last_cleanup: Mutex::new(None),
            cleanup_task: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    #[instrument(skip(self, data, options), fields(user_id = options.user_id.as_deref()))]
    pub async fn create_session(
        &self,
        data: SessionData,
        options: CreateOptions,
    ) -> VaultResult<String> {
        let timeout = options
            .timeout_minutes
            .unwrap_or(self.config.default_timeout_minutes);
        let lifetime = self.clamp_lifetime(timeout)?;

        let now = self.clock.now();
        let session = SessionRecord {
            id: Uuid::new_v4().to_string(),
            user_id: options.user_id,
            data,
            created_at: now,
            last_accessed_at: now,
            expires_at: after(now, lifetime)?,
            ip_address: options.ip_address,
            user_agent: options.user_agent,
            schema_version: SESSION_SCHEMA_VERSION,
        };

        let _guard = self.locks.lock(&session.id).await;
        self.save(&session).await?;
        debug!(session_id = %session.id, "session created");
        Ok(session.id)
    }

    /// Live session by id, with `last_accessed_at` bumped. Expired sessions read as absent.
    #[instrument(skip(self))]
    pub async fn get_session(&self, id: &str) -> VaultResult<Option<SessionRecord>> {
        let _guard = self.locks.lock(id).await;
        let Some(mut session) = self.load_live(id).await? else {
            return Ok(None);
        };
        session.last_accessed_at = self.clock.now();
        self.save(&session).await?;
        Ok(Some(session))
    }

    /// Merge `partial` into the session data; optionally reset expiry to
    /// `now + extend_minutes` (clamped). `false` when the session is absent.
    #[instrument(skip(self, partial))]
    pub async fn update_session(
        &self,
        id: &str,
        partial: SessionData,
        extend_minutes: Option<i64>,
    ) -> VaultResult<bool> {
        let lifetime = extend_minutes.map(|m| self.clamp_lifetime(m)).transpose()?;

        let _guard = self.locks.lock(id).await;
        let Some(mut session) = self.load_live(id).await? else {
            return Ok(false);
        };
        let now = self.clock.now();
        session.data.merge(partial);
        session.last_accessed_at = now;
        if let Some(lifetime) = lifetime {
            session.expires_at = after(now, lifetime)?;
        }
        self.save(&session).await?;
        Ok(true)
    }

    /// Push expiry out by `minutes`, never past `now + max_timeout`.
    #[instrument(skip(self))]
    pub async fn extend_session(&self, id: &str, minutes: i64) -> VaultResult<bool> {
        if minutes <= 0 {
            return Err(VaultError::Validation(
                "extension must be a positive number of minutes".into(),
            ));
        }

        let _guard = self.locks.lock(id).await;
        let Some(mut session) = self.load_live(id).await? else {
            return Ok(false);
        };
        let max = self.config.max_timeout_minutes;
        let now = self.clock.now();
        let ceiling = after(now, minutes_of(max)?)?;
        let extended = after(session.expires_at, minutes_of(minutes.min(max))?)?;
        session.expires_at = extended.min(ceiling);
        session.last_accessed_at = now;
        self.save(&session).await?;
        Ok(true)
    }

    /// Remove the session along with its record-store backups.
    #[instrument(skip(self))]
    pub async fn destroy_session(&self, id: &str) -> VaultResult<()> {
        let _guard = self.locks.lock(id).await;
        self.store.purge(&session_key(id)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn destroy_user_sessions(&self, user_id: &str) -> VaultResult<usize> {
        let mut removed = 0;
        for id in self.session_ids().await? {
            let _guard = self.locks.lock(&id).await;
            let Some(session) = self.load_for_sweep(&id).await else {
                continue;
            };
            if session.user_id.as_deref() == Some(user_id) {
                self.store.purge(&session_key(&id)).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every session whose expiry has passed.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_sessions(&self) -> VaultResult<usize> {
        let mut removed = 0;
        for id in self.session_ids().await? {
            let _guard = self.locks.lock(&id).await;
            let Some(session) = self.load_for_sweep(&id).await else {
                continue;
            };
            // Re-read under the lock, so an extension that landed first is honoured.
            if session.is_expired_at(self.clock.now()) {
                self.store.purge(&session_key(&id)).await?;
                removed += 1;
            }
        }

        *self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner()) = Some(self.clock.now());
        if removed > 0 {
            info!(removed, "expired sessions removed");
        }
        Ok(removed)
    }

    /// Check that the session is live and that the fingerprint matches what was
    /// recorded at creation. Fingerprint fields not recorded at creation are not checked.
    #[instrument(skip(self, ip_address, user_agent))]
    pub async fn validate_session(
        &self,
        id: &str,
        ip_address: &str,
        user_agent: &str,
    ) -> VaultResult<SessionValidation> {
        let _guard = self.locks.lock(id).await;
        let Some(session) = self.load_live(id).await? else {
            return Ok(SessionValidation::rejected(NOT_FOUND_OR_EXPIRED));
        };

        if session.ip_address.as_deref().is_some_and(|ip| ip != ip_address) {
            return Ok(SessionValidation::rejected(IP_MISMATCH));
        }
        if session.user_agent.as_deref().is_some_and(|ua| ua != user_agent) {
            return Ok(SessionValidation::rejected(USER_AGENT_MISMATCH));
        }
        Ok(SessionValidation::ok())
    }

    pub async fn get_metrics(&self) -> VaultResult<SessionMetrics> {
        let now = self.clock.now();
        let sessions = self.all_sessions().await?;

        let mut metrics = SessionMetrics {
            total_sessions: sessions.len(),
            last_cleanup: *self.last_cleanup.lock().unwrap_or_else(|e| e.into_inner()),
            ..Default::default()
        };
        let mut total_ms: i64 = 0;
        for session in &sessions {
            if session.is_expired_at(now) {
                metrics.expired_sessions += 1;
            } else {
                metrics.active_sessions += 1;
            }
            total_ms += (session.last_accessed_at - session.created_at)
                .num_milliseconds()
                .max(0);
        }
        if !sessions.is_empty() {
            let mean = total_ms / sessions.len() as i64;
            metrics.average_session_duration = StdDuration::from_millis(mean as u64);
        }
        Ok(metrics)
    }

    /// Live sessions of `user_id`, most recently used first.
    pub async fn get_user_sessions(&self, user_id: &str) -> VaultResult<Vec<SessionRecord>> {
        let now = self.clock.now();
        let mut sessions: Vec<SessionRecord> = self
            .all_sessions()
            .await?
            .into_iter()
            .filter(|s| s.user_id.as_deref() == Some(user_id) && !s.is_expired_at(now))
            .collect();
        sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        Ok(sessions)
    }

    /// Start the periodic sweep. The task holds only a weak handle, so dropping the
    /// manager ends it as well.
    pub fn start_cleanup_task(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = StdDuration::from_secs(self.config.cleanup_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                if let Err(err) = manager.cleanup_expired_sessions().await {
                    warn!(%err, "session sweep failed");
                }
            }
        });

        let previous = self
            .cleanup_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(?period, "session sweep started");
    }

    pub fn is_cleanup_running(&self) -> bool {
        self.cleanup_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the periodic sweep. Stored sessions are left alone.
    pub fn shutdown(&self) {
        let task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            debug!("session sweep stopped");
        }
    }

    /// Stop the sweep and delete every stored session, live or not.
    #[instrument(skip(self))]
    pub async fn force_cleanup(&self) -> VaultResult<usize> {
        self.shutdown();
        let mut removed = 0;
        for id in self.session_ids().await? {
            let _guard = self.locks.lock(&id).await;
            self.store.purge(&session_key(&id)).await?;
            removed += 1;
        }
        info!(removed, "all sessions released");
        Ok(removed)
    }

    fn clamp_lifetime(&self, minutes: i64) -> VaultResult<Duration> {
        if minutes <= 0 {
            return Err(VaultError::Validation(
                "session timeout must be a positive number of minutes".into(),
            ));
        }
        minutes_of(minutes.min(self.config.max_timeout_minutes))
    }

    async fn save(&self, session: &SessionRecord) -> VaultResult<()> {
        self.store.store(&session_key(&session.id), session, None).await
    }

    async fn load(&self, id: &str) -> VaultResult<Option<SessionRecord>> {
        let session: Option<SessionRecord> = self.store.retrieve(&session_key(id), None).await?;
        Ok(session.map(upgrade))
    }

    async fn load_live(&self, id: &str) -> VaultResult<Option<SessionRecord>> {
        let now = self.clock.now();
        Ok(self.load(id).await?.filter(|s| !s.is_expired_at(now)))
    }

    /// Sweeps skip unreadable records instead of aborting halfway.
    async fn load_for_sweep(&self, id: &str) -> Option<SessionRecord> {
        match self.load(id).await {
            Ok(session) => session,
            Err(err) => {
                warn!(%err, session_id = id, "unreadable session skipped");
                None
            }
        }
    }

    async fn session_ids(&self) -> VaultResult<Vec<String>> {
        Ok(self
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(SESSION_PREFIX).map(str::to_string))
            .collect())
    }

    async fn all_sessions(&self) -> VaultResult<Vec<SessionRecord>> {
        let mut sessions = Vec::new();
        for id in self.session_ids().await? {
            if let Some(session) = self.load_for_sweep(&id).await {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }
}

impl<M: StorageMedium> Drop for SessionManager<M> {
    fn drop(&mut self) {
        if let Some(task) = self
            .cleanup_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
    }
}

fn minutes_of(minutes: i64) -> VaultResult<Duration> {
    Duration::try_minutes(minutes)
        .ok_or_else(|| VaultError::Validation(format!("{minutes} minutes is out of range")))
}

fn after(at: DateTime<Utc>, lifetime: Duration) -> VaultResult<DateTime<Utc>> {
    at.checked_add_signed(lifetime)
        .ok_or_else(|| VaultError::Validation("session expiry is out of range".into()))
}

fn session_key(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}

/// One-shot upgrade of records written before schema versioning.
fn upgrade(mut session: SessionRecord) -> SessionRecord {
    if session.schema_version < SESSION_SCHEMA_VERSION {
        session.schema_version = SESSION_SCHEMA_VERSION;
    }
    session
}

#[cfg(test)]
mod tests {
    use vaultline_core::{clock::ManualClock, medium::InMemoryMedium};
    use vaultline_storage::{CryptoEngine, KdfParams, RecordStoreConfig};

    use super::*;

    struct Harness {
        manager: Arc<SessionManager<InMemoryMedium>>,
        store: Arc<RecordStore<InMemoryMedium>>,
        clock: Arc<ManualClock>,
    }

    fn harness(config: SessionConfig) -> Harness {
        let engine = CryptoEngine::new(KdfParams::minimal());
        engine
            .set_key(&CryptoEngine::generate_random_key())
            .expect("key");
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(
            RecordStore::new(
                InMemoryMedium::new(),
                Arc::new(engine),
                RecordStoreConfig::default(),
            )
            .with_clock(clock.clone()),
        );
        let manager = SessionManager::new(store.clone(), config).with_clock(clock.clone());
        Harness {
            manager: Arc::new(manager),
            store,
            clock,
        }
    }

    fn fingerprint() -> CreateOptions {
        CreateOptions {
            user_id: Some("user-1".into()),
            timeout_minutes: Some(10),
            ip_address: Some("10.0.0.1".into()),
            user_agent: Some("test-agent/1.0".into()),
        }
    }

    #[tokio::test]
    async fn session_expires_after_timeout() {
        let h = harness(SessionConfig::default());
        let id = h
            .manager
            .create_session(SessionData::new().with("chat", "c1"), fingerprint())
            .await
            .expect("create");

        let session = h.manager.get_session(&id).await.expect("get").expect("live");
        assert_eq!(session.data.get("chat"), Some(&Value::from("c1")));

        h.clock.advance(Duration::minutes(10));
        assert!(h.manager.get_session(&id).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn timeout_is_clamped_to_max() {
        let h = harness(SessionConfig {
            max_timeout_minutes: 60,
            ..Default::default()
        });
        let start = h.clock.now();
        let id = h
            .manager
            .create_session(
                SessionData::new(),
                CreateOptions {
                    timeout_minutes: Some(10_000),
                    ..Default::default()
                },
            )
            .await
            .expect("create");

        let session = h.manager.get_session(&id).await.unwrap().unwrap();
        assert!(session.expires_at <= start + Duration::minutes(60));
    }

    #[tokio::test]
    async fn default_timeout_applies_when_unspecified() {
        let h = harness(SessionConfig::default());
        let start = h.clock.now();
        let id = h
            .manager
            .create_session(SessionData::new(), CreateOptions::default())
            .await
            .unwrap();
        let session = h.manager.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.expires_at, start + Duration::minutes(30));
        assert_eq!(session.schema_version, SESSION_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn non_positive_timeout_is_rejected() {
        let h = harness(SessionConfig::default());
        let err = h
            .manager
            .create_session(
                SessionData::new(),
                CreateOptions {
                    timeout_minutes: Some(0),
                    ..Default::default()
                },
            )
            .await
            .expect_err("zero timeout");
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn get_session_bumps_last_accessed() {
        let h = harness(SessionConfig::default());
        let id = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(2));
        let session = h.manager.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.last_accessed_at, h.clock.now());
        assert_eq!(session.created_at, h.clock.now() - Duration::minutes(2));
    }

    #[tokio::test]
    async fn update_merges_and_extends() {
        let h = harness(SessionConfig {
            max_timeout_minutes: 120,
            ..Default::default()
        });
        let id = h
            .manager
            .create_session(SessionData::new().with("a", 1).with("b", 1), fingerprint())
            .await
            .unwrap();

        h.clock.advance(Duration::minutes(5));
        let updated = h
            .manager
            .update_session(&id, SessionData::new().with("b", 2).with("c", 3), Some(500))
            .await
            .expect("update");
        assert!(updated);

        let session = h.manager.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.data.get("a"), Some(&Value::from(1)));
        assert_eq!(session.data.get("b"), Some(&Value::from(2)));
        assert_eq!(session.data.get("c"), Some(&Value::from(3)));
        assert_eq!(session.expires_at, h.clock.now() + Duration::minutes(120));
    }

    #[tokio::test]
    async fn update_and_extend_report_missing_sessions() {
        let h = harness(SessionConfig::default());
        assert!(!h
            .manager
            .update_session("missing", SessionData::new(), None)
            .await
            .unwrap());
        assert!(!h.manager.extend_session("missing", 5).await.unwrap());
    }

    #[tokio::test]
    async fn extend_clamps_remaining_lifetime() {
        let h = harness(SessionConfig {
            max_timeout_minutes: 60,
            ..Default::default()
        });
        let id = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();

        assert!(h.manager.extend_session(&id, 15).await.unwrap());
        let session = h.manager.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.expires_at, h.clock.now() + Duration::minutes(25));

        assert!(h.manager.extend_session(&id, 1_000).await.unwrap());
        let session = h.manager.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.expires_at, h.clock.now() + Duration::minutes(60));
    }

    #[tokio::test]
    async fn huge_extension_is_capped_instead_of_overflowing() {
        let h = harness(SessionConfig {
            max_timeout_minutes: 60,
            ..Default::default()
        });
        let id = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();

        assert!(h.manager.extend_session(&id, i64::MAX / 2).await.unwrap());
        assert!(h.manager.extend_session(&id, i64::MAX).await.unwrap());
        assert!(h
            .manager
            .update_session(&id, SessionData::new(), Some(i64::MAX))
            .await
            .unwrap());
        let session = h.manager.get_session(&id).await.unwrap().unwrap();
        assert_eq!(session.expires_at, h.clock.now() + Duration::minutes(60));
    }

    #[tokio::test]
    async fn unrepresentable_ceiling_is_a_validation_error() {
        let h = harness(SessionConfig {
            max_timeout_minutes: i64::MAX,
            ..Default::default()
        });
        let err = h
            .manager
            .create_session(
                SessionData::new(),
                CreateOptions {
                    timeout_minutes: Some(i64::MAX),
                    ..Default::default()
                },
            )
            .await
            .expect_err("out of range");
        assert!(matches!(err, VaultError::Validation(_)));

        let id = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();
        let err = h
            .manager
            .extend_session(&id, i64::MAX / 2)
            .await
            .expect_err("out of range");
        assert!(matches!(err, VaultError::Validation(_)));
    }

    #[tokio::test]
    async fn expired_session_cannot_be_revived() {
        let h = harness(SessionConfig::default());
        let id = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(11));
        assert!(!h.manager.extend_session(&id, 30).await.unwrap());
        assert!(!h
            .manager
            .update_session(&id, SessionData::new(), Some(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn validation_reports_fingerprint_mismatches() {
        let h = harness(SessionConfig::default());
        let id = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();

        let ok = h
            .manager
            .validate_session(&id, "10.0.0.1", "test-agent/1.0")
            .await
            .unwrap();
        assert_eq!(ok, SessionValidation::ok());

        let ip = h
            .manager
            .validate_session(&id, "10.0.0.2", "test-agent/1.0")
            .await
            .unwrap();
        assert!(!ip.valid);
        assert_eq!(ip.reason.as_deref(), Some("IP address mismatch"));

        let ua = h
            .manager
            .validate_session(&id, "10.0.0.1", "other-agent")
            .await
            .unwrap();
        assert!(!ua.valid);
        assert_eq!(ua.reason.as_deref(), Some("User agent mismatch"));

        let missing = h
            .manager
            .validate_session("nope", "10.0.0.1", "test-agent/1.0")
            .await
            .unwrap();
        assert_eq!(missing.reason.as_deref(), Some(NOT_FOUND_OR_EXPIRED));
    }

    #[tokio::test]
    async fn destroy_and_destroy_user_sessions() {
        let h = harness(SessionConfig::default());
        let a = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();
        h.manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();
        let other = h
            .manager
            .create_session(
                SessionData::new(),
                CreateOptions {
                    user_id: Some("user-2".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        h.manager.destroy_session(&a).await.expect("destroy");
        h.manager.destroy_session(&a).await.expect("destroy again");
        assert!(h.manager.get_session(&a).await.unwrap().is_none());

        assert_eq!(h.manager.destroy_user_sessions("user-1").await.unwrap(), 1);
        assert!(h.manager.get_session(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_removes_only_expired_and_records_metrics() {
        let h = harness(SessionConfig::default());
        let short = h
            .manager
            .create_session(
                SessionData::new(),
                CreateOptions {
                    timeout_minutes: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let long = h
            .manager
            .create_session(
                SessionData::new(),
                CreateOptions {
                    timeout_minutes: Some(60),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        h.clock.advance(Duration::minutes(6));
        let metrics = h.manager.get_metrics().await.unwrap();
        assert_eq!(metrics.total_sessions, 2);
        assert_eq!(metrics.active_sessions, 1);
        assert_eq!(metrics.expired_sessions, 1);
        assert!(metrics.last_cleanup.is_none());

        assert_eq!(h.manager.cleanup_expired_sessions().await.unwrap(), 1);
        assert!(h.manager.get_session(&short).await.unwrap().is_none());
        assert!(h.manager.get_session(&long).await.unwrap().is_some());

        let metrics = h.manager.get_metrics().await.unwrap();
        assert_eq!(metrics.total_sessions, 1);
        assert_eq!(metrics.last_cleanup, Some(h.clock.now()));
        // `long` was read once, six minutes after creation.
        assert_eq!(metrics.average_session_duration, StdDuration::from_secs(6 * 60));
    }

    #[tokio::test]
    async fn user_sessions_sorted_by_recent_use() {
        let h = harness(SessionConfig::default());
        let first = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();
        let second = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();

        h.clock.advance(Duration::minutes(1));
        h.manager.get_session(&second).await.unwrap();
        h.clock.advance(Duration::minutes(1));
        h.manager.get_session(&first).await.unwrap();

        let sessions = h.manager.get_user_sessions("user-1").await.unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    }

    #[tokio::test]
    async fn force_cleanup_removes_everything() {
        let h = harness(SessionConfig::default());
        for _ in 0..3 {
            h.manager
                .create_session(SessionData::new(), fingerprint())
                .await
                .unwrap();
        }
        assert_eq!(h.manager.force_cleanup().await.unwrap(), 3);
        assert_eq!(h.manager.get_metrics().await.unwrap().total_sessions, 0);
    }

    /// Every session write leaves a record-store backup behind.
    async fn touched_session(h: &Harness, options: CreateOptions) -> String {
        let id = h
            .manager
            .create_session(SessionData::new().with("secret", "chat-1"), options)
            .await
            .unwrap();
        h.manager.get_session(&id).await.unwrap().unwrap();
        assert!(!h.store.list_backups(&session_key(&id)).await.unwrap().is_empty());
        id
    }

    async fn assert_fully_removed(h: &Harness, id: &str) {
        let key = session_key(id);
        assert!(h.store.list_backups(&key).await.unwrap().is_empty(), "backups left for {id}");
        assert!(!h.store.exists(&key).await.unwrap());
        assert!(h.manager.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn removed_sessions_leave_no_backups() {
        let h = harness(SessionConfig::default());

        let destroyed = touched_session(&h, fingerprint()).await;
        let stamps = h.store.list_backups(&session_key(&destroyed)).await.unwrap();
        h.manager.destroy_session(&destroyed).await.unwrap();
        assert_fully_removed(&h, &destroyed).await;
        assert!(h
            .store
            .restore_from_backup(&session_key(&destroyed), stamps[0], None)
            .await
            .is_err());

        let by_user = touched_session(&h, fingerprint()).await;
        assert_eq!(h.manager.destroy_user_sessions("user-1").await.unwrap(), 1);
        assert_fully_removed(&h, &by_user).await;

        let expiring = touched_session(
            &h,
            CreateOptions {
                timeout_minutes: Some(5),
                ..Default::default()
            },
        )
        .await;
        h.clock.advance(Duration::minutes(6));
        assert_eq!(h.manager.cleanup_expired_sessions().await.unwrap(), 1);
        assert_fully_removed(&h, &expiring).await;

        let forced = touched_session(&h, fingerprint()).await;
        assert_eq!(h.manager.force_cleanup().await.unwrap(), 1);
        assert_fully_removed(&h, &forced).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn background_sweep_runs_until_shutdown() {
        let h = harness(SessionConfig {
            cleanup_interval_secs: 1,
            ..Default::default()
        });
        let id = h
            .manager
            .create_session(SessionData::new(), fingerprint())
            .await
            .unwrap();
        h.clock.advance(Duration::minutes(11));

        h.manager.start_cleanup_task();
        assert!(h.manager.is_cleanup_running());

        let mut swept = false;
        for _ in 0..50 {
            tokio::time::sleep(StdDuration::from_millis(100)).await;
            if h.manager.get_metrics().await.unwrap().total_sessions == 0 {
                swept = true;
                break;
            }
        }
        assert!(swept, "sweep should remove the expired session {id}");

        h.manager.shutdown();
        assert!(!h.manager.is_cleanup_running());
    }
}
