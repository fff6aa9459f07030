//! Session lifecycle service.
//!
//! Guarantees that a caller asking for a usable marketplace credential
//! either receives a valid decrypted one or a clear reason why not, and
//! that the persisted record always reflects the true state. Expected
//! failures (missing session, undecryptable credential, failed remote
//! calls) are folded into the record's status and error fields and never
//! escape to callers; only programming errors propagate.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::clock::Clock;
use crate::errors::Result;
use crate::secrets::CredentialCodec;

use super::{Credential, RefreshSessionResult, SessionRecord, SessionStatus, TokenPair};

const CONFIGURATION_REQUIRED_MESSAGE: &str =
    "Marketplace session is not configured. Reconnect the marketplace account first.";

/// Keyed record store holding one session record per user.
#[async_trait]
pub trait SessionRepositoryTrait: Send + Sync {
    async fn find(&self, user_id: &str) -> Result<Option<SessionRecord>>;
    async fn upsert(&self, record: SessionRecord) -> Result<SessionRecord>;
}

/// Remote validity/refresh capability of the marketplace.
#[async_trait]
pub trait MarketplaceAuth: Send + Sync {
    /// Whether the remote system still accepts this credential.
    async fn is_token_valid(&self, credential: &Credential) -> Result<bool>;

    /// Exchange the credential's refresh token for a renewed pair.
    async fn refresh_access_token(&self, credential: &Credential) -> Result<TokenPair>;
}

/// Owns the per-user session state machine.
pub struct SessionService {
    repository: Arc<dyn SessionRepositoryTrait>,
    codec: Arc<dyn CredentialCodec>,
    auth: Arc<dyn MarketplaceAuth>,
    clock: Arc<dyn Clock>,
    /// Serializes refresh_session's read-modify-write cycle per user, so
    /// two concurrent refreshes cannot race on the persisted record.
    refresh_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionService {
    pub fn new(
        repository: Arc<dyn SessionRepositoryTrait>,
        codec: Arc<dyn CredentialCodec>,
        auth: Arc<dyn MarketplaceAuth>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            codec,
            auth,
            clock,
            refresh_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Decrypted credential for `user_id`, or None when no usable one
    /// exists. Decrypt failures park the record in
    /// `requires_configuration`; a successful read has no persisted side
    /// effect.
    pub async fn get_credential(&self, user_id: &str) -> Option<Credential> {
        let record = match self.repository.find(user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                error!("Failed to load session record for {}: {}", user_id, e);
                return None;
            }
        };

        self.decrypt_record(&record).await
    }

    /// Encrypt and persist a credential, creating the record on first save.
    /// Always lands in `active` with any previous error cleared.
    pub async fn save_credential(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<SessionRecord> {
        let plaintext = credential.to_json()?;
        let encrypted_credential = self.codec.encrypt(&plaintext, user_id)?;

        let existing = self.repository.find(user_id).await?;
        let record = SessionRecord {
            user_id: user_id.to_string(),
            encrypted_credential,
            status: SessionStatus::Active,
            last_validated_at: existing.as_ref().and_then(|r| r.last_validated_at),
            last_refreshed_at: existing.as_ref().and_then(|r| r.last_refreshed_at),
            refresh_error_message: None,
        };

        info!("Storing marketplace credential for {}", user_id);
        self.repository.upsert(record).await
    }

    /// Validate the stored credential against the marketplace and refresh
    /// it when expired. The persisted record ends up in `active`,
    /// `refresh_error`, or `requires_configuration` matching the outcome;
    /// the stale ciphertext is retained on refresh failure so a later
    /// manual re-auth keeps its context.
    pub async fn refresh_session(&self, user_id: &str) -> RefreshSessionResult {
        let guard = self.refresh_lock(user_id);
        let _held = guard.lock().await;

        let record = match self.repository.find(user_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return RefreshSessionResult::failed(CONFIGURATION_REQUIRED_MESSAGE),
            Err(e) => {
                error!("Failed to load session record for {}: {}", user_id, e);
                return RefreshSessionResult::failed(e.to_string());
            }
        };

        let Some(mut credential) = self.decrypt_record(&record).await else {
            return RefreshSessionResult::failed(CONFIGURATION_REQUIRED_MESSAGE);
        };

        match self.auth.is_token_valid(&credential).await {
            Ok(true) => {
                debug!("Marketplace token for {} is still valid", user_id);
                self.persist_validated(record).await;
                RefreshSessionResult::validated()
            }
            Ok(false) => {
                info!("Marketplace token for {} expired, attempting refresh", user_id);
                match self.auth.refresh_access_token(&credential).await {
                    Ok(tokens) => {
                        credential.merge_refreshed(&tokens);
                        self.persist_refreshed(record, &credential).await;
                        RefreshSessionResult::refreshed(tokens)
                    }
                    Err(e) => {
                        warn!("Token refresh for {} failed: {}", user_id, e);
                        self.persist_refresh_error(record, e.to_string()).await;
                        RefreshSessionResult::failed(e.to_string())
                    }
                }
            }
            Err(e) => {
                warn!("Token validity check for {} failed: {}", user_id, e);
                self.persist_refresh_error(record, e.to_string()).await;
                RefreshSessionResult::failed(e.to_string())
            }
        }
    }

    async fn decrypt_record(&self, record: &SessionRecord) -> Option<Credential> {
        let plaintext = match self
            .codec
            .decrypt(&record.encrypted_credential, &record.user_id)
        {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("Failed to decrypt credential for {}: {}", record.user_id, e);
                self.mark_requires_configuration(
                    record.clone(),
                    format!("Credential could not be decrypted: {}", e),
                )
                .await;
                return None;
            }
        };

        match Credential::from_json(&plaintext) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Stored credential for {} is malformed: {}", record.user_id, e);
                self.mark_requires_configuration(
                    record.clone(),
                    format!("Stored credential is malformed: {}", e),
                )
                .await;
                None
            }
        }
    }

    async fn mark_requires_configuration(&self, mut record: SessionRecord, message: String) {
        record.status = SessionStatus::RequiresConfiguration;
        record.refresh_error_message = Some(message);
        if let Err(e) = self.repository.upsert(record).await {
            error!("Failed to persist requires_configuration status: {}", e);
        }
    }

    async fn persist_validated(&self, mut record: SessionRecord) {
        let now = self.clock.now();
        record.status = SessionStatus::Active;
        record.last_validated_at = bump(record.last_validated_at, now);
        record.refresh_error_message = None;
        if let Err(e) = self.repository.upsert(record).await {
            error!("Failed to persist validated session: {}", e);
        }
    }

    async fn persist_refreshed(&self, mut record: SessionRecord, credential: &Credential) {
        let now = self.clock.now();
        let encrypted = credential
            .to_json()
            .and_then(|plaintext| self.codec.encrypt(&plaintext, &record.user_id));
        match encrypted {
            Ok(encrypted_credential) => record.encrypted_credential = encrypted_credential,
            Err(e) => {
                // Keep the refreshed tokens usable for this caller; the
                // stored ciphertext stays on the previous generation.
                error!("Failed to re-encrypt credential for {}: {}", record.user_id, e);
            }
        }
        record.status = SessionStatus::Active;
        record.last_refreshed_at = bump(record.last_refreshed_at, now);
        record.last_validated_at = bump(record.last_validated_at, now);
        record.refresh_error_message = None;
        if let Err(e) = self.repository.upsert(record).await {
            error!("Failed to persist refreshed session: {}", e);
        }
    }

    async fn persist_refresh_error(&self, mut record: SessionRecord, message: String) {
        record.status = SessionStatus::RefreshError;
        record.refresh_error_message = Some(message);
        if let Err(e) = self.repository.upsert(record).await {
            error!("Failed to persist refresh_error status: {}", e);
        }
    }

    fn refresh_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().unwrap();
        Arc::clone(locks.entry(user_id.to_string()).or_default())
    }
}

/// Timestamps are monotonically non-decreasing once set, even if the wall
/// clock steps backwards.
fn bump(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(previous.map_or(now, |prev| prev.max(now)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::errors::Error;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct InMemorySessionRepository {
        records: StdMutex<HashMap<String, SessionRecord>>,
    }

    impl InMemorySessionRepository {
        fn new() -> Self {
            Self {
                records: StdMutex::new(HashMap::new()),
            }
        }

        fn record(&self, user_id: &str) -> Option<SessionRecord> {
            self.records.lock().unwrap().get(user_id).cloned()
        }
    }

    #[async_trait]
    impl SessionRepositoryTrait for InMemorySessionRepository {
        async fn find(&self, user_id: &str) -> Result<Option<SessionRecord>> {
            Ok(self.records.lock().unwrap().get(user_id).cloned())
        }

        async fn upsert(&self, record: SessionRecord) -> Result<SessionRecord> {
            self.records
                .lock()
                .unwrap()
                .insert(record.user_id.clone(), record.clone());
            Ok(record)
        }
    }

    /// Reversible stand-in codec: "sealed:<user>:<plaintext>".
    struct StubCodec;

    impl CredentialCodec for StubCodec {
        fn encrypt(&self, plaintext: &str, user_id: &str) -> Result<String> {
            Ok(format!("sealed:{}:{}", user_id, plaintext))
        }

        fn decrypt(&self, ciphertext: &str, user_id: &str) -> Result<String> {
            ciphertext
                .strip_prefix(&format!("sealed:{}:", user_id))
                .map(str::to_string)
                .ok_or_else(|| Error::decryption("ciphertext failed authentication"))
        }
    }

    struct StubAuth {
        valid: AtomicBool,
        refresh_fails: AtomicBool,
        probe_fails: AtomicBool,
    }

    impl StubAuth {
        fn new() -> Self {
            Self {
                valid: AtomicBool::new(true),
                refresh_fails: AtomicBool::new(false),
                probe_fails: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl MarketplaceAuth for StubAuth {
        async fn is_token_valid(&self, _credential: &Credential) -> Result<bool> {
            if self.probe_fails.load(Ordering::SeqCst) {
                return Err(Error::remote("connection reset"));
            }
            Ok(self.valid.load(Ordering::SeqCst))
        }

        async fn refresh_access_token(&self, _credential: &Credential) -> Result<TokenPair> {
            if self.refresh_fails.load(Ordering::SeqCst) {
                return Err(Error::remote("refresh grant rejected"));
            }
            Ok(TokenPair {
                access_token: "new-access".to_string(),
                refresh_token: "new-refresh".to_string(),
            })
        }
    }

    struct Harness {
        repository: Arc<InMemorySessionRepository>,
        auth: Arc<StubAuth>,
        clock: Arc<ManualClock>,
        service: SessionService,
    }

    fn harness() -> Harness {
        let repository = Arc::new(InMemorySessionRepository::new());
        let auth = Arc::new(StubAuth::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = SessionService::new(
            Arc::clone(&repository) as Arc<dyn SessionRepositoryTrait>,
            Arc::new(StubCodec),
            Arc::clone(&auth) as Arc<dyn MarketplaceAuth>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        Harness {
            repository,
            auth,
            clock,
            service,
        }
    }

    async fn seed(harness: &Harness, user_id: &str) -> Credential {
        let mut credential = Credential::new("access-0", "refresh-0");
        credential.insert("device_id", "abc-123");
        harness
            .service
            .save_credential(user_id, &credential)
            .await
            .unwrap();
        credential
    }

    #[tokio::test]
    async fn get_credential_without_record_is_none() {
        let harness = harness();
        assert!(harness.service.get_credential("nobody").await.is_none());
    }

    #[tokio::test]
    async fn reads_are_idempotent() {
        let harness = harness();
        let credential = seed(&harness, "user-1").await;
        let before = harness.repository.record("user-1").unwrap();

        assert_eq!(
            harness.service.get_credential("user-1").await,
            Some(credential.clone())
        );
        assert_eq!(
            harness.service.get_credential("user-1").await,
            Some(credential)
        );

        assert_eq!(harness.repository.record("user-1").unwrap(), before);
    }

    #[tokio::test]
    async fn decrypt_failure_parks_record_in_requires_configuration() {
        let harness = harness();
        seed(&harness, "user-1").await;

        let mut corrupted = harness.repository.record("user-1").unwrap();
        corrupted.encrypted_credential = "garbage".to_string();
        harness.repository.upsert(corrupted).await.unwrap();

        assert!(harness.service.get_credential("user-1").await.is_none());

        let record = harness.repository.record("user-1").unwrap();
        assert_eq!(record.status, SessionStatus::RequiresConfiguration);
        assert!(!record.refresh_error_message.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_without_record_requires_configuration() {
        let harness = harness();
        let result = harness.service.refresh_session("nobody").await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(CONFIGURATION_REQUIRED_MESSAGE));
    }

    #[tokio::test]
    async fn refresh_with_valid_token_only_touches_validated_at() {
        let harness = harness();
        seed(&harness, "user-1").await;

        let result = harness.service.refresh_session("user-1").await;
        assert!(result.success);
        assert!(result.tokens.is_none());

        let record = harness.repository.record("user-1").unwrap();
        assert_eq!(record.status, SessionStatus::Active);
        assert_eq!(record.last_validated_at, Some(harness.clock.now()));
        assert_eq!(record.last_refreshed_at, None);
    }

    #[tokio::test]
    async fn refresh_state_machine_on_expired_token() {
        let harness = harness();
        seed(&harness, "user-1").await;
        harness.auth.valid.store(false, Ordering::SeqCst);

        let result = harness.service.refresh_session("user-1").await;
        assert!(result.success);
        let tokens = result.tokens.unwrap();
        assert_eq!(tokens.access_token, "new-access");

        let now = harness.clock.now();
        let record = harness.repository.record("user-1").unwrap();
        assert_eq!(record.status, SessionStatus::Active);
        assert_eq!(record.last_refreshed_at, Some(now));
        assert_eq!(record.last_validated_at, Some(now));
        assert_eq!(record.refresh_error_message, None);

        // The merged credential carries the renewed pair plus the untouched
        // device sub-token.
        let credential = harness.service.get_credential("user-1").await.unwrap();
        assert_eq!(credential.access_token(), Some("new-access"));
        assert_eq!(credential.refresh_token(), Some("new-refresh"));
        assert_eq!(credential.get("device_id"), Some("abc-123"));
    }

    #[tokio::test]
    async fn refresh_failure_keeps_stale_ciphertext() {
        let harness = harness();
        seed(&harness, "user-1").await;
        let ciphertext_before = harness
            .repository
            .record("user-1")
            .unwrap()
            .encrypted_credential;

        harness.auth.valid.store(false, Ordering::SeqCst);
        harness.auth.refresh_fails.store(true, Ordering::SeqCst);

        let result = harness.service.refresh_session("user-1").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("refresh grant rejected"));

        let record = harness.repository.record("user-1").unwrap();
        assert_eq!(record.status, SessionStatus::RefreshError);
        assert_eq!(record.encrypted_credential, ciphertext_before);
    }

    #[tokio::test]
    async fn validity_probe_outage_is_a_refresh_error() {
        let harness = harness();
        seed(&harness, "user-1").await;
        harness.auth.probe_fails.store(true, Ordering::SeqCst);

        let result = harness.service.refresh_session("user-1").await;
        assert!(!result.success);

        let record = harness.repository.record("user-1").unwrap();
        assert_eq!(record.status, SessionStatus::RefreshError);
    }

    #[tokio::test]
    async fn session_recovers_after_reconfiguration() {
        let harness = harness();
        seed(&harness, "user-1").await;

        let mut corrupted = harness.repository.record("user-1").unwrap();
        corrupted.encrypted_credential = "garbage".to_string();
        harness.repository.upsert(corrupted).await.unwrap();
        assert!(harness.service.get_credential("user-1").await.is_none());

        // A fresh save returns the session to active; there is no terminal
        // state in the graph.
        seed(&harness, "user-1").await;
        let record = harness.repository.record("user-1").unwrap();
        assert_eq!(record.status, SessionStatus::Active);
        assert!(harness.service.get_credential("user-1").await.is_some());
    }

    #[tokio::test]
    async fn timestamps_never_move_backwards() {
        let harness = harness();
        seed(&harness, "user-1").await;

        harness.service.refresh_session("user-1").await;
        let first = harness
            .repository
            .record("user-1")
            .unwrap()
            .last_validated_at;

        harness.clock.advance(chrono::Duration::seconds(-30));
        harness.service.refresh_session("user-1").await;
        let second = harness
            .repository
            .record("user-1")
            .unwrap()
            .last_validated_at;

        assert_eq!(first, second);
    }
}
