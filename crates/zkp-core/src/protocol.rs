//! Fiat-Shamir protocol engine.
//!
//! Registration is a one-shot HTTP request. Authentication and device binding
//! open the verifier channel, send the commitment `x = r^2 mod n`, and hand
//! the rest of the exchange to a background task that answers challenges in
//! arrival order until the verifier reaches a verdict:
//!
//! ```text
//! Idle -> Connected -> AwaitingChallenge -> Completed
//!                                       \-> Failed
//! ```

use std::sync::Arc;
use std::time::Duration;

use num_bigint::BigUint;
use rand::rngs::OsRng;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use zkp_crypto::fiat_shamir;
use zkp_transport::{join_endpoint, ChannelConnector, ChannelMessage, ReliableChannel};

use crate::config::ApiConfig;
use crate::errors::ProtocolError;
use crate::flavor::{FiatShamirConfig, FIAT_SHAMIR_NAME};
use crate::keys::{DeviceSecretSource, FiatShamirKeyManager};
use crate::payloads::{
    AuthenticationPayload, ChallengePayload, DeviceBindingPayload, KeyContainer, PublicKey,
    RegistrationPayload,
};
use crate::registration::Registrar;
use crate::store::{SecretStore, StoreError, FIAT_SHAMIR_KEY_N, FIAT_SHAMIR_KEY_V};
use crate::verifier::{VerifierStep, VerifierUpdate};

const REGISTER_PATH: &str = "register";
const AUTHENTICATE_PATH: &str = "authenticate/";

// ============================================================================
// Context and outcomes
// ============================================================================

/// Everything the engine talks to, plus the per-user settings.
#[derive(Clone)]
pub struct ProtocolContext {
    pub user_id: String,
    pub api: ApiConfig,
    pub response_timeout: Duration,
    pub device: Arc<dyn DeviceSecretSource>,
    pub store: Arc<dyn SecretStore>,
    pub connector: Arc<dyn ChannelConnector>,
    pub registrar: Arc<dyn Registrar>,
}

/// Registration result. An existing user is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered(PublicKey),
    AlreadyRegistered { status: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connected,
    AwaitingChallenge,
    Completed,
    Failed(String),
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    Verified,
    Rejected,
}

/// A running authentication or binding session.
///
/// Dropping the handle detaches the session; it still runs to a verdict.
pub struct SessionHandle {
    status: watch::Receiver<SessionStatus>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    task: JoinHandle<Result<SessionOutcome, ProtocolError>>,
}

impl SessionHandle {
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Observe status transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Wait for the verifier's verdict.
    pub async fn outcome(self) -> Result<SessionOutcome, ProtocolError> {
        self.task
            .await
            .map_err(|e| ProtocolError::TaskFailed(e.to_string()))?
    }

    /// Stop the session without waiting for a verdict.
    ///
    /// The session moves to `Failed`, closes the channel and resolves with
    /// [`ProtocolError::Cancelled`]. No effect once a verdict was reached.
    pub fn abort(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            // The receiver is gone only if the session already ended
            let _ = cancel.send(());
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct FiatShamir {
    config: FiatShamirConfig,
    ctx: ProtocolContext,
    key_manager: FiatShamirKeyManager,
}

impl FiatShamir {
    pub fn new(config: FiatShamirConfig, ctx: ProtocolContext) -> Self {
        let key_manager =
            FiatShamirKeyManager::new(config.coprime_width, ctx.device.clone(), ctx.user_id.clone());
        Self {
            config,
            ctx,
            key_manager,
        }
    }

    pub fn config(&self) -> &FiatShamirConfig {
        &self.config
    }

    pub fn user_id(&self) -> &str {
        &self.ctx.user_id
    }

    /// Generate a key and register it. The key is stored only on HTTP 200.
    pub async fn register(&self, payload: &[u8]) -> Result<RegistrationOutcome, ProtocolError> {
        let url = join_endpoint(&self.ctx.api.base_http_url, REGISTER_PATH)
            .map_err(|e| ProtocolError::InvalidEndpoint(e.to_string()))?;

        let public_key = self.key_manager.generate_device_public_key().await?;
        let request = RegistrationPayload {
            protocol_type: FIAT_SHAMIR_NAME.to_string(),
            payload: payload.to_vec(),
            user_id: self.ctx.user_id.clone(),
            key: KeyContainer {
                device: public_key.clone(),
                other: Vec::new(),
            },
        };
        let body = serde_json::to_vec(&request)?;

        let status = self.ctx.registrar.post_registration(&url, body).await?;
        if status == 200 {
            self.store_device_key(&public_key).await?;
            info!(user_id = %self.ctx.user_id, "registered device public key");
            Ok(RegistrationOutcome::Registered(public_key))
        } else {
            info!(user_id = %self.ctx.user_id, status, "user already registered; keeping stored key");
            Ok(RegistrationOutcome::AlreadyRegistered { status })
        }
    }

    /// Start an authentication session with the stored key.
    pub async fn authenticate(&self, payload: &[u8]) -> Result<SessionHandle, ProtocolError> {
        self.open_session(payload, None).await
    }

    /// Like [`FiatShamir::authenticate`], vouching for another device's key.
    pub async fn bind_device(
        &self,
        payload: &[u8],
        other_device_key: &[u8],
    ) -> Result<SessionHandle, ProtocolError> {
        self.open_session(payload, Some(other_device_key)).await
    }

    /// Generate and persist a key, returning its serialized form.
    pub async fn fetch_device_key(&self) -> Result<Vec<u8>, ProtocolError> {
        let public_key = self.key_manager.generate_device_public_key().await?;
        self.store_device_key(&public_key).await?;
        Ok(public_key.to_bytes()?)
    }

    /// Generate a key without persisting it. Used by a device offering its
    /// key for binding; the key is stored once the binding finishes.
    pub async fn offer_device_key(&self) -> Result<Vec<u8>, ProtocolError> {
        let public_key = self.key_manager.generate_device_public_key().await?;
        Ok(public_key.to_bytes()?)
    }

    /// Persist a serialized public key received from another device.
    pub async fn store_serialized_key(&self, key: &[u8]) -> Result<(), ProtocolError> {
        let public_key = PublicKey::from_bytes(key)
            .map_err(|e| ProtocolError::Serialization(format!("device key: {e}")))?;
        self.store_device_key(&public_key).await
    }

    pub async fn store_device_key(&self, key: &PublicKey) -> Result<(), ProtocolError> {
        let user = &self.ctx.user_id;
        self.ctx.store.upsert(user, FIAT_SHAMIR_KEY_V, &key.v_key).await?;
        self.ctx.store.upsert(user, FIAT_SHAMIR_KEY_N, &key.n_key).await?;
        debug!(user_id = %user, n_len = key.n_key.len(), "stored device public key");
        Ok(())
    }

    pub async fn load_device_key(&self) -> Result<PublicKey, ProtocolError> {
        let user = &self.ctx.user_id;
        let lookup = async {
            let v_key = self.ctx.store.get(user, FIAT_SHAMIR_KEY_V).await?;
            let n_key = self.ctx.store.get(user, FIAT_SHAMIR_KEY_N).await?;
            Ok::<_, StoreError>(PublicKey { v_key, n_key })
        };
        match lookup.await {
            Ok(key) => Ok(key),
            Err(StoreError::NotFound(_)) => Err(ProtocolError::DeviceNotBound),
            Err(e) => Err(e.into()),
        }
    }

    async fn open_session(
        &self,
        payload: &[u8],
        other_device_key: Option<&[u8]>,
    ) -> Result<SessionHandle, ProtocolError> {
        let url = join_endpoint(&self.ctx.api.base_ws_url, AUTHENTICATE_PATH)
            .map_err(|e| ProtocolError::InvalidEndpoint(e.to_string()))?;
        let public_key = self.load_device_key().await?;
        let secret = self.key_manager.device_secret()?;

        let n = public_key.n();
        let r = fiat_shamir::random_exponent(&n, &mut OsRng)?;
        let x = fiat_shamir::commitment(&r, &n)?;

        let authentication = AuthenticationPayload {
            protocol_type: FIAT_SHAMIR_NAME.to_string(),
            payload: payload.to_vec(),
            user_id: self.ctx.user_id.clone(),
            key: public_key,
            initiating_num: x.to_bytes_be(),
            challenge_response: Vec::new(),
        };
        let opening = match other_device_key {
            Some(key) => serde_json::to_string(&DeviceBindingPayload {
                new_device_key: key.to_vec(),
                authentication_payload: authentication,
            })?,
            None => serde_json::to_string(&authentication)?,
        };

        let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);
        let mut channel = self.ctx.connector.connect(&url).await?;
        status_tx.send_replace(SessionStatus::Connected);
        info!(user_id = %self.ctx.user_id, %url, binding = other_device_key.is_some(), "verifier channel open");

        if let Err(e) = channel.send(ChannelMessage::Text(opening)).await {
            if let Err(close_err) = channel.close("failed to send commitment").await {
                warn!(error = %close_err, "close after failed commitment send failed");
            }
            return Err(e.into());
        }
        status_tx.send_replace(SessionStatus::AwaitingChallenge);

        let session = ProverSession {
            r: Zeroizing::new(r.to_bytes_be()),
            s: secret,
            n,
            response_timeout: self.ctx.response_timeout,
        };
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(session.run(channel, status_tx, cancel_rx));
        Ok(SessionHandle {
            status: status_rx,
            cancel: Mutex::new(Some(cancel_tx)),
            task,
        })
    }
}

// ============================================================================
// Session task
// ============================================================================

/// Per-session secrets. Dropped (and wiped) when the session ends.
struct ProverSession {
    r: Zeroizing<Vec<u8>>,
    s: Zeroizing<Vec<u8>>,
    n: BigUint,
    response_timeout: Duration,
}

impl ProverSession {
    async fn run(
        self,
        mut channel: Box<dyn ReliableChannel>,
        status: watch::Sender<SessionStatus>,
        cancel: oneshot::Receiver<()>,
    ) -> Result<SessionOutcome, ProtocolError> {
        let result = tokio::select! {
            result = self.exchange(channel.as_mut()) => result,
            () = cancelled(cancel) => {
                info!("authentication session cancelled");
                Err(ProtocolError::Cancelled)
            }
        };
        let reason = match &result {
            Ok(SessionOutcome::Verified) => {
                status.send_replace(SessionStatus::Completed);
                "verified".to_string()
            }
            Ok(SessionOutcome::Rejected) => {
                status.send_replace(SessionStatus::Failed("verifier rejected the proof".to_string()));
                "rejected".to_string()
            }
            Err(e) => {
                warn!(error = %e, "authentication session failed");
                status.send_replace(SessionStatus::Failed(e.to_string()));
                e.to_string()
            }
        };
        if let Err(e) = channel.close(&reason).await {
            debug!(error = %e, "close after session end failed");
        }
        result
    }

    async fn exchange(&self, channel: &mut dyn ReliableChannel) -> Result<SessionOutcome, ProtocolError> {
        loop {
            let frame = match tokio::time::timeout(self.response_timeout, channel.recv()).await {
                Err(_) => return Err(ProtocolError::Timeout(self.response_timeout)),
                Ok(None) => {
                    return Err(ProtocolError::ProtocolViolation(
                        "channel closed before a verdict".to_string(),
                    ))
                }
                Ok(Some(frame)) => frame?,
            };

            let update = VerifierUpdate::parse(frame.as_bytes())?;
            match update.step()? {
                VerifierStep::Wait => debug!("verification pending"),
                VerifierStep::Respond { challenge } => {
                    let y = self.respond(challenge)?;
                    let reply = serde_json::to_string(&ChallengePayload {
                        challenge_response: y,
                    })?;
                    // Next frame is read only after this send completes
                    channel.send(ChannelMessage::Text(reply)).await?;
                    debug!(challenge, "sent challenge response");
                }
                VerifierStep::Verified => {
                    info!("verifier accepted the proof");
                    return Ok(SessionOutcome::Verified);
                }
                VerifierStep::Rejected => {
                    info!("verifier rejected the proof");
                    return Ok(SessionOutcome::Rejected);
                }
            }
        }
    }

    /// `y = r * s^c mod n`
    fn respond(&self, challenge: u64) -> Result<Vec<u8>, ProtocolError> {
        let r = BigUint::from_bytes_be(&self.r);
        let s = BigUint::from_bytes_be(&self.s);
        let y = fiat_shamir::challenge_response(&r, &s, &BigUint::from(challenge), &self.n)?;
        Ok(y.to_bytes_be())
    }
}

/// Resolves when the handle asks to cancel. A dropped handle never cancels.
async fn cancelled(cancel: oneshot::Receiver<()>) {
    if cancel.await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StaticDeviceSecret;
    use crate::registration::StaticRegistrar;
    use crate::store::InMemorySecretStore;
    use zkp_transport::testing::MemoryConnector;
    use zkp_transport::ChannelError;

    fn engine(store: Arc<InMemorySecretStore>, connector: Arc<MemoryConnector>) -> FiatShamir {
        FiatShamir::new(
            FiatShamirConfig { coprime_width: 32 },
            ProtocolContext {
                user_id: "alice".to_string(),
                api: ApiConfig {
                    base_http_url: "https://zkp.example".to_string(),
                    base_ws_url: "wss://zkp.example".to_string(),
                },
                response_timeout: Duration::from_secs(5),
                device: Arc::new(StaticDeviceSecret::new("3F2504E0-4F89-11D3-9A0C-0305E82C3301")),
                store,
                connector,
                registrar: Arc::new(StaticRegistrar::new(200)),
            },
        )
    }

    #[tokio::test]
    async fn test_authenticate_without_key_is_not_bound() {
        let connector = Arc::new(MemoryConnector::new());
        let fs = engine(Arc::new(InMemorySecretStore::new()), connector.clone());
        assert!(matches!(
            fs.authenticate(b"").await,
            Err(ProtocolError::DeviceNotBound)
        ));
        // Never reached the network
        assert!(connector.connected_urls().is_empty());
    }

    #[tokio::test]
    async fn test_store_serialized_key_round_trip() {
        let store = Arc::new(InMemorySecretStore::new());
        let fs = engine(store.clone(), Arc::new(MemoryConnector::new()));
        let key = PublicKey::from_parts(&BigUint::from(9u32), &BigUint::from(77u32));
        fs.store_serialized_key(&key.to_bytes().unwrap()).await.unwrap();
        assert_eq!(fs.load_device_key().await.unwrap(), key);
        assert_eq!(store.get("alice", FIAT_SHAMIR_KEY_N).await.unwrap(), vec![77]);

        assert!(matches!(
            fs.store_serialized_key(b"garbage").await,
            Err(ProtocolError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_session_times_out_without_verifier() {
        let store = Arc::new(InMemorySecretStore::new());
        let connector = Arc::new(MemoryConnector::new());
        let mut fs = engine(store, connector.clone());
        fs.ctx.response_timeout = Duration::from_millis(50);
        fs.fetch_device_key().await.unwrap();

        let server = connector.expect_connection();
        let handle = fs.authenticate(b"").await.unwrap();
        let err = handle.outcome().await.unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout(d) if d == Duration::from_millis(50)));
        assert!(err.to_string().contains("50ms"));
        assert!(server.close_reason().is_some());
    }

    #[tokio::test]
    async fn test_failed_commitment_send_closes_channel() {
        let store = Arc::new(InMemorySecretStore::new());
        let connector = Arc::new(MemoryConnector::new());
        let fs = engine(store, connector.clone());
        fs.fetch_device_key().await.unwrap();

        let mut server = connector.expect_connection();
        server.refuse_inbound();
        assert!(matches!(
            fs.authenticate(b"").await,
            Err(ProtocolError::Channel(ChannelError::Disconnected))
        ));
        assert_eq!(server.close_reason().as_deref(), Some("failed to send commitment"));
    }
}
