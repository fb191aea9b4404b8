//! Public facade over the configured protocol flavor.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use zkp_transport::ChannelConnector;

use crate::binding::{
    BindingAuthenticator, BindingBackend, BindingClient, DeviceBindingDelegate, PairingOptions,
};
use crate::config::ClientConfig;
use crate::errors::{BindingError, ProtocolError};
use crate::flavor::{ZeroKnowledgeProtocol, ZkpFlavor};
use crate::keys::DeviceSecretSource;
use crate::protocol::{ProtocolContext, RegistrationOutcome, SessionHandle, SessionOutcome};
use crate::registration::Registrar;
use crate::store::SecretStore;

/// External collaborators the client is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub device: Arc<dyn DeviceSecretSource>,
    pub store: Arc<dyn SecretStore>,
    pub connector: Arc<dyn ChannelConnector>,
    pub registrar: Arc<dyn Registrar>,
}

pub struct ZkpClient {
    flavor: ZkpFlavor,
    protocol: ZeroKnowledgeProtocol,
    pairing: PairingOptions,
    pairing_timeout: Duration,
    binding_payload: Vec<u8>,
}

impl ZkpClient {
    /// Validate `config` and build the client for `user_id`.
    pub fn new(
        user_id: impl Into<String>,
        config: &ClientConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let flavor = config.protocol.flavor()?;
        let ctx = ProtocolContext {
            user_id: user_id.into(),
            api: config.api.clone(),
            response_timeout: config.timeouts.response(),
            device: collaborators.device,
            store: collaborators.store,
            connector: collaborators.connector,
            registrar: collaborators.registrar,
        };
        let mut client = Self::with_flavor(flavor, ctx);
        client.pairing.max_message_len = config.pairing.max_message_len;
        client.pairing_timeout = config.timeouts.pairing();
        Ok(client)
    }

    /// Build without configuration checks.
    pub fn with_flavor(flavor: ZkpFlavor, ctx: ProtocolContext) -> Self {
        info!(flavor = flavor.name(), user_id = %ctx.user_id, "zkp client ready");
        Self {
            flavor,
            protocol: flavor.build(ctx),
            pairing: PairingOptions::default(),
            pairing_timeout: Duration::from_secs(120),
            binding_payload: Vec::new(),
        }
    }

    pub fn flavor(&self) -> ZkpFlavor {
        self.flavor
    }

    /// Label offered to the peer during pairing.
    pub fn set_device_name(&mut self, name: impl Into<String>) {
        self.pairing.device_name = Some(name.into());
    }

    /// Application payload sent with binding requests made during pairing.
    /// Empty unless set.
    pub fn set_binding_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.binding_payload = payload.into();
    }

    pub fn pairing_options(&self) -> &PairingOptions {
        &self.pairing
    }

    pub async fn send_registration(&self, payload: &[u8]) -> Result<RegistrationOutcome, ProtocolError> {
        self.protocol.register(payload).await
    }

    pub async fn send_authentication(&self, payload: &[u8]) -> Result<SessionHandle, ProtocolError> {
        self.protocol.authenticate(payload).await
    }

    pub async fn send_device_binding(
        &self,
        payload: &[u8],
        other_device_key: &[u8],
    ) -> Result<SessionHandle, ProtocolError> {
        self.protocol.bind_device(payload, other_device_key).await
    }

    /// Generate, persist and return this device's serialized public key.
    pub async fn get_device_public_key(&self) -> Result<Vec<u8>, ProtocolError> {
        self.protocol.fetch_device_key().await
    }

    pub async fn store_new_device_public_key(&self, key: &[u8]) -> Result<(), ProtocolError> {
        self.protocol.store_device_key(key).await
    }

    /// Pairing context for the already-registered device.
    pub fn authenticator(
        self: &Arc<Self>,
        discovery_uri: &str,
        delegate: Arc<dyn DeviceBindingDelegate>,
    ) -> Result<BindingAuthenticator, BindingError> {
        BindingAuthenticator::new(
            discovery_uri,
            self.pairing.clone(),
            self.pairing_timeout,
            self.clone(),
            delegate,
        )
    }

    /// Pairing context for the new device. Generates the key it will offer;
    /// the key is stored only when the binding finishes.
    pub async fn pairing_client(
        self: &Arc<Self>,
        delegate: Arc<dyn DeviceBindingDelegate>,
    ) -> Result<BindingClient, ProtocolError> {
        let device_key = self.protocol.offer_device_key().await?;
        Ok(BindingClient::new(
            device_key,
            self.pairing.clone(),
            self.pairing_timeout,
            self.clone(),
            delegate,
        ))
    }
}

#[async_trait]
impl BindingBackend for ZkpClient {
    async fn bind_device(&self, other_device_key: &[u8]) -> Result<(), BindingError> {
        let session = self
            .send_device_binding(&self.binding_payload, other_device_key)
            .await?;
        match session.outcome().await? {
            SessionOutcome::Verified => {
                debug!(key_len = other_device_key.len(), "verifier accepted the new device");
                Ok(())
            }
            SessionOutcome::Rejected => Err(BindingError::Protocol(
                "verifier rejected the binding request".to_string(),
            )),
        }
    }

    async fn store_device_key(&self, key: &[u8]) -> Result<(), BindingError> {
        Ok(self.store_new_device_public_key(key).await?)
    }
}
