//! Binding contexts: a state machine plus the collaborators it reports to.
//!
//! The context performs the protocol-side effects (vouching for the new key,
//! persisting it, notifying the delegate) and hands transport effects back to
//! the caller, who owns the radio. Callers that feed events through
//! `handle_next` get the pairing deadline enforced for them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::{
    AuthenticatorMachine, AuthenticatorState, BindingEffect, BindingEvent, ClientMachine, ClientState,
    DiscoveryUri, PairingOptions,
};
use crate::errors::BindingError;

/// User-facing outcome callbacks.
pub trait DeviceBindingDelegate: Send + Sync {
    fn device_binding_did_succeed(&self);
    fn device_binding_did_fail(&self, error: &BindingError);
}

/// Protocol operations a binding needs.
#[async_trait]
pub trait BindingBackend: Send + Sync {
    /// Vouch for `other_device_key` with the verifier and wait for the verdict.
    async fn bind_device(&self, other_device_key: &[u8]) -> Result<(), BindingError>;

    /// Persist a serialized public key as this device's key.
    async fn store_device_key(&self, key: &[u8]) -> Result<(), BindingError>;
}

// ============================================================================
// Authenticator
// ============================================================================

pub struct BindingAuthenticator {
    machine: AuthenticatorMachine,
    backend: Arc<dyn BindingBackend>,
    delegate: Arc<dyn DeviceBindingDelegate>,
    deadline: Instant,
    finished: bool,
}

impl BindingAuthenticator {
    /// Prepare to bind the device advertising `discovery_uri`.
    pub fn new(
        discovery_uri: &str,
        options: PairingOptions,
        timeout: Duration,
        backend: Arc<dyn BindingBackend>,
        delegate: Arc<dyn DeviceBindingDelegate>,
    ) -> Result<Self, BindingError> {
        let target = DiscoveryUri::parse(discovery_uri)?;
        Ok(Self {
            machine: AuthenticatorMachine::new(target, options),
            backend,
            delegate,
            deadline: Instant::now() + timeout,
            finished: false,
        })
    }

    pub fn state(&self) -> &AuthenticatorState {
        self.machine.state()
    }

    /// `handle_next` feeds `BindingEvent::Timeout` once this passes.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Success or failure was already reported to the delegate.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn start(&mut self) -> Vec<BindingEffect> {
        self.machine.start()
    }

    /// Wait for the next transport event and process it.
    pub async fn handle_next(&mut self, events: &mut mpsc::Receiver<BindingEvent>) -> Vec<BindingEffect> {
        let event = next_event(events, self.deadline).await;
        self.handle(event).await
    }

    /// Process one transport event; returns the transport effects to perform.
    pub async fn handle(&mut self, event: BindingEvent) -> Vec<BindingEffect> {
        let effects = self.machine.handle(event);
        let mut transport = Vec::new();
        for effect in effects {
            match effect {
                BindingEffect::BindDevice { other_device_key } => {
                    let result = self.backend.bind_device(&other_device_key).await;
                    self.finish(result);
                }
                BindingEffect::Report(e) => warn!(error = %e, "authenticator reported"),
                other if other.is_transport() => transport.push(other),
                other => warn!(effect = ?other, "effect not applicable to the authenticator"),
            }
        }
        if let Some(e) = self.machine.state().error().cloned() {
            self.finish(Err(e));
        }
        transport
    }

    fn finish(&mut self, result: Result<(), BindingError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        match result {
            Ok(()) => {
                info!("device binding succeeded");
                self.delegate.device_binding_did_succeed();
            }
            Err(e) => {
                error!(error = %e, "device binding failed");
                self.delegate.device_binding_did_fail(&e);
            }
        }
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct BindingClient {
    machine: ClientMachine,
    backend: Arc<dyn BindingBackend>,
    delegate: Arc<dyn DeviceBindingDelegate>,
    deadline: Instant,
    finished: bool,
}

impl BindingClient {
    /// Advertise fresh identifiers and offer `device_key` (a serialized public key).
    pub fn new(
        device_key: Vec<u8>,
        options: PairingOptions,
        timeout: Duration,
        backend: Arc<dyn BindingBackend>,
        delegate: Arc<dyn DeviceBindingDelegate>,
    ) -> Self {
        Self {
            machine: ClientMachine::new(DiscoveryUri::generate(), device_key, options),
            backend,
            delegate,
            deadline: Instant::now() + timeout,
            finished: false,
        }
    }

    /// String to show (e.g. as a QR code) to the authenticating device.
    pub fn discovery_uri(&self) -> String {
        self.machine.discovery_uri().to_string()
    }

    pub fn state(&self) -> &ClientState {
        self.machine.state()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn start(&mut self) -> Vec<BindingEffect> {
        self.machine.start()
    }

    pub async fn handle_next(&mut self, events: &mut mpsc::Receiver<BindingEvent>) -> Vec<BindingEffect> {
        let event = next_event(events, self.deadline).await;
        self.handle(event).await
    }

    pub async fn handle(&mut self, event: BindingEvent) -> Vec<BindingEffect> {
        let effects = self.machine.handle(event);
        let mut transport = Vec::new();
        for effect in effects {
            match effect {
                BindingEffect::FinishBinding { device_key } => {
                    let result = self.backend.store_device_key(&device_key).await;
                    self.finish(result);
                }
                BindingEffect::Report(e) => warn!(error = %e, "client reported"),
                other if other.is_transport() => transport.push(other),
                other => warn!(effect = ?other, "effect not applicable to the client"),
            }
        }
        if let Some(e) = self.machine.state().error().cloned() {
            self.finish(Err(e));
        }
        transport
    }

    fn finish(&mut self, result: Result<(), BindingError>) {
        if self.finished {
            return;
        }
        self.finished = true;
        match result {
            Ok(()) => {
                info!("device key delivered and stored");
                self.delegate.device_binding_did_succeed();
            }
            Err(e) => {
                error!(error = %e, "device binding failed");
                self.delegate.device_binding_did_fail(&e);
            }
        }
    }
}

/// Next inbound event, `Timeout` at the deadline, `Disconnected` once the
/// source is gone.
async fn next_event(events: &mut mpsc::Receiver<BindingEvent>, deadline: Instant) -> BindingEvent {
    tokio::select! {
        biased;
        event = events.recv() => event.unwrap_or(BindingEvent::Disconnected),
        () = tokio::time::sleep_until(deadline) => {
            warn!("pairing deadline passed");
            BindingEvent::Timeout
        }
    }
}
