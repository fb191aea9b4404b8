//! In-memory pairing: both binding roles wired back to back over two
//! MTU-limited [`ChunkLink`]s.
//!
//! Used by the CLI's `simulate-binding` and by tests. Transport effects are
//! turned into the events a real radio would produce and delivered in FIFO
//! order.

use std::collections::VecDeque;

use tracing::{debug, info, warn};
use uuid::Uuid;

use zkp_transport::testing::ChunkLink;
use zkp_transport::TransportFault;

use crate::binding::{
    AuthenticatorMachine, AuthenticatorState, BindingEffect, BindingEvent, ClientMachine, ClientState,
    DiscoveryUri, PairingOptions,
};
use crate::errors::BindingError;

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    /// Maximum write length of both links.
    pub mtu: usize,
    /// Refuse one write after every `n` accepted ones.
    pub backpressure_every: Option<usize>,
    /// Name the authenticator announces in its SYN.
    pub device_name: Option<String>,
    pub max_message_len: usize,
    /// Give up after this many delivered events.
    pub max_steps: usize,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            mtu: 20,
            backpressure_every: None,
            device_name: None,
            max_message_len: zkp_transport::DEFAULT_MAX_MESSAGE_LEN,
            max_steps: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingReport {
    /// Key the authenticator received, ready for `bind_device`.
    pub bound_key: Vec<u8>,
    pub authenticator_fingerprint: [u8; 8],
    pub client_fingerprint: [u8; 8],
    /// Name the client saw in the SYN.
    pub peer_name: Option<String>,
    pub authenticator_chunks: usize,
    pub client_chunks: usize,
    pub steps: usize,
}

impl BindingReport {
    /// Both sides derived the same pairing key.
    pub fn keys_match(&self) -> bool {
        self.authenticator_fingerprint == self.client_fingerprint
    }
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Authenticator,
    Client,
}

struct Harness {
    mtu: usize,
    authenticator: AuthenticatorMachine,
    client: ClientMachine,
    to_client: ChunkLink,
    to_authenticator: ChunkLink,
    advertising: Option<Uuid>,
    queue: VecDeque<(Side, BindingEvent)>,
}

/// Run one complete pairing in memory, offering `device_key` from the client side.
pub fn simulate_binding(device_key: Vec<u8>, options: HarnessOptions) -> Result<BindingReport, BindingError> {
    let link = |mtu| match options.backpressure_every {
        Some(n) => ChunkLink::new(mtu).with_backpressure_every(n),
        None => ChunkLink::new(mtu),
    };
    let pairing = PairingOptions {
        max_message_len: options.max_message_len,
        device_name: options.device_name.clone(),
    };

    let client = ClientMachine::new(DiscoveryUri::generate(), device_key, pairing.clone());
    // Same path as a scanned QR code
    let target = DiscoveryUri::parse(&client.discovery_uri().to_string())?;

    let mut harness = Harness {
        mtu: options.mtu,
        authenticator: AuthenticatorMachine::new(target, pairing),
        client,
        to_client: link(options.mtu),
        to_authenticator: link(options.mtu),
        advertising: None,
        queue: VecDeque::new(),
    };

    let effects = harness.client.start();
    harness.apply(Side::Client, effects);
    let effects = harness.authenticator.start();
    harness.apply(Side::Authenticator, effects);

    let mut steps = 0;
    while let Some((side, event)) = harness.queue.pop_front() {
        if steps >= options.max_steps {
            warn!(steps, "pairing simulation did not settle");
            return Err(BindingError::Timeout);
        }
        steps += 1;
        let effects = match side {
            Side::Authenticator => harness.authenticator.handle(event),
            Side::Client => harness.client.handle(event),
        };
        harness.apply(side, effects);
        if harness.authenticator.state().is_terminal() && harness.client.state().is_terminal() {
            break;
        }
    }

    let (bound_key, authenticator_fingerprint) = match harness.authenticator.state() {
        AuthenticatorState::Bound {
            other_device_key,
            key_fingerprint,
        } => (other_device_key.clone(), *key_fingerprint),
        other => return Err(unfinished(other.error(), other.name())),
    };
    let client_fingerprint = match harness.client.state() {
        ClientState::Finished { key_fingerprint } => *key_fingerprint,
        other => return Err(unfinished(other.error(), other.name())),
    };

    let report = BindingReport {
        bound_key,
        authenticator_fingerprint,
        client_fingerprint,
        peer_name: harness.client.peer_name().map(str::to_string),
        authenticator_chunks: harness.to_client.accepted(),
        client_chunks: harness.to_authenticator.accepted(),
        steps,
    };
    info!(
        steps,
        authenticator_chunks = report.authenticator_chunks,
        client_chunks = report.client_chunks,
        fingerprint = %hex::encode(report.client_fingerprint),
        "pairing simulation finished"
    );
    Ok(report)
}

fn unfinished(error: Option<&BindingError>, state: &str) -> BindingError {
    match error {
        Some(error) => error.clone(),
        None => BindingError::Protocol(format!("pairing stalled in state {state}")),
    }
}

impl Harness {
    fn apply(&mut self, side: Side, effects: Vec<BindingEffect>) {
        for effect in effects {
            self.perform(side, effect);
        }
    }

    fn perform(&mut self, side: Side, effect: BindingEffect) {
        use BindingEffect as E;
        use Side::{Authenticator as A, Client as C};

        match (side, effect) {
            (C, E::StartAdvertising { service_id, .. }) => self.advertising = Some(service_id),
            (C, E::StopAdvertising) => self.advertising = None,
            (A, E::StartScan { .. }) => {
                let service_ids = self.advertising.into_iter().collect();
                self.queue
                    .push_back((A, BindingEvent::AdvertisementDiscovered { service_ids }));
            }
            (A, E::StopScan) => {}
            (A, E::Connect) => self.queue.push_back((A, BindingEvent::Connected)),
            (A, E::DiscoverCharacteristic { .. }) => self.queue.push_back((
                A,
                BindingEvent::CharacteristicDiscovered { max_write_len: self.mtu },
            )),
            (A, E::Subscribe { .. }) => self
                .queue
                .push_back((C, BindingEvent::Subscribed { max_write_len: self.mtu })),
            (side, E::SendChunk(chunk)) => {
                let (link, peer) = match side {
                    A => (&mut self.to_client, C),
                    C => (&mut self.to_authenticator, A),
                };
                match link.write(chunk) {
                    Ok(()) => {
                        if let Some(delivered) = link.take_delivered() {
                            self.queue.push_back((peer, BindingEvent::ValueReceived(Ok(delivered))));
                        }
                        self.queue.push_back((side, BindingEvent::ChunkSent(Ok(()))));
                    }
                    Err(TransportFault::Backpressure) => {
                        self.queue
                            .push_back((side, BindingEvent::ChunkSent(Err(TransportFault::Backpressure))));
                        self.queue.push_back((side, BindingEvent::ReadyToSendMore));
                    }
                    Err(fault) => self.queue.push_back((side, BindingEvent::ChunkSent(Err(fault)))),
                }
            }
            (C, E::RespondToWrite) => {}
            (A, E::BindDevice { other_device_key }) => {
                debug!(key_len = other_device_key.len(), "authenticator ready to bind")
            }
            (C, E::FinishBinding { device_key }) => {
                debug!(key_len = device_key.len(), "client delivered its key")
            }
            (_, E::Report(error)) => warn!(?side, error = %error, "binding reported"),
            (side, effect) => warn!(?side, ?effect, "effect has no meaning for this side"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pairing_converges() {
        let key = br#"{"vKey":"AQ==","nKey":"Ag=="}"#.to_vec();
        let report = simulate_binding(key.clone(), HarnessOptions::default()).unwrap();
        assert_eq!(report.bound_key, key);
        assert!(report.keys_match());
        assert!(report.authenticator_chunks > 2);
        assert!(report.client_chunks > 2);
    }

    #[test]
    fn test_step_cap() {
        let options = HarnessOptions {
            max_steps: 3,
            ..HarnessOptions::default()
        };
        assert_eq!(simulate_binding(b"{}".to_vec(), options), Err(BindingError::Timeout));
    }

    #[test]
    fn test_mtu_too_small_for_codec_fails() {
        let options = HarnessOptions {
            mtu: 0,
            ..HarnessOptions::default()
        };
        let error = simulate_binding(b"{}".to_vec(), options).unwrap_err();
        assert!(matches!(error, BindingError::FailedToSendData(_)));
    }
}
