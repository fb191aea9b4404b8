//! Client role: the new device handing its public key to the authenticator.

use tracing::{debug, info, warn};

use zkp_crypto::pairing::{EphemeralKeyPair, PairingKey};
use zkp_transport::{ChunkAccumulator, ChunkCodec, SendPlan, TransportFault};

use super::authenticator::{advance, report, resume, send_error};
use super::{
    BindingEffect, BindingEvent, BindingMessage, DiscoveryUri, HandshakePayload, MessageType,
    PairingOptions, KEY_REQUEST,
};
use crate::errors::BindingError;

/// ACK reply in flight; the key is handed on once it is fully written.
pub struct PendingAck {
    key: PairingKey,
    plan: SendPlan,
}

pub struct AckState {
    codec: ChunkCodec,
    inbox: ChunkAccumulator,
    reply: Option<PendingAck>,
}

pub struct SharingPkState {
    key: PairingKey,
    plan: SendPlan,
    inbox: ChunkAccumulator,
}

pub enum ClientState {
    Idle,
    /// Advertising; waiting for the authenticator to subscribe.
    SynPending,
    Ack(AckState),
    SharingPk(SharingPkState),
    Finished { key_fingerprint: [u8; 8] },
    Failed { error: BindingError },
}

impl ClientState {
    pub fn name(&self) -> &'static str {
        match self {
            ClientState::Idle => "idle",
            ClientState::SynPending => "syn_pending",
            ClientState::Ack(_) => "ack",
            ClientState::SharingPk(_) => "sharing_pk",
            ClientState::Finished { .. } => "finished",
            ClientState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ClientState::Finished { .. } | ClientState::Failed { .. })
    }

    pub fn error(&self) -> Option<&BindingError> {
        match self {
            ClientState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientState::Ack(ack) => write!(f, "Ack(replying={})", ack.reply.is_some()),
            ClientState::SharingPk(tx) => write!(f, "SharingPk(progress={:?})", tx.plan.progress()),
            ClientState::Failed { error } => write!(f, "Failed({error})"),
            other => f.write_str(other.name()),
        }
    }
}

/// Drives the client side of a binding attempt.
pub struct ClientMachine {
    advertised: DiscoveryUri,
    device_key: Vec<u8>,
    options: PairingOptions,
    peer_name: Option<String>,
    state: ClientState,
}

impl ClientMachine {
    /// `device_key` is this device's serialized Fiat-Shamir public key.
    pub fn new(advertised: DiscoveryUri, device_key: Vec<u8>, options: PairingOptions) -> Self {
        Self {
            advertised,
            device_key,
            options,
            peer_name: None,
            state: ClientState::Idle,
        }
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn discovery_uri(&self) -> &DiscoveryUri {
        &self.advertised
    }

    /// Name the authenticator announced in its SYN, if any.
    pub fn peer_name(&self) -> Option<&str> {
        self.peer_name.as_deref()
    }

    /// Begin advertising the pairing service.
    pub fn start(&mut self) -> Vec<BindingEffect> {
        if !matches!(self.state, ClientState::Idle) {
            return Vec::new();
        }
        self.state = ClientState::SynPending;
        info!(service_id = %self.advertised.service_id, "advertising binding service");
        vec![BindingEffect::StartAdvertising {
            service_id: self.advertised.service_id,
            characteristic_id: self.advertised.characteristic_id,
        }]
    }

    pub fn handle(&mut self, event: BindingEvent) -> Vec<BindingEffect> {
        // Every write needs a response, whatever the state
        let mut effects = Vec::new();
        if matches!(event, BindingEvent::ValueReceived(Ok(_))) {
            effects.push(BindingEffect::RespondToWrite);
        }

        let current = std::mem::replace(&mut self.state, ClientState::Idle);
        let from = current.name();
        let (next, more) = self.transition(current, event);
        if next.name() != from {
            debug!(from, to = next.name(), "client transition");
        }
        self.state = next;
        effects.extend(more);
        effects
    }

    fn transition(&mut self, state: ClientState, event: BindingEvent) -> (ClientState, Vec<BindingEffect>) {
        if state.is_terminal() {
            return (state, Vec::new());
        }

        match (state, event) {
            (_, BindingEvent::Disconnected) => failed(BindingError::Disconnected),
            (_, BindingEvent::Timeout) => failed(BindingError::Timeout),

            (ClientState::SynPending, BindingEvent::Subscribed { max_write_len }) => {
                match ChunkCodec::new(max_write_len) {
                    Ok(codec) => {
                        info!(mtu = max_write_len, "authenticator subscribed; awaiting SYN");
                        (
                            ClientState::Ack(AckState {
                                codec,
                                inbox: ChunkAccumulator::new(self.options.max_message_len),
                                reply: None,
                            }),
                            vec![BindingEffect::StopAdvertising],
                        )
                    }
                    Err(e) => failed(send_error(e)),
                }
            }

            (ClientState::Ack(ack), event) => self.on_ack_state(ack, event),
            (ClientState::SharingPk(tx), event) => self.on_sharing_pk(tx, event),

            (state, event) => {
                debug!(state = state.name(), ?event, "ignoring event");
                (state, Vec::new())
            }
        }
    }

    fn on_ack_state(&mut self, mut ack: AckState, event: BindingEvent) -> (ClientState, Vec<BindingEffect>) {
        match event {
            BindingEvent::ChunkSent(result) => {
                let Some(PendingAck { key, plan }) = ack.reply.take() else {
                    debug!("write completion without a pending reply");
                    return (ClientState::Ack(ack), Vec::new());
                };
                match advance(plan, result) {
                    Ok((plan, _)) if plan.is_complete() => self.enter_sharing_pk(ack, key),
                    Ok((plan, effects)) => {
                        ack.reply = Some(PendingAck { key, plan });
                        (ClientState::Ack(ack), effects)
                    }
                    Err(error) => failed(error),
                }
            }
            BindingEvent::ReadyToSendMore => {
                let Some(PendingAck { key, plan }) = ack.reply.take() else {
                    return (ClientState::Ack(ack), Vec::new());
                };
                let (plan, effects) = resume(plan);
                ack.reply = Some(PendingAck { key, plan });
                (ClientState::Ack(ack), effects)
            }
            BindingEvent::ValueReceived(Err(TransportFault::Disconnected)) => failed(BindingError::Disconnected),
            BindingEvent::ValueReceived(Err(fault)) => (
                ClientState::Ack(ack),
                vec![report(BindingError::UnexpectedMessage(format!("read failed: {fault}")))],
            ),
            BindingEvent::ValueReceived(Ok(chunk)) => {
                let message = match ack.inbox.push_json::<BindingMessage>(&chunk) {
                    Ok(None) => return (ClientState::Ack(ack), Vec::new()),
                    Ok(Some(message)) => message,
                    Err(e) => return (ClientState::Ack(ack), vec![report(e.into())]),
                };
                match message.message_type {
                    MessageType::Syn if ack.reply.is_none() => self.answer_syn(ack, &message.payload),
                    // The request can overtake the tail of our ACK
                    MessageType::WaitingForPk if ack.reply.is_some() => {
                        debug!("key request arrived before ACK completed");
                        (ClientState::Ack(ack), Vec::new())
                    }
                    other => {
                        let error = BindingError::UnexpectedMessage(format!("{other:?} while awaiting SYN"));
                        (ClientState::Ack(ack), vec![report(error)])
                    }
                }
            }
            other => {
                debug!(event = ?other, "ignoring event in ACK");
                (ClientState::Ack(ack), Vec::new())
            }
        }
    }

    fn answer_syn(&mut self, mut ack: AckState, payload: &[u8]) -> (ClientState, Vec<BindingEffect>) {
        let syn = match HandshakePayload::decode(payload) {
            Ok(syn) => syn,
            Err(error) => return (ClientState::Ack(ack), vec![report(error)]),
        };
        self.peer_name = syn.device_name.clone();

        let keys = EphemeralKeyPair::generate();
        let public_key = keys.public_key_bytes().to_vec();
        let key = match keys.agree(&syn.public_key) {
            Ok(key) => key,
            Err(e) => return failed(e.into()),
        };

        let chunks = HandshakePayload {
            nonce: syn.nonce.wrapping_add(1),
            public_key,
            device_name: self.options.device_name.clone(),
        }
        .encode()
        .and_then(|body| {
            ack.codec
                .encode_json(&BindingMessage::new(MessageType::Ack, body))
                .map_err(send_error)
        });
        let chunks = match chunks {
            Ok(chunks) => chunks,
            Err(error) => return failed(error),
        };
        info!(
            peer = self.peer_name.as_deref().unwrap_or("unnamed"),
            fingerprint = %hex::encode(key.fingerprint()),
            "answering SYN"
        );

        let (plan, effects) = resume(SendPlan::new(chunks));
        ack.reply = Some(PendingAck { key, plan });
        (ClientState::Ack(ack), effects)
    }

    fn enter_sharing_pk(&mut self, ack: AckState, key: PairingKey) -> (ClientState, Vec<BindingEffect>) {
        let AckState { codec, inbox, .. } = ack;
        let chunks = key.seal(&self.device_key).map_err(BindingError::from).and_then(|sealed| {
            codec
                .encode_json(&BindingMessage::new(MessageType::SendingPk, sealed))
                .map_err(send_error)
        });
        let chunks = match chunks {
            Ok(chunks) => chunks,
            Err(error) => return failed(error),
        };
        info!(chunks = chunks.len(), "ACK delivered; sending public key");

        let (plan, effects) = resume(SendPlan::new(chunks));
        (ClientState::SharingPk(SharingPkState { key, plan, inbox }), effects)
    }

    /// Serialized key this machine shares.
    pub fn device_key(&self) -> &[u8] {
        &self.device_key
    }

    fn on_sharing_pk(&self, mut tx: SharingPkState, event: BindingEvent) -> (ClientState, Vec<BindingEffect>) {
        match event {
            BindingEvent::ChunkSent(result) => match advance(tx.plan, result) {
                Ok((plan, _)) if plan.is_complete() => {
                    info!("public key delivered");
                    (
                        ClientState::Finished {
                            key_fingerprint: tx.key.fingerprint(),
                        },
                        vec![BindingEffect::FinishBinding {
                            device_key: self.device_key.clone(),
                        }],
                    )
                }
                Ok((plan, effects)) => {
                    tx.plan = plan;
                    (ClientState::SharingPk(tx), effects)
                }
                Err(error) => failed(error),
            },
            BindingEvent::ReadyToSendMore => {
                let (plan, effects) = resume(tx.plan);
                tx.plan = plan;
                (ClientState::SharingPk(tx), effects)
            }
            BindingEvent::ValueReceived(Err(TransportFault::Disconnected)) => failed(BindingError::Disconnected),
            BindingEvent::ValueReceived(Err(fault)) => (
                ClientState::SharingPk(tx),
                vec![report(BindingError::UnexpectedMessage(format!("read failed: {fault}")))],
            ),
            BindingEvent::ValueReceived(Ok(chunk)) => {
                let message = match tx.inbox.push_json::<BindingMessage>(&chunk) {
                    Ok(None) => return (ClientState::SharingPk(tx), Vec::new()),
                    Ok(Some(message)) => message,
                    Err(e) => return (ClientState::SharingPk(tx), vec![report(e.into())]),
                };
                if message.message_type != MessageType::WaitingForPk {
                    let error = BindingError::UnexpectedMessage(format!("{:?} while sharing key", message.message_type));
                    return (ClientState::SharingPk(tx), vec![report(error)]);
                }
                match tx.key.open(&message.payload) {
                    Ok(request) if request == KEY_REQUEST => {
                        debug!("authenticator requested public key");
                        (ClientState::SharingPk(tx), Vec::new())
                    }
                    Ok(_) => {
                        let error = BindingError::UnexpectedMessage("unknown key request".to_string());
                        (ClientState::SharingPk(tx), vec![report(error)])
                    }
                    Err(e) => {
                        warn!("could not decrypt key request");
                        (ClientState::SharingPk(tx), vec![report(e.into())])
                    }
                }
            }
            other => {
                debug!(event = ?other, "ignoring event while sharing key");
                (ClientState::SharingPk(tx), Vec::new())
            }
        }
    }
}

fn failed(error: BindingError) -> (ClientState, Vec<BindingEffect>) {
    warn!(%error, "client failed");
    (ClientState::Failed { error }, Vec::new())
}
