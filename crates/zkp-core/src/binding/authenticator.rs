//! Authenticator role: the registered device that admits a new one.

use bytes::Bytes;
use tracing::{debug, info, warn};

use zkp_crypto::pairing::{EphemeralKeyPair, PairingKey};
use zkp_transport::{ChunkAccumulator, ChunkCodec, SendPlan, TransportFault};

use super::{
    BindingEffect, BindingEvent, BindingMessage, DiscoveryUri, HandshakePayload, MessageType,
    PairingOptions, KEY_REQUEST,
};
use crate::errors::BindingError;
use crate::payloads::PublicKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryStage {
    Scanning,
    Connecting,
    DiscoveringCharacteristic,
}

pub struct SynState {
    keys: EphemeralKeyPair,
    nonce: u64,
    codec: ChunkCodec,
    plan: SendPlan,
    inbox: ChunkAccumulator,
}

pub struct ReceivingPkState {
    key: PairingKey,
    plan: SendPlan,
    inbox: ChunkAccumulator,
}

pub enum AuthenticatorState {
    Idle,
    Discovering { stage: DiscoveryStage },
    Syn(SynState),
    ReceivingPk(ReceivingPkState),
    /// The new device's key arrived; binding is up to the protocol engine.
    Bound {
        other_device_key: Vec<u8>,
        key_fingerprint: [u8; 8],
    },
    SynFailed { error: BindingError },
    Failed { error: BindingError },
}

impl AuthenticatorState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthenticatorState::Idle => "idle",
            AuthenticatorState::Discovering { .. } => "discovering",
            AuthenticatorState::Syn(_) => "syn",
            AuthenticatorState::ReceivingPk(_) => "receiving_pk",
            AuthenticatorState::Bound { .. } => "bound",
            AuthenticatorState::SynFailed { .. } => "syn_failed",
            AuthenticatorState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthenticatorState::Bound { .. }
                | AuthenticatorState::SynFailed { .. }
                | AuthenticatorState::Failed { .. }
        )
    }

    pub fn error(&self) -> Option<&BindingError> {
        match self {
            AuthenticatorState::SynFailed { error } | AuthenticatorState::Failed { error } => Some(error),
            _ => None,
        }
    }
}

impl std::fmt::Debug for AuthenticatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthenticatorState::Discovering { stage } => write!(f, "Discovering({stage:?})"),
            AuthenticatorState::Syn(syn) => write!(f, "Syn(progress={:?})", syn.plan.progress()),
            AuthenticatorState::ReceivingPk(rx) => {
                write!(f, "ReceivingPk(progress={:?})", rx.plan.progress())
            }
            AuthenticatorState::Bound { other_device_key, .. } => {
                write!(f, "Bound(key_len={})", other_device_key.len())
            }
            AuthenticatorState::SynFailed { error } => write!(f, "SynFailed({error})"),
            AuthenticatorState::Failed { error } => write!(f, "Failed({error})"),
            AuthenticatorState::Idle => f.write_str("Idle"),
        }
    }
}

/// Drives the authenticator side of a binding attempt.
pub struct AuthenticatorMachine {
    target: DiscoveryUri,
    options: PairingOptions,
    state: AuthenticatorState,
}

impl AuthenticatorMachine {
    pub fn new(target: DiscoveryUri, options: PairingOptions) -> Self {
        Self {
            target,
            options,
            state: AuthenticatorState::Idle,
        }
    }

    pub fn state(&self) -> &AuthenticatorState {
        &self.state
    }

    pub fn target(&self) -> &DiscoveryUri {
        &self.target
    }

    /// Begin scanning for the advertised service.
    pub fn start(&mut self) -> Vec<BindingEffect> {
        if !matches!(self.state, AuthenticatorState::Idle) {
            return Vec::new();
        }
        self.state = AuthenticatorState::Discovering {
            stage: DiscoveryStage::Scanning,
        };
        info!(service_id = %self.target.service_id, "scanning for binding peer");
        vec![BindingEffect::StartScan {
            service_id: self.target.service_id,
        }]
    }

    pub fn handle(&mut self, event: BindingEvent) -> Vec<BindingEffect> {
        let current = std::mem::replace(&mut self.state, AuthenticatorState::Idle);
        let from = current.name();
        let (next, effects) = self.transition(current, event);
        if next.name() != from {
            debug!(from, to = next.name(), "authenticator transition");
        }
        self.state = next;
        effects
    }

    fn transition(
        &self,
        state: AuthenticatorState,
        event: BindingEvent,
    ) -> (AuthenticatorState, Vec<BindingEffect>) {
        use AuthenticatorState as S;

        if state.is_terminal() {
            return (state, Vec::new());
        }

        match (state, event) {
            (S::Syn(_), BindingEvent::Disconnected) => syn_failed(BindingError::Disconnected),
            (S::Syn(_), BindingEvent::Timeout) => syn_failed(BindingError::Timeout),
            (_, BindingEvent::Disconnected) => failed(BindingError::Disconnected),
            (_, BindingEvent::Timeout) => failed(BindingError::Timeout),

            (S::Discovering { stage: DiscoveryStage::Scanning }, BindingEvent::AdvertisementDiscovered { service_ids }) => {
                let matching = service_ids
                    .iter()
                    .filter(|id| **id == self.target.service_id)
                    .count();
                if matching == 1 {
                    info!("binding peer found; connecting");
                    (
                        S::Discovering { stage: DiscoveryStage::Connecting },
                        vec![BindingEffect::StopScan, BindingEffect::Connect],
                    )
                } else {
                    (S::Discovering { stage: DiscoveryStage::Scanning }, Vec::new())
                }
            }

            (S::Discovering { stage: DiscoveryStage::Connecting }, BindingEvent::Connected) => (
                S::Discovering { stage: DiscoveryStage::DiscoveringCharacteristic },
                vec![BindingEffect::DiscoverCharacteristic {
                    service_id: self.target.service_id,
                    characteristic_id: self.target.characteristic_id,
                }],
            ),

            (
                S::Discovering { stage: DiscoveryStage::DiscoveringCharacteristic },
                BindingEvent::CharacteristicDiscovered { max_write_len },
            ) => match self.enter_syn(max_write_len) {
                Ok((syn, first)) => {
                    let mut effects = vec![BindingEffect::Subscribe {
                        characteristic_id: self.target.characteristic_id,
                    }];
                    effects.extend(first.map(BindingEffect::SendChunk));
                    (S::Syn(syn), effects)
                }
                Err(error) => syn_failed(error),
            },

            (S::Syn(syn), event) => self.on_syn(syn, event),
            (S::ReceivingPk(rx), event) => on_receiving_pk(rx, event),

            (state, event) => {
                debug!(state = state.name(), ?event, "ignoring event");
                (state, Vec::new())
            }
        }
    }

    fn enter_syn(&self, max_write_len: usize) -> Result<(SynState, Option<Bytes>), BindingError> {
        let codec = ChunkCodec::new(max_write_len).map_err(send_error)?;
        let keys = EphemeralKeyPair::generate();
        let nonce = rand::random::<u64>();
        let body = HandshakePayload {
            nonce,
            public_key: keys.public_key_bytes().to_vec(),
            device_name: self.options.device_name.clone(),
        }
        .encode()?;
        let chunks = codec
            .encode_json(&BindingMessage::new(MessageType::Syn, body))
            .map_err(send_error)?;
        info!(mtu = max_write_len, chunks = chunks.len(), "sending SYN");

        let (plan, first) = SendPlan::new(chunks).poll();
        Ok((
            SynState {
                keys,
                nonce,
                codec,
                plan,
                inbox: ChunkAccumulator::new(self.options.max_message_len),
            },
            first,
        ))
    }

    fn on_syn(&self, mut syn: SynState, event: BindingEvent) -> (AuthenticatorState, Vec<BindingEffect>) {
        match event {
            BindingEvent::ChunkSent(result) => match advance(syn.plan, result) {
                Ok((plan, effects)) => {
                    syn.plan = plan;
                    (AuthenticatorState::Syn(syn), effects)
                }
                Err(error) => syn_failed(error),
            },
            BindingEvent::ReadyToSendMore => {
                let (plan, effects) = resume(syn.plan);
                syn.plan = plan;
                (AuthenticatorState::Syn(syn), effects)
            }
            BindingEvent::ValueReceived(Err(TransportFault::Disconnected)) => {
                syn_failed(BindingError::Disconnected)
            }
            BindingEvent::ValueReceived(Err(fault)) => (
                AuthenticatorState::Syn(syn),
                vec![report(BindingError::UnexpectedMessage(format!("read failed: {fault}")))],
            ),
            BindingEvent::ValueReceived(Ok(chunk)) => {
                let message = match syn.inbox.push_json::<BindingMessage>(&chunk) {
                    Ok(None) => return (AuthenticatorState::Syn(syn), Vec::new()),
                    Ok(Some(message)) => message,
                    Err(e) => return (AuthenticatorState::Syn(syn), vec![report(e.into())]),
                };
                self.on_ack(syn, message)
            }
            other => {
                debug!(event = ?other, "ignoring event in SYN");
                (AuthenticatorState::Syn(syn), Vec::new())
            }
        }
    }

    fn on_ack(&self, syn: SynState, message: BindingMessage) -> (AuthenticatorState, Vec<BindingEffect>) {
        if message.message_type != MessageType::Ack {
            return syn_failed(BindingError::UnexpectedMessage(format!(
                "expected ack, got {:?}",
                message.message_type
            )));
        }
        let ack = match HandshakePayload::decode(&message.payload) {
            Ok(ack) => ack,
            Err(error) => return syn_failed(error),
        };
        let expected = syn.nonce.wrapping_add(1);
        if ack.nonce != expected {
            warn!(expected, received = ack.nonce, "ack nonce mismatch");
            return syn_failed(BindingError::ReceivedWrongAckNumber {
                expected,
                received: ack.nonce,
            });
        }

        let SynState { keys, codec, inbox, .. } = syn;
        let key = match keys.agree(&ack.public_key) {
            Ok(key) => key,
            Err(e) => return syn_failed(e.into()),
        };
        info!(fingerprint = %hex::encode(key.fingerprint()), "pairing key agreed; requesting public key");

        let request = key
            .seal(KEY_REQUEST)
            .map_err(BindingError::from)
            .and_then(|sealed| {
                codec
                    .encode_json(&BindingMessage::new(MessageType::WaitingForPk, sealed))
                    .map_err(send_error)
            });
        let chunks = match request {
            Ok(chunks) => chunks,
            Err(error) => return failed(error),
        };
        let (plan, first) = SendPlan::new(chunks).poll();
        (
            AuthenticatorState::ReceivingPk(ReceivingPkState { key, plan, inbox }),
            first.map(BindingEffect::SendChunk).into_iter().collect(),
        )
    }
}

fn on_receiving_pk(mut rx: ReceivingPkState, event: BindingEvent) -> (AuthenticatorState, Vec<BindingEffect>) {
    match event {
        BindingEvent::ChunkSent(result) => match advance(rx.plan, result) {
            Ok((plan, effects)) => {
                rx.plan = plan;
                (AuthenticatorState::ReceivingPk(rx), effects)
            }
            Err(error) => failed(error),
        },
        BindingEvent::ReadyToSendMore => {
            let (plan, effects) = resume(rx.plan);
            rx.plan = plan;
            (AuthenticatorState::ReceivingPk(rx), effects)
        }
        BindingEvent::ValueReceived(Err(TransportFault::Disconnected)) => failed(BindingError::Disconnected),
        BindingEvent::ValueReceived(Err(fault)) => (
            AuthenticatorState::ReceivingPk(rx),
            vec![report(BindingError::UnexpectedMessage(format!("read failed: {fault}")))],
        ),
        BindingEvent::ValueReceived(Ok(chunk)) => {
            let message = match rx.inbox.push_json::<BindingMessage>(&chunk) {
                Ok(None) => return (AuthenticatorState::ReceivingPk(rx), Vec::new()),
                Ok(Some(message)) => message,
                Err(e) => return (AuthenticatorState::ReceivingPk(rx), vec![report(e.into())]),
            };
            if message.message_type != MessageType::SendingPk {
                let error = BindingError::UnexpectedMessage(format!(
                    "expected sendingPK, got {:?}",
                    message.message_type
                ));
                return (AuthenticatorState::ReceivingPk(rx), vec![report(error)]);
            }
            let other_device_key = match rx.key.open(&message.payload) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!("could not decrypt peer public key");
                    return (AuthenticatorState::ReceivingPk(rx), vec![report(e.into())]);
                }
            };
            if let Err(e) = PublicKey::from_bytes(&other_device_key) {
                let error = BindingError::MalformedMessage(format!("peer public key: {e}"));
                return (AuthenticatorState::ReceivingPk(rx), vec![report(error)]);
            }

            info!(key_len = other_device_key.len(), "received peer public key");
            (
                AuthenticatorState::Bound {
                    other_device_key: other_device_key.clone(),
                    key_fingerprint: rx.key.fingerprint(),
                },
                vec![BindingEffect::BindDevice { other_device_key }],
            )
        }
        other => {
            debug!(event = ?other, "ignoring event while receiving public key");
            (AuthenticatorState::ReceivingPk(rx), Vec::new())
        }
    }
}

// ============================================================================
// Helpers shared with the client role
// ============================================================================

/// Apply a write outcome and pick the next chunk.
///
/// Backpressure parks the chunk until `ReadyToSendMore`; any other fault is
/// fatal for the current phase.
pub(super) fn advance(
    plan: SendPlan,
    result: Result<(), TransportFault>,
) -> Result<(SendPlan, Vec<BindingEffect>), BindingError> {
    match result {
        Ok(()) => Ok(resume(plan.acknowledge())),
        Err(TransportFault::Backpressure) => {
            debug!("transport backpressure; waiting for ready signal");
            Ok((plan.rejected(), Vec::new()))
        }
        Err(fault) => Err(BindingError::FailedToSendData(fault)),
    }
}

pub(super) fn resume(plan: SendPlan) -> (SendPlan, Vec<BindingEffect>) {
    let (plan, chunk) = plan.poll();
    (plan, chunk.map(BindingEffect::SendChunk).into_iter().collect())
}

pub(super) fn send_error(e: zkp_transport::FramingError) -> BindingError {
    BindingError::FailedToSendData(TransportFault::WriteFailed(e.to_string()))
}

pub(super) fn report(error: BindingError) -> BindingEffect {
    warn!(%error, "binding problem reported");
    BindingEffect::Report(error)
}

fn syn_failed(error: BindingError) -> (AuthenticatorState, Vec<BindingEffect>) {
    warn!(%error, "SYN phase failed");
    (AuthenticatorState::SynFailed { error }, Vec::new())
}

fn failed(error: BindingError) -> (AuthenticatorState, Vec<BindingEffect>) {
    warn!(%error, "authenticator failed");
    (AuthenticatorState::Failed { error }, Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use zkp_transport::EOF_MARKER;

    fn machine() -> AuthenticatorMachine {
        AuthenticatorMachine::new(DiscoveryUri::generate(), PairingOptions::default())
    }

    /// Drive the machine up to the SYN state and return the SYN chunks.
    fn into_syn(m: &mut AuthenticatorMachine, mtu: usize) -> Vec<Bytes> {
        m.start();
        let service_id = m.target().service_id;
        m.handle(BindingEvent::AdvertisementDiscovered {
            service_ids: vec![service_id],
        });
        m.handle(BindingEvent::Connected);
        let mut effects = m.handle(BindingEvent::CharacteristicDiscovered { max_write_len: mtu });
        let mut sent = Vec::new();
        loop {
            let chunk = effects.iter().find_map(|e| match e {
                BindingEffect::SendChunk(c) => Some(c.clone()),
                _ => None,
            });
            match chunk {
                Some(c) => {
                    sent.push(c);
                    effects = m.handle(BindingEvent::ChunkSent(Ok(())));
                }
                None => break,
            }
        }
        sent
    }

    fn syn_nonce(chunks: &[Bytes]) -> u64 {
        let mut acc = ChunkAccumulator::default();
        let mut msg = None;
        for c in chunks {
            if let Some(m) = acc.push_json::<BindingMessage>(c).unwrap() {
                msg = Some(m);
            }
        }
        HandshakePayload::decode(&msg.unwrap().payload).unwrap().nonce
    }

    fn ack_chunks(nonce: u64, public_key: Vec<u8>) -> Vec<Bytes> {
        let body = HandshakePayload {
            nonce,
            public_key,
            device_name: None,
        }
        .encode()
        .unwrap();
        ChunkCodec::new(20)
            .unwrap()
            .encode_json(&BindingMessage::new(MessageType::Ack, body))
            .unwrap()
    }

    #[test]
    fn test_discovery_sequence() {
        let mut m = machine();
        let service_id = m.target().service_id;
        assert_eq!(m.start(), vec![BindingEffect::StartScan { service_id }]);

        // Ambiguous or unrelated advertisements are ignored
        let effects = m.handle(BindingEvent::AdvertisementDiscovered {
            service_ids: vec![service_id, service_id],
        });
        assert!(effects.is_empty());
        let effects = m.handle(BindingEvent::AdvertisementDiscovered {
            service_ids: vec![uuid::Uuid::new_v4()],
        });
        assert!(effects.is_empty());

        let effects = m.handle(BindingEvent::AdvertisementDiscovered {
            service_ids: vec![service_id],
        });
        assert_eq!(effects, vec![BindingEffect::StopScan, BindingEffect::Connect]);
        let effects = m.handle(BindingEvent::Connected);
        assert!(matches!(effects[0], BindingEffect::DiscoverCharacteristic { .. }));

        let effects = m.handle(BindingEvent::CharacteristicDiscovered { max_write_len: 20 });
        assert!(matches!(effects[0], BindingEffect::Subscribe { .. }));
        assert!(matches!(&effects[1], BindingEffect::SendChunk(c) if c.len() <= 20));
        assert!(matches!(m.state(), AuthenticatorState::Syn(_)));
    }

    #[test]
    fn test_syn_is_flow_controlled() {
        let mut m = machine();
        m.start();
        let service_id = m.target().service_id;
        m.handle(BindingEvent::AdvertisementDiscovered { service_ids: vec![service_id] });
        m.handle(BindingEvent::Connected);
        let effects = m.handle(BindingEvent::CharacteristicDiscovered { max_write_len: 16 });
        let first = effects[1].clone();

        // Nothing new is sent while the first chunk is pending
        assert!(m.handle(BindingEvent::ReadyToSendMore).is_empty());

        // Backpressure parks the chunk; readiness resends the same chunk
        assert!(m.handle(BindingEvent::ChunkSent(Err(TransportFault::Backpressure))).is_empty());
        assert_eq!(m.handle(BindingEvent::ReadyToSendMore), vec![first.clone()]);

        let next = m.handle(BindingEvent::ChunkSent(Ok(())));
        assert_eq!(next.len(), 1);
        assert_ne!(next[0], first);
    }

    #[test]
    fn test_write_failure_in_syn() {
        let mut m = machine();
        m.start();
        let service_id = m.target().service_id;
        m.handle(BindingEvent::AdvertisementDiscovered { service_ids: vec![service_id] });
        m.handle(BindingEvent::Connected);
        m.handle(BindingEvent::CharacteristicDiscovered { max_write_len: 20 });
        m.handle(BindingEvent::ChunkSent(Err(TransportFault::WriteFailed("gatt".into()))));
        assert!(matches!(
            m.state(),
            AuthenticatorState::SynFailed {
                error: BindingError::FailedToSendData(_)
            }
        ));
        // Terminal
        assert!(m.handle(BindingEvent::ReadyToSendMore).is_empty());
    }

    #[test]
    fn test_wrong_ack_nonce_fails_syn() {
        let mut m = machine();
        let syn = into_syn(&mut m, 20);
        let nonce = syn_nonce(&syn);
        let peer = EphemeralKeyPair::generate();

        for chunk in ack_chunks(nonce.wrapping_add(2), peer.public_key_bytes().to_vec()) {
            m.handle(BindingEvent::ValueReceived(Ok(chunk)));
        }
        match m.state() {
            AuthenticatorState::SynFailed {
                error: BindingError::ReceivedWrongAckNumber { expected, received },
            } => {
                assert_eq!(*expected, nonce.wrapping_add(1));
                assert_eq!(*received, nonce.wrapping_add(2));
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_malformed_message_is_reported_not_fatal() {
        let mut m = machine();
        into_syn(&mut m, 20);
        m.handle(BindingEvent::ValueReceived(Ok(Bytes::from_static(b"{garbage"))));
        let effects = m.handle(BindingEvent::ValueReceived(Ok(Bytes::from_static(EOF_MARKER))));
        assert!(matches!(
            effects.as_slice(),
            [BindingEffect::Report(BindingError::MalformedMessage(_))]
        ));
        assert!(matches!(m.state(), AuthenticatorState::Syn(_)));
    }

    #[test]
    fn test_valid_ack_moves_to_receiving_pk() {
        let mut m = machine();
        let syn = into_syn(&mut m, 20);
        let nonce = syn_nonce(&syn);
        let peer = EphemeralKeyPair::generate();

        let mut last = Vec::new();
        for chunk in ack_chunks(nonce.wrapping_add(1), peer.public_key_bytes().to_vec()) {
            last = m.handle(BindingEvent::ValueReceived(Ok(chunk)));
        }
        assert!(matches!(m.state(), AuthenticatorState::ReceivingPk(_)));
        assert!(matches!(last.as_slice(), [BindingEffect::SendChunk(_)]));
    }

    #[test]
    fn test_disconnect_and_timeout() {
        let mut m = machine();
        m.start();
        m.handle(BindingEvent::Timeout);
        assert!(matches!(
            m.state(),
            AuthenticatorState::Failed { error: BindingError::Timeout }
        ));

        let mut m = machine();
        into_syn(&mut m, 20);
        m.handle(BindingEvent::Disconnected);
        assert_eq!(m.state().error(), Some(&BindingError::Disconnected));
        assert!(matches!(m.state(), AuthenticatorState::SynFailed { .. }));
    }
}
