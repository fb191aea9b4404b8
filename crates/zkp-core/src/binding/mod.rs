//! Device binding over a short-range, MTU-limited transport.
//!
//! The already-registered device runs the [`AuthenticatorMachine`]: it scans
//! for the new device, opens a SYN/ACK handshake that agrees on a pairing key,
//! asks for the new device's Fiat-Shamir public key and vouches for it with
//! the verifier. The new device runs the [`ClientMachine`]: it advertises,
//! answers the SYN and sends its public key sealed with the pairing key.
//!
//! Both machines are driven by [`BindingEvent`]s from the transport and
//! answer with [`BindingEffect`]s for the caller to perform. They never touch
//! the transport themselves.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use zkp_transport::TransportFault;

use crate::encoding::base64_bytes;
use crate::errors::BindingError;

mod authenticator;
mod client;
mod context;

pub use authenticator::{AuthenticatorMachine, AuthenticatorState, DiscoveryStage};
pub use client::{ClientMachine, ClientState};
pub use context::{BindingAuthenticator, BindingBackend, BindingClient, DeviceBindingDelegate};

/// Plaintext of the sealed `waitingForPK` request.
pub(crate) const KEY_REQUEST: &[u8] = b"requestPublicKey";

// ============================================================================
// Messages
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "syn")]
    Syn,
    #[serde(rename = "ack")]
    Ack,
    #[serde(rename = "waitingForPK")]
    WaitingForPk,
    #[serde(rename = "sendingPK")]
    SendingPk,
}

/// Unit exchanged over the chunked transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingMessage {
    pub message_type: MessageType,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl BindingMessage {
    pub fn new(message_type: MessageType, payload: Vec<u8>) -> Self {
        Self {
            message_type,
            payload,
        }
    }
}

/// SYN and ACK body. The ACK echoes `nonce + 1` (wrapping).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    pub nonce: u64,
    #[serde(with = "base64_bytes")]
    pub public_key: Vec<u8>,
    /// Label shown to the user on the other device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl HandshakePayload {
    pub(crate) fn encode(&self) -> Result<Vec<u8>, BindingError> {
        serde_json::to_vec(self).map_err(|e| BindingError::MalformedMessage(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, BindingError> {
        serde_json::from_slice(bytes).map_err(|e| BindingError::MalformedMessage(e.to_string()))
    }
}

// ============================================================================
// Events and effects
// ============================================================================

/// Transport callbacks, normalized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingEvent {
    /// Scan results (service identifiers seen in advertisements).
    AdvertisementDiscovered { service_ids: Vec<Uuid> },
    Connected,
    CharacteristicDiscovered { max_write_len: usize },
    /// The central subscribed to the transfer characteristic.
    Subscribed { max_write_len: usize },
    /// One inbound chunk (a write on the client, a notification on the authenticator).
    ValueReceived(Result<Bytes, TransportFault>),
    /// Outcome of the last `SendChunk`.
    ChunkSent(Result<(), TransportFault>),
    /// The transport can take data again after backpressure.
    ReadyToSendMore,
    Disconnected,
    Timeout,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingEffect {
    StartScan { service_id: Uuid },
    StopScan,
    Connect,
    DiscoverCharacteristic { service_id: Uuid, characteristic_id: Uuid },
    Subscribe { characteristic_id: Uuid },
    StartAdvertising { service_id: Uuid, characteristic_id: Uuid },
    StopAdvertising,
    SendChunk(Bytes),
    /// Acknowledge the write that was just received.
    RespondToWrite,
    /// Vouch for the received key with the verifier.
    BindDevice { other_device_key: Vec<u8> },
    /// The key was delivered; persist it as this device's key.
    FinishBinding { device_key: Vec<u8> },
    /// A recoverable problem; the machine keeps its state.
    Report(BindingError),
}

impl BindingEffect {
    /// Effects the transport layer has to carry out.
    pub fn is_transport(&self) -> bool {
        !matches!(
            self,
            BindingEffect::BindDevice { .. } | BindingEffect::FinishBinding { .. } | BindingEffect::Report(_)
        )
    }
}

/// Tuning shared by both roles.
#[derive(Clone, Debug)]
pub struct PairingOptions {
    pub max_message_len: usize,
    pub device_name: Option<String>,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            max_message_len: zkp_transport::DEFAULT_MAX_MESSAGE_LEN,
            device_name: None,
        }
    }
}

// ============================================================================
// Discovery URI
// ============================================================================

pub const DISCOVERY_SCHEME: &str = "device-binding";

/// Out-of-band pairing target, usually shown as a QR code:
/// `device-binding://?serviceID=<uuid>&characteristicID=<uuid>`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiscoveryUri {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
}

impl DiscoveryUri {
    /// Fresh identifiers for one pairing attempt.
    pub fn generate() -> Self {
        Self {
            service_id: Uuid::new_v4(),
            characteristic_id: Uuid::new_v4(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, BindingError> {
        let invalid = |reason: &str| BindingError::InvalidDiscoveryUri(format!("{raw}: {reason}"));
        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
        if url.scheme() != DISCOVERY_SCHEME {
            return Err(invalid("wrong scheme"));
        }

        let mut service_id = None;
        let mut characteristic_id = None;
        for (name, value) in url.query_pairs() {
            let slot = match name.as_ref() {
                "serviceID" => &mut service_id,
                "characteristicID" => &mut characteristic_id,
                _ => continue,
            };
            *slot = Some(Uuid::parse_str(&value).map_err(|e| invalid(&e.to_string()))?);
        }

        Ok(Self {
            service_id: service_id.ok_or_else(|| invalid("missing serviceID"))?,
            characteristic_id: characteristic_id.ok_or_else(|| invalid("missing characteristicID"))?,
        })
    }
}

impl fmt::Display for DiscoveryUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{DISCOVERY_SCHEME}://?serviceID={}&characteristicID={}",
            self.service_id.hyphenated().encode_upper(&mut Uuid::encode_buffer()),
            self.characteristic_id.hyphenated().encode_upper(&mut Uuid::encode_buffer()),
        )
    }
}

impl std::str::FromStr for DiscoveryUri {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_names() {
        let msg = BindingMessage::new(MessageType::WaitingForPk, vec![1]);
        assert_eq!(
            serde_json::to_string(&msg).unwrap(),
            r#"{"messageType":"waitingForPK","payload":"AQ=="}"#
        );
        let back: BindingMessage =
            serde_json::from_str(r#"{"messageType":"sendingPK","payload":""}"#).unwrap();
        assert_eq!(back.message_type, MessageType::SendingPk);
    }

    #[test]
    fn test_discovery_uri_round_trip() {
        let uri = DiscoveryUri::generate();
        let text = uri.to_string();
        assert!(text.starts_with("device-binding://?serviceID="));
        assert!(text.contains("&characteristicID="));
        assert_eq!(DiscoveryUri::parse(&text).unwrap(), uri);
    }

    #[test]
    fn test_discovery_uri_parses_known_value() {
        let uri: DiscoveryUri = "device-binding://?serviceID=6E400001-B5A3-F393-E0A9-E50E24DCCA9E&characteristicID=6e400002-b5a3-f393-e0a9-e50e24dcca9e"
            .parse()
            .unwrap();
        assert_eq!(
            uri.characteristic_id,
            Uuid::parse_str("6E400002-B5A3-F393-E0A9-E50E24DCCA9E").unwrap()
        );
    }

    #[test]
    fn test_discovery_uri_rejects_bad_input() {
        for raw in [
            "https://?serviceID=6E400001-B5A3-F393-E0A9-E50E24DCCA9E&characteristicID=6E400001-B5A3-F393-E0A9-E50E24DCCA9E",
            "device-binding://?serviceID=6E400001-B5A3-F393-E0A9-E50E24DCCA9E",
            "device-binding://?serviceID=nope&characteristicID=6E400001-B5A3-F393-E0A9-E50E24DCCA9E",
            "not a uri",
        ] {
            assert!(matches!(
                DiscoveryUri::parse(raw),
                Err(BindingError::InvalidDiscoveryUri(_))
            ));
        }
    }

    #[test]
    fn test_handshake_payload_omits_missing_name() {
        let payload = HandshakePayload {
            nonce: u64::MAX,
            public_key: vec![0; 32],
            device_name: None,
        };
        let json = String::from_utf8(payload.encode().unwrap()).unwrap();
        assert!(json.contains(r#""nonce":18446744073709551615"#));
        assert!(!json.contains("deviceName"));
        assert_eq!(HandshakePayload::decode(json.as_bytes()).unwrap(), payload);
    }

    fn any_message_type() -> impl proptest::strategy::Strategy<Value = MessageType> {
        proptest::prop_oneof![
            proptest::strategy::Just(MessageType::Syn),
            proptest::strategy::Just(MessageType::Ack),
            proptest::strategy::Just(MessageType::WaitingForPk),
            proptest::strategy::Just(MessageType::SendingPk),
        ]
    }

    proptest::proptest! {
        // Marker is three bytes; from four bytes up no data chunk can equal it
        #[test]
        fn prop_binding_message_survives_chunking(
            message_type in any_message_type(),
            payload in proptest::collection::vec(proptest::prelude::any::<u8>(), 0..512),
            mtu in 4usize..64,
        ) {
            let message = BindingMessage::new(message_type, payload);
            let codec = zkp_transport::ChunkCodec::new(mtu).unwrap();
            let chunks = codec.encode_json(&message).unwrap();
            proptest::prop_assert!(chunks.iter().all(|c| c.len() <= mtu));

            let mut accumulator = zkp_transport::ChunkAccumulator::default();
            let (last, body) = chunks.split_last().unwrap();
            for chunk in body {
                let partial: Option<BindingMessage> = accumulator.push_json(chunk).unwrap();
                proptest::prop_assert!(partial.is_none());
            }
            let decoded: Option<BindingMessage> = accumulator.push_json(last).unwrap();
            proptest::prop_assert_eq!(decoded, Some(message));
        }
    }
}
