//! Wire payloads exchanged with the verifier.
//!
//! JSON with camelCase names; every byte field is standard base64.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::encoding::base64_bytes;

/// Public half of a Fiat-Shamir key: witness `v` and modulus `n`, big-endian.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    #[serde(with = "base64_bytes")]
    pub v_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub n_key: Vec<u8>,
}

impl PublicKey {
    pub fn from_parts(v: &BigUint, n: &BigUint) -> Self {
        Self {
            v_key: v.to_bytes_be(),
            n_key: n.to_bytes_be(),
        }
    }

    pub fn v(&self) -> BigUint {
        BigUint::from_bytes_be(&self.v_key)
    }

    pub fn n(&self) -> BigUint {
        BigUint::from_bytes_be(&self.n_key)
    }

    /// Serialized form handed between devices during binding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyContainer {
    pub device: PublicKey,
    #[serde(default)]
    pub other: Vec<PublicKey>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload {
    pub protocol_type: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub key: KeyContainer,
}

/// Opening message of an authentication session. `challenge_response` is
/// empty here; answers travel as [`ChallengePayload`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationPayload {
    pub protocol_type: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(rename = "userID")]
    pub user_id: String,
    pub key: PublicKey,
    #[serde(with = "base64_bytes")]
    pub initiating_num: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub challenge_response: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePayload {
    #[serde(with = "base64_bytes")]
    pub challenge_response: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceBindingPayload {
    #[serde(with = "base64_bytes")]
    pub new_device_key: Vec<u8>,
    pub authentication_payload: AuthenticationPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PublicKey {
        PublicKey::from_parts(&BigUint::from(9u32), &BigUint::from(77u32))
    }

    #[test]
    fn test_public_key_wire_names() {
        let json = serde_json::to_value(key()).unwrap();
        assert_eq!(json["vKey"], "CQ==");
        assert_eq!(json["nKey"], "TQ==");
        assert_eq!(PublicKey::from_bytes(&key().to_bytes().unwrap()).unwrap(), key());
    }

    #[test]
    fn test_authentication_payload_wire_names() {
        let payload = AuthenticationPayload {
            protocol_type: "fiatShamir".to_string(),
            payload: Vec::new(),
            user_id: "alice".to_string(),
            key: key(),
            initiating_num: vec![25],
            challenge_response: Vec::new(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["protocolType"], "fiatShamir");
        assert_eq!(json["userID"], "alice");
        assert_eq!(json["initiatingNum"], "GQ==");
        assert_eq!(json["challengeResponse"], "");
        assert_eq!(json["key"]["nKey"], "TQ==");

        let binding = DeviceBindingPayload {
            new_device_key: b"{}".to_vec(),
            authentication_payload: payload,
        };
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["newDeviceKey"], "e30=");
        assert_eq!(json["authenticationPayload"]["userID"], "alice");
    }

    #[test]
    fn test_registration_payload_wire_names() {
        let payload = RegistrationPayload {
            protocol_type: "fiatShamir".to_string(),
            payload: b"hi".to_vec(),
            user_id: "alice".to_string(),
            key: KeyContainer {
                device: key(),
                other: Vec::new(),
            },
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["payload"], "aGk=");
        assert_eq!(json["key"]["device"]["vKey"], "CQ==");
        assert_eq!(json["key"]["other"], serde_json::json!([]));
    }
}
