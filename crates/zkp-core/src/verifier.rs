//! Verifier status updates received on the authentication channel.

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VerifierState {
    #[serde(alias = "pendingVerification")]
    Pending,
    VerificationInProgress,
    DidVerifyWithSuccess,
    DidFailToVerify,
}

/// `{ "state": ..., "challenge": ... }`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifierUpdate {
    pub state: VerifierState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<u64>,
}

/// What the prover has to do next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifierStep {
    Wait,
    Respond { challenge: u64 },
    Verified,
    Rejected,
}

impl VerifierUpdate {
    pub fn pending() -> Self {
        Self {
            state: VerifierState::Pending,
            challenge: None,
        }
    }

    pub fn challenge(challenge: u64) -> Self {
        Self {
            state: VerifierState::VerificationInProgress,
            challenge: Some(challenge),
        }
    }

    pub fn verdict(verified: bool) -> Self {
        Self {
            state: if verified {
                VerifierState::DidVerifyWithSuccess
            } else {
                VerifierState::DidFailToVerify
            },
            challenge: None,
        }
    }

    /// Decode one inbound frame. Anything off-schema is a protocol violation.
    pub fn parse(frame: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(frame)
            .map_err(|e| ProtocolError::ProtocolViolation(format!("unexpected verifier message: {e}")))
    }

    pub fn step(&self) -> Result<VerifierStep, ProtocolError> {
        Ok(match self.state {
            VerifierState::Pending => VerifierStep::Wait,
            VerifierState::VerificationInProgress => VerifierStep::Respond {
                challenge: self.challenge.ok_or(ProtocolError::MissingChallenge)?,
            },
            VerifierState::DidVerifyWithSuccess => VerifierStep::Verified,
            VerifierState::DidFailToVerify => VerifierStep::Rejected,
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}
