//! ZKP Client - CLI for Fiat-Shamir key management
//!
//! This crate provides a command-line interface for:
//! - Generating and storing device public keys
//! - Registering with the verifier
//! - Producing device-binding discovery URIs
//! - Simulating device binding over an in-memory link

pub mod cli;
pub mod config;
pub mod store;

pub use cli::Cli;
pub use config::{CliOverrides, Config};

use zkp_core::{BindingError, ProtocolError};

/// Exit codes for CLI operations
///
/// - 0: Success
/// - 1: General error
/// - 2: Verification failed or rejected
/// - 3: Timeout
/// - 4: Connection failed
/// - 5: Invalid input (configuration, device identifier)
/// - 6: Device not bound (no stored key)
/// - 7: Device binding failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    VerificationFailed = 2,
    Timeout = 3,
    ConnectionFailed = 4,
    InvalidInput = 5,
    NotBound = 6,
    BindingFailed = 7,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl ExitCode {
    /// Convert to process exit code
    pub fn to_exit_code(self) -> std::process::ExitCode {
        std::process::ExitCode::from(self as u8)
    }

    /// Pick the exit code for a failed command.
    pub fn for_error(error: &anyhow::Error) -> Self {
        if let Some(e) = error.downcast_ref::<ProtocolError>() {
            return match e {
                ProtocolError::Timeout(_) => ExitCode::Timeout,
                ProtocolError::Channel(_)
                | ProtocolError::InvalidEndpoint(_)
                | ProtocolError::Registration(_) => ExitCode::ConnectionFailed,
                ProtocolError::UnavailableSecret(_)
                | ProtocolError::SecretConversionFailure
                | ProtocolError::Config(_)
                | ProtocolError::Key(_) => ExitCode::InvalidInput,
                ProtocolError::DeviceNotBound => ExitCode::NotBound,
                ProtocolError::ProtocolViolation(_) | ProtocolError::MissingChallenge => {
                    ExitCode::VerificationFailed
                }
                _ => ExitCode::GeneralError,
            };
        }
        if error.downcast_ref::<BindingError>().is_some() {
            return ExitCode::BindingFailed;
        }
        ExitCode::GeneralError
    }
}
