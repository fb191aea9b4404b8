//! ZKP Core - Fiat-Shamir client logic and device-binding state machines.
//!
//! This crate implements:
//! - Key management (secret derivation, public key generation)
//! - The protocol engine (register, authenticate, bind device)
//! - Verifier update decoding
//! - Device-binding state machines (authenticator and client)
//! - Secret storage abstraction
//! - The client facade and an in-memory pairing harness

#![forbid(unsafe_code)]

// Core state machines
pub mod binding;
pub mod protocol;

// Services
pub mod client;
pub mod flavor;
pub mod registration;

// Infrastructure
pub mod config;
pub mod store;

// Supporting modules
pub mod encoding;
pub mod errors;
pub mod harness;
pub mod keys;
pub mod payloads;
pub mod verifier;

pub use client::{Collaborators, ZkpClient};
pub use config::ClientConfig;
pub use errors::{BindingError, ProtocolError};
pub use flavor::{FiatShamirConfig, ZkpFlavor};
pub use protocol::{RegistrationOutcome, SessionHandle, SessionOutcome, SessionStatus};
