//! CLI command definitions and argument parsing

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use url::Url;

use zkp_core::binding::DiscoveryUri;
use zkp_core::harness::{simulate_binding, BindingReport, HarnessOptions};
use zkp_core::keys::{DeviceSecretSource, FiatShamirKeyManager, StaticDeviceSecret};
use zkp_core::payloads::PublicKey;
use zkp_core::registration::HttpRegistrar;
use zkp_core::{Collaborators, RegistrationOutcome, ZkpClient};
use zkp_transport::{ChannelConnector, ChannelError, ReliableChannel};

use crate::config::{CliOverrides, Config};
use crate::store::FileSecretStore;
use crate::ExitCode;

/// ZKP client CLI - Fiat-Shamir keys, registration and device binding
#[derive(Parser, Debug)]
#[command(name = "zkp-client")]
#[command(version, about = "ZKP client CLI - Fiat-Shamir keys, registration and device binding")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug mode (protocol-level tracing)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Config file path
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base URL for HTTP requests
    #[arg(long, global = true)]
    pub http_url: Option<String>,

    /// Base URL for the authentication channel
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Bit width of each prime factor
    #[arg(long, global = true)]
    pub coprime_width: Option<u64>,

    /// Device identifier the secret is derived from
    #[arg(long, env = "ZKP_DEVICE_ID", global = true)]
    pub device_id: Option<String>,

    /// Key file path
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a public key for this device and store it
    Keygen(UserArgs),
    /// Register this device's key with the verifier
    Register(RegisterArgs),
    /// Print a fresh device-binding discovery URI
    PairingUri,
    /// Run both binding roles in memory and report the result
    SimulateBinding(SimulateArgs),
}

#[derive(Args, Debug)]
pub struct UserArgs {
    /// User identifier
    #[arg(long, short)]
    pub user: String,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    #[command(flatten)]
    pub user: UserArgs,

    /// Opaque application payload sent with the request
    #[arg(long, default_value = "")]
    pub payload: String,
}

#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Maximum write length of the simulated link
    #[arg(long, default_value_t = 20)]
    pub mtu: usize,

    /// Refuse one write after every N accepted writes
    #[arg(long)]
    pub backpressure_every: Option<usize>,

    /// Name the authenticator announces
    #[arg(long)]
    pub device_name: Option<String>,

    /// User the offered key is generated for
    #[arg(long, default_value = "simulated-user")]
    pub user: String,
}

impl Cli {
    /// Overrides taken from global flags.
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            http_url: self.http_url.clone(),
            ws_url: self.ws_url.clone(),
            coprime_width: self.coprime_width,
            device_id: self.device_id.clone(),
            store_path: self.store.clone(),
            verbose: self.verbose.then_some(true),
            debug: self.debug.then_some(true),
        }
    }

    /// Execute the CLI command with a resolved configuration
    pub async fn execute_with_config(self, config: Config) -> anyhow::Result<ExitCode> {
        let output = Output { json: self.json };
        match self.command {
            Commands::Keygen(args) => keygen(&config, &args, output).await,
            Commands::Register(args) => register(&config, &args, output).await,
            Commands::PairingUri => {
                let uri = DiscoveryUri::generate();
                output.print(&uri.to_string(), &serde_json::json!({ "uri": uri.to_string() }))?;
                Ok(ExitCode::Success)
            }
            Commands::SimulateBinding(args) => simulate(&config, &args, output).await,
        }
    }
}

#[derive(Clone, Copy)]
struct Output {
    json: bool,
}

impl Output {
    fn print<T: Serialize>(&self, text: &str, value: &T) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{text}");
        }
        Ok(())
    }
}

/// The CLI has no verifier channel; commands that need one fail cleanly.
struct OfflineConnector;

#[async_trait]
impl ChannelConnector for OfflineConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn ReliableChannel>, ChannelError> {
        Err(ChannelError::ConnectFailed(format!(
            "no authentication channel available for {url}"
        )))
    }
}

fn device_source(config: &Config) -> Arc<dyn DeviceSecretSource> {
    match &config.device.id {
        Some(id) => Arc::new(StaticDeviceSecret::new(id.clone())),
        None => Arc::new(StaticDeviceSecret::unavailable()),
    }
}

fn build_client(config: &Config, user: &str) -> anyhow::Result<ZkpClient> {
    let store_path = config
        .store_path()
        .context("no key file location; pass --store")?;
    let client = ZkpClient::new(
        user,
        &config.client_config(),
        Collaborators {
            device: device_source(config),
            store: Arc::new(FileSecretStore::new(store_path)),
            connector: Arc::new(OfflineConnector),
            registrar: Arc::new(HttpRegistrar::new()?),
        },
    )?;
    Ok(client)
}

fn describe_key(key: &PublicKey) -> String {
    format!(
        "modulus bits: {}\nn: {}\nv: {}",
        key.n().bits(),
        hex::encode(&key.n_key),
        hex::encode(&key.v_key)
    )
}

async fn keygen(config: &Config, args: &UserArgs, output: Output) -> anyhow::Result<ExitCode> {
    let client = build_client(config, &args.user)?;
    let bytes = client.get_device_public_key().await?;
    let key = PublicKey::from_bytes(&bytes)?;
    output.print(&describe_key(&key), &key)?;
    Ok(ExitCode::Success)
}

async fn register(config: &Config, args: &RegisterArgs, output: Output) -> anyhow::Result<ExitCode> {
    let client = build_client(config, &args.user.user)?;
    match client.send_registration(args.payload.as_bytes()).await? {
        RegistrationOutcome::Registered(key) => {
            output.print(
                &format!("registered {}\n{}", args.user.user, describe_key(&key)),
                &serde_json::json!({ "registered": true, "key": key }),
            )?;
        }
        RegistrationOutcome::AlreadyRegistered { status } => {
            output.print(
                &format!("{} is already registered (HTTP {status}); stored key unchanged", args.user.user),
                &serde_json::json!({ "registered": false, "status": status }),
            )?;
        }
    }
    Ok(ExitCode::Success)
}

#[derive(Serialize)]
struct SimulationSummary {
    fingerprint: String,
    keys_match: bool,
    key_len: usize,
    authenticator_chunks: usize,
    client_chunks: usize,
    steps: usize,
}

impl From<&BindingReport> for SimulationSummary {
    fn from(report: &BindingReport) -> Self {
        Self {
            fingerprint: hex::encode(report.client_fingerprint),
            keys_match: report.keys_match(),
            key_len: report.bound_key.len(),
            authenticator_chunks: report.authenticator_chunks,
            client_chunks: report.client_chunks,
            steps: report.steps,
        }
    }
}

async fn simulate(config: &Config, args: &SimulateArgs, output: Output) -> anyhow::Result<ExitCode> {
    let device_id = config
        .device
        .id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let keys = FiatShamirKeyManager::new(
        config.protocol.coprime_width,
        Arc::new(StaticDeviceSecret::new(device_id)),
        args.user.clone(),
    );
    let device_key = keys.generate_device_public_key().await?.to_bytes()?;

    let report = simulate_binding(
        device_key,
        HarnessOptions {
            mtu: args.mtu,
            backpressure_every: args.backpressure_every,
            device_name: args.device_name.clone(),
            max_message_len: config.pairing.max_message_len,
            ..HarnessOptions::default()
        },
    )?;
    let summary = SimulationSummary::from(&report);
    output.print(
        &format!(
            "pairing key fingerprint: {}\nkeys match: {}\nchunks: {} sent by authenticator, {} by client\nsteps: {}",
            summary.fingerprint,
            summary.keys_match,
            summary.authenticator_chunks,
            summary.client_chunks,
            summary.steps
        ),
        &summary,
    )?;
    Ok(if report.keys_match() {
        ExitCode::Success
    } else {
        ExitCode::BindingFailed
    })
}
