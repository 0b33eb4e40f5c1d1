use clap::{ArgAction, Parser, ValueEnum};
use ibdesk_gateway::{DryRunConfig, GatewayEnv};
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::telemetry::{TelemetryGuard, setup_telemetry};
use crate::worker::WorkerConfig;

#[derive(ValueEnum, Debug, Clone)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for Level {
    fn from(log_level: LogLevel) -> Self {
        (&log_level).into()
    }
}

impl From<&LogLevel> for Level {
    fn from(log_level: &LogLevel) -> Self {
        match log_level {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}

/// Which gateway session the worker owns.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayKind {
    /// Logs orders and simulates fills without touching a brokerage.
    DryRun,
    /// Interactive Brokers Client Portal Web API.
    ClientPortal,
}

#[derive(Parser, Debug, Clone)]
pub struct WorkerEnv {
    /// Milliseconds between order status polls
    #[clap(long, env, default_value = "1000")]
    pub poll_interval_ms: u64,
    /// Seconds a caller waits beyond the order timeout before giving up
    #[clap(long, env, default_value = "5")]
    pub submit_grace_secs: u64,
    #[clap(long, env, default_value = "32")]
    pub queue_capacity: usize,
    /// Order timeout used when a request does not carry one
    #[clap(long, env, default_value = "15")]
    pub default_order_timeout_secs: u64,
    /// Seconds a read query may take, queue wait included
    #[clap(long, env, default_value = "10")]
    pub query_timeout_secs: u64,
    /// Allow orders to work outside regular trading hours
    #[clap(long, env, default_value = "true", action = ArgAction::Set)]
    pub outside_rth: bool,
    /// Attempts at the initial gateway connection
    #[clap(long, env, default_value = "3")]
    pub connect_attempts: usize,
    #[clap(long, env, default_value = "2")]
    pub connect_retry_delay_secs: u64,
}

impl WorkerEnv {
    pub const fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            submit_grace: Duration::from_secs(self.submit_grace_secs),
            queue_capacity: self.queue_capacity,
            default_order_timeout: Duration::from_secs(self.default_order_timeout_secs),
            query_timeout: Duration::from_secs(self.query_timeout_secs),
            outside_rth: self.outside_rth,
            connect_attempts: self.connect_attempts,
            connect_retry_delay: Duration::from_secs(self.connect_retry_delay_secs),
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct Env {
    #[clap(long, env, default_value = "info")]
    pub log_level: LogLevel,
    #[clap(long, env, value_enum, default_value = "dry-run")]
    pub gateway: GatewayKind,
    #[clap(flatten)]
    pub gateway_env: GatewayEnv,
    #[clap(flatten)]
    pub worker_env: WorkerEnv,
    #[clap(long, env, default_value = "0.0.0.0")]
    pub http_address: String,
    #[clap(long, env, default_value = "8080")]
    pub http_port: u16,
    /// OTLP/HTTP traces endpoint; console logging only when absent
    #[clap(long, env)]
    pub otel_endpoint: Option<Url>,
    /// Sent as the `authorization` header to the OTLP endpoint
    #[clap(long, env)]
    pub otel_api_key: Option<String>,
}

impl Env {
    pub const fn worker_config(&self) -> WorkerConfig {
        self.worker_env.worker_config()
    }

    pub fn dry_run_config(&self) -> DryRunConfig {
        DryRunConfig {
            client_id: self.gateway_env.client_id,
            ..DryRunConfig::default()
        }
    }
}

pub(crate) fn default_filter(level: Level) -> String {
    format!("ibdesk={level},ibdesk_gateway={level},server={level},cli={level}")
}

/// `RUST_LOG` when set, otherwise [`default_filter`].
pub(crate) fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into())
}

/// Installs the global subscriber. The returned guard flushes exported spans on drop
/// and must be held for the lifetime of the process.
pub fn setup_tracing(env: &Env) -> Option<TelemetryGuard> {
    let level: Level = (&env.log_level).into();

    if let Some(endpoint) = &env.otel_endpoint {
        match setup_telemetry(endpoint, env.otel_api_key.clone(), level) {
            Ok(guard) => return Some(guard),
            Err(e) => eprintln!("Failed to set up telemetry, falling back to console logging: {e}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .compact()
        .init();

    None
}
