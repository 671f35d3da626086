use crate::constants::{self, Network};
use crate::models::AccountId;

use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use base58::ToBase58;
use blake2::{Blake2b512, Digest};

use clap::Parser;
use serde::Deserialize;

// argument parser format
#[derive(Parser, Debug, Clone, Default)]
#[command(version, about)]
pub struct Args {
    /// YAML config file; flags below override its values
    #[arg(short, long)]
    pub config: Option<String>,

    /// Exporter listen address
    #[arg(long, value_name = "ADDR:PORT")]
    pub listen: Option<String>,

    /// Node websocket endpoint
    #[arg(short = 'e', long, value_name = "ws|wss://")]
    pub ws_endpoint: Option<String>,

    /// Exposed metrics path
    #[arg(long, value_name = "PATH")]
    pub metrics_path: Option<String>,

    /// Log filter, e.g. `info` or `chain_state_exporter=trace`
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[arg(long, value_enum)]
    pub network: Option<Network>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid listen address {0:?}")]
    Listen(String),
    #[error("metrics path {0:?} must start with '/'")]
    MetricsPath(String),
    #[error("scrape_timeout_secs must be greater than zero")]
    Timeout,
}

// config parser format
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub network: Network,
    pub ss58_prefix: Option<u16>,
    pub ws_endpoint: String,
    pub listen: String,
    pub metrics_path: String,
    pub metrics_prefix: String,
    pub scrape_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: Network::Darwinia,
            ss58_prefix: None,
            ws_endpoint: constants::DEFAULT_WS_ENDPOINT.into(),
            listen: constants::DEFAULT_LISTEN.into(),
            metrics_path: constants::DEFAULT_METRICS_PATH.into(),
            metrics_prefix: constants::METRICS_PREFIX.into(),
            scrape_timeout_secs: constants::DEFAULT_SCRAPE_TIMEOUT_SECS,
            log_level: constants::DEFAULT_LOG_LEVEL.into(),
        }
    }
}

impl Config {
    // load config from file
    pub fn load(config_file: &str) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(config_file).map_err(|source| ConfigError::Read {
            path: config_file.into(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&config_str).map_err(|source| ConfigError::Parse {
                path: config_file.into(),
                source,
            })?;
        Ok(config)
    }

    // build the effective config: file (if any), then command line overrides
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if let Some(listen) = &args.listen {
            config.listen = listen.clone();
        }
        if let Some(endpoint) = &args.ws_endpoint {
            config.ws_endpoint = endpoint.clone();
        }
        if let Some(path) = &args.metrics_path {
            config.metrics_path = path.clone();
        }
        if let Some(level) = &args.log_level {
            config.log_level = level.clone();
        }
        if let Some(network) = args.network {
            config.network = network;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if !self.metrics_path.starts_with('/') {
            return Err(ConfigError::MetricsPath(self.metrics_path.clone()));
        }
        if self.scrape_timeout_secs == 0 {
            return Err(ConfigError::Timeout);
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::Listen(self.listen.clone()))
    }

    pub fn address_prefix(&self) -> u16 {
        self.ss58_prefix
            .unwrap_or_else(|| self.network.ss58_prefix())
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }
}

// serialize an AccountId into a Substrate Address
pub fn serialize_address(prefix: u16, account_id: &AccountId) -> String {
    // simple prefixes fit in one byte, full ones (64..16384) take two
    let mut v = match prefix {
        0..=63 => vec![prefix as u8],
        _ => {
            let ident = prefix & 0b0011_1111_1111_1111;
            let first = ((ident & 0b0000_0000_1111_1100) as u8 >> 2) | 0b0100_0000;
            let second = ((ident >> 8) as u8) | (((ident & 0b0000_0000_0000_0011) as u8) << 6);
            vec![first, second]
        }
    };
    v.extend(account_id.0);
    const PREFIX: &[u8] = b"SS58PRE";
    let mut ctx = Blake2b512::new();
    ctx.update(PREFIX);
    ctx.update(&v);
    let r = ctx.finalize().to_vec();
    v.extend(&r[0..2]);
    v.to_base58()
}
