use serde::{Deserialize, Serialize};

// supported networks
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Darwinia,
    Crab,
    Pangolin,
}

impl Network {
    // default ss58 address prefix of the network
    pub fn ss58_prefix(&self) -> u16 {
        match self {
            Network::Darwinia => DARWINIA_ADDR_PREFIX,
            Network::Crab => CRAB_ADDR_PREFIX,
            Network::Pangolin => PANGOLIN_ADDR_PREFIX,
        }
    }
}

// ss58 address prefixes
pub static DARWINIA_ADDR_PREFIX: u16 = 18;
pub static CRAB_ADDR_PREFIX: u16 = 42;
pub static PANGOLIN_ADDR_PREFIX: u16 = 42;

// prometheus metrics prefix
pub static METRICS_PREFIX: &str = "darwinia_state";

// defaults for the exporter endpoints
pub static DEFAULT_WS_ENDPOINT: &str = "ws://127.0.0.1:9944";
pub static DEFAULT_LISTEN: &str = "0.0.0.0:9602";
pub static DEFAULT_METRICS_PATH: &str = "/metrics";
pub static DEFAULT_SCRAPE_TIMEOUT_SECS: u64 = 30;
pub static DEFAULT_LOG_LEVEL: &str = "info";
