use crate::scraper::{ScrapeError, Scraper};
use crate::substrate::Connector;

use log::{debug, warn};
use prometheus_client::collector::Collector;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric, MetricEncoder};
use prometheus_client::metrics::counter::ConstCounter;
use prometheus_client::metrics::gauge::ConstGauge;
use prometheus_client::metrics::MetricType;
use prometheus_client::registry::Registry;
use std::time::{Duration, Instant};

// prometheus metric keys
pub mod keys {
    pub const LAST_SCRAPE_ERROR: &str = "last_scrape_error";
    pub const LAST_SCRAPE_DURATION_SECONDS: &str = "last_scrape_duration_seconds";

    pub const ACTIVE_ERA_INDEX: &str = "active_era_index";
    pub const SESSION_INDEX: &str = "session_index";
    pub const VALIDATORS_TOTAL: &str = "validators_total";
    pub const ERA_REWARD_POINTS: &str = "era_reward_points";
    pub const BEST_CONFIRMED_ETHEREUM_BLOCK_NUMBER: &str = "best_confirmed_ethereum_block_number";
    pub const PENDING_HEADERS_TOTAL: &str = "pending_headers_total";
    pub const PENDING_HEADER_ETHEREUM_BLOCK_NUMBER: &str = "pending_header_ethereum_block_number";
    pub const MMR_ROOTS_TO_SIGN_TOTAL: &str = "mmr_roots_to_sign_total";
    pub const AUTHORITIES_TO_SIGN: &str = "authorities_to_sign";
    pub const AUTHORITIES_TO_SIGN_VOTES: &str = "authorities_to_sign_votes";
    pub const SCHEDULED_AUTHORITIES_CHANGE_DEADLINE: &str = "scheduled_authorities_change_deadline";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    fn metric_type(self) -> MetricType {
        match self {
            MetricKind::Counter => MetricType::Counter,
            MetricKind::Gauge => MetricType::Gauge,
        }
    }
}

#[derive(Debug)]
pub struct MetricDescriptor {
    pub key: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

const fn descriptor(
    key: &'static str,
    kind: MetricKind,
    help: &'static str,
    labels: &'static [&'static str],
) -> MetricDescriptor {
    MetricDescriptor {
        key,
        kind,
        help,
        labels,
    }
}

// every metric the exporter can emit, in exposition order
pub static DESCRIPTORS: &[MetricDescriptor] = &[
    descriptor(
        keys::LAST_SCRAPE_ERROR,
        MetricKind::Gauge,
        "Whether the last scrape of metrics resulted in an error (1 for error, 0 for success)",
        &[],
    ),
    descriptor(
        keys::LAST_SCRAPE_DURATION_SECONDS,
        MetricKind::Gauge,
        "Time duration of last scrape in seconds",
        &[],
    ),
    descriptor(
        keys::ACTIVE_ERA_INDEX,
        MetricKind::Counter,
        "From chain storage staking.activeEra",
        &[],
    ),
    descriptor(
        keys::SESSION_INDEX,
        MetricKind::Counter,
        "From chain storage session.currentIndex",
        &[],
    ),
    descriptor(
        keys::VALIDATORS_TOTAL,
        MetricKind::Gauge,
        "From chain storage session.validators",
        &[],
    ),
    descriptor(
        keys::ERA_REWARD_POINTS,
        MetricKind::Counter,
        "From chain storage staking.erasRewardPoints",
        &["account_id", "address"],
    ),
    descriptor(
        keys::BEST_CONFIRMED_ETHEREUM_BLOCK_NUMBER,
        MetricKind::Counter,
        "From chain storage ethereumRelay.bestConfirmedBlockNumber",
        &[],
    ),
    descriptor(
        keys::PENDING_HEADERS_TOTAL,
        MetricKind::Gauge,
        "From chain storage ethereumRelay.pendingRelayHeaderParcels",
        &[],
    ),
    descriptor(
        keys::PENDING_HEADER_ETHEREUM_BLOCK_NUMBER,
        MetricKind::Gauge,
        "Ethereum block number of each pending relay header parcel, by the block it was submitted at",
        &["block_number"],
    ),
    descriptor(
        keys::MMR_ROOTS_TO_SIGN_TOTAL,
        MetricKind::Gauge,
        "From chain storage ethereumRelayAuthorities.mmrRootsToSignKeys",
        &[],
    ),
    descriptor(
        keys::AUTHORITIES_TO_SIGN,
        MetricKind::Gauge,
        "Whether an authorities change is waiting for signatures, from ethereumRelayAuthorities.authoritiesToSign",
        &[],
    ),
    descriptor(
        keys::AUTHORITIES_TO_SIGN_VOTES,
        MetricKind::Gauge,
        "Signatures collected for the pending authorities change",
        &[],
    ),
    descriptor(
        keys::SCHEDULED_AUTHORITIES_CHANGE_DEADLINE,
        MetricKind::Gauge,
        "From chain storage ethereumRelayAuthorities.scheduledAuthoritiesChange",
        &[],
    ),
];

pub fn find_descriptor(key: &str) -> Option<&'static MetricDescriptor> {
    DESCRIPTORS.iter().find(|d| d.key == key)
}

// one value of one metric, labels ordered as in the descriptor
#[derive(Clone, Debug, PartialEq)]
pub struct MetricSample {
    pub key: &'static str,
    pub value: f64,
    pub labels: Vec<String>,
}

impl MetricSample {
    pub fn new(key: &'static str, value: f64) -> Self {
        Self {
            key,
            value,
            labels: vec![],
        }
    }

    pub fn with_labels(key: &'static str, value: f64, labels: Vec<String>) -> Self {
        Self { key, value, labels }
    }
}

// one scrape pass per call plus the two bookkeeping metrics, no state between calls
pub struct Exporter<C: Connector> {
    connector: C,
    scraper: Scraper,
    timeout: Duration,
}

impl<C: Connector> Exporter<C> {
    pub fn new(connector: C, scraper: Scraper, timeout: Duration) -> Self {
        Self {
            connector,
            scraper,
            timeout,
        }
    }

    pub async fn collect(&self) -> Vec<MetricSample> {
        let start = Instant::now();

        let outcome = async_std::future::timeout(self.timeout, self.scrape_once())
            .await
            .unwrap_or_else(|_| Err(ScrapeError::Timeout(self.timeout)));

        let mut failed = 0.0;
        let mut samples = match outcome {
            Ok(samples) => samples,
            Err(e) => {
                failed = 1.0;
                warn!("Scrape failed ({}): {e}", e.kind());
                vec![]
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        debug!("Scrape finished in {elapsed:.3}s with {} samples", samples.len());
        samples.push(MetricSample::new(keys::LAST_SCRAPE_ERROR, failed));
        samples.push(MetricSample::new(keys::LAST_SCRAPE_DURATION_SECONDS, elapsed));
        samples
    }

    // the session lives only for this pass and is dropped on every return path
    async fn scrape_once(&self) -> Result<Vec<MetricSample>, ScrapeError> {
        let mut session = self
            .connector
            .connect()
            .await
            .map_err(ScrapeError::Connect)?;
        self.scraper.scrape(&mut session).await
    }
}

// encodes one scrape's samples against the descriptor table
#[derive(Debug)]
pub struct SnapshotCollector {
    samples: Vec<MetricSample>,
}

impl SnapshotCollector {
    // drop samples the descriptor table cannot describe
    pub fn new(samples: Vec<MetricSample>) -> Self {
        let samples = samples
            .into_iter()
            .filter(|sample| match find_descriptor(sample.key) {
                None => {
                    warn!("Dropping sample for unregistered metric {:?}", sample.key);
                    false
                }
                Some(desc) if desc.labels.len() != sample.labels.len() => {
                    warn!(
                        "Dropping sample for {}: expected {} label values, got {}",
                        sample.key,
                        desc.labels.len(),
                        sample.labels.len()
                    );
                    false
                }
                Some(_) => true,
            })
            .collect();
        Self { samples }
    }
}

fn encode_value(
    kind: MetricKind,
    value: f64,
    encoder: MetricEncoder<'_>,
) -> Result<(), std::fmt::Error> {
    match kind {
        MetricKind::Counter => ConstCounter::new(value).encode(encoder),
        MetricKind::Gauge => ConstGauge::new(value).encode(encoder),
    }
}

impl Collector for SnapshotCollector {
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), std::fmt::Error> {
        for desc in DESCRIPTORS {
            let mut samples = self.samples.iter().filter(|s| s.key == desc.key).peekable();
            if samples.peek().is_none() {
                continue;
            }

            let mut metric_encoder =
                encoder.encode_descriptor(desc.key, desc.help, None, desc.kind.metric_type())?;

            if desc.labels.is_empty() {
                if let Some(sample) = samples.next() {
                    encode_value(desc.kind, sample.value, metric_encoder)?;
                }
                continue;
            }

            for sample in samples {
                let labels: Vec<(&str, &str)> = desc
                    .labels
                    .iter()
                    .copied()
                    .zip(sample.labels.iter().map(String::as_str))
                    .collect();
                let family_encoder = metric_encoder.encode_family(&labels)?;
                encode_value(desc.kind, sample.value, family_encoder)?;
            }
        }
        Ok(())
    }
}

// render samples in the text exposition format
pub fn render(prefix: &str, samples: Vec<MetricSample>) -> Result<String, std::fmt::Error> {
    let mut registry = Registry::with_prefix(prefix);
    registry.register_collector(Box::new(SnapshotCollector::new(samples)));

    let mut encoded = String::new();
    encode(&mut encoded, &registry)?;
    Ok(encoded)
}
