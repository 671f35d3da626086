use crate::models::{
    self, AccountId, ActiveEraInfo, AuthoritiesToSign, EraIndex, EraRewardPoints, RewardPoint,
    ScheduledAuthoritiesChange,
};
use crate::prometheus::{keys, MetricSample};
use crate::substrate::{ChainSession, KeyArg, SessionError, ShapeError, StorageValue};
use crate::utils::serialize_address;

use log::{debug, trace};
use std::fmt;
use std::time::Duration;

// what an empty storage slot means for a query
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Absence {
    // zero-state, the query's default is emitted
    Default,
    // aborts the scrape
    Fail,
}

#[derive(Debug, PartialEq, Eq)]
pub struct StorageQuery {
    pub section: &'static str,
    pub method: &'static str,
    pub absent: Absence,
}

impl fmt::Display for StorageQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section, self.method)
    }
}

// every storage read of a pass and its absence policy
pub mod queries {
    use super::{Absence, StorageQuery};

    const fn query(section: &'static str, method: &'static str, absent: Absence) -> StorageQuery {
        StorageQuery {
            section,
            method,
            absent,
        }
    }

    pub const ACTIVE_ERA: StorageQuery = query("Staking", "ActiveEra", Absence::Fail);
    pub const SESSION_INDEX: StorageQuery = query("Session", "CurrentIndex", Absence::Default);
    pub const VALIDATORS: StorageQuery = query("Session", "Validators", Absence::Fail);
    pub const ERAS_REWARD_POINTS: StorageQuery =
        query("Staking", "ErasRewardPoints", Absence::Default);
    pub const BEST_CONFIRMED_BLOCK_NUMBER: StorageQuery =
        query("EthereumRelay", "BestConfirmedBlockNumber", Absence::Default);
    pub const PENDING_RELAY_HEADER_PARCELS: StorageQuery =
        query("EthereumRelay", "PendingRelayHeaderParcels", Absence::Default);
    pub const MMR_ROOTS_TO_SIGN_KEYS: StorageQuery =
        query("EthereumRelayAuthorities", "MmrRootsToSignKeys", Absence::Default);
    pub const AUTHORITIES_TO_SIGN: StorageQuery =
        query("EthereumRelayAuthorities", "AuthoritiesToSign", Absence::Default);
    pub const SCHEDULED_AUTHORITIES_CHANGE: StorageQuery = query(
        "EthereumRelayAuthorities",
        "ScheduledAuthoritiesChange",
        Absence::Default,
    );

    // issue order of one pass
    #[cfg(test)]
    pub const ALL: [&StorageQuery; 9] = [
        &ACTIVE_ERA,
        &SESSION_INDEX,
        &VALIDATORS,
        &ERAS_REWARD_POINTS,
        &BEST_CONFIRMED_BLOCK_NUMBER,
        &PENDING_RELAY_HEADER_PARCELS,
        &MMR_ROOTS_TO_SIGN_KEYS,
        &AUTHORITIES_TO_SIGN,
        &SCHEDULED_AUTHORITIES_CHANGE,
    ];
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("connect: {0}")]
    Connect(#[source] SessionError),
    #[error("storage {query}: {source}")]
    Transport {
        query: &'static StorageQuery,
        source: SessionError,
    },
    #[error("storage {query} invalid: {source}")]
    Shape {
        query: &'static StorageQuery,
        source: ShapeError,
    },
    #[error("storage {query} is empty")]
    Absent { query: &'static StorageQuery },
    #[error("scrape did not finish within {0:?}")]
    Timeout(Duration),
}

impl ScrapeError {
    // error class, only used to tell failures apart in logs
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Connect(_) | ScrapeError::Transport { .. } => "transport",
            ScrapeError::Shape { .. } => "shape",
            ScrapeError::Absent { .. } => "absent",
            ScrapeError::Timeout(_) => "timeout",
        }
    }
}

// pairs every validator with its reward points, zero when it has none.
// matched by account, not position; validator order is kept.
pub fn correlate_reward_points(
    validators: &[AccountId],
    points: &[(AccountId, RewardPoint)],
) -> Vec<(AccountId, RewardPoint)> {
    validators
        .iter()
        .map(|validator| {
            let earned = points
                .iter()
                .find(|(account, _)| account == validator)
                .map_or(0, |(_, p)| *p);
            (*validator, earned)
        })
        .collect()
}

fn era_key(era: EraIndex) -> KeyArg {
    KeyArg::U32(era)
}

async fn read<S: ChainSession>(
    session: &mut S,
    query: &'static StorageQuery,
    args: Vec<KeyArg>,
) -> Result<Option<StorageValue>, ScrapeError> {
    trace!("Reading storage {query}");
    let value = session
        .query(query.section, query.method, args)
        .await
        .map_err(|source| ScrapeError::Transport { query, source })?;

    match (value, query.absent) {
        (StorageValue::Absent, Absence::Default) => {
            debug!("Storage {query} is empty, using default");
            Ok(None)
        }
        (StorageValue::Absent, Absence::Fail) => Err(ScrapeError::Absent { query }),
        (value, _) => Ok(Some(value)),
    }
}

fn decode<T>(
    query: &'static StorageQuery,
    value: &StorageValue,
    f: impl FnOnce(&StorageValue) -> Result<T, ShapeError>,
) -> Result<T, ScrapeError> {
    f(value).map_err(|source| ScrapeError::Shape { query, source })
}

// a present value decoded with `f`, or `default` for an empty slot
fn decode_or<T>(
    query: &'static StorageQuery,
    value: Option<StorageValue>,
    default: T,
    f: impl FnOnce(&StorageValue) -> Result<T, ShapeError>,
) -> Result<T, ScrapeError> {
    match value {
        Some(value) => decode(query, &value, f),
        None => Ok(default),
    }
}

// read a `Fail` query, which never yields an empty slot
async fn read_required<S: ChainSession>(
    session: &mut S,
    query: &'static StorageQuery,
    args: Vec<KeyArg>,
) -> Result<StorageValue, ScrapeError> {
    read(session, query, args)
        .await?
        .ok_or(ScrapeError::Absent { query })
}

// runs the ordered queries and projects them into metric samples
#[derive(Debug, Clone)]
pub struct Scraper {
    address_prefix: u16,
}

impl Scraper {
    pub fn new(address_prefix: u16) -> Self {
        Self { address_prefix }
    }

    // every sample, or the first error and nothing partial
    pub async fn scrape<S: ChainSession>(
        &self,
        session: &mut S,
    ) -> Result<Vec<MetricSample>, ScrapeError> {
        let mut samples = Vec::new();

        let value = read_required(session, &queries::ACTIVE_ERA, vec![]).await?;
        let active_era = decode(&queries::ACTIVE_ERA, &value, ActiveEraInfo::decode)?;
        samples.push(MetricSample::new(
            keys::ACTIVE_ERA_INDEX,
            active_era.index as f64,
        ));

        let value = read(session, &queries::SESSION_INDEX, vec![]).await?;
        let session_index = decode_or(&queries::SESSION_INDEX, value, 0, StorageValue::as_u64)?;
        samples.push(MetricSample::new(keys::SESSION_INDEX, session_index as f64));

        let value = read_required(session, &queries::VALIDATORS, vec![]).await?;
        let validators = decode(&queries::VALIDATORS, &value, models::decode_validators)?;
        samples.push(MetricSample::new(
            keys::VALIDATORS_TOTAL,
            validators.len() as f64,
        ));

        let value = read(
            session,
            &queries::ERAS_REWARD_POINTS,
            vec![era_key(active_era.index)],
        )
        .await?;
        let points = decode_or(
            &queries::ERAS_REWARD_POINTS,
            value,
            EraRewardPoints::default(),
            EraRewardPoints::decode,
        )?;
        debug!(
            "Era {} has {} reward points over {} validators",
            active_era.index,
            points.total,
            points.individual.len()
        );
        for (account, earned) in correlate_reward_points(&validators, &points.individual) {
            samples.push(MetricSample::with_labels(
                keys::ERA_REWARD_POINTS,
                earned as f64,
                vec![
                    account.to_string(),
                    serialize_address(self.address_prefix, &account),
                ],
            ));
        }

        let value = read(session, &queries::BEST_CONFIRMED_BLOCK_NUMBER, vec![]).await?;
        let best_confirmed = decode_or(
            &queries::BEST_CONFIRMED_BLOCK_NUMBER,
            value,
            0,
            StorageValue::as_u64,
        )?;
        samples.push(MetricSample::new(
            keys::BEST_CONFIRMED_ETHEREUM_BLOCK_NUMBER,
            best_confirmed as f64,
        ));

        let value = read(session, &queries::PENDING_RELAY_HEADER_PARCELS, vec![]).await?;
        let pending = decode_or(
            &queries::PENDING_RELAY_HEADER_PARCELS,
            value,
            vec![],
            models::decode_pending_headers,
        )?;
        samples.push(MetricSample::new(
            keys::PENDING_HEADERS_TOTAL,
            pending.len() as f64,
        ));
        for header in &pending {
            samples.push(MetricSample::with_labels(
                keys::PENDING_HEADER_ETHEREUM_BLOCK_NUMBER,
                header.ethereum_block_number as f64,
                vec![header.block_number.to_string()],
            ));
        }

        let value = read(session, &queries::MMR_ROOTS_TO_SIGN_KEYS, vec![]).await?;
        let mmr_roots = decode_or(&queries::MMR_ROOTS_TO_SIGN_KEYS, value, 0, |v| {
            v.as_list().map(<[StorageValue]>::len)
        })?;
        samples.push(MetricSample::new(
            keys::MMR_ROOTS_TO_SIGN_TOTAL,
            mmr_roots as f64,
        ));

        let value = read(session, &queries::AUTHORITIES_TO_SIGN, vec![]).await?;
        let to_sign = decode_or(&queries::AUTHORITIES_TO_SIGN, value, None, |v| {
            AuthoritiesToSign::decode(v).map(Some)
        })?;
        let (in_progress, votes) = match to_sign {
            Some(to_sign) => (1.0, to_sign.votes as f64),
            None => (0.0, 0.0),
        };
        samples.push(MetricSample::new(keys::AUTHORITIES_TO_SIGN, in_progress));
        samples.push(MetricSample::new(keys::AUTHORITIES_TO_SIGN_VOTES, votes));

        let value = read(session, &queries::SCHEDULED_AUTHORITIES_CHANGE, vec![]).await?;
        let deadline = decode_or(&queries::SCHEDULED_AUTHORITIES_CHANGE, value, 0, |v| {
            ScheduledAuthoritiesChange::decode(v).map(|change| change.deadline)
        })?;
        samples.push(MetricSample::new(
            keys::SCHEDULED_AUTHORITIES_CHANGE_DEADLINE,
            deadline as f64,
        ));

        Ok(samples)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::healthy_session;
    use super::*;
    use crate::models::fixtures::*;

    fn find<'a>(samples: &'a [MetricSample], key: &str) -> Vec<&'a MetricSample> {
        samples.iter().filter(|s| s.key == key).collect()
    }

    fn single(samples: &[MetricSample], key: &str) -> f64 {
        let found = find(samples, key);
        assert_eq!(found.len(), 1, "expected one {key} sample");
        found[0].value
    }

    #[test]
    fn correlation_is_by_account_not_position() {
        let (a, b, c) = (account(1), account(2), account(3));
        let matched = correlate_reward_points(&[a, b, c], &[(c, 7), (a, 100)]);
        assert_eq!(matched, vec![(a, 100), (b, 0), (c, 7)]);
    }

    #[test]
    fn correlation_ignores_points_of_non_validators() {
        let matched = correlate_reward_points(&[account(1)], &[(account(9), 50)]);
        assert_eq!(matched, vec![(account(1), 0)]);
        assert!(correlate_reward_points(&[], &[(account(9), 50)]).is_empty());
    }

    #[test]
    fn policy_table_is_in_issue_order() {
        let names: Vec<String> = queries::ALL.iter().map(|q| q.to_string()).collect();
        assert_eq!(names[0], "Staking.ActiveEra");
        assert_eq!(names[3], "Staking.ErasRewardPoints");
        assert_eq!(
            queries::ALL
                .iter()
                .filter(|q| q.absent == Absence::Fail)
                .count(),
            2
        );
    }

    #[async_std::test]
    async fn healthy_chain_with_empty_relay_state() {
        let mut session = healthy_session();
        let samples = Scraper::new(18).scrape(&mut session).await.unwrap();

        assert_eq!(single(&samples, keys::ACTIVE_ERA_INDEX), 12.0);
        assert_eq!(single(&samples, keys::SESSION_INDEX), 345.0);
        assert_eq!(single(&samples, keys::VALIDATORS_TOTAL), 2.0);
        assert_eq!(single(&samples, keys::BEST_CONFIRMED_ETHEREUM_BLOCK_NUMBER), 0.0);
        assert_eq!(single(&samples, keys::PENDING_HEADERS_TOTAL), 0.0);
        assert!(find(&samples, keys::PENDING_HEADER_ETHEREUM_BLOCK_NUMBER).is_empty());
        assert_eq!(single(&samples, keys::MMR_ROOTS_TO_SIGN_TOTAL), 0.0);
        assert_eq!(single(&samples, keys::AUTHORITIES_TO_SIGN), 0.0);
        assert_eq!(single(&samples, keys::AUTHORITIES_TO_SIGN_VOTES), 0.0);
        assert_eq!(single(&samples, keys::SCHEDULED_AUTHORITIES_CHANGE_DEADLINE), 0.0);

        let issued: Vec<&str> = session.calls.iter().map(|(n, _)| n.as_str()).collect();
        let expected: Vec<String> = queries::ALL.iter().map(|q| q.to_string()).collect();
        assert_eq!(issued, expected);
    }

    #[async_std::test]
    async fn reward_points_are_keyed_by_little_endian_era() {
        let mut session = healthy_session();
        session.set(&queries::ACTIVE_ERA, active_era(0x0102_0304));
        Scraper::new(18).scrape(&mut session).await.unwrap();

        let (name, args) = &session.calls[3];
        assert_eq!(name, "Staking.ErasRewardPoints");
        assert_eq!(args, &vec![KeyArg::U32(0x0102_0304)]);
        assert_eq!(args[0].encoded(), vec![0x04, 0x03, 0x02, 0x01]);
    }

    #[async_std::test]
    async fn every_validator_gets_a_reward_sample() {
        let mut session = healthy_session();
        let samples = Scraper::new(18).scrape(&mut session).await.unwrap();

        let rewards = find(&samples, keys::ERA_REWARD_POINTS);
        assert_eq!(rewards.len(), 2);
        assert_eq!(rewards[0].labels[0], account(0xa).to_string());
        assert_eq!(rewards[0].labels[1], serialize_address(18, &account(0xa)));
        assert_eq!(rewards[0].value, 100.0);
        assert_eq!(rewards[1].labels[0], account(0xb).to_string());
        assert_eq!(rewards[1].value, 0.0);
    }

    #[async_std::test]
    async fn empty_reward_points_mean_zero_for_everyone() {
        let mut session = healthy_session();
        session.clear(&queries::ERAS_REWARD_POINTS);
        let samples = Scraper::new(18).scrape(&mut session).await.unwrap();

        let rewards = find(&samples, keys::ERA_REWARD_POINTS);
        assert_eq!(rewards.len(), 2);
        assert!(rewards.iter().all(|s| s.value == 0.0));
    }

    #[async_std::test]
    async fn pending_headers_are_labeled_by_submission_block() {
        let mut session = healthy_session();
        session.set(
            &queries::PENDING_RELAY_HEADER_PARCELS,
            pending_headers(&[(100, 11_000_000), (104, 11_000_009), (107, 11_000_020)]),
        );
        let samples = Scraper::new(18).scrape(&mut session).await.unwrap();

        assert_eq!(single(&samples, keys::PENDING_HEADERS_TOTAL), 3.0);
        let headers = find(&samples, keys::PENDING_HEADER_ETHEREUM_BLOCK_NUMBER);
        let got: Vec<(&str, f64)> = headers
            .iter()
            .map(|s| (s.labels[0].as_str(), s.value))
            .collect();
        assert_eq!(
            got,
            vec![
                ("100", 11_000_000.0),
                ("104", 11_000_009.0),
                ("107", 11_000_020.0)
            ]
        );
    }

    #[async_std::test]
    async fn signing_round_in_progress_reports_votes() {
        let mut session = healthy_session();
        session.set(&queries::AUTHORITIES_TO_SIGN, authorities_to_sign(3));
        session.set(
            &queries::MMR_ROOTS_TO_SIGN_KEYS,
            StorageValue::List(vec![number(10), number(20)]),
        );
        session.set(
            &queries::SCHEDULED_AUTHORITIES_CHANGE,
            record(vec![
                ("next_authorities", StorageValue::List(vec![])),
                ("deadline", number(4_000)),
            ]),
        );
        session.set(&queries::BEST_CONFIRMED_BLOCK_NUMBER, number(11_000_100));
        let samples = Scraper::new(18).scrape(&mut session).await.unwrap();

        assert_eq!(single(&samples, keys::AUTHORITIES_TO_SIGN), 1.0);
        assert_eq!(single(&samples, keys::AUTHORITIES_TO_SIGN_VOTES), 3.0);
        assert_eq!(single(&samples, keys::MMR_ROOTS_TO_SIGN_TOTAL), 2.0);
        assert_eq!(single(&samples, keys::SCHEDULED_AUTHORITIES_CHANGE_DEADLINE), 4_000.0);
        assert_eq!(
            single(&samples, keys::BEST_CONFIRMED_ETHEREUM_BLOCK_NUMBER),
            11_000_100.0
        );
    }

    #[async_std::test]
    async fn malformed_best_confirmed_aborts_the_pass() {
        let mut session = healthy_session();
        session.set(
            &queries::BEST_CONFIRMED_BLOCK_NUMBER,
            StorageValue::Text("not a number".into()),
        );
        let err = Scraper::new(18).scrape(&mut session).await.unwrap_err();

        assert_eq!(err.kind(), "shape");
        assert!(matches!(
            err,
            ScrapeError::Shape { query, .. } if *query == queries::BEST_CONFIRMED_BLOCK_NUMBER
        ));
        // nothing after the failing query is asked for
        assert_eq!(
            session.calls.last().map(|(n, _)| n.as_str()),
            Some("EthereumRelay.BestConfirmedBlockNumber")
        );
    }

    #[async_std::test]
    async fn wrapped_number_is_a_shape_error() {
        let mut session = healthy_session();
        session.set(
            &queries::BEST_CONFIRMED_BLOCK_NUMBER,
            StorageValue::List(vec![number(5)]),
        );
        let err = Scraper::new(18).scrape(&mut session).await.unwrap_err();
        assert_eq!(err.kind(), "shape");
    }

    #[async_std::test]
    async fn transport_failure_at_any_step_aborts() {
        for query in queries::ALL {
            let mut session = healthy_session();
            session.fail(query);
            let err = Scraper::new(18).scrape(&mut session).await.unwrap_err();
            assert_eq!(err.kind(), "transport", "failing {query}");
            assert!(
                matches!(&err, ScrapeError::Transport { query: failed, .. } if *failed == query),
                "failing {query}"
            );
        }
    }

    #[async_std::test]
    async fn missing_active_era_is_an_error_not_a_zero() {
        let mut session = healthy_session();
        session.clear(&queries::ACTIVE_ERA);
        let err = Scraper::new(18).scrape(&mut session).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Absent { query } if *query == queries::ACTIVE_ERA));
        assert_eq!(session.calls.len(), 1);
    }

    #[async_std::test]
    async fn missing_validators_is_an_error() {
        let mut session = healthy_session();
        session.clear(&queries::VALIDATORS);
        let err = Scraper::new(18).scrape(&mut session).await.unwrap_err();
        assert_eq!(err.kind(), "absent");
    }

    #[async_std::test]
    async fn missing_session_index_defaults_to_zero() {
        let mut session = healthy_session();
        session.clear(&queries::SESSION_INDEX);
        let samples = Scraper::new(18).scrape(&mut session).await.unwrap();
        assert_eq!(single(&samples, keys::SESSION_INDEX), 0.0);
    }
}
