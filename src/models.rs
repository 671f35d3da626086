use crate::substrate::{ShapeError, StorageValue};
use std::fmt;

// chain storage types the exporter reads
pub type EraIndex = u32;
pub type RewardPoint = u32;
pub type BlockNumber = u64;

// raw 32 byte account id, displayed as lowercase hex without 0x
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    pub fn decode(value: &StorageValue) -> Result<Self, ShapeError> {
        let bytes = value.as_bytes()?;
        let found = bytes.len();
        <[u8; 32]>::try_from(bytes)
            .map(Self)
            .map_err(|_| ShapeError::OutOfRange {
                value: found as u128,
                target: "32 byte account id",
            })
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

// staking.activeEra
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveEraInfo {
    pub index: EraIndex,
}

impl ActiveEraInfo {
    pub fn decode(value: &StorageValue) -> Result<Self, ShapeError> {
        Ok(Self {
            index: value.field("index")?.as_u32()?,
        })
    }
}

// session.validators
pub fn decode_validators(value: &StorageValue) -> Result<Vec<AccountId>, ShapeError> {
    value.as_list()?.iter().map(AccountId::decode).collect()
}

// staking.erasRewardPoints
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EraRewardPoints {
    pub total: RewardPoint,
    pub individual: Vec<(AccountId, RewardPoint)>,
}

impl EraRewardPoints {
    pub fn decode(value: &StorageValue) -> Result<Self, ShapeError> {
        let individual = value
            .field("individual")?
            .as_list()?
            .iter()
            .map(|entry| {
                Ok((
                    AccountId::decode(entry.index(0)?)?,
                    entry.index(1)?.as_u32()?,
                ))
            })
            .collect::<Result<_, ShapeError>>()?;
        Ok(Self {
            total: value.field("total")?.as_u32()?,
            individual,
        })
    }
}

// ethereumRelay.pendingRelayHeaderParcels entry:
// (submitted at, parcel { header { number, .. }, .. }, voting state)
#[derive(Debug, Clone, PartialEq)]
pub struct PendingHeader {
    pub block_number: BlockNumber,
    pub ethereum_block_number: BlockNumber,
}

impl PendingHeader {
    pub fn decode(value: &StorageValue) -> Result<Self, ShapeError> {
        Ok(Self {
            block_number: value.index(0)?.as_u64()?,
            ethereum_block_number: value
                .index(1)?
                .field("header")?
                .field("number")?
                .as_u64()?,
        })
    }
}

pub fn decode_pending_headers(value: &StorageValue) -> Result<Vec<PendingHeader>, ShapeError> {
    value.as_list()?.iter().map(PendingHeader::decode).collect()
}

// ethereumRelayAuthorities.authoritiesToSign: (message, [(authority, signature)])
#[derive(Debug, Clone, PartialEq)]
pub struct AuthoritiesToSign {
    pub votes: usize,
}

impl AuthoritiesToSign {
    pub fn decode(value: &StorageValue) -> Result<Self, ShapeError> {
        Ok(Self {
            votes: value.index(1)?.as_list()?.len(),
        })
    }
}

// ethereumRelayAuthorities.scheduledAuthoritiesChange
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAuthoritiesChange {
    pub deadline: BlockNumber,
}

impl ScheduledAuthoritiesChange {
    pub fn decode(value: &StorageValue) -> Result<Self, ShapeError> {
        Ok(Self {
            deadline: value.field("deadline")?.as_u64()?,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn account_id_displays_as_bare_hex() {
        let hex = "d43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";
        assert_eq!(account_from_hex(hex).to_string(), hex);
        assert_eq!(account(0xab).to_string(), "ab".repeat(32));
    }

    #[test]
    fn short_account_is_rejected() {
        let value = StorageValue::List(vec![number(1), number(2)]);
        assert!(matches!(
            AccountId::decode(&value),
            Err(ShapeError::OutOfRange { value: 2, .. })
        ));
    }

    #[test]
    fn decodes_active_era() {
        assert_eq!(ActiveEraInfo::decode(&active_era(321)).unwrap().index, 321);
        assert!(ActiveEraInfo::decode(&number(321)).is_err());
    }

    #[test]
    fn decodes_reward_points() {
        let points = EraRewardPoints::decode(&reward_points(&[
            (account(1), 100),
            (account(2), 40),
        ]))
        .unwrap();
        assert_eq!(points.total, 140);
        assert_eq!(
            points.individual,
            vec![(account(1), 100), (account(2), 40)]
        );
    }

    #[test]
    fn decodes_pending_headers() {
        let headers = decode_pending_headers(&pending_headers(&[(10, 9_000_001), (12, 9_000_005)]))
            .unwrap();
        assert_eq!(
            headers,
            vec![
                PendingHeader {
                    block_number: 10,
                    ethereum_block_number: 9_000_001
                },
                PendingHeader {
                    block_number: 12,
                    ethereum_block_number: 9_000_005
                },
            ]
        );
    }

    #[test]
    fn counts_signature_votes() {
        assert_eq!(
            AuthoritiesToSign::decode(&authorities_to_sign(3)).unwrap().votes,
            3
        );
        assert!(AuthoritiesToSign::decode(&number(3)).is_err());
    }

    #[test]
    fn decodes_scheduled_change_deadline() {
        let value = record(vec![
            ("next_authorities", StorageValue::List(vec![])),
            ("deadline", number(77)),
        ]);
        assert_eq!(
            ScheduledAuthoritiesChange::decode(&value).unwrap().deadline,
            77
        );
    }
}
