use log::{debug, info, trace};
use scale_value::{Composite, Primitive, ValueDef, Variant};
use std::fmt;
use std::future::Future;
use subxt::backend::rpc::RpcClient;
use subxt::client::RuntimeVersion;
use subxt::dynamic::Value;
use subxt::utils::H256;
use subxt::{Metadata, OnlineClient, PolkadotConfig};

// decoded storage value, detached from the runtime type registry.
// `Absent` is the only way a session reports an empty storage slot.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageValue {
    Absent,
    Number(u128),
    Text(String),
    Bool(bool),
    List(Vec<StorageValue>),
    Record(Vec<(String, StorageValue)>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    #[error("expected {expected}, found {found}")]
    Unexpected {
        expected: &'static str,
        found: &'static str,
    },
    #[error("missing field {0:?}")]
    MissingField(String),
    #[error("missing element {0}")]
    MissingIndex(usize),
    #[error("{value} does not fit into {target}")]
    OutOfRange { value: u128, target: &'static str },
}

impl StorageValue {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageValue::Absent => "absent",
            StorageValue::Number(_) => "number",
            StorageValue::Text(_) => "text",
            StorageValue::Bool(_) => "bool",
            StorageValue::List(_) => "list",
            StorageValue::Record(_) => "record",
        }
    }

    fn unexpected(&self, expected: &'static str) -> ShapeError {
        ShapeError::Unexpected {
            expected,
            found: self.kind(),
        }
    }

    // accessors are strict: a number wrapped in a one-element list is a list
    pub fn as_u128(&self) -> Result<u128, ShapeError> {
        match self {
            StorageValue::Number(n) => Ok(*n),
            other => Err(other.unexpected("number")),
        }
    }

    pub fn as_u64(&self) -> Result<u64, ShapeError> {
        let n = self.as_u128()?;
        u64::try_from(n).map_err(|_| ShapeError::OutOfRange {
            value: n,
            target: "u64",
        })
    }

    pub fn as_u32(&self) -> Result<u32, ShapeError> {
        let n = self.as_u128()?;
        u32::try_from(n).map_err(|_| ShapeError::OutOfRange {
            value: n,
            target: "u32",
        })
    }

    pub fn as_list(&self) -> Result<&[StorageValue], ShapeError> {
        match self {
            StorageValue::List(items) => Ok(items),
            other => Err(other.unexpected("list")),
        }
    }

    // element `i` of a tuple or sequence
    pub fn index(&self, i: usize) -> Result<&StorageValue, ShapeError> {
        match self {
            StorageValue::List(items) => items.get(i).ok_or(ShapeError::MissingIndex(i)),
            StorageValue::Record(fields) => fields
                .get(i)
                .map(|(_, v)| v)
                .ok_or(ShapeError::MissingIndex(i)),
            other => Err(other.unexpected("list")),
        }
    }

    pub fn field(&self, name: &str) -> Result<&StorageValue, ShapeError> {
        match self {
            StorageValue::Record(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v)
                .ok_or_else(|| ShapeError::MissingField(name.into())),
            other => Err(other.unexpected("record")),
        }
    }

    // byte arrays such as AccountId32 decode as a wrapped list of u8 numbers
    pub fn as_bytes(&self) -> Result<Vec<u8>, ShapeError> {
        let mut value = self;
        while let StorageValue::List(items) = value {
            match items.as_slice() {
                [inner @ StorageValue::List(_)] => value = inner,
                _ => break,
            }
        }
        value
            .as_list()?
            .iter()
            .map(|item| match item {
                StorageValue::Number(n) => u8::try_from(*n).map_err(|_| ShapeError::OutOfRange {
                    value: *n,
                    target: "u8",
                }),
                other => Err(other.unexpected("byte")),
            })
            .collect()
    }
}

impl<T> From<scale_value::Value<T>> for StorageValue {
    fn from(value: scale_value::Value<T>) -> Self {
        match value.value {
            ValueDef::Composite(composite) => composite.into(),
            ValueDef::Variant(Variant { name, values }) => {
                if values.is_empty() && name == "None" {
                    StorageValue::Absent
                } else if values.is_empty() {
                    StorageValue::Text(name)
                } else if name == "Some" && values.len() == 1 {
                    values
                        .into_values()
                        .next()
                        .map_or(StorageValue::Absent, Into::into)
                } else {
                    StorageValue::Record(vec![(name, values.into())])
                }
            }
            ValueDef::BitSequence(bits) => {
                StorageValue::List(bits.iter().map(StorageValue::Bool).collect())
            }
            ValueDef::Primitive(primitive) => primitive.into(),
        }
    }
}

impl<T> From<Composite<T>> for StorageValue {
    fn from(composite: Composite<T>) -> Self {
        match composite {
            Composite::Named(fields) => StorageValue::Record(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, value.into()))
                    .collect(),
            ),
            Composite::Unnamed(values) => {
                StorageValue::List(values.into_iter().map(Into::into).collect())
            }
        }
    }
}

impl From<Primitive> for StorageValue {
    fn from(primitive: Primitive) -> Self {
        match primitive {
            Primitive::Bool(b) => StorageValue::Bool(b),
            Primitive::Char(c) => StorageValue::Text(c.to_string()),
            Primitive::String(s) => StorageValue::Text(s),
            Primitive::U128(n) => StorageValue::Number(n),
            Primitive::I128(n) => match u128::try_from(n) {
                Ok(n) => StorageValue::Number(n),
                Err(_) => StorageValue::Text(n.to_string()),
            },
            Primitive::U256(bytes) | Primitive::I256(bytes) => {
                // little endian; only the low half is representable as a number
                let (low, high) = bytes.split_at(16);
                match (high.iter().all(|b| *b == 0), <[u8; 16]>::try_from(low)) {
                    (true, Ok(low)) => StorageValue::Number(u128::from_le_bytes(low)),
                    _ => StorageValue::Text(format!("0x{}", hex::encode(bytes))),
                }
            }
        }
    }
}

// a storage map key argument, encoded by subxt against the key type in metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyArg {
    U32(u32),
}

impl KeyArg {
    // SCALE form of the key, fixed width little endian
    pub fn encoded(&self) -> Vec<u8> {
        match self {
            KeyArg::U32(n) => n.to_le_bytes().to_vec(),
        }
    }

    pub fn to_value(self) -> Value {
        match self {
            KeyArg::U32(n) => Value::u128(n as u128),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("rpc: {0}")]
    Rpc(#[from] subxt::Error),
    #[error("decode storage {section}.{method}: {source}")]
    Decode {
        section: &'static str,
        method: &'static str,
        source: subxt::Error,
    },
}

// one open connection to a node, queries are issued one at a time
pub trait ChainSession: Send {
    fn query(
        &mut self,
        section: &'static str,
        method: &'static str,
        args: Vec<KeyArg>,
    ) -> impl Future<Output = Result<StorageValue, SessionError>> + Send;
}

// opens a fresh session per scrape, closed when dropped
pub trait Connector: Send + Sync + 'static {
    type Session: ChainSession;

    fn connect(&self) -> impl Future<Output = Result<Self::Session, SessionError>> + Send;
}

// substrate rpc actions
pub struct SubstrateRPC {
    client: OnlineClient<PolkadotConfig>,
}

impl fmt::Debug for SubstrateRPC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstrateRPC")
            .field("genesis_hash", &self.client.genesis_hash())
            .finish()
    }
}

impl ChainSession for SubstrateRPC {
    async fn query(
        &mut self,
        section: &'static str,
        method: &'static str,
        args: Vec<KeyArg>,
    ) -> Result<StorageValue, SessionError> {
        if !args.is_empty() {
            let keys: Vec<String> = args.iter().map(|a| hex::encode(a.encoded())).collect();
            trace!("Storage {section}.{method} keyed by 0x{}", keys.join(", 0x"));
        }
        let keys: Vec<Value> = args.into_iter().map(KeyArg::to_value).collect();
        let query = subxt::dynamic::storage(section, method, keys);

        let storage = self.client.storage().at_latest().await?;
        let Some(thunk) = storage.fetch(&query).await? else {
            trace!("Storage {section}.{method} is empty");
            return Ok(StorageValue::Absent);
        };

        let value = thunk.to_value().map_err(|source| SessionError::Decode {
            section,
            method,
            source: subxt::Error::Decode(source),
        })?;
        let value = StorageValue::from(value);
        trace!("Decoded storage {section}.{method}: {value:?}");
        Ok(value)
    }
}

// runtime metadata is fetched once at startup, each scrape only dials a new websocket
#[derive(Clone)]
pub struct SubstrateConnector {
    endpoint: String,
    genesis_hash: H256,
    runtime_version: RuntimeVersion,
    metadata: Metadata,
}

impl fmt::Debug for SubstrateConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubstrateConnector")
            .field("endpoint", &self.endpoint)
            .field("genesis_hash", &self.genesis_hash)
            .finish()
    }
}

impl SubstrateConnector {
    // connect once and keep what every later session needs; failing here is fatal
    pub async fn bootstrap(endpoint: impl Into<String>) -> Result<Self, SessionError> {
        let endpoint = endpoint.into();
        let client = OnlineClient::<PolkadotConfig>::from_url(&endpoint).await?;
        info!(
            "Node {} reachable, genesis {:?}, {} pallets in runtime metadata",
            endpoint,
            client.genesis_hash(),
            client.metadata().pallets().len()
        );
        Ok(Self {
            genesis_hash: client.genesis_hash(),
            runtime_version: client.runtime_version(),
            metadata: client.metadata(),
            endpoint,
        })
    }
}

impl Connector for SubstrateConnector {
    type Session = SubstrateRPC;

    async fn connect(&self) -> Result<SubstrateRPC, SessionError> {
        let rpc = RpcClient::from_url(&self.endpoint).await?;
        let client = OnlineClient::<PolkadotConfig>::from_rpc_client_with(
            self.genesis_hash,
            self.runtime_version.clone(),
            self.metadata.clone(),
            rpc,
        )?;
        debug!("Connected to {}", self.endpoint);
        Ok(SubstrateRPC { client })
    }
}
