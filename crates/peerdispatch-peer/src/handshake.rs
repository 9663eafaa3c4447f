use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use peerdispatch_channel::names::{VERACK, VERSION};
use peerdispatch_channel::{ChannelError, Fields, Message, PeerReceiver, PeerSender};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::dispatcher::DispatcherHandle;
use crate::error::{DispatchError, Result};

/// Protocol version announced by default.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 70001;
/// Services bitmask announced by default (full node).
pub const DEFAULT_SERVICES: u64 = 1;
/// Port used for the default addresses.
pub const DEFAULT_PORT: u16 = 8333;

/// Network address as carried in the capability message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddress {
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(services: u64, ip: impl Into<IpAddr>, port: u16) -> Self {
        Self {
            services,
            ip: ip.into(),
            port,
        }
    }
}

impl Default for PeerAddress {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICES, Ipv4Addr::LOCALHOST, DEFAULT_PORT)
    }
}

/// Capability message sent as the first handshake step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: u32,
    pub subversion: String,
    pub services: u64,
    pub timestamp: u64,
    pub remote_address: PeerAddress,
    pub local_address: PeerAddress,
    pub nonce: u64,
    pub last_block_index: u32,
}

/// Configuration for the version/verack handshake.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Protocol version announced to the peer.
    pub protocol_version: u32,
    /// Client identification string.
    pub subversion: String,
    /// Services bitmask announced to the peer.
    pub services: u64,
    /// Address of the peer as seen from here.
    pub remote_address: PeerAddress,
    /// Our own address.
    pub local_address: PeerAddress,
    /// Height of the last block we know about.
    pub last_block_index: u32,
    /// Fixed nonce. `None` draws a random one per handshake.
    pub nonce: Option<u64>,
    /// Fixed timestamp in UNIX seconds. `None` uses the current time.
    pub timestamp: Option<u64>,
    /// Bound on each receive step. `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            subversion: format!("/peerdispatch:{}/", env!("CARGO_PKG_VERSION")),
            services: DEFAULT_SERVICES,
            remote_address: PeerAddress::default(),
            local_address: PeerAddress::default(),
            last_block_index: 0,
            nonce: None,
            timestamp: None,
            timeout: None,
        }
    }
}

impl HandshakeConfig {
    /// Override the announced subversion string.
    pub fn with_subversion(mut self, subversion: impl Into<String>) -> Self {
        self.subversion = subversion.into();
        self
    }

    /// Override both addresses.
    pub fn with_addresses(mut self, remote: PeerAddress, local: PeerAddress) -> Self {
        self.remote_address = remote;
        self.local_address = local;
        self
    }

    /// Override the announced chain height.
    pub fn with_last_block_index(mut self, last_block_index: u32) -> Self {
        self.last_block_index = last_block_index;
        self
    }

    /// Pin the nonce instead of drawing a random one.
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    /// Pin the timestamp instead of reading the clock.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Bound each receive step.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the capability message for one handshake attempt.
    pub fn version_message(&self) -> VersionMessage {
        VersionMessage {
            version: self.protocol_version,
            subversion: self.subversion.clone(),
            services: self.services,
            timestamp: self.timestamp.unwrap_or_else(unix_now),
            remote_address: self.remote_address.clone(),
            local_address: self.local_address.clone(),
            nonce: self.nonce.unwrap_or_else(rand::random),
            last_block_index: self.last_block_index,
        }
    }
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// `version` sent, waiting for the peer's `version`.
    AwaitCapability,
    /// `verack` sent, waiting for the peer's `verack`.
    AwaitAck,
    /// Both messages observed.
    Done,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitCapability => "await-capability",
            Self::AwaitAck => "await-ack",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Fields of the peer's `version` message.
#[derive(Debug, Clone, PartialEq)]
pub struct HandshakeResult {
    fields: Fields,
}

impl HandshakeResult {
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Peer protocol version.
    pub fn protocol_version(&self) -> Option<u64> {
        self.fields.get("version").and_then(Value::as_u64)
    }

    /// Peer client identification string.
    pub fn subversion(&self) -> Option<&str> {
        self.fields.get("subversion").and_then(Value::as_str)
    }

    /// Peer services bitmask.
    pub fn services(&self) -> Option<u64> {
        self.fields.get("services").and_then(Value::as_u64)
    }

    pub fn nonce(&self) -> Option<u64> {
        self.fields.get("nonce").and_then(Value::as_u64)
    }

    /// Height of the last block the peer knows about.
    pub fn last_block_index(&self) -> Option<u64> {
        self.fields.get("last_block_index").and_then(Value::as_u64)
    }

    /// Raw field map.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Decode the fields into a typed value, e.g. [`VersionMessage`].
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
            .map_err(|err| DispatchError::Channel(ChannelError::Decode(err.to_string())))
    }
}

/// Run the handshake with default configuration.
pub async fn handshake<S, R>(
    sender: &S,
    receiver: &mut R,
    handle: &DispatcherHandle,
) -> Result<HandshakeResult>
where
    S: PeerSender + ?Sized,
    R: PeerReceiver,
{
    handshake_with_config(sender, receiver, handle, &HandshakeConfig::default()).await
}

/// Run the handshake with explicit configuration.
///
/// Sends `version`, expects `version`, sends `verack`, expects `verack`.
/// Each received message is dispatched through `handle` before its name is
/// checked, so observers see it even when it breaks the protocol. There are
/// no retries.
pub async fn handshake_with_config<S, R>(
    sender: &S,
    receiver: &mut R,
    handle: &DispatcherHandle,
    config: &HandshakeConfig,
) -> Result<HandshakeResult>
where
    S: PeerSender + ?Sized,
    R: PeerReceiver,
{
    let mut state = HandshakeState::AwaitCapability;
    let local = config.version_message();
    debug!(%state, version = local.version, nonce = local.nonce, "sending version");
    sender.send(Message::from_serialize(VERSION, &local)?)?;

    let capability = receive_step(receiver, config.timeout).await?;
    handle.dispatch(&capability);
    expect_name(state, VERSION, &capability)?;

    state = HandshakeState::AwaitAck;
    debug!(%state, "sending verack");
    sender.send(Message::empty(VERACK))?;

    let ack = receive_step(receiver, config.timeout).await?;
    handle.dispatch(&ack);
    expect_name(state, VERACK, &ack)?;

    state = HandshakeState::Done;
    let result = HandshakeResult::new(capability.fields);
    debug!(
        %state,
        peer_version = ?result.protocol_version(),
        peer_subversion = ?result.subversion(),
        "handshake complete"
    );
    Ok(result)
}

async fn receive_step<R: PeerReceiver>(
    receiver: &mut R,
    timeout: Option<Duration>,
) -> Result<Message> {
    let message = match timeout {
        Some(limit) => tokio::time::timeout(limit, receiver.receive_next())
            .await
            .map_err(|_| DispatchError::Timeout(limit))??,
        None => receiver.receive_next().await?,
    };
    Ok(message)
}

fn expect_name(state: HandshakeState, expected: &'static str, message: &Message) -> Result<()> {
    if message.is(expected) {
        return Ok(());
    }
    debug!(%state, expected, received = %message.name, "handshake protocol violation");
    Err(DispatchError::HandshakeViolation {
        state,
        expected,
        received: message.name.clone(),
    })
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}
