//! Well-known message names.
//!
//! `version` and `verack` make up the handshake; everything else is
//! steady-state traffic.

/// Capability announcement, first handshake message.
pub const VERSION: &str = "version";
/// Handshake acknowledgement.
pub const VERACK: &str = "verack";
/// Inventory announcement.
pub const INV: &str = "inv";
/// Requested inventory is not available.
pub const NOTFOUND: &str = "notfound";
/// Request for inventory contents.
pub const GETDATA: &str = "getdata";
/// Request for block headers.
pub const GETHEADERS: &str = "getheaders";
/// Block headers.
pub const HEADERS: &str = "headers";
/// Block contents.
pub const BLOCK: &str = "block";
/// Filtered block.
pub const MERKLEBLOCK: &str = "merkleblock";
/// Transaction contents.
pub const TX: &str = "tx";
/// Request for the peer's mempool inventory.
pub const MEMPOOL: &str = "mempool";
/// Keepalive request.
pub const PING: &str = "ping";
/// Keepalive response.
pub const PONG: &str = "pong";
