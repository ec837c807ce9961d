//! Wire messages for the raw protocol streams.
//!
//! Two protocols are spoken directly over `libp2p_stream`:
//! - `/ipfs/kad/1.0.0` FIND_NODE, sent to a single peer
//! - `/ipfs/bitswap/1.2.0` want-have, sent by probe hosts
//!
//! Messages are protobuf (prost) framed with an unsigned-varint length prefix.

use crate::domain::addr_info::AddrInfo;
use anyhow::{anyhow, bail, Context, Result};
use cid::Cid;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use multihash_codetable::{Code, MultihashDigest};
use prost::Message;

pub const KAD_PROTOCOL: StreamProtocol = StreamProtocol::new("/ipfs/kad/1.0.0");
pub const BITSWAP_PROTOCOL: StreamProtocol = StreamProtocol::new("/ipfs/bitswap/1.2.0");

/// Largest message accepted on either protocol.
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

// ============================================================================
// Kademlia
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum KadMessageType {
    PutValue = 0,
    GetValue = 1,
    AddProvider = 2,
    GetProviders = 3,
    FindNode = 4,
    Ping = 5,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ConnectionType {
    NotConnected = 0,
    Connected = 1,
    CanConnect = 2,
    CannotConnect = 3,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KadPeer {
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub addrs: Vec<Vec<u8>>,
    #[prost(enumeration = "ConnectionType", tag = "3")]
    pub connection: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct KadMessage {
    #[prost(enumeration = "KadMessageType", tag = "1")]
    pub r#type: i32,
    #[prost(int32, tag = "10")]
    pub cluster_level_raw: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub key: Vec<u8>,
    #[prost(message, repeated, tag = "8")]
    pub closer_peers: Vec<KadPeer>,
    #[prost(message, repeated, tag = "9")]
    pub provider_peers: Vec<KadPeer>,
}

impl KadMessage {
    pub fn find_node(target: &PeerId) -> Self {
        Self {
            r#type: KadMessageType::FindNode as i32,
            key: target.to_bytes(),
            ..Default::default()
        }
    }

    /// Closer peers as address records. Entries with an undecodable peer id
    /// are dropped, as are individual undecodable addresses.
    pub fn closer_peer_infos(&self) -> Vec<AddrInfo> {
        self.closer_peers
            .iter()
            .filter_map(|peer| {
                let peer_id = PeerId::from_bytes(&peer.id).ok()?;
                let addrs = peer
                    .addrs
                    .iter()
                    .filter_map(|bytes| Multiaddr::try_from(bytes.clone()).ok());
                Some(AddrInfo::new(peer_id, addrs.collect()))
            })
            .collect()
    }
}

impl From<&AddrInfo> for KadPeer {
    fn from(info: &AddrInfo) -> Self {
        Self {
            id: info.peer_id.to_bytes(),
            addrs: info.addrs().iter().map(|a| a.to_vec()).collect(),
            connection: ConnectionType::NotConnected as i32,
        }
    }
}

// ============================================================================
// Bitswap
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WantType {
    Block = 0,
    Have = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum BlockPresenceType {
    Have = 0,
    DontHave = 1,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct WantlistEntry {
    #[prost(bytes = "vec", tag = "1")]
    pub block: Vec<u8>,
    #[prost(int32, tag = "2")]
    pub priority: i32,
    #[prost(bool, tag = "3")]
    pub cancel: bool,
    #[prost(enumeration = "WantType", tag = "4")]
    pub want_type: i32,
    #[prost(bool, tag = "5")]
    pub send_dont_have: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Wantlist {
    #[prost(message, repeated, tag = "1")]
    pub entries: Vec<WantlistEntry>,
    #[prost(bool, tag = "2")]
    pub full: bool,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlockPayload {
    #[prost(bytes = "vec", tag = "1")]
    pub prefix: Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BlockPresence {
    #[prost(bytes = "vec", tag = "1")]
    pub cid: Vec<u8>,
    #[prost(enumeration = "BlockPresenceType", tag = "2")]
    pub r#type: i32,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct BitswapMessage {
    #[prost(message, optional, tag = "1")]
    pub wantlist: Option<Wantlist>,
    /// Bitswap 1.0.0 raw blocks
    #[prost(bytes = "vec", repeated, tag = "2")]
    pub blocks: Vec<Vec<u8>>,
    #[prost(message, repeated, tag = "3")]
    pub payload: Vec<BlockPayload>,
    #[prost(message, repeated, tag = "4")]
    pub block_presences: Vec<BlockPresence>,
    #[prost(int32, tag = "5")]
    pub pending_bytes: i32,
}

impl BitswapMessage {
    /// A single want-have for `cid` that asks for an explicit DONT_HAVE.
    pub fn want_have(cid: &Cid) -> Self {
        Self {
            wantlist: Some(Wantlist {
                entries: vec![WantlistEntry {
                    block: cid.to_bytes(),
                    priority: 1,
                    cancel: false,
                    want_type: WantType::Have as i32,
                    send_dont_have: true,
                }],
                full: false,
            }),
            ..Default::default()
        }
    }

    /// What this message says about `cid`.
    ///
    /// `Some(true)` for a HAVE or the block itself, `Some(false)` for a
    /// DONT_HAVE, `None` if the message does not mention it.
    pub fn presence_of(&self, cid: &Cid) -> Option<bool> {
        for presence in &self.block_presences {
            let Ok(presence_cid) = Cid::try_from(presence.cid.as_slice()) else {
                continue;
            };
            if presence_cid.hash() != cid.hash() {
                continue;
            }
            match BlockPresenceType::try_from(presence.r#type) {
                Ok(BlockPresenceType::Have) => return Some(true),
                Ok(BlockPresenceType::DontHave) => return Some(false),
                Err(_) => continue,
            }
        }

        let in_payload = self
            .payload
            .iter()
            .filter_map(|block| cid_from_prefix(&block.prefix, &block.data).ok())
            .any(|block_cid| block_cid.hash() == cid.hash());
        if in_payload {
            return Some(true);
        }

        let in_blocks = self
            .blocks
            .iter()
            .any(|data| Code::Sha2_256.digest(data) == *cid.hash());
        in_blocks.then_some(true)
    }
}

/// Rebuild a block's CID from its Bitswap prefix and data.
///
/// The prefix is `<version><codec><multihash code><digest length>`, all
/// unsigned varints.
pub fn cid_from_prefix(prefix: &[u8], data: &[u8]) -> Result<Cid> {
    let (version, rest) = unsigned_varint::decode::u64(prefix)
        .map_err(|e| anyhow!("invalid cid version in prefix: {e}"))?;
    let (codec, rest) = unsigned_varint::decode::u64(rest)
        .map_err(|e| anyhow!("invalid codec in prefix: {e}"))?;
    let (mh_code, rest) = unsigned_varint::decode::u64(rest)
        .map_err(|e| anyhow!("invalid multihash code in prefix: {e}"))?;
    let (mh_len, _) = unsigned_varint::decode::u64(rest)
        .map_err(|e| anyhow!("invalid multihash length in prefix: {e}"))?;

    let code =
        Code::try_from(mh_code).map_err(|_| anyhow!("unsupported multihash code {mh_code:#x}"))?;
    let mut hash = code.digest(data);
    let mh_len = u8::try_from(mh_len).context("multihash length out of range")?;
    if mh_len < hash.size() {
        hash = hash.truncate(mh_len);
    }

    match version {
        0 => Cid::new_v0(hash).map_err(|e| anyhow!("invalid v0 cid: {e}")),
        1 => Ok(Cid::new_v1(codec, hash)),
        v => bail!("unsupported cid version {v}"),
    }
}

// ============================================================================
// Framing
// ============================================================================

/// Write one length-prefixed message and flush.
pub async fn write_message<S, M>(io: &mut S, msg: &M) -> Result<()>
where
    S: AsyncWrite + Unpin,
    M: Message,
{
    let bytes = msg.encode_length_delimited_to_vec();
    io.write_all(&bytes).await.context("Failed to write message")?;
    io.flush().await.context("Failed to flush message")?;
    Ok(())
}

/// Read one length-prefixed message, rejecting anything over
/// [`MAX_MESSAGE_SIZE`].
pub async fn read_message<S, M>(io: &mut S) -> Result<M>
where
    S: AsyncRead + Unpin,
    M: Message + Default,
{
    let len = unsigned_varint::aio::read_usize(&mut *io)
        .await
        .map_err(|e| anyhow!("Failed to read message length: {e}"))?;
    if len > MAX_MESSAGE_SIZE {
        bail!("message of {len} bytes exceeds limit of {MAX_MESSAGE_SIZE}");
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf)
        .await
        .context("Failed to read message body")?;
    M::decode(buf.as_slice()).context("Failed to decode message")
}
