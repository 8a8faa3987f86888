//! Beacon wire format: the on-wire layout of every discovery datagram.
//!
//! Every beacon starts with the 4-byte magic `"RN6U"` followed by a version
//! discriminator. Two layouts are live at the same time:
//!
//! - **V0** (legacy): `magic | reserved[4] | fixed fields`. Reserved byte 0
//!   doubles as the discriminator and is always `0x00`.
//! - **V1** (current): `magic | version = 0x01 | header_len | fixed fields`.
//!   `header_len` lets later revisions append header fields; a V1 receiver
//!   skips whatever it does not understand.
//!
//! All multi-byte integers are big-endian. Header types are zerocopy
//! layouts with compile-time size guards. There is no unsafe code in this
//! module.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use crate::peer::PeerId;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Leading bytes of every beacon.
pub const MAGIC: [u8; 4] = *b"RN6U";

/// Maximum user data carried by one beacon.
pub const MAX_USER_DATA: usize = 32768;

/// Maximum padding carried by one beacon.
pub const MAX_PADDING: usize = 32768;

/// Maximum total datagram size.
pub const MAX_PACKET: usize = 65536;

/// Magic plus the version discriminator byte. Nothing shorter can be classified.
const PREAMBLE_LEN: usize = 5;

const V0_DISCRIMINATOR: u8 = 0x00;
const V1_DISCRIMINATOR: u8 = 0x01;

// ── Packet ────────────────────────────────────────────────────────────────────

/// What a beacon says about its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// The sender is present. Carries the sender's current user data.
    IAmHere = 0x00,
    /// The sender is leaving. Receivers drop it without waiting for the TTL.
    IAmOutOfHere = 0x01,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketType::IAmHere),
            0x01 => Ok(PacketType::IAmOutOfHere),
            other => Err(WireError::UnknownPacketType(other)),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> u8 {
        t as u8
    }
}

/// Wire layout revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireVersion {
    /// Fixed 29-byte header, no explicit version tag.
    V0,
    /// Self-describing header with a version byte and header length.
    #[default]
    V1,
}

impl WireVersion {
    /// Newest layout this build can emit.
    pub const LATEST: WireVersion = WireVersion::V1;

    /// Every layout this build can decode, in decode priority order.
    pub const ALL: [WireVersion; 2] = [WireVersion::V0, WireVersion::V1];

    /// Header size written by this build for the given version.
    pub fn header_len(self) -> usize {
        match self {
            WireVersion::V0 => std::mem::size_of::<HeaderV0>(),
            WireVersion::V1 => std::mem::size_of::<HeaderV1>(),
        }
    }
}

/// A decoded beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    /// Scopes discovery to one logical application sharing a port.
    pub application_id: u32,
    /// Identity of the sending engine.
    pub peer_id: PeerId,
    /// Freshness marker. Higher wins.
    pub snapshot_index: u64,
    /// Opaque application payload.
    pub user_data: Bytes,
    /// Number of padding bytes following the user data. Content is ignored.
    pub padding_len: u16,
}

impl Packet {
    /// Build an unpadded packet.
    pub fn new(
        packet_type: PacketType,
        application_id: u32,
        peer_id: PeerId,
        snapshot_index: u64,
        user_data: impl Into<Bytes>,
    ) -> Self {
        Self {
            packet_type,
            application_id,
            peer_id,
            snapshot_index,
            user_data: user_data.into(),
            padding_len: 0,
        }
    }

    /// Pad so the encoded datagram is at least `min_size` bytes for `version`.
    ///
    /// Padding is capped at `MAX_PADDING`, so a `min_size` beyond what the cap
    /// can reach yields a smaller, still encodable, datagram.
    pub fn pad_to(mut self, version: WireVersion, min_size: usize) -> Self {
        let unpadded = version.header_len() + self.user_data.len();
        let wanted = min_size.saturating_sub(unpadded).min(MAX_PADDING);
        self.padding_len = wanted as u16;
        self
    }
}

// ── Headers ───────────────────────────────────────────────────────────────────

/// Legacy header. Wire size: 29 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct HeaderV0 {
    magic: [u8; 4],
    /// Byte 0 is the version discriminator (0x00). Bytes 1..4 are ignored.
    reserved: [u8; 4],
    packet_type: u8,
    application_id: U32<BigEndian>,
    peer_id: U32<BigEndian>,
    snapshot_index: U64<BigEndian>,
    user_data_len: U16<BigEndian>,
    padding_len: U16<BigEndian>,
}

assert_eq_size!(HeaderV0, [u8; 29]);

/// Current header. Wire size: 27 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
struct HeaderV1 {
    magic: [u8; 4],
    version: u8,
    /// Total header length including any fields appended by later revisions.
    header_len: u8,
    packet_type: u8,
    application_id: U32<BigEndian>,
    peer_id: U32<BigEndian>,
    snapshot_index: U64<BigEndian>,
    user_data_len: U16<BigEndian>,
    padding_len: U16<BigEndian>,
}

assert_eq_size!(HeaderV1, [u8; 27]);

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Encode `packet` using the `version` layout.
///
/// Fails instead of truncating when user data, padding, or the total size
/// exceeds its bound.
pub fn serialize(packet: &Packet, version: WireVersion) -> Result<Bytes, WireError> {
    let user_len = packet.user_data.len();
    if user_len > MAX_USER_DATA {
        return Err(WireError::UserDataTooLarge(user_len));
    }

    let padding_len = packet.padding_len as usize;
    if padding_len > MAX_PADDING {
        return Err(WireError::PaddingTooLarge(padding_len));
    }

    let total = version.header_len() + user_len + padding_len;
    if total > MAX_PACKET {
        return Err(WireError::PacketTooLarge(total));
    }

    let application_id = U32::new(packet.application_id);
    let peer_id = U32::new(packet.peer_id.get());
    let snapshot_index = U64::new(packet.snapshot_index);
    let user_data_len = U16::new(user_len as u16);
    let padding = U16::new(packet.padding_len);

    let mut out = BytesMut::with_capacity(total);
    match version {
        WireVersion::V0 => {
            let header = HeaderV0 {
                magic: MAGIC,
                reserved: [V0_DISCRIMINATOR, 0, 0, 0],
                packet_type: packet.packet_type.into(),
                application_id,
                peer_id,
                snapshot_index,
                user_data_len,
                padding_len: padding,
            };
            out.put_slice(header.as_bytes());
        }
        WireVersion::V1 => {
            let header = HeaderV1 {
                magic: MAGIC,
                version: V1_DISCRIMINATOR,
                header_len: std::mem::size_of::<HeaderV1>() as u8,
                packet_type: packet.packet_type.into(),
                application_id,
                peer_id,
                snapshot_index,
                user_data_len,
                padding_len: padding,
            };
            out.put_slice(header.as_bytes());
        }
    }
    out.put_slice(&packet.user_data);
    out.resize(total, 0);

    Ok(out.freeze())
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// A layout decoder. Returns `None` when the buffer is not in its layout.
type Decoder = fn(&[u8]) -> Option<Result<Packet, WireError>>;

const DECODERS: [(WireVersion, Decoder); 2] = [
    (WireVersion::V0, decode_v0),
    (WireVersion::V1, decode_v1),
];

/// Decode a datagram, reporting which layout it was written in.
pub fn parse(buf: &[u8]) -> Result<(WireVersion, Packet), WireError> {
    if buf.len() < PREAMBLE_LEN {
        return Err(WireError::Truncated {
            needed: PREAMBLE_LEN,
            available: buf.len(),
        });
    }
    if buf[..4] != MAGIC {
        return Err(WireError::BadMagic);
    }

    for (version, decode) in DECODERS {
        if let Some(result) = decode(buf) {
            return result.map(|packet| (version, packet));
        }
    }

    Err(WireError::UnknownVersion(buf[4]))
}

fn decode_v0(buf: &[u8]) -> Option<Result<Packet, WireError>> {
    if buf[4] != V0_DISCRIMINATOR {
        return None;
    }
    Some(read_v0(buf))
}

fn read_v0(buf: &[u8]) -> Result<Packet, WireError> {
    let header_len = std::mem::size_of::<HeaderV0>();
    let header = HeaderV0::read_from_prefix(buf).ok_or(WireError::Truncated {
        needed: header_len,
        available: buf.len(),
    })?;
    let packet_type = PacketType::try_from(header.packet_type)?;
    let padding_len = header.padding_len.get();
    let user_data = read_body(buf, header_len, header.user_data_len.get(), padding_len)?;

    Ok(Packet {
        packet_type,
        application_id: header.application_id.get(),
        peer_id: PeerId::from(header.peer_id.get()),
        snapshot_index: header.snapshot_index.get(),
        user_data,
        padding_len,
    })
}

fn decode_v1(buf: &[u8]) -> Option<Result<Packet, WireError>> {
    if buf[4] != V1_DISCRIMINATOR {
        return None;
    }
    Some(read_v1(buf))
}

fn read_v1(buf: &[u8]) -> Result<Packet, WireError> {
    let fixed_len = std::mem::size_of::<HeaderV1>();
    if let Some(&declared) = buf.get(5) {
        if (declared as usize) < fixed_len {
            return Err(WireError::HeaderTooShort(declared));
        }
    }
    let header = HeaderV1::read_from_prefix(buf).ok_or(WireError::Truncated {
        needed: fixed_len,
        available: buf.len(),
    })?;
    let header_len = header.header_len as usize;
    if header_len > buf.len() {
        return Err(WireError::Truncated {
            needed: header_len,
            available: buf.len(),
        });
    }
    let packet_type = PacketType::try_from(header.packet_type)?;
    let padding_len = header.padding_len.get();
    let user_data = read_body(buf, header_len, header.user_data_len.get(), padding_len)?;

    Ok(Packet {
        packet_type,
        application_id: header.application_id.get(),
        peer_id: PeerId::from(header.peer_id.get()),
        snapshot_index: header.snapshot_index.get(),
        user_data,
        padding_len,
    })
}

/// Bounds-check the declared body against the buffer and copy the user data out.
/// Bytes past the padding are ignored.
fn read_body(
    buf: &[u8],
    header_len: usize,
    user_data_len: u16,
    padding_len: u16,
) -> Result<Bytes, WireError> {
    let user_end = header_len + user_data_len as usize;
    let needed = user_end + padding_len as usize;
    if needed > buf.len() {
        return Err(WireError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(Bytes::copy_from_slice(&buf[header_len..user_end]))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("datagram too short: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("bad magic")]
    BadMagic,

    #[error("unknown packet type: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("declared header length {0} is shorter than the fixed header")]
    HeaderTooShort(u8),

    #[error("user data length {0} exceeds maximum {}", MAX_USER_DATA)]
    UserDataTooLarge(usize),

    #[error("padding length {0} exceeds maximum {}", MAX_PADDING)]
    PaddingTooLarge(usize),

    #[error("packet length {0} exceeds maximum {}", MAX_PACKET)]
    PacketTooLarge(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
