//! The packet: one typed message on the wire.
//!
//! A packet is kept as its complete wire image, header included, plus a
//! cursor. Reads and writes move the cursor forward; the header's
//! `payload_len` field is rewritten on every change so the buffer is always
//! ready to be sent as-is.
//!
//! ```text
//! ┌──────────┬──────────────────┬──────────────────┬─────────────┐
//! │ "FTSS"   │ request_id (u32) │ payload_len (u32)│ payload     │
//! │ 4 bytes  │ 4 bytes, LE      │ 4 bytes, LE      │ N bytes     │
//! └──────────┴──────────────────┴──────────────────┴─────────────┘
//! ```

use crate::error::Result;
use crate::request::RequestId;
use bytes::{BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};

/// Identifier every packet starts with.
pub const MAGIC: [u8; 4] = *b"FTSS";

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = 12;

const REQUEST_ID_OFFSET: usize = 4;
const PAYLOAD_LEN_OFFSET: usize = 8;

/// Decoded fixed header of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub request_id: RequestId,
    pub payload_len: u32,
}

impl PacketHeader {
    /// Parses a header, returning `None` if the magic does not match.
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Option<Self> {
        if raw[..REQUEST_ID_OFFSET] != MAGIC {
            return None;
        }

        Some(Self {
            request_id: RequestId(read_u32_le(&raw[REQUEST_ID_OFFSET..])),
            payload_len: read_u32_le(&raw[PAYLOAD_LEN_OFFSET..]),
        })
    }
}

fn read_u32_le(raw: &[u8]) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&raw[..4]);
    u32::from_le_bytes(bytes)
}

/// Values that can be appended to a packet.
pub trait Append {
    fn append_to(self, buf: &mut BytesMut);
}

/// Fixed-width values that can be read back from a packet.
pub trait Extract: Sized {
    const SIZE: usize;

    /// Decodes from exactly `SIZE` little-endian bytes.
    fn extract(raw: &[u8]) -> Self;

    /// What a read past the end yields.
    fn zero() -> Self;
}

macro_rules! wire_number {
    ($($ty:ty),*) => {
        $(
            impl Append for $ty {
                fn append_to(self, buf: &mut BytesMut) {
                    buf.put_slice(&self.to_le_bytes());
                }
            }

            impl Extract for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn extract(raw: &[u8]) -> Self {
                    let mut bytes = [0u8; std::mem::size_of::<$ty>()];
                    bytes.copy_from_slice(&raw[..Self::SIZE]);
                    <$ty>::from_le_bytes(bytes)
                }

                fn zero() -> Self {
                    0 as $ty
                }
            }
        )*
    };
}

wire_number!(i8, u8, i16, u16, i32, u32, i64, u64, f32, f64);

impl Append for bool {
    fn append_to(self, buf: &mut BytesMut) {
        buf.put_u8(self as u8);
    }
}

impl Extract for bool {
    const SIZE: usize = 1;

    fn extract(raw: &[u8]) -> Self {
        raw[0] != 0
    }

    fn zero() -> Self {
        false
    }
}

impl Append for RequestId {
    fn append_to(self, buf: &mut BytesMut) {
        buf.put_u32_le(self.0);
    }
}

impl Extract for RequestId {
    const SIZE: usize = 4;

    fn extract(raw: &[u8]) -> Self {
        RequestId(u32::extract(raw))
    }

    fn zero() -> Self {
        RequestId::NULL
    }
}

/// Strings go out NUL-terminated. Anything after an embedded NUL is dropped,
/// since the reader could never see it.
impl Append for &str {
    fn append_to(self, buf: &mut BytesMut) {
        let bytes = self.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        buf.put_slice(&bytes[..end]);
        buf.put_u8(0);
    }
}

impl Append for &String {
    fn append_to(self, buf: &mut BytesMut) {
        self.as_str().append_to(buf);
    }
}

impl Append for String {
    fn append_to(self, buf: &mut BytesMut) {
        self.as_str().append_to(buf);
    }
}

/// Raw bytes are written verbatim, without any length prefix.
impl Append for &[u8] {
    fn append_to(self, buf: &mut BytesMut) {
        buf.put_slice(self);
    }
}

/// One message with its header, payload and a read/write cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: BytesMut,
    cursor: usize,
}

impl Packet {
    /// Creates an empty packet of the given type, cursor at payload start.
    pub fn new(request_id: RequestId) -> Self {
        let mut data = BytesMut::with_capacity(HEADER_LEN + 64);
        data.put_slice(&MAGIC);
        data.put_u32_le(request_id.0);
        data.put_u32_le(0);

        Self {
            data,
            cursor: HEADER_LEN,
        }
    }

    /// Creates a packet holding `payload`, cursor at payload start.
    pub fn with_payload(request_id: RequestId, payload: &[u8]) -> Self {
        let mut packet = Self::new(request_id);
        packet.append(payload);
        packet.rewind();
        packet
    }

    /// Parses one complete wire image. Returns `None` unless it is valid.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let header: &[u8; HEADER_LEN] = raw.get(..HEADER_LEN)?.try_into().ok()?;
        let header = PacketHeader::parse(header)?;
        if header.payload_len as usize != raw.len() - HEADER_LEN {
            return None;
        }

        Some(Self {
            data: BytesMut::from(raw),
            cursor: HEADER_LEN,
        })
    }

    /// Magic matches and the declared payload length fits the buffer.
    pub fn is_valid(&self) -> bool {
        self.data.len() >= HEADER_LEN
            && self.data[..REQUEST_ID_OFFSET] == MAGIC
            && self.payload_len() as usize + HEADER_LEN == self.data.len()
    }

    pub fn request_id(&self) -> RequestId {
        RequestId(read_u32_le(&self.data[REQUEST_ID_OFFSET..]))
    }

    pub fn set_request_id(&mut self, request_id: RequestId) -> &mut Self {
        self.data[REQUEST_ID_OFFSET..PAYLOAD_LEN_OFFSET].copy_from_slice(&request_id.0.to_le_bytes());
        self
    }

    /// Payload length as declared in the header.
    pub fn payload_len(&self) -> u32 {
        read_u32_le(&self.data[PAYLOAD_LEN_OFFSET..])
    }

    /// Header plus payload.
    pub fn total_len(&self) -> u32 {
        self.payload_len() + HEADER_LEN as u32
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[HEADER_LEN..]
    }

    /// The exact bytes that go on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Cursor offset relative to the payload start.
    pub fn position(&self) -> usize {
        self.cursor - HEADER_LEN
    }

    /// Bytes left between the cursor and the end of the payload.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cursor)
    }

    /// Moves the cursor back to the start of the payload.
    pub fn rewind(&mut self) -> &mut Self {
        self.cursor = HEADER_LEN;
        self
    }

    /// Writes `value` at the cursor and moves the cursor behind it.
    ///
    /// Whatever followed the cursor is discarded first, so appending to a
    /// rewound packet overwrites its payload.
    pub fn append<T: Append>(&mut self, value: T) -> &mut Self {
        self.data.truncate(self.cursor);
        value.append_to(&mut self.data);
        self.cursor = self.data.len();
        self.sync_payload_len();
        self
    }

    /// Appends a serde value in bincode's fixed-width little-endian layout.
    pub fn append_struct<T: Serialize>(&mut self, value: &T) -> Result<&mut Self> {
        self.data.truncate(self.cursor);
        let written = bincode::serialize_into((&mut self.data).writer(), value);
        self.cursor = self.data.len();
        self.sync_payload_len();
        written?;
        Ok(self)
    }

    /// Reads one fixed-width value. Past the end this yields zero and leaves
    /// the cursor where it was.
    pub fn get<T: Extract>(&mut self) -> T {
        if self.remaining() < T::SIZE {
            return T::zero();
        }

        let value = T::extract(&self.data[self.cursor..self.cursor + T::SIZE]);
        self.cursor += T::SIZE;
        value
    }

    pub fn get_u8(&mut self) -> u8 {
        self.get()
    }

    pub fn get_u16(&mut self) -> u16 {
        self.get()
    }

    pub fn get_u32(&mut self) -> u32 {
        self.get()
    }

    pub fn get_u64(&mut self) -> u64 {
        self.get()
    }

    pub fn get_i8(&mut self) -> i8 {
        self.get()
    }

    pub fn get_i16(&mut self) -> i16 {
        self.get()
    }

    pub fn get_i32(&mut self) -> i32 {
        self.get()
    }

    pub fn get_i64(&mut self) -> i64 {
        self.get()
    }

    pub fn get_f32(&mut self) -> f32 {
        self.get()
    }

    pub fn get_f64(&mut self) -> f64 {
        self.get()
    }

    pub fn get_bool(&mut self) -> bool {
        self.get()
    }

    /// Reads up to `max_len` raw bytes; `0` reads everything up to the end.
    pub fn get_bytes(&mut self, max_len: usize) -> Vec<u8> {
        let available = self.remaining();
        let len = if max_len == 0 {
            available
        } else {
            max_len.min(available)
        };

        let bytes = self.data[self.cursor..self.cursor + len].to_vec();
        self.cursor += len;
        bytes
    }

    /// Reads a serde value written by [`Packet::append_struct`].
    /// Returns `None` and keeps the cursor if the bytes do not decode.
    pub fn get_struct<T: DeserializeOwned>(&mut self) -> Option<T> {
        let mut rest = &self.data[self.cursor.min(self.data.len())..];
        let before = rest.len();
        let value = bincode::deserialize_from(&mut rest).ok()?;
        self.cursor += before - rest.len();
        Some(value)
    }

    /// Reads the NUL-terminated string at the cursor and moves past it.
    ///
    /// A string missing its terminator runs to the end of the payload.
    pub fn get_string(&mut self) -> String {
        let Some((text, consumed)) = self.peek_string() else {
            return String::new();
        };
        self.cursor += consumed;
        text
    }

    /// Like [`Packet::get_string`], but cuts the string out of the payload.
    /// The cursor keeps its absolute position and now points at whatever
    /// followed the string.
    pub fn extract_string(&mut self) -> String {
        let Some((text, consumed)) = self.peek_string() else {
            return String::new();
        };

        let tail = self.data.split_off(self.cursor + consumed);
        self.data.truncate(self.cursor);
        self.data.extend_from_slice(&tail);
        self.sync_payload_len();
        text
    }

    /// Text at the cursor and the number of bytes it occupies.
    fn peek_string(&self) -> Option<(String, usize)> {
        if self.cursor >= self.data.len() {
            return None;
        }

        let rest = &self.data[self.cursor..];
        let (text, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(nul) => (&rest[..nul], nul + 1),
            None => (rest, rest.len()),
        };
        Some((String::from_utf8_lossy(text).into_owned(), consumed))
    }

    /// Writes this packet at the cursor of `into`: id, payload length, payload.
    /// The magic is implied and not stored.
    pub fn write_nested(&self, into: &mut Packet) {
        into.append(self.request_id())
            .append(self.payload_len())
            .append(self.payload());
    }

    /// Reads a packet stored by [`Packet::write_nested`] at the cursor of `from`.
    ///
    /// A truncated outer payload yields a shorter inner payload, never a
    /// read past the end.
    pub fn read_nested(from: &mut Packet) -> Packet {
        let request_id: RequestId = from.get();
        let payload_len: u32 = from.get();

        let payload = if payload_len == 0 {
            Vec::new()
        } else {
            from.get_bytes(payload_len as usize)
        };
        Packet::with_payload(request_id, &payload)
    }

    /// Dumps header and payload; the cursor is not part of the output.
    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        out.write_all(&self.data)
    }

    /// Replaces this packet with `other`, cursor rewound.
    pub(crate) fn replace_with(&mut self, other: Packet) {
        *self = other;
        self.rewind();
    }

    fn sync_payload_len(&mut self) {
        let payload_len = (self.data.len() - HEADER_LEN) as u32;
        self.data[PAYLOAD_LEN_OFFSET..HEADER_LEN].copy_from_slice(&payload_len.to_le_bytes());
    }
}
