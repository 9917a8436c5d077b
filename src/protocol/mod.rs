//! Memcached-derived binary wire protocol scaffolding.
//! - 24-byte request/response headers (big-endian)
//! - opcode, status and feature constant tables
//! - framed response reading over an async stream

use crate::error::{Error, Result};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

pub const MAGIC_REQUEST: u8 = 0x80;
pub const MAGIC_RESPONSE: u8 = 0x81;

/// Fixed header length, both directions.
pub const HEADER_SIZE: usize = 24;

// Opcodes. The byte values are part of the wire contract; the vendor range
// (0x48, 0x83, 0x91.., 0xB5, 0xC5..) extends the classic memcached set.
pub const OP_GET: u8 = 0x00;
pub const OP_UPSERT: u8 = 0x01;
pub const OP_INSERT: u8 = 0x02;
pub const OP_REPLACE: u8 = 0x03;
pub const OP_REMOVE: u8 = 0x04;
pub const OP_COUNTER_INCR: u8 = 0x05;
pub const OP_COUNTER_DECR: u8 = 0x06;
pub const OP_NOOP: u8 = 0x0A;
pub const OP_APPEND: u8 = 0x0E;
pub const OP_PREPEND: u8 = 0x0F;
pub const OP_STAT: u8 = 0x10;
pub const OP_TOUCH: u8 = 0x1C;
pub const OP_GET_AND_TOUCH: u8 = 0x1D;
pub const OP_GET_ALL_MUTATION_TOKENS: u8 = 0x48;
pub const OP_GET_REPLICA: u8 = 0x83;
pub const OP_OBSERVE_SEQ: u8 = 0x91;
pub const OP_OBSERVE: u8 = 0x92;
pub const OP_GET_AND_LOCK: u8 = 0x94;
pub const OP_UNLOCK: u8 = 0x95;
pub const OP_GET_BUCKET_CONFIG: u8 = 0xB5;
pub const OP_SUBDOC_MULTI_LOOKUP: u8 = 0xD0;
pub const OP_SUBDOC_MULTI_MUTATION: u8 = 0xD1;

// Server status codes (response header "reserved" field).
pub const STATUS_SUCCESS: u16 = 0x0000;
pub const STATUS_KEY_NOT_FOUND: u16 = 0x0001;
pub const STATUS_KEY_EXISTS: u16 = 0x0002;
pub const STATUS_VALUE_TOO_LARGE: u16 = 0x0003;
pub const STATUS_INVALID_ARGUMENTS: u16 = 0x0004;
pub const STATUS_ITEM_NOT_STORED: u16 = 0x0005;
pub const STATUS_NON_NUMERIC_VALUE: u16 = 0x0006;
pub const STATUS_NOT_MY_VBUCKET: u16 = 0x0007;
pub const STATUS_NO_BUCKET: u16 = 0x0008;
pub const STATUS_LOCKED: u16 = 0x0009;
pub const STATUS_AUTH_ERROR: u16 = 0x0020;
pub const STATUS_AUTH_CONTINUE: u16 = 0x0021;
pub const STATUS_UNKNOWN_COMMAND: u16 = 0x0081;
pub const STATUS_OUT_OF_MEMORY: u16 = 0x0082;
pub const STATUS_NOT_SUPPORTED: u16 = 0x0083;
pub const STATUS_INTERNAL_ERROR: u16 = 0x0084;
pub const STATUS_BUSY: u16 = 0x0085;
pub const STATUS_TEMPORARY_FAILURE: u16 = 0x0086;
pub const STATUS_SUBDOC_PATH_NOT_FOUND: u16 = 0x00C0;
pub const STATUS_SUBDOC_PATH_MISMATCH: u16 = 0x00C1;
pub const STATUS_SUBDOC_PATH_INVALID: u16 = 0x00C2;
pub const STATUS_SUBDOC_PATH_TOO_BIG: u16 = 0x00C3;
pub const STATUS_SUBDOC_DOC_TOO_DEEP: u16 = 0x00C4;
pub const STATUS_SUBDOC_CANNOT_INSERT: u16 = 0x00C5;
pub const STATUS_SUBDOC_DOC_NOT_JSON: u16 = 0x00C6;
pub const STATUS_SUBDOC_NUM_RANGE: u16 = 0x00C7;
pub const STATUS_SUBDOC_DELTA_RANGE: u16 = 0x00C8;
pub const STATUS_SUBDOC_PATH_EXISTS: u16 = 0x00C9;
pub const STATUS_SUBDOC_VALUE_TOO_DEEP: u16 = 0x00CA;
pub const STATUS_SUBDOC_INVALID_COMBO: u16 = 0x00CB;
pub const STATUS_SUBDOC_MULTI_PATH_FAILURE: u16 = 0x00CC;

/// Features a server may advertise after handshake. Only `MutationSeqno`
/// changes codec behavior; the rest are carried for completeness of the
/// negotiated set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFeature {
    Datatype,
    Tls,
    TcpNodelay,
    MutationSeqno,
    TcpDelay,
    Xattr,
    Xerror,
    SelectBucket,
    Snappy,
}

impl ServerFeature {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x01 => Some(Self::Datatype),
            0x02 => Some(Self::Tls),
            0x03 => Some(Self::TcpNodelay),
            0x04 => Some(Self::MutationSeqno),
            0x05 => Some(Self::TcpDelay),
            0x06 => Some(Self::Xattr),
            0x07 => Some(Self::Xerror),
            0x08 => Some(Self::SelectBucket),
            0x0A => Some(Self::Snappy),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    /// Partition (vBucket) routing field; 0 when the request is unrouted.
    pub partition: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl RequestHeader {
    /// Append the 24 header bytes. Big-endian, data-type always 0.
    pub fn write_to(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[MAGIC_REQUEST, self.opcode]);
        out.extend_from_slice(&self.key_len.to_be_bytes());
        out.extend_from_slice(&[self.extras_len, 0]);
        out.extend_from_slice(&self.partition.to_be_bytes());
        out.extend_from_slice(&self.body_len.to_be_bytes());
        out.extend_from_slice(&self.opaque.to_be_bytes());
        out.extend_from_slice(&self.cas.to_be_bytes());
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Msg(format!(
                "request header needs {HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != MAGIC_REQUEST {
            return Err(Error::InvalidMagic(buf[0]));
        }
        Ok(Self {
            opcode: buf[1],
            key_len: u16::from_be_bytes([buf[2], buf[3]]),
            extras_len: buf[4],
            partition: u16::from_be_bytes([buf[6], buf[7]]),
            body_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            opaque: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            cas: u64::from_be_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub opcode: u8,
    pub key_len: u16,
    pub extras_len: u8,
    pub status: u16,
    pub body_len: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl ResponseHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Msg(format!(
                "response header needs {HEADER_SIZE} bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != MAGIC_RESPONSE {
            return Err(Error::InvalidMagic(buf[0]));
        }
        Ok(Self {
            opcode: buf[1],
            key_len: u16::from_be_bytes([buf[2], buf[3]]),
            extras_len: buf[4],
            status: u16::from_be_bytes([buf[6], buf[7]]),
            body_len: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            opaque: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
            cas: u64::from_be_bytes([
                buf[16], buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23],
            ]),
        })
    }

    /// Append the 24 header bytes; used by in-process test servers.
    pub fn write_to(&self, out: &mut BytesMut) {
        out.extend_from_slice(&[MAGIC_RESPONSE, self.opcode]);
        out.extend_from_slice(&self.key_len.to_be_bytes());
        out.extend_from_slice(&[self.extras_len, 0]);
        out.extend_from_slice(&self.status.to_be_bytes());
        out.extend_from_slice(&self.body_len.to_be_bytes());
        out.extend_from_slice(&self.opaque.to_be_bytes());
        out.extend_from_slice(&self.cas.to_be_bytes());
    }
}

/// A fully-framed response with its body already split into extras, key and
/// value. The three segments are cheap subslices of one body allocation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub opcode: u8,
    pub status: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl RawResponse {
    pub fn from_parts(header: ResponseHeader, body: Bytes) -> Result<Self> {
        let extras_len = header.extras_len as usize;
        let key_len = header.key_len as usize;
        if body.len() != header.body_len as usize || body.len() < extras_len + key_len {
            return Err(Error::InvalidBodyLength {
                body_len: header.body_len,
                extras_len: header.extras_len,
                key_len: header.key_len,
            });
        }
        let extras = body.slice(..extras_len);
        let key = body.slice(extras_len..extras_len + key_len);
        let value = body.slice(extras_len + key_len..);
        Ok(Self {
            opcode: header.opcode,
            status: header.status,
            opaque: header.opaque,
            cas: header.cas,
            extras,
            key,
            value,
        })
    }

    /// Re-assemble the wire frame. Test servers reply with this.
    pub fn to_frame(&self) -> Bytes {
        let body_len = self.extras.len() + self.key.len() + self.value.len();
        let header = ResponseHeader {
            opcode: self.opcode,
            key_len: self.key.len() as u16,
            extras_len: self.extras.len() as u8,
            status: self.status,
            body_len: body_len as u32,
            opaque: self.opaque,
            cas: self.cas,
        };
        let mut out = BytesMut::with_capacity(HEADER_SIZE + body_len);
        header.write_to(&mut out);
        out.extend_from_slice(&self.extras);
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&self.value);
        out.freeze()
    }
}

/// Read one framed response: fixed header, then exactly `body_len` bytes.
pub async fn read_response<S>(stream: &mut S) -> Result<RawResponse>
where
    S: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_buf).await?;
    let header = ResponseHeader::parse(&header_buf)?;
    let mut body = vec![0u8; header.body_len as usize];
    stream.read_exact(&mut body).await?;
    RawResponse::from_parts(header, Bytes::from(body))
}
