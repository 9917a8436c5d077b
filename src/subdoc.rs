//! Sub-document operations: path-scoped lookups and mutations inside a
//! stored JSON document, plus the body layouts of their multi-operation
//! responses.

use crate::error::{Error, Result};
use crate::response::ResponseStatus;
use bytes::{Bytes, BytesMut};

/// Single-command opcodes. These double as the per-command opcode inside
/// multi-operation spec lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubdocOp {
    Get = 0xC5,
    Exists = 0xC6,
    DictAdd = 0xC7,
    DictUpsert = 0xC8,
    Delete = 0xC9,
    Replace = 0xCA,
    ArrayPushLast = 0xCB,
    ArrayPushFirst = 0xCC,
    ArrayInsert = 0xCD,
    ArrayAddUnique = 0xCE,
    Counter = 0xCF,
}

impl SubdocOp {
    pub fn opcode(self) -> u8 {
        self as u8
    }

    pub fn is_mutation(self) -> bool {
        !matches!(self, Self::Get | Self::Exists)
    }
}

/// Create intermediate JSON path components. Bit 0 of the command flags
/// byte; the remaining bits are reserved zero.
pub const FLAG_MKDIR_P: u8 = 0x01;

/// One command of a multi-operation request. Echoed back to the decoder so
/// results can be assembled in command order.
#[derive(Debug, Clone)]
pub struct SubdocCommand {
    pub op: SubdocOp,
    pub path: String,
    pub value: Option<Bytes>,
    pub create_parents: bool,
}

impl SubdocCommand {
    pub fn lookup(op: SubdocOp, path: impl Into<String>) -> Self {
        Self {
            op,
            path: path.into(),
            value: None,
            create_parents: false,
        }
    }

    pub fn mutation(
        op: SubdocOp,
        path: impl Into<String>,
        value: impl Into<Bytes>,
        create_parents: bool,
    ) -> Self {
        Self {
            op,
            path: path.into(),
            value: Some(value.into()),
            create_parents,
        }
    }

    pub fn flags(&self) -> u8 {
        if self.create_parents { FLAG_MKDIR_P } else { 0 }
    }
}

/// Result of one command within a multi-operation response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubdocResult {
    pub status: ResponseStatus,
    pub code: u16,
    pub value: Bytes,
}

impl SubdocResult {
    fn success_empty() -> Self {
        Self {
            status: ResponseStatus::Success,
            code: 0,
            value: Bytes::new(),
        }
    }
}

/// Serialize lookup specs: opcode (u8) | flags (u8) | path-length (u16) |
/// path bytes, per command.
pub fn encode_lookup_specs(commands: &[SubdocCommand]) -> Bytes {
    let mut out = BytesMut::new();
    for command in commands {
        out.extend_from_slice(&[command.op.opcode(), command.flags()]);
        out.extend_from_slice(&(command.path.len() as u16).to_be_bytes());
        out.extend_from_slice(command.path.as_bytes());
    }
    out.freeze()
}

/// Serialize mutation specs: opcode (u8) | flags (u8) | path-length (u16) |
/// value-length (u32) | path bytes | value bytes, per command.
pub fn encode_mutation_specs(commands: &[SubdocCommand]) -> Bytes {
    let mut out = BytesMut::new();
    for command in commands {
        let value = command.value.as_deref().unwrap_or(&[]);
        out.extend_from_slice(&[command.op.opcode(), command.flags()]);
        out.extend_from_slice(&(command.path.len() as u16).to_be_bytes());
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(command.path.as_bytes());
        out.extend_from_slice(value);
    }
    out.freeze()
}

/// Walk a multi-lookup response body: one explicit entry per command, each
/// status (u16) | value-length (u32) | value bytes. Values are copied into
/// fresh right-sized buffers.
pub fn decode_multi_lookup_body(command_count: usize, body: &[u8]) -> Result<Vec<SubdocResult>> {
    let mut results = Vec::with_capacity(command_count);
    let mut rest = body;
    for index in 0..command_count {
        if rest.len() < 6 {
            return Err(Error::TruncatedSubdocBody {
                index,
                needed: 6,
                remaining: rest.len(),
            });
        }
        let code = u16::from_be_bytes([rest[0], rest[1]]);
        let value_len = u32::from_be_bytes([rest[2], rest[3], rest[4], rest[5]]) as usize;
        rest = &rest[6..];
        if rest.len() < value_len {
            return Err(Error::TruncatedSubdocBody {
                index,
                needed: value_len,
                remaining: rest.len(),
            });
        }
        results.push(SubdocResult {
            status: ResponseStatus::from_code(code),
            code,
            value: Bytes::copy_from_slice(&rest[..value_len]),
        });
        rest = &rest[value_len..];
    }
    Ok(results)
}

/// Walk a successful multi-mutation response body. Commands that produced no
/// value are not echoed; only value-producing commands appear, each as
/// index (u8) | status (u16) | value-length (u32) | value bytes. Gaps are
/// filled with empty SUCCESS results so the result list always lines up with
/// the command list.
pub fn decode_multi_mutation_body(command_count: usize, body: &[u8]) -> Result<Vec<SubdocResult>> {
    let mut results: Vec<SubdocResult> = Vec::with_capacity(command_count);
    let mut rest = body;
    while !rest.is_empty() {
        if rest.len() < 7 {
            return Err(Error::TruncatedSubdocBody {
                index: results.len(),
                needed: 7,
                remaining: rest.len(),
            });
        }
        let response_index = rest[0];
        let code = u16::from_be_bytes([rest[1], rest[2]]);
        let value_len = u32::from_be_bytes([rest[3], rest[4], rest[5], rest[6]]) as usize;
        rest = &rest[7..];

        if (response_index as usize) < results.len() {
            return Err(Error::SubdocIndexOutOfOrder {
                index: response_index,
                consumed: results.len(),
            });
        }
        if (response_index as usize) >= command_count {
            return Err(Error::SubdocResultCountMismatch {
                results: response_index as usize + 1,
                commands: command_count,
            });
        }
        // Commands before the explicit entry completed without output.
        while results.len() < response_index as usize {
            results.push(SubdocResult::success_empty());
        }

        if rest.len() < value_len {
            return Err(Error::TruncatedSubdocBody {
                index: response_index as usize,
                needed: value_len,
                remaining: rest.len(),
            });
        }
        results.push(SubdocResult {
            status: ResponseStatus::from_code(code),
            code,
            value: Bytes::copy_from_slice(&rest[..value_len]),
        });
        rest = &rest[value_len..];
    }
    while results.len() < command_count {
        results.push(SubdocResult::success_empty());
    }
    if results.len() != command_count {
        return Err(Error::SubdocResultCountMismatch {
            results: results.len(),
            commands: command_count,
        });
    }
    Ok(results)
}

/// Parse the body of a SUBDOC_MULTI_PATH_FAILURE multi-mutation response:
/// first-error-index (u8) | first-error-status (u16).
pub fn decode_multi_mutation_failure(body: &[u8]) -> Result<(u8, u16)> {
    if body.len() < 3 {
        return Err(Error::TruncatedSubdocBody {
            index: 0,
            needed: 3,
            remaining: body.len(),
        });
    }
    Ok((body[0], u16::from_be_bytes([body[1], body[2]])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_spec_layout() {
        let commands = vec![
            SubdocCommand::lookup(SubdocOp::Get, "a.b"),
            SubdocCommand::lookup(SubdocOp::Exists, "c"),
        ];
        let specs = encode_lookup_specs(&commands);
        assert_eq!(
            &specs[..],
            &[0xC5, 0x00, 0x00, 0x03, b'a', b'.', b'b', 0xC6, 0x00, 0x00, 0x01, b'c'][..]
        );
    }

    #[test]
    fn test_mutation_spec_layout_with_mkdir_p() {
        let commands = vec![SubdocCommand::mutation(
            SubdocOp::DictUpsert,
            "p",
            Bytes::from_static(b"1"),
            true,
        )];
        let specs = encode_mutation_specs(&commands);
        assert_eq!(
            &specs[..],
            &[0xC8, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, b'p', b'1'][..]
        );
    }

    #[test]
    fn test_multi_lookup_decode() {
        // status 0, len 2, "42" | status 0xC0, len 0
        let body = [0u8, 0, 0, 0, 0, 2, b'4', b'2', 0, 0xC0, 0, 0, 0, 0];
        let results = decode_multi_lookup_body(2, &body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, ResponseStatus::Success);
        assert_eq!(&results[0].value[..], b"42");
        assert_eq!(results[1].status, ResponseStatus::SubdocPathNotFound);
        assert!(results[1].value.is_empty());
    }

    #[test]
    fn test_multi_lookup_truncated_body() {
        let body = [0u8, 0, 0, 0, 0, 9, b'x'];
        let err = decode_multi_lookup_body(1, &body).unwrap_err();
        assert!(matches!(err, Error::TruncatedSubdocBody { index: 0, .. }));
    }

    #[test]
    fn test_multi_mutation_gap_fill() {
        // Only command 1 produced a value.
        let body = [1u8, 0, 0, 0, 0, 0, 3, b'4', b'2', b'0'];
        let results = decode_multi_mutation_body(3, &body).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].value.is_empty());
        assert_eq!(&results[1].value[..], b"420");
        assert!(results[2].value.is_empty());
        assert!(results.iter().all(|r| r.status == ResponseStatus::Success));
    }

    #[test]
    fn test_multi_mutation_empty_body_synthesizes_all() {
        let results = decode_multi_mutation_body(2, &[]).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == ResponseStatus::Success));
    }

    #[test]
    fn test_multi_mutation_rejects_backwards_index() {
        let body = [
            1u8, 0, 0, 0, 0, 0, 1, b'a', // index 1
            1u8, 0, 0, 0, 0, 0, 1, b'b', // index 1 again
        ];
        let err = decode_multi_mutation_body(3, &body).unwrap_err();
        assert!(matches!(err, Error::SubdocIndexOutOfOrder { index: 1, .. }));
    }

    #[test]
    fn test_multi_mutation_rejects_index_past_commands() {
        let body = [5u8, 0, 0, 0, 0, 0, 0];
        let err = decode_multi_mutation_body(2, &body).unwrap_err();
        assert!(matches!(err, Error::SubdocResultCountMismatch { .. }));
    }

    #[test]
    fn test_multi_mutation_failure_body() {
        let (index, code) = decode_multi_mutation_failure(&[2, 0x00, 0xC1]).unwrap();
        assert_eq!(index, 2);
        assert_eq!(code, 0x00C1);
    }
}
