//! The key/value codec for one connection: encodes typed requests into wire
//! frames, correlates responses through a FIFO of in-flight requests, and
//! decodes them back into typed results.
//!
//! The codec is a synchronous transform; it never blocks or awaits. All
//! state belongs to the connection that owns it, so there is no internal
//! locking.

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::protocol::{self, RawResponse, RequestHeader, ServerFeature, HEADER_SIZE};
use crate::request::{Operation, PartitionState, Request};
use crate::response::{
    MutationToken, ObserveSeqnoInfo, ObserveStatus, Response, ResponseCommon, ResponseStatus,
    SubdocFirstError,
};
use crate::subdoc;

/// Outcome of decoding one frame.
#[derive(Debug)]
pub struct Decoded {
    pub response: Response,
    /// On a RETRY status the original request is handed back so the outer
    /// retry strategy can re-encode it; its payload is still live.
    pub retry: Option<Request>,
}

/// STAT exchanges stream key/value pairs until an empty-key terminator.
/// Collection state lives here, beside the in-flight entry, rather than as
/// mutation of the originating request.
#[derive(Debug)]
enum StatStream {
    Idle,
    Collecting(Vec<(String, String)>),
}

impl StatStream {
    fn push(&mut self, key: String, value: String) {
        match self {
            Self::Idle => *self = Self::Collecting(vec![(key, value)]),
            Self::Collecting(entries) => entries.push((key, value)),
        }
    }

    fn finish(self) -> Vec<(String, String)> {
        match self {
            Self::Idle => Vec::new(),
            Self::Collecting(entries) => entries,
        }
    }
}

#[derive(Debug)]
struct InFlight {
    request: Request,
    /// The codec's one retained payload handle, held from encode until a
    /// terminal (non-RETRY) response, cancellation or teardown.
    retained: Option<Payload>,
    stat: StatStream,
}

#[derive(Debug)]
pub struct KvCodec {
    bucket: String,
    /// Hostname of the remote node, used to annotate bucket configs.
    remote: String,
    /// Environment-level switch for mutation tokens.
    mutation_tokens_enabled: bool,
    /// True once the server has advertised MUTATION_SEQNO and the
    /// environment allows tokens. Flips interpretation of mutation extras.
    seq_on_mutation: bool,
    inflight: VecDeque<InFlight>,
}

impl KvCodec {
    pub fn new(
        bucket: impl Into<String>,
        remote: impl Into<String>,
        mutation_tokens_enabled: bool,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            remote: remote.into(),
            mutation_tokens_enabled,
            seq_on_mutation: false,
            inflight: VecDeque::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.inflight.len()
    }

    pub fn seq_on_mutation(&self) -> bool {
        self.seq_on_mutation
    }

    /// Apply a negotiated-features event from the handshake.
    pub fn apply_server_features(&mut self, features: &[ServerFeature]) {
        self.seq_on_mutation =
            self.mutation_tokens_enabled && features.contains(&ServerFeature::MutationSeqno);
        tracing::debug!(
            seq_on_mutation = self.seq_on_mutation,
            "applied negotiated server features"
        );
    }

    /// Encode a request into a wire frame and track it in flight.
    ///
    /// Payload-carrying requests get one extra retained handle here so the
    /// same bytes can be re-encoded if the server answers NOT_MY_VBUCKET.
    pub fn encode(&mut self, request: Request) -> Bytes {
        let frame = encode_frame(&request);
        let retained = request.payload().map(Payload::retain);
        tracing::trace!(
            opaque = request.opaque,
            op = request.op.name(),
            frame_len = frame.len(),
            "encoded request"
        );
        self.inflight.push_back(InFlight {
            request,
            retained,
            stat: StatStream::Idle,
        });
        frame
    }

    /// Encode a keep-alive no-op and track it like any other request.
    pub fn encode_keepalive(&mut self, opaque: u32) -> Bytes {
        let bucket = self.bucket.clone();
        self.encode(Request::keepalive(opaque, bucket))
    }

    /// Decode one framed response against the in-flight queue head.
    ///
    /// Returns `None` for intermediate STAT chunks; every other frame
    /// completes the head request and yields a typed response. Protocol
    /// integrity violations (opaque mismatch, truncated bodies, unknown
    /// formats) are fatal for the connection.
    pub fn decode(&mut self, raw: RawResponse) -> Result<Option<Decoded>> {
        let status = ResponseStatus::from_code(raw.status);
        {
            let head = self
                .inflight
                .front_mut()
                .ok_or(Error::UnexpectedResponse)?;
            if raw.opaque != head.request.opaque {
                return Err(Error::OpaqueMismatch {
                    expected: head.request.opaque,
                    actual: raw.opaque,
                });
            }
            // Any terminal status releases the retained payload; RETRY keeps
            // it alive for re-dispatch.
            if !status.is_retry() {
                head.retained = None;
            }
            if matches!(head.request.op, Operation::Stat { .. }) && !raw.key.is_empty() {
                head.stat.push(
                    String::from_utf8_lossy(&raw.key).into_owned(),
                    String::from_utf8_lossy(&raw.value).into_owned(),
                );
                return Ok(None);
            }
        }

        // The frame completes the head request.
        let entry = self.inflight.pop_front().ok_or(Error::UnexpectedResponse)?;
        tracing::trace!(
            opaque = raw.opaque,
            op = entry.request.op.name(),
            status = raw.status,
            "decoded response"
        );

        let common = ResponseCommon {
            status,
            code: raw.status,
            bucket: entry.request.bucket.clone(),
            cas: raw.cas,
        };
        let partition = entry.request.partition;

        let response = match &entry.request.op {
            Operation::Get { .. }
            | Operation::GetAndLock { .. }
            | Operation::GetAndTouch { .. }
            | Operation::GetReplica { .. } => {
                let flags = if raw.extras.len() >= 4 {
                    be_u32(&raw.extras)
                } else {
                    0
                };
                Response::Get {
                    common,
                    flags,
                    content: raw.value,
                }
            }
            Operation::GetBucketConfig => Response::GetBucketConfig {
                common,
                config: raw.value,
                origin: self.remote.clone(),
            },
            Operation::Insert { .. } | Operation::Upsert { .. } | Operation::Replace { .. } => {
                Response::Store {
                    common,
                    token: self.mutation_token(partition, status, &raw.extras),
                }
            }
            Operation::Remove { .. } => Response::Remove {
                common,
                token: self.mutation_token(partition, status, &raw.extras),
            },
            Operation::Counter { .. } => {
                let value = if status.is_success() && raw.value.len() >= 8 {
                    be_u64(&raw.value)
                } else {
                    0
                };
                Response::Counter {
                    common,
                    value,
                    token: self.mutation_token(partition, status, &raw.extras),
                }
            }
            Operation::Unlock { .. } => Response::Unlock { common },
            Operation::Touch { .. } => Response::Touch { common },
            Operation::Append { .. } => Response::Append {
                common,
                token: self.mutation_token(partition, status, &raw.extras),
            },
            Operation::Prepend { .. } => Response::Prepend {
                common,
                token: self.mutation_token(partition, status, &raw.extras),
            },
            Operation::Observe { .. } => {
                let (observed, observed_cas) = if status.is_success() {
                    decode_observe(&raw.value)?
                } else {
                    (ObserveStatus::Unknown, 0)
                };
                Response::Observe {
                    common,
                    observed,
                    observed_cas,
                }
            }
            Operation::ObserveSeqno { .. } => {
                let info = if status.is_success() {
                    decode_observe_seqno(&raw.value)?
                } else {
                    ObserveSeqnoInfo::default()
                };
                Response::ObserveSeqno { common, info }
            }
            Operation::Stat { .. } => Response::Stat {
                common,
                entries: entry.stat.finish(),
            },
            Operation::GetAllMutationTokens { .. } => {
                let tokens = if status.is_success() {
                    self.decode_token_list(&raw.value)
                } else {
                    Vec::new()
                };
                Response::GetAllMutationTokens { common, tokens }
            }
            Operation::KeepAlive => Response::KeepAlive { common },
            Operation::SubdocSingle { .. } => {
                let content = if raw.value.is_empty() {
                    Bytes::new()
                } else {
                    raw.value
                };
                Response::SubdocSingle {
                    common,
                    content,
                    token: self.mutation_token(partition, status, &raw.extras),
                }
            }
            Operation::SubdocMultiLookup { commands, .. } => {
                let results = match status {
                    ResponseStatus::Success | ResponseStatus::SubdocMultiPathFailure => {
                        subdoc::decode_multi_lookup_body(commands.len(), &raw.value)?
                    }
                    _ => Vec::new(),
                };
                Response::SubdocMultiLookup { common, results }
            }
            Operation::SubdocMultiMutation { commands, .. } => match status {
                ResponseStatus::Success => Response::SubdocMultiMutation {
                    token: self.mutation_token(partition, status, &raw.extras),
                    results: subdoc::decode_multi_mutation_body(commands.len(), &raw.value)?,
                    first_error: None,
                    common,
                },
                ResponseStatus::SubdocMultiPathFailure => {
                    let (index, code) = subdoc::decode_multi_mutation_failure(&raw.value)?;
                    Response::SubdocMultiMutation {
                        common,
                        results: Vec::new(),
                        first_error: Some(SubdocFirstError {
                            index,
                            code,
                            status: ResponseStatus::from_code(code),
                        }),
                        token: None,
                    }
                }
                _ => Response::SubdocMultiMutation {
                    common,
                    results: Vec::new(),
                    first_error: None,
                    token: None,
                },
            },
        };

        let retry = if status.is_retry() {
            Some(entry.request)
        } else {
            None
        };
        Ok(Some(Decoded { response, retry }))
    }

    /// Drop a pending request; its retained payload is released exactly
    /// once. A response later arriving for the dropped opaque will fail the
    /// opaque-match and tear the connection down.
    pub fn cancel(&mut self, opaque: u32) -> bool {
        if let Some(pos) = self
            .inflight
            .iter()
            .position(|entry| entry.request.opaque == opaque)
        {
            self.inflight.remove(pos);
            tracing::debug!(opaque, "cancelled in-flight request");
            true
        } else {
            false
        }
    }

    /// Connection teardown: release every pending request.
    pub fn close(&mut self) {
        let dropped = self.inflight.len();
        self.inflight.clear();
        if dropped > 0 {
            tracing::debug!(dropped, "released in-flight requests on teardown");
        }
    }

    /// Mutation-token extraction per the negotiated feature set: only on a
    /// successful mutation, with MUTATION_SEQNO active and 16 bytes of
    /// extras (partition UUID, sequence).
    fn mutation_token(
        &self,
        partition: i16,
        status: ResponseStatus,
        extras: &[u8],
    ) -> Option<MutationToken> {
        if status.is_success() && self.seq_on_mutation && extras.len() >= 16 {
            Some(MutationToken {
                partition: partition.max(0) as u64,
                partition_uuid: be_u64(&extras[0..8]),
                sequence: be_u64(&extras[8..16]),
                bucket: self.bucket.clone(),
            })
        } else {
            None
        }
    }

    /// Body of get-all-mutation-tokens: 10-byte records of partition (u16)
    /// and sequence (u64). The partition UUID is not on the wire here.
    fn decode_token_list(&self, value: &[u8]) -> Vec<MutationToken> {
        let mut tokens = Vec::with_capacity(value.len() / 10);
        let mut rest = value;
        while rest.len() >= 10 {
            tokens.push(MutationToken {
                partition: u16::from_be_bytes([rest[0], rest[1]]) as u64,
                partition_uuid: 0,
                sequence: be_u64(&rest[2..10]),
                bucket: self.bucket.clone(),
            });
            rest = &rest[10..];
        }
        tokens
    }
}

/// Build the wire frame for a request. Total per variant; the enum match is
/// exhaustive, so there is no unknown-operation path.
fn encode_frame(request: &Request) -> Bytes {
    let routed = if request.partition >= 0 {
        request.partition as u16
    } else {
        0
    };

    let mut extras = BytesMut::new();
    let mut cas = 0u64;
    let (opcode, key, value): (u8, Bytes, Bytes) = match &request.op {
        Operation::Get { key } => (protocol::OP_GET, key.clone(), Bytes::new()),
        Operation::GetAndLock { key, lock_expiry } => {
            extras.extend_from_slice(&lock_expiry.to_be_bytes());
            (protocol::OP_GET_AND_LOCK, key.clone(), Bytes::new())
        }
        Operation::GetAndTouch { key, expiry } => {
            extras.extend_from_slice(&expiry.to_be_bytes());
            (protocol::OP_GET_AND_TOUCH, key.clone(), Bytes::new())
        }
        Operation::GetReplica { key } => (protocol::OP_GET_REPLICA, key.clone(), Bytes::new()),
        Operation::GetBucketConfig => (protocol::OP_GET_BUCKET_CONFIG, Bytes::new(), Bytes::new()),
        Operation::Insert {
            key,
            flags,
            expiry,
            payload,
        } => {
            extras.extend_from_slice(&flags.to_be_bytes());
            extras.extend_from_slice(&expiry.to_be_bytes());
            (protocol::OP_INSERT, key.clone(), payload.as_bytes().clone())
        }
        Operation::Upsert {
            key,
            flags,
            expiry,
            payload,
        } => {
            extras.extend_from_slice(&flags.to_be_bytes());
            extras.extend_from_slice(&expiry.to_be_bytes());
            (protocol::OP_UPSERT, key.clone(), payload.as_bytes().clone())
        }
        Operation::Replace {
            key,
            flags,
            expiry,
            payload,
        } => {
            extras.extend_from_slice(&flags.to_be_bytes());
            extras.extend_from_slice(&expiry.to_be_bytes());
            cas = request.cas;
            (protocol::OP_REPLACE, key.clone(), payload.as_bytes().clone())
        }
        Operation::Remove { key } => {
            cas = request.cas;
            (protocol::OP_REMOVE, key.clone(), Bytes::new())
        }
        Operation::Counter {
            key,
            delta,
            initial,
            expiry,
        } => {
            extras.extend_from_slice(&delta.unsigned_abs().to_be_bytes());
            extras.extend_from_slice(&initial.to_be_bytes());
            extras.extend_from_slice(&expiry.to_be_bytes());
            let opcode = if *delta < 0 {
                protocol::OP_COUNTER_DECR
            } else {
                protocol::OP_COUNTER_INCR
            };
            (opcode, key.clone(), Bytes::new())
        }
        Operation::Unlock { key } => {
            cas = request.cas;
            (protocol::OP_UNLOCK, key.clone(), Bytes::new())
        }
        Operation::Touch { key, expiry } => {
            extras.extend_from_slice(&expiry.to_be_bytes());
            (protocol::OP_TOUCH, key.clone(), Bytes::new())
        }
        Operation::Append { key, payload } => {
            cas = request.cas;
            (protocol::OP_APPEND, key.clone(), payload.as_bytes().clone())
        }
        Operation::Prepend { key, payload } => {
            cas = request.cas;
            (protocol::OP_PREPEND, key.clone(), payload.as_bytes().clone())
        }
        Operation::Observe { key } => {
            // The key travels in the body, not the key field.
            let mut body = BytesMut::with_capacity(4 + key.len());
            body.extend_from_slice(&routed.to_be_bytes());
            body.extend_from_slice(&(key.len() as u16).to_be_bytes());
            body.extend_from_slice(key);
            (protocol::OP_OBSERVE, Bytes::new(), body.freeze())
        }
        Operation::ObserveSeqno { partition_uuid } => (
            protocol::OP_OBSERVE_SEQ,
            Bytes::new(),
            Bytes::copy_from_slice(&partition_uuid.to_be_bytes()),
        ),
        Operation::Stat { key } => (protocol::OP_STAT, key.clone(), Bytes::new()),
        Operation::GetAllMutationTokens { state } => {
            if *state != PartitionState::Any {
                extras.extend_from_slice(&state.code().to_be_bytes());
            }
            (protocol::OP_GET_ALL_MUTATION_TOKENS, Bytes::new(), Bytes::new())
        }
        Operation::KeepAlive => (protocol::OP_NOOP, Bytes::new(), Bytes::new()),
        Operation::SubdocSingle {
            key,
            op,
            path,
            expiry,
            create_parents,
            payload,
        } => {
            extras.extend_from_slice(&(path.len() as u16).to_be_bytes());
            extras.extend_from_slice(&[if *create_parents {
                subdoc::FLAG_MKDIR_P
            } else {
                0
            }]);
            if op.is_mutation() {
                if *expiry != 0 {
                    extras.extend_from_slice(&expiry.to_be_bytes());
                }
                cas = request.cas;
            }
            let mut body =
                BytesMut::with_capacity(path.len() + payload.as_ref().map_or(0, Payload::len));
            body.extend_from_slice(path.as_bytes());
            if let Some(payload) = payload {
                body.extend_from_slice(payload.as_bytes());
            }
            (op.opcode(), key.clone(), body.freeze())
        }
        Operation::SubdocMultiLookup { key, specs, .. } => (
            protocol::OP_SUBDOC_MULTI_LOOKUP,
            key.clone(),
            specs.as_bytes().clone(),
        ),
        Operation::SubdocMultiMutation {
            key,
            expiry,
            specs,
            ..
        } => {
            if *expiry != 0 {
                extras.extend_from_slice(&expiry.to_be_bytes());
            }
            cas = request.cas;
            (
                protocol::OP_SUBDOC_MULTI_MUTATION,
                key.clone(),
                specs.as_bytes().clone(),
            )
        }
    };

    let header = RequestHeader {
        opcode,
        key_len: key.len() as u16,
        extras_len: extras.len() as u8,
        partition: routed,
        body_len: (key.len() + extras.len() + value.len()) as u32,
        opaque: request.opaque,
        cas,
    };
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + header.body_len as usize);
    header.write_to(&mut frame);
    frame.extend_from_slice(&extras);
    frame.extend_from_slice(&key);
    frame.extend_from_slice(&value);
    frame.freeze()
}

/// Observe body: partition echo (u16) | key-length (u16) | key | observed
/// status (u8) | observed CAS (u64), read sequentially.
fn decode_observe(mut value: &[u8]) -> Result<(ObserveStatus, u64)> {
    if value.len() < 4 {
        return Err(Error::Msg(format!(
            "observe body too short: {} bytes",
            value.len()
        )));
    }
    value.advance(2);
    let key_len = value.get_u16() as usize;
    if value.len() < key_len + 9 {
        return Err(Error::Msg(format!(
            "observe body too short for key length {key_len}"
        )));
    }
    value.advance(key_len);
    let observed = ObserveStatus::from_byte(value.get_u8());
    let observed_cas = value.get_u64();
    Ok((observed, observed_cas))
}

/// Observe-seqno body: a format byte, then the no-failover (0) or failover
/// (1) record. Any other format byte is a protocol error.
fn decode_observe_seqno(mut value: &[u8]) -> Result<ObserveSeqnoInfo> {
    if value.is_empty() {
        return Err(Error::Msg("observe-seqno body is empty".into()));
    }
    let format = value.get_u8();
    let needed = match format {
        0 => 26,
        1 => 42,
        other => return Err(Error::UnknownObserveSeqnoFormat(other)),
    };
    if value.len() < needed {
        return Err(Error::Msg(format!(
            "observe-seqno body too short: {} bytes for format {format}",
            value.len()
        )));
    }
    let mut info = ObserveSeqnoInfo {
        failed_over: format == 1,
        partition: value.get_u16(),
        partition_uuid: value.get_u64(),
        last_persisted: value.get_u64(),
        current_seqno: value.get_u64(),
        ..ObserveSeqnoInfo::default()
    };
    if info.failed_over {
        info.old_partition_uuid = value.get_u64();
        info.last_received = value.get_u64();
    }
    Ok(info)
}

fn be_u32(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

fn be_u64(buf: &[u8]) -> u64 {
    u64::from_be_bytes([
        buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
    ])
}
