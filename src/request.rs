//! Typed requests flowing into the codec.
//!
//! A request pairs connection-level routing fields (opaque, partition,
//! bucket, CAS) with an [`Operation`] variant carrying the per-opcode
//! payload. The encoder dispatches exhaustively on the variant; there is no
//! unknown-operation case at runtime.

use crate::payload::Payload;
use crate::subdoc::{SubdocCommand, SubdocOp};
use bytes::Bytes;

/// Partition-state filter for get-all-mutation-tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionState {
    Any,
    Active,
    Replica,
    Pending,
    Dead,
}

impl PartitionState {
    pub fn code(self) -> u32 {
        match self {
            Self::Any => 0,
            Self::Active => 1,
            Self::Replica => 2,
            Self::Pending => 3,
            Self::Dead => 4,
        }
    }
}

#[derive(Debug)]
pub struct Request {
    /// Correlation id echoed by the server. Unique per connection.
    pub opaque: u32,
    /// vBucket routing field; negative means unrouted.
    pub partition: i16,
    pub bucket: String,
    /// Compare-and-swap token; 0 means none.
    pub cas: u64,
    pub op: Operation,
}

#[derive(Debug)]
pub enum Operation {
    Get {
        key: Bytes,
    },
    GetAndLock {
        key: Bytes,
        lock_expiry: u32,
    },
    GetAndTouch {
        key: Bytes,
        expiry: u32,
    },
    GetReplica {
        key: Bytes,
    },
    GetBucketConfig,
    Insert {
        key: Bytes,
        flags: u32,
        expiry: u32,
        payload: Payload,
    },
    Upsert {
        key: Bytes,
        flags: u32,
        expiry: u32,
        payload: Payload,
    },
    Replace {
        key: Bytes,
        flags: u32,
        expiry: u32,
        payload: Payload,
    },
    Remove {
        key: Bytes,
    },
    /// Positive delta increments, negative decrements.
    Counter {
        key: Bytes,
        delta: i64,
        initial: u64,
        expiry: u32,
    },
    Unlock {
        key: Bytes,
    },
    Touch {
        key: Bytes,
        expiry: u32,
    },
    Append {
        key: Bytes,
        payload: Payload,
    },
    Prepend {
        key: Bytes,
        payload: Payload,
    },
    Observe {
        key: Bytes,
    },
    ObserveSeqno {
        partition_uuid: u64,
    },
    /// Stat group; an empty key requests the default group.
    Stat {
        key: Bytes,
    },
    GetAllMutationTokens {
        state: PartitionState,
    },
    KeepAlive,
    SubdocSingle {
        key: Bytes,
        op: SubdocOp,
        path: String,
        expiry: u32,
        create_parents: bool,
        payload: Option<Payload>,
    },
    SubdocMultiLookup {
        key: Bytes,
        commands: Vec<SubdocCommand>,
        /// Pre-serialized lookup specs (see `subdoc::encode_lookup_specs`).
        specs: Payload,
    },
    SubdocMultiMutation {
        key: Bytes,
        commands: Vec<SubdocCommand>,
        expiry: u32,
        /// Pre-serialized mutation specs (see `subdoc::encode_mutation_specs`).
        specs: Payload,
    },
}

impl Request {
    pub fn new(opaque: u32, partition: i16, bucket: impl Into<String>, op: Operation) -> Self {
        Self {
            opaque,
            partition,
            bucket: bucket.into(),
            cas: 0,
            op,
        }
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    /// Protocol no-op used as keep-alive. Always routed to partition 0.
    pub fn keepalive(opaque: u32, bucket: impl Into<String>) -> Self {
        Self::new(opaque, 0, bucket, Operation::KeepAlive)
    }

    /// The caller-owned payload carried by this request, if any.
    ///
    /// Observe bodies are codec-built and deliberately excluded; they need
    /// no retention across a retry.
    pub fn payload(&self) -> Option<&Payload> {
        match &self.op {
            Operation::Insert { payload, .. }
            | Operation::Upsert { payload, .. }
            | Operation::Replace { payload, .. }
            | Operation::Append { payload, .. }
            | Operation::Prepend { payload, .. } => Some(payload),
            Operation::SubdocSingle { payload, .. } => payload.as_ref(),
            Operation::SubdocMultiLookup { specs, .. }
            | Operation::SubdocMultiMutation { specs, .. } => Some(specs),
            _ => None,
        }
    }
}

impl Operation {
    /// Short operation name for log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::GetAndLock { .. } => "get_and_lock",
            Self::GetAndTouch { .. } => "get_and_touch",
            Self::GetReplica { .. } => "get_replica",
            Self::GetBucketConfig => "get_bucket_config",
            Self::Insert { .. } => "insert",
            Self::Upsert { .. } => "upsert",
            Self::Replace { .. } => "replace",
            Self::Remove { .. } => "remove",
            Self::Counter { .. } => "counter",
            Self::Unlock { .. } => "unlock",
            Self::Touch { .. } => "touch",
            Self::Append { .. } => "append",
            Self::Prepend { .. } => "prepend",
            Self::Observe { .. } => "observe",
            Self::ObserveSeqno { .. } => "observe_seqno",
            Self::Stat { .. } => "stat",
            Self::GetAllMutationTokens { .. } => "get_all_mutation_tokens",
            Self::KeepAlive => "keepalive",
            Self::SubdocSingle { .. } => "subdoc",
            Self::SubdocMultiLookup { .. } => "subdoc_multi_lookup",
            Self::SubdocMultiMutation { .. } => "subdoc_multi_mutation",
        }
    }
}

/// Wrapping counter handing out connection-unique opaques.
#[derive(Debug, Default)]
pub struct OpaqueGenerator {
    next: u32,
}

impl OpaqueGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self) -> u32 {
        let opaque = self.next;
        self.next = self.next.wrapping_add(1);
        opaque
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_accessor_covers_value_carriers() {
        let upsert = Request::new(
            1,
            0,
            "default",
            Operation::Upsert {
                key: Bytes::from_static(b"k"),
                flags: 0,
                expiry: 0,
                payload: Payload::new(Bytes::from_static(b"v")),
            },
        );
        assert!(upsert.payload().is_some());

        let observe = Request::new(
            2,
            0,
            "default",
            Operation::Observe {
                key: Bytes::from_static(b"k"),
            },
        );
        assert!(observe.payload().is_none());

        let lookup = Request::new(
            3,
            0,
            "default",
            Operation::SubdocSingle {
                key: Bytes::from_static(b"k"),
                op: SubdocOp::Get,
                path: "a.b".into(),
                expiry: 0,
                create_parents: false,
                payload: None,
            },
        );
        assert!(lookup.payload().is_none());
    }

    #[test]
    fn test_opaque_generator_wraps() {
        let mut generator = OpaqueGenerator { next: u32::MAX };
        assert_eq!(generator.next(), u32::MAX);
        assert_eq!(generator.next(), 0);
    }
}
