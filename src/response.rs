//! Typed responses and server status translation.

use crate::protocol;
use crate::subdoc::SubdocResult;
use bytes::Bytes;

/// Client-side classification of the server status code. The raw u16 always
/// travels next to this in [`ResponseCommon::code`]; unmapped codes collapse
/// to `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    NotFound,
    Exists,
    TooBig,
    InvalidArguments,
    NotStored,
    NonNumericValue,
    /// NOT_MY_VBUCKET: reissue against fresh topology. Payload stays alive.
    Retry,
    NoBucket,
    Locked,
    AuthError,
    AuthContinue,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TemporaryFailure,
    SubdocPathNotFound,
    SubdocPathMismatch,
    SubdocPathInvalid,
    SubdocPathTooBig,
    SubdocDocTooDeep,
    SubdocCannotInsert,
    SubdocDocNotJson,
    SubdocNumRange,
    SubdocDeltaRange,
    SubdocPathExists,
    SubdocValueTooDeep,
    SubdocInvalidCombo,
    SubdocMultiPathFailure,
    Failure,
}

impl ResponseStatus {
    pub fn from_code(code: u16) -> Self {
        match code {
            protocol::STATUS_SUCCESS => Self::Success,
            protocol::STATUS_KEY_NOT_FOUND => Self::NotFound,
            protocol::STATUS_KEY_EXISTS => Self::Exists,
            protocol::STATUS_VALUE_TOO_LARGE => Self::TooBig,
            protocol::STATUS_INVALID_ARGUMENTS => Self::InvalidArguments,
            protocol::STATUS_ITEM_NOT_STORED => Self::NotStored,
            protocol::STATUS_NON_NUMERIC_VALUE => Self::NonNumericValue,
            protocol::STATUS_NOT_MY_VBUCKET => Self::Retry,
            protocol::STATUS_NO_BUCKET => Self::NoBucket,
            protocol::STATUS_LOCKED => Self::Locked,
            protocol::STATUS_AUTH_ERROR => Self::AuthError,
            protocol::STATUS_AUTH_CONTINUE => Self::AuthContinue,
            protocol::STATUS_UNKNOWN_COMMAND => Self::UnknownCommand,
            protocol::STATUS_OUT_OF_MEMORY => Self::OutOfMemory,
            protocol::STATUS_NOT_SUPPORTED => Self::NotSupported,
            protocol::STATUS_INTERNAL_ERROR => Self::InternalError,
            protocol::STATUS_BUSY => Self::Busy,
            protocol::STATUS_TEMPORARY_FAILURE => Self::TemporaryFailure,
            protocol::STATUS_SUBDOC_PATH_NOT_FOUND => Self::SubdocPathNotFound,
            protocol::STATUS_SUBDOC_PATH_MISMATCH => Self::SubdocPathMismatch,
            protocol::STATUS_SUBDOC_PATH_INVALID => Self::SubdocPathInvalid,
            protocol::STATUS_SUBDOC_PATH_TOO_BIG => Self::SubdocPathTooBig,
            protocol::STATUS_SUBDOC_DOC_TOO_DEEP => Self::SubdocDocTooDeep,
            protocol::STATUS_SUBDOC_CANNOT_INSERT => Self::SubdocCannotInsert,
            protocol::STATUS_SUBDOC_DOC_NOT_JSON => Self::SubdocDocNotJson,
            protocol::STATUS_SUBDOC_NUM_RANGE => Self::SubdocNumRange,
            protocol::STATUS_SUBDOC_DELTA_RANGE => Self::SubdocDeltaRange,
            protocol::STATUS_SUBDOC_PATH_EXISTS => Self::SubdocPathExists,
            protocol::STATUS_SUBDOC_VALUE_TOO_DEEP => Self::SubdocValueTooDeep,
            protocol::STATUS_SUBDOC_INVALID_COMBO => Self::SubdocInvalidCombo,
            protocol::STATUS_SUBDOC_MULTI_PATH_FAILURE => Self::SubdocMultiPathFailure,
            _ => Self::Failure,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    pub fn is_retry(self) -> bool {
        self == Self::Retry
    }
}

/// Fields shared by every typed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCommon {
    pub status: ResponseStatus,
    /// Raw server status code.
    pub code: u16,
    pub bucket: String,
    pub cas: u64,
}

/// Identifies one mutation for durability queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationToken {
    pub partition: u64,
    pub partition_uuid: u64,
    pub sequence: u64,
    pub bucket: String,
}

/// Per-replica document state reported by observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveStatus {
    FoundNotPersisted,
    FoundPersisted,
    NotFound,
    LogicallyDeleted,
    Unknown,
}

impl ObserveStatus {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::FoundNotPersisted,
            0x01 => Self::FoundPersisted,
            0x80 => Self::NotFound,
            0x81 => Self::LogicallyDeleted,
            _ => Self::Unknown,
        }
    }
}

/// Sequence-number snapshot from observe-seqno. `old_partition_uuid` and
/// `last_received` are only populated in the failover format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObserveSeqnoInfo {
    pub failed_over: bool,
    pub partition: u16,
    pub partition_uuid: u64,
    pub last_persisted: u64,
    pub current_seqno: u64,
    pub old_partition_uuid: u64,
    pub last_received: u64,
}

/// First failing command of a sub-document multi mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubdocFirstError {
    pub index: u8,
    pub code: u16,
    pub status: ResponseStatus,
}

/// Typed responses, grouped by the family of the originating request.
#[derive(Debug)]
pub enum Response {
    /// Get, get-and-lock, get-and-touch and replica get.
    Get {
        common: ResponseCommon,
        flags: u32,
        content: Bytes,
    },
    GetBucketConfig {
        common: ResponseCommon,
        config: Bytes,
        /// Hostname the configuration was served from.
        origin: String,
    },
    /// Insert, upsert and replace.
    Store {
        common: ResponseCommon,
        token: Option<MutationToken>,
    },
    Remove {
        common: ResponseCommon,
        token: Option<MutationToken>,
    },
    Counter {
        common: ResponseCommon,
        value: u64,
        token: Option<MutationToken>,
    },
    Unlock {
        common: ResponseCommon,
    },
    Touch {
        common: ResponseCommon,
    },
    Append {
        common: ResponseCommon,
        token: Option<MutationToken>,
    },
    Prepend {
        common: ResponseCommon,
        token: Option<MutationToken>,
    },
    Stat {
        common: ResponseCommon,
        entries: Vec<(String, String)>,
    },
    GetAllMutationTokens {
        common: ResponseCommon,
        tokens: Vec<MutationToken>,
    },
    Observe {
        common: ResponseCommon,
        observed: ObserveStatus,
        observed_cas: u64,
    },
    ObserveSeqno {
        common: ResponseCommon,
        info: ObserveSeqnoInfo,
    },
    SubdocSingle {
        common: ResponseCommon,
        content: Bytes,
        token: Option<MutationToken>,
    },
    SubdocMultiLookup {
        common: ResponseCommon,
        results: Vec<SubdocResult>,
    },
    SubdocMultiMutation {
        common: ResponseCommon,
        results: Vec<SubdocResult>,
        first_error: Option<SubdocFirstError>,
        token: Option<MutationToken>,
    },
    KeepAlive {
        common: ResponseCommon,
    },
}

impl Response {
    pub fn common(&self) -> &ResponseCommon {
        match self {
            Self::Get { common, .. }
            | Self::GetBucketConfig { common, .. }
            | Self::Store { common, .. }
            | Self::Remove { common, .. }
            | Self::Counter { common, .. }
            | Self::Unlock { common }
            | Self::Touch { common }
            | Self::Append { common, .. }
            | Self::Prepend { common, .. }
            | Self::Stat { common, .. }
            | Self::GetAllMutationTokens { common, .. }
            | Self::Observe { common, .. }
            | Self::ObserveSeqno { common, .. }
            | Self::SubdocSingle { common, .. }
            | Self::SubdocMultiLookup { common, .. }
            | Self::SubdocMultiMutation { common, .. }
            | Self::KeepAlive { common } => common,
        }
    }

    pub fn status(&self) -> ResponseStatus {
        self.common().status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_translation() {
        assert_eq!(ResponseStatus::from_code(0x0000), ResponseStatus::Success);
        assert_eq!(ResponseStatus::from_code(0x0007), ResponseStatus::Retry);
        assert_eq!(
            ResponseStatus::from_code(0x0086),
            ResponseStatus::TemporaryFailure
        );
        assert_eq!(
            ResponseStatus::from_code(0x00CC),
            ResponseStatus::SubdocMultiPathFailure
        );
        // Unmapped codes collapse to the generic failure bucket.
        assert_eq!(ResponseStatus::from_code(0x7F00), ResponseStatus::Failure);
    }

    #[test]
    fn test_observe_status_bytes() {
        assert_eq!(
            ObserveStatus::from_byte(0x00),
            ObserveStatus::FoundNotPersisted
        );
        assert_eq!(ObserveStatus::from_byte(0x01), ObserveStatus::FoundPersisted);
        assert_eq!(ObserveStatus::from_byte(0x80), ObserveStatus::NotFound);
        assert_eq!(
            ObserveStatus::from_byte(0x81),
            ObserveStatus::LogicallyDeleted
        );
        assert_eq!(ObserveStatus::from_byte(0x42), ObserveStatus::Unknown);
    }
}
