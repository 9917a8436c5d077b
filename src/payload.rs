//! Caller-owned payload buffers with explicit retain semantics.
//!
//! The codec's contract is that it owns exactly one retained handle per
//! payload-carrying request from encode until a terminal response, a
//! cancellation, or connection teardown. Handles are move-only; the only way
//! to duplicate one is the explicit [`Payload::retain`] call, and dropping a
//! handle releases it. The live handle count is observable so tests can
//! assert zero net drift across every code path.

use bytes::Bytes;
use std::sync::Arc;

#[derive(Debug)]
pub struct Payload {
    data: Bytes,
    // One strong count per live handle.
    tracker: Arc<()>,
}

impl Payload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            tracker: Arc::new(()),
        }
    }

    /// Duplicate this handle. The underlying bytes are shared, not copied.
    pub fn retain(&self) -> Payload {
        Payload {
            data: self.data.clone(),
            tracker: Arc::clone(&self.tracker),
        }
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of live handles to this payload, this one included.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.tracker)
    }
}
