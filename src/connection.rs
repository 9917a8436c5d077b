//! A single-connection pipeline stage: owns the socket and the codec,
//! writes encoded frames, and turns incoming frames into typed responses.
//!
//! Transport setup beyond plain TCP (TLS, bootstrap, pooling) belongs to the
//! caller; the struct is generic over the stream so tests can drive it with
//! in-memory duplex pipes.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::codec::{Decoded, KvCodec};
use crate::error::Result;
use crate::protocol::{self, ServerFeature};
use crate::request::{OpaqueGenerator, Operation, Request};

pub struct Connection<S> {
    stream: S,
    codec: KvCodec,
    opaques: OpaqueGenerator,
    bucket: String,
}

impl Connection<TcpStream> {
    pub async fn connect(
        addr: &str,
        bucket: &str,
        mutation_tokens_enabled: bool,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let remote = stream.peer_addr()?.ip().to_string();
        tracing::debug!(%addr, bucket, "connected");
        Ok(Self::from_stream(
            stream,
            remote,
            bucket,
            mutation_tokens_enabled,
        ))
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(
        stream: S,
        remote: impl Into<String>,
        bucket: &str,
        mutation_tokens_enabled: bool,
    ) -> Self {
        Self {
            stream,
            codec: KvCodec::new(bucket, remote, mutation_tokens_enabled),
            opaques: OpaqueGenerator::new(),
            bucket: bucket.to_string(),
        }
    }

    /// Forward a negotiated-features event to the codec.
    pub fn apply_server_features(&mut self, features: &[ServerFeature]) {
        self.codec.apply_server_features(features);
    }

    pub fn next_opaque(&mut self) -> u32 {
        self.opaques.next()
    }

    pub fn pending(&self) -> usize {
        self.codec.pending()
    }

    /// Encode and write one request.
    pub async fn send(&mut self, request: Request) -> Result<()> {
        let frame = self.codec.encode(request);
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Read frames until one completes the request at the queue head.
    /// Intermediate STAT chunks are absorbed here.
    pub async fn receive(&mut self) -> Result<Decoded> {
        loop {
            let raw = protocol::read_response(&mut self.stream).await?;
            if let Some(decoded) = self.codec.decode(raw)? {
                return Ok(decoded);
            }
        }
    }

    /// One full request/response round trip.
    pub async fn call(&mut self, partition: i16, cas: u64, op: Operation) -> Result<Decoded> {
        let opaque = self.opaques.next();
        let request = Request::new(opaque, partition, self.bucket.clone(), op).with_cas(cas);
        self.send(request).await?;
        self.receive().await
    }

    /// Emit a protocol no-op and wait for its acknowledgement. The caller
    /// decides when the connection has been idle long enough to need one.
    pub async fn keepalive(&mut self) -> Result<Decoded> {
        let opaque = self.opaques.next();
        let frame = self.codec.encode_keepalive(opaque);
        self.stream.write_all(&frame).await?;
        self.receive().await
    }

    /// Cancel one pending request by opaque.
    pub fn cancel(&mut self, opaque: u32) -> bool {
        self.codec.cancel(opaque)
    }

    /// Tear the connection down, releasing every pending request.
    pub async fn close(mut self) -> Result<()> {
        self.codec.close();
        self.stream.shutdown().await?;
        Ok(())
    }
}
