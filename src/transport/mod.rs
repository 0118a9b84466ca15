//! Bridge Transport
//!
//! Moves encoded envelopes between the host and the native core:
//! - [`InProcessTransport`] - same process, one buffer in and one out,
//!   blocking the caller until the dispatcher returns
//! - [`ChannelTransport`] - any async byte stream, many calls in flight,
//!   responses routed back by call id
//!
//! Channel frames are length-prefixed:
//!
//! ```text
//! frame := len:u32le Frame bytes
//! ```
//!
//! Call id `0` is reserved for detached calls (best-effort releases); their
//! responses are never routed anywhere.

mod channel;
mod in_process;
mod pending;
mod server;

pub use channel::ChannelTransport;
pub use in_process::InProcessTransport;
pub use pending::PendingCalls;
pub use server::serve;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use plugbridge_abi::{CallEnvelope, Frame, InterfaceHash, ResponseEnvelope, WireError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Call id whose responses are discarded.
pub const DETACHED_CALL_ID: u64 = 0;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("channel closed: {0}")]
    Closed(String),

    #[error("interface mismatch: local {local} is {local_hash}, peer {peer} is {peer_hash}")]
    SchemaMismatch {
        local: String,
        local_hash: InterfaceHash,
        peer: String,
        peer_hash: InterfaceHash,
    },

    #[error("frame of {size} bytes exceeds the {max} byte limit")]
    FrameTooLarge { size: usize, max: usize },

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

/// Call id source shared by every client of one transport.
#[derive(Debug)]
pub struct CallIds(AtomicU64);

impl CallIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(DETACHED_CALL_ID + 1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for CallIds {
    fn default() -> Self {
        Self::new()
    }
}

pub type CallFuture = Pin<Box<dyn Future<Output = Result<ResponseEnvelope, TransportError>> + Send>>;

/// Delivery of calls to a native core.
///
/// `call` registers the call before returning, so calls issued one after
/// another reach the core in that order even if their futures are polled
/// later. Call ids come from the transport, so any number of clients may
/// share one.
pub trait Transport: Send + Sync {
    /// A call id not yet used on this transport. Never `DETACHED_CALL_ID`.
    fn next_call_id(&self) -> u64;

    fn call(&self, envelope: CallEnvelope) -> CallFuture;

    /// Stop tracking `call_id`; its response, if one arrives, is dropped.
    fn abandon(&self, call_id: u64);

    /// Ask the core not to start `call_id`. Best effort.
    fn cancel(&self, call_id: u64);

    /// Release `handle` without waiting for the outcome.
    fn release_detached(&self, handle: u64);
}

/// Read one length-prefixed frame. `Ok(None)` on a clean end of stream.
pub(crate) async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Frame>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match reader.read_exact(&mut len).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let size = u32::from_le_bytes(len) as usize;
    if size > max {
        return Err(TransportError::FrameTooLarge { size, max });
    }
    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Ok(Some(Frame::from_bytes(&body)?))
}

/// Encode `frame`, refusing bodies over `max`.
pub(crate) fn encode_frame(frame: &Frame, max: usize) -> Result<Vec<u8>, TransportError> {
    let body = frame.to_bytes()?;
    if body.len() > max || u32::try_from(body.len()).is_err() {
        return Err(TransportError::FrameTooLarge {
            size: body.len(),
            max,
        });
    }
    Ok(body)
}

/// Write an already encoded frame body with its length prefix.
pub(crate) async fn write_body<W>(writer: &mut W, body: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    // encode_frame keeps bodies within u32
    let len = body.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

pub(crate) async fn write_frame<W>(writer: &mut W, frame: &Frame, max: usize) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_frame(frame, max)?;
    write_body(writer, &body).await
}

/// Exchange `Hello` frames. `send_first` is true on the host side.
pub(crate) async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    local: (&str, u32, InterfaceHash),
    send_first: bool,
    max: usize,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (schema, version, hash) = local;
    let hello = Frame::Hello {
        schema: schema.to_string(),
        version,
        hash,
    };
    if send_first {
        write_frame(writer, &hello, max).await?;
    }
    let peer = match read_frame(reader, max).await? {
        Some(Frame::Hello {
            schema,
            version,
            hash,
        }) => (schema, version, hash),
        Some(other) => {
            return Err(TransportError::Protocol(format!(
                "expected hello, got {}",
                frame_name(&other)
            )))
        }
        None => return Err(TransportError::Closed("peer left during handshake".into())),
    };
    if !send_first {
        write_frame(writer, &hello, max).await?;
    }

    let (peer_schema, peer_version, peer_hash) = peer;
    if peer_hash != hash {
        return Err(TransportError::SchemaMismatch {
            local: format!("{schema}@{version}"),
            local_hash: hash,
            peer: format!("{peer_schema}@{peer_version}"),
            peer_hash,
        });
    }
    tracing::debug!(schema, hash = %hash.short(), "handshake complete");
    Ok(())
}

pub(crate) fn frame_name(frame: &Frame) -> &'static str {
    match frame {
        Frame::Hello { .. } => "hello",
        Frame::Call(_) => "call",
        Frame::Response(_) => "response",
        Frame::Cancel { .. } => "cancel",
        Frame::Goodbye => "goodbye",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plugbridge_abi::CallTarget;

    #[tokio::test]
    async fn frames_cross_a_stream() {
        let (a, b) = tokio::io::duplex(1024);
        let (_, mut writer) = tokio::io::split(a);
        let (mut reader, _) = tokio::io::split(b);

        let call = Frame::Call(CallEnvelope::new(9, CallTarget::Release { handle: 3 }, Vec::new()));
        write_frame(&mut writer, &call, 1024).await.unwrap();
        write_frame(&mut writer, &Frame::Goodbye, 1024).await.unwrap();
        drop(writer);

        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), Some(call));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), Some(Frame::Goodbye));
        assert_eq!(read_frame(&mut reader, 1024).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let (a, b) = tokio::io::duplex(1024);
        let (_, mut writer) = tokio::io::split(a);
        let (mut reader, _) = tokio::io::split(b);

        writer.write_all(&4096u32.to_le_bytes()).await.unwrap();
        let err = read_frame(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { size: 4096, max: 1024 }));

        let big = Frame::Call(CallEnvelope::new(1, CallTarget::Function { index: 0 }, vec![0; 64]));
        let err = write_frame(&mut writer, &big, 16).await.unwrap_err();
        assert!(matches!(err, TransportError::FrameTooLarge { max: 16, .. }));
    }
}
