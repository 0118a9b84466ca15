use std::sync::Arc;

use plugbridge_abi::{CallEnvelope, CallTarget, Frame};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    encode_frame, frame_name, handshake, read_frame, write_body, write_frame, CallFuture, CallIds,
    PendingCalls, Transport, TransportError, DETACHED_CALL_ID,
};
use crate::config::BridgeConfig;
use crate::registry::Registry;

/// Host side of an asynchronous channel to a native core.
///
/// A writer task drains the outbound queue onto the stream and a reader task
/// routes each response to its pending call. When either side of the stream
/// fails or the peer says goodbye, every pending call fails with
/// [`TransportError::Closed`] and so does every later call.
///
/// Frames are encoded before they are queued, so a call too large for one
/// frame fails on its own and leaves the channel open.
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Outgoing>,
    pending: Arc<PendingCalls>,
    reader: JoinHandle<()>,
    max_frame_size: usize,
    ids: CallIds,
}

/// An encoded frame waiting for the writer.
struct Outgoing {
    name: &'static str,
    body: Vec<u8>,
}

impl ChannelTransport {
    /// Handshake with the native core over `reader`/`writer` and start the
    /// channel tasks. Must be called inside a tokio runtime.
    pub async fn connect<R, W>(
        registry: &Registry,
        mut reader: R,
        mut writer: W,
        config: &BridgeConfig,
    ) -> Result<Self, TransportError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let max = config.max_frame_size;
        let local = (registry.name(), registry.version(), registry.hash());
        if let Err(err) = handshake(&mut reader, &mut writer, local, true, max).await {
            let _ = write_frame(&mut writer, &Frame::Goodbye, max).await;
            return Err(err);
        }

        let pending = Arc::new(PendingCalls::new());
        let (outbound, queue) = mpsc::unbounded_channel();

        // the writer stops on its own once the queue is closed or drained
        tokio::spawn(write_loop(writer, queue, Arc::clone(&pending)));
        let reader = tokio::spawn(read_loop(reader, Arc::clone(&pending), max));

        tracing::debug!(schema = registry.name(), "channel open");
        Ok(Self {
            outbound,
            pending,
            reader,
            max_frame_size: max,
            ids: CallIds::new(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    /// Number of calls awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Say goodbye and fail everything still pending.
    pub fn close(&self) {
        let _ = self.send(&Frame::Goodbye);
        self.pending.close("closed locally");
    }

    fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let body = encode_frame(frame, self.max_frame_size)?;
        let outgoing = Outgoing {
            name: frame_name(frame),
            body,
        };
        self.outbound
            .send(outgoing)
            .map_err(|_| TransportError::Closed("writer stopped".into()))
    }
}

impl Transport for ChannelTransport {
    fn next_call_id(&self) -> u64 {
        self.ids.next()
    }

    fn call(&self, envelope: CallEnvelope) -> CallFuture {
        let call_id = envelope.call_id;
        let registered = self.pending.register(call_id).and_then(|rx| {
            self.send(&Frame::Call(envelope)).map(|()| rx).inspect_err(|_| {
                self.pending.abandon(call_id);
            })
        });
        Box::pin(async move {
            let rx = registered?;
            match rx.await {
                Ok(result) => result,
                // sender dropped without a word: the table went away with the channel
                Err(_) => Err(TransportError::Closed("channel dropped".into())),
            }
        })
    }

    fn abandon(&self, call_id: u64) {
        if self.pending.abandon(call_id) {
            tracing::debug!(call_id, "call abandoned");
        }
    }

    fn cancel(&self, call_id: u64) {
        if let Err(err) = self.send(&Frame::Cancel { call_id }) {
            tracing::debug!(call_id, error = %err, "cancel not sent");
        }
    }

    fn release_detached(&self, handle: u64) {
        let release = CallEnvelope::new(DETACHED_CALL_ID, CallTarget::Release { handle }, Vec::new());
        if let Err(err) = self.send(&Frame::Call(release)) {
            tracing::debug!(handle, error = %err, "release not sent");
        }
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        let _ = self.send(&Frame::Goodbye);
        self.pending.close("transport dropped");
        self.reader.abort();
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    pending: Arc<PendingCalls>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(Outgoing { name, body }) = queue.recv().await {
        // only the stream itself can fail here, and then nothing more gets through
        if let Err(err) = write_body(&mut writer, &body).await {
            tracing::warn!(error = %err, frame = name, "channel write failed");
            pending.close(&format!("write failed: {err}"));
            return;
        }
        if name == "goodbye" {
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(mut reader: R, pending: Arc<PendingCalls>, max: usize)
where
    R: AsyncRead + Unpin,
{
    let reason = loop {
        match read_frame(&mut reader, max).await {
            Ok(Some(Frame::Response(response))) => {
                let call_id = response.call_id;
                if call_id != DETACHED_CALL_ID && !pending.complete(response) {
                    tracing::debug!(call_id, "dropping response for untracked call");
                }
            }
            Ok(Some(Frame::Goodbye)) => break "peer said goodbye".to_string(),
            Ok(Some(other)) => {
                tracing::warn!(frame = frame_name(&other), "ignoring unexpected frame");
            }
            Ok(None) => break "peer closed the stream".to_string(),
            Err(err) => {
                tracing::warn!(error = %err, "channel read failed");
                break format!("read failed: {err}");
            }
        }
    };
    pending.close(&reason);
}
