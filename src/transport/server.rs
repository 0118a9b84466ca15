//! Native side of a channel: answer calls from one host connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use plugbridge_abi::{ErrorKind, Failure, Frame, ResponseEnvelope};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::{frame_name, handshake, read_frame, write_frame, TransportError, DETACHED_CALL_ID};
use crate::config::BridgeConfig;
use crate::dispatch::Dispatcher;

/// Cancellation flags of calls that have not finished yet.
type InFlight = Arc<Mutex<HashMap<u64, Arc<AtomicBool>>>>;

/// Serve calls arriving on `reader`, writing responses to `writer`.
///
/// Each call runs on the blocking pool, so several may execute at once and
/// responses go out in completion order, each tagged with its call id. A
/// `Cancel` frame only affects a call that has not started yet. Returns once
/// the host says goodbye or closes the stream and every started call has
/// been answered.
pub async fn serve<R, W>(
    dispatcher: Arc<Dispatcher>,
    mut reader: R,
    mut writer: W,
    config: &BridgeConfig,
) -> Result<(), TransportError>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let max = config.max_frame_size;
    let registry = dispatcher.registry();
    let local = (registry.name(), registry.version(), registry.hash());
    if let Err(err) = handshake(&mut reader, &mut writer, local, false, max).await {
        tracing::warn!(error = %err, "handshake failed");
        let _ = write_frame(&mut writer, &Frame::Goodbye, max).await;
        let _ = writer.shutdown().await;
        return Err(err);
    }

    let (responses, queue) = mpsc::channel::<ResponseEnvelope>(config.channel_buffer.max(1));
    let writer_task = tokio::spawn(write_responses(writer, queue, max));
    let in_flight: InFlight = Arc::default();

    let outcome = loop {
        let frame = match read_frame(&mut reader, max).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break Ok(()),
            Err(err) => break Err(err),
        };
        match frame {
            Frame::Call(call) => {
                let call_id = call.call_id;
                let cancel = Arc::new(AtomicBool::new(false));
                if call_id != DETACHED_CALL_ID {
                    lock(&in_flight).insert(call_id, Arc::clone(&cancel));
                }

                let dispatcher = Arc::clone(&dispatcher);
                let in_flight = Arc::clone(&in_flight);
                let responses = responses.clone();
                tokio::spawn(async move {
                    let ran = tokio::task::spawn_blocking(move || {
                        dispatcher.dispatch_cancellable(call, &cancel)
                    })
                    .await;
                    if call_id != DETACHED_CALL_ID {
                        lock(&in_flight).remove(&call_id);
                    }
                    let response = ran.unwrap_or_else(|err| {
                        tracing::error!(call_id, error = %err, "dispatch task failed");
                        ResponseEnvelope::failure(
                            call_id,
                            Failure::new(ErrorKind::Internal, "dispatch task failed"),
                        )
                    });
                    if responses.send(response).await.is_err() {
                        tracing::debug!(call_id, "response dropped, writer stopped");
                    }
                });
            }
            Frame::Cancel { call_id } => match lock(&in_flight).get(&call_id) {
                Some(flag) => {
                    flag.store(true, Ordering::Release);
                    tracing::debug!(call_id, "cancel requested");
                }
                None => tracing::debug!(call_id, "cancel for a call that already finished"),
            },
            Frame::Goodbye => break Ok(()),
            other => tracing::warn!(frame = frame_name(&other), "ignoring unexpected frame"),
        }
    };

    // running calls keep their own sender; the writer ends after the last one
    drop(responses);
    if writer_task.await.is_err() {
        tracing::warn!("response writer task failed");
    }
    tracing::debug!(schema = dispatcher.registry().name(), "connection finished");
    outcome
}

fn lock(in_flight: &InFlight) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<AtomicBool>>> {
    in_flight.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn write_responses<W>(mut writer: W, mut queue: mpsc::Receiver<ResponseEnvelope>, max: usize)
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = queue.recv().await {
        let call_id = response.call_id;
        let frame = Frame::Response(response);
        let written = match write_frame(&mut writer, &frame, max).await {
            Err(TransportError::FrameTooLarge { size, max }) => {
                // the host still needs an answer for this id
                let failure = Failure::new(
                    ErrorKind::Internal,
                    format!("response of {size} bytes exceeds the {max} byte frame limit"),
                );
                write_frame(&mut writer, &Frame::Response(ResponseEnvelope::failure(call_id, failure)), max).await
            }
            other => other,
        };
        if let Err(err) = written {
            tracing::warn!(call_id, error = %err, "response write failed");
            return;
        }
    }
    let _ = write_frame(&mut writer, &Frame::Goodbye, max).await;
    let _ = writer.shutdown().await;
}
