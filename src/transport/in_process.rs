use std::sync::Arc;

use plugbridge_abi::{CallEnvelope, CallTarget, Outcome, ResponseEnvelope};

use super::{CallFuture, CallIds, Transport, TransportError, DETACHED_CALL_ID};
use crate::dispatch::Dispatcher;

/// Direct calls into a dispatcher living in the same process.
///
/// The envelope still crosses as one encoded buffer each way, exactly as it
/// would through a foreign-function boundary. `call` runs the dispatcher on
/// the calling thread and returns an already-completed future.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    dispatcher: Arc<Dispatcher>,
    ids: Arc<CallIds>,
}

impl InProcessTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            ids: Arc::default(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Blocking round trip through the byte-level entry point.
    pub fn call_blocking(&self, envelope: &CallEnvelope) -> Result<ResponseEnvelope, TransportError> {
        let request = envelope.to_bytes()?;
        let reply = self.dispatcher.handle_bytes(&request);
        Ok(ResponseEnvelope::from_bytes(&reply)?)
    }
}

impl Transport for InProcessTransport {
    fn next_call_id(&self) -> u64 {
        self.ids.next()
    }

    fn call(&self, envelope: CallEnvelope) -> CallFuture {
        let result = self.call_blocking(&envelope);
        Box::pin(std::future::ready(result))
    }

    // calls complete before `call` returns; nothing is ever pending
    fn abandon(&self, _call_id: u64) {}

    fn cancel(&self, _call_id: u64) {}

    fn release_detached(&self, handle: u64) {
        let release = CallEnvelope::new(DETACHED_CALL_ID, CallTarget::Release { handle }, Vec::new());
        match self.call_blocking(&release).map(|response| response.outcome) {
            Ok(Outcome::Success(_)) => tracing::debug!(handle, "released"),
            Ok(Outcome::Failure(failure)) => {
                tracing::debug!(handle, kind = %failure.kind, "detached release failed")
            }
            Err(err) => tracing::warn!(handle, error = %err, "detached release failed"),
        }
    }
}
