//! Pending-call table: call id -> the waiter for its response.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use plugbridge_abi::ResponseEnvelope;
use tokio::sync::oneshot;

use super::TransportError;

type Waiter = oneshot::Sender<Result<ResponseEnvelope, TransportError>>;

#[derive(Default)]
struct State {
    calls: HashMap<u64, Waiter>,
    /// Set once; the channel never reopens.
    closed: Option<String>,
}

/// Every entry is removed exactly once: by its response, by abandonment or
/// by the channel closing.
#[derive(Default)]
pub struct PendingCalls {
    state: Mutex<State>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track `call_id`; fails if the channel already closed.
    pub fn register(
        &self,
        call_id: u64,
    ) -> Result<oneshot::Receiver<Result<ResponseEnvelope, TransportError>>, TransportError> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(TransportError::Closed(reason.clone()));
        }
        if state.calls.contains_key(&call_id) {
            return Err(TransportError::Protocol(format!(
                "call id {call_id} is already in flight"
            )));
        }
        let (tx, rx) = oneshot::channel();
        state.calls.insert(call_id, tx);
        Ok(rx)
    }

    /// Route a response to its waiter. Returns false if nobody tracks its id.
    pub fn complete(&self, response: ResponseEnvelope) -> bool {
        let waiter = self.lock().calls.remove(&response.call_id);
        match waiter {
            // a dropped receiver means the caller gave up; same as untracked
            Some(tx) => tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    pub fn abandon(&self, call_id: u64) -> bool {
        self.lock().calls.remove(&call_id).is_some()
    }

    /// Fail every pending call and refuse new ones.
    pub fn close(&self, reason: &str) {
        let drained: Vec<(u64, Waiter)> = {
            let mut state = self.lock();
            if state.closed.is_none() {
                state.closed = Some(reason.to_string());
            }
            state.calls.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(pending = drained.len(), reason, "failing pending calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(TransportError::Closed(reason.to_string())));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("PendingCalls")
            .field("in_flight", &state.calls.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn responses_reach_their_own_waiter() {
        let pending = PendingCalls::new();
        let first = pending.register(1).unwrap();
        let second = pending.register(2).unwrap();

        assert!(pending.complete(ResponseEnvelope::success(2, vec![2])));
        assert!(pending.complete(ResponseEnvelope::success(1, vec![1])));

        assert_eq!(first.await.unwrap().unwrap().call_id, 1);
        assert_eq!(second.await.unwrap().unwrap().call_id, 2);
        assert!(pending.is_empty());
    }

    #[test]
    fn unknown_and_abandoned_ids_are_dropped() {
        let pending = PendingCalls::new();
        let _rx = pending.register(5).unwrap();
        assert!(pending.abandon(5));
        assert!(!pending.complete(ResponseEnvelope::success(5, Vec::new())));
        assert!(!pending.complete(ResponseEnvelope::success(99, Vec::new())));
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let pending = PendingCalls::new();
        let _rx = pending.register(1).unwrap();
        assert!(matches!(pending.register(1), Err(TransportError::Protocol(_))));
    }

    #[tokio::test]
    async fn close_fails_everything_once() {
        let pending = PendingCalls::new();
        let a = pending.register(1).unwrap();
        let b = pending.register(2).unwrap();
        pending.close("peer went away");
        pending.close("again");

        for rx in [a, b] {
            match rx.await.unwrap() {
                Err(TransportError::Closed(reason)) => assert_eq!(reason, "peer went away"),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(matches!(pending.register(3), Err(TransportError::Closed(_))));
    }
}
