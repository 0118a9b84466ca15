//! Per-call context handed to implementations.

use std::any::{type_name, Any};
use std::sync::{MutexGuard, PoisonError, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use plugbridge_abi::Value;

use super::handles::Instance;
use super::{CallError, Dispatcher};

/// How long `resolve` waits for another call to let go of an instance.
pub const RESOLVE_WAIT: Duration = Duration::from_millis(200);

/// What an implementation can do besides computing its result: mint handles
/// for new objects (the implicit `acquire`) and reach objects by handle.
pub struct CallContext<'a> {
    dispatcher: &'a Dispatcher,
    call_id: u64,
    /// Handle whose method is running; its instance is already locked.
    current: Option<u64>,
}

impl<'a> CallContext<'a> {
    pub(super) fn new(dispatcher: &'a Dispatcher, call_id: u64, current: Option<u64>) -> Self {
        Self {
            dispatcher,
            call_id,
            current,
        }
    }

    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Handle of the object whose method is executing, if any.
    pub fn current_handle(&self) -> Option<u64> {
        self.current
    }

    /// Store `instance` in the handle table and return its handle value.
    pub fn acquire<T: Any + Send>(&self, object: &str, instance: T) -> Result<Value, CallError> {
        let index = self
            .dispatcher
            .registry()
            .object_by_name(object)
            .and_then(|def| def.index)
            .ok_or_else(|| CallError::internal(format!("unknown object type {object}")))?;
        let handle = self.dispatcher.handles().insert(index, Box::new(instance));
        tracing::debug!(call_id = self.call_id, handle, object, "acquired handle");
        Ok(Value::Handle(handle))
    }

    /// Run `f` against the live instance behind `handle`.
    ///
    /// The running method keeps its own instance locked while it runs, so
    /// waiting for another instance is bounded by [`RESOLVE_WAIT`]; after
    /// that the call fails with an internal error.
    pub fn resolve<T: Any + Send, R>(
        &self,
        handle: u64,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, CallError> {
        if self.current == Some(handle) {
            return Err(CallError::internal(format!(
                "handle {handle} is already borrowed by the running method"
            )));
        }
        let entry = self
            .dispatcher
            .handles()
            .get(handle)
            .ok_or(CallError::InvalidHandle(handle))?;
        let mut guard = lock_within(&entry.instance, RESOLVE_WAIT).ok_or_else(|| {
            CallError::internal(format!("handle {handle} stayed busy for {RESOLVE_WAIT:?}"))
        })?;
        let instance = (**guard).downcast_mut::<T>().ok_or_else(|| {
            CallError::internal(format!("handle {handle} is not a {}", type_name::<T>()))
        })?;
        Ok(f(instance))
    }
}

fn lock_within(instance: &Instance, wait: Duration) -> Option<MutexGuard<'_, Box<dyn Any + Send>>> {
    let deadline = Instant::now() + wait;
    loop {
        match instance.try_lock() {
            Ok(guard) => return Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => return Some(PoisonError::into_inner(poisoned)),
            Err(TryLockError::WouldBlock) if Instant::now() >= deadline => return None,
            Err(TryLockError::WouldBlock) => thread::sleep(Duration::from_millis(1)),
        }
    }
}
