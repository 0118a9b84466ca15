//! Host Proxy Layer
//!
//! Turns named calls into envelopes, waits for the matching response and
//! turns failures back into [`BridgeError`]s. Arguments are not checked on
//! this side; the native dispatcher is the single authority on what a call
//! may carry.
//!
//! Objects are represented by [`ObjectProxy`]. Releasing one explicitly with
//! [`ObjectProxy::release`] is deterministic; dropping it sends a detached
//! release that nobody waits for.

mod object;

pub use object::ObjectProxy;

use std::sync::Arc;
use std::time::Duration;

use plugbridge_abi::{decode_with_limits, encode, CallEnvelope, CallTarget, Limits, Outcome, Value};

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::registry::Registry;
use crate::transport::Transport;

struct ClientInner {
    registry: Arc<Registry>,
    transport: Arc<dyn Transport>,
    timeout: Option<Duration>,
    limits: Limits,
}

/// Host-side entry point to a native core. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    pub fn new(registry: Arc<Registry>, transport: Arc<dyn Transport>, config: &BridgeConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                registry,
                transport,
                timeout: config.call_timeout(),
                limits: config.limits,
            }),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Call a top-level function by schema name.
    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let index = self
            .registry()
            .function_by_name(name)
            .and_then(|f| f.index)
            .ok_or_else(|| BridgeError::UnknownFunction(name.to_string()))?;
        self.call_index(index, args).await
    }

    /// Call a top-level function by dispatch index, as generated bindings do.
    pub async fn call_index(&self, index: u32, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.invoke(CallTarget::Function { index }, &args).await
    }

    /// Run `object`'s constructor and wrap the new handle.
    pub async fn construct(&self, object: &str, args: Vec<Value>) -> Result<ObjectProxy, BridgeError> {
        let def = self
            .registry()
            .object_by_name(object)
            .ok_or_else(|| BridgeError::UnknownObject(object.to_string()))?;
        if def.constructor.is_none() {
            return Err(BridgeError::NoConstructor(object.to_string()));
        }
        let index = def.index.unwrap_or(0);
        let value = self.invoke(CallTarget::Constructor { object: index }, &args).await?;
        let handle = value.as_handle().ok_or_else(|| {
            BridgeError::UnexpectedResult(format!(
                "constructor of {object} returned a {} instead of a handle",
                value.kind().name()
            ))
        })?;
        Ok(ObjectProxy::new(self.clone(), object, index, handle))
    }

    /// Wrap a handle returned by a function. The proxy takes over releasing it.
    pub fn adopt(&self, object: &str, handle: u64) -> Result<ObjectProxy, BridgeError> {
        let index = self
            .registry()
            .object_by_name(object)
            .and_then(|def| def.index)
            .ok_or_else(|| BridgeError::UnknownObject(object.to_string()))?;
        Ok(ObjectProxy::new(self.clone(), object, index, handle))
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub(crate) async fn invoke(&self, target: CallTarget, args: &[Value]) -> Result<Value, BridgeError> {
        let mut bytes = Vec::new();
        for arg in args {
            bytes.extend(encode(arg).map_err(BridgeError::Encode)?);
        }

        let call_id = self.transport().next_call_id();
        tracing::debug!(call_id, %target, "calling");
        let pending = self.transport().call(CallEnvelope::new(call_id, target, bytes));

        let response = match self.inner.timeout {
            Some(after) => match tokio::time::timeout(after, pending).await {
                Ok(response) => response?,
                Err(_) => {
                    // the call may still run; its late response is dropped
                    self.transport().abandon(call_id);
                    self.transport().cancel(call_id);
                    tracing::debug!(call_id, ?after, "call timed out");
                    return Err(BridgeError::Timeout { call_id, after });
                }
            },
            None => pending.await?,
        };

        if response.call_id != call_id {
            return Err(BridgeError::UnexpectedResult(format!(
                "response for call {} delivered to call {call_id}",
                response.call_id
            )));
        }

        match response.outcome {
            Outcome::Success(bytes) => {
                decode_with_limits(&bytes, &self.inner.limits).map_err(BridgeError::Decode)
            }
            Outcome::Failure(failure) => {
                let payload = match &failure.payload {
                    Some(bytes) => Some(decode_with_limits(bytes, &self.inner.limits).map_err(BridgeError::Decode)?),
                    None => None,
                };
                Err(BridgeError::Remote {
                    kind: failure.kind,
                    message: failure.message,
                    payload,
                })
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("schema", &self.inner.registry.name())
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}
