use plugbridge_abi::{CallTarget, Value};

use super::Client;
use crate::error::BridgeError;

/// Host-side stand-in for one native object.
pub struct ObjectProxy {
    client: Client,
    object: String,
    object_index: u32,
    handle: u64,
    released: bool,
}

impl ObjectProxy {
    pub(super) fn new(client: Client, object: &str, object_index: u32, handle: u64) -> Self {
        Self {
            client,
            object: object.to_string(),
            object_index,
            handle,
            released: false,
        }
    }

    pub fn handle(&self) -> u64 {
        self.handle
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    /// Handle value for passing this object as an argument.
    pub fn as_value(&self) -> Value {
        Value::Handle(self.handle)
    }

    /// Call a method by schema name.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let index = self
            .client
            .registry()
            .methods(self.object_index)
            .into_iter()
            .find(|m| m.name == method)
            .and_then(|m| m.index)
            .ok_or_else(|| BridgeError::UnknownMethod {
                object: self.object.clone(),
                method: method.to_string(),
            })?;
        self.call_index(index, args).await
    }

    pub async fn call_index(&self, index: u32, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.client
            .invoke(
                CallTarget::Method {
                    handle: self.handle,
                    index,
                },
                &args,
            )
            .await
    }

    /// Release the native object and wait for the core to confirm.
    pub async fn release(mut self) -> Result<(), BridgeError> {
        self.released = true;
        self.client
            .invoke(CallTarget::Release { handle: self.handle }, &[])
            .await
            .map(drop)
    }

    /// Give up ownership without releasing; the caller now owns the handle.
    pub fn into_handle(mut self) -> u64 {
        self.released = true;
        self.handle
    }
}

impl Drop for ObjectProxy {
    fn drop(&mut self) {
        if !self.released {
            tracing::debug!(handle = self.handle, object = %self.object, "releasing dropped proxy");
            self.client.transport().release_detached(self.handle);
        }
    }
}

impl std::fmt::Debug for ObjectProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectProxy")
            .field("object", &self.object)
            .field("handle", &self.handle)
            .field("released", &self.released)
            .finish()
    }
}
