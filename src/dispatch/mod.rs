//! Native Core Dispatcher
//!
//! Receives encoded calls, resolves them through index-addressed dispatch
//! tables, decodes and checks arguments against the registry, runs the
//! implementation and encodes its outcome. Nothing an implementation does
//! escapes a call: panics become [`ErrorKind::Internal`] failures and domain
//! errors become structured [`Failure`]s.
//!
//! ## Cancellation
//!
//! Cancellation is advisory. A call is checked once, after its arguments
//! decode and before its implementation starts. An implementation that is
//! already running is never interrupted and its result is still delivered.

mod builder;
mod context;
mod handles;

pub use builder::{BindError, DispatcherBuilder, FromArgs, ObjectBuilder};
pub use context::{CallContext, RESOLVE_WAIT};
pub use handles::{HandleEntry, HandleTable, Instance};

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use plugbridge_abi::{
    encode, CallEnvelope, CallTarget, ConversionError, ErrorKind, Failure, IntoValue, Limits,
    ResponseEnvelope, Value, ValueReader,
};
use thiserror::Error;

use crate::registry::{Registry, ValueError};
use crate::types::{Param, Type};

/// Error returned by an implementation.
#[derive(Debug, Error)]
pub enum CallError {
    /// A case of the function's declared error enum.
    #[error("{message}")]
    Domain { value: Value, message: String },

    #[error("invalid handle {0}")]
    InvalidHandle(u64),

    #[error("{0}")]
    Internal(String),
}

impl CallError {
    /// Domain error carrying `value`, which must be a case of the declared enum.
    pub fn domain(value: impl IntoValue, message: impl Into<String>) -> Self {
        CallError::Domain {
            value: value.into_value(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CallError::Internal(message.into())
    }
}

impl From<ConversionError> for CallError {
    fn from(err: ConversionError) -> Self {
        CallError::Internal(format!("argument conversion failed: {err}"))
    }
}

pub(crate) type FunctionHandler =
    Arc<dyn Fn(&CallContext<'_>, Vec<Value>) -> Result<Value, CallError> + Send + Sync>;

pub(crate) type ConstructorHandler = Arc<
    dyn Fn(&CallContext<'_>, Vec<Value>) -> Result<Box<dyn Any + Send>, CallError> + Send + Sync,
>;

pub(crate) type MethodHandler = Arc<
    dyn Fn(&CallContext<'_>, &mut (dyn Any + Send), Vec<Value>) -> Result<Value, CallError>
        + Send
        + Sync,
>;

/// Dispatch table of one object type.
pub(crate) struct ObjectSlot {
    pub(crate) constructor: Option<ConstructorHandler>,
    /// Indexed by method index.
    pub(crate) methods: Vec<Option<MethodHandler>>,
}

/// Encoded failure returned by generated shims before a dispatcher is installed.
pub fn not_installed(call_id: u64) -> Vec<u8> {
    encode_response(&ResponseEnvelope::failure(
        call_id,
        Failure::new(ErrorKind::Internal, "no dispatcher installed"),
    ))
}

fn encode_response(response: &ResponseEnvelope) -> Vec<u8> {
    match response.to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(call_id = response.call_id, error = %err, "response does not encode");
            ResponseEnvelope::failure(
                response.call_id,
                Failure::new(ErrorKind::Internal, "response does not encode"),
            )
            .to_bytes()
            .unwrap_or_default()
        }
    }
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    /// Indexed by function index.
    functions: Vec<Option<FunctionHandler>>,
    /// Indexed by object index.
    objects: Vec<Option<ObjectSlot>>,
    handles: HandleTable,
    limits: Limits,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("schema", &self.registry.name())
            .field("hash", &self.registry.hash())
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn builder(registry: impl Into<Arc<Registry>>) -> DispatcherBuilder {
        DispatcherBuilder::new(registry)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_arc(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Execute one call.
    pub fn dispatch(&self, call: CallEnvelope) -> ResponseEnvelope {
        self.dispatch_cancellable(call, &AtomicBool::new(false))
    }

    /// Execute one call; `cancel` is observed alongside the envelope's own flag.
    pub fn dispatch_cancellable(&self, call: CallEnvelope, cancel: &AtomicBool) -> ResponseEnvelope {
        let span = tracing::debug_span!("dispatch", call_id = call.call_id, target = %call.target);
        let _enter = span.enter();

        let call_id = call.call_id;
        match self.execute(&call, cancel) {
            Ok(bytes) => {
                tracing::debug!("call succeeded");
                ResponseEnvelope::success(call_id, bytes)
            }
            Err(failure) => {
                tracing::debug!(kind = %failure.kind, message = %failure.message, "call failed");
                ResponseEnvelope::failure(call_id, failure)
            }
        }
    }

    /// Byte-level entry: encoded `CallEnvelope` in, encoded `ResponseEnvelope` out.
    pub fn handle_bytes(&self, envelope: &[u8]) -> Vec<u8> {
        let response = match CallEnvelope::from_bytes(envelope) {
            Ok(call) => self.dispatch(call),
            Err(err) => {
                tracing::warn!(error = %err, "undecodable call envelope");
                ResponseEnvelope::failure(
                    0,
                    Failure::new(ErrorKind::ArgumentDecode, format!("call envelope: {err}")),
                )
            }
        };
        encode_response(&response)
    }

    /// Direct entry for generated per-symbol shims; `args` are the encoded arguments.
    pub fn call_raw(&self, target: CallTarget, args: &[u8]) -> Vec<u8> {
        encode_response(&self.dispatch(CallEnvelope::new(0, target, args.to_vec())))
    }

    fn execute(&self, call: &CallEnvelope, cancel: &AtomicBool) -> Result<Vec<u8>, Failure> {
        match call.target {
            CallTarget::Function { index } => {
                let decl = self.registry.function(index);
                let handler = self.functions.get(index as usize).and_then(Option::as_ref);
                let (decl, handler) = decl.zip(handler).ok_or_else(|| {
                    Failure::new(ErrorKind::UnknownTarget, format!("no function at index {index}"))
                })?;

                let owner = format!("function {}", decl.name);
                let args = self.decode_args(&owner, &decl.params, &call.args)?;
                check_cancelled(call, cancel)?;

                let ctx = CallContext::new(self, call.call_id, None);
                let result = guarded(&owner, || handler(&ctx, args));
                self.complete(&owner, decl.returns.as_ref(), decl.throws.as_deref(), result)
            }
            CallTarget::Constructor { object } => {
                let def = self.registry.object(object);
                let slot = self.objects.get(object as usize).and_then(Option::as_ref);
                let (def, slot) = def.zip(slot).ok_or_else(|| {
                    Failure::new(ErrorKind::UnknownTarget, format!("no object at index {object}"))
                })?;
                let (decl, handler) = def
                    .constructor
                    .as_ref()
                    .zip(slot.constructor.as_ref())
                    .ok_or_else(|| {
                        Failure::new(
                            ErrorKind::UnknownTarget,
                            format!("object {} has no constructor", def.name),
                        )
                    })?;

                let owner = format!("object {}, constructor", def.name);
                let args = self.decode_args(&owner, &decl.params, &call.args)?;
                check_cancelled(call, cancel)?;

                let ctx = CallContext::new(self, call.call_id, None);
                let instance = guarded(&owner, || handler(&ctx, args));
                match instance {
                    Ok(instance) => {
                        let handle = self.handles.insert(object, instance);
                        tracing::debug!(handle, object = %def.name, "constructed");
                        encode_value(&owner, &Value::Handle(handle))
                    }
                    Err(err) => Err(self.failure(&owner, decl.throws.as_deref(), err)),
                }
            }
            CallTarget::Method { handle, index } => {
                let entry = self.handles.get(handle).ok_or_else(|| {
                    Failure::new(ErrorKind::InvalidHandle, format!("handle {handle} is not live"))
                })?;
                let def = self.registry.object(entry.object);
                let decl = self.registry.method(entry.object, index);
                let handler = self
                    .objects
                    .get(entry.object as usize)
                    .and_then(Option::as_ref)
                    .and_then(|slot| slot.methods.get(index as usize))
                    .and_then(Option::as_ref);
                let ((def, decl), handler) = def.zip(decl).zip(handler).ok_or_else(|| {
                    Failure::new(
                        ErrorKind::UnknownTarget,
                        format!("no method at index {index} for handle {handle}"),
                    )
                })?;

                let owner = format!("object {}, method {}", def.name, decl.name);
                let args = self.decode_args(&owner, &decl.params, &call.args)?;
                check_cancelled(call, cancel)?;

                let ctx = CallContext::new(self, call.call_id, Some(handle));
                let result = {
                    let mut instance = entry
                        .instance
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    guarded(&owner, || handler(&ctx, &mut **instance, args))
                };
                self.complete(&owner, decl.returns.as_ref(), decl.throws.as_deref(), result)
            }
            CallTarget::Release { handle } => match self.handles.remove(handle) {
                Some(_) => {
                    tracing::debug!(handle, "released");
                    encode_value("release", &Value::Unit)
                }
                None => Err(Failure::new(
                    ErrorKind::InvalidHandle,
                    format!("handle {handle} is not live"),
                )),
            },
        }
    }

    /// Decode the arguments one parameter at a time, checking each against its
    /// declared type. Handles must be live and point at the declared object.
    fn decode_args(&self, owner: &str, params: &[Param], bytes: &[u8]) -> Result<Vec<Value>, Failure> {
        let decode_failure =
            |message: String| Failure::new(ErrorKind::ArgumentDecode, format!("{owner}: {message}"));

        let mut reader =
            ValueReader::new(bytes, &self.limits).map_err(|err| decode_failure(err.to_string()))?;
        let checker = self.registry.checker();
        let mut args = Vec::with_capacity(params.len());

        for (position, param) in params.iter().enumerate() {
            let describe = || format!("argument {position} ({}: {})", param.name, param.ty);
            if reader.is_eof() {
                return Err(decode_failure(format!("missing {}", describe())));
            }
            let value = reader
                .read_value()
                .map_err(|err| decode_failure(format!("{}: {err}", describe())))?;

            let mut live = |handle: u64, object: &str| self.check_handle(handle, object);
            checker
                .check_with(&value, &param.ty, &param.name, &mut live)
                .map_err(|err| match err {
                    ValueError::Handle { .. } => Failure::new(
                        ErrorKind::InvalidHandle,
                        format!("{owner}: {}: {err}", describe()),
                    ),
                    other => decode_failure(format!("{}: {other}", describe())),
                })?;
            args.push(value);
        }

        reader
            .finish()
            .map_err(|err| decode_failure(format!("more arguments than the {} declared: {err}", params.len())))?;
        Ok(args)
    }

    fn check_handle(&self, handle: u64, object: &str) -> Result<(), String> {
        let expected = self
            .registry
            .object_by_name(object)
            .and_then(|def| def.index)
            .ok_or_else(|| format!("unknown object type {object}"))?;
        match self.handles.object_of(handle) {
            Some(found) if found == expected => Ok(()),
            Some(found) => Err(format!(
                "refers to a {}, not a {object}",
                self.registry
                    .object(found)
                    .map(|def| def.name.as_str())
                    .unwrap_or("unknown object")
            )),
            None => Err("not live".to_string()),
        }
    }

    /// Validate and encode an implementation's outcome.
    fn complete(
        &self,
        owner: &str,
        returns: Option<&Type>,
        throws: Option<&str>,
        result: Result<Value, CallError>,
    ) -> Result<Vec<u8>, Failure> {
        let value = result.map_err(|err| self.failure(owner, throws, err))?;
        match returns {
            None if value != Value::Unit => {
                return Err(contract_violation(
                    owner,
                    format!("returned a {} but declares no result", value.kind().name()),
                ))
            }
            None => {}
            Some(ty) => {
                let mut live = |handle: u64, object: &str| self.check_handle(handle, object);
                self.registry
                    .checker()
                    .check_with(&value, ty, "result", &mut live)
                    .map_err(|err| contract_violation(owner, err.to_string()))?;
            }
        }
        encode_value(owner, &value)
    }

    fn failure(&self, owner: &str, throws: Option<&str>, err: CallError) -> Failure {
        match err {
            CallError::InvalidHandle(handle) => Failure::new(
                ErrorKind::InvalidHandle,
                format!("{owner}: handle {handle} is not live"),
            ),
            CallError::Internal(message) => Failure::new(ErrorKind::Internal, format!("{owner}: {message}")),
            CallError::Domain { value, message } => match self.domain_failure(throws, value, message) {
                Ok(failure) => failure,
                Err(reason) => contract_violation(owner, reason),
            },
        }
    }

    fn domain_failure(
        &self,
        throws: Option<&str>,
        value: Value,
        message: String,
    ) -> Result<Failure, String> {
        let error_enum = throws.ok_or("raised a domain error but declares none")?;
        let cases = self
            .registry
            .error_cases(error_enum)
            .ok_or_else(|| format!("error type {error_enum} is not an enum"))?;
        self.registry
            .checker()
            .check(&value, &Type::Named(error_enum.to_string()))
            .map_err(|err| format!("domain error is not a {error_enum}: {err}"))?;
        let case = match &value {
            Value::Variant { tag, .. } => cases.get(*tag as usize),
            _ => None,
        }
        .ok_or_else(|| format!("domain error is not a {error_enum} case"))?;

        let payload = encode(&value).map_err(|err| format!("domain error does not encode: {err}"))?;
        let message = if message.is_empty() {
            case.name.clone()
        } else {
            message
        };
        Ok(Failure {
            kind: ErrorKind::Domain(case.name.clone()),
            message,
            payload: Some(payload),
        })
    }
}

fn check_cancelled(call: &CallEnvelope, cancel: &AtomicBool) -> Result<(), Failure> {
    if call.cancelled || cancel.load(Ordering::Acquire) {
        return Err(Failure::new(
            ErrorKind::Cancelled,
            "cancelled before the implementation started",
        ));
    }
    Ok(())
}

/// Run an implementation, turning a panic into an internal failure.
fn guarded<R>(owner: &str, f: impl FnOnce() -> Result<R, CallError>) -> Result<R, CallError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(owner, %reason, "implementation panicked");
        Err(CallError::Internal(format!("implementation panicked: {reason}")))
    })
}

fn contract_violation(owner: &str, reason: String) -> Failure {
    tracing::warn!(owner, %reason, "implementation broke its declared contract");
    Failure::new(ErrorKind::Internal, format!("{owner}: {reason}"))
}

fn encode_value(owner: &str, value: &Value) -> Result<Vec<u8>, Failure> {
    encode(value).map_err(|err| contract_violation(owner, format!("result does not encode: {err}")))
}
