//! Implementation registration.
//!
//! Implementations are registered by schema name; [`DispatcherBuilder::build`]
//! resolves names to dispatch indices once, so the hot path never compares
//! strings.
//!
//! ```ignore
//! let dispatcher = DispatcherBuilder::new(registry)
//!     .function_typed("add", |_ctx, (a, b): (i32, i32)| Ok(a + b))
//!     .object::<Counter, _>("counter", |obj| {
//!         obj.constructor_typed(|_ctx, ()| Ok(Counter::default()))
//!             .method_typed("increment", |_ctx, counter, ()| {
//!                 counter.value += 1;
//!                 Ok(counter.value)
//!             })
//!     })
//!     .build()?;
//! ```

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

use plugbridge_abi::{ConversionError, FromValue, IntoValue, Limits, Value};
use thiserror::Error;

use super::handles::HandleTable;
use super::{
    CallContext, CallError, ConstructorHandler, Dispatcher, FunctionHandler, MethodHandler,
    ObjectSlot,
};
use crate::registry::Registry;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    #[error("function {0} has no implementation")]
    MissingFunction(String),

    #[error("object {0} declares a constructor but none was registered")]
    MissingConstructor(String),

    #[error("method {object}.{method} has no implementation")]
    MissingMethod { object: String, method: String },

    #[error("implementation registered for unknown function {0}")]
    UnknownFunction(String),

    #[error("implementation registered for unknown object {0}")]
    UnknownObject(String),

    #[error("implementation registered for unknown method {object}.{method}")]
    UnknownMethod { object: String, method: String },

    #[error("object {0} declares no constructor but one was registered")]
    UnexpectedConstructor(String),

    #[error("{0} registered twice")]
    Duplicate(String),
}

/// Positional call arguments converted into a Rust tuple.
pub trait FromArgs: Sized {
    fn from_args(args: Vec<Value>) -> Result<Self, ConversionError>;
}

impl FromArgs for () {
    fn from_args(args: Vec<Value>) -> Result<Self, ConversionError> {
        match args.len() {
            0 => Ok(()),
            n => Err(ConversionError::TypeMismatch {
                expected: "0 arguments".into(),
                got: format!("{n} arguments"),
            }),
        }
    }
}

impl FromArgs for Vec<Value> {
    fn from_args(args: Vec<Value>) -> Result<Self, ConversionError> {
        Ok(args)
    }
}

macro_rules! tuple_args {
    ($($name:ident $position:literal),+) => {
        impl<$($name: FromValue),+> FromArgs for ($($name,)+) {
            fn from_args(args: Vec<Value>) -> Result<Self, ConversionError> {
                let mut args = args.into_iter();
                Ok(($(
                    $name::from_value(args.next().ok_or_else(|| {
                        ConversionError::MissingField(format!("argument {}", $position))
                    })?)?,
                )+))
            }
        }
    };
}

tuple_args!(A 0);
tuple_args!(A 0, B 1);
tuple_args!(A 0, B 1, C 2);
tuple_args!(A 0, B 1, C 2, D 3);
tuple_args!(A 0, B 1, C 2, D 3, E 4);
tuple_args!(A 0, B 1, C 2, D 3, E 4, F 5);
tuple_args!(A 0, B 1, C 2, D 3, E 4, F 5, G 6);
tuple_args!(A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Registered implementation of one object type, before binding.
struct ObjectImpl {
    constructor: Option<ConstructorHandler>,
    methods: BTreeMap<String, MethodHandler>,
    duplicates: Vec<String>,
}

pub struct DispatcherBuilder {
    registry: Arc<Registry>,
    functions: BTreeMap<String, FunctionHandler>,
    objects: BTreeMap<String, ObjectImpl>,
    duplicates: Vec<String>,
    limits: Limits,
}

impl DispatcherBuilder {
    pub fn new(registry: impl Into<Arc<Registry>>) -> Self {
        Self {
            registry: registry.into(),
            functions: BTreeMap::new(),
            objects: BTreeMap::new(),
            duplicates: Vec::new(),
            limits: Limits::default(),
        }
    }

    /// Decode limits applied to call arguments.
    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Register a function over raw positional values.
    pub fn function<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, Vec<Value>) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        if self
            .functions
            .insert(name.to_string(), Arc::new(handler))
            .is_some()
        {
            self.duplicates.push(format!("function {name}"));
        }
        self
    }

    /// Register a function whose arguments convert into a tuple.
    ///
    /// Arguments have already been checked against the schema when this runs;
    /// a conversion failure means the tuple does not match the declaration
    /// and is reported as an internal error.
    pub fn function_typed<A, R, F>(self, name: &str, handler: F) -> Self
    where
        A: FromArgs + 'static,
        R: IntoValue + 'static,
        F: Fn(&CallContext<'_>, A) -> Result<R, CallError> + Send + Sync + 'static,
    {
        self.function(name, move |ctx, args| {
            let args = A::from_args(args)?;
            handler(ctx, args).map(IntoValue::into_value)
        })
    }

    /// Register an object type implemented by `T`.
    pub fn object<T, F>(mut self, name: &str, configure: F) -> Self
    where
        T: Any + Send + 'static,
        F: FnOnce(ObjectBuilder<T>) -> ObjectBuilder<T>,
    {
        let built = configure(ObjectBuilder::new(name));
        let object = ObjectImpl {
            constructor: built.constructor,
            methods: built.methods,
            duplicates: built.duplicates,
        };
        if self.objects.insert(name.to_string(), object).is_some() {
            self.duplicates.push(format!("object {name}"));
        }
        self
    }

    /// Bind every registration to its dispatch index.
    pub fn build(mut self) -> Result<Dispatcher, BindError> {
        if let Some(duplicate) = self.duplicates.first() {
            return Err(BindError::Duplicate(duplicate.clone()));
        }

        let registry = Arc::clone(&self.registry);

        let known: BTreeSet<&str> = registry.functions().map(|f| f.name.as_str()).collect();
        if let Some(unknown) = self.functions.keys().find(|name| !known.contains(name.as_str())) {
            return Err(BindError::UnknownFunction(unknown.clone()));
        }
        let known: BTreeSet<&str> = registry.objects().map(|o| o.name.as_str()).collect();
        if let Some(unknown) = self.objects.keys().find(|name| !known.contains(name.as_str())) {
            return Err(BindError::UnknownObject(unknown.clone()));
        }

        let mut functions = vec![None; registry.function_table_len()];
        for func in registry.functions() {
            let handler = self
                .functions
                .remove(&func.name)
                .ok_or_else(|| BindError::MissingFunction(func.name.clone()))?;
            let index = func.index.unwrap_or(0) as usize;
            functions[index] = Some(handler);
        }

        let mut objects: Vec<Option<ObjectSlot>> =
            (0..registry.object_table_len()).map(|_| None).collect();
        for def in registry.objects() {
            let object_index = def.index.unwrap_or(0);
            let mut implementation = match self.objects.remove(&def.name) {
                Some(implementation) => implementation,
                None if def.constructor.is_some() => {
                    return Err(BindError::MissingConstructor(def.name.clone()))
                }
                None => ObjectImpl {
                    constructor: None,
                    methods: BTreeMap::new(),
                    duplicates: Vec::new(),
                },
            };
            if let Some(method) = implementation.duplicates.first() {
                return Err(BindError::Duplicate(format!("method {}.{method}", def.name)));
            }

            let constructor = match (&def.constructor, implementation.constructor.take()) {
                (Some(_), Some(handler)) => Some(handler),
                (Some(_), None) => return Err(BindError::MissingConstructor(def.name.clone())),
                (None, Some(_)) => return Err(BindError::UnexpectedConstructor(def.name.clone())),
                (None, None) => None,
            };

            let declared: BTreeSet<&str> = def.methods.iter().map(|m| m.name.as_str()).collect();
            if let Some(unknown) = implementation
                .methods
                .keys()
                .find(|name| !declared.contains(name.as_str()))
            {
                return Err(BindError::UnknownMethod {
                    object: def.name.clone(),
                    method: unknown.clone(),
                });
            }

            let mut methods = vec![None; registry.method_table_len(object_index)];
            for method in registry.methods(object_index) {
                let handler = implementation.methods.remove(&method.name).ok_or_else(|| {
                    BindError::MissingMethod {
                        object: def.name.clone(),
                        method: method.name.clone(),
                    }
                })?;
                methods[method.index.unwrap_or(0) as usize] = Some(handler);
            }

            objects[object_index as usize] = Some(ObjectSlot {
                constructor,
                methods,
            });
        }

        tracing::debug!(
            schema = registry.name(),
            hash = %registry.hash().short(),
            functions = registry.functions().count(),
            objects = registry.objects().count(),
            "dispatcher bound"
        );

        Ok(Dispatcher {
            registry,
            functions,
            objects,
            handles: HandleTable::new(),
            limits: self.limits,
        })
    }
}

/// Registration of one object type's constructor and methods.
pub struct ObjectBuilder<T> {
    name: String,
    constructor: Option<ConstructorHandler>,
    methods: BTreeMap<String, MethodHandler>,
    duplicates: Vec<String>,
    _instance: PhantomData<fn() -> T>,
}

impl<T: Any + Send + 'static> ObjectBuilder<T> {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            constructor: None,
            methods: BTreeMap::new(),
            duplicates: Vec::new(),
            _instance: PhantomData,
        }
    }

    pub fn constructor<F>(mut self, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, Vec<Value>) -> Result<T, CallError> + Send + Sync + 'static,
    {
        if self.constructor.is_some() {
            self.duplicates.push("constructor".to_string());
        }
        self.constructor = Some(Arc::new(move |ctx: &CallContext<'_>, args: Vec<Value>| {
            handler(ctx, args).map(|instance| Box::new(instance) as Box<dyn Any + Send>)
        }));
        self
    }

    pub fn constructor_typed<A, F>(self, handler: F) -> Self
    where
        A: FromArgs + 'static,
        F: Fn(&CallContext<'_>, A) -> Result<T, CallError> + Send + Sync + 'static,
    {
        self.constructor(move |ctx, args| handler(ctx, A::from_args(args)?))
    }

    pub fn method<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&CallContext<'_>, &mut T, Vec<Value>) -> Result<Value, CallError>
            + Send
            + Sync
            + 'static,
    {
        let object = self.name.clone();
        let erased: MethodHandler = Arc::new(
            move |ctx: &CallContext<'_>, instance: &mut (dyn Any + Send), args: Vec<Value>| {
                let this = instance.downcast_mut::<T>().ok_or_else(|| {
                    CallError::internal(format!("instance behind {object} has an unexpected type"))
                })?;
                handler(ctx, this, args)
            },
        );
        if self.methods.insert(name.to_string(), erased).is_some() {
            self.duplicates.push(name.to_string());
        }
        self
    }

    pub fn method_typed<A, R, F>(self, name: &str, handler: F) -> Self
    where
        A: FromArgs + 'static,
        R: IntoValue + 'static,
        F: Fn(&CallContext<'_>, &mut T, A) -> Result<R, CallError> + Send + Sync + 'static,
    {
        self.method(name, move |ctx, this, args| {
            let args = A::from_args(args)?;
            handler(ctx, this, args).map(IntoValue::into_value)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_schema;

    fn registry() -> Registry {
        Registry::new(
            parse_schema(
                r#"
                schema demo version 1 {
                    add: func(a: s32, b: s32) -> s32
                    object counter {
                        constructor()
                        increment: func() -> s32
                    }
                }
                "#,
            )
            .unwrap(),
        )
        .unwrap()
    }

    #[derive(Default)]
    struct Counter(i32);

    fn counter(obj: ObjectBuilder<Counter>) -> ObjectBuilder<Counter> {
        obj.constructor_typed(|_, ()| Ok(Counter::default()))
            .method_typed("increment", |_, c: &mut Counter, ()| {
                c.0 += 1;
                Ok(c.0)
            })
    }

    #[test]
    fn tuple_args_convert_positionally() {
        let (a, b): (i32, String) =
            FromArgs::from_args(vec![Value::S32(1), Value::String("x".into())]).unwrap();
        assert_eq!((a, b.as_str()), (1, "x"));
        assert!(<(i32, i32)>::from_args(vec![Value::S32(1)]).is_err());
    }

    #[test]
    fn missing_function_is_a_bind_error() {
        let err = DispatcherBuilder::new(registry())
            .object::<Counter, _>("counter", counter)
            .build()
            .unwrap_err();
        assert_eq!(err, BindError::MissingFunction("add".into()));
    }

    #[test]
    fn extra_implementations_are_bind_errors() {
        let err = DispatcherBuilder::new(registry())
            .function_typed("add", |_, (a, b): (i32, i32)| Ok(a + b))
            .function_typed("sub", |_, (a, b): (i32, i32)| Ok(a - b))
            .object::<Counter, _>("counter", counter)
            .build()
            .unwrap_err();
        assert_eq!(err, BindError::UnknownFunction("sub".into()));

        let err = DispatcherBuilder::new(registry())
            .function_typed("add", |_, (a, b): (i32, i32)| Ok(a + b))
            .object::<Counter, _>("counter", |obj| {
                counter(obj).method_typed("reset", |_, c: &mut Counter, ()| {
                    c.0 = 0;
                    Ok(())
                })
            })
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            BindError::UnknownMethod {
                object: "counter".into(),
                method: "reset".into()
            }
        );
    }

    #[test]
    fn missing_method_and_constructor() {
        let err = DispatcherBuilder::new(registry())
            .function_typed("add", |_, (a, b): (i32, i32)| Ok(a + b))
            .object::<Counter, _>("counter", |obj| obj.constructor_typed(|_, ()| Ok(Counter(0))))
            .build()
            .unwrap_err();
        assert!(matches!(err, BindError::MissingMethod { .. }));

        let err = DispatcherBuilder::new(registry())
            .function_typed("add", |_, (a, b): (i32, i32)| Ok(a + b))
            .object::<Counter, _>("counter", |obj| {
                obj.method_typed("increment", |_, c: &mut Counter, ()| Ok(c.0))
            })
            .build()
            .unwrap_err();
        assert_eq!(err, BindError::MissingConstructor("counter".into()));
    }

    #[test]
    fn complete_registration_builds() {
        let dispatcher = DispatcherBuilder::new(registry())
            .function_typed("add", |_, (a, b): (i32, i32)| Ok(a + b))
            .object::<Counter, _>("counter", counter)
            .build()
            .expect("bound");
        assert_eq!(dispatcher.registry().name(), "demo");
        assert!(dispatcher.handles().is_empty());
    }
}
