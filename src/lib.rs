//! Plugbridge: typed calls between a host UI and a native core
//!
//! A schema describes what the native core exports. From it the bridge
//! generates per-platform bindings, dispatches encoded calls into Rust
//! implementations and gives host code typed proxies over a transport.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────── host ────────────┐        ┌──────── native core ────────┐
//! │                              │        │                             │
//! │  proxy      - Client,        │ frames │  dispatch  - Dispatcher,    │
//! │               ObjectProxy    │ ─────► │              HandleTable    │
//! │  transport  - in-process,    │ ◄───── │  transport - serve          │
//! │               channel        │        │                             │
//! └──────────────────────────────┘        └─────────────────────────────┘
//!            ▲                                          ▲
//!            └────── codegen ◄── registry ◄── parser ───┘
//! ```
//!
//! ## Schema format
//!
//! ```text
//! schema ledger version 1 {
//!     record posting { account: string, amount: s64 }
//!     enum ledger-error { not-found(string), unbalanced }
//!     open: func(name: string) -> ledger throws ledger-error
//!     object ledger {
//!         constructor(name: string)
//!         post: func(postings: list<posting>) throws ledger-error
//!     }
//! }
//! ```

pub use plugbridge_abi as abi;

pub mod codegen;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod parser;
pub mod proxy;
pub mod registry;
pub mod transport;
pub mod types;

pub use abi::{CallEnvelope, CallTarget, ErrorKind, ResponseEnvelope, Value};
pub use codegen::{generate, Bindings, GenerateError, Target};
pub use config::BridgeConfig;
pub use dispatch::{CallContext, CallError, Dispatcher, DispatcherBuilder};
pub use error::BridgeError;
pub use parser::{load_schema, parse_schema, ParseError};
pub use proxy::{Client, ObjectProxy};
pub use registry::{Registry, SchemaError};
pub use transport::{ChannelTransport, InProcessTransport, Transport, TransportError};
pub use types::Schema;
