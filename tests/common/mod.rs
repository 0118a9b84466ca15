//! Shared fixtures: the ledger core, a small demo core and channel plumbing.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use plugbridge::abi::{ConversionError, Frame, FromValue, IntoValue, Value};
use plugbridge::config::BridgeConfig;
use plugbridge::dispatch::{CallError, Dispatcher, DispatcherBuilder};
use plugbridge::parser::{load_schema, parse_schema};
use plugbridge::proxy::Client;
use plugbridge::registry::Registry;
use plugbridge::transport::{serve, ChannelTransport, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

pub const DEMO_SCHEMA: &str = r#"
    schema demo version 1 {
        add@0: func(a: s32, b: s32) -> s32
        slow@1: func(ms: u32) -> u32
        repeat@2: func(s: string, n: u32) -> string
        object counter@0 {
            constructor()
            increment@0: func() -> s32
            add@1: func(n: s32) -> s32
        }
    }
"#;

pub fn ledger_registry() -> Registry {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/schemas/ledger.bridge");
    Registry::new(load_schema(path).expect("ledger schema parses")).expect("ledger schema is valid")
}

pub fn demo_registry() -> Registry {
    Registry::new(parse_schema(DEMO_SCHEMA).expect("demo schema parses")).expect("demo schema is valid")
}

// ============================================================================
// Demo core
// ============================================================================

#[derive(Default)]
pub struct Counter {
    value: i32,
}

pub fn demo_dispatcher() -> Dispatcher {
    DispatcherBuilder::new(demo_registry())
        .function_typed("add", |_, (a, b): (i32, i32)| Ok(a.wrapping_add(b)))
        .function_typed("slow", |_, (ms,): (u32,)| {
            std::thread::sleep(Duration::from_millis(u64::from(ms)));
            Ok(ms)
        })
        .function_typed("repeat", |_, (s, n): (String, u32)| Ok(s.repeat(n as usize)))
        .object::<Counter, _>("counter", |obj| {
            obj.constructor_typed(|_, ()| Ok(Counter::default()))
                .method_typed("increment", |_, c, ()| {
                    c.value += 1;
                    Ok(c.value)
                })
                .method_typed("add", |_, c, (n,): (i32,)| {
                    c.value += n;
                    Ok(c.value)
                })
        })
        .build()
        .expect("demo dispatcher binds")
}

// ============================================================================
// Ledger core
// ============================================================================

pub const ASSET: u32 = 0;
pub const REVENUE: u32 = 3;
pub const EXPENSE: u32 = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub kind: u32,
}

impl Account {
    pub fn new(id: &str, name: &str, kind: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
        }
    }
}

impl IntoValue for Account {
    fn into_value(self) -> Value {
        Value::Record(vec![
            Value::String(self.id),
            Value::String(self.name),
            Value::case(self.kind),
        ])
    }
}

impl FromValue for Account {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        let mut fields = record(value, 3)?.into_iter();
        Ok(Self {
            id: String::from_value(next(&mut fields, "id")?)?,
            name: String::from_value(next(&mut fields, "name")?)?,
            kind: match next(&mut fields, "kind")? {
                Value::Variant { tag, .. } => tag,
                other => return Err(mismatch("account-type", &other)),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    pub account: String,
    pub amount: i64,
}

impl Posting {
    pub fn new(account: &str, amount: i64) -> Self {
        Self {
            account: account.to_string(),
            amount,
        }
    }
}

impl IntoValue for Posting {
    fn into_value(self) -> Value {
        Value::Record(vec![Value::String(self.account), Value::S64(self.amount)])
    }
}

impl FromValue for Posting {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        let mut fields = record(value, 2)?.into_iter();
        Ok(Self {
            account: String::from_value(next(&mut fields, "account")?)?,
            amount: i64::from_value(next(&mut fields, "amount")?)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub date: String,
    pub description: String,
    pub postings: Vec<Posting>,
}

impl Transaction {
    pub fn new(id: &str, description: &str, postings: Vec<Posting>) -> Self {
        Self {
            id: id.to_string(),
            date: "2026-10-16".to_string(),
            description: description.to_string(),
            postings,
        }
    }

    pub fn imbalance(&self) -> i64 {
        self.postings.iter().map(|p| p.amount).sum()
    }
}

impl IntoValue for Transaction {
    fn into_value(self) -> Value {
        Value::Record(vec![
            Value::String(self.id),
            Value::String(self.date),
            Value::String(self.description),
            self.postings.into_value(),
        ])
    }
}

impl FromValue for Transaction {
    fn from_value(value: Value) -> Result<Self, ConversionError> {
        let mut fields = record(value, 4)?.into_iter();
        Ok(Self {
            id: String::from_value(next(&mut fields, "id")?)?,
            date: String::from_value(next(&mut fields, "date")?)?,
            description: String::from_value(next(&mut fields, "description")?)?,
            postings: Vec::from_value(next(&mut fields, "postings")?)?,
        })
    }
}

fn record(value: Value, arity: usize) -> Result<Vec<Value>, ConversionError> {
    match value {
        Value::Record(fields) if fields.len() == arity => Ok(fields),
        other => Err(mismatch(&format!("record of {arity} fields"), &other)),
    }
}

fn next(fields: &mut impl Iterator<Item = Value>, name: &str) -> Result<Value, ConversionError> {
    fields
        .next()
        .ok_or_else(|| ConversionError::MissingField(name.to_string()))
}

fn mismatch(expected: &str, got: &Value) -> ConversionError {
    ConversionError::TypeMismatch {
        expected: expected.to_string(),
        got: got.kind().name().to_string(),
    }
}

/// `ledger-error` case values.
pub fn not_found(id: &str) -> Value {
    Value::case_with(0, id)
}

pub fn unbalanced(sum: i64) -> Value {
    Value::case_with(1, sum)
}

pub fn duplicate_account(id: &str) -> Value {
    Value::case_with(2, id)
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    name: String,
    accounts: BTreeMap<String, Account>,
    balances: BTreeMap<String, i64>,
}

impl Ledger {
    pub fn new(name: String) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    fn add_account(&mut self, account: Account) -> Result<(), CallError> {
        if self.accounts.contains_key(&account.id) {
            return Err(CallError::domain(
                duplicate_account(&account.id),
                format!("account {} already exists", account.id),
            ));
        }
        self.balances.insert(account.id.clone(), 0);
        self.accounts.insert(account.id.clone(), account);
        Ok(())
    }

    fn post(&mut self, tx: Transaction) -> Result<(), CallError> {
        let sum = tx.imbalance();
        if sum != 0 {
            return Err(CallError::domain(
                unbalanced(sum),
                format!("transaction {} postings sum to {sum}", tx.id),
            ));
        }
        // check every account before touching any balance
        if let Some(missing) = tx.postings.iter().find(|p| !self.accounts.contains_key(&p.account)) {
            return Err(CallError::domain(
                not_found(&missing.account),
                format!("no account {}", missing.account),
            ));
        }
        for posting in &tx.postings {
            *self.balances.entry(posting.account.clone()).or_default() += posting.amount;
        }
        Ok(())
    }

    fn balance(&self, id: &str) -> Result<i64, CallError> {
        self.balances
            .get(id)
            .copied()
            .ok_or_else(|| CallError::domain(not_found(id), format!("no account {id}")))
    }
}

pub fn ledger_dispatcher() -> Dispatcher {
    DispatcherBuilder::new(ledger_registry())
        .function_typed("natural-debit", |_, (kind,): (Value,)| match kind {
            Value::Variant { tag, .. } => Ok(tag == ASSET || tag == EXPENSE),
            other => Err(CallError::internal(format!("not an account-type: {other:?}"))),
        })
        .object::<Ledger, _>("ledger", |obj| {
            obj.constructor_typed(|_, (name,): (String,)| Ok(Ledger::new(name)))
                .method_typed("name", |_, ledger, ()| Ok(ledger.name.clone()))
                .method_typed("add-account", |_, ledger, (account,): (Account,)| {
                    ledger.add_account(account)
                })
                .method_typed("post", |_, ledger, (tx,): (Transaction,)| ledger.post(tx))
                .method_typed("balance", |_, ledger, (id,): (String,)| ledger.balance(&id))
                .method_typed("accounts", |_, ledger, ()| {
                    Ok(ledger.accounts.values().cloned().collect::<Vec<_>>())
                })
                .method_typed("fork", |ctx, ledger, ()| ctx.acquire("ledger", ledger.clone()))
        })
        .build()
        .expect("ledger dispatcher binds")
}

// ============================================================================
// Channels
// ============================================================================

pub struct Connection {
    pub client: Client,
    pub transport: Arc<ChannelTransport>,
    pub server: JoinHandle<Result<(), TransportError>>,
}

/// Serve `dispatcher` over an in-memory duplex stream and connect a client.
pub async fn connect(dispatcher: Arc<Dispatcher>, config: BridgeConfig) -> Connection {
    let registry = dispatcher.registry_arc();
    let (host, core) = tokio::io::duplex(64 * 1024);

    let (core_reader, core_writer) = tokio::io::split(core);
    let server_config = config.clone();
    let server = tokio::spawn(async move {
        serve(dispatcher, core_reader, core_writer, &server_config).await
    });

    let (host_reader, host_writer) = tokio::io::split(host);
    let transport = Arc::new(
        ChannelTransport::connect(&registry, host_reader, host_writer, &config)
            .await
            .expect("handshake succeeds"),
    );
    let client = Client::new(registry, transport.clone(), &config);
    Connection {
        client,
        transport,
        server,
    }
}

/// Write one length-prefixed frame, as a hand-rolled peer would.
pub async fn send_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) {
    let body = frame.to_bytes().expect("frame encodes");
    writer.write_all(&(body.len() as u32).to_le_bytes()).await.expect("write");
    writer.write_all(&body).await.expect("write");
    writer.flush().await.expect("flush");
}

pub async fn recv_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Frame {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await.expect("frame length");
    let mut body = vec![0u8; u32::from_le_bytes(len) as usize];
    reader.read_exact(&mut body).await.expect("frame body");
    Frame::from_bytes(&body).expect("frame decodes")
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
