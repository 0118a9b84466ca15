//! End-to-end calls through the in-process transport.

mod common;

use std::sync::Arc;

use plugbridge::abi::{decode, encode, CallEnvelope, CallTarget, ErrorKind, IntoValue, Outcome, Value};
use plugbridge::config::BridgeConfig;
use plugbridge::dispatch::Dispatcher;
use plugbridge::error::BridgeError;
use plugbridge::proxy::Client;
use plugbridge::transport::InProcessTransport;

use common::{
    demo_dispatcher, ledger_dispatcher, Account, Posting, Transaction, ASSET, EXPENSE, REVENUE,
};

fn client(dispatcher: Dispatcher) -> (Client, Arc<Dispatcher>) {
    let dispatcher = Arc::new(dispatcher);
    let transport = Arc::new(InProcessTransport::new(Arc::clone(&dispatcher)));
    let client = Client::new(dispatcher.registry_arc(), transport, &BridgeConfig::default());
    (client, dispatcher)
}

#[tokio::test]
async fn add_returns_the_sum() {
    let (client, _) = client(demo_dispatcher());
    let sum = client.call("add", vec![Value::S32(2), Value::S32(3)]).await.unwrap();
    assert_eq!(sum, Value::S32(5));
}

#[tokio::test]
async fn counter_keeps_state_until_released() {
    let (client, dispatcher) = client(demo_dispatcher());
    let counter = client.construct("counter", vec![]).await.unwrap();
    let handle = counter.handle();

    assert_eq!(counter.call("increment", vec![]).await.unwrap(), Value::S32(1));
    assert_eq!(counter.call("increment", vec![]).await.unwrap(), Value::S32(2));

    counter.release().await.unwrap();
    assert!(dispatcher.handles().is_empty());

    let stale = client.adopt("counter", handle).unwrap();
    let err = stale.call("increment", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::InvalidHandle));
    // the stale proxy's own release fails quietly on drop
    drop(stale);
}

#[tokio::test]
async fn bad_arguments_never_reach_the_implementation() {
    let (client, _) = client(demo_dispatcher());
    let counter = client.construct("counter", vec![]).await.unwrap();

    let err = counter
        .call("add", vec![Value::String("five".into())])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::ArgumentDecode));
    assert!(err.to_string().contains("argument 0 (n: s32)"), "{err}");

    let err = counter.call("add", vec![]).await.unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::ArgumentDecode));

    assert_eq!(counter.call("increment", vec![]).await.unwrap(), Value::S32(1));
}

#[tokio::test]
async fn dropped_proxies_release_their_handle() {
    let (client, dispatcher) = client(demo_dispatcher());
    let counter = client.construct("counter", vec![]).await.unwrap();
    assert_eq!(dispatcher.handles().len(), 1);
    drop(counter);
    assert!(dispatcher.handles().is_empty());
}

#[tokio::test]
async fn unknown_names_fail_on_the_host() {
    let (client, _) = client(demo_dispatcher());
    assert!(matches!(
        client.call("sub", vec![]).await,
        Err(BridgeError::UnknownFunction(name)) if name == "sub"
    ));
    assert!(matches!(
        client.construct("gauge", vec![]).await,
        Err(BridgeError::UnknownObject(_))
    ));
    let counter = client.construct("counter", vec![]).await.unwrap();
    assert!(matches!(
        counter.call("reset", vec![]).await,
        Err(BridgeError::UnknownMethod { .. })
    ));
}

#[tokio::test]
async fn unbalanced_transaction_is_a_domain_error() {
    let (client, _) = client(ledger_dispatcher());
    let ledger = client
        .construct("ledger", vec![Value::from("household")])
        .await
        .unwrap();

    for account in [
        Account::new("cash", "Cash", ASSET),
        Account::new("salary", "Salary", REVENUE),
        Account::new("food", "Groceries", EXPENSE),
    ] {
        ledger.call("add-account", vec![account.into_value()]).await.unwrap();
    }

    let payday = Transaction::new(
        "t1",
        "October salary",
        vec![Posting::new("cash", 250_000), Posting::new("salary", -250_000)],
    );
    ledger.call("post", vec![payday.into_value()]).await.unwrap();

    let lopsided = Transaction::new(
        "t2",
        "Groceries",
        vec![Posting::new("food", 4_500), Posting::new("cash", -4_000)],
    );
    let err = ledger.call("post", vec![lopsided.into_value()]).await.unwrap_err();
    assert!(err.is_domain("unbalanced"), "{err}");
    assert_eq!(err.payload(), Some(&common::unbalanced(500)));
    assert!(err.to_string().contains("t2 postings sum to 500"), "{err}");

    // rejected transactions leave balances untouched
    let cash = ledger.call("balance", vec![Value::from("cash")]).await.unwrap();
    assert_eq!(cash, Value::S64(250_000));

    let err = ledger.call("balance", vec![Value::from("bank")]).await.unwrap_err();
    assert!(err.is_domain("not-found"));
    assert_eq!(err.payload(), Some(&common::not_found("bank")));

    let err = ledger
        .call("add-account", vec![Account::new("cash", "Cash", ASSET).into_value()])
        .await
        .unwrap_err();
    assert!(err.is_domain("duplicate-account"));
}

#[tokio::test]
async fn objects_returned_by_methods_get_fresh_handles() {
    let (client, dispatcher) = client(ledger_dispatcher());
    let ledger = client.construct("ledger", vec![Value::from("main")]).await.unwrap();
    ledger
        .call("add-account", vec![Account::new("cash", "Cash", ASSET).into_value()])
        .await
        .unwrap();

    let forked = ledger.call("fork", vec![]).await.unwrap();
    let fork = client.adopt("ledger", forked.as_handle().unwrap()).unwrap();
    assert_ne!(fork.handle(), ledger.handle());
    assert_eq!(dispatcher.handles().len(), 2);

    fork.call("add-account", vec![Account::new("bank", "Bank", ASSET).into_value()])
        .await
        .unwrap();
    let accounts = |v: Value| match v {
        Value::List(items) => items.len(),
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(accounts(ledger.call("accounts", vec![]).await.unwrap()), 1);
    assert_eq!(accounts(fork.call("accounts", vec![]).await.unwrap()), 2);
}

#[tokio::test]
async fn enum_arguments_are_checked_against_their_cases() {
    let (client, _) = client(ledger_dispatcher());
    let debit = client.call("natural-debit", vec![Value::case(EXPENSE)]).await.unwrap();
    assert_eq!(debit, Value::Bool(true));

    let err = client.call("natural-debit", vec![Value::case(9)]).await.unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::ArgumentDecode));
}

#[test]
fn byte_entry_matches_envelope_dispatch() {
    let dispatcher = demo_dispatcher();
    let mut args = encode(&Value::S32(20)).unwrap();
    args.extend(encode(&Value::S32(22)).unwrap());
    let call = CallEnvelope::new(11, CallTarget::Function { index: 0 }, args);

    let reply = dispatcher.handle_bytes(&call.to_bytes().unwrap());
    let response = plugbridge::abi::ResponseEnvelope::from_bytes(&reply).unwrap();
    assert_eq!(response, dispatcher.dispatch(call));
    match response.outcome {
        Outcome::Success(bytes) => assert_eq!(decode(&bytes).unwrap(), Value::S32(42)),
        Outcome::Failure(f) => panic!("{f:?}"),
    }
}
