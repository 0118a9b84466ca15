//! Asynchronous channel transport: routing, closing, timeouts and handshakes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use plugbridge::abi::{
    decode, encode, CallEnvelope, CallTarget, ErrorKind, Frame, Outcome, ResponseEnvelope, Value,
};
use plugbridge::config::BridgeConfig;
use plugbridge::error::BridgeError;
use plugbridge::proxy::Client;
use plugbridge::transport::{serve, ChannelTransport, Transport, TransportError};

use common::{
    connect, demo_dispatcher, demo_registry, eventually, ledger_dispatcher, recv_frame, send_frame,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_get_their_own_responses() {
    let conn = connect(Arc::new(demo_dispatcher()), BridgeConfig::default()).await;

    // later calls finish first, so responses arrive out of order
    let calls: Vec<_> = (0..8u32)
        .map(|i| {
            let client = conn.client.clone();
            let ms = 80 - i * 10;
            tokio::spawn(async move { (ms, client.call("slow", vec![Value::U32(ms)]).await) })
        })
        .collect();
    let sums: Vec<_> = (0..8i32)
        .map(|i| {
            let client = conn.client.clone();
            tokio::spawn(async move { (i, client.call("add", vec![Value::S32(i), Value::S32(i)]).await) })
        })
        .collect();

    for call in calls {
        let (ms, result) = call.await.unwrap();
        assert_eq!(result.unwrap(), Value::U32(ms));
    }
    for sum in sums {
        let (i, result) = sum.await.unwrap();
        assert_eq!(result.unwrap(), Value::S32(i * 2));
    }
    assert_eq!(conn.transport.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_calls_drop_their_late_response() {
    let config = BridgeConfig::default().with_call_timeout(Some(Duration::from_millis(50)));
    let conn = connect(Arc::new(demo_dispatcher()), config).await;

    let err = conn.client.call("slow", vec![Value::U32(300)]).await.unwrap_err();
    assert!(matches!(err, BridgeError::Timeout { .. }), "{err}");
    assert_eq!(conn.transport.in_flight(), 0);

    // the slow call still completes on the core; its response is discarded
    tokio::time::sleep(Duration::from_millis(400)).await;
    let sum = conn.client.call("add", vec![Value::S32(1), Value::S32(2)]).await.unwrap();
    assert_eq!(sum, Value::S32(3));
    assert!(!conn.transport.is_closed());
}

#[tokio::test]
async fn closing_the_channel_fails_every_pending_call() {
    let registry = Arc::new(demo_registry());
    let config = BridgeConfig::default();
    let (host, core) = tokio::io::duplex(64 * 1024);

    // a core that accepts calls and then vanishes without answering
    let hello = Frame::Hello {
        schema: registry.name().to_string(),
        version: registry.version(),
        hash: registry.hash(),
    };
    let (mut core_reader, mut core_writer) = tokio::io::split(core);
    let core_task = tokio::spawn(async move {
        assert!(matches!(recv_frame(&mut core_reader).await, Frame::Hello { .. }));
        send_frame(&mut core_writer, &hello).await;
        for _ in 0..2 {
            assert!(matches!(recv_frame(&mut core_reader).await, Frame::Call(_)));
        }
    });

    let (host_reader, host_writer) = tokio::io::split(host);
    let transport = Arc::new(
        ChannelTransport::connect(&registry, host_reader, host_writer, &config)
            .await
            .unwrap(),
    );
    let client = Client::new(Arc::clone(&registry), transport.clone(), &config);

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.call("add", vec![Value::S32(1), Value::S32(1)]).await }
    });
    let second = tokio::spawn({
        let client = client.clone();
        async move { client.call("slow", vec![Value::U32(1)]).await }
    });

    core_task.await.unwrap();

    for pending in [first, second] {
        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_closed(), "{err}");
    }
    assert!(transport.is_closed());

    let err = client.call("add", vec![Value::S32(1), Value::S32(1)]).await.unwrap_err();
    assert!(err.is_closed(), "{err}");
}

#[tokio::test]
async fn responses_for_unknown_ids_are_ignored() {
    let registry = Arc::new(demo_registry());
    let config = BridgeConfig::default();
    let (host, core) = tokio::io::duplex(64 * 1024);

    let hello = Frame::Hello {
        schema: registry.name().to_string(),
        version: registry.version(),
        hash: registry.hash(),
    };
    let (mut core_reader, mut core_writer) = tokio::io::split(core);
    let core_task = tokio::spawn(async move {
        recv_frame(&mut core_reader).await;
        send_frame(&mut core_writer, &hello).await;
        let call = match recv_frame(&mut core_reader).await {
            Frame::Call(call) => call,
            other => panic!("unexpected {other:?}"),
        };
        // a stray response first, then the real one
        let stray = ResponseEnvelope::success(call.call_id + 1000, Vec::new());
        send_frame(&mut core_writer, &Frame::Response(stray)).await;
        let real = ResponseEnvelope::success(
            call.call_id,
            plugbridge::abi::encode(&Value::S32(7)).unwrap(),
        );
        send_frame(&mut core_writer, &Frame::Response(real)).await;
        // keep the stream open until the host is done
        recv_frame(&mut core_reader).await
    });

    let (host_reader, host_writer) = tokio::io::split(host);
    let transport = Arc::new(
        ChannelTransport::connect(&registry, host_reader, host_writer, &config)
            .await
            .unwrap(),
    );
    let client = Client::new(Arc::clone(&registry), transport.clone(), &config);

    let value = client.call("add", vec![Value::S32(3), Value::S32(4)]).await.unwrap();
    assert_eq!(value, Value::S32(7));
    assert!(!transport.is_closed());

    transport.close();
    assert_eq!(core_task.await.unwrap(), Frame::Goodbye);
}

#[tokio::test]
async fn mismatched_interfaces_refuse_to_connect() {
    let config = BridgeConfig::default();
    let (host, core) = tokio::io::duplex(64 * 1024);

    let (core_reader, core_writer) = tokio::io::split(core);
    let server_config = config.clone();
    let server = tokio::spawn(async move {
        serve(Arc::new(ledger_dispatcher()), core_reader, core_writer, &server_config).await
    });

    let (host_reader, host_writer) = tokio::io::split(host);
    let err = ChannelTransport::connect(&demo_registry(), host_reader, host_writer, &config)
        .await
        .unwrap_err();
    match err {
        TransportError::SchemaMismatch { local, peer, .. } => {
            assert_eq!(local, "demo@1");
            assert_eq!(peer, "ledger@1");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        server.await.unwrap(),
        Err(TransportError::SchemaMismatch { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ledger_over_a_channel() {
    let dispatcher = Arc::new(ledger_dispatcher());
    let conn = connect(Arc::clone(&dispatcher), BridgeConfig::default()).await;

    let ledger = conn
        .client
        .construct("ledger", vec![Value::from("shop")])
        .await
        .unwrap();
    assert_eq!(ledger.call("name", vec![]).await.unwrap(), Value::from("shop"));

    let lopsided = plugbridge::abi::IntoValue::into_value(common::Transaction::new(
        "t1",
        "till",
        vec![common::Posting::new("till", 100)],
    ));
    let err = ledger.call("post", vec![lopsided]).await.unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::Domain("unbalanced".into())));

    ledger.release().await.unwrap();
    assert!(dispatcher.handles().is_empty());

    // a dropped proxy releases in the background
    let orphan = conn
        .client
        .construct("ledger", vec![Value::from("tmp")])
        .await
        .unwrap();
    assert_eq!(dispatcher.handles().len(), 1);
    drop(orphan);
    assert!(eventually(|| dispatcher.handles().is_empty()).await);

    conn.transport.close();
    drop(conn.client);
    assert!(conn.server.await.unwrap().is_ok());
}

#[tokio::test]
async fn cancelling_an_unknown_call_is_harmless() {
    let conn = connect(Arc::new(demo_dispatcher()), BridgeConfig::default()).await;
    conn.transport.cancel(12345);
    conn.transport.abandon(12345);
    let sum = conn.client.call("add", vec![Value::S32(2), Value::S32(3)]).await.unwrap();
    assert_eq!(sum, Value::S32(5));
}

fn small_frames() -> BridgeConfig {
    BridgeConfig {
        max_frame_size: 512,
        ..BridgeConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn an_oversized_call_fails_alone() {
    let conn = connect(Arc::new(demo_dispatcher()), small_frames()).await;

    let slow = tokio::spawn({
        let client = conn.client.clone();
        async move { client.call("slow", vec![Value::U32(200)]).await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let err = conn
        .client
        .call("add", vec![Value::String("x".repeat(4096)), Value::S32(1)])
        .await
        .unwrap_err();
    assert!(
        matches!(err, BridgeError::Transport(TransportError::FrameTooLarge { max: 512, .. })),
        "{err}"
    );
    assert!(!err.is_closed());

    assert_eq!(slow.await.unwrap().unwrap(), Value::U32(200));
    let sum = conn.client.call("add", vec![Value::S32(1), Value::S32(2)]).await.unwrap();
    assert_eq!(sum, Value::S32(3));
    assert!(!conn.transport.is_closed());
    assert_eq!(conn.transport.in_flight(), 0);
}

#[tokio::test]
async fn an_oversized_response_becomes_an_internal_failure() {
    let conn = connect(Arc::new(demo_dispatcher()), small_frames()).await;

    let err = conn
        .client
        .call("repeat", vec![Value::from("ab"), Value::U32(1000)])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Some(&ErrorKind::Internal));
    assert!(err.to_string().contains("exceeds"), "{err}");

    let short = conn
        .client
        .call("repeat", vec![Value::from("ab"), Value::U32(3)])
        .await
        .unwrap();
    assert_eq!(short, Value::from("ababab"));
    assert!(!conn.transport.is_closed());
}

#[tokio::test]
async fn a_call_cancelled_before_it_starts_reports_cancelled() {
    let dispatcher = Arc::new(demo_dispatcher());
    let registry = dispatcher.registry_arc();
    let config = BridgeConfig::default();
    let (host, core) = tokio::io::duplex(64 * 1024);

    let (core_reader, core_writer) = tokio::io::split(core);
    let server_config = config.clone();
    let server = tokio::spawn(async move {
        serve(dispatcher, core_reader, core_writer, &server_config).await
    });

    // a host that speaks the frames itself
    let (mut reader, mut writer) = tokio::io::split(host);
    let hello = Frame::Hello {
        schema: registry.name().to_string(),
        version: registry.version(),
        hash: registry.hash(),
    };
    send_frame(&mut writer, &hello).await;
    assert!(matches!(recv_frame(&mut reader).await, Frame::Hello { .. }));

    // both frames are buffered before the core reads either, so the cancel
    // lands while the call is still queued
    let mut args = encode(&Value::S32(2)).unwrap();
    args.extend(encode(&Value::S32(3)).unwrap());
    let add = CallEnvelope::new(7, CallTarget::Function { index: 0 }, args.clone());
    send_frame(&mut writer, &Frame::Call(add)).await;
    send_frame(&mut writer, &Frame::Cancel { call_id: 7 }).await;

    match recv_frame(&mut reader).await {
        Frame::Response(response) => {
            assert_eq!(response.call_id, 7);
            match response.outcome {
                Outcome::Failure(failure) => assert_eq!(failure.kind, ErrorKind::Cancelled),
                Outcome::Success(_) => panic!("cancelled call ran"),
            }
        }
        other => panic!("unexpected {other:?}"),
    }

    // the same call without a cancel still runs
    send_frame(&mut writer, &Frame::Call(CallEnvelope::new(8, CallTarget::Function { index: 0 }, args))).await;
    match recv_frame(&mut reader).await {
        Frame::Response(ResponseEnvelope {
            call_id: 8,
            outcome: Outcome::Success(bytes),
        }) => assert_eq!(decode(&bytes).unwrap(), Value::S32(5)),
        other => panic!("unexpected {other:?}"),
    }

    send_frame(&mut writer, &Frame::Goodbye).await;
    assert_eq!(recv_frame(&mut reader).await, Frame::Goodbye);
    assert!(server.await.unwrap().is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clients_sharing_a_transport_never_collide() {
    let conn = connect(Arc::new(demo_dispatcher()), BridgeConfig::default()).await;
    let other = Client::new(
        Arc::new(demo_registry()),
        conn.transport.clone(),
        &BridgeConfig::default(),
    );

    let (first, second) = tokio::join!(
        conn.client.call("slow", vec![Value::U32(50)]),
        other.call("slow", vec![Value::U32(60)]),
    );
    assert_eq!(first.unwrap(), Value::U32(50));
    assert_eq!(second.unwrap(), Value::U32(60));
}
