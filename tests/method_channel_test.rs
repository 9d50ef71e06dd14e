use std::rc::Rc;

use mercury_bridge::{BridgeError, HostError, MercuryBridge, RecordingHost, METHOD_CHANNEL_MODULE};
use serde_json::{json, Value};

#[tokio::test]
async fn concurrent_calls_settle_independently() {
    let host = Rc::new(RecordingHost::new());
    let bridge = MercuryBridge::new(host.clone());
    let channel = bridge.method_channel();

    let first = channel.invoke_method("first", vec![json!(1)]).expect("first");
    let second = channel.invoke_method("second", vec![json!(2)]).expect("second");

    // Answer out of order.
    assert!(host.complete(1, Ok(json!("two"))));
    assert!(host.complete(0, Err(HostError::new("nope").with_code("E1"))));

    assert_eq!(second.await.expect("second result"), json!("two"));
    match first.await {
        Err(BridgeError::Host(error)) => {
            assert_eq!(error.message, "nope");
            assert_eq!(error.code.as_deref(), Some("E1"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn invoke_method_payload_reaches_host() {
    let host = Rc::new(RecordingHost::new());
    let bridge = MercuryBridge::new(host.clone());

    let pending = bridge
        .method_channel()
        .invoke_method("share", vec![json!("text"), json!({ "url": "https://openwebf.com" })])
        .expect("invoke");

    let calls = host.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].module, METHOD_CHANNEL_MODULE);
    assert_eq!(calls[0].method, "invokeMethod");
    assert_eq!(
        calls[0].params,
        Some(json!(["share", ["text", { "url": "https://openwebf.com" }]]))
    );

    host.complete(0, Ok(Value::Null));
    assert_eq!(pending.await.expect("result"), Value::Null);
}

#[tokio::test]
async fn dropped_completion_fails_the_call() {
    let host = Rc::new(RecordingHost::new());
    let bridge = MercuryBridge::new(host.clone());

    let pending = bridge.method_channel().invoke_method("lost", vec![]).expect("invoke");
    host.drop_completions();

    assert!(matches!(
        pending.await,
        Err(BridgeError::CompletionDropped { .. })
    ));
}

#[test]
fn host_calls_reach_registered_handler() {
    let host = Rc::new(RecordingHost::new());
    let bridge = MercuryBridge::new(host);
    bridge
        .method_channel()
        .add_method_call_handler("ping", |args| json!(args[0].as_i64().unwrap_or(0) + 1))
        .expect("handler");

    let reply = bridge.handle_module_event(METHOD_CHANNEL_MODULE, None, &json!(["ping", [41]]));
    assert_eq!(reply, json!(42));

    let missing = bridge.handle_module_event(METHOD_CHANNEL_MODULE, None, &json!(["pong", []]));
    assert_eq!(missing, Value::Null);
}
