//! End-to-end tests over a wired runtime

use bw_core::{triggers, Context, Trigger};
use bw_pipes::{PipeError, PipeState};
use bw_runtime::{Runtime, RuntimeConfig};
use bw_spec::Specification;
use serde_json::{json, Map};
use std::time::Duration;
use tokio::sync::broadcast;

fn runtime(doc: &str) -> Runtime {
    Runtime::from_json(doc).unwrap()
}

async fn expect_reply(rx: &mut broadcast::Receiver<Trigger>) -> Trigger {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for reply")
        .expect("reply channel closed")
}

#[tokio::test]
async fn ping_replies_pong() {
    let runtime = runtime(
        r#"{
            "commands": [
                {"name": "ping", "actions": [{"action": "reply", "content": "Pong!"}]}
            ]
        }"#,
    );

    let outcomes = runtime
        .invoke_command("ping", Map::new(), Context::with_user("u1"))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
    assert_eq!(outcomes[0].data.as_ref().unwrap()["content"], "Pong!");
}

#[tokio::test]
async fn cooldown_second_call_runs_message_path_third_runs_normally() {
    let runtime = runtime(
        r#"{
            "commands": [{
                "name": "rank",
                "cooldown": {
                    "duration_ms": 80,
                    "per": "user",
                    "on_cooldown": [{"action": "reply", "content": "Too fast"}]
                },
                "actions": [{"action": "reply", "content": "Rank!"}]
            }]
        }"#,
    );
    let ctx = Context::with_user("u1");

    let first = runtime
        .invoke_command("rank", Map::new(), ctx.clone())
        .await
        .unwrap();
    assert_eq!(first[0].data.as_ref().unwrap()["content"], "Rank!");

    let second = runtime
        .invoke_command("rank", Map::new(), ctx.clone())
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].data.as_ref().unwrap()["content"], "Too fast");

    tokio::time::sleep(Duration::from_millis(100)).await;
    let third = runtime
        .invoke_command("rank", Map::new(), ctx)
        .await
        .unwrap();
    assert_eq!(third[0].data.as_ref().unwrap()["content"], "Rank!");
}

#[tokio::test]
async fn recursion_error_is_absorbed_by_the_immediate_caller() {
    let runtime = runtime(
        r#"{
            "commands": [
                {"name": "go", "actions": [{"action": "call_flow", "flow": "loop"}]}
            ],
            "flows": [
                {"name": "loop", "actions": [{"action": "call_flow", "flow": "loop"}]}
            ]
        }"#,
    );

    // The chain bottoms out ten frames down; the failure stays there and
    // the top-level command still succeeds
    let outcomes = runtime
        .invoke_command("go", Map::new(), Context::new())
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].success);
}

#[tokio::test]
async fn recursion_limit_surfaces_at_the_failing_frame() {
    let spec = Specification::from_json_str(
        r#"{
            "commands": [
                {"name": "go", "actions": [{"action": "call_flow", "flow": "loop"}]}
            ],
            "flows": [
                {"name": "loop", "actions": [{"action": "call_flow", "flow": "loop"}]}
            ]
        }"#,
    )
    .unwrap();
    let runtime = Runtime::with_config(
        spec,
        RuntimeConfig {
            max_call_depth: 0,
            ..RuntimeConfig::default()
        },
    );

    let outcomes = runtime
        .invoke_command("go", Map::new(), Context::new())
        .await
        .unwrap();
    assert!(!outcomes[0].success);
    assert!(outcomes[0]
        .error
        .as_deref()
        .unwrap()
        .contains("recursion limit"));
}

#[tokio::test]
async fn member_count_condition_gates_event_handler() {
    let runtime = runtime(
        r#"{
            "events": [{
                "id": "welcome",
                "event": "ready",
                "condition": "${guild.memberCount} > 100",
                "actions": [{"action": "reply", "content": "Welcome!"}]
            }]
        }"#,
    );
    let handle = runtime.start().await;
    let mut replies = runtime.bus().subscribe(triggers::ACTION_REPLY);

    runtime.fire(Trigger::event("ready", json!({"guild": {"memberCount": 50}})));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(replies.try_recv().is_err());

    runtime.fire(Trigger::event("ready", json!({"guild": {"memberCount": 150}})));
    let reply = expect_reply(&mut replies).await;
    assert_eq!(reply.payload["content"], "Welcome!");

    runtime.shutdown().await;
    let _ = handle.await;
}

#[tokio::test]
async fn debounced_burst_collapses_to_one_execution_with_last_payload() {
    let runtime = runtime(
        r#"{
            "events": [{
                "id": "presence",
                "event": "presence_update",
                "debounce": {"quiet_ms": 50, "key": ["payload.user_id"]},
                "actions": [{"action": "reply", "content": "${n}"}]
            }]
        }"#,
    );
    let handle = runtime.start().await;
    let mut replies = runtime.bus().subscribe(triggers::ACTION_REPLY);

    for n in 1..=5 {
        runtime.fire(Trigger::event(
            "presence_update",
            json!({"user_id": "u1", "n": n}),
        ));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let reply = expect_reply(&mut replies).await;
    assert_eq!(reply.payload["content"], "5");

    // The burst produced exactly one execution
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(replies.try_recv().is_err());

    runtime.shutdown().await;
    let _ = handle.await;
}

#[tokio::test]
async fn exhausted_reconnects_leave_the_pipe_failed_until_manual_connect() {
    // Nothing listens on port 1; every connect attempt is refused
    let runtime = runtime(
        r#"{
            "pipes": [{
                "name": "upstream",
                "kind": "tcp",
                "host": "127.0.0.1",
                "port": 1,
                "backoff": {"kind": "fixed", "base_ms": 10, "max_attempts": 2}
            }]
        }"#,
    );
    let handle = runtime.start().await;

    let mut state = PipeState::Connecting;
    for _ in 0..100 {
        state = runtime.pipes().status("upstream").unwrap().state;
        if state == PipeState::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state, PipeState::Failed);

    // Failed is terminal: sends fail fast and the state does not move
    let err = runtime.pipes().send("upstream", json!({"x": 1})).await;
    assert!(matches!(err, Err(PipeError::Unavailable { .. })));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(
        runtime.pipes().status("upstream").unwrap().state,
        PipeState::Failed
    );

    // An explicit connect is allowed out of Failed
    runtime.pipes().connect("upstream").await.unwrap();
    let state = runtime.pipes().status("upstream").unwrap().state;
    assert_ne!(state, PipeState::Disconnected);

    runtime.shutdown().await;
    let _ = handle.await;
}

#[tokio::test]
async fn state_persists_across_invocations() {
    let runtime = runtime(
        r#"{
            "commands": [
                {
                    "name": "remember",
                    "actions": [
                        {"action": "state.set", "scope": "user", "name": "color", "value": "teal"}
                    ]
                },
                {
                    "name": "recall",
                    "actions": [
                        {"action": "state.get", "scope": "user", "name": "color"},
                        {"action": "reply", "content": "${color}"}
                    ]
                }
            ]
        }"#,
    );
    let ctx = Context::with_user("u1");

    runtime
        .invoke_command("remember", Map::new(), ctx.clone())
        .await
        .unwrap();
    let outcomes = runtime
        .invoke_command("recall", Map::new(), ctx)
        .await
        .unwrap();
    assert_eq!(
        outcomes.last().unwrap().data.as_ref().unwrap()["content"],
        "teal"
    );
}
