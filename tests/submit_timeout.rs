use std::time::{Duration, Instant};

use mculink::serial::{MockBehavior, MockTransport};
use mculink::{BridgeError, Command, LinkConfig, LinkState, SerialBridge};

fn test_config() -> LinkConfig {
    LinkConfig {
        command_timeout: Duration::from_millis(200),
        retry_floor: Duration::from_secs(10),
        retry_cap: Duration::from_secs(30),
        ..LinkConfig::default()
    }
}

// A silent device is a timeout, not a link fault: the command slot is
// released, the link stays connected and the next command goes through.
#[tokio::test]
async fn silent_device_times_out_without_fault() {
    let mock = MockTransport::scripted([
        MockBehavior::Silence,
        MockBehavior::Reply("PONG".to_string()),
    ]);
    let bridge = SerialBridge::with_transport(Box::new(mock), test_config());
    bridge.open().await.expect("open should succeed");

    let start = Instant::now();
    let result = bridge
        .submit(Command::with_timeout("PING", Duration::from_millis(120)))
        .await;
    let elapsed = start.elapsed();

    assert!(matches!(result, Err(BridgeError::Timeout(_))));
    assert!(elapsed >= Duration::from_millis(120), "returned before the deadline");
    assert!(elapsed < Duration::from_millis(600), "timeout took far too long");
    assert_eq!(bridge.link_state(), LinkState::Connected);

    // Slot released: the next command must succeed
    let reply = bridge
        .submit(Command::new("PING"))
        .await
        .expect("follow-up submit should succeed");
    assert_eq!(reply.raw, "PONG");

    bridge.shutdown().await;
}

// The reply budget runs from submission. A command stuck behind a slow
// one can expire in the queue; it must fail with Timeout without ever
// touching the wire.
#[tokio::test]
async fn queued_command_can_expire_before_the_wire() {
    let mock = MockTransport::scripted([MockBehavior::ReplyAfter(
        "SLOW".to_string(),
        Duration::from_millis(150),
    )]);
    let handle = mock.handle();
    let bridge = SerialBridge::with_transport(Box::new(mock), test_config());
    bridge.open().await.expect("open should succeed");

    let (first, second) = tokio::join!(
        bridge.submit(Command::with_timeout("C1", Duration::from_millis(400))),
        async {
            // Queue behind C1, with a budget shorter than C1's exchange
            tokio::time::sleep(Duration::from_millis(10)).await;
            bridge
                .submit(Command::with_timeout("C2", Duration::from_millis(100)))
                .await
        },
    );

    assert_eq!(first.expect("C1 reply").raw, "SLOW");
    assert!(matches!(second, Err(BridgeError::Timeout(_))));
    assert_eq!(
        handle.writes(),
        vec!["C1".to_string()],
        "an expired command must not reach the wire"
    );

    bridge.shutdown().await;
}

// A reply that arrives after its command already timed out must not be
// handed to the next command.
#[tokio::test]
async fn late_reply_is_not_misattributed() {
    let mock = MockTransport::scripted([
        MockBehavior::Silence,
        MockBehavior::Reply("PONG".to_string()),
    ]);
    let handle = mock.handle();
    let bridge = SerialBridge::with_transport(Box::new(mock), test_config());
    bridge.open().await.expect("open should succeed");

    let result = bridge
        .submit(Command::with_timeout("FIRST", Duration::from_millis(80)))
        .await;
    assert!(matches!(result, Err(BridgeError::Timeout(_))));

    // The answer to FIRST limps in while the link is idle
    handle.forge_line("LATE-FIRST");

    let reply = bridge
        .submit(Command::with_timeout("SECOND", Duration::from_millis(300)))
        .await
        .expect("second submit should succeed");
    assert_eq!(
        reply.raw, "PONG",
        "the stale line must be discarded, not returned"
    );

    bridge.shutdown().await;
}
