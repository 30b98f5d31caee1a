// The RemoteControl helpers format the device vocabulary; everything
// else (queuing, timeouts, faults) comes from the bridge underneath.

use std::time::Duration;

use mculink::serial::{MockBehavior, MockTransport};
use mculink::{LinkConfig, RemoteControl, SerialBridge};

fn control_over(behaviors: Vec<MockBehavior>) -> (RemoteControl, mculink::serial::MockHandle) {
    let mock = MockTransport::scripted(behaviors);
    let handle = mock.handle();
    let config = LinkConfig {
        command_timeout: Duration::from_millis(200),
        retry_floor: Duration::from_secs(10),
        retry_cap: Duration::from_secs(30),
        ..LinkConfig::default()
    };
    let bridge = SerialBridge::with_transport(Box::new(mock), config);
    (RemoteControl::new(bridge), handle)
}

#[tokio::test]
async fn vocabulary_formats_expected_lines() {
    let (control, handle) = control_over(vec![
        MockBehavior::Reply("READY".to_string()),
        MockBehavior::Reply("PRESET APPLIED".to_string()),
        MockBehavior::Reply("TEMP:21.5".to_string()),
        MockBehavior::Reply("OK".to_string()),
    ]);
    control.bridge().open().await.expect("open should succeed");

    let status = control.status().await.expect("status reply");
    assert_eq!(status.raw, "READY");

    let preset = control.send_preset(" warm_white ").await.expect("preset reply");
    assert_eq!(preset.raw, "PRESET APPLIED");

    let temperature = control.temperature().await.expect("temperature reply");
    assert_eq!(temperature, Some(21.5));

    let raw = control.send_raw(" LED ON ").await.expect("raw reply");
    assert_eq!(raw.raw, "OK");

    assert_eq!(
        handle.writes(),
        vec![
            "STATUS".to_string(),
            "PRESET:warm_white".to_string(),
            "TEMP".to_string(),
            "LED ON".to_string(),
        ]
    );

    control.into_bridge().shutdown().await;
}

// A device that answers the temperature query with something else
// yields Ok(None) rather than an error.
#[tokio::test]
async fn non_reading_temperature_answer_is_none() {
    let (control, _handle) = control_over(vec![MockBehavior::Reply("BUSY".to_string())]);
    control.bridge().open().await.expect("open should succeed");

    let temperature = control.temperature().await.expect("temperature exchange");
    assert_eq!(temperature, None);

    control.into_bridge().shutdown().await;
}
