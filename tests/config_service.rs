//! Building the fixture service from a YAML configuration file

mod common;

use std::io::Write;
use std::time::Duration;

use common::{handlers, stream_messages};
use pretty_assertions::assert_eq;
use rpc_transform::config::Config;
use rpc_transform::service::{CallKind, Service};
use rpc_transform::Error;
use serde_json::json;
use tempfile::NamedTempFile;

const SERVICE_YAML: &str = r#"
service:
  name: TransformService
  timeout: 5s
methods:
  do2:
    transform: xform
  do3:
    transform: payload
  do4:
    kind: client_streaming
    transform: toPayload
"#;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_configured_service_matches_hand_wired_one() {
    let file = write_config(SERVICE_YAML);
    let config = Config::load(Some(file.path())).unwrap();
    let service = Service::from_config(&config, handlers()).unwrap();

    assert_eq!(service.name(), "TransformService");
    assert_eq!(service.methods(), vec!["do1", "do2", "do3", "do4"]);
    assert_eq!(service.call_kind("do1"), Some(CallKind::Unary));
    assert_eq!(service.call_kind("do4"), Some(CallKind::ClientStreaming));

    let res = service
        .call("do1", json!({ "message": "Hello World", "value": "value 1" }))
        .await
        .unwrap();
    assert_eq!(res, json!({ "message": "Hello World", "value": "value 1" }));

    let res = service
        .call("do2", json!({ "message": "Hello World", "value": "value 1" }))
        .await
        .unwrap();
    assert_eq!(res, json!({ "message": "Hello World" }));

    let res = service
        .call(
            "do3",
            json!({ "message": "Hello", "value": "value 3", "secret": "secret stuffs" }),
        )
        .await
        .unwrap();
    assert_eq!(res, json!({ "message": "HELLO", "value": "value 3" }));

    let res = service
        .call_stream("do4", futures::stream::iter(stream_messages()))
        .await
        .unwrap();
    assert_eq!(res, json!({ "message": "1 FOO|2 BAR|3 ASD|4 QWE|5 RTY|6 ZXC" }));
}

#[test]
fn test_empty_transform_fails_before_any_call() {
    let file = write_config("methods:\n  do2:\n    transform: \"\"\n");
    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_hand_built_config_with_empty_transform_is_rejected_by_service() {
    let mut config = Config::from_yaml(SERVICE_YAML).unwrap();
    config
        .methods
        .get_mut("do2")
        .unwrap()
        .transform = Some(String::new());
    let err = Service::from_config(&config, handlers()).unwrap_err();
    assert!(err.to_string().contains("do2"), "{err}");
}

#[test]
fn test_service_timeout_is_carried_over() {
    let config = Config::from_yaml(SERVICE_YAML).unwrap();
    assert_eq!(config.service.timeout, Some(Duration::from_secs(5)));
    let service = Service::from_config(&config, handlers()).unwrap();
    assert!(format!("{service:?}").contains("5s"));
}
