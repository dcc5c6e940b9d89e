use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use flag_events::{
    DefaultDiagnosticStore, DefaultUserDeduplicator, DiagnosticStore, EventFactory, EventProcessor,
    EventsConfig, User,
};
use mockito::{Matcher, Server};
use serde_json::{json, Value};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config(server: &Server) -> EventsConfig {
    EventsConfig::new("sdk-key-abcdef")
        .with_events_uri(format!("{}/bulk", server.url()))
        .with_diagnostic_uri(format!("{}/diagnostic", server.url()))
}

fn capture_bodies(
    captured: &Arc<Mutex<Vec<Value>>>,
) -> impl Fn(&mockito::Request) -> Vec<u8> + Send + Sync + 'static {
    let captured = Arc::clone(captured);
    move |request: &mockito::Request| {
        let body = serde_json::from_slice(request.body().unwrap()).unwrap();
        captured.lock().unwrap().push(body);
        Vec::new()
    }
}

#[test]
fn init_event_is_sent_on_start() {
    init_logger();
    let mut server = Server::new();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let mock = server
        .mock("POST", "/diagnostic")
        .match_header("authorization", "sdk-key-abcdef")
        .match_header("content-type", "application/json")
        .match_header("x-launchdarkly-event-schema", Matcher::Missing)
        .match_header("x-launchdarkly-payload-id", Matcher::Missing)
        .with_status(202)
        .with_body_from_request(capture_bodies(&captured))
        .expect(1)
        .create();

    let processor = EventProcessor::start(config(&server)).unwrap();
    processor.close().unwrap();

    mock.assert();
    let captured = captured.lock().unwrap();
    let event = &captured[0];
    assert_eq!(event["kind"], json!("diagnostic-init"));
    assert_eq!(event["id"]["sdkKeySuffix"], json!("abcdef"));
    assert_eq!(event["sdk"]["name"], json!("flag-events-rust"));
    assert_eq!(event["configuration"]["customEventsURI"], json!(true));
}

#[test]
fn persisted_event_is_sent_before_init_event() {
    init_logger();
    let mut server = Server::new();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let mock = server
        .mock("POST", "/diagnostic")
        .with_status(202)
        .with_body_from_request(capture_bodies(&captured))
        .expect(2)
        .create();

    let config = config(&server);
    let previous = DefaultDiagnosticStore::new(&config).create_event_and_reset(4, 2);
    let store: Arc<dyn DiagnosticStore> =
        Arc::new(DefaultDiagnosticStore::new(&config).with_persisted_unsent_event(previous));
    let deduplicator = DefaultUserDeduplicator::new(config.user_keys_flush_interval);

    let processor =
        EventProcessor::start_with(config, Box::new(deduplicator), Some(store)).unwrap();
    processor.close().unwrap();

    mock.assert();
    let captured = captured.lock().unwrap();
    assert_eq!(captured[0]["kind"], json!("diagnostic"));
    assert_eq!(captured[0]["droppedEvents"], json!(4));
    assert_eq!(captured[0]["deduplicatedUsers"], json!(2));
    assert_eq!(captured[1]["kind"], json!("diagnostic-init"));
}

#[test]
fn failed_diagnostic_event_is_not_retried() {
    init_logger();
    let mut server = Server::new();
    let mock = server
        .mock("POST", "/diagnostic")
        .with_status(503)
        .expect(1)
        .create();

    let processor = EventProcessor::start(config(&server)).unwrap();
    processor.close().unwrap();

    mock.assert();
}

#[test]
fn opt_out_sends_no_diagnostics() {
    init_logger();
    let mut server = Server::new();
    let mock = server.mock("POST", "/diagnostic").expect(0).create();

    let processor =
        EventProcessor::start(config(&server).with_diagnostic_opt_out(true)).unwrap();
    processor.close().unwrap();

    mock.assert();
}

#[test]
fn no_store_sends_no_diagnostics() {
    init_logger();
    let mut server = Server::new();
    let mock = server.mock("POST", "/diagnostic").expect(0).create();

    let config = config(&server);
    let deduplicator = DefaultUserDeduplicator::new(config.user_keys_flush_interval);
    let processor = EventProcessor::start_with(config, Box::new(deduplicator), None).unwrap();
    processor.close().unwrap();

    mock.assert();
}

#[test]
fn rejected_diagnostics_do_not_stop_event_delivery() {
    init_logger();
    for status in [401, 403] {
        let mut server = Server::new();
        let diagnostic_mock = server
            .mock("POST", "/diagnostic")
            .with_status(status)
            .expect(1)
            .create();
        let events_mock = server
            .mock("POST", "/bulk")
            .match_body(Matcher::PartialJson(json!([{"kind": "identify", "key": "userkey"}])))
            .with_status(202)
            .expect(1)
            .create();

        let processor = EventProcessor::start(config(&server)).unwrap();
        let start = Instant::now();
        while !diagnostic_mock.matched() && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(20));
        }
        diagnostic_mock.assert();

        let user = Arc::new(User::with_key("userkey"));
        processor.send_event(EventFactory::default().new_identify_event(Some(user)));
        processor.flush();
        processor.wait_until_inactive();

        events_mock.assert();
        processor.close().unwrap();
    }
}
