//! Config module tests

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("MQB_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("value = \"${MQB_TEST_VAR_SIMPLE}\"").unwrap();
    assert_eq!(result, "value = \"hello\"");
    std::env::remove_var("MQB_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("MQB_TEST_VAR_UNSET");
    let result = substitute_env_vars("value = \"${MQB_TEST_VAR_UNSET:-fallback}\"").unwrap();
    assert_eq!(result, "value = \"fallback\"");

    std::env::set_var("MQB_TEST_VAR_SET", "from_env");
    let result = substitute_env_vars("value = \"${MQB_TEST_VAR_SET:-fallback}\"").unwrap();
    assert_eq!(result, "value = \"from_env\"");
    std::env::remove_var("MQB_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("MQB_TEST_VAR_MISSING");
    let result = substitute_env_vars("value = \"${MQB_TEST_VAR_MISSING}\"").unwrap();
    assert_eq!(result, "value = \"\"");
}

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.log.level, "info");
    assert_eq!(config.connection.keep_alive, Duration::from_secs(10));
    assert_eq!(config.connection.connect_timeout, Duration::from_secs(8));
    assert_eq!(config.backoff.initial, Duration::from_secs(1));
    assert_eq!(config.backoff.max, Duration::from_secs(30));
    assert_eq!(config.backoff.multiplier, 2.0);
    assert!(config.backoff.jitter);
    assert_eq!(config.auth.retry_interval, Duration::from_secs(1));
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_full_config() {
    let config = Config::parse(
        r#"
[log]
level = "debug"

[connection]
keep_alive = "30s"
connect_timeout = "2s"
inbound_capacity = 64
outbound_capacity = 32
max_packet_size = 65536

[backoff]
initial = "500ms"
max = "1m"
multiplier = 1.5
jitter = false

[auth]
retry_interval = "5s"
"#,
    )
    .unwrap();

    assert_eq!(config.log.level, "debug");
    assert_eq!(config.connection.keep_alive, Duration::from_secs(30));
    assert_eq!(config.connection.connect_timeout, Duration::from_secs(2));
    assert_eq!(config.connection.inbound_capacity, 64);
    assert_eq!(config.connection.outbound_capacity, 32);
    assert_eq!(config.connection.max_packet_size, 65536);
    assert_eq!(config.backoff.initial, Duration::from_millis(500));
    assert_eq!(config.backoff.max, Duration::from_secs(60));
    assert_eq!(config.backoff.multiplier, 1.5);
    assert!(!config.backoff.jitter);
    assert_eq!(config.auth.retry_interval, Duration::from_secs(5));
}

#[test]
fn test_parse_partial_config_keeps_defaults() {
    let config = Config::parse("[backoff]\njitter = false\n").unwrap();
    assert!(!config.backoff.jitter);
    assert_eq!(config.backoff.max, Duration::from_secs(30));
    assert_eq!(config.connection.keep_alive, Duration::from_secs(10));
}

#[test]
fn test_validation_errors() {
    for bad in [
        "[log]\nlevel = \"loud\"",
        "[connection]\nkeep_alive = \"0s\"",
        "[connection]\nkeep_alive = \"20h\"",
        "[connection]\ninbound_capacity = 0",
        "[backoff]\ninitial = \"10s\"\nmax = \"1s\"",
        "[backoff]\nmultiplier = 0.5",
        "[auth]\nretry_interval = \"0s\"",
    ] {
        assert!(
            matches!(Config::parse(bad), Err(ConfigError::Validation(_))),
            "expected validation error for {:?}",
            bad
        );
    }
}

#[test]
fn test_load_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.connection.keep_alive, Duration::from_secs(10));
}

#[test]
fn test_load_config_with_env_substitution() {
    std::env::set_var("MQB_TEST_KEEP_ALIVE", "25s");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[connection]
keep_alive = "${{MQB_TEST_KEEP_ALIVE}}"
inbound_capacity = ${{MQB_TEST_INBOUND:-16}}
"#
    )
    .unwrap();

    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.connection.keep_alive, Duration::from_secs(25));
    assert_eq!(config.connection.inbound_capacity, 16);

    std::env::remove_var("MQB_TEST_KEEP_ALIVE");
}

// ============================================================================
// Adapter document
// ============================================================================

fn settings_json() -> serde_json::Value {
    json!({
        "messagingURL": "tcp://broker.local:1884",
        "username": "bridge",
        "password": "secret",
        "topics": ["sensors/#", "alarms/+"],
    })
}

#[test]
fn test_adapter_record_with_string_settings() {
    let record = json!({
        "adapter_name": "mqttBridgeAdapter",
        "topic_root": "bridge",
        "adapter_settings": settings_json().to_string(),
    });

    let config = AdapterConfig::from_record(&record).unwrap();
    assert_eq!(config.topic_root, "bridge");
    assert_eq!(config.broker.messaging_url, "tcp://broker.local:1884");
    assert_eq!(config.broker.username, "bridge");
    assert_eq!(config.broker.topics, vec!["sensors/#", "alarms/+"]);
    assert!(!config.broker.is_cb_broker);
}

#[test]
fn test_adapter_record_with_inline_settings_and_default_root() {
    let record = json!({ "adapter_settings": settings_json() });

    let config = AdapterConfig::from_record(&record).unwrap();
    assert_eq!(config.topic_root, DEFAULT_TOPIC_ROOT);
    assert_eq!(config.broker.password, "secret");
}

#[test]
fn test_adapter_record_errors() {
    let cases = [
        json!({ "topic_root": "bridge" }),
        json!({ "adapter_settings": "{not json" }),
        json!({ "adapter_settings": "{}" }),
        json!({ "adapter_settings": { "messagingURL": "ssl://broker:8883" } }),
        json!({ "adapter_settings": { "messagingURL": "b:1883", "topics": ["a/#/b"] } }),
        json!({ "topic_root": "a/b", "adapter_settings": settings_json() }),
        json!({ "topic_root": "", "adapter_settings": settings_json() }),
        json!({ "topic_root": "root+", "adapter_settings": settings_json() }),
        json!("not an object"),
    ];

    for record in cases {
        assert!(
            AdapterConfig::from_record(&record).is_err(),
            "expected error for {}",
            record
        );
    }
}

#[test]
fn test_cb_broker_requires_device_credentials() {
    let record = json!({
        "adapter_settings": {
            "messagingURL": "edge:1883",
            "isCbBroker": true,
            "platformURL": "http://edge:9000",
            "systemKey": "key",
        }
    });
    let err = AdapterConfig::from_record(&record).unwrap_err();
    assert!(err.to_string().contains("systemSecret"), "{}", err);

    let record = json!({
        "adapter_settings": {
            "messagingURL": "edge:1883",
            "isCbBroker": true,
            "username": "static",
            "password": "creds",
        }
    });
    let config = AdapterConfig::from_record(&record).unwrap();
    assert!(!config.broker.needs_platform_auth());
}

#[test]
fn test_broker_address_forms() {
    let cases = [
        ("localhost:1883", "localhost", 1883),
        ("localhost", "localhost", 1883),
        ("tcp://10.0.0.5:1884", "10.0.0.5", 1884),
        ("mqtt://broker.example.com", "broker.example.com", 1883),
        ("tcp://[::1]:1885", "::1", 1885),
    ];
    for (input, host, port) in cases {
        let addr: BrokerAddress = input.parse().unwrap();
        assert_eq!(addr.host, host, "host for {}", input);
        assert_eq!(addr.port, port, "port for {}", input);
    }

    assert_eq!(
        "tcp://[::1]:1885".parse::<BrokerAddress>().unwrap().to_string(),
        "[::1]:1885"
    );
}

#[test]
fn test_broker_address_rejects() {
    for input in ["", "ssl://b:8883", "mqtts://b", "ws://b:80", "b:notaport", "tcp://:1883"] {
        assert!(input.parse::<BrokerAddress>().is_err(), "{:?} should fail", input);
    }
}
