//! Loading settings from TOML files and the process environment

use maintmode_core::config::{
    Settings, ENV_HOST, ENV_MAX_POLL_ATTEMPTS, ENV_PASSWORD, ENV_USERNAME,
};
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_VARS: &[&str] = &[
    ENV_HOST,
    ENV_USERNAME,
    ENV_PASSWORD,
    ENV_MAX_POLL_ATTEMPTS,
    "PROXMOX_PORT",
    "PROXMOX_VERIFY_TLS",
    "MAINTMODE_ANY_GROUP",
    "MAINTMODE_PRIMARY_TEMPLATE",
    "MAINTMODE_EXCLUSIVE_TEMPLATE",
    "MAINTMODE_POLL_INTERVAL_MS",
    "MAINTMODE_LOG_LEVEL",
];

fn clear_env() {
    for var in ENV_VARS {
        std::env::remove_var(var);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
#[serial]
fn test_load_full_file() {
    clear_env();
    let file = write_config(
        r#"
[api]
host = "pve01.lan"
port = 8007
username = "root@pam"
password = "hunter2"
verify_tls = true
timeout = "10s"

[groups]
any_name = "ha_any"
primary_template = "ha_{name}_primary"
exclusive_template = "ha_{name}_only"

[update]
poll_interval = "500ms"
max_poll_attempts = 20

[logging]
level = "debug"
"#,
    );

    let settings = Settings::from_file(file.path()).unwrap();
    settings.validate().unwrap();

    assert_eq!(settings.api.host, "pve01.lan");
    assert_eq!(settings.api.port, 8007);
    assert!(settings.api.verify_tls);
    assert_eq!(settings.api.timeout, Duration::from_secs(10));
    assert_eq!(settings.groups.any_name, "ha_any");
    assert_eq!(settings.groups.exclusive_name("prox01"), "ha_prox01_only");
    assert_eq!(settings.update.poll_interval, Duration::from_millis(500));
    assert_eq!(settings.update.max_poll_attempts, 20);
    assert_eq!(settings.logging.level, "debug");
}

#[test]
#[serial]
fn test_partial_file_keeps_defaults() {
    clear_env();
    let file = write_config(
        r#"
[api]
host = "pve01.lan"
"#,
    );

    let settings = Settings::from_file(file.path()).unwrap();

    assert_eq!(settings.api.port, 8006);
    assert!(!settings.api.verify_tls);
    assert_eq!(settings.groups.primary_name("prox01"), "test_prox01_primary");
    assert_eq!(settings.update.max_poll_attempts, 300);
    assert!(settings.validate().is_err());
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    let file = write_config(
        r#"
[api]
host = "from-file"
username = "file@pam"
password = "file"

[update]
max_poll_attempts = 5
"#,
    );
    std::env::set_var(ENV_HOST, "from-env");
    std::env::set_var(ENV_MAX_POLL_ATTEMPTS, "42");

    let settings = Settings::from_file(file.path()).unwrap();
    clear_env();

    assert_eq!(settings.api.host, "from-env");
    assert_eq!(settings.api.username, "file@pam");
    assert_eq!(settings.update.max_poll_attempts, 42);
}

#[test]
#[serial]
fn test_load_without_file_reads_environment() {
    clear_env();
    std::env::set_var(ENV_HOST, "pve02");
    std::env::set_var(ENV_USERNAME, "root@pam");
    std::env::set_var(ENV_PASSWORD, "pw");

    let settings = Settings::load(None).unwrap();
    clear_env();

    settings.validate().unwrap();
    assert_eq!(settings.api.host, "pve02");
}

#[test]
#[serial]
fn test_invalid_file_is_configuration_error() {
    clear_env();
    let file = write_config("[api\nhost = ");

    let err = Settings::from_file(file.path()).unwrap_err();
    assert_eq!(err.exit_code(), 1);

    let missing = Settings::from_file("/nonexistent/maintmode.toml").unwrap_err();
    assert_eq!(missing.exit_code(), 1);
}
