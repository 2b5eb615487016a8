// Integration tests for configuration resolution from the real process
// environment and from files on disk.

use std::env;
use std::io::Write;

use serial_test::serial;
use shadowstack::config::{
    ColorMode, DumpArea, ReactionMode, ShadowConfig, ENV_COLOR, ENV_CONFIG_FILE, ENV_DUMP_AREA,
    ENV_DUMP_HIDE_EQUAL, ENV_DUMP_WIDTH, ENV_REACTION,
};
use tempfile::NamedTempFile;

const ALL_KEYS: [&str; 6] = [
    ENV_REACTION,
    ENV_DUMP_WIDTH,
    ENV_DUMP_AREA,
    ENV_DUMP_HIDE_EQUAL,
    ENV_COLOR,
    ENV_CONFIG_FILE,
];

fn clear_env() {
    for key in ALL_KEYS {
        env::remove_var(key);
    }
    ShadowConfig::clear_override();
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
#[serial]
fn test_empty_environment_gives_defaults() {
    clear_env();
    assert_eq!(ShadowConfig::current(), ShadowConfig::default());
}

#[test]
#[serial]
fn test_environment_is_read_at_each_resolution() {
    clear_env();
    env::set_var(ENV_REACTION, "report");
    assert_eq!(ShadowConfig::current().reaction, ReactionMode::Report);
    env::set_var(ENV_REACTION, "heal");
    assert_eq!(ShadowConfig::current().reaction, ReactionMode::Heal);
    clear_env();
}

#[test]
#[serial]
fn test_dump_settings_from_environment() {
    clear_env();
    env::set_var(ENV_DUMP_WIDTH, "24");
    env::set_var(ENV_DUMP_AREA, "shadow");
    env::set_var(ENV_DUMP_HIDE_EQUAL, "yes");
    env::set_var(ENV_COLOR, "always");

    let dump = ShadowConfig::current().dump;
    assert_eq!(dump.width, 24);
    assert_eq!(dump.area, DumpArea::Shadow);
    assert!(dump.hide_equal_lines);
    assert_eq!(dump.color, ColorMode::Always);
    clear_env();
}

#[test]
#[serial]
fn test_file_then_environment_precedence() {
    clear_env();
    let file = config_file(
        r#"
        reaction = "quiet-heal"

        [dump]
        width = 8
        area = "original"
        "#,
    );
    env::set_var(ENV_CONFIG_FILE, file.path());
    env::set_var(ENV_DUMP_WIDTH, "12");

    let config = ShadowConfig::current();
    assert_eq!(config.reaction, ReactionMode::QuietHeal);
    assert_eq!(config.dump.area, DumpArea::Actual);
    assert_eq!(config.dump.width, 12);
    clear_env();
}

#[test]
#[serial]
fn test_missing_config_file_falls_back_to_defaults() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    env::set_var(ENV_CONFIG_FILE, dir.path().join("absent.toml"));
    env::set_var(ENV_REACTION, "ignore");

    let config = ShadowConfig::current();
    assert_eq!(config.reaction, ReactionMode::Ignore);
    assert_eq!(config.dump.width, 16);
    clear_env();
}

#[test]
#[serial]
fn test_malformed_config_file_falls_back_to_defaults() {
    clear_env();
    let file = config_file("reaction = [not toml");
    env::set_var(ENV_CONFIG_FILE, file.path());
    assert_eq!(ShadowConfig::current(), ShadowConfig::default());
    clear_env();
}

#[test]
#[serial]
fn test_installed_config_wins_over_environment() {
    clear_env();
    env::set_var(ENV_REACTION, "report");
    let mut installed = ShadowConfig::default();
    installed.reaction = ReactionMode::Ignore;
    ShadowConfig::install(installed.clone());
    assert_eq!(ShadowConfig::current(), installed);

    ShadowConfig::clear_override();
    assert_eq!(ShadowConfig::current().reaction, ReactionMode::Report);
    clear_env();
}

#[test]
fn test_load_file_reports_path_on_error() {
    let file = config_file("[dump]\nwidth = 0\n");
    let err = ShadowConfig::load_file(file.path()).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("Failed to parse config file"), "{message}");
    assert!(message.contains("width"), "{message}");
}
