use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use almox_core::config::AppConfig;
use toml::Value;

use crate::commands::{load_config, CommandResult};

/// Prints every effective setting with the layer it came from. Secrets are never echoed.
pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for Setting { key, value, env_keys } in settings(&config) {
        let source =
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn setting(key: &'static str, value: String, env_keys: &'static [&'static str]) -> Setting {
    Setting { key, value, env_keys }
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let webhook_token =
        if config.notifications.webhook_token.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        setting("database.url", config.database.url.clone(), &["ALMOX_DATABASE_URL"]),
        setting(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["ALMOX_DATABASE_MAX_CONNECTIONS"],
        ),
        setting(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["ALMOX_DATABASE_TIMEOUT_SECS"],
        ),
        setting(
            "server.bind_address",
            config.server.bind_address.clone(),
            &["ALMOX_SERVER_BIND_ADDRESS"],
        ),
        setting("server.port", config.server.port.to_string(), &["ALMOX_SERVER_PORT"]),
        setting(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["ALMOX_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        setting(
            "notifications.enabled",
            config.notifications.enabled.to_string(),
            &["ALMOX_NOTIFICATIONS_ENABLED"],
        ),
        setting(
            "notifications.queue_capacity",
            config.notifications.queue_capacity.to_string(),
            &["ALMOX_NOTIFICATIONS_QUEUE_CAPACITY"],
        ),
        setting(
            "notifications.webhook_url",
            config.notifications.webhook_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["ALMOX_NOTIFICATIONS_WEBHOOK_URL"],
        ),
        setting(
            "notifications.webhook_token",
            webhook_token.to_string(),
            &["ALMOX_NOTIFICATIONS_WEBHOOK_TOKEN"],
        ),
        setting(
            "notifications.timeout_secs",
            config.notifications.timeout_secs.to_string(),
            &["ALMOX_NOTIFICATIONS_TIMEOUT_SECS"],
        ),
        setting(
            "logging.level",
            config.logging.level.clone(),
            &["ALMOX_LOGGING_LEVEL", "ALMOX_LOG_LEVEL"],
        ),
        setting(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["ALMOX_LOGGING_FORMAT", "ALMOX_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("almox.toml"), PathBuf::from("config/almox.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
