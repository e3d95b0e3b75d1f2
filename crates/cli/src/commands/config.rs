use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use fixtrack_core::config::{AppConfig, LoadOptions};
use serde::Serialize;
use serde_json::json;
use toml::Value;

use crate::commands::{CommandResult, EXIT_CONFIG};

#[derive(Debug, Serialize)]
struct ConfigField {
    key: &'static str,
    value: serde_json::Value,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let fields = effective_fields(&config, config_file_doc.as_ref(), config_file_path.as_deref());

    CommandResult::success_with(
        "config",
        "effective config (source precedence: env > file > default)",
        Some(json!({ "fields": fields })),
    )
}

fn effective_fields(
    config: &AppConfig,
    doc: Option<&Value>,
    doc_path: Option<&Path>,
) -> Vec<ConfigField> {
    let entries: [(&'static str, &[&str], serde_json::Value); 9] = [
        ("database.url", &["FIXTRACK_DATABASE_URL"], json!(config.database.url)),
        (
            "database.max_connections",
            &["FIXTRACK_DATABASE_MAX_CONNECTIONS"],
            json!(config.database.max_connections),
        ),
        (
            "database.timeout_secs",
            &["FIXTRACK_DATABASE_TIMEOUT_SECS"],
            json!(config.database.timeout_secs),
        ),
        (
            "server.bind_address",
            &["FIXTRACK_SERVER_BIND_ADDRESS"],
            json!(config.server.bind_address),
        ),
        ("server.port", &["FIXTRACK_SERVER_PORT"], json!(config.server.port)),
        (
            "server.graceful_shutdown_secs",
            &["FIXTRACK_SERVER_GRACEFUL_SHUTDOWN_SECS"],
            json!(config.server.graceful_shutdown_secs),
        ),
        (
            "logging.level",
            &["FIXTRACK_LOGGING_LEVEL", "FIXTRACK_LOG_LEVEL"],
            json!(config.logging.level),
        ),
        (
            "logging.format",
            &["FIXTRACK_LOGGING_FORMAT", "FIXTRACK_LOG_FORMAT"],
            json!(config.logging.format),
        ),
        (
            "workflow.it_unit_branch_scoped",
            &["FIXTRACK_WORKFLOW_IT_UNIT_BRANCH_SCOPED"],
            json!(config.workflow.it_unit_branch_scoped),
        ),
    ];

    entries
        .into_iter()
        .map(|(key, env_keys, value)| ConfigField {
            key,
            value,
            source: field_source(key, env_keys, doc, doc_path),
        })
        .collect()
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("fixtrack.toml"), PathBuf::from("config/fixtrack.toml")]
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
