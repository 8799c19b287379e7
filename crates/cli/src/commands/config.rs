use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use koperasi_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Entry {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_key,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let entry = |key, env_key, value: String| Entry { key, env_key, value };

    vec![
        entry("database.url", "KOPERASI_DATABASE_URL", config.database.url.clone()),
        entry(
            "database.max_connections",
            "KOPERASI_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            "KOPERASI_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        entry(
            "server.bind_address",
            "KOPERASI_SERVER_BIND_ADDRESS",
            config.server.bind_address.clone(),
        ),
        entry("server.port", "KOPERASI_SERVER_PORT", config.server.port.to_string()),
        entry(
            "server.graceful_shutdown_secs",
            "KOPERASI_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        entry(
            "auth.token_secret",
            "KOPERASI_AUTH_TOKEN_SECRET",
            redact_secret(config.auth.token_secret.expose_secret()),
        ),
        entry(
            "auth.access_ttl_minutes",
            "KOPERASI_AUTH_ACCESS_TTL_MINUTES",
            config.auth.access_ttl_minutes.to_string(),
        ),
        entry(
            "auth.refresh_ttl_days",
            "KOPERASI_AUTH_REFRESH_TTL_DAYS",
            config.auth.refresh_ttl_days.to_string(),
        ),
        entry(
            "auth.cookie_secure",
            "KOPERASI_AUTH_COOKIE_SECURE",
            config.auth.cookie_secure.to_string(),
        ),
        entry(
            "mail.transport",
            "KOPERASI_MAIL_TRANSPORT",
            config.mail.transport.as_str().to_string(),
        ),
        entry(
            "mail.relay_url",
            "KOPERASI_MAIL_RELAY_URL",
            config.mail.relay_url.clone().unwrap_or_else(|| "<unset>".to_string()),
        ),
        entry(
            "mail.api_key",
            "KOPERASI_MAIL_API_KEY",
            match &config.mail.api_key {
                Some(key) => redact_secret(key.expose_secret()),
                None => "<unset>".to_string(),
            },
        ),
        entry("mail.from_address", "KOPERASI_MAIL_FROM_ADDRESS", config.mail.from_address.clone()),
        entry("logging.level", "KOPERASI_LOGGING_LEVEL", config.logging.level.clone()),
        entry("logging.format", "KOPERASI_LOGGING_FORMAT", format!("{:?}", config.logging.format)),
        entry("locale", "KOPERASI_LOCALE", format!("{:?}", config.locale)),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("koperasi.toml"), PathBuf::from("config/koperasi.toml")]
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
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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

/// Only the length of a secret is ever shown.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted:{} chars>", trimmed.chars().count())
}

#[cfg(test)]
mod tests {
    use super::{contains_path, redact_secret};

    #[test]
    fn secrets_never_leak_their_contents() {
        assert_eq!(redact_secret("   "), "<empty>");
        let rendered = redact_secret("super-secret-signing-key");
        assert_eq!(rendered, "<redacted:24 chars>");
        assert!(!rendered.contains("secret-signing"));
    }

    #[test]
    fn nested_keys_are_found_in_the_file_document() {
        let doc: toml::Value = "[auth]\ntoken_secret = \"x\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "auth.token_secret"));
        assert!(!contains_path(&doc, "auth.refresh_ttl_days"));
        assert!(!contains_path(&doc, "mail.transport"));
    }
}
