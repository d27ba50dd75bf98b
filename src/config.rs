use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};

use crate::util::{env_optional, env_required, env_u64};

/// Connection settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub telegram_token: String,
    pub emby_server_url: String,
    pub emby_api_key: String,
    pub emby_user_id: Option<String>,
    /// Public base URL used for "view on server" buttons.
    pub emby_remote_url: Option<String>,
    pub tmdb_api_token: Option<String>,
    pub admin_user_ids: Vec<i64>,
    pub group_chat_ids: Vec<i64>,
    pub channel_chat_ids: Vec<i64>,
    pub private_chat_ids: Vec<i64>,
    /// Library root on disk, for category labels and relocation checks.
    pub media_base_path: Option<String>,
    pub http_max_retries: u32,
}

fn parse_id_list(name: &str) -> Result<Vec<i64>, Box<dyn std::error::Error>> {
    let raw = match env_optional(name) {
        Some(raw) => raw,
        None => return Ok(Vec::new()),
    };
    let mut out = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        out.push(part.parse::<i64>().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid id {part:?} in {name}"),
            )
        })?);
    }
    Ok(out)
}

impl Settings {
    pub(crate) fn from_env() -> Result<Settings, Box<dyn std::error::Error>> {
        let settings = Settings {
            telegram_token: env_required("TELEGRAM_BOT_TOKEN")?,
            emby_server_url: env_required("EMBY_SERVER_URL")?
                .trim_end_matches('/')
                .to_string(),
            emby_api_key: env_required("EMBY_API_KEY")?,
            emby_user_id: env_optional("EMBY_USER_ID"),
            emby_remote_url: env_optional("EMBY_REMOTE_URL")
                .map(|u| u.trim_end_matches('/').to_string()),
            tmdb_api_token: env_optional("TMDB_API_TOKEN"),
            admin_user_ids: parse_id_list("ADMIN_USER_IDS")?,
            group_chat_ids: parse_id_list("GROUP_CHAT_IDS")?,
            channel_chat_ids: parse_id_list("CHANNEL_CHAT_IDS")?,
            private_chat_ids: parse_id_list("PRIVATE_CHAT_IDS")?,
            media_base_path: env_optional("MEDIA_BASE_PATH"),
            http_max_retries: env_u64("HTTP_MAX_RETRIES", 3)? as u32,
        };
        if settings.admin_user_ids.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "ADMIN_USER_IDS must name at least one operator",
            )
            .into());
        }
        Ok(settings)
    }

    pub(crate) fn is_admin(&self, user_id: i64) -> bool {
        self.admin_user_ids.contains(&user_id)
    }
}

/// Walk a dotted path through nested objects.
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = doc;
    for segment in path.split('.') {
        cursor = cursor.as_object()?.get(segment)?;
    }
    Some(cursor)
}

/// Set a dotted path, creating intermediate objects as needed.
fn assign(doc: &mut Value, path: &str, value: Value) {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    let mut cursor = doc;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        let map = match cursor.as_object_mut() {
            Some(map) => map,
            None => return,
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        let slot = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        cursor = slot;
    }
}

struct ConfigDoc {
    overrides: Value,
    defaults: Value,
}

/// Persisted boolean settings behind the menu tree. Reads fall through to the
/// menu-derived defaults, so a fresh install answers every path without a
/// config file on disk. Mutation and persistence happen under one lock; a
/// failed write leaves the old file intact (tmp + rename).
pub(crate) struct RuntimeConfig {
    path: PathBuf,
    inner: Mutex<ConfigDoc>,
}

impl RuntimeConfig {
    pub(crate) fn load(
        path: &Path,
        defaults: impl Iterator<Item = (&'static str, bool)>,
    ) -> RuntimeConfig {
        let mut defaults_doc = Value::Object(Map::new());
        for (config_path, default) in defaults {
            assign(&mut defaults_doc, config_path, Value::Bool(default));
        }
        let overrides = match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|err| {
                eprintln!("[config] {} is not valid JSON ({err}), starting from defaults", path.display());
                Value::Object(Map::new())
            }),
            Err(_) => Value::Object(Map::new()),
        };
        RuntimeConfig {
            path: path.to_path_buf(),
            inner: Mutex::new(ConfigDoc { overrides, defaults: defaults_doc }),
        }
    }

    pub(crate) fn get_bool(&self, path: &str) -> bool {
        let doc = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        lookup(&doc.overrides, path)
            .or_else(|| lookup(&doc.defaults, path))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Flip a boolean setting and persist. Returns the new value.
    pub(crate) fn toggle(&self, path: &str) -> Result<bool, Box<dyn std::error::Error>> {
        let mut doc = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let current = lookup(&doc.overrides, path)
            .or_else(|| lookup(&doc.defaults, path))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        assign(&mut doc.overrides, path, Value::Bool(!current));
        save_overrides(&self.path, &doc.overrides)?;
        Ok(!current)
    }

    /// Check that every declared path resolves to a boolean. Run at startup
    /// so a typo in the declarations fails loudly instead of reading as
    /// permanently-off.
    pub(crate) fn verify_paths<'a>(
        &self,
        paths: impl Iterator<Item = &'a str>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let doc = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for path in paths {
            let resolved = lookup(&doc.overrides, path)
                .or_else(|| lookup(&doc.defaults, path))
                .and_then(Value::as_bool);
            if resolved.is_none() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("config path {path:?} does not resolve to a boolean"),
                )
                .into());
            }
        }
        Ok(())
    }
}

fn save_overrides(path: &Path, overrides: &Value) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(overrides)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("telemby-config-{name}-{}.json", std::process::id()))
    }

    fn sample_defaults() -> impl Iterator<Item = (&'static str, bool)> {
        [("settings.a.x", true), ("settings.a.y", false), ("settings.b", true)].into_iter()
    }

    #[test]
    fn defaults_answer_when_file_absent() {
        let path = temp_path("absent");
        let _ = std::fs::remove_file(&path);
        let cfg = RuntimeConfig::load(&path, sample_defaults());
        assert!(cfg.get_bool("settings.a.x"));
        assert!(!cfg.get_bool("settings.a.y"));
        assert!(!cfg.get_bool("settings.unknown"));
    }

    #[test]
    fn toggle_persists_and_overrides_default() {
        let path = temp_path("toggle");
        let _ = std::fs::remove_file(&path);
        {
            let cfg = RuntimeConfig::load(&path, sample_defaults());
            assert_eq!(cfg.toggle("settings.a.x").unwrap(), false);
            assert!(!cfg.get_bool("settings.a.x"));
        }
        // A fresh load sees the persisted override.
        let cfg = RuntimeConfig::load(&path, sample_defaults());
        assert!(!cfg.get_bool("settings.a.x"));
        assert!(cfg.get_bool("settings.b"));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn verify_paths_flags_unresolvable() {
        let path = temp_path("verify");
        let _ = std::fs::remove_file(&path);
        let cfg = RuntimeConfig::load(&path, sample_defaults());
        assert!(cfg.verify_paths(["settings.a.x", "settings.b"].into_iter()).is_ok());
        assert!(cfg.verify_paths(["settings.missing"].into_iter()).is_err());
    }

    #[test]
    fn assign_creates_intermediate_objects() {
        let mut doc = Value::Object(Map::new());
        assign(&mut doc, "a.b.c", Value::Bool(true));
        assert_eq!(lookup(&doc, "a.b.c"), Some(&Value::Bool(true)));
        // Overwriting a scalar midway replaces it with an object.
        assign(&mut doc, "a.b.c.d", Value::Bool(false));
        assert_eq!(lookup(&doc, "a.b.c.d"), Some(&Value::Bool(false)));
    }
}
