use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::codec::{DEFAULT_JPEG_QUALITY, DEFAULT_PREVIEW_MAX_EDGE};
use crate::fallback::FallbackOptions;
use crate::notify::DEFAULT_CHANNEL_CAPACITY;

pub const DEFAULT_BIND: &str = "127.0.0.1:8189";
pub const DEFAULT_SETTINGS_PATH: &str = "config/preview-bridge.toml";
pub const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

pub const ENV_SETTINGS_PATH: &str = "PREVIEW_BRIDGE_SETTINGS";
pub const ENV_BIND: &str = "PREVIEW_BRIDGE_BIND";
pub const ENV_JPEG_QUALITY: &str = "PREVIEW_BRIDGE_JPEG_QUALITY";
pub const ENV_PREVIEW_MAX_EDGE: &str = "PREVIEW_BRIDGE_PREVIEW_MAX_EDGE";
pub const ENV_MAX_BODY_BYTES: &str = "PREVIEW_BRIDGE_MAX_BODY_BYTES";
pub const ENV_FALLBACK_COLOR_SPACE: &str = "PREVIEW_BRIDGE_FALLBACK_COLOR_SPACE";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PushSettings {
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeSettings {
    pub bind: String,
    pub preview_max_edge: u32,
    pub jpeg_quality: u8,
    pub max_body_bytes: usize,
    pub fallback: FallbackOptions,
    pub push: PushSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            bind: String::from(DEFAULT_BIND),
            preview_max_edge: DEFAULT_PREVIEW_MAX_EDGE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            fallback: FallbackOptions::default(),
            push: PushSettings {
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BridgeSettingsOverlay {
    pub bind: Option<String>,
    pub preview_max_edge: Option<u32>,
    pub jpeg_quality: Option<u8>,
    pub max_body_bytes: Option<usize>,
    pub fallback_color_space: Option<bool>,
    pub push_channel_capacity: Option<usize>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("failed to parse settings JSON '{path}': {message}")]
    ParseJson { path: String, message: String },
    #[error("settings root must be a table")]
    RootMustBeObject,
    #[error("settings field '{field}' has invalid type")]
    InvalidFieldType { field: String },
    #[error("environment variable '{name}' has invalid value '{value}'")]
    InvalidEnv { name: String, value: String },
}

impl BridgeSettings {
    pub fn load(app_root: &Path) -> Result<Self, SettingsError> {
        let env = |name: &str| std::env::var(name).ok();
        let file = load_settings_file(app_root, env(ENV_SETTINGS_PATH).as_deref())?;
        let overrides = parse_env_overrides(env)?;
        Ok(Self::default().layered(&file).layered(&overrides))
    }

    pub fn layered(mut self, overlay: &BridgeSettingsOverlay) -> Self {
        if let Some(bind) = overlay.bind.as_deref() {
            self.bind = bind.to_string();
        }
        if let Some(max_edge) = overlay.preview_max_edge {
            self.preview_max_edge = max_edge;
        }
        if let Some(quality) = overlay.jpeg_quality {
            self.jpeg_quality = quality;
        }
        if let Some(max_body_bytes) = overlay.max_body_bytes {
            self.max_body_bytes = max_body_bytes;
        }
        if let Some(color_space) = overlay.fallback_color_space {
            self.fallback.color_space = color_space;
        }
        if let Some(capacity) = overlay.push_channel_capacity {
            self.push.channel_capacity = capacity;
        }
        self
    }
}

pub fn load_settings_file(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<BridgeSettingsOverlay, SettingsError> {
    let path = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { app_root.join(p) })
        .unwrap_or_else(|| app_root.join(DEFAULT_SETTINGS_PATH));
    if !path.exists() {
        return Ok(BridgeSettingsOverlay::default());
    }

    let raw = fs::read_to_string(path.as_path()).map_err(|error| SettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    let is_json = path
        .extension()
        .and_then(|v| v.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        serde_json::from_str::<Value>(raw.as_str()).map_err(|error| SettingsError::ParseJson {
            path: path.display().to_string(),
            message: error.to_string(),
        })?
    } else {
        let table = toml::from_str::<toml::Value>(raw.as_str()).map_err(|error| {
            SettingsError::ParseToml {
                path: path.display().to_string(),
                message: error.to_string(),
            }
        })?;
        serde_json::to_value(table).map_err(|error| SettingsError::ParseToml {
            path: path.display().to_string(),
            message: error.to_string(),
        })?
    };
    parse_settings_overlay(&parsed)
}

pub fn parse_settings_overlay(value: &Value) -> Result<BridgeSettingsOverlay, SettingsError> {
    let root = value.as_object().ok_or(SettingsError::RootMustBeObject)?;

    let mut out = BridgeSettingsOverlay::default();
    if let Some(v) = root.get("bind") {
        out.bind = Some(parse_string(v, "bind")?);
    }
    if let Some(v) = root.get("preview_max_edge") {
        out.preview_max_edge = Some(parse_positive_u32(v, "preview_max_edge")?);
    }
    if let Some(v) = root.get("jpeg_quality") {
        out.jpeg_quality = Some(parse_quality(v, "jpeg_quality")?);
    }
    if let Some(v) = root.get("max_body_bytes") {
        out.max_body_bytes = Some(parse_positive_usize(v, "max_body_bytes")?);
    }
    if let Some(fallback) = root.get("fallback") {
        let fallback = section(fallback, "fallback")?;
        if let Some(v) = fallback.get("color_space") {
            out.fallback_color_space = Some(parse_bool(v, "fallback.color_space")?);
        }
    }
    if let Some(push) = root.get("push") {
        let push = section(push, "push")?;
        if let Some(v) = push.get("channel_capacity") {
            out.push_channel_capacity =
                Some(parse_positive_u32(v, "push.channel_capacity")? as usize);
        }
    }
    Ok(out)
}

pub fn parse_env_overrides<F>(lookup: F) -> Result<BridgeSettingsOverlay, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let invalid = |name: &str, value: &str| SettingsError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    };

    let mut out = BridgeSettingsOverlay {
        bind: read(ENV_BIND),
        ..BridgeSettingsOverlay::default()
    };
    if let Some(raw) = read(ENV_JPEG_QUALITY) {
        out.jpeg_quality = Some(
            raw.parse::<u8>()
                .ok()
                .filter(|q| (1..=100).contains(q))
                .ok_or_else(|| invalid(ENV_JPEG_QUALITY, raw.as_str()))?,
        );
    }
    if let Some(raw) = read(ENV_PREVIEW_MAX_EDGE) {
        out.preview_max_edge = Some(
            raw.parse::<u32>()
                .ok()
                .filter(|edge| *edge > 0)
                .ok_or_else(|| invalid(ENV_PREVIEW_MAX_EDGE, raw.as_str()))?,
        );
    }
    if let Some(raw) = read(ENV_MAX_BODY_BYTES) {
        out.max_body_bytes = Some(
            raw.parse::<usize>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or_else(|| invalid(ENV_MAX_BODY_BYTES, raw.as_str()))?,
        );
    }
    if let Some(raw) = read(ENV_FALLBACK_COLOR_SPACE) {
        out.fallback_color_space = Some(match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(invalid(ENV_FALLBACK_COLOR_SPACE, raw.as_str())),
        });
    }
    Ok(out)
}

fn section<'a>(
    value: &'a Value,
    field: &str,
) -> Result<&'a serde_json::Map<String, Value>, SettingsError> {
    value
        .as_object()
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_string(value: &Value, field: &str) -> Result<String, SettingsError> {
    value
        .as_str()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_bool(value: &Value, field: &str) -> Result<bool, SettingsError> {
    value
        .as_bool()
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_positive_u32(value: &Value, field: &str) -> Result<u32, SettingsError> {
    value
        .as_u64()
        .filter(|v| *v > 0)
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_positive_usize(value: &Value, field: &str) -> Result<usize, SettingsError> {
    value
        .as_u64()
        .filter(|v| *v > 0)
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

fn parse_quality(value: &Value, field: &str) -> Result<u8, SettingsError> {
    value
        .as_u64()
        .filter(|v| (1..=100).contains(v))
        .map(|v| v as u8)
        .ok_or_else(|| SettingsError::InvalidFieldType {
            field: field.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(label: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        std::env::temp_dir().join(format!("preview_bridge_{label}_{stamp}"))
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = BridgeSettings::default();
        assert_eq!(settings.bind, "127.0.0.1:8189");
        assert_eq!(settings.preview_max_edge, 1024);
        assert_eq!(settings.jpeg_quality, 85);
        assert_eq!(settings.max_body_bytes, 100 * 1024 * 1024);
        assert!(!settings.fallback.color_space);
        assert_eq!(settings.push.channel_capacity, 64);
    }

    #[test]
    fn parses_nested_settings_overlay() {
        let overlay = parse_settings_overlay(&serde_json::json!({
            "bind": "0.0.0.0:9000",
            "preview_max_edge": 512,
            "jpeg_quality": 70,
            "max_body_bytes": 4096,
            "fallback": {"color_space": true},
            "push": {"channel_capacity": 8}
        }))
        .expect("overlay should parse");

        let settings = BridgeSettings::default().layered(&overlay);
        assert_eq!(settings.bind, "0.0.0.0:9000");
        assert_eq!(settings.preview_max_edge, 512);
        assert_eq!(settings.jpeg_quality, 70);
        assert_eq!(settings.max_body_bytes, 4096);
        assert!(settings.fallback.color_space);
        assert_eq!(settings.push.channel_capacity, 8);
    }

    #[test]
    fn rejects_invalid_field_types() {
        let err = parse_settings_overlay(&serde_json::json!({"jpeg_quality": 250}))
            .expect_err("quality out of range");
        assert_eq!(
            err,
            SettingsError::InvalidFieldType {
                field: String::from("jpeg_quality")
            }
        );
        assert!(parse_settings_overlay(&serde_json::json!({"fallback": true})).is_err());
        assert!(parse_settings_overlay(&serde_json::json!({"bind": "  "})).is_err());
        assert!(parse_settings_overlay(&serde_json::json!({"max_body_bytes": 0})).is_err());
    }

    #[test]
    fn loads_default_toml_file_when_present() {
        let root = temp_root("settings_toml");
        fs::create_dir_all(root.join("config")).expect("config dir");
        fs::write(
            root.join(DEFAULT_SETTINGS_PATH),
            r#"bind = "127.0.0.1:9999"
jpeg_quality = 90

[fallback]
color_space = true
"#,
        )
        .expect("settings write");

        let overlay = load_settings_file(root.as_path(), None).expect("load");
        assert_eq!(overlay.bind.as_deref(), Some("127.0.0.1:9999"));
        assert_eq!(overlay.jpeg_quality, Some(90));
        assert_eq!(overlay.fallback_color_space, Some(true));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn explicit_json_path_resolves_from_app_root() {
        let root = temp_root("settings_json");
        fs::create_dir_all(root.as_path()).expect("root dir");
        fs::write(root.join("custom.json"), r#"{"preview_max_edge": 256}"#)
            .expect("settings write");

        let overlay = load_settings_file(root.as_path(), Some("custom.json")).expect("load");
        assert_eq!(overlay.preview_max_edge, Some(256));

        let missing = load_settings_file(root.as_path(), Some("absent.toml")).expect("load");
        assert_eq!(missing, BridgeSettingsOverlay::default());

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn env_overrides_win_and_are_validated() {
        let vars = HashMap::from([
            (ENV_BIND, "0.0.0.0:1"),
            (ENV_JPEG_QUALITY, " 60 "),
            (ENV_FALLBACK_COLOR_SPACE, "on"),
            (ENV_MAX_BODY_BYTES, "8388608"),
        ]);
        let overlay = parse_env_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .expect("env overrides");
        let file = BridgeSettingsOverlay {
            bind: Some(String::from("file:1")),
            jpeg_quality: Some(95),
            ..BridgeSettingsOverlay::default()
        };

        let settings = BridgeSettings::default().layered(&file).layered(&overlay);
        assert_eq!(settings.bind, "0.0.0.0:1");
        assert_eq!(settings.jpeg_quality, 60);
        assert!(settings.fallback.color_space);
        assert_eq!(settings.max_body_bytes, 8 * 1024 * 1024);

        let err = parse_env_overrides(|name| {
            (name == ENV_PREVIEW_MAX_EDGE).then(|| String::from("wide"))
        })
        .expect_err("bad max edge");
        assert_eq!(
            err,
            SettingsError::InvalidEnv {
                name: String::from(ENV_PREVIEW_MAX_EDGE),
                value: String::from("wide")
            }
        );
    }
}
