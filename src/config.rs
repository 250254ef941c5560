//! Settings shapes and the JSON loader.

use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// A mapping from request-attribute name to accepted values. `url` is
/// prefix-matched; everything else (`method`, header names) is exact
/// membership.
pub type MatchCriteria = HashMap<String, Vec<String>>;

/// One handler slot as it appears in the settings file.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub criteria: MatchCriteria,
    #[serde(default = "default_context")]
    pub context: serde_json::Value,
}

fn default_context() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettingsGroup {
    pub tasks: Vec<HandlerSpec>,
}

/// The whole settings file: settings-key → handler list.
pub type SettingsFile = HashMap<String, SettingsGroup>;

pub fn load_settings_file(path: &Path) -> Result<SettingsFile, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::SettingsIo {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::SettingsParse {
        path: path.display().to_string(),
        source,
    })
}

pub fn select_settings_group<'a>(
    file: &'a SettingsFile,
    key: &str,
) -> Result<&'a SettingsGroup, ConfigError> {
    file.get(key)
        .ok_or_else(|| ConfigError::UnknownSettingsKey(key.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_settings_document() {
        let json = r#"{
            "dev": {
                "tasks": [
                    {
                        "type": "serveStatic",
                        "criteria": {"url": ["/static/"]},
                        "context": {"staticRoot": "/srv/www"}
                    },
                    {
                        "type": "loadBalance",
                        "criteria": {"url": ["/api/"]},
                        "context": {
                            "strategy": "round_robin",
                            "send_to": [
                                {"host": "10.0.0.1", "port": 8080, "weight_range": null},
                                {"host": "10.0.0.2", "port": 8080, "weight_range": null}
                            ]
                        }
                    }
                ]
            }
        }"#;
        let file: SettingsFile = serde_json::from_str(json).unwrap();
        let group = select_settings_group(&file, "dev").unwrap();
        assert_eq!(group.tasks.len(), 2);
        assert_eq!(group.tasks[0].kind, "serveStatic");
        assert_eq!(group.tasks[0].criteria["url"], vec!["/static/".to_string()]);
    }

    #[test]
    fn unknown_settings_key_is_an_error() {
        let file: SettingsFile = serde_json::from_str(r#"{"dev": {"tasks": []}}"#).unwrap();
        assert!(matches!(
            select_settings_group(&file, "prod"),
            Err(ConfigError::UnknownSettingsKey(_))
        ));
    }
}
