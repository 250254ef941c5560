//! The handler registry: turns a settings group's handler specs into
//! the ordered `Vec<Arc<dyn Handler>>` the dispatcher walks.

use super::{Handler, LoadBalancingHandler, ReverseProxyHandler, StaticAssetHandler};
use crate::config::{HandlerSpec, SettingsGroup};
use crate::error::ConfigError;
use std::sync::Arc;

pub struct HandlerManager;

impl HandlerManager {
    /// Builds handlers in the order they appear in the settings file — the
    /// dispatcher's first-match-wins semantics make this order load-bearing.
    pub fn build(group: &SettingsGroup) -> Result<Vec<Arc<dyn Handler>>, ConfigError> {
        group
            .tasks
            .iter()
            .map(Self::build_one)
            .collect::<Result<Vec<_>, _>>()
    }

    fn build_one(spec: &HandlerSpec) -> Result<Arc<dyn Handler>, ConfigError> {
        match spec.kind.as_str() {
            "serveStatic" => Ok(Arc::new(StaticAssetHandler::new(
                spec.criteria.clone(),
                &spec.context,
            )?)),
            "reverseProxy" => Ok(Arc::new(ReverseProxyHandler::new(
                spec.criteria.clone(),
                &spec.context,
            )?)),
            "loadBalance" => Ok(Arc::new(LoadBalancingHandler::new(
                spec.criteria.clone(),
                &spec.context,
            )?)),
            other => Err(ConfigError::UnknownHandlerType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsFile;

    #[test]
    fn builds_handlers_in_declared_order() {
        let json = r#"{
            "dev": {
                "tasks": [
                    {"type": "reverseProxy", "criteria": {"url": ["/a/"]}, "context": {"send_to": {"host": "h", "port": 1}}},
                    {"type": "serveStatic", "criteria": {"url": ["/b/"]}, "context": {"staticRoot": "."}}
                ]
            }
        }"#;
        let file: SettingsFile = serde_json::from_str(json).unwrap();
        let handlers = HandlerManager::build(&file["dev"]).unwrap();
        assert_eq!(handlers.len(), 2);
    }

    #[test]
    fn unknown_handler_type_is_fatal() {
        let json = r#"{"dev": {"tasks": [{"type": "teleport", "criteria": {}, "context": {}}]}}"#;
        let file: SettingsFile = serde_json::from_str(json).unwrap();
        assert!(matches!(
            HandlerManager::build(&file["dev"]),
            Err(ConfigError::UnknownHandlerType(ref t)) if t == "teleport"
        ));
    }
}
