//! The load-balancing handler: same wire behavior as the reverse proxy,
//! but the upstream is chosen per-request by a strategy rather than fixed.

use super::upstream::{RoundRobin, UpstreamCaller, UpstreamSelector, Weighted};
use super::{Handler, HandlerResult};
use crate::config::MatchCriteria;
use crate::error::ConfigError;
use crate::http::HttpRequest;
use crate::server::cooperative::{CoopTask, TaskIo};

pub struct LoadBalancingHandler {
    criteria: MatchCriteria,
    selector: Box<dyn UpstreamSelector>,
}

impl LoadBalancingHandler {
    pub fn new(criteria: MatchCriteria, context: &serde_json::Value) -> Result<Self, ConfigError> {
        let strategy = context
            .get("strategy")
            .and_then(|v| v.as_str())
            .ok_or(ConfigError::MissingField {
                handler_type: "loadBalance",
                field: "context.strategy",
            })?;
        let send_to = context
            .get("send_to")
            .and_then(|v| v.as_array())
            .ok_or(ConfigError::MissingField {
                handler_type: "loadBalance",
                field: "context.send_to",
            })?;

        let selector: Box<dyn UpstreamSelector> = match strategy {
            "round_robin" => {
                let upstreams = send_to
                    .iter()
                    .map(|entry| parse_host_port(entry))
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(RoundRobin::new(upstreams))
            }
            "weighted" => {
                let upstreams = send_to
                    .iter()
                    .map(|entry| {
                        let (host, port) = parse_host_port(entry)?;
                        let range = entry
                            .get("weight_range")
                            .and_then(|v| v.as_array())
                            .filter(|a| a.len() == 2)
                            .and_then(|a| Some((a[0].as_f64()?, a[1].as_f64()?)))
                            .ok_or(ConfigError::MissingField {
                                handler_type: "loadBalance",
                                field: "send_to[].weight_range",
                            })?;
                        Ok::<_, ConfigError>((host, port, range))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(Weighted::new(upstreams))
            }
            other => {
                return Err(ConfigError::InvalidContext {
                    handler_type: "loadBalance",
                    reason: format!("unknown strategy `{other}` (expected round_robin or weighted)"),
                })
            }
        };

        Ok(LoadBalancingHandler { criteria, selector })
    }
}

fn parse_host_port(entry: &serde_json::Value) -> Result<(String, u16), ConfigError> {
    let host = entry
        .get("host")
        .and_then(|v| v.as_str())
        .ok_or(ConfigError::MissingField {
            handler_type: "loadBalance",
            field: "send_to[].host",
        })?
        .to_string();
    let port = entry
        .get("port")
        .and_then(|v| v.as_u64())
        .ok_or(ConfigError::MissingField {
            handler_type: "loadBalance",
            field: "send_to[].port",
        })? as u16;
    Ok((host, port))
}

impl Handler for LoadBalancingHandler {
    fn criteria(&self) -> &MatchCriteria {
        &self.criteria
    }

    fn handle(&self, req: &HttpRequest) -> HandlerResult {
        UpstreamCaller::call_blocking(self.selector.as_ref(), &req.raw).map_err(Into::into)
    }

    fn may_block(&self) -> bool {
        true
    }

    fn handle_cooperative(&self, req: &HttpRequest, io: TaskIo) -> Box<dyn CoopTask> {
        UpstreamCaller::call_cooperative(self.selector.as_ref(), req.raw.clone(), io)
    }
}
