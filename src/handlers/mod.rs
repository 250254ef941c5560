//! The handler contract and the three built-in handlers: static files,
//! reverse proxy, and load balancing.

mod load_balance;
mod manager;
mod reverse_proxy;
mod static_asset;
mod upstream;

pub use load_balance::LoadBalancingHandler;
pub use manager::HandlerManager;
pub use reverse_proxy::ReverseProxyHandler;
pub use static_asset::StaticAssetHandler;
pub use upstream::{UpstreamCaller, UpstreamSelector};

use crate::config::MatchCriteria;
use crate::error::UpstreamError;
use crate::http::{HttpRequest, HttpResponse};
use crate::server::cooperative::CoopTask;

/// What a handler produced, or why it couldn't.
pub type HandlerResult = Result<HttpResponse, HandlerError>;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("cooperative task cancelled")]
    Cancelled,
}

/// Common shape every handler exposes. `handle` is the blocking path
/// used by Models A/B; `handle_cooperative` is the suspendable path used by
/// Model C. Handlers with no I/O of their own get `handle_cooperative` for
/// free — it just wraps `handle`'s result in an already-complete task.
pub trait Handler: Send + Sync {
    fn criteria(&self) -> &MatchCriteria;

    /// Pure, no I/O, walks `criteria` in order and returns false on the
    /// first unsatisfied predicate. `url` is prefix-matched; everything
    /// else is exact membership.
    fn should_handle(&self, req: &HttpRequest) -> bool {
        for (attribute, accepted) in self.criteria() {
            let actual = match attribute.as_str() {
                "url" => &req.url,
                "method" => &req.method,
                header => match req.header(header) {
                    Some(value) => value,
                    None => return false,
                },
            };
            let matched = if attribute == "url" {
                accepted.iter().any(|prefix| actual.starts_with(prefix.as_str()))
            } else {
                accepted.iter().any(|v| v == actual)
            };
            if !matched {
                return false;
            }
        }
        true
    }

    fn handle(&self, req: &HttpRequest) -> HandlerResult;

    /// Whether `handle` can block on network I/O. Model A's event loop runs
    /// every handler on its one thread, so a `true` here is a startup
    /// warning under that model, not an error.
    fn may_block(&self) -> bool {
        false
    }

    fn handle_cooperative(
        &self,
        req: &HttpRequest,
        io: crate::server::cooperative::TaskIo,
    ) -> Box<dyn CoopTask> {
        let _ = &io;
        Box::new(ReadyTask(Some(self.handle(req))))
    }
}

/// A cooperative task that is already done when first stepped — used by
/// handlers (like [`StaticAssetHandler`]) that never suspend.
struct ReadyTask(Option<HandlerResult>);

impl CoopTask for ReadyTask {
    fn step(&mut self) -> crate::server::cooperative::CoopStep {
        crate::server::cooperative::CoopStep::Ready(
            self.0.take().expect("ReadyTask stepped twice"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Dummy(MatchCriteria);
    impl Handler for Dummy {
        fn criteria(&self) -> &MatchCriteria {
            &self.0
        }
        fn handle(&self, _req: &HttpRequest) -> HandlerResult {
            Ok(HttpResponse::new(200, Vec::new()))
        }
    }

    fn req(method: &str, url: &str, headers: &[(&str, &str)]) -> HttpRequest {
        let mut raw = format!("{method} {url} HTTP/1.1\r\n");
        for (k, v) in headers {
            raw.push_str(&format!("{k}: {v}\r\n"));
        }
        raw.push_str("\r\n");
        HttpRequest::parse(raw.as_bytes()).unwrap()
    }

    #[test]
    fn empty_criteria_matches_everything() {
        let h = Dummy(HashMap::new());
        assert!(h.should_handle(&req("GET", "/anything", &[])));
    }

    #[test]
    fn url_criteria_is_prefix_match() {
        let mut c = HashMap::new();
        c.insert("url".to_string(), vec!["/static/".to_string()]);
        let h = Dummy(c);
        assert!(h.should_handle(&req("GET", "/static/logo.png", &[])));
        assert!(!h.should_handle(&req("GET", "/images/logo.png", &[])));
    }

    #[test]
    fn method_criteria_is_exact_membership() {
        let mut c = HashMap::new();
        c.insert("method".to_string(), vec!["GET".to_string(), "HEAD".to_string()]);
        let h = Dummy(c);
        assert!(h.should_handle(&req("GET", "/", &[])));
        assert!(!h.should_handle(&req("POST", "/", &[])));
    }

    #[test]
    fn header_criteria_requires_presence_and_membership() {
        let mut c = HashMap::new();
        c.insert("X-Tenant".to_string(), vec!["acme".to_string()]);
        let h = Dummy(c);
        assert!(h.should_handle(&req("GET", "/", &[("X-Tenant", "acme")])));
        assert!(!h.should_handle(&req("GET", "/", &[("X-Tenant", "other")])));
        assert!(!h.should_handle(&req("GET", "/", &[])));
    }
}
