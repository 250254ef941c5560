//! The server dispatcher: three interchangeable execution models sharing
//! one per-connection contract and one handler list.

pub mod cooperative;
pub mod event_loop;
pub mod worker_pool;

use crate::handlers::Handler;
use crate::http::{HttpRequest, HttpResponse, MAX_REQUEST_SIZE};
use crate::stats::Stats;
use std::sync::Arc;

/// Which execution model to run the accept loop under. Chosen once at
/// server construction, never per-request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    EventLoop,
    WorkerPool,
    Cooperative,
}

impl std::str::FromStr for ExecutionModel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event-loop" => Ok(ExecutionModel::EventLoop),
            "worker-pool" => Ok(ExecutionModel::WorkerPool),
            "cooperative" => Ok(ExecutionModel::Cooperative),
            other => Err(format!(
                "unknown execution model `{other}` (expected event-loop, worker-pool, or cooperative)"
            )),
        }
    }
}

/// The ordered handler list plus shared statistics, common to all three
/// models.
pub struct Dispatcher {
    pub handlers: Vec<Arc<dyn Handler>>,
    pub stats: Arc<Stats>,
}

impl Dispatcher {
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Dispatcher {
            handlers,
            stats: Arc::new(Stats::new()),
        }
    }

    /// Walks the handler list in order; the first match produces the
    /// response. No match is a 400.
    pub fn dispatch(&self, req: &HttpRequest) -> HttpResponse {
        self.stats.inc_requests_recv();
        for handler in &self.handlers {
            if handler.should_handle(req) {
                let response = match handler.handle(req) {
                    Ok(response) => response,
                    Err(err) => handler_error_response(&err),
                };
                self.stats.inc_responses_sent();
                return response;
            }
        }
        self.stats.inc_responses_sent();
        HttpResponse::new(
            400,
            b"No handler could handle your request, check the matching criteria in settings.json"
                .to_vec(),
        )
    }
}

fn handler_error_response(err: &crate::handlers::HandlerError) -> HttpResponse {
    use crate::error::UpstreamError;
    use crate::handlers::HandlerError;
    match err {
        HandlerError::Upstream(UpstreamError::Unavailable(reason)) => {
            HttpResponse::new(502, reason.clone().into_bytes())
        }
        HandlerError::Upstream(UpstreamError::Malformed(reason)) => {
            HttpResponse::new(502, reason.clone().into_bytes())
        }
        HandlerError::Upstream(UpstreamError::UnreachableRange(r)) => {
            // A misconfigured weight table, not a runtime condition — still
            // must produce a response rather than panicking mid-request.
            HttpResponse::new(
                502,
                format!("load balancer misconfigured: no range contains {r}").into_bytes(),
            )
        }
        HandlerError::Cancelled => HttpResponse::new(502, b"upstream call cancelled".to_vec()),
    }
}

/// Reads at most one [`MAX_REQUEST_SIZE`]-byte chunk and parses it as a full
/// request. A known limitation, not a full incremental HTTP reader: a
/// request split across reads is never reassembled.
pub fn parse_one_shot(buf: &[u8]) -> Result<HttpRequest, HttpResponse> {
    HttpRequest::parse(buf).map_err(|err| HttpResponse::new(400, err.to_string().into_bytes()))
}

pub(crate) const READ_CHUNK: usize = MAX_REQUEST_SIZE;
