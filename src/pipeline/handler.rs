//! Per-request work: decide, then forward.

use std::sync::Arc;
use std::time::Duration;

use crate::forward::Forwarder;
use crate::http::{CapturedRequest, RequestHandler};
use crate::pipeline::tasks::TaskTracker;
use crate::sampling::{Decision, FilterEngine};

/// Runs every extracted request through the filter engine on its own task
/// and forwards the survivors.
pub struct ShadowHandler {
    engine: Arc<FilterEngine>,
    forwarder: Forwarder,
    tasks: TaskTracker,
}

impl ShadowHandler {
    pub fn new(engine: Arc<FilterEngine>, forwarder: Forwarder) -> Self {
        Self {
            engine,
            forwarder,
            tasks: TaskTracker::new(),
        }
    }

    /// Tracker shared with the stream factory, so extractors still parsing
    /// count toward the drain too.
    pub fn tasks(&self) -> TaskTracker {
        self.tasks.clone()
    }

    /// Extractor and request tasks that have not finished yet.
    pub fn in_flight(&self) -> usize {
        self.tasks.active()
    }

    /// Wait until no extractor or request task is running, or `timeout` passes.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tasks.drain(timeout).await
    }
}

impl RequestHandler for ShadowHandler {
    fn handle(&self, request: CapturedRequest) {
        let engine = Arc::clone(&self.engine);
        let forwarder = self.forwarder.clone();
        let guard = self.tasks.enter();

        tokio::spawn(async move {
            let _guard = guard;
            match engine.decide(&request) {
                Decision::Forward { url } => {
                    let _ = forwarder.forward(request, &url).await;
                }
                Decision::Drop(reason) => {
                    tracing::trace!(
                        reason = %reason,
                        client = %request.client_ip(),
                        target = %request.target,
                        "Request not forwarded"
                    );
                }
            }
        });
    }
}
