//! Stream factory wiring flows to extractor tasks.

use std::sync::Arc;

use crate::http::{Extractor, RequestHandler};
use crate::pipeline::tasks::TaskTracker;
use crate::reassembly::{reader_stream, FlowMeta, StreamFactory, StreamSink};

/// Spawns one [`Extractor`] task per new flow.
///
/// Must be used from inside a Tokio runtime.
pub struct HttpStreamFactory {
    handler: Arc<dyn RequestHandler>,
    tasks: TaskTracker,
    max_backlog: usize,
}

impl HttpStreamFactory {
    pub fn new(handler: Arc<dyn RequestHandler>, tasks: TaskTracker, max_backlog: usize) -> Self {
        Self {
            handler,
            tasks,
            max_backlog,
        }
    }
}

impl StreamFactory for HttpStreamFactory {
    fn new_stream(&mut self, meta: &FlowMeta) -> Box<dyn StreamSink> {
        let (writer, reader) = reader_stream(self.max_backlog);
        let handler = Arc::clone(&self.handler);
        let meta = *meta;
        // Taken before the spawn, so a drain right after close_all sees it.
        let guard = self.tasks.enter();

        tokio::spawn(async move {
            let _guard = guard;
            Extractor::new(reader, meta).run(handler.as_ref()).await;
        });

        Box::new(writer)
    }
}
