//! Shared harness: one mock JDWP server, one connected client, one engine.

use std::sync::Arc;

use parking_lot::Mutex;
use rigel_eval::{Anchor, EvaluationEngine, EvaluationListener, EvaluationResult};
use rigel_jdwp::mock::{MockJdwpServer, MockJdwpServerConfig, MAIN_THREAD_ID};
use rigel_jdwp::JdwpClient;
use tokio::sync::Notify;

pub struct Harness {
    pub server: MockJdwpServer,
    pub client: Arc<JdwpClient>,
    pub engine: EvaluationEngine,
}

pub async fn harness() -> Harness {
    harness_with(MockJdwpServerConfig::default()).await
}

pub async fn harness_with(config: MockJdwpServerConfig) -> Harness {
    let server = MockJdwpServer::spawn_with_config(config).await.unwrap();
    let client = Arc::new(JdwpClient::connect(server.addr()).await.unwrap());
    let engine = EvaluationEngine::new(Arc::clone(&client));
    Harness {
        server,
        client,
        engine,
    }
}

/// Queues listener callbacks so tests can await them in order.
pub struct RecordingListener {
    results: Mutex<Vec<EvaluationResult>>,
    notify: Notify,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(Vec::new()),
            notify: Notify::new(),
        })
    }

    pub async fn next(&self) -> EvaluationResult {
        loop {
            {
                let mut results = self.results.lock();
                if !results.is_empty() {
                    return results.remove(0);
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn count(&self) -> usize {
        self.results.lock().len()
    }
}

impl EvaluationListener for RecordingListener {
    fn on_result(&self, result: EvaluationResult) {
        self.results.lock().push(result);
        self.notify.notify_one();
    }
}

/// Runs one snippet on the paused main thread and waits for its result.
pub async fn eval(harness: &Harness, snippet: &str) -> EvaluationResult {
    let listener = RecordingListener::new();
    harness
        .engine
        .evaluate(snippet, MAIN_THREAD_ID, listener.clone())
        .unwrap();
    listener.next().await
}

/// Same, re-anchored on a selection.
pub async fn eval_anchored(harness: &Harness, snippet: &str, anchor: Anchor) -> EvaluationResult {
    let listener = RecordingListener::new();
    harness
        .engine
        .evaluate_anchored(snippet, MAIN_THREAD_ID, anchor, listener.clone())
        .unwrap();
    listener.next().await
}
