//! Engine-level protocol behavior: acceptance, rejection, suspend-count
//! restoration, result delivery.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rigel_eval::{EvalError, EvaluationEngine, SourceProvider};
use rigel_jdwp::mock::{
    MockJdwpServer, MockJdwpServerConfig, EXCEPTION_OBJECT_ID, MAIN_THREAD_ID,
};
use rigel_jdwp::{JdwpClient, JdwpValue};
use serde_json::json;

use super::common::{eval, harness, harness_with, RecordingListener};

#[tokio::test]
async fn a_second_evaluation_on_the_same_thread_is_rejected() {
    let mut config = MockJdwpServerConfig::default();
    config.reply_delay = Some(Duration::from_millis(25));
    let h = harness_with(config).await;

    let first = RecordingListener::new();
    h.engine
        .evaluate("1 + 1", MAIN_THREAD_ID, first.clone())
        .unwrap();
    assert!(h.engine.is_evaluating(MAIN_THREAD_ID));

    // Rejected synchronously; its listener must never fire.
    let second = RecordingListener::new();
    let rejected = h
        .engine
        .evaluate("2 + 2", MAIN_THREAD_ID, second.clone());
    assert!(matches!(rejected, Err(EvalError::AlreadyEvaluating)));

    let result = first.next().await;
    assert_eq!(result.value, Some(JdwpValue::Int(2)));
    assert!(!h.engine.is_evaluating(MAIN_THREAD_ID));
    assert_eq!(second.count(), 0);
}

#[tokio::test]
async fn a_running_thread_fails_once_then_rejects_synchronously() {
    let mut config = MockJdwpServerConfig::default();
    config.scene.threads[0].suspend_count = 0;
    let h = harness_with(config).await;

    // The first attempt is accepted; the engine only learns the thread
    // state from the target's refusal.
    let listener = RecordingListener::new();
    h.engine
        .evaluate("x", MAIN_THREAD_ID, listener.clone())
        .unwrap();
    let result = listener.next().await;
    assert!(matches!(result.error, Some(EvalError::ThreadNotSuspended)));

    let served_before = h.server.commands_served();
    let second = RecordingListener::new();
    let rejected = h.engine.evaluate("x", MAIN_THREAD_ID, second.clone());
    assert!(matches!(rejected, Err(EvalError::ThreadNotSuspended)));
    assert_eq!(second.count(), 0);
    assert_eq!(h.server.commands_served(), served_before);
}

#[tokio::test]
async fn suspension_notes_gate_acceptance() {
    let h = harness().await;
    h.engine.note_resumed(MAIN_THREAD_ID);

    let listener = RecordingListener::new();
    let rejected = h.engine.evaluate("x", MAIN_THREAD_ID, listener.clone());
    assert!(matches!(rejected, Err(EvalError::ThreadNotSuspended)));

    h.engine.note_suspended(MAIN_THREAD_ID);
    h.engine
        .evaluate("x", MAIN_THREAD_ID, listener.clone())
        .unwrap();
    assert_eq!(listener.next().await.value, Some(JdwpValue::Int(42)));
}

#[tokio::test]
async fn a_deep_suspend_count_is_unwound_and_restored() {
    // Invokes only run when the thread's count is down to one; the engine
    // must resume the surplus suspensions first and put them back after.
    let baseline = harness().await;
    assert_eq!(
        eval(&baseline, "getAnswer()").await.value,
        Some(JdwpValue::Int(42))
    );
    let flat_run = baseline.server.commands_served();

    let mut config = MockJdwpServerConfig::default();
    config.scene.threads[0].suspend_count = 3;
    let h = harness_with(config).await;

    let result = eval(&h, "getAnswer()").await;
    assert_eq!(result.value, Some(JdwpValue::Int(42)));
    assert_eq!(h.server.suspend_count(MAIN_THREAD_ID).await, 3);
    // Two resumes on the way in and two suspends on the way back out.
    assert_eq!(h.server.commands_served(), flat_run + 4);
}

#[tokio::test]
async fn the_suspend_count_is_restored_after_a_thrown_exception() {
    let mut config = MockJdwpServerConfig::default();
    config.scene.threads[0].suspend_count = 2;
    let h = harness_with(config).await;

    let result = eval(&h, "boom();").await;
    assert!(matches!(
        result.error,
        Some(EvalError::RemoteException(EXCEPTION_OBJECT_ID))
    ));
    assert_eq!(h.server.suspend_count(MAIN_THREAD_ID).await, 2);
}

#[tokio::test]
async fn a_dropped_connection_reports_disconnect_exactly_once() {
    let mut config = MockJdwpServerConfig::default();
    config.drop_connection_on_invoke = true;
    let h = harness_with(config).await;

    let listener = RecordingListener::new();
    h.engine
        .evaluate("getAnswer()", MAIN_THREAD_ID, listener.clone())
        .unwrap();
    let result = listener.next().await;
    assert!(matches!(result.error, Some(EvalError::TargetDisconnected)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(listener.count(), 0, "the listener fired more than once");
}

#[tokio::test]
async fn results_serialize_for_embedders() {
    let h = harness().await;

    let ok = eval(&h, "1 + 2").await;
    assert_eq!(
        serde_json::to_value(&ok).unwrap(),
        json!({ "snippet": "1 + 2", "value": { "Int": 3 }, "error": null })
    );

    let failed = eval(&h, "1 / 0").await;
    assert!(failed.is_error());
    assert_eq!(
        serde_json::to_value(&failed).unwrap(),
        json!({ "snippet": "1 / 0", "value": null, "error": "division by zero" })
    );
}

#[tokio::test]
async fn a_source_provider_feeds_source_based_synthesis() {
    struct FixedSource;
    impl SourceProvider for FixedSource {
        fn source_for(&self, type_name: &str) -> Option<String> {
            (type_name == "Main").then(|| {
                "public class Main {\n    private int count;\n\n    public void run() {\n        int x = 0;\n    }\n}\n"
                    .to_string()
            })
        }
    }

    let server = MockJdwpServer::spawn().await.unwrap();
    let client = Arc::new(JdwpClient::connect(server.addr()).await.unwrap());
    let engine = EvaluationEngine::with_sources(Arc::clone(&client), Arc::new(FixedSource));

    // Splicing into the provided source must not disturb evaluation.
    let listener = RecordingListener::new();
    engine
        .evaluate("x + count", MAIN_THREAD_ID, listener.clone())
        .unwrap();
    assert_eq!(listener.next().await.value, Some(JdwpValue::Int(52)));
}

#[tokio::test]
async fn an_unrestorable_suspend_count_leaves_a_warning() {
    use std::fmt;

    use parking_lot::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::{layer::Context, prelude::*, Layer};

    struct WarningLayer {
        messages: Arc<Mutex<Vec<String>>>,
    }

    struct MessageText(String);

    impl Visit for MessageText {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: Subscriber> Layer<S> for WarningLayer {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let metadata = event.metadata();
            if *metadata.level() != Level::WARN || metadata.target() != "rigel.eval" {
                return;
            }
            let mut text = MessageText(String::new());
            event.record(&mut text);
            self.messages.lock().push(text.0);
        }
    }

    let messages = Arc::new(Mutex::new(Vec::new()));
    let layer = WarningLayer {
        messages: Arc::clone(&messages),
    };
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

    // The connection dies mid-invoke, so the two surplus suspensions can
    // never be put back.
    let mut config = MockJdwpServerConfig::default();
    config.scene.threads[0].suspend_count = 3;
    config.drop_connection_on_invoke = true;
    let h = harness_with(config).await;

    let result = eval(&h, "getAnswer()").await;
    assert!(matches!(result.error, Some(EvalError::TargetDisconnected)));

    let messages = messages.lock();
    assert_eq!(messages.len(), 1, "warnings: {messages:?}");
    assert!(messages[0].contains("restore"));
}
