//! The evaluation engine.
//!
//! [`EvaluationEngine`] is the embedder-facing surface: it accepts snippet
//! requests, rejects the ones that cannot run right now, and executes the
//! rest on a background task. Results always arrive through the listener,
//! exactly once per accepted request.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rigel_jdwp::{JdwpClient, JdwpValue, ThreadId};
use serde::ser::Serializer;
use serde::Serialize;

use crate::compile;
use crate::context::{Anchor, RuntimeContext};
use crate::error::{EvalError, Result};
use crate::interpret;
use crate::snippet::{replace_pseudo_this, Snippet};
use crate::synthesize::{SourceSynthesizer, SynthesizeRequest};

/// Receives the outcome of an accepted evaluation.
pub trait EvaluationListener: Send + Sync {
    fn on_result(&self, result: EvaluationResult);
}

impl<F> EvaluationListener for F
where
    F: Fn(EvaluationResult) + Send + Sync,
{
    fn on_result(&self, result: EvaluationResult) {
        self(result)
    }
}

/// Supplies the source text of a type's compilation unit, when the
/// embedder has it. With source available, snippets are spliced into the
/// real declaring type and see its exact member scope.
pub trait SourceProvider: Send + Sync {
    fn source_for(&self, type_name: &str) -> Option<String>;
}

#[derive(Debug, Serialize)]
pub struct EvaluationResult {
    /// The snippet as submitted.
    pub snippet: String,
    /// The produced value; `None` for void outcomes and failures.
    pub value: Option<JdwpValue>,
    #[serde(serialize_with = "error_message")]
    pub error: Option<EvalError>,
}

impl EvaluationResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

fn error_message<S>(
    error: &Option<EvalError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

#[derive(Clone)]
pub struct EvaluationEngine {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<JdwpClient>,
    synthesizer: SourceSynthesizer,
    sources: Option<Arc<dyn SourceProvider>>,
    /// Threads with an evaluation in flight.
    evaluating: Mutex<HashSet<ThreadId>>,
    /// Last known suspension state per thread.
    suspended: Mutex<HashMap<ThreadId, bool>>,
}

impl EvaluationEngine {
    pub fn new(client: Arc<JdwpClient>) -> Self {
        Self::build(client, None)
    }

    pub fn with_sources(client: Arc<JdwpClient>, sources: Arc<dyn SourceProvider>) -> Self {
        Self::build(client, Some(sources))
    }

    fn build(client: Arc<JdwpClient>, sources: Option<Arc<dyn SourceProvider>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                synthesizer: SourceSynthesizer::new(),
                sources,
                evaluating: Mutex::new(HashSet::new()),
                suspended: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Records that `thread` was observed suspended, e.g. from a stop
    /// event. Requests on threads last seen running are rejected without a
    /// round trip.
    pub fn note_suspended(&self, thread: ThreadId) {
        self.inner.suspended.lock().insert(thread, true);
    }

    pub fn note_resumed(&self, thread: ThreadId) {
        self.inner.suspended.lock().insert(thread, false);
    }

    pub fn is_evaluating(&self, thread: ThreadId) -> bool {
        self.inner.evaluating.lock().contains(&thread)
    }

    /// Drops cached synthesis skeletons, e.g. after classes were
    /// redefined.
    pub fn reset(&self) {
        self.inner.synthesizer.reset();
    }

    /// Evaluates against the newest frame of `thread`.
    pub fn evaluate(
        &self,
        snippet: &str,
        thread: ThreadId,
        listener: Arc<dyn EvaluationListener>,
    ) -> Result<()> {
        self.evaluate_anchored(snippet, thread, Anchor::Frame, listener)
    }

    /// Accepts an evaluation and runs it on a background task. An `Err`
    /// here means the request was rejected and the listener will not be
    /// called; once accepted, the outcome arrives through the listener
    /// exactly once.
    pub fn evaluate_anchored(
        &self,
        snippet: &str,
        thread: ThreadId,
        anchor: Anchor,
        listener: Arc<dyn EvaluationListener>,
    ) -> Result<()> {
        if self.inner.suspended.lock().get(&thread) == Some(&false) {
            return Err(EvalError::ThreadNotSuspended);
        }
        if !self.inner.evaluating.lock().insert(thread) {
            return Err(EvalError::AlreadyEvaluating);
        }
        tracing::debug!(target: "rigel.eval", thread, snippet, "evaluation accepted");

        let inner = Arc::clone(&self.inner);
        let text = snippet.to_string();
        tokio::spawn(async move {
            let outcome = inner.run(&text, thread, anchor).await;
            inner.evaluating.lock().remove(&thread);
            let result = match outcome {
                Ok(value) => EvaluationResult {
                    snippet: text,
                    value: value.filter(|value| !value.is_void()),
                    error: None,
                },
                Err(error) => {
                    tracing::debug!(target: "rigel.eval", thread, %error, "evaluation failed");
                    EvaluationResult {
                        snippet: text,
                        value: None,
                        error: Some(error),
                    }
                }
            };
            listener.on_result(result);
        });
        Ok(())
    }
}

impl Inner {
    async fn run(
        &self,
        snippet_text: &str,
        thread: ThreadId,
        anchor: Anchor,
    ) -> Result<Option<JdwpValue>> {
        let context = match RuntimeContext::from_anchor(&self.client, thread, &anchor).await {
            Ok(context) => {
                self.suspended.lock().insert(thread, true);
                context
            }
            Err(EvalError::ThreadNotSuspended) => {
                self.suspended.lock().insert(thread, false);
                return Err(EvalError::ThreadNotSuspended);
            }
            Err(other) => return Err(other),
        };

        let text = match &context.pseudo_this {
            Some(replacement) => replace_pseudo_this(snippet_text, replacement),
            None => snippet_text.to_string(),
        };
        let snippet = Snippet::new(text).with_captured_locals(context.captured_locals());

        let line_hint = self.line_hint(&context).await;
        let source = self
            .sources
            .as_ref()
            .and_then(|sources| sources.source_for(&context.declaring_type_name));
        let unit = self.synthesizer.synthesize(&SynthesizeRequest {
            snippet: &snippet,
            declaring_type_name: &context.declaring_type_name,
            type_source: source.as_deref(),
            line_hint,
            is_static: context.is_static(),
        })?;

        let sequence = compile::compile(&unit, &context, &self.client).await?;

        // Invokes need the thread resumable; extra suspensions are peeled
        // off for the duration of the run and put back afterwards.
        let original = self.client.thread_suspend_count(thread).await?;
        for _ in 1..original {
            self.client.thread_resume(thread).await?;
        }
        let outcome = interpret::run(&sequence, &context, &self.client).await;
        let mut restore_error = None;
        for _ in 1..original {
            if let Err(error) = self.client.thread_suspend(thread).await {
                tracing::warn!(target: "rigel.eval", thread, %error, "failed to restore the suspend count");
                restore_error = Some(error);
                break;
            }
        }

        match (outcome, restore_error) {
            (Ok(value), None) => Ok(value),
            (Ok(_), Some(error)) => Err(error.into()),
            (Err(error), _) => Err(error),
        }
    }

    /// Source line of the paused location, used to pick the enclosing type
    /// during synthesis. Absent line tables are not an error.
    async fn line_hint(&self, context: &RuntimeContext) -> Option<i32> {
        let table = self
            .client
            .method_line_table(context.location.class_id, context.location.method_id)
            .await
            .ok()?;
        table.line_for_index(context.location.index)
    }
}
