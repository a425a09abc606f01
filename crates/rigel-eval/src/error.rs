//! Evaluation error taxonomy.

use rigel_jdwp::{error_codes, JdwpError, ObjectId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EvalError>;

/// Everything that can go wrong between receiving a snippet and delivering
/// its result.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The snippet does not parse or does not type-check. `offset` is a
    /// byte offset into the snippet text.
    #[error("{message}")]
    Compilation { message: String, offset: usize },
    #[error("cannot resolve `{0}`")]
    Unresolved(String),
    #[error("the selection does not identify a single value")]
    AmbiguousSelection,
    #[error("no frame or selection to evaluate against")]
    NoActiveContext,
    #[error("the thread is not suspended")]
    ThreadNotSuspended,
    #[error("an evaluation is already running on this thread")]
    AlreadyEvaluating,
    /// The target threw during an invoke; the payload is the handle of the
    /// thrown object.
    #[error("the target threw an exception during evaluation")]
    RemoteException(ObjectId),
    #[error("the target disconnected during evaluation")]
    TargetDisconnected,
    #[error("division by zero")]
    DivideByZero,
    #[error("a null value was dereferenced")]
    NullDereference,
    /// A compiler/interpreter inconsistency, reported instead of panicking.
    #[error("internal evaluation error: {0}")]
    Internal(String),
    #[error(transparent)]
    Jdwp(JdwpError),
}

impl From<JdwpError> for EvalError {
    /// Folds wire failures into the evaluation taxonomy: anything that
    /// means "the target is gone" becomes [`EvalError::TargetDisconnected`],
    /// and a thread-state refusal from the VM becomes
    /// [`EvalError::ThreadNotSuspended`].
    fn from(err: JdwpError) -> Self {
        if err.is_disconnect() {
            return EvalError::TargetDisconnected;
        }
        match err {
            JdwpError::VmError(error_codes::THREAD_NOT_SUSPENDED) => EvalError::ThreadNotSuspended,
            other => EvalError::Jdwp(other),
        }
    }
}
