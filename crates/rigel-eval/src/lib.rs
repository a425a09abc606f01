//! Snippet evaluation for suspended JVM threads.
//!
//! A snippet arrives as plain Java text and leaves as a value (or an
//! error) computed in the paused target. The pipeline: capture the paused
//! frame's name scope ([`context`]), wrap the snippet into a compilable
//! unit ([`synthesize`]), lower it to a flat instruction sequence against
//! that scope ([`compile`]), and execute the sequence over JDWP
//! ([`interpret`]). [`engine`] ties the stages together behind an
//! accept/listen surface and keeps per-thread state.
//!
//! Primitive arithmetic runs locally with Java semantics; anything that
//! touches an object (field reads, method calls, string concatenation) is
//! delegated to the target VM, so results match what the debuggee itself
//! would compute.

pub mod compile;
pub mod context;
pub mod engine;
pub mod error;
pub mod instructions;
pub mod interpret;
pub mod snippet;
pub mod synthesize;

pub use context::{
    type_name_from_signature, Anchor, Binding, BindingKind, BindingSlot, RuntimeContext,
    ARRAY_THIS,
};
pub use engine::{EvaluationEngine, EvaluationListener, EvaluationResult, SourceProvider};
pub use error::{EvalError, Result};
pub use instructions::{
    BinaryOp, CastKind, Instruction, InstructionSequence, Op, ResultKind, UnaryOp,
};
pub use snippet::{replace_pseudo_this, Snippet};
pub use synthesize::{SourceSynthesizer, SynthesizeRequest, SynthesizedUnit};
