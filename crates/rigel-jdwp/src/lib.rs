//! Wire-level JDWP client for the Rigel evaluation engine.
//!
//! This crate speaks the JDWP binary protocol over TCP: handshake, id-size
//! negotiation, command/reply routing, and the command subset an expression
//! evaluator needs (frame and variable inspection, field and array access,
//! method invocation, string creation, thread suspend bookkeeping). It is
//! async (`tokio`) and cancellation-aware end to end.

mod client;
mod codec;
mod types;

pub use client::{JdwpClient, JdwpClientConfig, JdwpEvent};
pub use codec::{
    class_name_to_signature, encode_command, encode_reply, signature_to_tag, JdwpReader,
    JdwpWriter, FLAG_REPLY, HANDSHAKE, HEADER_LEN,
};
pub use types::{
    error_codes, tag, ClassInfo, FieldId, FieldInfo, FrameId, FrameInfo, JdwpError, JdwpIdSizes,
    JdwpValue, LineTable, LineTableEntry, Location, MethodId, MethodInfo, ObjectId,
    ReferenceTypeId, Result, ThreadId, ThreadStatus, VariableInfo, ACC_STATIC,
    CLASS_STATUS_PREPARED, INVOKE_SINGLE_THREADED, SUSPEND_STATUS_SUSPENDED, TYPE_TAG_ARRAY,
    TYPE_TAG_CLASS, TYPE_TAG_INTERFACE,
};

// The mock server is compiled for this crate's own tests unconditionally and
// for downstream integration suites behind the `wire-test-support` feature.
#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;
