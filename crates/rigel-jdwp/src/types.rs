//! Shared wire-level types: ids, values, descriptors and the error enum.

use serde::Serialize;
use thiserror::Error;

pub type ObjectId = u64;
pub type ThreadId = u64;
pub type FrameId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;

/// Field sizes negotiated via `VirtualMachine.IDSizes`.
///
/// Every id on the wire is encoded with the size the VM reports here; modern
/// JVMs use 8 bytes across the board, which is also the default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JdwpIdSizes {
    pub field_id: usize,
    pub method_id: usize,
    pub object_id: usize,
    pub reference_type_id: usize,
    pub frame_id: usize,
}

impl Default for JdwpIdSizes {
    fn default() -> Self {
        Self {
            field_id: 8,
            method_id: 8,
            object_id: 8,
            reference_type_id: 8,
            frame_id: 8,
        }
    }
}

/// JDWP value tag bytes.
pub mod tag {
    pub const ARRAY: u8 = b'[';
    pub const BYTE: u8 = b'B';
    pub const CHAR: u8 = b'C';
    pub const OBJECT: u8 = b'L';
    pub const FLOAT: u8 = b'F';
    pub const DOUBLE: u8 = b'D';
    pub const INT: u8 = b'I';
    pub const LONG: u8 = b'J';
    pub const SHORT: u8 = b'S';
    pub const VOID: u8 = b'V';
    pub const BOOLEAN: u8 = b'Z';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';

    pub fn is_primitive(t: u8) -> bool {
        matches!(
            t,
            BOOLEAN | BYTE | CHAR | SHORT | INT | LONG | FLOAT | DOUBLE
        )
    }
}

/// JDWP reference type tags (`ClassesBySignature`, locations).
pub const TYPE_TAG_CLASS: u8 = 1;
pub const TYPE_TAG_INTERFACE: u8 = 2;
pub const TYPE_TAG_ARRAY: u8 = 3;

/// Invoke option: resume only the invoking thread for the duration of the
/// call. Evaluation always invokes single-threaded so the rest of the target
/// stays parked.
pub const INVOKE_SINGLE_THREADED: u32 = 0x01;

/// `ThreadReference.Status` suspend-status bit.
pub const SUSPEND_STATUS_SUSPENDED: u32 = 0x01;

/// Class status bits reported by `ClassesBySignature`.
pub const CLASS_STATUS_PREPARED: u32 = 0x02;

/// Field/method modifier bit (`ACC_STATIC`).
pub const ACC_STATIC: u32 = 0x0008;

/// JDWP reply error codes the evaluation paths care about.
pub mod error_codes {
    pub const INVALID_THREAD: u16 = 10;
    pub const THREAD_NOT_SUSPENDED: u16 = 13;
    pub const INVALID_OBJECT: u16 = 20;
    pub const INVALID_CLASS: u16 = 21;
    pub const INVALID_METHODID: u16 = 23;
    pub const INVALID_FIELDID: u16 = 25;
    pub const INVALID_FRAMEID: u16 = 30;
    pub const INVALID_SLOT: u16 = 35;
    pub const NOT_FOUND: u16 = 41;
    pub const UNSUPPORTED_VERSION: u16 = 68;
    pub const NOT_IMPLEMENTED: u16 = 99;
    pub const ABSENT_INFORMATION: u16 = 101;
    pub const VM_DEAD: u16 = 112;
    pub const INVALID_LENGTH: u16 = 504;
}

/// A value as transported over the wire.
///
/// Object-like values are opaque handles; reading their contents is always
/// another round trip. `Null` is the wire's "object id 0" in either
/// direction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum JdwpValue {
    Void,
    Null,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object { tag: u8, id: ObjectId },
}

impl JdwpValue {
    pub fn tag(&self) -> u8 {
        match *self {
            JdwpValue::Void => tag::VOID,
            JdwpValue::Null => tag::OBJECT,
            JdwpValue::Boolean(_) => tag::BOOLEAN,
            JdwpValue::Byte(_) => tag::BYTE,
            JdwpValue::Char(_) => tag::CHAR,
            JdwpValue::Short(_) => tag::SHORT,
            JdwpValue::Int(_) => tag::INT,
            JdwpValue::Long(_) => tag::LONG,
            JdwpValue::Float(_) => tag::FLOAT,
            JdwpValue::Double(_) => tag::DOUBLE,
            JdwpValue::Object { tag, .. } => tag,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, JdwpValue::Null)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, JdwpValue::Void)
    }

    pub fn object_id(&self) -> Option<ObjectId> {
        match *self {
            JdwpValue::Object { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Widening read as a Java `boolean`; only booleans qualify.
    pub fn as_boolean(&self) -> Option<bool> {
        match *self {
            JdwpValue::Boolean(v) => Some(v),
            _ => None,
        }
    }

    /// Widening read as a Java `int` (byte/short/char/int).
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            JdwpValue::Byte(v) => Some(v as i32),
            JdwpValue::Short(v) => Some(v as i32),
            JdwpValue::Char(v) => Some(v as i32),
            JdwpValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Widening read as a Java `long` (all integral types).
    pub fn as_long(&self) -> Option<i64> {
        match *self {
            JdwpValue::Long(v) => Some(v),
            _ => self.as_int().map(i64::from),
        }
    }

    /// Widening read as a Java `float` (integrals and float).
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            JdwpValue::Float(v) => Some(v),
            JdwpValue::Long(v) => Some(v as f32),
            _ => self.as_int().map(|v| v as f32),
        }
    }

    /// Widening read as a Java `double` (every numeric type).
    pub fn as_double(&self) -> Option<f64> {
        match *self {
            JdwpValue::Double(v) => Some(v),
            JdwpValue::Float(v) => Some(f64::from(v)),
            JdwpValue::Long(v) => Some(v as f64),
            _ => self.as_int().map(f64::from),
        }
    }
}

/// A code position inside the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    pub type_tag: u8,
    pub class_id: ReferenceTypeId,
    pub method_id: MethodId,
    pub index: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub location: Location,
}

/// One row of a `Method.VariableTable` reply.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableInfo {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub length: u32,
    pub slot: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub field_id: FieldId,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub mod_bits: u32,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & ACC_STATIC != 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodInfo {
    pub method_id: MethodId,
    pub name: String,
    pub signature: String,
    pub generic_signature: Option<String>,
    pub mod_bits: u32,
}

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.mod_bits & ACC_STATIC != 0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClassInfo {
    pub ref_type_tag: u8,
    pub type_id: ReferenceTypeId,
    pub status: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineTableEntry {
    pub code_index: u64,
    pub line: i32,
}

/// `Method.LineTable` reply: the method's code-index range plus the
/// index-to-line mapping.
#[derive(Clone, Debug, PartialEq)]
pub struct LineTable {
    pub start: u64,
    pub end: u64,
    pub lines: Vec<LineTableEntry>,
}

impl LineTable {
    /// Source line for a code index: the last entry at or before `index`.
    pub fn line_for_index(&self, index: u64) -> Option<i32> {
        self.lines
            .iter()
            .take_while(|entry| entry.code_index <= index)
            .last()
            .map(|entry| entry.line)
    }
}

/// `ThreadReference.Status` reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadStatus {
    pub thread_status: u32,
    pub suspend_status: u32,
}

impl ThreadStatus {
    pub fn is_suspended(&self) -> bool {
        self.suspend_status & SUSPEND_STATUS_SUSPENDED != 0
    }
}

#[derive(Debug, Error)]
pub enum JdwpError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("JDWP handshake failed")]
    Handshake,
    #[error("JDWP reply timed out")]
    Timeout,
    #[error("JDWP client shut down")]
    Cancelled,
    #[error("JDWP connection closed")]
    ConnectionClosed,
    #[error("JDWP command failed with error code {0}")]
    VmError(u16),
    #[error("JDWP protocol error: {0}")]
    Protocol(String),
}

impl JdwpError {
    /// True when the failure means the target is gone rather than that one
    /// command misfired.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            JdwpError::Io(_)
                | JdwpError::Cancelled
                | JdwpError::ConnectionClosed
                | JdwpError::VmError(error_codes::VM_DEAD)
        )
    }
}

pub type Result<T> = std::result::Result<T, JdwpError>;
