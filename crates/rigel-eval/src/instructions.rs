//! The flat instruction set the compiler emits and the interpreter runs.
//!
//! Instructions form a linear sequence executed by a program counter; jumps
//! carry relative offsets so a sequence can be relocated as a whole. The
//! arithmetic itself is pure and lives here too, keeping the interpreter to
//! stack handling and target traffic.

use rigel_jdwp::JdwpValue;

use crate::error::{EvalError, Result};

/// Dispatch type for binary and unary computations, decided statically via
/// Java's binary numeric promotion. `Str` covers every reference operand;
/// references only ever concatenate or compare by identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultKind {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Str,
}

/// Cast target. Unlike [`ResultKind`] this includes the narrow integral
/// types, since casts are the one place narrowing is allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Reference,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Times,
    Divide,
    Remainder,
    LeftShift,
    RightShift,
    UnsignedRightShift,
    And,
    Or,
    Xor,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Equal,
    NotEqual,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    BitNot,
    Plus,
}

/// One instruction plus the byte offset of the snippet text it came from,
/// for positioned runtime diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub op: Op,
    pub start: usize,
}

pub type InstructionSequence = Vec<Instruction>;

#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    PushNull,
    PushConstant(JdwpValue),
    /// Materializes a string literal in the target and pushes its handle.
    PushString(String),
    /// Pushes a type descriptor for the named class, for `class`-literal
    /// and `instanceof` lowering.
    PushType(String),
    /// Pops a type descriptor, pushes its `java.lang.Class` object.
    PushClassLiteral,
    PushThis,
    /// Pushes the named local: a snippet-declared local, a frame slot, or a
    /// context-provided pseudo value.
    PushLocal(String),
    /// Pops a receiver, pushes a reference to its named instance field.
    PushField(String),
    PushStaticField {
        type_name: String,
        name: String,
    },
    /// Pops index then array, pushes an element reference.
    PushArrayElement,
    ArrayLength,
    /// Pops a value and a slot reference, stores, pushes the stored value.
    AssignVariable,
    /// Introduces an interpreter-local with its type's default value.
    DeclareLocal {
        name: String,
        type_name: String,
    },
    InvokeMethod {
        selector: String,
        /// Exact JNI signature when the compiler resolved one; `None` falls
        /// back to arity matching at run time.
        signature: Option<String>,
        argc: usize,
        is_static: bool,
        /// Type to resolve the method against; `None` means the receiver's
        /// runtime type.
        declaring: Option<String>,
    },
    Construct {
        type_name: String,
        signature: Option<String>,
        argc: usize,
    },
    /// Pops a length, pushes a fresh array of the element type.
    NewArray {
        element_type: String,
    },
    Binary {
        op: BinaryOp,
        result_kind: ResultKind,
        left_kind: ResultKind,
        right_kind: ResultKind,
        /// Compound assignment: after computing, pop a slot reference,
        /// store, and push the stored value.
        is_assignment: bool,
    },
    Unary {
        op: UnaryOp,
        kind: ResultKind,
    },
    Cast(CastKind),
    /// `pc <- pc + offset`. A target one past the last instruction
    /// terminates the sequence.
    Jump {
        offset: isize,
    },
    /// Pops a boolean; jumps when it equals `jump_on_true`.
    ConditionalJump {
        offset: isize,
        jump_on_true: bool,
    },
    Pop,
    Dup,
}

/// Widens `value` to a computation kind. `None` marks an operand the kind
/// cannot represent; narrowing never happens here.
pub fn coerce(value: &JdwpValue, kind: ResultKind) -> Option<JdwpValue> {
    match kind {
        ResultKind::Boolean => value.as_boolean().map(JdwpValue::Boolean),
        ResultKind::Int => value.as_int().map(JdwpValue::Int),
        ResultKind::Long => value.as_long().map(JdwpValue::Long),
        ResultKind::Float => value.as_float().map(JdwpValue::Float),
        ResultKind::Double => value.as_double().map(JdwpValue::Double),
        ResultKind::Str => Some(*value),
    }
}

/// Applies one binary computation.
///
/// `Ok(None)` marks an operator/kind pairing with no local computation:
/// every `Str` pairing lands here (concatenation and identity comparison
/// need target round trips, so they live in the interpreter), and so do
/// pairings the compiler must never emit, like string minus. Division and
/// remainder by an integral zero fail with
/// [`DivideByZero`](EvalError::DivideByZero); the floating forms follow
/// IEEE and produce infinities and NaNs instead.
pub fn apply_binary(
    op: BinaryOp,
    result_kind: ResultKind,
    right_kind: ResultKind,
    lhs: &JdwpValue,
    rhs: &JdwpValue,
) -> Result<Option<JdwpValue>> {
    use BinaryOp::*;

    // Shifts do not promote their operands jointly: the left side keeps its
    // own width and the right side only contributes a distance, masked to
    // the left width exactly as the JVM does.
    if matches!(op, LeftShift | RightShift | UnsignedRightShift) {
        let distance = match coerce(rhs, right_kind) {
            Some(JdwpValue::Int(v)) => v as u32,
            Some(JdwpValue::Long(v)) => v as u32,
            _ => return Ok(None),
        };
        let value = match coerce(lhs, result_kind) {
            Some(JdwpValue::Int(l)) => match op {
                LeftShift => JdwpValue::Int(l.wrapping_shl(distance)),
                RightShift => JdwpValue::Int(l.wrapping_shr(distance)),
                _ => JdwpValue::Int((l as u32).wrapping_shr(distance) as i32),
            },
            Some(JdwpValue::Long(l)) => match op {
                LeftShift => JdwpValue::Long(l.wrapping_shl(distance)),
                RightShift => JdwpValue::Long(l.wrapping_shr(distance)),
                _ => JdwpValue::Long((l as u64).wrapping_shr(distance) as i64),
            },
            _ => return Ok(None),
        };
        return Ok(Some(value));
    }

    let (Some(lhs), Some(rhs)) = (coerce(lhs, result_kind), coerce(rhs, result_kind)) else {
        return Ok(None);
    };
    match (lhs, rhs) {
        (JdwpValue::Boolean(l), JdwpValue::Boolean(r)) => Ok(boolean_binary(op, l, r)),
        (JdwpValue::Int(l), JdwpValue::Int(r)) => int_binary(op, l, r),
        (JdwpValue::Long(l), JdwpValue::Long(r)) => long_binary(op, l, r),
        (JdwpValue::Float(l), JdwpValue::Float(r)) => Ok(float_binary(op, l, r)),
        (JdwpValue::Double(l), JdwpValue::Double(r)) => Ok(double_binary(op, l, r)),
        _ => Ok(None),
    }
}

fn boolean_binary(op: BinaryOp, l: bool, r: bool) -> Option<JdwpValue> {
    let value = match op {
        BinaryOp::And => l & r,
        BinaryOp::Or => l | r,
        BinaryOp::Xor => l ^ r,
        BinaryOp::Equal => l == r,
        BinaryOp::NotEqual => l != r,
        _ => return None,
    };
    Some(JdwpValue::Boolean(value))
}

fn int_binary(op: BinaryOp, l: i32, r: i32) -> Result<Option<JdwpValue>> {
    use BinaryOp::*;
    let value = match op {
        Plus => JdwpValue::Int(l.wrapping_add(r)),
        Minus => JdwpValue::Int(l.wrapping_sub(r)),
        Times => JdwpValue::Int(l.wrapping_mul(r)),
        Divide => {
            if r == 0 {
                return Err(EvalError::DivideByZero);
            }
            JdwpValue::Int(l.wrapping_div(r))
        }
        Remainder => {
            if r == 0 {
                return Err(EvalError::DivideByZero);
            }
            JdwpValue::Int(l.wrapping_rem(r))
        }
        And => JdwpValue::Int(l & r),
        Or => JdwpValue::Int(l | r),
        Xor => JdwpValue::Int(l ^ r),
        Less => JdwpValue::Boolean(l < r),
        LessEq => JdwpValue::Boolean(l <= r),
        Greater => JdwpValue::Boolean(l > r),
        GreaterEq => JdwpValue::Boolean(l >= r),
        Equal => JdwpValue::Boolean(l == r),
        NotEqual => JdwpValue::Boolean(l != r),
        LeftShift | RightShift | UnsignedRightShift => return Ok(None),
    };
    Ok(Some(value))
}

fn long_binary(op: BinaryOp, l: i64, r: i64) -> Result<Option<JdwpValue>> {
    use BinaryOp::*;
    let value = match op {
        Plus => JdwpValue::Long(l.wrapping_add(r)),
        Minus => JdwpValue::Long(l.wrapping_sub(r)),
        Times => JdwpValue::Long(l.wrapping_mul(r)),
        Divide => {
            if r == 0 {
                return Err(EvalError::DivideByZero);
            }
            JdwpValue::Long(l.wrapping_div(r))
        }
        Remainder => {
            if r == 0 {
                return Err(EvalError::DivideByZero);
            }
            JdwpValue::Long(l.wrapping_rem(r))
        }
        And => JdwpValue::Long(l & r),
        Or => JdwpValue::Long(l | r),
        Xor => JdwpValue::Long(l ^ r),
        Less => JdwpValue::Boolean(l < r),
        LessEq => JdwpValue::Boolean(l <= r),
        Greater => JdwpValue::Boolean(l > r),
        GreaterEq => JdwpValue::Boolean(l >= r),
        Equal => JdwpValue::Boolean(l == r),
        NotEqual => JdwpValue::Boolean(l != r),
        LeftShift | RightShift | UnsignedRightShift => return Ok(None),
    };
    Ok(Some(value))
}

fn float_binary(op: BinaryOp, l: f32, r: f32) -> Option<JdwpValue> {
    use BinaryOp::*;
    let value = match op {
        Plus => JdwpValue::Float(l + r),
        Minus => JdwpValue::Float(l - r),
        Times => JdwpValue::Float(l * r),
        Divide => JdwpValue::Float(l / r),
        Remainder => JdwpValue::Float(l % r),
        Less => JdwpValue::Boolean(l < r),
        LessEq => JdwpValue::Boolean(l <= r),
        Greater => JdwpValue::Boolean(l > r),
        GreaterEq => JdwpValue::Boolean(l >= r),
        Equal => JdwpValue::Boolean(l == r),
        NotEqual => JdwpValue::Boolean(l != r),
        _ => return None,
    };
    Some(value)
}

fn double_binary(op: BinaryOp, l: f64, r: f64) -> Option<JdwpValue> {
    use BinaryOp::*;
    let value = match op {
        Plus => JdwpValue::Double(l + r),
        Minus => JdwpValue::Double(l - r),
        Times => JdwpValue::Double(l * r),
        Divide => JdwpValue::Double(l / r),
        Remainder => JdwpValue::Double(l % r),
        Less => JdwpValue::Boolean(l < r),
        LessEq => JdwpValue::Boolean(l <= r),
        Greater => JdwpValue::Boolean(l > r),
        GreaterEq => JdwpValue::Boolean(l >= r),
        Equal => JdwpValue::Boolean(l == r),
        NotEqual => JdwpValue::Boolean(l != r),
        _ => return None,
    };
    Some(value)
}

/// Applies one unary computation; `None` marks an inapplicable pairing.
pub fn apply_unary(op: UnaryOp, kind: ResultKind, operand: &JdwpValue) -> Option<JdwpValue> {
    let value = match (op, coerce(operand, kind)?) {
        (UnaryOp::Not, JdwpValue::Boolean(v)) => JdwpValue::Boolean(!v),
        (UnaryOp::Neg, JdwpValue::Int(v)) => JdwpValue::Int(v.wrapping_neg()),
        (UnaryOp::Neg, JdwpValue::Long(v)) => JdwpValue::Long(v.wrapping_neg()),
        (UnaryOp::Neg, JdwpValue::Float(v)) => JdwpValue::Float(-v),
        (UnaryOp::Neg, JdwpValue::Double(v)) => JdwpValue::Double(-v),
        (UnaryOp::BitNot, JdwpValue::Int(v)) => JdwpValue::Int(!v),
        (UnaryOp::BitNot, JdwpValue::Long(v)) => JdwpValue::Long(!v),
        (
            UnaryOp::Plus,
            v @ (JdwpValue::Int(_) | JdwpValue::Long(_) | JdwpValue::Float(_)
            | JdwpValue::Double(_)),
        ) => v,
        _ => return None,
    };
    Some(value)
}

/// Java cast conversion, narrowing included. Float-to-integral saturates
/// and maps NaN to zero, matching the JVM's `d2i` family; casts to the
/// short integral types go through `int` first, as `d2i` + `i2b` would.
pub fn convert(value: &JdwpValue, to: CastKind) -> Option<JdwpValue> {
    match to {
        CastKind::Reference => Some(*value),
        CastKind::Boolean => value.as_boolean().map(JdwpValue::Boolean),
        CastKind::Byte => int_for_cast(value).map(|v| JdwpValue::Byte(v as i8)),
        CastKind::Short => int_for_cast(value).map(|v| JdwpValue::Short(v as i16)),
        CastKind::Char => int_for_cast(value).map(|v| JdwpValue::Char(v as u16)),
        CastKind::Int => int_for_cast(value).map(JdwpValue::Int),
        CastKind::Long => match *value {
            JdwpValue::Float(v) => Some(JdwpValue::Long(v as i64)),
            JdwpValue::Double(v) => Some(JdwpValue::Long(v as i64)),
            _ => value.as_long().map(JdwpValue::Long),
        },
        CastKind::Float => match *value {
            JdwpValue::Double(v) => Some(JdwpValue::Float(v as f32)),
            _ => value.as_float().map(JdwpValue::Float),
        },
        CastKind::Double => value.as_double().map(JdwpValue::Double),
    }
}

fn int_for_cast(value: &JdwpValue) -> Option<i32> {
    match *value {
        JdwpValue::Long(v) => Some(v as i32),
        JdwpValue::Float(v) => Some(v as i32),
        JdwpValue::Double(v) => Some(v as i32),
        _ => value.as_int(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rigel_jdwp::tag;

    use super::*;

    fn int_op(op: BinaryOp, l: i32, r: i32) -> Result<Option<JdwpValue>> {
        apply_binary(
            op,
            ResultKind::Int,
            ResultKind::Int,
            &JdwpValue::Int(l),
            &JdwpValue::Int(r),
        )
    }

    #[test]
    fn int_arithmetic() {
        assert_eq!(
            int_op(BinaryOp::Minus, 7, 3).unwrap(),
            Some(JdwpValue::Int(4))
        );
        assert_eq!(
            int_op(BinaryOp::Times, 6, 7).unwrap(),
            Some(JdwpValue::Int(42))
        );
        assert_eq!(
            int_op(BinaryOp::Plus, i32::MAX, 1).unwrap(),
            Some(JdwpValue::Int(i32::MIN))
        );
    }

    #[test]
    fn narrow_operands_widen_to_the_computation_kind() {
        let result = apply_binary(
            BinaryOp::Plus,
            ResultKind::Int,
            ResultKind::Int,
            &JdwpValue::Byte(40),
            &JdwpValue::Char(2),
        )
        .unwrap();
        assert_eq!(result, Some(JdwpValue::Int(42)));

        let result = apply_binary(
            BinaryOp::Plus,
            ResultKind::Double,
            ResultKind::Int,
            &JdwpValue::Int(1),
            &JdwpValue::Double(0.5),
        )
        .unwrap();
        assert_eq!(result, Some(JdwpValue::Double(1.5)));
    }

    #[test]
    fn integral_division_by_zero_fails() {
        assert!(matches!(
            int_op(BinaryOp::Divide, 1, 0),
            Err(EvalError::DivideByZero)
        ));
        assert!(matches!(
            int_op(BinaryOp::Remainder, 1, 0),
            Err(EvalError::DivideByZero)
        ));
    }

    #[test]
    fn float_division_by_zero_is_infinite() {
        let result = apply_binary(
            BinaryOp::Divide,
            ResultKind::Double,
            ResultKind::Double,
            &JdwpValue::Double(1.0),
            &JdwpValue::Double(0.0),
        )
        .unwrap();
        assert_eq!(result, Some(JdwpValue::Double(f64::INFINITY)));
    }

    #[test]
    fn comparisons_dispatch_on_the_promoted_kind() {
        let result = apply_binary(
            BinaryOp::Less,
            ResultKind::Long,
            ResultKind::Long,
            &JdwpValue::Int(1),
            &JdwpValue::Long(2),
        )
        .unwrap();
        assert_eq!(result, Some(JdwpValue::Boolean(true)));
    }

    #[test]
    fn string_pairings_have_no_local_computation() {
        let s = JdwpValue::Object { tag: tag::STRING, id: 1 };
        let result = apply_binary(BinaryOp::Minus, ResultKind::Str, ResultKind::Str, &s, &s);
        assert_eq!(result.unwrap(), None);
        let result = apply_binary(BinaryOp::Plus, ResultKind::Str, ResultKind::Str, &s, &s);
        assert_eq!(result.unwrap(), None);
    }

    #[test]
    fn shift_distances_mask_to_the_left_width() {
        assert_eq!(
            apply_binary(
                BinaryOp::LeftShift,
                ResultKind::Int,
                ResultKind::Int,
                &JdwpValue::Int(1),
                &JdwpValue::Int(33),
            )
            .unwrap(),
            Some(JdwpValue::Int(2))
        );
        assert_eq!(
            apply_binary(
                BinaryOp::UnsignedRightShift,
                ResultKind::Int,
                ResultKind::Int,
                &JdwpValue::Int(-1),
                &JdwpValue::Int(28),
            )
            .unwrap(),
            Some(JdwpValue::Int(15))
        );
    }

    #[test]
    fn casts_narrow_like_java() {
        assert_eq!(
            convert(&JdwpValue::Int(300), CastKind::Byte),
            Some(JdwpValue::Byte(44))
        );
        assert_eq!(
            convert(&JdwpValue::Double(3.9), CastKind::Int),
            Some(JdwpValue::Int(3))
        );
        assert_eq!(
            convert(&JdwpValue::Double(f64::NAN), CastKind::Int),
            Some(JdwpValue::Int(0))
        );
        assert_eq!(
            convert(&JdwpValue::Int(65), CastKind::Char),
            Some(JdwpValue::Char(65))
        );
        assert_eq!(
            convert(&JdwpValue::Long(1), CastKind::Double),
            Some(JdwpValue::Double(1.0))
        );
    }

    #[test]
    fn coerce_never_narrows() {
        assert_eq!(coerce(&JdwpValue::Long(1), ResultKind::Int), None);
        assert_eq!(coerce(&JdwpValue::Double(1.0), ResultKind::Float), None);
        assert_eq!(
            coerce(&JdwpValue::Char(7), ResultKind::Int),
            Some(JdwpValue::Int(7))
        );
    }

    #[test]
    fn unary_negation_wraps() {
        assert_eq!(
            apply_unary(UnaryOp::Neg, ResultKind::Int, &JdwpValue::Int(i32::MIN)),
            Some(JdwpValue::Int(i32::MIN))
        );
        assert_eq!(
            apply_unary(UnaryOp::Not, ResultKind::Boolean, &JdwpValue::Boolean(true)),
            Some(JdwpValue::Boolean(false))
        );
    }
}
