//! Executing instruction sequences against the paused target.
//!
//! The interpreter drives a small entry stack. An entry is a plain value, a
//! reference to storage in the target (read lazily, written through), or a
//! resolved type waiting to become a class literal. Primitive arithmetic
//! happens locally in [`crate::instructions`]; everything touching objects
//! is a round trip through the client.

use std::collections::HashMap;

use rigel_jdwp::{
    tag, FieldId, JdwpClient, JdwpValue, ObjectId, ReferenceTypeId, INVOKE_SINGLE_THREADED,
};

use crate::context::{self, BindingSlot, RuntimeContext};
use crate::error::{EvalError, Result};
use crate::instructions::{self, BinaryOp, CastKind, Instruction, Op, ResultKind};

/// Runs a compiled sequence to completion. The result is the value left on
/// the stack, or `None` when the snippet leaves nothing behind.
pub async fn run(
    sequence: &[Instruction],
    context: &RuntimeContext,
    client: &JdwpClient,
) -> Result<Option<JdwpValue>> {
    let interpreter = Interpreter {
        client,
        context,
        stack: Vec::new(),
        locals: HashMap::new(),
    };
    interpreter.run_loop(sequence).await
}

#[derive(Clone, Debug)]
enum Entry {
    Value(JdwpValue),
    Slot(SlotRef),
    Type { class: ReferenceTypeId },
}

/// Storage behind a variable reference on the stack.
#[derive(Clone, Debug)]
enum SlotRef {
    FrameLocal {
        slot: u32,
        signature: String,
    },
    InstanceField {
        object: ObjectId,
        field: FieldId,
        signature: String,
    },
    StaticField {
        class: ReferenceTypeId,
        field: FieldId,
        signature: String,
    },
    ArrayElement {
        array: ObjectId,
        index: i32,
    },
    /// A local declared by the snippet itself; lives only in the
    /// interpreter.
    Interpreter { name: String },
}

struct Interpreter<'a> {
    client: &'a JdwpClient,
    context: &'a RuntimeContext,
    stack: Vec<Entry>,
    locals: HashMap<String, JdwpValue>,
}

impl Interpreter<'_> {
    async fn run_loop(mut self, sequence: &[Instruction]) -> Result<Option<JdwpValue>> {
        let mut pc = 0usize;
        while let Some(instruction) = sequence.get(pc) {
            tracing::trace!(target: "rigel.eval", pc, op = ?instruction.op, "step");
            let mut next = pc + 1;
            match &instruction.op {
                Op::PushNull => self.stack.push(Entry::Value(JdwpValue::Null)),
                Op::PushConstant(value) => self.stack.push(Entry::Value(*value)),
                Op::PushString(text) => {
                    let id = self.client.create_string(text).await?;
                    self.stack.push(Entry::Value(JdwpValue::Object {
                        tag: tag::STRING,
                        id,
                    }));
                }
                Op::PushType(name) => {
                    let class = self.lookup_class(name).await?;
                    self.stack.push(Entry::Type { class });
                }
                Op::PushClassLiteral => {
                    let Entry::Type { class } = self.pop_entry()? else {
                        return Err(self.inconsistency("class literal without a type"));
                    };
                    let id = self.client.reference_type_class_object(class).await?;
                    self.stack.push(Entry::Value(JdwpValue::Object {
                        tag: tag::CLASS_OBJECT,
                        id,
                    }));
                }
                Op::PushThis => {
                    let Some((tag, id)) = self.context.this_object else {
                        return Err(self.inconsistency("no receiver in this context"));
                    };
                    self.stack.push(Entry::Value(JdwpValue::Object { tag, id }));
                }
                Op::PushLocal(name) => self.push_local(name)?,
                Op::PushField(name) => self.push_field(name).await?,
                Op::PushStaticField { type_name, name } => {
                    self.push_static_field(type_name, name).await?;
                }
                Op::PushArrayElement => {
                    let index = self.pop_value().await?;
                    let Some(index) = index.as_int() else {
                        return Err(self.inconsistency("array index is not an int"));
                    };
                    let array = self.pop_value().await?;
                    if array.is_null() {
                        return Err(EvalError::NullDereference);
                    }
                    let Some(array) = array.object_id() else {
                        return Err(self.inconsistency("array access on a primitive"));
                    };
                    self.stack.push(Entry::Slot(SlotRef::ArrayElement { array, index }));
                }
                Op::ArrayLength => {
                    let array = self.pop_value().await?;
                    if array.is_null() {
                        return Err(EvalError::NullDereference);
                    }
                    let Some(array) = array.object_id() else {
                        return Err(self.inconsistency("length of a primitive"));
                    };
                    let length = self.client.array_reference_length(array).await?;
                    self.stack.push(Entry::Value(JdwpValue::Int(length)));
                }
                Op::AssignVariable => {
                    let value = self.pop_value().await?;
                    let Entry::Slot(slot) = self.pop_entry()? else {
                        return Err(self.inconsistency("assignment without a variable"));
                    };
                    let stored = self.write_slot(&slot, value).await?;
                    self.stack.push(Entry::Value(stored));
                }
                Op::DeclareLocal { name, type_name } => {
                    self.locals.insert(name.clone(), default_value(type_name));
                }
                Op::InvokeMethod {
                    selector,
                    signature,
                    argc,
                    is_static,
                    declaring,
                } => {
                    self.invoke(selector, signature.as_deref(), *argc, *is_static, declaring.as_deref())
                        .await?;
                }
                Op::Construct {
                    type_name,
                    signature,
                    argc,
                } => self.construct(type_name, signature.as_deref(), *argc).await?,
                Op::NewArray { element_type } => self.new_array(element_type).await?,
                Op::Binary {
                    op,
                    result_kind,
                    left_kind,
                    right_kind,
                    is_assignment,
                } => {
                    self.binary(*op, *result_kind, *left_kind, *right_kind, *is_assignment)
                        .await?;
                }
                Op::Unary { op, kind } => {
                    let operand = self.pop_value().await?;
                    let Some(result) = instructions::apply_unary(*op, *kind, &operand) else {
                        return Err(self.inconsistency("operator not applicable to the operand"));
                    };
                    self.stack.push(Entry::Value(result));
                }
                Op::Cast(kind) => {
                    let value = self.pop_value().await?;
                    let Some(converted) = instructions::convert(&value, *kind) else {
                        return Err(self.inconsistency("value does not convert to the cast type"));
                    };
                    self.stack.push(Entry::Value(converted));
                }
                Op::Jump { offset } => {
                    next = self.jump_target(pc, *offset, sequence.len())?;
                }
                Op::ConditionalJump { offset, jump_on_true } => {
                    let value = self.pop_value().await?;
                    let Some(condition) = value.as_boolean() else {
                        return Err(self.inconsistency("conditional jump on a non-boolean"));
                    };
                    if condition == *jump_on_true {
                        next = self.jump_target(pc, *offset, sequence.len())?;
                    }
                }
                Op::Pop => {
                    self.pop_entry()?;
                }
                Op::Dup => {
                    let Some(top) = self.stack.last().cloned() else {
                        return Err(self.inconsistency("stack underflow"));
                    };
                    self.stack.push(top);
                }
            }
            pc = next;
        }

        match self.stack.len() {
            0 => Ok(None),
            1 => Ok(Some(self.pop_value().await?)),
            depth => Err(self.inconsistency(&format!("{depth} values left on the stack"))),
        }
    }

    fn inconsistency(&self, message: &str) -> EvalError {
        tracing::error!(target: "rigel.eval", %message, "interpreter inconsistency");
        EvalError::Internal(message.to_string())
    }

    fn jump_target(&self, pc: usize, offset: isize, len: usize) -> Result<usize> {
        let target = pc as isize + offset;
        if target < 0 || target > len as isize {
            return Err(self.inconsistency(&format!("jump target {target} out of range")));
        }
        Ok(target as usize)
    }

    fn pop_entry(&mut self) -> Result<Entry> {
        self.stack
            .pop()
            .ok_or_else(|| self.inconsistency("stack underflow"))
    }

    /// Pops an entry and reads through it if it is a variable reference.
    async fn pop_value(&mut self) -> Result<JdwpValue> {
        match self.pop_entry()? {
            Entry::Value(value) => Ok(value),
            Entry::Slot(slot) => self.read_slot(&slot).await,
            Entry::Type { .. } => Err(self.inconsistency("a type is not a value")),
        }
    }

    fn push_local(&mut self, name: &str) -> Result<()> {
        if self.locals.contains_key(name) {
            self.stack.push(Entry::Slot(SlotRef::Interpreter {
                name: name.to_string(),
            }));
            return Ok(());
        }
        let Some(binding) = self.context.binding(name) else {
            return Err(EvalError::Unresolved(name.to_string()));
        };
        let entry = match &binding.slot {
            BindingSlot::FrameLocal { slot, signature } => Entry::Slot(SlotRef::FrameLocal {
                slot: *slot,
                signature: signature.clone(),
            }),
            BindingSlot::InstanceField {
                object,
                field,
                signature,
            } => Entry::Slot(SlotRef::InstanceField {
                object: *object,
                field: *field,
                signature: signature.clone(),
            }),
            BindingSlot::StaticField {
                class,
                field,
                signature,
            } => Entry::Slot(SlotRef::StaticField {
                class: *class,
                field: *field,
                signature: signature.clone(),
            }),
            BindingSlot::Value(value) => Entry::Value(*value),
        };
        self.stack.push(entry);
        Ok(())
    }

    async fn push_field(&mut self, name: &str) -> Result<()> {
        let receiver = self.pop_value().await?;
        if receiver.is_null() {
            return Err(EvalError::NullDereference);
        }
        let Some(object) = receiver.object_id() else {
            return Err(self.inconsistency("field access on a primitive"));
        };
        let class = self.client.object_reference_reference_type(object).await?;
        let Some((_, field)) = context::find_field(self.client, class, name).await? else {
            return Err(EvalError::Unresolved(name.to_string()));
        };
        self.stack.push(Entry::Slot(SlotRef::InstanceField {
            object,
            field: field.field_id,
            signature: field.signature,
        }));
        Ok(())
    }

    async fn push_static_field(&mut self, type_name: &str, name: &str) -> Result<()> {
        let class = self.lookup_class(type_name).await?;
        let Some((found_in, field)) = context::find_field(self.client, class, name).await? else {
            return Err(EvalError::Unresolved(format!("{type_name}.{name}")));
        };
        if !field.is_static() {
            return Err(self.inconsistency("static access to an instance field"));
        }
        self.stack.push(Entry::Slot(SlotRef::StaticField {
            class: found_in,
            field: field.field_id,
            signature: field.signature,
        }));
        Ok(())
    }

    async fn lookup_class(&self, type_name: &str) -> Result<ReferenceTypeId> {
        let signature = context::signature_from_type_name(type_name);
        let classes = self.client.classes_by_signature(&signature).await?;
        match classes.first() {
            Some(class) => Ok(class.type_id),
            None => Err(EvalError::Unresolved(type_name.to_string())),
        }
    }

    async fn read_slot(&self, slot: &SlotRef) -> Result<JdwpValue> {
        let value = match slot {
            SlotRef::FrameLocal { slot, signature } => self
                .client
                .stack_frame_get_values(
                    self.context.thread,
                    self.context.frame_id,
                    &[(*slot, signature.clone())],
                )
                .await?
                .into_iter()
                .next(),
            SlotRef::InstanceField { object, field, .. } => self
                .client
                .object_reference_get_values(*object, &[*field])
                .await?
                .into_iter()
                .next(),
            SlotRef::StaticField { class, field, .. } => self
                .client
                .reference_type_get_values(*class, &[*field])
                .await?
                .into_iter()
                .next(),
            SlotRef::ArrayElement { array, index } => self
                .client
                .array_reference_get_values(*array, *index, 1)
                .await?
                .into_iter()
                .next(),
            SlotRef::Interpreter { name } => self.locals.get(name).copied(),
        };
        value.ok_or_else(|| self.inconsistency("variable read returned nothing"))
    }

    /// Writes through a slot, converting to the slot's type first, and
    /// returns the value as stored.
    async fn write_slot(&mut self, slot: &SlotRef, value: JdwpValue) -> Result<JdwpValue> {
        match slot {
            SlotRef::FrameLocal { slot, signature } => {
                let stored = self.convert_for_signature(value, signature)?;
                self.client
                    .stack_frame_set_values(
                        self.context.thread,
                        self.context.frame_id,
                        &[(*slot, stored)],
                    )
                    .await?;
                Ok(stored)
            }
            SlotRef::InstanceField {
                object,
                field,
                signature,
            } => {
                let stored = self.convert_for_signature(value, signature)?;
                self.client
                    .object_reference_set_values(*object, &[(*field, stored)])
                    .await?;
                Ok(stored)
            }
            SlotRef::StaticField {
                class,
                field,
                signature,
            } => {
                let stored = self.convert_for_signature(value, signature)?;
                self.client
                    .class_type_set_values(*class, &[(*field, stored)])
                    .await?;
                Ok(stored)
            }
            SlotRef::ArrayElement { array, index } => {
                let class = self.client.object_reference_reference_type(*array).await?;
                let class_signature = self.client.reference_type_signature(class).await?;
                let Some(element_signature) = class_signature.strip_prefix('[') else {
                    return Err(self.inconsistency("array store into a non-array"));
                };
                let stored = self.convert_for_signature(value, element_signature)?;
                self.client
                    .array_reference_set_values(*array, *index, &[stored])
                    .await?;
                Ok(stored)
            }
            SlotRef::Interpreter { name } => {
                let stored = match self.locals.get(name) {
                    Some(existing) => self.convert_like(value, existing)?,
                    None => value,
                };
                self.locals.insert(name.clone(), stored);
                Ok(stored)
            }
        }
    }

    fn convert_for_signature(&self, value: JdwpValue, signature: &str) -> Result<JdwpValue> {
        let kind = match signature.as_bytes().first() {
            Some(b'Z') => CastKind::Boolean,
            Some(b'B') => CastKind::Byte,
            Some(b'C') => CastKind::Char,
            Some(b'S') => CastKind::Short,
            Some(b'I') => CastKind::Int,
            Some(b'J') => CastKind::Long,
            Some(b'F') => CastKind::Float,
            Some(b'D') => CastKind::Double,
            _ => CastKind::Reference,
        };
        instructions::convert(&value, kind)
            .ok_or_else(|| self.inconsistency("stored value does not fit the slot"))
    }

    fn convert_like(&self, value: JdwpValue, existing: &JdwpValue) -> Result<JdwpValue> {
        let kind = match existing {
            JdwpValue::Boolean(_) => CastKind::Boolean,
            JdwpValue::Byte(_) => CastKind::Byte,
            JdwpValue::Char(_) => CastKind::Char,
            JdwpValue::Short(_) => CastKind::Short,
            JdwpValue::Int(_) => CastKind::Int,
            JdwpValue::Long(_) => CastKind::Long,
            JdwpValue::Float(_) => CastKind::Float,
            JdwpValue::Double(_) => CastKind::Double,
            _ => CastKind::Reference,
        };
        instructions::convert(&value, kind)
            .ok_or_else(|| self.inconsistency("stored value does not fit the variable"))
    }

    async fn invoke(
        &mut self,
        selector: &str,
        signature: Option<&str>,
        argc: usize,
        is_static: bool,
        declaring: Option<&str>,
    ) -> Result<()> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop_value().await?);
        }
        args.reverse();

        if is_static {
            let Some(type_name) = declaring else {
                return Err(self.inconsistency("static call without a declaring type"));
            };
            let class = self.lookup_class(type_name).await?;
            let found =
                context::find_method(self.client, class, selector, signature, argc).await?;
            let Some((found_in, method)) = found else {
                return Err(EvalError::Unresolved(format!("{type_name}.{selector}")));
            };
            let (value, exception) = self
                .client
                .class_type_invoke_method(
                    found_in,
                    self.context.thread,
                    method.method_id,
                    &args,
                    INVOKE_SINGLE_THREADED,
                )
                .await?;
            if exception != 0 {
                return Err(EvalError::RemoteException(exception));
            }
            self.stack.push(Entry::Value(value));
            return Ok(());
        }

        let receiver = self.pop_value().await?;
        if receiver.is_null() {
            return Err(EvalError::NullDereference);
        }
        let Some(object) = receiver.object_id() else {
            return Err(self.inconsistency("method call on a primitive"));
        };
        let class = match declaring {
            Some(type_name) => self.lookup_class(type_name).await?,
            None => self.client.object_reference_reference_type(object).await?,
        };
        let found = context::find_method(self.client, class, selector, signature, argc).await?;
        let Some((found_in, method)) = found else {
            return Err(EvalError::Unresolved(selector.to_string()));
        };
        let (value, exception) = self
            .client
            .object_reference_invoke_method(
                object,
                self.context.thread,
                found_in,
                method.method_id,
                &args,
                INVOKE_SINGLE_THREADED,
            )
            .await?;
        if exception != 0 {
            return Err(EvalError::RemoteException(exception));
        }
        self.stack.push(Entry::Value(value));
        Ok(())
    }

    async fn construct(
        &mut self,
        type_name: &str,
        signature: Option<&str>,
        argc: usize,
    ) -> Result<()> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.pop_value().await?);
        }
        args.reverse();

        let class = self.lookup_class(type_name).await?;
        let constructor = self
            .client
            .reference_type_methods(class)
            .await?
            .into_iter()
            .find(|method| {
                method.name == "<init>"
                    && match signature {
                        Some(signature) => method.signature == signature,
                        None => {
                            context::method_param_signatures(&method.signature).len() == argc
                        }
                    }
            });
        let Some(constructor) = constructor else {
            return Err(EvalError::Unresolved(format!("{type_name}.<init>")));
        };
        let (value, exception) = self
            .client
            .class_type_new_instance(
                class,
                self.context.thread,
                constructor.method_id,
                &args,
                INVOKE_SINGLE_THREADED,
            )
            .await?;
        if exception != 0 {
            return Err(EvalError::RemoteException(exception));
        }
        self.stack.push(Entry::Value(value));
        Ok(())
    }

    async fn new_array(&mut self, element_type: &str) -> Result<()> {
        let length = self.pop_value().await?;
        let Some(length) = length.as_int() else {
            return Err(self.inconsistency("array length is not an int"));
        };
        let signature = format!("[{}", context::signature_from_type_name(element_type));
        let classes = self.client.classes_by_signature(&signature).await?;
        let Some(class) = classes.first() else {
            return Err(EvalError::Unresolved(format!("{element_type}[]")));
        };
        let value = self
            .client
            .array_type_new_instance(class.type_id, length)
            .await?;
        self.stack.push(Entry::Value(value));
        Ok(())
    }

    async fn binary(
        &mut self,
        op: BinaryOp,
        result_kind: ResultKind,
        left_kind: ResultKind,
        right_kind: ResultKind,
        is_assignment: bool,
    ) -> Result<()> {
        let rhs = self.pop_value().await?;
        let lhs = self.pop_value().await?;
        let result = if result_kind == ResultKind::Str {
            self.string_binary(op, &lhs, &rhs).await?
        } else {
            match instructions::apply_binary(op, result_kind, right_kind, &lhs, &rhs)? {
                Some(value) => value,
                None => {
                    return Err(self.inconsistency(&format!(
                        "operator not applicable to {left_kind:?} and {right_kind:?} operands"
                    )));
                }
            }
        };
        if is_assignment {
            let Entry::Slot(slot) = self.pop_entry()? else {
                return Err(self.inconsistency("compound assignment without a variable"));
            };
            let stored = self.write_slot(&slot, result).await?;
            self.stack.push(Entry::Value(stored));
        } else {
            self.stack.push(Entry::Value(result));
        }
        Ok(())
    }

    /// Reference-domain operators: concatenation and identity comparison.
    async fn string_binary(
        &self,
        op: BinaryOp,
        lhs: &JdwpValue,
        rhs: &JdwpValue,
    ) -> Result<JdwpValue> {
        match op {
            BinaryOp::Plus => {
                let left = self.text_of(lhs).await?;
                let right = self.text_of(rhs).await?;
                let id = self.client.create_string(&format!("{left}{right}")).await?;
                Ok(JdwpValue::Object {
                    tag: tag::STRING,
                    id,
                })
            }
            BinaryOp::Equal => Ok(JdwpValue::Boolean(reference_id(lhs) == reference_id(rhs))),
            BinaryOp::NotEqual => Ok(JdwpValue::Boolean(reference_id(lhs) != reference_id(rhs))),
            _ => Err(self.inconsistency("operator not applicable to references")),
        }
    }

    /// Renders a value the way Java's string concatenation would.
    async fn text_of(&self, value: &JdwpValue) -> Result<String> {
        match *value {
            JdwpValue::Void => Err(self.inconsistency("cannot render a void value")),
            JdwpValue::Null => Ok("null".to_string()),
            JdwpValue::Boolean(v) => Ok(v.to_string()),
            JdwpValue::Byte(v) => Ok(v.to_string()),
            JdwpValue::Short(v) => Ok(v.to_string()),
            JdwpValue::Int(v) => Ok(v.to_string()),
            JdwpValue::Long(v) => Ok(v.to_string()),
            JdwpValue::Char(v) => {
                Ok(char::from_u32(u32::from(v)).unwrap_or('\u{fffd}').to_string())
            }
            JdwpValue::Float(v) => Ok(format!("{v:?}")),
            JdwpValue::Double(v) => Ok(format!("{v:?}")),
            JdwpValue::Object { tag: tag::STRING, id } => {
                Ok(self.client.string_reference_value(id).await?)
            }
            JdwpValue::Object { id, .. } => self.to_string_invoke(id).await,
        }
    }

    async fn to_string_invoke(&self, object: ObjectId) -> Result<String> {
        let class = self.client.object_reference_reference_type(object).await?;
        let found = context::find_method(
            self.client,
            class,
            "toString",
            Some("()Ljava/lang/String;"),
            0,
        )
        .await?;
        let Some((found_in, method)) = found else {
            return Err(EvalError::Unresolved("toString".to_string()));
        };
        let (value, exception) = self
            .client
            .object_reference_invoke_method(
                object,
                self.context.thread,
                found_in,
                method.method_id,
                &[],
                INVOKE_SINGLE_THREADED,
            )
            .await?;
        if exception != 0 {
            return Err(EvalError::RemoteException(exception));
        }
        match value {
            JdwpValue::Object { tag: tag::STRING, id } => {
                Ok(self.client.string_reference_value(id).await?)
            }
            JdwpValue::Null => Ok("null".to_string()),
            _ => Err(self.inconsistency("toString returned a non-string")),
        }
    }
}

fn reference_id(value: &JdwpValue) -> ObjectId {
    value.object_id().unwrap_or(0)
}

fn default_value(type_name: &str) -> JdwpValue {
    match type_name {
        "boolean" => JdwpValue::Boolean(false),
        "byte" => JdwpValue::Byte(0),
        "char" => JdwpValue::Char(0),
        "short" => JdwpValue::Short(0),
        "int" => JdwpValue::Int(0),
        "long" => JdwpValue::Long(0),
        "float" => JdwpValue::Float(0.0),
        "double" => JdwpValue::Double(0.0),
        _ => JdwpValue::Null,
    }
}
