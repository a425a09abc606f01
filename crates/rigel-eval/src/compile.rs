//! Lowering snippets to instruction sequences.
//!
//! The compiler walks the parsed run-method body and emits a flat
//! [`InstructionSequence`] for the interpreter, resolving every free name
//! through the [`RuntimeContext`] and typing every subexpression against
//! the target's reflected members. Resolution queries the target, so
//! compilation is async; recursion over the tree goes through boxed
//! futures.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use rigel_jdwp::{JdwpClient, JdwpValue, ReferenceTypeId};
use rigel_syntax::ast::{self, Span};
use rigel_syntax::{decode_literal, parse_block_body, LiteralValue};

use crate::context::{self, BindingKind, BindingSlot, RuntimeContext};
use crate::error::{EvalError, Result};
use crate::instructions::{
    BinaryOp, CastKind, Instruction, InstructionSequence, Op, ResultKind, UnaryOp,
};
use crate::synthesize::SynthesizedUnit;

/// Compiles the unit's run method body against the paused context.
pub async fn compile(
    unit: &SynthesizedUnit,
    context: &RuntimeContext,
    client: &JdwpClient,
) -> Result<InstructionSequence> {
    let (block, errors) = parse_block_body(unit.body(), unit.run_method_start).into_parts();
    if let Some(error) = errors.first() {
        return Err(EvalError::Compilation {
            message: error.message.clone(),
            offset: unit.to_snippet_offset(error.span.start),
        });
    }

    let mut compiler = Compiler {
        client,
        context,
        unit,
        instructions: Vec::new(),
        locals: HashMap::new(),
        end_jumps: Vec::new(),
        classes: HashMap::new(),
    };
    for stmt in &block.statements {
        compiler.compile_stmt(stmt).await?;
    }
    for index in std::mem::take(&mut compiler.end_jumps) {
        compiler.patch_jump(index)?;
    }
    Ok(compiler.instructions)
}

/// Compile-time type of an expression. Mirrors Java's static typing as far
/// as the target's reflected signatures allow.
#[derive(Clone, Debug, PartialEq)]
enum StaticKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Str,
    Object(String),
    /// Element type name.
    Array(String),
    Null,
    Void,
}

impl StaticKind {
    fn from_signature(signature: &str) -> Self {
        match signature.as_bytes().first() {
            Some(b'Z') => StaticKind::Boolean,
            Some(b'B') => StaticKind::Byte,
            Some(b'C') => StaticKind::Char,
            Some(b'S') => StaticKind::Short,
            Some(b'I') => StaticKind::Int,
            Some(b'J') => StaticKind::Long,
            Some(b'F') => StaticKind::Float,
            Some(b'D') => StaticKind::Double,
            Some(b'V') => StaticKind::Void,
            Some(b'[') => StaticKind::Array(context::type_name_from_signature(&signature[1..])),
            _ => {
                let name = context::type_name_from_signature(signature);
                if name == "java.lang.String" {
                    StaticKind::Str
                } else {
                    StaticKind::Object(name)
                }
            }
        }
    }

    fn from_type_name(name: &str) -> Self {
        let name = name.trim();
        if let Some(element) = name.strip_suffix("[]") {
            return StaticKind::Array(element.trim().to_string());
        }
        match name {
            "boolean" => StaticKind::Boolean,
            "byte" => StaticKind::Byte,
            "char" => StaticKind::Char,
            "short" => StaticKind::Short,
            "int" => StaticKind::Int,
            "long" => StaticKind::Long,
            "float" => StaticKind::Float,
            "double" => StaticKind::Double,
            "void" => StaticKind::Void,
            "String" | "java.lang.String" => StaticKind::Str,
            _ => StaticKind::Object(base_type_name(name)),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(
            self,
            StaticKind::Byte
                | StaticKind::Char
                | StaticKind::Short
                | StaticKind::Int
                | StaticKind::Long
                | StaticKind::Float
                | StaticKind::Double
        )
    }

    fn is_integral(&self) -> bool {
        matches!(
            self,
            StaticKind::Byte | StaticKind::Char | StaticKind::Short | StaticKind::Int | StaticKind::Long
        )
    }

    fn is_reference(&self) -> bool {
        matches!(
            self,
            StaticKind::Str | StaticKind::Object(_) | StaticKind::Array(_) | StaticKind::Null
        )
    }

    /// The runtime domain values of this type compute in. `None` for void.
    fn result_kind(&self) -> Option<ResultKind> {
        Some(match self {
            StaticKind::Boolean => ResultKind::Boolean,
            StaticKind::Byte | StaticKind::Char | StaticKind::Short | StaticKind::Int => {
                ResultKind::Int
            }
            StaticKind::Long => ResultKind::Long,
            StaticKind::Float => ResultKind::Float,
            StaticKind::Double => ResultKind::Double,
            StaticKind::Str | StaticKind::Object(_) | StaticKind::Array(_) | StaticKind::Null => {
                ResultKind::Str
            }
            StaticKind::Void => return None,
        })
    }

    fn cast_kind(&self) -> CastKind {
        match self {
            StaticKind::Boolean => CastKind::Boolean,
            StaticKind::Byte => CastKind::Byte,
            StaticKind::Char => CastKind::Char,
            StaticKind::Short => CastKind::Short,
            StaticKind::Int => CastKind::Int,
            StaticKind::Long => CastKind::Long,
            StaticKind::Float => CastKind::Float,
            StaticKind::Double => CastKind::Double,
            _ => CastKind::Reference,
        }
    }

    /// Source-level name for diagnostics.
    fn type_name(&self) -> String {
        match self {
            StaticKind::Boolean => "boolean".to_string(),
            StaticKind::Byte => "byte".to_string(),
            StaticKind::Char => "char".to_string(),
            StaticKind::Short => "short".to_string(),
            StaticKind::Int => "int".to_string(),
            StaticKind::Long => "long".to_string(),
            StaticKind::Float => "float".to_string(),
            StaticKind::Double => "double".to_string(),
            StaticKind::Str => "java.lang.String".to_string(),
            StaticKind::Object(name) => name.clone(),
            StaticKind::Array(element) => format!("{element}[]"),
            StaticKind::Null => "null".to_string(),
            StaticKind::Void => "void".to_string(),
        }
    }
}

fn numeric_rank(kind: &StaticKind) -> Option<u8> {
    match kind {
        StaticKind::Double => Some(4),
        StaticKind::Float => Some(3),
        StaticKind::Long => Some(2),
        kind if kind.is_numeric() => Some(1),
        _ => None,
    }
}

/// Java's binary numeric promotion.
fn promote(left: &StaticKind, right: &StaticKind) -> Option<ResultKind> {
    let rank = numeric_rank(left)?.max(numeric_rank(right)?);
    Some(match rank {
        4 => ResultKind::Double,
        3 => ResultKind::Float,
        2 => ResultKind::Long,
        _ => ResultKind::Int,
    })
}

fn static_of(kind: ResultKind) -> StaticKind {
    match kind {
        ResultKind::Boolean => StaticKind::Boolean,
        ResultKind::Int => StaticKind::Int,
        ResultKind::Long => StaticKind::Long,
        ResultKind::Float => StaticKind::Float,
        ResultKind::Double => StaticKind::Double,
        ResultKind::Str => StaticKind::Str,
    }
}

/// Widening primitive conversions; assignment accepts these implicitly.
fn widens_to(value: &StaticKind, target: &StaticKind) -> bool {
    fn order(kind: &StaticKind) -> Option<u8> {
        Some(match kind {
            StaticKind::Byte => 1,
            StaticKind::Short => 2,
            StaticKind::Int => 3,
            StaticKind::Long => 4,
            StaticKind::Float => 5,
            StaticKind::Double => 6,
            _ => return None,
        })
    }
    if *value == StaticKind::Char {
        return matches!(
            target,
            StaticKind::Int | StaticKind::Long | StaticKind::Float | StaticKind::Double
        );
    }
    match (order(value), order(target)) {
        (Some(value), Some(target)) => value <= target,
        _ => false,
    }
}

fn promoted_unary(kind: &StaticKind) -> StaticKind {
    match kind {
        StaticKind::Byte | StaticKind::Char | StaticKind::Short | StaticKind::Int => StaticKind::Int,
        other => other.clone(),
    }
}

fn base_type_name(text: &str) -> String {
    let text = text.trim();
    match text.find('<') {
        Some(index) => text[..index].trim().to_string(),
        None => text.to_string(),
    }
}

fn wire_op(op: ast::BinaryOp) -> Option<BinaryOp> {
    Some(match op {
        ast::BinaryOp::Mul => BinaryOp::Times,
        ast::BinaryOp::Div => BinaryOp::Divide,
        ast::BinaryOp::Rem => BinaryOp::Remainder,
        ast::BinaryOp::Add => BinaryOp::Plus,
        ast::BinaryOp::Sub => BinaryOp::Minus,
        ast::BinaryOp::Shl => BinaryOp::LeftShift,
        ast::BinaryOp::Shr => BinaryOp::RightShift,
        ast::BinaryOp::UShr => BinaryOp::UnsignedRightShift,
        ast::BinaryOp::Lt => BinaryOp::Less,
        ast::BinaryOp::Le => BinaryOp::LessEq,
        ast::BinaryOp::Gt => BinaryOp::Greater,
        ast::BinaryOp::Ge => BinaryOp::GreaterEq,
        ast::BinaryOp::Eq => BinaryOp::Equal,
        ast::BinaryOp::Ne => BinaryOp::NotEqual,
        ast::BinaryOp::BitAnd => BinaryOp::And,
        ast::BinaryOp::BitXor => BinaryOp::Xor,
        ast::BinaryOp::BitOr => BinaryOp::Or,
        ast::BinaryOp::AndAnd | ast::BinaryOp::OrOr => return None,
    })
}

fn op_symbol(op: ast::BinaryOp) -> &'static str {
    match op {
        ast::BinaryOp::Mul => "*",
        ast::BinaryOp::Div => "/",
        ast::BinaryOp::Rem => "%",
        ast::BinaryOp::Add => "+",
        ast::BinaryOp::Sub => "-",
        ast::BinaryOp::Shl => "<<",
        ast::BinaryOp::Shr => ">>",
        ast::BinaryOp::UShr => ">>>",
        ast::BinaryOp::Lt => "<",
        ast::BinaryOp::Le => "<=",
        ast::BinaryOp::Gt => ">",
        ast::BinaryOp::Ge => ">=",
        ast::BinaryOp::Eq => "==",
        ast::BinaryOp::Ne => "!=",
        ast::BinaryOp::BitAnd => "&",
        ast::BinaryOp::BitXor => "^",
        ast::BinaryOp::BitOr => "|",
        ast::BinaryOp::AndAnd => "&&",
        ast::BinaryOp::OrOr => "||",
    }
}

fn dotted_name(expr: &ast::Expr) -> Option<String> {
    match expr {
        ast::Expr::Name(name) => Some(name.name.clone()),
        ast::Expr::FieldAccess(access) => {
            let mut base = dotted_name(&access.receiver)?;
            base.push('.');
            base.push_str(&access.name);
            Some(base)
        }
        _ => None,
    }
}

/// How the interpreter should execute one binary operator application.
struct BinaryPlan {
    op: BinaryOp,
    result: StaticKind,
    result_kind: ResultKind,
    left_kind: ResultKind,
    right_kind: ResultKind,
}

struct Compiler<'a> {
    client: &'a JdwpClient,
    context: &'a RuntimeContext,
    unit: &'a SynthesizedUnit,
    instructions: Vec<Instruction>,
    /// Locals declared by the snippet itself; these shadow the context.
    locals: HashMap<String, StaticKind>,
    /// `return` jumps to patch to the end of the sequence.
    end_jumps: Vec<usize>,
    /// Per-compilation class lookup cache, name to resolved id.
    classes: HashMap<String, Option<ReferenceTypeId>>,
}

impl<'a> Compiler<'a> {
    fn emit(&mut self, op: Op, span: Span) -> usize {
        let index = self.instructions.len();
        self.instructions.push(Instruction {
            op,
            start: self.unit.to_snippet_offset(span.start),
        });
        index
    }

    fn fail(&self, message: impl Into<String>, span: Span) -> EvalError {
        EvalError::Compilation {
            message: message.into(),
            offset: self.unit.to_snippet_offset(span.start),
        }
    }

    /// Points a forward jump at the next instruction to be emitted.
    fn patch_jump(&mut self, index: usize) -> Result<()> {
        let target = self.instructions.len() as isize - index as isize;
        match self.instructions.get_mut(index).map(|i| &mut i.op) {
            Some(Op::Jump { offset }) | Some(Op::ConditionalJump { offset, .. }) => {
                *offset = target;
                Ok(())
            }
            _ => Err(EvalError::Internal(
                "jump patch target is not a jump".to_string(),
            )),
        }
    }

    /// Widens a forward jump by one slot after an instruction was inserted
    /// inside its range.
    fn bump_jump(&mut self, index: usize) -> Result<()> {
        match self.instructions.get_mut(index).map(|i| &mut i.op) {
            Some(Op::Jump { offset }) | Some(Op::ConditionalJump { offset, .. }) => {
                *offset += 1;
                Ok(())
            }
            _ => Err(EvalError::Internal(
                "jump adjust target is not a jump".to_string(),
            )),
        }
    }

    fn compile_stmt<'s>(
        &'s mut self,
        stmt: &'s ast::Stmt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 's>> {
        Box::pin(async move {
            match stmt {
                ast::Stmt::Empty(_) => Ok(()),
                ast::Stmt::Block(block) => {
                    for stmt in &block.statements {
                        self.compile_stmt(stmt).await?;
                    }
                    Ok(())
                }
                ast::Stmt::Expr(stmt) => {
                    self.compile_expr(&stmt.expr).await?;
                    self.emit(Op::Pop, stmt.range);
                    Ok(())
                }
                ast::Stmt::Return(stmt) => {
                    if let Some(expr) = &stmt.expr {
                        self.compile_expr(expr).await?;
                    }
                    let jump = self.emit(Op::Jump { offset: 0 }, stmt.range);
                    self.end_jumps.push(jump);
                    Ok(())
                }
                ast::Stmt::LocalVar(stmt) => self.compile_local_var(stmt).await,
                ast::Stmt::If(stmt) => self.compile_if(stmt).await,
                ast::Stmt::While(stmt) => self.compile_while(stmt).await,
            }
        })
    }

    async fn compile_local_var(&mut self, stmt: &ast::LocalVarStmt) -> Result<()> {
        let kind = StaticKind::from_type_name(&stmt.ty.text);
        if kind == StaticKind::Void {
            return Err(self.fail("`void` is not a variable type", stmt.ty.range));
        }
        self.emit(
            Op::DeclareLocal {
                name: stmt.name.clone(),
                type_name: kind.type_name(),
            },
            stmt.range,
        );
        self.locals.insert(stmt.name.clone(), kind.clone());
        if let Some(init) = &stmt.initializer {
            self.emit(Op::PushLocal(stmt.name.clone()), stmt.name_range);
            let value = self.compile_expr(init).await?;
            self.check_assignable(&kind, &value, init.range())?;
            self.convert_if_needed(&kind, &value, init.range());
            self.emit(Op::AssignVariable, stmt.range);
            self.emit(Op::Pop, stmt.range);
        }
        Ok(())
    }

    async fn compile_if(&mut self, stmt: &ast::IfStmt) -> Result<()> {
        let condition = self.compile_expr(&stmt.condition).await?;
        self.require_boolean(&condition, stmt.condition.range())?;
        let skip = self.emit(
            Op::ConditionalJump {
                offset: 0,
                jump_on_true: false,
            },
            stmt.condition.range(),
        );
        self.compile_stmt(&stmt.then_branch).await?;
        match &stmt.else_branch {
            Some(else_branch) => {
                let exit = self.emit(Op::Jump { offset: 0 }, stmt.range);
                self.patch_jump(skip)?;
                self.compile_stmt(else_branch).await?;
                self.patch_jump(exit)?;
            }
            None => self.patch_jump(skip)?,
        }
        Ok(())
    }

    async fn compile_while(&mut self, stmt: &ast::WhileStmt) -> Result<()> {
        let loop_start = self.instructions.len();
        let condition = self.compile_expr(&stmt.condition).await?;
        self.require_boolean(&condition, stmt.condition.range())?;
        let exit = self.emit(
            Op::ConditionalJump {
                offset: 0,
                jump_on_true: false,
            },
            stmt.condition.range(),
        );
        self.compile_stmt(&stmt.body).await?;
        let back = self.instructions.len() as isize;
        self.emit(
            Op::Jump {
                offset: loop_start as isize - back,
            },
            stmt.range,
        );
        self.patch_jump(exit)
    }

    fn compile_expr<'s>(
        &'s mut self,
        expr: &'s ast::Expr,
    ) -> Pin<Box<dyn Future<Output = Result<StaticKind>> + Send + 's>> {
        Box::pin(async move {
            match expr {
                ast::Expr::Literal(lit) => self.compile_literal(lit),
                ast::Expr::Name(name) => self.compile_name(name),
                ast::Expr::This(span) => self.compile_this(*span),
                ast::Expr::FieldAccess(access) => self.compile_field_ref(access, false).await,
                ast::Expr::ArrayAccess(access) => self.compile_array_ref(access).await,
                ast::Expr::Call(call) => self.compile_call(call).await,
                ast::Expr::New(new) => self.compile_new(new).await,
                ast::Expr::NewArray(new) => self.compile_new_array(new).await,
                ast::Expr::Cast(cast) => self.compile_cast(cast).await,
                ast::Expr::ClassLiteral(lit) => {
                    self.emit(Op::PushType(base_type_name(&lit.ty.text)), lit.ty.range);
                    self.emit(Op::PushClassLiteral, lit.range);
                    Ok(StaticKind::Object("java.lang.Class".to_string()))
                }
                ast::Expr::InstanceOf(test) => self.compile_instance_of(test).await,
                ast::Expr::Unary(unary) => self.compile_unary(unary).await,
                ast::Expr::Binary(binary) => match binary.op {
                    ast::BinaryOp::AndAnd | ast::BinaryOp::OrOr => {
                        self.compile_short_circuit(binary).await
                    }
                    _ => self.compile_binary(binary).await,
                },
                ast::Expr::Conditional(cond) => self.compile_conditional(cond).await,
                ast::Expr::Assign(assign) => self.compile_assign(assign).await,
                ast::Expr::Missing(span) => Err(self.fail("expression expected", *span)),
            }
        })
    }

    fn compile_literal(&mut self, lit: &ast::LiteralExpr) -> Result<StaticKind> {
        let value = decode_literal(lit.kind, &lit.text).map_err(|err| EvalError::Compilation {
            message: err.message,
            offset: self.unit.to_snippet_offset(lit.range.start + err.span.start),
        })?;
        let (op, kind) = match value {
            LiteralValue::Bool(v) => (Op::PushConstant(JdwpValue::Boolean(v)), StaticKind::Boolean),
            LiteralValue::Int(v) => (Op::PushConstant(JdwpValue::Int(v)), StaticKind::Int),
            LiteralValue::Long(v) => (Op::PushConstant(JdwpValue::Long(v)), StaticKind::Long),
            LiteralValue::Float(v) => (Op::PushConstant(JdwpValue::Float(v)), StaticKind::Float),
            LiteralValue::Double(v) => (Op::PushConstant(JdwpValue::Double(v)), StaticKind::Double),
            LiteralValue::Char(v) => (
                Op::PushConstant(JdwpValue::Char(v as u16)),
                StaticKind::Char,
            ),
            LiteralValue::Str(text) => (Op::PushString(text), StaticKind::Str),
            LiteralValue::Null => (Op::PushNull, StaticKind::Null),
        };
        self.emit(op, lit.range);
        Ok(kind)
    }

    fn compile_name(&mut self, name: &ast::NameExpr) -> Result<StaticKind> {
        if let Some(kind) = self.locals.get(&name.name) {
            let kind = kind.clone();
            self.emit(Op::PushLocal(name.name.clone()), name.range);
            return Ok(kind);
        }
        let binding = self.context.resolve(&name.name)?;
        self.push_binding(binding, name.range)
    }

    fn compile_this(&mut self, span: Span) -> Result<StaticKind> {
        if let Some(name) = &self.context.pseudo_this {
            let binding = self.context.resolve(name)?;
            return self.push_binding(binding, span);
        }
        if self.context.this_object.is_none() {
            return Err(self.fail("no `this` in a static context", span));
        }
        self.emit(Op::PushThis, span);
        Ok(StaticKind::from_type_name(&self.context.declaring_type_name))
    }

    fn push_binding(&mut self, binding: &context::Binding, span: Span) -> Result<StaticKind> {
        match (binding.kind, &binding.slot) {
            (BindingKind::Local | BindingKind::PseudoThis, _) => {
                self.emit(Op::PushLocal(binding.name.clone()), span);
            }
            (BindingKind::Field, BindingSlot::StaticField { .. }) => {
                self.emit(
                    Op::PushStaticField {
                        type_name: self.context.declaring_type_name.clone(),
                        name: binding.name.clone(),
                    },
                    span,
                );
            }
            (BindingKind::Field, _) => {
                self.emit(Op::PushThis, span);
                self.emit(Op::PushField(binding.name.clone()), span);
            }
        }
        Ok(StaticKind::from_signature(&binding.signature))
    }

    /// Field references, both reads and assignment targets; the emitted
    /// slot serves either way.
    async fn compile_field_ref(
        &mut self,
        access: &ast::FieldAccessExpr,
        assignable: bool,
    ) -> Result<StaticKind> {
        if let Some(type_name) = self.receiver_type_name(&access.receiver) {
            let Some(class_id) = self.lookup_class(&type_name).await? else {
                return Err(EvalError::Unresolved(type_name));
            };
            let Some((_, field)) = context::find_field(self.client, class_id, &access.name).await?
            else {
                return Err(EvalError::Unresolved(format!("{type_name}.{}", access.name)));
            };
            if !field.is_static() {
                return Err(self.fail(
                    format!("`{}` is not a static field of `{type_name}`", access.name),
                    access.name_range,
                ));
            }
            self.emit(
                Op::PushStaticField {
                    type_name,
                    name: access.name.clone(),
                },
                access.name_range,
            );
            return Ok(StaticKind::from_signature(&field.signature));
        }

        let receiver = self.compile_expr(&access.receiver).await?;
        if let StaticKind::Array(_) = receiver {
            if access.name == "length" {
                if assignable {
                    return Err(self.fail("the array `length` cannot be assigned", access.name_range));
                }
                self.emit(Op::ArrayLength, access.name_range);
                return Ok(StaticKind::Int);
            }
        }
        let class_name = self.class_for_kind(&receiver, access.receiver.range())?;
        let Some(class_id) = self.lookup_class(&class_name).await? else {
            return Err(EvalError::Unresolved(class_name));
        };
        let Some((found_in, field)) = context::find_field(self.client, class_id, &access.name).await?
        else {
            return Err(EvalError::Unresolved(format!("{class_name}.{}", access.name)));
        };
        if field.is_static() {
            // Static member reached through an instance; the receiver is
            // evaluated and discarded.
            self.emit(Op::Pop, access.receiver.range());
            let signature = self.client.reference_type_signature(found_in).await?;
            self.emit(
                Op::PushStaticField {
                    type_name: context::type_name_from_signature(&signature),
                    name: access.name.clone(),
                },
                access.name_range,
            );
        } else {
            self.emit(Op::PushField(access.name.clone()), access.name_range);
        }
        Ok(StaticKind::from_signature(&field.signature))
    }

    async fn compile_array_ref(&mut self, access: &ast::ArrayAccessExpr) -> Result<StaticKind> {
        let array = self.compile_expr(&access.array).await?;
        let StaticKind::Array(element) = array else {
            return Err(self.fail(
                format!("`{}` is not an array type", array.type_name()),
                access.array.range(),
            ));
        };
        let index = self.compile_expr(&access.index).await?;
        self.require_int(&index, access.index.range())?;
        self.emit(Op::PushArrayElement, access.range);
        Ok(StaticKind::from_type_name(&element))
    }

    async fn compile_call(&mut self, call: &ast::CallExpr) -> Result<StaticKind> {
        let argc = call.args.len();
        let Some(receiver) = &call.receiver else {
            // Unqualified call: a method of the declaring type.
            let found = context::find_method(
                self.client,
                self.context.declaring_type,
                &call.name,
                None,
                argc,
            )
            .await?;
            let Some((_, method)) = found else {
                return Err(EvalError::Unresolved(call.name.clone()));
            };
            if method.is_static() {
                self.compile_args(&call.args).await?;
                self.emit(
                    Op::InvokeMethod {
                        selector: call.name.clone(),
                        signature: Some(method.signature.clone()),
                        argc,
                        is_static: true,
                        declaring: Some(self.context.declaring_type_name.clone()),
                    },
                    call.name_range,
                );
            } else {
                if self.context.this_object.is_none() {
                    return Err(self.fail(
                        format!("cannot call the instance method `{}` in a static context", call.name),
                        call.name_range,
                    ));
                }
                self.emit(Op::PushThis, call.name_range);
                self.compile_args(&call.args).await?;
                self.emit(
                    Op::InvokeMethod {
                        selector: call.name.clone(),
                        signature: Some(method.signature.clone()),
                        argc,
                        is_static: false,
                        declaring: None,
                    },
                    call.name_range,
                );
            }
            return Ok(StaticKind::from_signature(context::method_return_signature(
                &method.signature,
            )));
        };

        if let Some(type_name) = self.receiver_type_name(receiver) {
            // Qualified by a type name: a static call.
            let Some(class_id) = self.lookup_class(&type_name).await? else {
                return Err(EvalError::Unresolved(type_name));
            };
            let found =
                context::find_method(self.client, class_id, &call.name, None, argc).await?;
            let Some((_, method)) = found else {
                return Err(EvalError::Unresolved(format!("{type_name}.{}", call.name)));
            };
            if !method.is_static() {
                return Err(self.fail(
                    format!("`{}` is not a static method of `{type_name}`", call.name),
                    call.name_range,
                ));
            }
            self.compile_args(&call.args).await?;
            self.emit(
                Op::InvokeMethod {
                    selector: call.name.clone(),
                    signature: Some(method.signature.clone()),
                    argc,
                    is_static: true,
                    declaring: Some(type_name),
                },
                call.name_range,
            );
            return Ok(StaticKind::from_signature(context::method_return_signature(
                &method.signature,
            )));
        }

        let receiver_kind = self.compile_expr(receiver).await?;
        let class_name = self.class_for_kind(&receiver_kind, receiver.range())?;
        let Some(class_id) = self.lookup_class(&class_name).await? else {
            return Err(EvalError::Unresolved(class_name));
        };
        let found = context::find_method(self.client, class_id, &call.name, None, argc).await?;
        let Some((found_in, method)) = found else {
            return Err(EvalError::Unresolved(format!("{class_name}.{}", call.name)));
        };
        if method.is_static() {
            self.emit(Op::Pop, receiver.range());
            let signature = self.client.reference_type_signature(found_in).await?;
            self.compile_args(&call.args).await?;
            self.emit(
                Op::InvokeMethod {
                    selector: call.name.clone(),
                    signature: Some(method.signature.clone()),
                    argc,
                    is_static: true,
                    declaring: Some(context::type_name_from_signature(&signature)),
                },
                call.name_range,
            );
        } else {
            self.compile_args(&call.args).await?;
            self.emit(
                Op::InvokeMethod {
                    selector: call.name.clone(),
                    signature: Some(method.signature.clone()),
                    argc,
                    is_static: false,
                    declaring: None,
                },
                call.name_range,
            );
        }
        Ok(StaticKind::from_signature(context::method_return_signature(
            &method.signature,
        )))
    }

    async fn compile_args(&mut self, args: &[ast::Expr]) -> Result<()> {
        for arg in args {
            self.compile_expr(arg).await?;
        }
        Ok(())
    }

    async fn compile_new(&mut self, new: &ast::NewExpr) -> Result<StaticKind> {
        let type_name = base_type_name(&new.ty.text);
        let Some(class_id) = self.lookup_class(&type_name).await? else {
            return Err(EvalError::Unresolved(type_name));
        };
        let argc = new.args.len();
        // Constructors are not inherited; only the class's own count.
        let constructor = self
            .client
            .reference_type_methods(class_id)
            .await?
            .into_iter()
            .find(|method| {
                method.name == "<init>"
                    && context::method_param_signatures(&method.signature).len() == argc
            });
        let Some(constructor) = constructor else {
            return Err(self.fail(
                format!("no constructor of `{type_name}` takes {argc} arguments"),
                new.range,
            ));
        };
        self.compile_args(&new.args).await?;
        self.emit(
            Op::Construct {
                type_name: type_name.clone(),
                signature: Some(constructor.signature.clone()),
                argc,
            },
            new.range,
        );
        Ok(StaticKind::from_type_name(&type_name))
    }

    async fn compile_new_array(&mut self, new: &ast::NewArrayExpr) -> Result<StaticKind> {
        let mut element = base_type_name(&new.element_ty.text);
        for _ in 1..new.dims {
            element.push_str("[]");
        }
        match &new.initializer {
            Some(values) => {
                let element_kind = StaticKind::from_type_name(&element);
                self.emit(Op::PushConstant(JdwpValue::Int(values.len() as i32)), new.range);
                self.emit(
                    Op::NewArray {
                        element_type: element.clone(),
                    },
                    new.range,
                );
                for (index, value) in values.iter().enumerate() {
                    self.emit(Op::Dup, value.range());
                    self.emit(Op::PushConstant(JdwpValue::Int(index as i32)), value.range());
                    self.emit(Op::PushArrayElement, value.range());
                    let kind = self.compile_expr(value).await?;
                    self.check_assignable(&element_kind, &kind, value.range())?;
                    self.convert_if_needed(&element_kind, &kind, value.range());
                    self.emit(Op::AssignVariable, value.range());
                    self.emit(Op::Pop, value.range());
                }
            }
            None => {
                let Some(length) = new.lengths.first() else {
                    return Err(self.fail("an array length is required", new.range));
                };
                if new.lengths.len() > 1 {
                    return Err(self.fail(
                        "multi-dimensional array allocation is not supported",
                        new.range,
                    ));
                }
                let kind = self.compile_expr(length).await?;
                self.require_int(&kind, length.range())?;
                self.emit(
                    Op::NewArray {
                        element_type: element.clone(),
                    },
                    new.range,
                );
            }
        }
        Ok(StaticKind::Array(element))
    }

    async fn compile_cast(&mut self, cast: &ast::CastExpr) -> Result<StaticKind> {
        let target = StaticKind::from_type_name(&cast.ty.text);
        let value = self.compile_expr(&cast.expr).await?;
        if target.is_numeric() && value.is_numeric() {
            self.emit(Op::Cast(target.cast_kind()), cast.range);
        } else if target.is_reference() && value.is_reference() {
            // Unchecked; the target VM would raise on a bad downcast at
            // first member access anyway.
            self.emit(Op::Cast(CastKind::Reference), cast.range);
        } else if target == StaticKind::Boolean && value == StaticKind::Boolean {
            // identity
        } else {
            return Err(self.fail(
                format!(
                    "cannot cast `{}` to `{}`",
                    value.type_name(),
                    target.type_name()
                ),
                cast.range,
            ));
        }
        Ok(target)
    }

    async fn compile_instance_of(&mut self, test: &ast::InstanceOfExpr) -> Result<StaticKind> {
        self.emit(Op::PushType(base_type_name(&test.ty.text)), test.ty.range);
        self.emit(Op::PushClassLiteral, test.ty.range);
        let value = self.compile_expr(&test.expr).await?;
        if !value.is_reference() {
            return Err(self.fail(
                format!(
                    "`instanceof` needs a reference operand, found `{}`",
                    value.type_name()
                ),
                test.expr.range(),
            ));
        }
        self.emit(
            Op::InvokeMethod {
                selector: "isInstance".to_string(),
                signature: Some("(Ljava/lang/Object;)Z".to_string()),
                argc: 1,
                is_static: false,
                declaring: Some("java.lang.Class".to_string()),
            },
            test.range,
        );
        Ok(StaticKind::Boolean)
    }

    async fn compile_unary(&mut self, unary: &ast::UnaryExpr) -> Result<StaticKind> {
        let operand = self.compile_expr(&unary.operand).await?;
        match unary.op {
            ast::UnaryOp::Not => {
                self.require_boolean(&operand, unary.operand.range())?;
                self.emit(
                    Op::Unary {
                        op: UnaryOp::Not,
                        kind: ResultKind::Boolean,
                    },
                    unary.range,
                );
                Ok(StaticKind::Boolean)
            }
            ast::UnaryOp::Neg | ast::UnaryOp::Plus => {
                if !operand.is_numeric() {
                    return Err(self.fail(
                        format!("a number is required but `{}` was found", operand.type_name()),
                        unary.operand.range(),
                    ));
                }
                let result = promoted_unary(&operand);
                self.emit(
                    Op::Unary {
                        op: if unary.op == ast::UnaryOp::Neg {
                            UnaryOp::Neg
                        } else {
                            UnaryOp::Plus
                        },
                        kind: unary_kind(&result),
                    },
                    unary.range,
                );
                Ok(result)
            }
            ast::UnaryOp::BitNot => {
                if !operand.is_integral() {
                    return Err(self.fail(
                        format!(
                            "an integral operand is required but `{}` was found",
                            operand.type_name()
                        ),
                        unary.operand.range(),
                    ));
                }
                let result = promoted_unary(&operand);
                self.emit(
                    Op::Unary {
                        op: UnaryOp::BitNot,
                        kind: unary_kind(&result),
                    },
                    unary.range,
                );
                Ok(result)
            }
        }
    }

    async fn compile_binary(&mut self, binary: &ast::BinaryExpr) -> Result<StaticKind> {
        let left = self.compile_expr(&binary.lhs).await?;
        let right = self.compile_expr(&binary.rhs).await?;
        let plan = self.binary_plan(binary.op, &left, &right, binary.range)?;
        self.emit(
            Op::Binary {
                op: plan.op,
                result_kind: plan.result_kind,
                left_kind: plan.left_kind,
                right_kind: plan.right_kind,
                is_assignment: false,
            },
            binary.range,
        );
        Ok(plan.result)
    }

    async fn compile_short_circuit(&mut self, binary: &ast::BinaryExpr) -> Result<StaticKind> {
        let jump_on_true = binary.op == ast::BinaryOp::OrOr;
        let left = self.compile_expr(&binary.lhs).await?;
        self.require_boolean(&left, binary.lhs.range())?;
        let short = self.emit(
            Op::ConditionalJump {
                offset: 0,
                jump_on_true,
            },
            binary.range,
        );
        let right = self.compile_expr(&binary.rhs).await?;
        self.require_boolean(&right, binary.rhs.range())?;
        let exit = self.emit(Op::Jump { offset: 0 }, binary.range);
        self.patch_jump(short)?;
        self.emit(Op::PushConstant(JdwpValue::Boolean(jump_on_true)), binary.range);
        self.patch_jump(exit)?;
        Ok(StaticKind::Boolean)
    }

    async fn compile_conditional(&mut self, cond: &ast::ConditionalExpr) -> Result<StaticKind> {
        let condition = self.compile_expr(&cond.condition).await?;
        self.require_boolean(&condition, cond.condition.range())?;
        let to_else = self.emit(
            Op::ConditionalJump {
                offset: 0,
                jump_on_true: false,
            },
            cond.condition.range(),
        );
        let then_kind = self.compile_expr(&cond.then_expr).await?;
        let mut exit = self.emit(Op::Jump { offset: 0 }, cond.range);
        self.patch_jump(to_else)?;
        let else_kind = self.compile_expr(&cond.else_expr).await?;
        let result = self.unify_branches(&then_kind, &else_kind, cond.range)?;
        if result.is_numeric() {
            if else_kind.is_numeric() && else_kind != result {
                self.emit(Op::Cast(result.cast_kind()), cond.else_expr.range());
            }
            if then_kind.is_numeric() && then_kind != result {
                // The then branch needs its conversion before the exit
                // jump; the skip over it grows by one.
                self.instructions.insert(
                    exit,
                    Instruction {
                        op: Op::Cast(result.cast_kind()),
                        start: self.unit.to_snippet_offset(cond.then_expr.range().start),
                    },
                );
                self.bump_jump(to_else)?;
                exit += 1;
            }
        }
        self.patch_jump(exit)?;
        Ok(result)
    }

    fn unify_branches(
        &self,
        then_kind: &StaticKind,
        else_kind: &StaticKind,
        span: Span,
    ) -> Result<StaticKind> {
        if then_kind == else_kind {
            return Ok(then_kind.clone());
        }
        if let Some(kind) = promote(then_kind, else_kind) {
            return Ok(static_of(kind));
        }
        if then_kind.is_reference() && else_kind.is_reference() {
            if *then_kind == StaticKind::Null {
                return Ok(else_kind.clone());
            }
            if *else_kind == StaticKind::Null {
                return Ok(then_kind.clone());
            }
            return Ok(StaticKind::Object("java.lang.Object".to_string()));
        }
        Err(self.fail(
            format!(
                "incompatible branch types `{}` and `{}`",
                then_kind.type_name(),
                else_kind.type_name()
            ),
            span,
        ))
    }

    async fn compile_assign(&mut self, assign: &ast::AssignExpr) -> Result<StaticKind> {
        let target = self.compile_assign_target(&assign.target).await?;
        match assign.op {
            None => {
                let value = self.compile_expr(&assign.value).await?;
                self.check_assignable(&target, &value, assign.value.range())?;
                self.convert_if_needed(&target, &value, assign.value.range());
                self.emit(Op::AssignVariable, assign.range);
            }
            Some(op) => {
                self.emit(Op::Dup, assign.range);
                let value = self.compile_expr(&assign.value).await?;
                let plan = self.binary_plan(op, &target, &value, assign.range)?;
                self.emit(
                    Op::Binary {
                        op: plan.op,
                        result_kind: plan.result_kind,
                        left_kind: plan.left_kind,
                        right_kind: plan.right_kind,
                        is_assignment: true,
                    },
                    assign.range,
                );
            }
        }
        Ok(target)
    }

    async fn compile_assign_target(&mut self, target: &ast::Expr) -> Result<StaticKind> {
        match target {
            ast::Expr::Name(name) => {
                if let Some(kind) = self.locals.get(&name.name) {
                    let kind = kind.clone();
                    self.emit(Op::PushLocal(name.name.clone()), name.range);
                    return Ok(kind);
                }
                let binding = self.context.resolve(&name.name)?;
                if binding.kind == BindingKind::PseudoThis {
                    return Err(self.fail(
                        format!("`{}` cannot be assigned", name.name),
                        name.range,
                    ));
                }
                self.push_binding(binding, name.range)
            }
            ast::Expr::FieldAccess(access) => self.compile_field_ref(access, true).await,
            ast::Expr::ArrayAccess(access) => self.compile_array_ref(access).await,
            other => Err(self.fail("this expression cannot be assigned", other.range())),
        }
    }

    fn binary_plan(
        &self,
        op: ast::BinaryOp,
        left: &StaticKind,
        right: &StaticKind,
        span: Span,
    ) -> Result<BinaryPlan> {
        let Some(wire) = wire_op(op) else {
            return Err(EvalError::Internal(
                "short-circuit operator has no direct lowering".to_string(),
            ));
        };
        let (Some(left_kind), Some(right_kind)) = (left.result_kind(), right.result_kind()) else {
            return Err(self.fail("cannot operate on a `void` value", span));
        };
        let incompatible = || {
            self.fail(
                format!(
                    "operator `{}` cannot be applied to `{}` and `{}`",
                    op_symbol(op),
                    left.type_name(),
                    right.type_name()
                ),
                span,
            )
        };

        let (result, result_kind) = match op {
            ast::BinaryOp::Add
                if *left == StaticKind::Str || *right == StaticKind::Str =>
            {
                (StaticKind::Str, ResultKind::Str)
            }
            ast::BinaryOp::Shl | ast::BinaryOp::Shr | ast::BinaryOp::UShr => {
                if !left.is_integral() || !right.is_integral() {
                    return Err(incompatible());
                }
                if *left == StaticKind::Long {
                    (StaticKind::Long, ResultKind::Long)
                } else {
                    (StaticKind::Int, ResultKind::Int)
                }
            }
            ast::BinaryOp::BitAnd | ast::BinaryOp::BitOr | ast::BinaryOp::BitXor => {
                if *left == StaticKind::Boolean && *right == StaticKind::Boolean {
                    (StaticKind::Boolean, ResultKind::Boolean)
                } else if left.is_integral() && right.is_integral() {
                    let kind = promote(left, right).ok_or_else(incompatible)?;
                    (static_of(kind), kind)
                } else {
                    return Err(incompatible());
                }
            }
            ast::BinaryOp::Eq | ast::BinaryOp::Ne => {
                if left.is_reference() && right.is_reference() {
                    (StaticKind::Boolean, ResultKind::Str)
                } else if left.is_numeric() && right.is_numeric() {
                    let kind = promote(left, right).ok_or_else(incompatible)?;
                    (StaticKind::Boolean, kind)
                } else if *left == StaticKind::Boolean && *right == StaticKind::Boolean {
                    (StaticKind::Boolean, ResultKind::Boolean)
                } else {
                    return Err(incompatible());
                }
            }
            ast::BinaryOp::Lt | ast::BinaryOp::Le | ast::BinaryOp::Gt | ast::BinaryOp::Ge => {
                let kind = promote(left, right).ok_or_else(incompatible)?;
                (StaticKind::Boolean, kind)
            }
            _ => {
                let kind = promote(left, right).ok_or_else(incompatible)?;
                (static_of(kind), kind)
            }
        };
        Ok(BinaryPlan {
            op: wire,
            result,
            result_kind,
            left_kind,
            right_kind,
        })
    }

    fn check_assignable(
        &self,
        target: &StaticKind,
        value: &StaticKind,
        span: Span,
    ) -> Result<()> {
        if target == value {
            return Ok(());
        }
        if target.is_numeric() && value.is_numeric() && widens_to(value, target) {
            return Ok(());
        }
        if target.is_reference() && value.is_reference() {
            return Ok(());
        }
        Err(self.fail(
            format!(
                "a `{}` value cannot be assigned to `{}`",
                value.type_name(),
                target.type_name()
            ),
            span,
        ))
    }

    fn convert_if_needed(&mut self, target: &StaticKind, value: &StaticKind, span: Span) {
        if target.is_numeric() && value.is_numeric() && target != value {
            self.emit(Op::Cast(target.cast_kind()), span);
        }
    }

    /// The class a member of this value is resolved against.
    fn class_for_kind(&self, kind: &StaticKind, span: Span) -> Result<String> {
        match kind {
            StaticKind::Str => Ok("java.lang.String".to_string()),
            StaticKind::Object(name) => Ok(name.clone()),
            StaticKind::Array(_) => Ok("java.lang.Object".to_string()),
            StaticKind::Null => Err(self.fail("cannot dereference `null`", span)),
            other => Err(self.fail(
                format!("cannot dereference a `{}` value", other.type_name()),
                span,
            )),
        }
    }

    /// A dotted receiver that names a type rather than a value. Any head
    /// segment that is bound as a local or context name wins over types.
    fn receiver_type_name(&self, expr: &ast::Expr) -> Option<String> {
        let dotted = dotted_name(expr)?;
        let head = dotted.split('.').next().unwrap_or(dotted.as_str());
        if self.locals.contains_key(head) || self.context.binding(head).is_some() {
            return None;
        }
        Some(dotted)
    }

    async fn lookup_class(&mut self, type_name: &str) -> Result<Option<ReferenceTypeId>> {
        if let Some(cached) = self.classes.get(type_name) {
            return Ok(*cached);
        }
        let signature = context::signature_from_type_name(type_name);
        let classes = self.client.classes_by_signature(&signature).await?;
        let id = classes.first().map(|class| class.type_id);
        self.classes.insert(type_name.to_string(), id);
        Ok(id)
    }

    fn require_boolean(&self, kind: &StaticKind, span: Span) -> Result<()> {
        if *kind == StaticKind::Boolean {
            Ok(())
        } else {
            Err(self.fail(
                format!("a boolean is required but `{}` was found", kind.type_name()),
                span,
            ))
        }
    }

    fn require_int(&self, kind: &StaticKind, span: Span) -> Result<()> {
        match kind {
            StaticKind::Byte | StaticKind::Short | StaticKind::Char | StaticKind::Int => Ok(()),
            _ => Err(self.fail(
                format!("an int is required but `{}` was found", kind.type_name()),
                span,
            )),
        }
    }
}

fn unary_kind(kind: &StaticKind) -> ResultKind {
    match kind {
        StaticKind::Long => ResultKind::Long,
        StaticKind::Float => ResultKind::Float,
        StaticKind::Double => ResultKind::Double,
        _ => ResultKind::Int,
    }
}
