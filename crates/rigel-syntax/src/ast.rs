//! Positioned AST nodes.
//!
//! Every node carries a half-open byte `range` into the text it was parsed
//! from. When a body is parsed with a nonzero base offset the ranges are
//! relative to the enclosing file, which lets callers map diagnostics from
//! spliced source back to the original snippet.

use std::fmt;

/// A half-open byte range (`start..end`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span({}..{})", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    pub package: Option<PackageDecl>,
    pub types: Vec<TypeDecl>,
    pub range: Span,
}

impl CompilationUnit {
    /// Dotted name of `decl` including the package prefix.
    pub fn qualified_name(&self, decl: &TypeDecl) -> String {
        match &self.package {
            Some(pkg) => format!("{}.{}", pkg.name, decl.name),
            None => decl.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDecl {
    pub name: String,
    pub range: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Record,
    Annotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDecl {
    pub kind: TypeKind,
    pub name: String,
    pub name_range: Span,
    pub range: Span,
    /// Range of the `{ ... }` body including both braces.
    pub body_range: Span,
    pub members: Vec<MemberDecl>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberDecl {
    Field(FieldDecl),
    Method(MethodDecl),
    Initializer(InitializerDecl),
    Type(TypeDecl),
}

/// A type reference kept as written (`java.util.List<String>[]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub text: String,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub ty: TypeRef,
    pub name: String,
    pub name_range: Span,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub ty: TypeRef,
    pub name: String,
    pub name_range: Span,
    pub range: Span,
}

/// Method or constructor. Constructors have no return type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDecl {
    pub return_ty: Option<TypeRef>,
    pub name: String,
    pub name_range: Span,
    pub params: Vec<ParamDecl>,
    pub body: Option<Block>,
    pub range: Span,
}

impl MethodDecl {
    pub fn is_constructor(&self) -> bool {
        self.return_ty.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializerDecl {
    pub is_static: bool,
    pub body: Block,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
    LocalVar(LocalVarStmt),
    Expr(ExprStmt),
    If(IfStmt),
    While(WhileStmt),
    Return(ReturnStmt),
    Block(Block),
    Empty(Span),
}

impl Stmt {
    pub fn range(&self) -> Span {
        match self {
            Stmt::LocalVar(stmt) => stmt.range,
            Stmt::Expr(stmt) => stmt.range,
            Stmt::If(stmt) => stmt.range,
            Stmt::While(stmt) => stmt.range,
            Stmt::Return(stmt) => stmt.range,
            Stmt::Block(block) => block.range,
            Stmt::Empty(range) => *range,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVarStmt {
    pub ty: TypeRef,
    pub name: String,
    pub name_range: Span,
    pub initializer: Option<Expr>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprStmt {
    pub expr: Expr,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfStmt {
    pub condition: Expr,
    pub then_branch: Box<Stmt>,
    pub else_branch: Option<Box<Stmt>>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Box<Stmt>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnStmt {
    pub expr: Option<Expr>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Name(NameExpr),
    Literal(LiteralExpr),
    This(Span),
    FieldAccess(FieldAccessExpr),
    ArrayAccess(ArrayAccessExpr),
    Call(CallExpr),
    New(NewExpr),
    NewArray(NewArrayExpr),
    Cast(CastExpr),
    ClassLiteral(ClassLiteralExpr),
    InstanceOf(InstanceOfExpr),
    Unary(UnaryExpr),
    Binary(BinaryExpr),
    Conditional(ConditionalExpr),
    Assign(AssignExpr),
    Missing(Span),
}

impl Expr {
    pub fn range(&self) -> Span {
        match self {
            Expr::Name(expr) => expr.range,
            Expr::Literal(expr) => expr.range,
            Expr::This(range) => *range,
            Expr::FieldAccess(expr) => expr.range,
            Expr::ArrayAccess(expr) => expr.range,
            Expr::Call(expr) => expr.range,
            Expr::New(expr) => expr.range,
            Expr::NewArray(expr) => expr.range,
            Expr::Cast(expr) => expr.range,
            Expr::ClassLiteral(expr) => expr.range,
            Expr::InstanceOf(expr) => expr.range,
            Expr::Unary(expr) => expr.range,
            Expr::Binary(expr) => expr.range,
            Expr::Conditional(expr) => expr.range,
            Expr::Assign(expr) => expr.range,
            Expr::Missing(range) => *range,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameExpr {
    pub name: String,
    pub range: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Int,
    Long,
    Float,
    Double,
    Char,
    Str,
    Bool,
    Null,
}

/// Literal with its raw text; decoding lives in [`crate::literals`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralExpr {
    pub kind: LiteralKind,
    pub text: String,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAccessExpr {
    pub receiver: Box<Expr>,
    pub name: String,
    pub name_range: Span,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayAccessExpr {
    pub array: Box<Expr>,
    pub index: Box<Expr>,
    pub range: Span,
}

/// Method invocation. `receiver` is `None` for unqualified calls (`foo()`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallExpr {
    pub receiver: Option<Box<Expr>>,
    pub name: String,
    pub name_range: Span,
    pub args: Vec<Expr>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExpr {
    pub ty: TypeRef,
    pub args: Vec<Expr>,
    pub range: Span,
}

/// `new T[len]...` or `new T[]{ ... }`.
///
/// `dims` counts bracket pairs; `lengths` holds the leading explicit length
/// expressions (empty for the initializer form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArrayExpr {
    pub element_ty: TypeRef,
    pub dims: usize,
    pub lengths: Vec<Expr>,
    pub initializer: Option<Vec<Expr>>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastExpr {
    pub ty: TypeRef,
    pub expr: Box<Expr>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLiteralExpr {
    pub ty: TypeRef,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOfExpr {
    pub expr: Box<Expr>,
    pub ty: TypeRef,
    pub range: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub operand: Box<Expr>,
    pub range: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    UShr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    AndAnd,
    OrOr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub range: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalExpr {
    pub condition: Box<Expr>,
    pub then_expr: Box<Expr>,
    pub else_expr: Box<Expr>,
    pub range: Span,
}

/// Simple (`op` is `None`) or compound assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignExpr {
    pub target: Box<Expr>,
    pub op: Option<BinaryOp>,
    pub value: Box<Expr>,
    pub range: Span,
}
