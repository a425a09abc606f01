use pretty_assertions::assert_eq;

use crate::ast::{BinaryOp, Expr, MemberDecl, Stmt, TypeKind, UnaryOp};
use crate::{parse_block_body, parse_compilation_unit, Span};

fn parse_expr(text: &str) -> Expr {
    let source = format!("{text};");
    let parse = parse_block_body(&source, 0);
    assert!(
        parse.errors().is_empty(),
        "unexpected errors for {text:?}: {:?}",
        parse.errors()
    );
    let block = parse.block();
    assert_eq!(block.statements.len(), 1, "statement count for {text:?}");
    match &block.statements[0] {
        Stmt::Expr(stmt) => stmt.expr.clone(),
        other => panic!("expected an expression statement, got {other:?}"),
    }
}

fn shape(text: &str) -> String {
    render(&parse_expr(text))
}

fn render(expr: &Expr) -> String {
    match expr {
        Expr::Name(name) => name.name.clone(),
        Expr::Literal(lit) => lit.text.clone(),
        Expr::This(_) => "this".to_string(),
        Expr::FieldAccess(access) => format!("{}.{}", render(&access.receiver), access.name),
        Expr::ArrayAccess(access) => {
            format!("{}[{}]", render(&access.array), render(&access.index))
        }
        Expr::Call(call) => {
            let args = call.args.iter().map(render).collect::<Vec<_>>().join(", ");
            match &call.receiver {
                Some(receiver) => format!("{}.{}({args})", render(receiver), call.name),
                None => format!("{}({args})", call.name),
            }
        }
        Expr::New(new) => {
            let args = new.args.iter().map(render).collect::<Vec<_>>().join(", ");
            format!("new {}({args})", new.ty.text)
        }
        Expr::NewArray(new) => {
            let mut out = format!("new {}", new.element_ty.text);
            for dim in 0..new.dims {
                match new.lengths.get(dim) {
                    Some(len) => {
                        out.push('[');
                        out.push_str(&render(len));
                        out.push(']');
                    }
                    None => out.push_str("[]"),
                }
            }
            if let Some(init) = &new.initializer {
                let elements = init.iter().map(render).collect::<Vec<_>>().join(", ");
                out.push('{');
                out.push_str(&elements);
                out.push('}');
            }
            out
        }
        Expr::Cast(cast) => format!("(({}) {})", cast.ty.text, render(&cast.expr)),
        Expr::ClassLiteral(lit) => format!("{}.class", lit.ty.text),
        Expr::InstanceOf(node) => {
            format!("({} instanceof {})", render(&node.expr), node.ty.text)
        }
        Expr::Unary(unary) => format!("({}{})", unary_op(unary.op), render(&unary.operand)),
        Expr::Binary(binary) => format!(
            "({} {} {})",
            render(&binary.lhs),
            binary_op(binary.op),
            render(&binary.rhs)
        ),
        Expr::Conditional(cond) => format!(
            "({} ? {} : {})",
            render(&cond.condition),
            render(&cond.then_expr),
            render(&cond.else_expr)
        ),
        Expr::Assign(assign) => {
            let op = match assign.op {
                Some(op) => format!("{}=", binary_op(op)),
                None => "=".to_string(),
            };
            format!("({} {op} {})", render(&assign.target), render(&assign.value))
        }
        Expr::Missing(_) => "<missing>".to_string(),
    }
}

fn binary_op(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
        BinaryOp::UShr => ">>>",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::BitAnd => "&",
        BinaryOp::BitXor => "^",
        BinaryOp::BitOr => "|",
        BinaryOp::AndAnd => "&&",
        BinaryOp::OrOr => "||",
    }
}

fn unary_op(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Plus => "+",
        UnaryOp::Neg => "-",
        UnaryOp::Not => "!",
        UnaryOp::BitNot => "~",
    }
}

#[test]
fn precedence_and_associativity() {
    assert_eq!(shape("1 + 2 * 3"), "(1 + (2 * 3))");
    assert_eq!(shape("1 * 2 + 3"), "((1 * 2) + 3)");
    assert_eq!(shape("a - b - c"), "((a - b) - c)");
    assert_eq!(shape("a == b && c == d"), "((a == b) && (c == d))");
    assert_eq!(shape("x & 7 | y ^ 2"), "((x & 7) | (y ^ 2))");
    assert_eq!(shape("a || b && c"), "(a || (b && c))");
    assert_eq!(shape("-a * b"), "((-a) * b)");
    assert_eq!(shape("!(a || b)"), "(!(a || b))");
    assert_eq!(shape("~x + 1"), "((~x) + 1)");
}

#[test]
fn shift_operators_reassemble_from_angle_tokens() {
    assert_eq!(shape("a << 2"), "(a << 2)");
    assert_eq!(shape("a >> 2"), "(a >> 2)");
    assert_eq!(shape("a >>> 2"), "(a >>> 2)");
    assert_eq!(shape("1 << 2 + 3"), "(1 << (2 + 3))");
    assert_eq!(shape("a >> b < c"), "((a >> b) < c)");
    assert_eq!(shape("a < b"), "(a < b)");
    assert_eq!(shape("a <= b"), "(a <= b)");
}

#[test]
fn shift_assignments() {
    assert_eq!(shape("x <<= 2"), "(x <<= 2)");
    assert_eq!(shape("x >>= 2"), "(x >>= 2)");
    assert_eq!(shape("x >>>= 2"), "(x >>>= 2)");
}

#[test]
fn assignment_forms() {
    assert_eq!(shape("x = 1"), "(x = 1)");
    assert_eq!(shape("x = y = 1"), "(x = (y = 1))");
    assert_eq!(shape("x += 2"), "(x += 2)");
    assert_eq!(shape("x %= 2"), "(x %= 2)");
    assert_eq!(shape("arr[0] = v"), "(arr[0] = v)");
    assert_eq!(shape("obj.count = v + 1"), "(obj.count = (v + 1))");
}

#[test]
fn assignment_target_must_be_a_place() {
    let parse = parse_block_body("1 = 2;", 0);
    assert_eq!(parse.errors().len(), 1);
    assert!(parse.errors()[0].message.contains("assigned"));
}

#[test]
fn calls_fields_and_indexing() {
    assert_eq!(shape("list.get(0).toString()"), "list.get(0).toString()");
    assert_eq!(shape("this.count"), "this.count");
    assert_eq!(shape("a.b.c"), "a.b.c");
    assert_eq!(shape("arr[i + 1]"), "arr[(i + 1)]");
    assert_eq!(shape("grid[0][1]"), "grid[0][1]");
    assert_eq!(shape("foo(1, bar(x))"), "foo(1, bar(x))");
    assert_eq!(shape("items.length"), "items.length");
}

#[test]
fn casts_and_parenthesized_expressions() {
    assert_eq!(shape("(int) x"), "((int) x)");
    assert_eq!(shape("(long) (a + b)"), "((long) (a + b))");
    assert_eq!(shape("(byte) -1"), "((byte) (-1))");
    assert_eq!(shape("(List<String>) value"), "((List<String>) value)");
    assert_eq!(shape("(String[]) value"), "((String[]) value)");
    // Parenthesized operand, not a cast.
    assert_eq!(shape("(a) + b"), "(a + b)");
    assert_eq!(shape("(a) - b"), "(a - b)");
}

#[test]
fn instanceof_and_class_literals() {
    assert_eq!(shape("x instanceof String"), "(x instanceof String)");
    assert_eq!(
        shape("x instanceof java.lang.String"),
        "(x instanceof java.lang.String)"
    );
    assert_eq!(
        shape("x instanceof String && y"),
        "((x instanceof String) && y)"
    );
    assert_eq!(shape("String.class"), "String.class");
    assert_eq!(shape("java.util.List.class"), "java.util.List.class");
}

#[test]
fn conditional_expressions() {
    assert_eq!(shape("a ? b : c"), "(a ? b : c)");
    assert_eq!(shape("a ? b : c ? d : e"), "(a ? b : (c ? d : e))");
    assert_eq!(shape("a == b ? x + 1 : y"), "((a == b) ? (x + 1) : y)");
}

#[test]
fn new_expressions() {
    assert_eq!(shape("new Foo(1, x)"), "new Foo(1, x)");
    assert_eq!(shape("new java.util.ArrayList()"), "new java.util.ArrayList()");
    assert_eq!(shape("new int[3]"), "new int[3]");
    assert_eq!(shape("new int[n + 1]"), "new int[(n + 1)]");
    assert_eq!(shape("new String[2][]"), "new String[2][]");
    assert_eq!(shape("new int[]{1, 2, 3}"), "new int[]{1, 2, 3}");
}

#[test]
fn new_array_needs_length_or_initializer() {
    let parse = parse_block_body("new int[];", 0);
    assert_eq!(parse.errors().len(), 1);
    assert!(parse.errors()[0].message.contains("length"));
}

#[test]
fn statement_forms() {
    let source = "int x = 1; if (x > 0) { x = 2; } else x = 3; while (x < 10) x = x + 1; return x;";
    let parse = parse_block_body(source, 0);
    assert!(parse.errors().is_empty(), "{:?}", parse.errors());
    let stmts = &parse.block().statements;
    assert_eq!(stmts.len(), 4);

    match &stmts[0] {
        Stmt::LocalVar(local) => {
            assert_eq!(local.ty.text, "int");
            assert_eq!(local.name, "x");
            assert!(local.initializer.is_some());
        }
        other => panic!("expected a local variable, got {other:?}"),
    }
    match &stmts[1] {
        Stmt::If(stmt) => {
            assert_eq!(render(&stmt.condition), "(x > 0)");
            assert!(matches!(*stmt.then_branch, Stmt::Block(_)));
            assert!(stmt.else_branch.is_some());
        }
        other => panic!("expected an if statement, got {other:?}"),
    }
    match &stmts[2] {
        Stmt::While(stmt) => {
            assert_eq!(render(&stmt.condition), "(x < 10)");
            assert!(matches!(*stmt.body, Stmt::Expr(_)));
        }
        other => panic!("expected a while statement, got {other:?}"),
    }
    match &stmts[3] {
        Stmt::Return(stmt) => assert_eq!(render(stmt.expr.as_ref().unwrap()), "x"),
        other => panic!("expected a return statement, got {other:?}"),
    }
}

#[test]
fn generic_local_variable_types() {
    let parse = parse_block_body("Map<String, List<Integer>> m = null; List<int[]> xs;", 0);
    assert!(parse.errors().is_empty(), "{:?}", parse.errors());
    let stmts = &parse.block().statements;
    assert_eq!(stmts.len(), 2);
    match &stmts[0] {
        Stmt::LocalVar(local) => assert_eq!(local.ty.text, "Map<String,List<Integer>>"),
        other => panic!("expected a local variable, got {other:?}"),
    }
    match &stmts[1] {
        Stmt::LocalVar(local) => assert_eq!(local.ty.text, "List<int[]>"),
        other => panic!("expected a local variable, got {other:?}"),
    }
}

#[test]
fn comparison_is_not_mistaken_for_a_declaration() {
    let parse = parse_block_body("a < b;", 0);
    assert!(parse.errors().is_empty(), "{:?}", parse.errors());
    match &parse.block().statements[0] {
        Stmt::Expr(stmt) => assert_eq!(render(&stmt.expr), "(a < b)"),
        other => panic!("expected an expression statement, got {other:?}"),
    }
}

#[test]
fn block_body_spans_are_file_relative() {
    let parse = parse_block_body("x = 1;", 10);
    assert!(parse.errors().is_empty());
    let block = parse.block();
    assert_eq!(block.range, Span::new(10, 16));
    match &block.statements[0] {
        Stmt::Expr(stmt) => {
            assert_eq!(stmt.range, Span::new(10, 16));
            match &stmt.expr {
                Expr::Assign(assign) => assert_eq!(assign.target.range(), Span::new(10, 11)),
                other => panic!("expected an assignment, got {other:?}"),
            }
        }
        other => panic!("expected an expression statement, got {other:?}"),
    }
}

#[test]
fn recovery_keeps_parsing_after_an_error() {
    let parse = parse_block_body("x = ; y = 2;", 0);
    assert!(!parse.errors().is_empty());
    let stmts = &parse.block().statements;
    assert_eq!(stmts.len(), 2);
    match &stmts[0] {
        Stmt::Expr(stmt) => match &stmt.expr {
            Expr::Assign(assign) => assert!(matches!(*assign.value, Expr::Missing(_))),
            other => panic!("expected an assignment, got {other:?}"),
        },
        other => panic!("expected an expression statement, got {other:?}"),
    }
    match &stmts[1] {
        Stmt::Expr(stmt) => assert_eq!(render(&stmt.expr), "(y = 2)"),
        other => panic!("expected an expression statement, got {other:?}"),
    }
}

#[test]
fn compilation_unit_skeleton() {
    let source = "\
package demo.app;

import java.util.List;

public class Counter {
    private int count;

    public Counter(int start) { count = start; }

    public int get() { return count; }

    void bump() { count = count + 1; }
}
";
    let parse = parse_compilation_unit(source);
    assert!(parse.errors().is_empty(), "{:?}", parse.errors());
    let unit = parse.compilation_unit();
    assert_eq!(unit.package.as_ref().map(|p| p.name.as_str()), Some("demo.app"));
    assert_eq!(unit.types.len(), 1);

    let decl = &unit.types[0];
    assert_eq!(decl.kind, TypeKind::Class);
    assert_eq!(decl.name, "Counter");
    assert_eq!(unit.qualified_name(decl), "demo.app.Counter");
    assert_eq!(&source[decl.body_range.start..decl.body_range.start + 1], "{");
    assert_eq!(&source[decl.body_range.end - 1..decl.body_range.end], "}");

    assert_eq!(decl.members.len(), 4);
    match &decl.members[0] {
        MemberDecl::Field(field) => {
            assert_eq!(field.ty.text, "int");
            assert_eq!(field.name, "count");
        }
        other => panic!("expected a field, got {other:?}"),
    }
    match &decl.members[1] {
        MemberDecl::Method(ctor) => {
            assert!(ctor.is_constructor());
            assert_eq!(ctor.name, "Counter");
            assert_eq!(ctor.params.len(), 1);
            assert_eq!(ctor.params[0].ty.text, "int");
            assert_eq!(ctor.params[0].name, "start");
        }
        other => panic!("expected a constructor, got {other:?}"),
    }
    match &decl.members[2] {
        MemberDecl::Method(method) => {
            assert!(!method.is_constructor());
            assert_eq!(method.name, "get");
            assert_eq!(method.return_ty.as_ref().map(|t| t.text.as_str()), Some("int"));
            let body = method.body.as_ref().unwrap();
            assert_eq!(body.statements.len(), 1);
        }
        other => panic!("expected a method, got {other:?}"),
    }
    match &decl.members[3] {
        MemberDecl::Method(method) => assert_eq!(method.name, "bump"),
        other => panic!("expected a method, got {other:?}"),
    }
}

#[test]
fn enum_constants_are_skipped_but_members_survive() {
    let source = "enum Color { RED, GREEN, BLUE; int code() { return 0; } }";
    let parse = parse_compilation_unit(source);
    assert!(parse.errors().is_empty(), "{:?}", parse.errors());
    let decl = &parse.compilation_unit().types[0];
    assert_eq!(decl.kind, TypeKind::Enum);
    assert_eq!(decl.members.len(), 1);
    match &decl.members[0] {
        MemberDecl::Method(method) => assert_eq!(method.name, "code"),
        other => panic!("expected a method, got {other:?}"),
    }
}

#[test]
fn interface_methods_have_no_body() {
    let source = "interface Greeter { String greet(String name); }";
    let parse = parse_compilation_unit(source);
    assert!(parse.errors().is_empty(), "{:?}", parse.errors());
    let decl = &parse.compilation_unit().types[0];
    assert_eq!(decl.kind, TypeKind::Interface);
    match &decl.members[0] {
        MemberDecl::Method(method) => {
            assert_eq!(method.name, "greet");
            assert!(method.body.is_none());
        }
        other => panic!("expected a method, got {other:?}"),
    }
}

#[test]
fn nested_types_and_initializers() {
    let source = "\
class Outer {
    static { setup(); }
    class Inner { int v; }
}
";
    let parse = parse_compilation_unit(source);
    assert!(parse.errors().is_empty(), "{:?}", parse.errors());
    let decl = &parse.compilation_unit().types[0];
    assert_eq!(decl.members.len(), 2);
    assert!(matches!(
        &decl.members[0],
        MemberDecl::Initializer(init) if init.is_static
    ));
    match &decl.members[1] {
        MemberDecl::Type(inner) => {
            assert_eq!(inner.name, "Inner");
            assert_eq!(inner.members.len(), 1);
        }
        other => panic!("expected a nested type, got {other:?}"),
    }
}
