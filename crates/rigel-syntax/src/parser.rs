//! Recursive-descent parser with error recovery.
//!
//! The parser never fails outright: unparseable input becomes `Missing`
//! nodes and every problem is recorded as a [`SyntaxError`], so callers see
//! all diagnostics in one pass. Type declarations are parsed only as deep
//! as source splicing needs (names, member signatures, body ranges); the
//! statement and expression grammar covers the debugger snippet subset.

use crate::ast::{self, Span};
use crate::lexer::{Lexer, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parse {
    compilation_unit: ast::CompilationUnit,
    errors: Vec<SyntaxError>,
}

impl Parse {
    #[must_use]
    pub fn compilation_unit(&self) -> &ast::CompilationUnit {
        &self.compilation_unit
    }

    #[must_use]
    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BodyParse {
    block: ast::Block,
    errors: Vec<SyntaxError>,
}

impl BodyParse {
    #[must_use]
    pub fn block(&self) -> &ast::Block {
        &self.block
    }

    #[must_use]
    pub fn errors(&self) -> &[SyntaxError] {
        &self.errors
    }

    pub fn into_parts(self) -> (ast::Block, Vec<SyntaxError>) {
        (self.block, self.errors)
    }
}

#[must_use]
pub fn parse_compilation_unit(text: &str) -> Parse {
    let tokens = Lexer::new(text, 0).collect();
    let mut parser = Parser::new(tokens);
    let compilation_unit = parser.parse_unit(text.len());
    Parse {
        compilation_unit,
        errors: parser.errors,
    }
}

/// Parse a braceless run of statements.
///
/// `offset` is the byte offset of `text` within the surrounding file, so
/// the returned spans are file-relative.
#[must_use]
pub fn parse_block_body(text: &str, offset: usize) -> BodyParse {
    let tokens = Lexer::new(text, offset).collect();
    let mut parser = Parser::new(tokens);
    let block = parser.parse_statement_run(Span::new(offset, offset + text.len()));
    BodyParse {
        block,
        errors: parser.errors,
    }
}

const PRIMITIVE_TYPE_NAMES: &[&str] = &[
    "boolean", "byte", "char", "short", "int", "long", "float", "double",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    errors: Vec<SyntaxError>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_n(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n)
    }

    fn at_kind(&self, kind: TokenKind) -> bool {
        self.peek().is_some_and(|token| token.kind == kind)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek()
            .is_some_and(|token| token.kind == TokenKind::Ident && token.text == keyword)
    }

    /// True when the `n`th lookahead token has `kind` and directly abuts its
    /// predecessor. Used to reassemble `<<`, `>>`, `>>>` and their
    /// assignment forms out of single angle tokens.
    fn abuts(&self, n: usize, kind: TokenKind) -> bool {
        match (self.peek_n(n - 1), self.peek_n(n)) {
            (Some(prev), Some(tok)) => tok.kind == kind && prev.range.end == tok.range.start,
            _ => false,
        }
    }

    fn bump(&mut self) -> Option<Token> {
        if self.is_eof() {
            return None;
        }
        let tok = self.tokens[self.pos].clone();
        self.pos += 1;
        Some(tok)
    }

    /// Zero-width span at the current position, for diagnostics at a gap.
    fn here(&self) -> Span {
        match self.peek() {
            Some(tok) => tok.range,
            None => {
                let end = self.tokens.last().map(|t| t.range.end).unwrap_or(0);
                Span::new(end, end)
            }
        }
    }

    fn error(&mut self, message: impl Into<String>, span: Span) {
        self.errors.push(SyntaxError {
            message: message.into(),
            span,
        });
    }

    /// Consumes and returns the expected token, or records an error and
    /// returns a synthetic zero-width token without consuming anything.
    fn expect_kind(&mut self, kind: TokenKind, what: &str) -> Token {
        if self.at_kind(kind) {
            if let Some(tok) = self.bump() {
                return tok;
            }
        }
        let span = self.here();
        let found = self
            .peek()
            .map(|t| format!("`{}`", t.text))
            .unwrap_or_else(|| "end of input".to_string());
        self.error(format!("expected {what}, found {found}"), span);
        Token {
            kind,
            text: String::new(),
            range: Span::new(span.start, span.start),
        }
    }

    fn expect_ident(&mut self) -> Token {
        self.expect_kind(TokenKind::Ident, "an identifier")
    }

    // ---- declarations ----

    fn parse_unit(&mut self, len: usize) -> ast::CompilationUnit {
        let package = if self.at_keyword("package") {
            Some(self.parse_package_decl())
        } else {
            None
        };

        // Imports do not affect splicing; skip them wholesale.
        while self.at_keyword("import") {
            while !self.is_eof() && !self.at_kind(TokenKind::Semi) {
                self.bump();
            }
            if self.at_kind(TokenKind::Semi) {
                self.bump();
            }
        }

        let mut types = Vec::new();
        while !self.is_eof() {
            if let Some(decl) = self.parse_type_decl() {
                types.push(decl);
            } else {
                self.bump();
            }
        }

        ast::CompilationUnit {
            package,
            types,
            range: Span::new(0, len),
        }
    }

    fn parse_package_decl(&mut self) -> ast::PackageDecl {
        let kw = self.expect_ident();
        let (name, _) = self.parse_qualified_name();
        let semi = self.expect_kind(TokenKind::Semi, "`;`");
        ast::PackageDecl {
            name,
            range: Span::new(kw.range.start, semi.range.end),
        }
    }

    fn parse_qualified_name(&mut self) -> (String, Span) {
        let first = self.expect_ident();
        let start = first.range.start;
        let mut end = first.range.end;
        let mut parts = vec![first.text];

        while self.at_kind(TokenKind::Dot)
            && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::Ident)
        {
            self.bump();
            let part = self.expect_ident();
            end = part.range.end;
            parts.push(part.text);
        }

        (parts.join("."), Span::new(start, end))
    }

    fn parse_type_decl(&mut self) -> Option<ast::TypeDecl> {
        let start_pos = self.pos;
        let start = self.peek()?.range.start;

        self.skip_modifiers_and_annotations();

        if self.at_kind(TokenKind::At)
            && self
                .peek_n(1)
                .is_some_and(|t| t.kind == TokenKind::Ident && t.text == "interface")
        {
            self.bump();
            self.bump();
            return Some(self.finish_type_decl(ast::TypeKind::Annotation, start));
        }

        let kind = match self.peek() {
            Some(tok) if tok.kind == TokenKind::Ident => match tok.text.as_str() {
                "class" => ast::TypeKind::Class,
                "interface" => ast::TypeKind::Interface,
                "enum" => ast::TypeKind::Enum,
                "record" => ast::TypeKind::Record,
                _ => {
                    self.pos = start_pos;
                    return None;
                }
            },
            _ => {
                self.pos = start_pos;
                return None;
            }
        };

        self.bump();
        Some(self.finish_type_decl(kind, start))
    }

    fn finish_type_decl(&mut self, kind: ast::TypeKind, start: usize) -> ast::TypeDecl {
        let name = self.expect_ident();
        let is_enum = kind == ast::TypeKind::Enum;
        let (members, body_range, end) = self.parse_type_body(&name.text, is_enum);
        ast::TypeDecl {
            kind,
            name: name.text,
            name_range: name.range,
            range: Span::new(start, end),
            body_range,
            members,
        }
    }

    fn skip_modifiers_and_annotations(&mut self) {
        loop {
            if self.at_kind(TokenKind::At) {
                if self
                    .peek_n(1)
                    .is_some_and(|t| t.kind == TokenKind::Ident && t.text == "interface")
                {
                    break;
                }
                self.bump();
                if self.peek().is_some_and(|t| t.kind == TokenKind::Ident) {
                    self.parse_qualified_name();
                }
                if self.at_kind(TokenKind::LParen) {
                    self.skip_balanced(TokenKind::LParen, TokenKind::RParen);
                }
                continue;
            }

            if self.peek().is_some_and(|tok| {
                tok.kind == TokenKind::Ident
                    && matches!(
                        tok.text.as_str(),
                        "public"
                            | "protected"
                            | "private"
                            | "static"
                            | "final"
                            | "abstract"
                            | "default"
                            | "synchronized"
                            | "native"
                            | "transient"
                            | "volatile"
                            | "sealed"
                            | "non"
                            | "strictfp"
                    )
            }) {
                if self.at_keyword("non")
                    && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::Minus)
                    && self
                        .peek_n(2)
                        .is_some_and(|t| t.kind == TokenKind::Ident && t.text == "sealed")
                {
                    self.bump();
                    self.bump();
                    self.bump();
                    continue;
                }
                if self.at_keyword("static")
                    && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::LBrace)
                {
                    break;
                }
                self.bump();
                continue;
            }

            break;
        }
    }

    fn parse_type_body(
        &mut self,
        type_name: &str,
        is_enum: bool,
    ) -> (Vec<ast::MemberDecl>, Span, usize) {
        while !self.at_kind(TokenKind::LBrace) && !self.is_eof() {
            self.bump();
        }
        let lbrace = self.expect_kind(TokenKind::LBrace, "`{`");
        let body_start = lbrace.range.start;

        if is_enum {
            self.skip_enum_constants();
        }

        let mut members = Vec::new();
        while !self.is_eof() && !self.at_kind(TokenKind::RBrace) {
            if let Some(member) = self.parse_member_decl(type_name) {
                members.push(member);
            } else {
                self.bump();
            }
        }

        let rbrace = self.expect_kind(TokenKind::RBrace, "`}`");
        let body_range = Span::new(body_start, rbrace.range.end);
        (members, body_range, rbrace.range.end)
    }

    fn skip_enum_constants(&mut self) {
        if self.at_kind(TokenKind::Semi) {
            self.bump();
            return;
        }

        loop {
            if self.at_kind(TokenKind::Semi) {
                self.bump();
                break;
            }
            if self.at_kind(TokenKind::RBrace) || self.is_eof() {
                break;
            }

            self.skip_modifiers_and_annotations();
            if !self.at_kind(TokenKind::Ident) {
                break;
            }
            self.bump();

            if self.at_kind(TokenKind::LParen) {
                self.skip_balanced(TokenKind::LParen, TokenKind::RParen);
            }
            if self.at_kind(TokenKind::LBrace) {
                self.skip_balanced(TokenKind::LBrace, TokenKind::RBrace);
            }

            if self.at_kind(TokenKind::Comma) {
                self.bump();
                continue;
            }
            if self.at_kind(TokenKind::Semi) {
                self.bump();
                break;
            }
            if self.at_kind(TokenKind::RBrace) {
                break;
            }
            self.bump();
        }
    }

    fn parse_member_decl(&mut self, enclosing_type: &str) -> Option<ast::MemberDecl> {
        let start = self.peek()?.range.start;
        self.skip_modifiers_and_annotations();

        // Method/constructor type parameters.
        if self.at_kind(TokenKind::Lt) {
            self.skip_balanced(TokenKind::Lt, TokenKind::Gt);
        }

        if self.at_keyword("static")
            && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::LBrace)
        {
            self.bump();
            let body = self.parse_block();
            let range = Span::new(start, body.range.end);
            return Some(ast::MemberDecl::Initializer(ast::InitializerDecl {
                is_static: true,
                body,
                range,
            }));
        }

        if self.at_kind(TokenKind::LBrace) {
            let body = self.parse_block();
            let range = Span::new(start, body.range.end);
            return Some(ast::MemberDecl::Initializer(ast::InitializerDecl {
                is_static: false,
                body,
                range,
            }));
        }

        let is_nested_type = self.peek().is_some_and(|ty| {
            ty.kind == TokenKind::Ident
                && matches!(ty.text.as_str(), "class" | "interface" | "enum" | "record")
        }) || (self.at_kind(TokenKind::At)
            && self
                .peek_n(1)
                .is_some_and(|t| t.kind == TokenKind::Ident && t.text == "interface"));
        if is_nested_type {
            if let Some(decl) = self.parse_type_decl() {
                return Some(ast::MemberDecl::Type(decl));
            }
        }

        // Constructor: `Name(` with the enclosing type's name.
        if self.peek().is_some_and(|t| t.kind == TokenKind::Ident)
            && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::LParen)
        {
            let name = self.expect_ident();
            if name.text == enclosing_type {
                let params = self.parse_param_list();
                self.skip_throws_clause();
                let body = self.parse_block();
                let range = Span::new(start, body.range.end);
                return Some(ast::MemberDecl::Method(ast::MethodDecl {
                    return_ty: None,
                    name: name.text,
                    name_range: name.range,
                    params,
                    body: Some(body),
                    range,
                }));
            }
            self.pos -= 1;
        }

        let return_ty = self.parse_type_ref()?;
        let name = self.expect_ident();

        if self.at_kind(TokenKind::LParen) {
            let params = self.parse_param_list();
            self.skip_throws_clause();

            if self.at_kind(TokenKind::Semi) {
                let semi = self.expect_kind(TokenKind::Semi, "`;`");
                let range = Span::new(start, semi.range.end);
                return Some(ast::MemberDecl::Method(ast::MethodDecl {
                    return_ty: Some(return_ty),
                    name: name.text,
                    name_range: name.range,
                    params,
                    body: None,
                    range,
                }));
            }

            let body = if self.at_kind(TokenKind::LBrace) {
                Some(self.parse_block())
            } else {
                None
            };
            let end = body
                .as_ref()
                .map(|b| b.range.end)
                .or_else(|| self.peek().map(|t| t.range.end))
                .unwrap_or(name.range.end);
            return Some(ast::MemberDecl::Method(ast::MethodDecl {
                return_ty: Some(return_ty),
                name: name.text,
                name_range: name.range,
                params,
                body,
                range: Span::new(start, end),
            }));
        }

        // Field; initializer and extra declarators are skipped.
        while !self.is_eof()
            && !self.at_kind(TokenKind::Semi)
            && !self.at_kind(TokenKind::RBrace)
        {
            if self.at_kind(TokenKind::LBrace) {
                self.skip_balanced(TokenKind::LBrace, TokenKind::RBrace);
                continue;
            }
            self.bump();
        }
        let semi = self.expect_kind(TokenKind::Semi, "`;`");
        let range = Span::new(start, semi.range.end);
        Some(ast::MemberDecl::Field(ast::FieldDecl {
            ty: return_ty,
            name: name.text,
            name_range: name.range,
            range,
        }))
    }

    fn skip_throws_clause(&mut self) {
        if !self.at_keyword("throws") {
            return;
        }
        self.bump();
        while !self.is_eof() && !self.at_kind(TokenKind::LBrace) && !self.at_kind(TokenKind::Semi)
        {
            self.bump();
        }
    }

    fn parse_param_list(&mut self) -> Vec<ast::ParamDecl> {
        self.expect_kind(TokenKind::LParen, "`(`");
        let mut params = Vec::new();
        while !self.is_eof() && !self.at_kind(TokenKind::RParen) {
            self.skip_variable_modifiers_and_annotations();
            if let Some(mut ty) = self.parse_type_ref() {
                // Varargs.
                if self.at_kind(TokenKind::Dot)
                    && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::Dot)
                    && self.peek_n(2).is_some_and(|t| t.kind == TokenKind::Dot)
                {
                    self.bump();
                    self.bump();
                    let last = self.expect_kind(TokenKind::Dot, "`.`");
                    ty.text.push_str("...");
                    ty.range = Span::new(ty.range.start, last.range.end);
                }

                let name = self.expect_ident();
                let range = Span::new(ty.range.start, name.range.end);
                params.push(ast::ParamDecl {
                    ty,
                    name: name.text,
                    name_range: name.range,
                    range,
                });
            } else {
                self.bump();
            }

            if self.at_kind(TokenKind::Comma) {
                self.bump();
            }
        }
        self.expect_kind(TokenKind::RParen, "`)`");
        params
    }

    fn skip_variable_modifiers_and_annotations(&mut self) {
        loop {
            if self.at_kind(TokenKind::At) {
                self.bump();
                if self.peek().is_some_and(|t| t.kind == TokenKind::Ident) {
                    self.parse_qualified_name();
                }
                if self.at_kind(TokenKind::LParen) {
                    self.skip_balanced(TokenKind::LParen, TokenKind::RParen);
                }
                continue;
            }
            if self.at_keyword("final") {
                self.bump();
                continue;
            }
            break;
        }
    }

    /// Base type name with generics, without any array suffix.
    fn parse_type_ref_base(&mut self) -> Option<ast::TypeRef> {
        if !self.peek().is_some_and(|t| t.kind == TokenKind::Ident) {
            return None;
        }
        let first = self.expect_ident();
        let start = first.range.start;
        let mut end = first.range.end;
        let mut text = first.text;

        while self.at_kind(TokenKind::Dot)
            && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::Ident)
        {
            self.bump();
            let part = self.expect_ident();
            text.push('.');
            text.push_str(&part.text);
            end = part.range.end;
        }

        if self.at_kind(TokenKind::Lt) {
            let (generic_text, generic_end) = self.collect_balanced(TokenKind::Lt, TokenKind::Gt);
            text.push_str(&generic_text);
            end = generic_end;
        }

        Some(ast::TypeRef {
            text,
            range: Span::new(start, end),
        })
    }

    fn parse_type_ref(&mut self) -> Option<ast::TypeRef> {
        let mut ty = self.parse_type_ref_base()?;
        while self.at_kind(TokenKind::LBracket)
            && self.peek_n(1).is_some_and(|t| t.kind == TokenKind::RBracket)
        {
            self.bump();
            let rb = self.expect_kind(TokenKind::RBracket, "`]`");
            ty.text.push_str("[]");
            ty.range = Span::new(ty.range.start, rb.range.end);
        }
        Some(ty)
    }

    // ---- statements ----

    fn parse_block(&mut self) -> ast::Block {
        let lbrace = self.expect_kind(TokenKind::LBrace, "`{`");
        let start = lbrace.range.start;
        let mut statements = Vec::new();
        while !self.is_eof() && !self.at_kind(TokenKind::RBrace) {
            if let Some(stmt) = self.parse_stmt() {
                statements.push(stmt);
            } else {
                self.bump();
            }
        }
        let rbrace = self.expect_kind(TokenKind::RBrace, "`}`");
        ast::Block {
            statements,
            range: Span::new(start, rbrace.range.end),
        }
    }

    fn parse_statement_run(&mut self, range: Span) -> ast::Block {
        let mut statements = Vec::new();
        while !self.is_eof() {
            if let Some(stmt) = self.parse_stmt() {
                statements.push(stmt);
            } else {
                self.bump();
            }
        }
        ast::Block { statements, range }
    }

    fn parse_stmt(&mut self) -> Option<ast::Stmt> {
        if self.at_kind(TokenKind::Semi) {
            let semi = self.bump()?;
            return Some(ast::Stmt::Empty(semi.range));
        }

        if self.at_kind(TokenKind::LBrace) {
            return Some(ast::Stmt::Block(self.parse_block()));
        }

        if self.at_keyword("return") {
            let kw = self.bump()?;
            if self.at_kind(TokenKind::Semi) {
                let semi = self.bump()?;
                return Some(ast::Stmt::Return(ast::ReturnStmt {
                    expr: None,
                    range: Span::new(kw.range.start, semi.range.end),
                }));
            }
            let expr = self.parse_expr_or_missing();
            let semi = self.expect_kind(TokenKind::Semi, "`;`");
            return Some(ast::Stmt::Return(ast::ReturnStmt {
                expr: Some(expr),
                range: Span::new(kw.range.start, semi.range.end),
            }));
        }

        if self.at_keyword("if") {
            let kw = self.bump()?;
            self.expect_kind(TokenKind::LParen, "`(`");
            let condition = self.parse_expr_or_missing();
            self.expect_kind(TokenKind::RParen, "`)`");
            let then_branch = Box::new(self.parse_stmt_or_empty());
            let mut end = then_branch.range().end;
            let else_branch = if self.at_keyword("else") {
                self.bump();
                let stmt = self.parse_stmt_or_empty();
                end = stmt.range().end;
                Some(Box::new(stmt))
            } else {
                None
            };
            return Some(ast::Stmt::If(ast::IfStmt {
                condition,
                then_branch,
                else_branch,
                range: Span::new(kw.range.start, end),
            }));
        }

        if self.at_keyword("while") {
            let kw = self.bump()?;
            self.expect_kind(TokenKind::LParen, "`(`");
            let condition = self.parse_expr_or_missing();
            self.expect_kind(TokenKind::RParen, "`)`");
            let body = Box::new(self.parse_stmt_or_empty());
            let range = Span::new(kw.range.start, body.range().end);
            return Some(ast::Stmt::While(ast::WhileStmt {
                condition,
                body,
                range,
            }));
        }

        if let Some(local) = self.try_parse_local_var_stmt() {
            return Some(local);
        }

        let expr_start = self.peek()?.range;
        let expr = self.parse_expr().unwrap_or(ast::Expr::Missing(expr_start));
        let start = expr.range().start;
        let semi = self.expect_kind(TokenKind::Semi, "`;`");
        Some(ast::Stmt::Expr(ast::ExprStmt {
            expr,
            range: Span::new(start, semi.range.end),
        }))
    }

    fn parse_stmt_or_empty(&mut self) -> ast::Stmt {
        match self.parse_stmt() {
            Some(stmt) => stmt,
            None => {
                let span = self.here();
                self.error("expected a statement", span);
                ast::Stmt::Empty(span)
            }
        }
    }

    fn try_parse_local_var_stmt(&mut self) -> Option<ast::Stmt> {
        let start_pos = self.pos;
        let start = self.peek()?.range.start;

        self.skip_variable_modifiers_and_annotations();
        let ty = match self.parse_type_ref() {
            Some(ty) => ty,
            None => {
                self.pos = start_pos;
                return None;
            }
        };

        if !self.peek().is_some_and(|t| t.kind == TokenKind::Ident) {
            self.pos = start_pos;
            return None;
        }
        let name = self.expect_ident();

        if !self.at_kind(TokenKind::Eq) && !self.at_kind(TokenKind::Semi) {
            self.pos = start_pos;
            return None;
        }

        let mut initializer = None;
        if self.at_kind(TokenKind::Eq) {
            self.bump();
            initializer = Some(self.parse_expr_or_missing());
        }
        let semi = self.expect_kind(TokenKind::Semi, "`;`");
        Some(ast::Stmt::LocalVar(ast::LocalVarStmt {
            ty,
            name: name.text,
            name_range: name.range,
            initializer,
            range: Span::new(start, semi.range.end),
        }))
    }

    // ---- expressions ----

    fn parse_expr(&mut self) -> Option<ast::Expr> {
        self.parse_assignment()
    }

    fn parse_expr_or_missing(&mut self) -> ast::Expr {
        match self.parse_expr() {
            Some(expr) => expr,
            None => {
                let span = self.here();
                self.error("expected an expression", span);
                ast::Expr::Missing(span)
            }
        }
    }

    fn parse_assignment(&mut self) -> Option<ast::Expr> {
        let lhs = self.parse_conditional()?;
        let Some((op, width)) = self.peek_assign_op() else {
            return Some(lhs);
        };

        if !matches!(
            lhs,
            ast::Expr::Name(_) | ast::Expr::FieldAccess(_) | ast::Expr::ArrayAccess(_)
        ) {
            self.error("this expression cannot be assigned to", lhs.range());
        }
        for _ in 0..width {
            self.bump();
        }
        let value = match self.parse_assignment() {
            Some(value) => value,
            None => {
                let span = self.here();
                self.error("expected an expression after assignment operator", span);
                ast::Expr::Missing(span)
            }
        };
        let range = Span::new(lhs.range().start, value.range().end);
        Some(ast::Expr::Assign(ast::AssignExpr {
            target: Box::new(lhs),
            op,
            value: Box::new(value),
            range,
        }))
    }

    /// `(operator, token count)`; the operator is `None` for plain `=`.
    fn peek_assign_op(&self) -> Option<(Option<ast::BinaryOp>, usize)> {
        use ast::BinaryOp::*;
        let tok = self.peek()?;
        let single = |op| Some((Some(op), 1));
        match tok.kind {
            TokenKind::Eq => Some((None, 1)),
            TokenKind::PlusEq => single(Add),
            TokenKind::MinusEq => single(Sub),
            TokenKind::StarEq => single(Mul),
            TokenKind::SlashEq => single(Div),
            TokenKind::PercentEq => single(Rem),
            TokenKind::AmpEq => single(BitAnd),
            TokenKind::PipeEq => single(BitOr),
            TokenKind::CaretEq => single(BitXor),
            // `<<=` lexes as `<` `<=`, `>>=` as `>` `>=`, `>>>=` as `>` `>` `>=`.
            TokenKind::Lt if self.abuts(1, TokenKind::Le) => Some((Some(Shl), 2)),
            TokenKind::Gt if self.abuts(1, TokenKind::Gt) && self.abuts(2, TokenKind::Ge) => {
                Some((Some(UShr), 3))
            }
            TokenKind::Gt if self.abuts(1, TokenKind::Ge) => Some((Some(Shr), 2)),
            _ => None,
        }
    }

    fn parse_conditional(&mut self) -> Option<ast::Expr> {
        let condition = self.parse_binary(0)?;
        if !self.at_kind(TokenKind::Question) {
            return Some(condition);
        }
        self.bump();
        let then_expr = self.parse_expr_or_missing();
        self.expect_kind(TokenKind::Colon, "`:`");
        let else_expr = match self.parse_conditional() {
            Some(expr) => expr,
            None => {
                let span = self.here();
                self.error("expected an expression after `:`", span);
                ast::Expr::Missing(span)
            }
        };
        let range = Span::new(condition.range().start, else_expr.range().end);
        Some(ast::Expr::Conditional(ast::ConditionalExpr {
            condition: Box::new(condition),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
            range,
        }))
    }

    fn parse_binary(&mut self, min_prec: u8) -> Option<ast::Expr> {
        const RELATIONAL_PREC: u8 = 70;

        let mut lhs = self.parse_unary()?;
        loop {
            if self.at_keyword("instanceof") {
                if RELATIONAL_PREC < min_prec {
                    break;
                }
                let kw = self.bump()?;
                let ty = match self.parse_type_ref() {
                    Some(ty) => ty,
                    None => {
                        let span = self.here();
                        self.error("expected a type after `instanceof`", span);
                        ast::TypeRef {
                            text: String::new(),
                            range: Span::new(kw.range.end, kw.range.end),
                        }
                    }
                };
                let range = Span::new(lhs.range().start, ty.range.end.max(kw.range.end));
                lhs = ast::Expr::InstanceOf(ast::InstanceOfExpr {
                    expr: Box::new(lhs),
                    ty,
                    range,
                });
                continue;
            }

            let Some((op, prec, width)) = self.peek_binary_op() else {
                break;
            };
            if prec < min_prec {
                break;
            }
            for _ in 0..width {
                self.bump();
            }
            let rhs = match self.parse_binary(prec + 1) {
                Some(rhs) => rhs,
                None => {
                    let span = self.here();
                    self.error("expected an operand", span);
                    ast::Expr::Missing(span)
                }
            };
            let range = Span::new(lhs.range().start, rhs.range().end);
            lhs = ast::Expr::Binary(ast::BinaryExpr {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                range,
            });
        }
        Some(lhs)
    }

    /// `(operator, precedence, token count)`. Returns `None` at shift
    /// assignments so [`Self::peek_assign_op`] can claim them.
    fn peek_binary_op(&self) -> Option<(ast::BinaryOp, u8, usize)> {
        use ast::BinaryOp::*;
        let tok = self.peek()?;
        let entry = match tok.kind {
            TokenKind::Star => (Mul, 100, 1),
            TokenKind::Slash => (Div, 100, 1),
            TokenKind::Percent => (Rem, 100, 1),
            TokenKind::Plus => (Add, 90, 1),
            TokenKind::Minus => (Sub, 90, 1),
            TokenKind::Lt => {
                if self.abuts(1, TokenKind::Lt) {
                    (Shl, 80, 2)
                } else if self.abuts(1, TokenKind::Le) {
                    return None;
                } else {
                    (Lt, 70, 1)
                }
            }
            TokenKind::Gt => {
                if self.abuts(1, TokenKind::Gt) {
                    if self.abuts(2, TokenKind::Gt) {
                        (UShr, 80, 3)
                    } else if self.abuts(2, TokenKind::Ge) {
                        return None;
                    } else {
                        (Shr, 80, 2)
                    }
                } else if self.abuts(1, TokenKind::Ge) {
                    return None;
                } else {
                    (Gt, 70, 1)
                }
            }
            TokenKind::Le => (Le, 70, 1),
            TokenKind::Ge => (Ge, 70, 1),
            TokenKind::EqEq => (Eq, 60, 1),
            TokenKind::BangEq => (Ne, 60, 1),
            TokenKind::Amp => (BitAnd, 50, 1),
            TokenKind::Caret => (BitXor, 40, 1),
            TokenKind::Pipe => (BitOr, 30, 1),
            TokenKind::AmpAmp => (AndAnd, 20, 1),
            TokenKind::PipePipe => (OrOr, 10, 1),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_unary(&mut self) -> Option<ast::Expr> {
        let op = match self.peek().map(|t| t.kind) {
            Some(TokenKind::Bang) => Some(ast::UnaryOp::Not),
            Some(TokenKind::Tilde) => Some(ast::UnaryOp::BitNot),
            Some(TokenKind::Minus) => Some(ast::UnaryOp::Neg),
            Some(TokenKind::Plus) => Some(ast::UnaryOp::Plus),
            _ => None,
        };
        if let Some(op) = op {
            let tok = self.bump()?;
            let operand = match self.parse_unary() {
                Some(operand) => operand,
                None => {
                    let span = self.here();
                    self.error("expected an operand", span);
                    ast::Expr::Missing(span)
                }
            };
            let range = Span::new(tok.range.start, operand.range().end);
            return Some(ast::Expr::Unary(ast::UnaryExpr {
                op,
                operand: Box::new(operand),
                range,
            }));
        }

        if self.at_kind(TokenKind::LParen) {
            if let Some(cast) = self.try_parse_cast() {
                return Some(cast);
            }
        }

        self.parse_postfix()
    }

    /// `(T) operand`, distinguished from a parenthesized expression by what
    /// follows the closing paren. A primitive type name always means a
    /// cast; otherwise the next token must be able to start an operand and
    /// must not itself be a binary operator (`(a) + b` adds, `(int) + b`
    /// casts).
    fn try_parse_cast(&mut self) -> Option<ast::Expr> {
        let start_pos = self.pos;
        let lparen = self.bump()?;
        let Some(ty) = self.parse_type_ref() else {
            self.pos = start_pos;
            return None;
        };
        if !self.at_kind(TokenKind::RParen) {
            self.pos = start_pos;
            return None;
        }
        self.bump();

        let base = ty
            .text
            .split(|c| c == '<' || c == '[')
            .next()
            .unwrap_or_default();
        let primitive = PRIMITIVE_TYPE_NAMES.contains(&base);
        let can_start = match self.peek() {
            Some(tok) => match tok.kind {
                TokenKind::Ident => tok.text != "instanceof",
                TokenKind::IntLiteral
                | TokenKind::LongLiteral
                | TokenKind::FloatLiteral
                | TokenKind::DoubleLiteral
                | TokenKind::CharLiteral
                | TokenKind::StringLiteral
                | TokenKind::LParen
                | TokenKind::Bang
                | TokenKind::Tilde => true,
                TokenKind::Plus | TokenKind::Minus => primitive,
                _ => false,
            },
            None => false,
        };
        if !can_start {
            self.pos = start_pos;
            return None;
        }

        let operand = match self.parse_unary() {
            Some(operand) => operand,
            None => {
                let span = self.here();
                self.error("expected an operand after cast", span);
                ast::Expr::Missing(span)
            }
        };
        let range = Span::new(lparen.range.start, operand.range().end);
        Some(ast::Expr::Cast(ast::CastExpr {
            ty,
            expr: Box::new(operand),
            range,
        }))
    }

    fn parse_postfix(&mut self) -> Option<ast::Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.at_kind(TokenKind::Dot) {
                if self
                    .peek_n(1)
                    .is_some_and(|t| t.kind == TokenKind::Ident && t.text == "class")
                {
                    if let Some(text) = flatten_type_name(&expr) {
                        self.bump();
                        let kw = self.expect_ident();
                        let range = Span::new(expr.range().start, kw.range.end);
                        expr = ast::Expr::ClassLiteral(ast::ClassLiteralExpr {
                            ty: ast::TypeRef { text, range },
                            range,
                        });
                        continue;
                    }
                }

                self.bump();
                let name = self.expect_ident();
                if self.at_kind(TokenKind::LParen) {
                    let (args, end) = self.parse_arg_list();
                    let range = Span::new(expr.range().start, end);
                    expr = ast::Expr::Call(ast::CallExpr {
                        receiver: Some(Box::new(expr)),
                        name: name.text,
                        name_range: name.range,
                        args,
                        range,
                    });
                } else {
                    let range = Span::new(expr.range().start, name.range.end);
                    expr = ast::Expr::FieldAccess(ast::FieldAccessExpr {
                        receiver: Box::new(expr),
                        name: name.text,
                        name_range: name.range,
                        range,
                    });
                }
                continue;
            }

            if self.at_kind(TokenKind::LParen) {
                match expr {
                    ast::Expr::Name(name) => {
                        let (args, end) = self.parse_arg_list();
                        let range = Span::new(name.range.start, end);
                        expr = ast::Expr::Call(ast::CallExpr {
                            receiver: None,
                            name: name.name,
                            name_range: name.range,
                            args,
                            range,
                        });
                    }
                    other => {
                        self.error("only named methods can be called", other.range());
                        let (_args, end) = self.parse_arg_list();
                        expr = ast::Expr::Missing(Span::new(other.range().start, end));
                    }
                }
                continue;
            }

            if self.at_kind(TokenKind::LBracket) {
                self.bump();
                let index = self.parse_expr_or_missing();
                let rb = self.expect_kind(TokenKind::RBracket, "`]`");
                let end = rb.range.end.max(index.range().end);
                let range = Span::new(expr.range().start, end);
                expr = ast::Expr::ArrayAccess(ast::ArrayAccessExpr {
                    array: Box::new(expr),
                    index: Box::new(index),
                    range,
                });
                continue;
            }

            break;
        }
        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<ast::Expr> {
        let tok = self.bump()?;
        let literal_kind = match tok.kind {
            TokenKind::IntLiteral => Some(ast::LiteralKind::Int),
            TokenKind::LongLiteral => Some(ast::LiteralKind::Long),
            TokenKind::FloatLiteral => Some(ast::LiteralKind::Float),
            TokenKind::DoubleLiteral => Some(ast::LiteralKind::Double),
            TokenKind::CharLiteral => Some(ast::LiteralKind::Char),
            TokenKind::StringLiteral => Some(ast::LiteralKind::Str),
            TokenKind::Ident if tok.text == "true" || tok.text == "false" => {
                Some(ast::LiteralKind::Bool)
            }
            TokenKind::Ident if tok.text == "null" => Some(ast::LiteralKind::Null),
            _ => None,
        };
        if let Some(kind) = literal_kind {
            return Some(ast::Expr::Literal(ast::LiteralExpr {
                kind,
                text: tok.text,
                range: tok.range,
            }));
        }

        match tok.kind {
            TokenKind::Ident => match tok.text.as_str() {
                "this" => Some(ast::Expr::This(tok.range)),
                "new" => Some(self.parse_new(&tok)),
                _ => Some(ast::Expr::Name(ast::NameExpr {
                    name: tok.text.clone(),
                    range: tok.range,
                })),
            },
            TokenKind::LParen => {
                let expr = self.parse_expr_or_missing();
                self.expect_kind(TokenKind::RParen, "`)`");
                Some(expr)
            }
            _ => {
                self.error(
                    format!("expected an expression, found `{}`", tok.text),
                    tok.range,
                );
                Some(ast::Expr::Missing(tok.range))
            }
        }
    }

    fn parse_new(&mut self, new_kw: &Token) -> ast::Expr {
        let Some(ty) = self.parse_type_ref_base() else {
            let span = self.here();
            self.error("expected a type after `new`", span);
            return ast::Expr::Missing(Span::new(new_kw.range.start, span.end));
        };

        if self.at_kind(TokenKind::LParen) {
            let (args, end) = self.parse_arg_list();
            return ast::Expr::New(ast::NewExpr {
                ty,
                args,
                range: Span::new(new_kw.range.start, end),
            });
        }

        if self.at_kind(TokenKind::LBracket) {
            let mut dims = 0usize;
            let mut lengths = Vec::new();
            let mut end = ty.range.end;
            while self.at_kind(TokenKind::LBracket) {
                self.bump();
                if self.at_kind(TokenKind::RBracket) {
                    let rb = self.expect_kind(TokenKind::RBracket, "`]`");
                    end = rb.range.end;
                } else {
                    let len = self.parse_expr_or_missing();
                    let rb = self.expect_kind(TokenKind::RBracket, "`]`");
                    end = rb.range.end.max(len.range().end);
                    lengths.push(len);
                }
                dims += 1;
            }

            let initializer = if self.at_kind(TokenKind::LBrace) {
                let (elements, init_end) = self.parse_array_initializer();
                end = init_end;
                Some(elements)
            } else {
                None
            };

            if lengths.is_empty() && initializer.is_none() {
                self.error(
                    "array creation needs a length or an initializer",
                    Span::new(new_kw.range.start, end),
                );
            }

            return ast::Expr::NewArray(ast::NewArrayExpr {
                element_ty: ty,
                dims,
                lengths,
                initializer,
                range: Span::new(new_kw.range.start, end),
            });
        }

        let span = self.here();
        self.error("expected `(` or `[` after the type in `new`", span);
        ast::Expr::Missing(Span::new(new_kw.range.start, ty.range.end))
    }

    fn parse_array_initializer(&mut self) -> (Vec<ast::Expr>, usize) {
        let lbrace = self.expect_kind(TokenKind::LBrace, "`{`");
        let mut elements = Vec::new();
        while !self.is_eof() && !self.at_kind(TokenKind::RBrace) {
            elements.push(self.parse_expr_or_missing());
            if self.at_kind(TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        let rbrace = self.expect_kind(TokenKind::RBrace, "`}`");
        (elements, rbrace.range.end.max(lbrace.range.end))
    }

    fn parse_arg_list(&mut self) -> (Vec<ast::Expr>, usize) {
        let lparen = self.expect_kind(TokenKind::LParen, "`(`");
        let mut args = Vec::new();
        while !self.is_eof() && !self.at_kind(TokenKind::RParen) {
            args.push(self.parse_expr_or_missing());
            if self.at_kind(TokenKind::Comma) {
                self.bump();
            } else {
                break;
            }
        }
        let rparen = self.expect_kind(TokenKind::RParen, "`)`");
        (args, rparen.range.end.max(lparen.range.end))
    }

    fn skip_balanced(&mut self, open: TokenKind, close: TokenKind) {
        if !self.at_kind(open) {
            return;
        }
        self.bump();
        let mut depth = 1usize;
        while !self.is_eof() && depth > 0 {
            match self.peek().map(|t| t.kind) {
                Some(k) if k == open => depth += 1,
                Some(k) if k == close => depth -= 1,
                _ => {}
            }
            self.bump();
        }
    }

    fn collect_balanced(&mut self, open: TokenKind, close: TokenKind) -> (String, usize) {
        let mut text = String::new();
        let mut end = self.here().start;
        if !self.at_kind(open) {
            return (text, end);
        }
        let mut depth = 0usize;
        while !self.is_eof() {
            let Some(tok) = self.bump() else { break };
            if tok.kind == open {
                depth += 1;
            } else if tok.kind == close {
                depth = depth.saturating_sub(1);
            }
            text.push_str(&tok.text);
            end = tok.range.end;
            if depth == 0 {
                break;
            }
        }
        (text, end)
    }
}

/// Dotted type name from a `Name`/`FieldAccess` chain, for `X.class` and
/// similar positions where an expression is really a type reference.
fn flatten_type_name(expr: &ast::Expr) -> Option<String> {
    match expr {
        ast::Expr::Name(name) => Some(name.name.clone()),
        ast::Expr::FieldAccess(access) => {
            let mut text = flatten_type_name(&access.receiver)?;
            text.push('.');
            text.push_str(&access.name);
            Some(text)
        }
        _ => None,
    }
}
