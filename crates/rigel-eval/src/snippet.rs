//! Snippet classification and textual rewrites.

/// A piece of user-written Java handed to the engine: either a single
/// expression or a run of statements.
///
/// The distinction is decided once, at construction, by [`Snippet::new`],
/// and drives how the synthesizer wraps the text into a run method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Snippet {
    text: String,
    is_expression: bool,
    captured_locals: Vec<(String, String)>,
}

impl Snippet {
    /// Classifies `text` in a single left-to-right scan: a `;` outside
    /// string and character literals makes the snippet a statement run,
    /// anything else is an expression. The scan tracks one in-literal flag
    /// and one escape flag; it never parses.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let is_expression = scan_is_expression(&text);
        Self {
            text,
            is_expression,
            captured_locals: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_expression(&self) -> bool {
        self.is_expression
    }

    /// `(name, declared type name)` pairs the synthesizer re-declares so
    /// the snippet compiles against the paused frame's locals.
    pub fn captured_locals(&self) -> &[(String, String)] {
        &self.captured_locals
    }

    pub fn with_captured_locals(mut self, locals: Vec<(String, String)>) -> Self {
        self.captured_locals = locals;
        self
    }

    /// The run-method body for this snippet: expressions are wrapped so the
    /// run method yields their value, statement runs are spliced verbatim.
    pub fn body_text(&self) -> String {
        if self.is_expression {
            format!("return {};", self.text)
        } else {
            self.text.clone()
        }
    }

    /// Byte offset of the snippet text within [`Snippet::body_text`].
    pub fn body_prefix_len(&self) -> usize {
        if self.is_expression {
            "return ".len()
        } else {
            0
        }
    }
}

fn scan_is_expression(text: &str) -> bool {
    let mut in_literal = false;
    let mut quote = '"';
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        if in_literal {
            if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_literal = false;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                in_literal = true;
                quote = c;
            }
            ';' => return false,
            _ => {}
        }
    }
    true
}

/// Rewrites every bare `this` token in `snippet` to `replacement`.
///
/// Used when the evaluation anchor is a selected array: arrays have no
/// members to compile against, so `this` is redirected to a synthetic local
/// before the snippet is parsed. Qualified forms (`Outer.this`), longer
/// identifiers (`thisIsFine`) and occurrences inside literals are left
/// alone.
pub fn replace_pseudo_this(snippet: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(snippet.len());
    let mut in_literal = false;
    let mut quote = '"';
    let mut escaped = false;
    let mut prev: Option<char> = None;
    let mut chars = snippet.char_indices();
    while let Some((index, c)) = chars.next() {
        if in_literal {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_literal = false;
            }
            out.push(c);
            prev = Some(c);
            continue;
        }
        match c {
            '"' | '\'' => {
                in_literal = true;
                quote = c;
                out.push(c);
            }
            't' if snippet[index..].starts_with("this")
                && !prev.is_some_and(|p| is_identifier_char(p) || p == '.')
                && !snippet[index + 4..]
                    .chars()
                    .next()
                    .is_some_and(is_identifier_char) =>
            {
                out.push_str(replacement);
                // Consume the remaining "his".
                let _ = chars.nth(2);
                prev = Some('s');
                continue;
            }
            _ => out.push(c),
        }
        prev = Some(c);
    }
    out
}

fn is_identifier_char(c: char) -> bool {
    c == '_' || c == '$' || unicode_ident::is_xid_continue(c)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn expression_snippets() {
        assert!(Snippet::new("a + b").is_expression());
        assert!(Snippet::new("call(x, y)").is_expression());
        assert!(Snippet::new("").is_expression());
    }

    #[test]
    fn semicolon_makes_a_statement_run() {
        assert!(!Snippet::new("int x = 1; x").is_expression());
        assert!(!Snippet::new("foo();").is_expression());
    }

    #[test]
    fn semicolons_inside_literals_do_not_count() {
        assert!(Snippet::new("\"a;b\"").is_expression());
        assert!(Snippet::new("';'").is_expression());
        assert!(Snippet::new("\"\\\";\" + x").is_expression());
    }

    #[test]
    fn body_text_wraps_expressions_only() {
        let expr = Snippet::new("x + 1");
        assert_eq!(expr.body_text(), "return x + 1;");
        assert_eq!(expr.body_prefix_len(), 7);

        let run = Snippet::new("int y = 0; return y;");
        assert_eq!(run.body_text(), "int y = 0; return y;");
        assert_eq!(run.body_prefix_len(), 0);
    }

    #[test]
    fn pseudo_this_replaces_bare_tokens() {
        assert_eq!(replace_pseudo_this("this.length", "__x"), "__x.length");
        assert_eq!(replace_pseudo_this("this", "__x"), "__x");
        assert_eq!(replace_pseudo_this("f(this, this)", "__x"), "f(__x, __x)");
    }

    #[test]
    fn pseudo_this_skips_qualified_and_longer_tokens() {
        assert_eq!(replace_pseudo_this("Outer.this", "__x"), "Outer.this");
        assert_eq!(replace_pseudo_this("thistle", "__x"), "thistle");
        assert_eq!(replace_pseudo_this("athis", "__x"), "athis");
        assert_eq!(replace_pseudo_this("this$0", "__x"), "this$0");
    }

    #[test]
    fn pseudo_this_skips_literals() {
        assert_eq!(
            replace_pseudo_this("\"this\" + this", "__x"),
            "\"this\" + __x"
        );
        assert_eq!(replace_pseudo_this("'t' + this", "__x"), "'t' + __x");
    }
}
