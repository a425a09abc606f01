//! Wrapping snippets into compilable units.
//!
//! The compiler works on a whole compilation unit, so every snippet is
//! spliced into the body of a synthesized run method first. Two strategies:
//! source-based synthesis splices the method into the declaring type's own
//! source when the embedder can provide it, binary synthesis builds a
//! stand-alone subclass from the type's runtime shape alone. Everything
//! around the snippet depends only on the declaring type and the captured
//! locals, so those skeletons are cached across evaluations.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use parking_lot::Mutex;
use rigel_syntax::ast::{CompilationUnit, MemberDecl, TypeDecl};
use rigel_syntax::parse_compilation_unit;

use crate::error::Result;
use crate::snippet::Snippet;

const RUN_METHOD_NAME: &str = "__run";
const BINARY_UNIT_NAME: &str = "__EvalUnit";

/// A compilable wrapper around one snippet, with the offsets needed to map
/// unit positions back onto the snippet text.
///
/// Invariant: the snippet text lies inside the run method body, so
/// `run_method_start <= snippet_start` and
/// `snippet_start - run_method_start < run_method_length`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SynthesizedUnit {
    /// Full unit source text.
    pub source: String,
    /// Simple name of the type holding the run method.
    pub name: String,
    /// Byte offset of the snippet text within `source`.
    pub snippet_start: usize,
    /// Byte offset of the run method body within `source`.
    pub run_method_start: usize,
    /// Byte length of the run method body.
    pub run_method_length: usize,
}

impl SynthesizedUnit {
    /// The run method body text.
    pub fn body(&self) -> &str {
        &self.source[self.run_method_start..self.run_method_start + self.run_method_length]
    }

    /// Maps a unit offset back into snippet coordinates.
    pub fn to_snippet_offset(&self, unit_offset: usize) -> usize {
        unit_offset.saturating_sub(self.snippet_start)
    }
}

#[derive(Debug)]
pub struct SynthesizeRequest<'a> {
    pub snippet: &'a Snippet,
    /// Binary name of the type the evaluation resolves against.
    pub declaring_type_name: &'a str,
    /// Source of the declaring type's compilation unit, when available.
    pub type_source: Option<&'a str>,
    /// 1-based source line of the paused location; picks the enclosing
    /// declaration during source-based synthesis.
    pub line_hint: Option<i32>,
    pub is_static: bool,
}

/// Snippet-independent part of a unit: everything before the run method
/// body, everything after it, and the holding type's name.
#[derive(Debug)]
struct Skeleton {
    prefix: String,
    suffix: String,
    name: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct SkeletonKey {
    type_name: String,
    is_static: bool,
    locals: Vec<(String, String)>,
}

/// Builds [`SynthesizedUnit`]s, caching skeletons per declaring type and
/// captured-local shape.
#[derive(Debug, Default)]
pub struct SourceSynthesizer {
    skeletons: Mutex<HashMap<SkeletonKey, Arc<Skeleton>>>,
}

impl SourceSynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached skeleton, e.g. after the target redefined
    /// classes or the embedder's sources changed.
    pub fn reset(&self) {
        self.skeletons.lock().clear();
    }

    pub fn synthesize(&self, request: &SynthesizeRequest<'_>) -> Result<SynthesizedUnit> {
        let key = SkeletonKey {
            type_name: request.declaring_type_name.to_string(),
            is_static: request.is_static,
            locals: request.snippet.captured_locals().to_vec(),
        };
        let skeleton = {
            let mut cache = self.skeletons.lock();
            match cache.get(&key) {
                Some(skeleton) => Arc::clone(skeleton),
                None => {
                    let skeleton = Arc::new(build_skeleton(request));
                    cache.insert(key, Arc::clone(&skeleton));
                    skeleton
                }
            }
        };

        let body = request.snippet.body_text();
        let run_method_start = skeleton.prefix.len();
        let unit = SynthesizedUnit {
            source: format!("{}{}{}", skeleton.prefix, body, skeleton.suffix),
            name: skeleton.name.clone(),
            snippet_start: run_method_start + request.snippet.body_prefix_len(),
            run_method_start,
            run_method_length: body.len(),
        };
        debug_assert!(
            unit.snippet_start - unit.run_method_start < unit.run_method_length.max(1),
            "snippet must start inside the run method body"
        );
        Ok(unit)
    }
}

fn build_skeleton(request: &SynthesizeRequest<'_>) -> Skeleton {
    if let Some(source) = request.type_source {
        if let Some(skeleton) = source_skeleton(request, source) {
            return skeleton;
        }
        tracing::debug!(
            target: "rigel.eval",
            type_name = request.declaring_type_name,
            "declaring type not found in source, synthesizing from binary shape"
        );
    }
    binary_skeleton(request)
}

/// Splices the run method into the declaring type's own source, so the
/// snippet compiles in the exact scope the user is looking at. The parse
/// only needs the declaration skeleton; recovery errors inside method
/// bodies do not matter here.
fn source_skeleton(request: &SynthesizeRequest<'_>, source: &str) -> Option<Skeleton> {
    let parse = parse_compilation_unit(source);
    let simple_name = simple_type_name(request.declaring_type_name);
    let hint_offset = request
        .line_hint
        .and_then(|line| line_offset(source, line));
    let target = pick_type(parse.compilation_unit(), simple_name, hint_offset)?;

    // Insert just before the type body's closing brace.
    let insert_at = target.body_range.end.checked_sub(1)?;
    if insert_at <= target.body_range.start || source.as_bytes().get(insert_at) != Some(&b'}') {
        return None;
    }

    let mut prefix = source[..insert_at].to_string();
    prefix.push_str("\n    public ");
    if request.is_static {
        prefix.push_str("static ");
    }
    let _ = write!(prefix, "void {RUN_METHOD_NAME}(");
    for (index, (name, type_name)) in request.snippet.captured_locals().iter().enumerate() {
        if index > 0 {
            prefix.push_str(", ");
        }
        let _ = write!(prefix, "{type_name} {name}");
    }
    prefix.push_str(") {\n        ");

    Some(Skeleton {
        prefix,
        suffix: format!("\n    }}\n{}", &source[insert_at..]),
        name: target.name.clone(),
    })
}

/// Builds a stand-alone subclass of the declaring type: one public field
/// per captured local and the run method around the snippet.
fn binary_skeleton(request: &SynthesizeRequest<'_>) -> Skeleton {
    let mut prefix = format!("public class {BINARY_UNIT_NAME}");
    let supertype = request.declaring_type_name;
    if !supertype.is_empty() && !supertype.contains('[') {
        let _ = write!(prefix, " extends {supertype}");
    }
    prefix.push_str(" {\n");
    for (name, type_name) in request.snippet.captured_locals() {
        let _ = writeln!(prefix, "    public {type_name} {name};");
    }
    prefix.push_str("    public ");
    if request.is_static {
        prefix.push_str("static ");
    }
    let _ = write!(prefix, "void {RUN_METHOD_NAME}() {{\n        ");

    Skeleton {
        prefix,
        suffix: "\n    }\n}\n".to_string(),
        name: BINARY_UNIT_NAME.to_string(),
    }
}

/// The innermost type whose body covers the hint offset; failing that, a
/// simple-name match; failing that, the first declared type.
fn pick_type<'a>(
    unit: &'a CompilationUnit,
    simple_name: &str,
    hint_offset: Option<usize>,
) -> Option<&'a TypeDecl> {
    let mut all = Vec::new();
    for ty in &unit.types {
        collect_types(ty, &mut all);
    }
    if let Some(offset) = hint_offset {
        let innermost = all
            .iter()
            .filter(|ty| ty.body_range.contains(offset))
            .min_by_key(|ty| ty.body_range.len());
        if let Some(ty) = innermost {
            return Some(ty);
        }
    }
    all.iter()
        .find(|ty| ty.name == simple_name)
        .or_else(|| all.first())
        .copied()
}

fn collect_types<'a>(ty: &'a TypeDecl, out: &mut Vec<&'a TypeDecl>) {
    out.push(ty);
    for member in &ty.members {
        if let MemberDecl::Type(nested) = member {
            collect_types(nested, out);
        }
    }
}

/// Simple name of a binary type name (`a.b.Outer$Inner` -> `Inner`).
fn simple_type_name(type_name: &str) -> &str {
    type_name
        .rsplit(|c| c == '.' || c == '$')
        .next()
        .unwrap_or(type_name)
}

/// Byte offset where a 1-based line starts.
fn line_offset(source: &str, line: i32) -> Option<usize> {
    if line <= 1 {
        return Some(0);
    }
    let mut remaining = line - 1;
    for (index, c) in source.char_indices() {
        if c == '\n' {
            remaining -= 1;
            if remaining == 0 {
                return Some(index + 1);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const MAIN_SOURCE: &str = "\
public class Main {
    private int count;

    public void run() {
        int x = 0;
    }
}
";

    fn request<'a>(snippet: &'a Snippet, source: Option<&'a str>) -> SynthesizeRequest<'a> {
        SynthesizeRequest {
            snippet,
            declaring_type_name: "Main",
            type_source: source,
            line_hint: Some(5),
            is_static: false,
        }
    }

    #[test]
    fn binary_unit_wraps_an_expression() {
        let snippet =
            Snippet::new("x + 1").with_captured_locals(vec![("x".to_string(), "int".to_string())]);
        let synthesizer = SourceSynthesizer::new();
        let unit = synthesizer.synthesize(&request(&snippet, None)).unwrap();

        assert_eq!(unit.name, "__EvalUnit");
        assert!(unit.source.contains("extends Main"));
        assert!(unit.source.contains("public int x;"));
        assert_eq!(unit.body(), "return x + 1;");
        assert_eq!(unit.snippet_start - unit.run_method_start, 7);
        assert_eq!(&unit.source[unit.snippet_start..unit.snippet_start + 5], "x + 1");
    }

    #[test]
    fn statement_runs_are_spliced_verbatim() {
        let snippet = Snippet::new("int y = 1; return y;");
        let synthesizer = SourceSynthesizer::new();
        let unit = synthesizer.synthesize(&request(&snippet, None)).unwrap();

        assert_eq!(unit.body(), "int y = 1; return y;");
        assert_eq!(unit.snippet_start, unit.run_method_start);
    }

    #[test]
    fn source_unit_splices_into_the_declaring_type() {
        let snippet =
            Snippet::new("count").with_captured_locals(vec![("x".to_string(), "int".to_string())]);
        let synthesizer = SourceSynthesizer::new();
        let unit = synthesizer
            .synthesize(&request(&snippet, Some(MAIN_SOURCE)))
            .unwrap();

        assert_eq!(unit.name, "Main");
        assert!(unit.source.contains("private int count;"));
        assert!(unit.source.contains("void __run(int x)"));
        assert_eq!(unit.body(), "return count;");
        // The original source survives on both sides of the splice.
        assert!(unit.source.starts_with("public class Main {"));
        assert!(unit.source.ends_with("}\n"));
    }

    #[test]
    fn hint_picks_the_innermost_nested_type() {
        let source = "\
public class Outer {
    static class Inner {
        void poke() {
            int y = 1;
        }
    }
}
";
        let snippet = Snippet::new("1");
        let synthesizer = SourceSynthesizer::new();
        let unit = synthesizer
            .synthesize(&SynthesizeRequest {
                snippet: &snippet,
                declaring_type_name: "Outer$Inner",
                type_source: Some(source),
                line_hint: Some(4),
                is_static: false,
            })
            .unwrap();
        assert_eq!(unit.name, "Inner");
    }

    #[test]
    fn unusable_source_falls_back_to_binary_synthesis() {
        let snippet = Snippet::new("1");
        let synthesizer = SourceSynthesizer::new();
        let unit = synthesizer
            .synthesize(&SynthesizeRequest {
                snippet: &snippet,
                declaring_type_name: "Gone",
                type_source: Some("not java at all"),
                line_hint: None,
                is_static: false,
            })
            .unwrap();
        assert_eq!(unit.name, "__EvalUnit");
    }

    #[test]
    fn static_contexts_get_a_static_run_method() {
        let snippet = Snippet::new("1");
        let synthesizer = SourceSynthesizer::new();
        let unit = synthesizer
            .synthesize(&SynthesizeRequest {
                snippet: &snippet,
                declaring_type_name: "Main",
                type_source: None,
                line_hint: None,
                is_static: true,
            })
            .unwrap();
        assert!(unit.source.contains("static void __run()"));
    }

    #[test]
    fn cached_skeletons_keep_offsets_stable_across_snippets() {
        let synthesizer = SourceSynthesizer::new();
        let first = Snippet::new("1 + 2");
        let second = Snippet::new("count * 2");
        let a = synthesizer.synthesize(&request(&first, None)).unwrap();
        let b = synthesizer.synthesize(&request(&second, None)).unwrap();
        assert_eq!(a.run_method_start, b.run_method_start);

        synthesizer.reset();
        let c = synthesizer.synthesize(&request(&first, None)).unwrap();
        assert_eq!(a, c);
    }
}
