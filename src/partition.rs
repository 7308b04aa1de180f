//! Static partition of bundled source into build-time and run-time text.
//!
//! User scripts reach real engine modules exclusively through the `Modules`
//! marker identifier, which the banner defines at run time. At build time
//! those expressions are meaningless, so evaluation is preceded by this
//! partition: a read-only classification pass collects every maximal
//! expression rooted at the marker, then a separate generation pass splices
//! an inert `undefined` placeholder over each collected span. The run-time
//! text is generated independently and keeps the marker sites verbatim.

use lazy_static::lazy_static;
use oxc_allocator::Allocator;
use oxc_ast::ast::{ChainElement, Expression};
use oxc_ast_visit::Visit;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use regex::Regex;

use crate::error::BuildError;

/// The designated run-time-only marker identifier.
pub const RUNTIME_MARKER: &str = "Modules";

/// Placeholder spliced over elided expressions before build-time evaluation.
const INERT_PLACEHOLDER: &str = "undefined";

lazy_static! {
    /// Fast pre-check: skip the parse entirely when the marker never occurs.
    static ref MARKER_RE: Regex = Regex::new(r"\bModules\b").unwrap();
}

#[derive(Debug, Clone)]
pub struct SourcePartition {
    /// Text safe to evaluate in the build sandbox: marker sites elided.
    pub build: String,
    /// Text embedded for later execution inside the engine: unchanged.
    pub runtime: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASS 1: CLASSIFICATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Collects the spans of maximal marker-rooted expressions. Pruned traversal:
/// once an expression is classified run-time-only, its subtree is not walked
/// again, so collected spans never overlap.
struct MarkerClassifier {
    spans: Vec<(u32, u32)>,
}

fn marker_rooted(expr: &Expression<'_>) -> bool {
    match expr {
        Expression::Identifier(ident) => ident.name == RUNTIME_MARKER,
        Expression::StaticMemberExpression(member) => marker_rooted(&member.object),
        Expression::ComputedMemberExpression(member) => marker_rooted(&member.object),
        Expression::CallExpression(call) => marker_rooted(&call.callee),
        Expression::ChainExpression(chain) => match &chain.expression {
            ChainElement::CallExpression(call) => marker_rooted(&call.callee),
            ChainElement::StaticMemberExpression(member) => marker_rooted(&member.object),
            ChainElement::ComputedMemberExpression(member) => marker_rooted(&member.object),
            _ => false,
        },
        _ => false,
    }
}

impl<'a> Visit<'a> for MarkerClassifier {
    fn visit_expression(&mut self, expr: &Expression<'a>) {
        if marker_rooted(expr) {
            let span = expr.span();
            self.spans.push((span.start, span.end));
            return;
        }
        oxc_ast_visit::walk::walk_expression(self, expr);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PASS 2: GENERATION
// ═══════════════════════════════════════════════════════════════════════════════

fn elide_spans(source: &str, spans: &[(u32, u32)]) -> String {
    let mut sorted = spans.to_vec();
    sorted.sort_unstable();

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    for (start, end) in sorted {
        out.push_str(&source[cursor..start as usize]);
        out.push_str(INERT_PLACEHOLDER);
        cursor = end as usize;
    }
    out.push_str(&source[cursor..]);
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Partition bundled source into evaluate-now and embed-for-later text.
/// Malformed source fails here, before any evaluation is attempted.
pub fn partition_source(source: &str, path: &str) -> Result<SourcePartition, BuildError> {
    if !MARKER_RE.is_match(source) {
        return Ok(SourcePartition {
            build: source.to_string(),
            runtime: source.to_string(),
        });
    }

    let allocator = Allocator::default();
    let source_type = SourceType::default().with_module(true);
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return Err(BuildError::Parse {
            path: path.to_string(),
            message: ret
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; "),
        });
    }

    let mut classifier = MarkerClassifier { spans: Vec::new() };
    classifier.visit_program(&ret.program);
    log::debug!(
        "partition: {} run-time-only expression(s) elided from {}",
        classifier.spans.len(),
        path
    );

    Ok(SourcePartition {
        build: elide_spans(source, &classifier.spans),
        runtime: source.to_string(),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_marker_is_a_passthrough() {
        let src = "const x = 1;\n";
        let partition = partition_source(src, "entry.js").unwrap();
        assert_eq!(partition.build, src);
        assert_eq!(partition.runtime, src);
    }

    #[test]
    fn test_marker_call_is_elided_in_build_text_only() {
        let src = "const before = 1;\nModules.core.init(before);\nconst after = 2;\n";
        let partition = partition_source(src, "entry.js").unwrap();
        assert!(partition.build.contains("undefined;"));
        assert!(!partition.build.contains("Modules"));
        assert_eq!(partition.runtime, src);
    }

    #[test]
    fn test_marker_inside_larger_expression() {
        let src = "const level = Modules.core.world.level;\n";
        let partition = partition_source(src, "entry.js").unwrap();
        assert_eq!(partition.build, "const level = undefined;\n");
    }

    #[test]
    fn test_marker_as_call_argument() {
        let src = "register(Modules.ui, \"hud\");\n";
        let partition = partition_source(src, "entry.js").unwrap();
        assert_eq!(partition.build, "register(undefined, \"hud\");\n");
    }

    #[test]
    fn test_word_boundary_not_fooled_by_similar_names() {
        let src = "const MyModulesThing = 3;\n";
        let partition = partition_source(src, "entry.js").unwrap();
        assert_eq!(partition.build, src);
    }

    #[test]
    fn test_malformed_source_is_a_parse_error() {
        let err = partition_source("const Modules = {", "entry.js").unwrap_err();
        assert!(matches!(err, BuildError::Parse { .. }));
    }
}
