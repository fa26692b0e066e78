//! Structure-aware chunker: splits a `(path, text)` pair into an anchor chunk plus an
//! ordered sequence of body chunks.
//!
//! Body-chunk extraction reuses this codebase's existing tree-sitter language table and
//! node-walk approach (see the AST symbol indexer this was generalized from), but emits
//! *chunks* for top-level declarations instead of a queryable symbol index.

use crate::types::Chunk;

#[cfg(feature = "treesitter")]
use tree_sitter::{Language, Node, Parser};

/// Anchor chunks are capped at this many lines.
const ANCHOR_MAX_LINES: usize = 40;

/// Soft maximum window size for a body chunk.
const BODY_MAX_LINES: usize = 60;
const BODY_MAX_BYTES: usize = 1024;

/// Split `(path, text)` into an anchor chunk (always `chunk_index == 0`) followed by
/// body chunks numbered `1..N`. `context_prev`/`context_next` are left empty here; the
/// Syncer fills them in after assembling the full ordered sequence for a file.
pub fn chunk_file(path: &str, text: &str, hash: &str, ext: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    chunks.push(make_anchor(path, text, hash));

    let body = body_chunks(text, ext);
    for (idx, (start, end, content)) in body.into_iter().enumerate() {
        chunks.push(Chunk {
            id: None,
            path: path.to_string(),
            hash: hash.to_string(),
            content,
            start_line: start,
            end_line: end,
            chunk_index: (idx + 1) as u32,
            is_anchor: false,
            context_prev: String::new(),
            context_next: String::new(),
            vector: Vec::new(),
        });
    }
    chunks
}

fn make_anchor(path: &str, text: &str, hash: &str) -> Chunk {
    let lines: Vec<&str> = text.lines().collect();
    let end = lines.len().min(ANCHOR_MAX_LINES);
    let content = lines[..end].join("\n");
    // A zero-line file has no real span; `0` is the sentinel rather than clamping up to
    // a fictitious line 1..=1 that the file doesn't have.
    let (start_line, end_line) = if end == 0 { (0, 0) } else { (1, end as u32) };
    Chunk {
        id: None,
        path: path.to_string(),
        hash: hash.to_string(),
        content,
        start_line,
        end_line,
        chunk_index: 0,
        is_anchor: true,
        context_prev: String::new(),
        context_next: String::new(),
        vector: Vec::new(),
    }
}

/// A body chunk's line range and extracted text, 1-based inclusive.
type RawSpan = (u32, u32, String);

fn body_chunks(text: &str, ext: &str) -> Vec<RawSpan> {
    #[cfg(feature = "treesitter")]
    {
        if let Some(spans) = tree_chunks(text, ext) {
            if !spans.is_empty() {
                return spans;
            }
        }
    }
    #[cfg(not(feature = "treesitter"))]
    {
        let _ = ext;
    }
    paragraph_chunks(text)
}

/// Fallback splitter: blank-line-separated paragraphs. Used for unknown extensions and
/// whenever the grammar-based path produces no spans (parse error or empty body).
fn paragraph_chunks(text: &str) -> Vec<RawSpan> {
    let lines: Vec<&str> = text.lines().collect();
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            if let Some(s) = start.take() {
                spans.push(build_span(&lines, s, i - 1));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        spans.push(build_span(&lines, s, lines.len().saturating_sub(1)));
    }
    spans
}

fn build_span(lines: &[&str], start0: usize, end0: usize) -> RawSpan {
    let content = lines[start0..=end0].join("\n");
    ((start0 + 1) as u32, (end0 + 1) as u32, content)
}

#[cfg(feature = "treesitter")]
fn language_for_ext(ext: &str) -> Option<Language> {
    match ext {
        "rs" => Some(tree_sitter_rust::LANGUAGE.into()),
        "ts" | "tsx" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "py" | "pyi" => Some(tree_sitter_python::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "c" | "h" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        _ => None,
    }
}

#[cfg(feature = "treesitter")]
fn is_declaration(kind: &str) -> bool {
    matches!(
        kind,
        "function_item"
            | "struct_item"
            | "enum_item"
            | "trait_item"
            | "impl_item"
            | "mod_item"
            | "function_declaration"
            | "class_declaration"
            | "interface_declaration"
            | "type_alias_declaration"
            | "function_definition"
            | "class_definition"
            | "method_declaration"
            | "type_declaration"
            | "struct_specifier"
            | "enum_specifier"
            | "class_specifier"
            | "enum_declaration"
    )
}

#[cfg(feature = "treesitter")]
fn is_comment(kind: &str) -> bool {
    kind.contains("comment")
}

/// Walk the top level of the parse tree (descending through transparent wrapper nodes
/// like `export_statement`) and emit one span per declaration, attaching immediately
/// preceding contiguous comment lines, and splitting oversized declarations along their
/// own child boundaries.
#[cfg(feature = "treesitter")]
fn tree_chunks(text: &str, ext: &str) -> Option<Vec<RawSpan>> {
    let lang = language_for_ext(ext)?;
    let mut parser = Parser::new();
    parser.set_language(&lang).ok()?;
    let tree = parser.parse(text, None)?;
    let root = tree.root_node();
    if root.has_error() {
        // Non-fatal per §4.2: fall back to paragraph splitting on parse error.
        return None;
    }

    let source = text.as_bytes();
    let lines: Vec<&str> = text.lines().collect();
    let mut spans = Vec::new();
    collect_top_level(&root, source, &lines, &mut spans);
    Some(spans)
}

#[cfg(feature = "treesitter")]
fn collect_top_level(node: &Node, source: &[u8], lines: &[&str], out: &mut Vec<RawSpan>) {
    let mut cursor = node.walk();
    let mut pending_comment_start: Option<usize> = None;

    for child in node.children(&mut cursor) {
        let kind = child.kind();
        if is_comment(kind) {
            let row = child.start_position().row;
            if pending_comment_start.is_none() {
                pending_comment_start = Some(row);
            }
            continue;
        }
        if is_declaration(kind) {
            let mut start_row = child.start_position().row;
            if let Some(cs) = pending_comment_start.take() {
                // Only attach if contiguous (no blank line between comment and decl).
                if cs < start_row && lines[cs..start_row].iter().all(|l| !l.trim().is_empty()) {
                    start_row = cs;
                }
            } else {
                pending_comment_start = None;
            }
            let end_row = child.end_position().row;
            emit_span_with_cap(source, lines, start_row, end_row, &child, out);
        } else {
            pending_comment_start = None;
            // Transparent wrapper (e.g. `export_statement`, `decorated_definition`):
            // descend without treating its own span as a chunk boundary.
            collect_top_level(&child, source, lines, out);
        }
    }
}

#[cfg(feature = "treesitter")]
fn emit_span_with_cap(
    source: &[u8],
    lines: &[&str],
    start_row: usize,
    end_row: usize,
    node: &Node,
    out: &mut Vec<RawSpan>,
) {
    let content = lines[start_row..=end_row.min(lines.len().saturating_sub(1))].join("\n");
    if content.len() <= BODY_MAX_BYTES && (end_row - start_row + 1) <= BODY_MAX_LINES {
        out.push(((start_row + 1) as u32, (end_row + 1) as u32, content));
        return;
    }

    // Oversized: split along this node's named children, grouping contiguous lines up
    // to the cap rather than emitting one chunk per grandchild.
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    if children.is_empty() {
        // No finer boundary available: emit as-is (cap is soft).
        out.push(((start_row + 1) as u32, (end_row + 1) as u32, content));
        return;
    }

    let mut group_start = start_row;
    let mut group_end = start_row;
    let mut has_content = false;

    for child in &children {
        let child_end = child.end_position().row;
        let candidate_len = child_end.saturating_sub(group_start) + 1;
        if has_content && candidate_len > BODY_MAX_LINES {
            out.push(build_span(lines, group_start, group_end));
            group_start = child.start_position().row;
        }
        group_end = child_end.max(group_end);
        has_content = true;
    }
    if has_content {
        out.push(build_span(lines, group_start, group_end.max(end_row)));
    } else {
        out.push(((start_row + 1) as u32, (end_row + 1) as u32, content));
    }
    let _ = source;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_is_always_first_and_index_zero() {
        let chunks = chunk_file("a.txt", "line one\nline two\n", "h", "txt");
        assert!(chunks[0].is_anchor);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn exactly_one_anchor_per_file() {
        let chunks = chunk_file(
            "a.rs",
            "fn one() {}\n\nfn two() {}\n",
            "h",
            "rs",
        );
        assert_eq!(chunks.iter().filter(|c| c.is_anchor).count(), 1);
    }

    #[test]
    fn paragraph_fallback_splits_on_blank_lines() {
        let chunks = chunk_file("b.txt", "hello\n\nworld\n", "h", "txt");
        // anchor + 2 paragraphs
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].content, "hello");
        assert_eq!(chunks[2].content, "world");
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn rust_top_level_functions_become_chunks() {
        let src = "fn one() {\n    1\n}\n\nfn two() {\n    2\n}\n";
        let chunks = chunk_file("a.rs", src, "h", "rs");
        let bodies: Vec<_> = chunks.iter().skip(1).collect();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].content.starts_with("fn one"));
        assert!(bodies[1].content.starts_with("fn two"));
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn preceding_comment_attached_to_declaration() {
        let src = "// does a thing\nfn one() {\n    1\n}\n";
        let chunks = chunk_file("a.rs", src, "h", "rs");
        assert!(chunks[1].content.starts_with("// does a thing"));
    }

    #[cfg(feature = "treesitter")]
    #[test]
    fn parse_error_falls_back_to_paragraphs() {
        let src = "fn broken( {{{ not valid rust at all\n\nsecond paragraph\n";
        let chunks = chunk_file("a.rs", src, "h", "rs");
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn line_ranges_are_valid() {
        let chunks = chunk_file("a.rs", "fn f() {}\n", "h", "rs");
        for c in &chunks {
            assert!(c.end_line >= c.start_line);
            assert!(c.start_line >= 1);
        }
    }

    #[test]
    fn empty_file_anchor_claims_zero_lines() {
        let anchor = make_anchor("empty.txt", "", "h");
        assert_eq!(anchor.start_line, 0);
        assert_eq!(anchor.end_line, 0);
        assert_eq!(anchor.num_lines(), 0);
    }
}
