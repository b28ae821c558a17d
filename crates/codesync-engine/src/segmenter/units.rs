//! Semantic unit extraction from a syntax tree

use codesync_domain::{ChunkMetadata, ChunkType, SegmenterConfig};
use tree_sitter::Node;

use super::naming;

/// A semantic unit located in the source. Carries offsets only, never text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SemanticUnit {
    pub start_byte: usize,
    pub end_byte: usize,
    /// 1-based, inclusive
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: ChunkType,
    pub name: Option<String>,
    pub metadata: ChunkMetadata,
}

/// How a node kind participates in segmentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    /// Free function that becomes a method inside a class-like scope
    Callable,
    /// Always a method regardless of scope
    Method,
    Declaration(ChunkType),
}

fn classify(node: Node, lang: &str) -> Option<UnitKind> {
    use UnitKind::*;

    let node = naming::definition_node(node);
    let kind = match (lang, node.kind()) {
        ("rust", "function_item") => Callable,
        ("rust", "struct_item" | "union_item") => Declaration(ChunkType::Struct),
        ("rust", "enum_item") => Declaration(ChunkType::Enum),
        ("rust", "trait_item") => Declaration(ChunkType::Trait),
        ("rust", "impl_item") => Declaration(ChunkType::Impl),
        ("rust", "type_item") => Declaration(ChunkType::Type),

        ("python", "function_definition") => Callable,
        ("python", "class_definition") => Declaration(ChunkType::Class),

        (
            "javascript" | "typescript",
            "function_declaration" | "generator_function_declaration",
        ) => Callable,
        ("javascript" | "typescript", "method_definition") => Method,
        ("javascript" | "typescript", "class_declaration" | "abstract_class_declaration") => {
            Declaration(ChunkType::Class)
        }
        ("javascript" | "typescript", "interface_declaration") => Declaration(ChunkType::Interface),
        ("javascript" | "typescript", "type_alias_declaration") => Declaration(ChunkType::Type),
        ("javascript" | "typescript", "enum_declaration") => Declaration(ChunkType::Enum),

        ("go", "function_declaration") => Callable,
        ("go", "method_declaration") => Method,
        ("go", "type_declaration") => Declaration(go_type_kind(node)),

        ("java", "method_declaration" | "constructor_declaration") => Method,
        ("java", "class_declaration" | "record_declaration") => Declaration(ChunkType::Class),
        ("java", "interface_declaration") => Declaration(ChunkType::Interface),
        ("java", "enum_declaration") => Declaration(ChunkType::Enum),

        ("c" | "cpp", "function_definition") => Callable,
        ("c" | "cpp", "class_specifier") if has_body(node) => Declaration(ChunkType::Class),
        ("c" | "cpp", "struct_specifier") if has_body(node) => Declaration(ChunkType::Struct),
        ("c" | "cpp", "enum_specifier") if has_body(node) => Declaration(ChunkType::Enum),

        ("ruby", "method") => Callable,
        ("ruby", "singleton_method") => Method,
        ("ruby", "class") => Declaration(ChunkType::Class),

        _ => return None,
    };
    Some(kind)
}

fn has_body(node: Node) -> bool {
    node.child_by_field_name("body").is_some()
}

fn go_type_kind(node: Node) -> ChunkType {
    let mut cursor = node.walk();
    let spec = node
        .named_children(&mut cursor)
        .find(|child| child.kind() == "type_spec");
    match spec.and_then(|spec| spec.child_by_field_name("type")).map(|t| t.kind()) {
        Some("struct_type") => ChunkType::Struct,
        Some("interface_type") => ChunkType::Interface,
        _ => ChunkType::Type,
    }
}

/// Scope a unit sits in, used to classify callables as methods
#[derive(Debug, Clone, Default)]
struct Scope {
    parent_name: Option<String>,
    class_like: bool,
}

/// Shared read-only inputs of one walk
pub(crate) struct WalkContext<'a> {
    pub source: &'a str,
    pub lang: &'a str,
    pub config: &'a SegmenterConfig,
}

impl WalkContext<'_> {
    fn char_len(&self, node: Node) -> usize {
        self.source
            .get(node.byte_range())
            .map(|text| text.chars().count())
            .unwrap_or(0)
    }
}

/// Collect the semantic units under `root`, in source order
pub(crate) fn collect_units(root: Node, ctx: &WalkContext) -> Vec<SemanticUnit> {
    collect(root, ctx, &Scope::default())
}

fn collect(node: Node, ctx: &WalkContext, scope: &Scope) -> Vec<SemanticUnit> {
    let Some(kind) = classify(node, ctx.lang) else {
        return collect_children(node, ctx, scope);
    };

    let size = ctx.char_len(node);
    if size < ctx.config.min_chunk_size {
        return Vec::new();
    }

    let unit = build_unit(node, kind, ctx, scope);
    if size <= ctx.config.max_chunk_size {
        return vec![unit];
    }

    // Oversized: try to split into smaller units, else keep the node whole
    let inner_scope = match unit.chunk_type {
        ChunkType::Class | ChunkType::Impl | ChunkType::Trait | ChunkType::Interface => Scope {
            parent_name: unit.name.clone(),
            class_like: true,
        },
        _ if unit.chunk_type.is_callable() => Scope::default(),
        _ => scope.clone(),
    };
    let children = collect_children(node, ctx, &inner_scope);
    if children.is_empty() { vec![unit] } else { children }
}

fn collect_children(node: Node, ctx: &WalkContext, scope: &Scope) -> Vec<SemanticUnit> {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.named_children(&mut cursor).collect();
    children
        .into_iter()
        .flat_map(|child| collect(child, ctx, scope))
        .collect()
}

fn build_unit(node: Node, kind: UnitKind, ctx: &WalkContext, scope: &Scope) -> SemanticUnit {
    let name = naming::extract_name(node, ctx.source, ctx.lang);

    let (chunk_type, mut metadata) = match kind {
        UnitKind::Callable | UnitKind::Method => {
            let chunk_type = if kind == UnitKind::Method || scope.class_like {
                ChunkType::Method
            } else {
                ChunkType::Function
            };
            let metadata = ChunkMetadata::callable(
                naming::extract_parameters(node, ctx.source, ctx.lang),
                naming::is_async(node, ctx.source),
            );
            (chunk_type, metadata)
        }
        UnitKind::Declaration(chunk_type) => (chunk_type, ChunkMetadata::declaration()),
    };

    metadata.parent_name = scope.parent_name.clone();
    metadata.exported = naming::is_exported(node, ctx.source, ctx.lang, name.as_deref());

    let start = node.start_position();
    let end = node.end_position();
    let end_line = if end.column == 0 && end.row > start.row {
        end.row
    } else {
        end.row + 1
    };

    SemanticUnit {
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        start_line: start.row + 1,
        end_line,
        chunk_type,
        name,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use codesync_domain::ChunkDetail;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::segmenter::parser::ParserManager;

    fn units(source: &str, lang: &str, config: &SegmenterConfig) -> Vec<SemanticUnit> {
        let tree = ParserManager::new().parse(lang, source).unwrap();
        let ctx = WalkContext { source, lang, config };
        collect_units(tree.root_node(), &ctx)
    }

    fn summary(units: &[SemanticUnit]) -> Vec<(ChunkType, Option<String>)> {
        units.iter().map(|u| (u.chunk_type, u.name.clone())).collect()
    }

    #[test]
    fn test_rust_top_level_units() {
        let fixture = r#"
pub struct Point {
    pub x: f64,
    pub y: f64,
}

pub fn distance(a: &Point, b: &Point) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}
"#;
        let actual = units(fixture, "rust", &SegmenterConfig::default().min_chunk_size(10usize));

        let expected = vec![
            (ChunkType::Struct, Some("Point".to_string())),
            (ChunkType::Function, Some("distance".to_string())),
        ];
        assert_eq!(summary(&actual), expected);
        assert_eq!(actual[0].start_line, 2);
        assert_eq!(actual[0].end_line, 5);
        assert_eq!(actual[1].start_line, 7);
        assert_eq!(actual[1].end_line, 9);
    }

    #[test]
    fn test_units_below_minimum_are_skipped() {
        let fixture = "fn a() {}\n\nfn long_enough_name(value: u32) -> u32 {\n    value * 2\n}\n";
        let actual = units(fixture, "rust", &SegmenterConfig::default().min_chunk_size(30usize));

        assert_eq!(summary(&actual), vec![(ChunkType::Function, Some("long_enough_name".to_string()))]);
    }

    #[test]
    fn test_oversized_impl_splits_into_methods() {
        let fixture = r#"impl Counter {
    pub fn increment(&mut self) {
        self.value += 1;
    }

    pub async fn reset(&mut self) {
        self.value = 0;
    }
}"#;
        let config = SegmenterConfig::default()
            .min_chunk_size(20usize)
            .max_chunk_size(80usize);

        let actual = units(fixture, "rust", &config);

        let expected = vec![
            (ChunkType::Method, Some("increment".to_string())),
            (ChunkType::Method, Some("reset".to_string())),
        ];
        assert_eq!(summary(&actual), expected);
        assert_eq!(actual[1].metadata.parent_name, Some("Counter".to_string()));
        assert_eq!(
            actual[1].metadata.detail,
            ChunkDetail::Callable { parameters: Some("(&mut self)".to_string()), is_async: true }
        );
    }

    #[test]
    fn test_oversized_without_qualifying_children_is_kept_whole() {
        let fixture = "fn big() {\n    let a = 1;\n    let b = 2;\n    let c = a + b;\n}";
        let config = SegmenterConfig::default()
            .min_chunk_size(10usize)
            .max_chunk_size(20usize);

        let actual = units(fixture, "rust", &config);

        assert_eq!(summary(&actual), vec![(ChunkType::Function, Some("big".to_string()))]);
    }

    #[test]
    fn test_python_methods_inside_class() {
        let fixture = r#"class Greeter:
    def __init__(self, name):
        self.name = name

    def greet(self, other):
        return f"hello {other}, I am {self.name}"
"#;
        let config = SegmenterConfig::default()
            .min_chunk_size(20usize)
            .max_chunk_size(60usize);

        let actual = units(fixture, "python", &config);

        let expected = vec![
            (ChunkType::Method, Some("__init__".to_string())),
            (ChunkType::Method, Some("greet".to_string())),
        ];
        assert_eq!(summary(&actual), expected);
        assert_eq!(actual[0].metadata.parent_name, Some("Greeter".to_string()));
    }

    #[test]
    fn test_go_type_kinds() {
        let fixture = "package main\n\ntype Shape interface {\n\tArea() float64\n}\n\ntype Rect struct {\n\tW, H float64\n}\n";
        let actual = units(fixture, "go", &SegmenterConfig::default().min_chunk_size(10usize));

        let expected = vec![
            (ChunkType::Interface, Some("Shape".to_string())),
            (ChunkType::Struct, Some("Rect".to_string())),
        ];
        assert_eq!(summary(&actual), expected);
    }
}
