//! Best-effort names and descriptive flags for semantic units

use tree_sitter::Node;

const NAME_KINDS: &[&str] = &[
    "identifier",
    "type_identifier",
    "field_identifier",
    "property_identifier",
    "constant",
];

fn text<'a>(node: Node, source: &'a str) -> Option<&'a str> {
    source.get(node.byte_range())
}

/// Collapse runs of whitespace so multi-line signatures read as one line
fn squash(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// The node that carries the declaration, looking through wrappers like
/// python decorators
pub(crate) fn definition_node(node: Node) -> Node {
    if node.kind() == "decorated_definition"
        && let Some(definition) = node.child_by_field_name("definition")
    {
        return definition;
    }
    node
}

/// Extract the declared name of a unit
pub(crate) fn extract_name(node: Node, source: &str, lang: &str) -> Option<String> {
    let node = definition_node(node);

    let named = match (lang, node.kind()) {
        ("rust", "impl_item") => node.child_by_field_name("type"),
        ("go", "type_declaration") => first_child_of_kind(node, "type_spec")
            .and_then(|spec| spec.child_by_field_name("name")),
        ("c" | "cpp", "function_definition") => node
            .child_by_field_name("declarator")
            .and_then(declarator_identifier),
        _ => node.child_by_field_name("name"),
    };

    named
        .or_else(|| first_child_matching(node, |kind| NAME_KINDS.contains(&kind)))
        .and_then(|n| text(n, source))
        .map(squash)
        .filter(|name| !name.is_empty())
}

/// Parameter list text of a callable, whitespace-collapsed
pub(crate) fn extract_parameters(node: Node, source: &str, lang: &str) -> Option<String> {
    let node = definition_node(node);

    let params = match lang {
        "c" | "cpp" => node
            .child_by_field_name("declarator")
            .and_then(function_declarator)
            .and_then(|declarator| declarator.child_by_field_name("parameters")),
        _ => node.child_by_field_name("parameters"),
    }?;

    text(params, source).map(squash)
}

/// Whether the declaration header carries an `async` keyword
pub(crate) fn is_async(node: Node, source: &str) -> bool {
    let node = definition_node(node);
    let header_end = node
        .child_by_field_name("name")
        .map(|name| name.start_byte())
        .unwrap_or_else(|| node.end_byte());

    source
        .get(node.start_byte()..header_end)
        .is_some_and(|header| header.split_whitespace().any(|word| word == "async"))
}

/// Whether the unit is visible outside its module, per language convention
pub(crate) fn is_exported(node: Node, source: &str, lang: &str, name: Option<&str>) -> bool {
    let node = definition_node(node);

    match lang {
        "rust" => first_child_of_kind(node, "visibility_modifier").is_some(),
        "javascript" | "typescript" => {
            let outer = match node.parent() {
                Some(parent) if parent.kind() == "decorated_definition" => parent.parent(),
                parent => parent,
            };
            outer.is_some_and(|parent| parent.kind() == "export_statement")
        }
        "go" => name
            .and_then(|n| n.chars().next())
            .is_some_and(char::is_uppercase),
        "java" => first_child_of_kind(node, "modifiers")
            .and_then(|modifiers| text(modifiers, source))
            .is_some_and(|modifiers| modifiers.split_whitespace().any(|m| m == "public")),
        "python" => name.is_some_and(|n| !n.starts_with('_')),
        "c" | "cpp" => !first_child_matching(node, |kind| kind == "storage_class_specifier")
            .and_then(|storage| text(storage, source))
            .is_some_and(|storage| storage == "static"),
        _ => true,
    }
}

fn first_child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    first_child_matching(node, |k| k == kind)
}

fn first_child_matching<'t>(node: Node<'t>, predicate: impl Fn(&str) -> bool) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|child| predicate(child.kind()));
    found
}

fn function_declarator(node: Node) -> Option<Node> {
    if node.kind() == "function_declarator" {
        return Some(node);
    }
    // Pointer and reference declarators wrap the function declarator
    node.child_by_field_name("declarator")
        .and_then(function_declarator)
}

fn declarator_identifier(node: Node) -> Option<Node> {
    match node.kind() {
        "identifier" | "field_identifier" | "qualified_identifier" | "destructor_name"
        | "operator_name" => Some(node),
        _ => node
            .child_by_field_name("declarator")
            .and_then(declarator_identifier),
    }
}
