use super::{Element, Node};

const INDENT: &str = "  ";

/// Serializes an element. Element-only content is indented one level per depth;
/// anything containing text is written inline so the text round-trips exactly.
pub fn to_xml_string(element: &Element) -> String {
    let mut out = String::new();
    write_block(element, 0, &mut out);
    out
}

pub fn to_xml_document(root: &Element) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    write_block(root, 0, &mut out);
    out
}

fn write_block(element: &Element, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    let has_text = element.nodes().iter().any(|n| matches!(n, Node::Text(_)));
    if has_text {
        write_inline(element, out);
        out.push('\n');
        return;
    }

    write_open(element, out);
    if element.nodes().is_empty() {
        out.push_str("/>\n");
        return;
    }
    out.push_str(">\n");
    for child in element.elements() {
        write_block(child, depth + 1, out);
    }
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str("</");
    out.push_str(element.name());
    out.push_str(">\n");
}

fn write_inline(element: &Element, out: &mut String) {
    write_open(element, out);
    if element.nodes().is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for node in element.nodes() {
        match node {
            Node::Text(t) => escape_into(t, false, out),
            Node::Element(e) => write_inline(e, out),
        }
    }
    out.push_str("</");
    out.push_str(element.name());
    out.push('>');
}

fn write_open(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(element.name());
    for (key, value) in element.attributes() {
        out.push(' ');
        out.push_str(key);
        out.push_str("=\"");
        escape_into(value, true, out);
        out.push('"');
    }
}

fn escape_into(raw: &str, attribute: bool, out: &mut String) {
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\n' if attribute => out.push_str("&#xA;"),
            other => out.push(other),
        }
    }
}
