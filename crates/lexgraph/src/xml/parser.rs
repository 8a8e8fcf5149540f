use pest::Parser;
use pest_derive::Parser;

use crate::error::{LexError, ParseDiagnostic, Result, SourceSpan};
use crate::schema::parser::pest_error_to_diagnostic;

use super::{Element, Node};

#[derive(Parser)]
#[grammar = "xml/xml.pest"]
struct XmlParser;

pub fn parse_xml(input: &str) -> Result<Element> {
    parse_xml_diagnostic(input).map_err(|e| LexError::Parse(e.to_string()))
}

pub fn parse_xml_diagnostic(input: &str) -> std::result::Result<Element, ParseDiagnostic> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let pairs = XmlParser::parse(Rule::document, input).map_err(pest_error_to_diagnostic)?;

    for pair in pairs {
        if pair.as_rule() != Rule::document {
            continue;
        }
        for inner in pair.into_inner() {
            if inner.as_rule() == Rule::element {
                return build_element(inner);
            }
        }
    }
    Err(ParseDiagnostic::new(
        "document has no root element".to_string(),
        None,
    ))
}

fn build_element(pair: pest::iterators::Pair<Rule>) -> std::result::Result<Element, ParseDiagnostic> {
    let span = pair.as_span();
    let mut inner = pair.into_inner();
    let head = inner
        .next()
        .ok_or_else(|| ParseDiagnostic::new("empty element".to_string(), None))?;

    let mut element = build_tag(head)?;
    if let Some(content) = inner.next() {
        let mut children = Vec::new();
        for item in content.into_inner() {
            match item.as_rule() {
                Rule::element => children.push(Node::Element(build_element(item)?)),
                Rule::text => {
                    let text = decode_entities(item.as_str(), item.as_span().start())?;
                    children.push(Node::Text(text));
                }
                Rule::cdata => {
                    let raw = item.into_inner().next().map(|p| p.as_str()).unwrap_or("");
                    children.push(Node::Text(raw.to_string()));
                }
                _ => {}
            }
        }

        let end = inner
            .next()
            .ok_or_else(|| ParseDiagnostic::new("missing end tag".to_string(), None))?;
        let end_name = end.into_inner().next().map(|p| p.as_str()).unwrap_or("");
        if end_name != element.name {
            return Err(ParseDiagnostic::new(
                format!(
                    "mismatched end tag: expected </{}>, found </{}>",
                    element.name, end_name
                ),
                Some(SourceSpan::new(span.start(), span.end())),
            ));
        }

        // Whitespace between child elements is layout, not content.
        let has_elements = children.iter().any(|n| matches!(n, Node::Element(_)));
        if has_elements {
            children.retain(|n| !matches!(n, Node::Text(t) if t.trim().is_empty()));
        }
        element.children = children;
    }
    Ok(element)
}

fn build_tag(pair: pest::iterators::Pair<Rule>) -> std::result::Result<Element, ParseDiagnostic> {
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| ParseDiagnostic::new("tag is missing a name".to_string(), None))?;
    let mut element = Element::new(name);

    for attr in inner {
        if attr.as_rule() != Rule::attribute {
            continue;
        }
        let attr_span = attr.as_span();
        let mut parts = attr.into_inner();
        let key = parts.next().map(|p| p.as_str()).unwrap_or("");
        let (value, value_start) = parts
            .next()
            .map(|p| (p.as_str(), p.as_span().start()))
            .unwrap_or(("", attr_span.end()));
        if element.attr(key).is_some() {
            return Err(ParseDiagnostic::new(
                format!("duplicate attribute {} on <{}>", key, element.name),
                Some(SourceSpan::new(attr_span.start(), attr_span.end())),
            ));
        }
        element
            .attributes
            .push((key.to_string(), decode_entities(value, value_start)?));
    }
    Ok(element)
}

/// Decodes the predefined and numeric character references in `raw`, which starts
/// at byte `offset` of the input. Any other `&` is an error: the writer escapes
/// every `&`, so keeping one verbatim would not survive a save.
pub(crate) fn decode_entities(
    raw: &str,
    offset: usize,
) -> std::result::Result<String, ParseDiagnostic> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut pos = 0usize;
    while let Some(found) = raw[pos..].find('&') {
        let amp = pos + found;
        out.push_str(&raw[pos..amp]);
        let tail = &raw[amp..];
        let decoded = tail.find(';').and_then(|semi| {
            let c = match &tail[1..semi] {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                entity => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse::<u32>().ok()))
                    .and_then(char::from_u32),
            };
            c.map(|c| (c, semi))
        });
        let Some((c, semi)) = decoded else {
            let shown: String = tail.chars().take_while(|c| !c.is_whitespace()).take(16).collect();
            let start = offset + amp;
            return Err(ParseDiagnostic::new(
                format!("unknown entity reference '{}'", shown),
                Some(SourceSpan::new(start, start + shown.len().max(1))),
            ));
        };
        out.push(c);
        pos = amp + semi + 1;
    }
    out.push_str(&raw[pos..]);
    Ok(out)
}
