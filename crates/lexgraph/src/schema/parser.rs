use pest::Parser;
use pest::error::InputLocation;
use pest_derive::Parser;

use crate::error::{LexError, ParseDiagnostic, Result, SourceSpan};
use crate::types::FieldKind;

use super::ast::*;

#[derive(Parser)]
#[grammar = "schema/schema.pest"]
struct SchemaParser;

pub fn parse_schema(input: &str) -> Result<SchemaFile> {
    parse_schema_diagnostic(input).map_err(|e| LexError::Parse(e.to_string()))
}

pub fn parse_schema_diagnostic(input: &str) -> std::result::Result<SchemaFile, ParseDiagnostic> {
    let pairs = SchemaParser::parse(Rule::schema_file, input).map_err(pest_error_to_diagnostic)?;

    let mut classes = Vec::new();
    for pair in pairs {
        if pair.as_rule() == Rule::schema_file {
            for inner in pair.into_inner() {
                if inner.as_rule() == Rule::class_decl {
                    classes.push(parse_class_decl(inner).map_err(lex_error_to_diagnostic)?);
                }
            }
        }
    }
    let schema = SchemaFile { classes };
    validate_schema_annotations(&schema).map_err(lex_error_to_diagnostic)?;
    Ok(schema)
}

pub(crate) fn pest_error_to_diagnostic<R: pest::RuleType>(
    err: pest::error::Error<R>,
) -> ParseDiagnostic {
    let span = match err.location {
        InputLocation::Pos(pos) => Some(SourceSpan::new(pos, pos)),
        InputLocation::Span((start, end)) => Some(SourceSpan::new(start, end)),
    };
    ParseDiagnostic::new(err.to_string(), span)
}

pub(crate) fn lex_error_to_diagnostic(err: LexError) -> ParseDiagnostic {
    ParseDiagnostic::new(err.to_string(), None)
}

fn next_str(inner: &mut pest::iterators::Pairs<Rule>, what: &str) -> Result<String> {
    inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| LexError::Parse(format!("missing {}", what)))
}

fn parse_class_decl(pair: pest::iterators::Pair<Rule>) -> Result<ClassDecl> {
    let mut inner = pair.into_inner();
    let name = next_str(&mut inner, "class name")?;

    let mut base = None;
    let mut annotations = Vec::new();
    let mut fields = Vec::new();

    for item in inner {
        match item.as_rule() {
            Rule::base_clause => {
                base = item.into_inner().next().map(|p| p.as_str().to_string());
            }
            Rule::annotation => annotations.push(parse_annotation(item)?),
            Rule::field_decl => fields.push(parse_field_decl(item)?),
            _ => {}
        }
    }

    Ok(ClassDecl {
        name,
        base,
        annotations,
        fields,
    })
}

fn parse_field_decl(pair: pest::iterators::Pair<Rule>) -> Result<FieldDecl> {
    let mut inner = pair.into_inner();
    let name = next_str(&mut inner, "field name")?;
    let kind_ref = inner
        .next()
        .ok_or_else(|| LexError::Parse(format!("field {} is missing its kind", name)))?;
    let (kind, destination) = parse_kind_ref(kind_ref)?;

    let mut annotations = Vec::new();
    for item in inner {
        if item.as_rule() == Rule::annotation {
            annotations.push(parse_annotation(item)?);
        }
    }

    Ok(FieldDecl {
        name,
        kind,
        destination,
        annotations,
    })
}

fn parse_kind_ref(pair: pest::iterators::Pair<Rule>) -> Result<(FieldKind, Option<String>)> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| LexError::Parse("kind reference is empty".to_string()))?;

    match inner.as_rule() {
        Rule::object_kind => {
            let mut parts = inner.into_inner();
            let kind_name = next_str(&mut parts, "object kind")?;
            let destination = next_str(&mut parts, "destination class")?;
            let kind = FieldKind::from_str_name(&kind_name)
                .ok_or_else(|| LexError::Parse(format!("unknown object kind: {}", kind_name)))?;
            Ok((kind, Some(destination)))
        }
        Rule::basic_kind => {
            let kind = FieldKind::from_str_name(inner.as_str())
                .ok_or_else(|| LexError::Parse(format!("unknown field kind: {}", inner.as_str())))?;
            if kind.is_object() {
                return Err(LexError::Parse(format!(
                    "{} requires a destination class, e.g. {}<CmObject>",
                    kind, kind
                )));
            }
            Ok((kind, None))
        }
        other => Err(LexError::Parse(format!("unexpected kind rule: {:?}", other))),
    }
}

fn parse_annotation(pair: pest::iterators::Pair<Rule>) -> Result<Annotation> {
    let mut inner = pair.into_inner();
    let name = next_str(&mut inner, "annotation name")?;
    let value = inner.next().map(|p| {
        let s = p.as_str();
        if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
            s[1..s.len() - 1].to_string()
        } else {
            s.to_string()
        }
    });

    Ok(Annotation { name, value })
}

fn validate_schema_annotations(schema: &SchemaFile) -> Result<()> {
    for class in &schema.classes {
        for ann in &class.annotations {
            match ann.name.as_str() {
                "id" => validate_numeric_id(ann, &class.name)?,
                "abstract" => {
                    if ann.value.is_some() {
                        return Err(LexError::Parse(format!(
                            "@abstract on {} does not accept a value",
                            class.name
                        )));
                    }
                }
                other => {
                    return Err(LexError::Parse(format!(
                        "unknown class annotation @{} on {}",
                        other, class.name
                    )));
                }
            }
        }

        for field in &class.fields {
            for ann in &field.annotations {
                if ann.name != "id" {
                    return Err(LexError::Parse(format!(
                        "unknown field annotation @{} on {}.{}",
                        ann.name, class.name, field.name
                    )));
                }
                validate_numeric_id(ann, &format!("{}.{}", class.name, field.name))?;
            }
        }
    }
    Ok(())
}

fn validate_numeric_id(ann: &Annotation, owner: &str) -> Result<()> {
    match ann.value.as_deref() {
        Some(v) if v.parse::<u32>().is_ok() => Ok(()),
        Some(v) => Err(LexError::Parse(format!(
            "@id on {} must be an unsigned integer, got {}",
            owner, v
        ))),
        None => Err(LexError::Parse(format!("@id on {} requires a value", owner))),
    }
}
