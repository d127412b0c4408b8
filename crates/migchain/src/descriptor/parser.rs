use pest::Parser;
use pest::error::InputLocation;
use pest::iterators::Pair;
use pest_derive::Parser;

use crate::error::{ParseDiagnostic, ParseFailure, SourceSpan};

use super::ast::*;

#[derive(Parser)]
#[grammar = "descriptor/descriptor.pest"]
struct DescriptorParser;

type ParseResult<T> = std::result::Result<T, ParseDiagnostic>;

/// Extract the revision fields of one descriptor. Never fails on content it
/// does not understand; semantic checks happen in [`super::build_node`].
pub fn parse_descriptor(input: &str) -> ParseResult<DescriptorFile> {
    let pairs =
        DescriptorParser::parse(Rule::descriptor, input).map_err(pest_error_to_diagnostic)?;

    let mut file = DescriptorFile::default();
    for pair in pairs {
        if pair.as_rule() != Rule::descriptor {
            continue;
        }
        for item in pair.into_inner() {
            let span = span_of(&item);
            match item.as_rule() {
                Rule::revision_assign => {
                    let assignment = parse_assignment(item)?;
                    set_once(&mut file.revision, assignment, "revision", span)?;
                }
                Rule::parent_assign => {
                    let assignment = parse_assignment(item)?;
                    set_once(&mut file.down_revision, assignment, "down_revision", span)?;
                }
                Rule::revision_id_header => {
                    first_wins(&mut file.revision_id_header, parse_header(item));
                }
                Rule::revises_header => {
                    first_wins(&mut file.revises_header, parse_header(item));
                }
                Rule::create_date_header => {
                    first_wins(&mut file.create_date_header, parse_header(item));
                }
                _ => {}
            }
        }
    }
    Ok(file)
}

fn pest_error_to_diagnostic(err: pest::error::Error<Rule>) -> ParseDiagnostic {
    let span = match err.location {
        InputLocation::Pos(pos) => SourceSpan::new(pos, pos),
        InputLocation::Span((start, end)) => SourceSpan::new(start, end),
    };
    ParseDiagnostic::new(ParseFailure::Syntax(err.variant.message().into_owned()), Some(span))
}

fn span_of(pair: &Pair<Rule>) -> SourceSpan {
    let span = pair.as_span();
    SourceSpan::new(span.start(), span.end())
}

fn set_once<T>(
    slot: &mut Option<T>,
    value: T,
    field: &'static str,
    span: SourceSpan,
) -> ParseResult<()> {
    if slot.is_some() {
        return Err(ParseDiagnostic::new(
            ParseFailure::RepeatedField(field),
            Some(span),
        ));
    }
    *slot = Some(value);
    Ok(())
}

fn first_wins<T>(slot: &mut Option<T>, value: T) {
    if slot.is_none() {
        *slot = Some(value);
    }
}

fn parse_assignment(pair: Pair<Rule>) -> ParseResult<Assignment> {
    let end = pair.as_span().end();
    let Some(value) = pair.into_inner().next() else {
        return Ok(Assignment {
            value: AssignedValue::Raw(String::new()),
            value_span: SourceSpan::new(end, end),
        });
    };

    let value_span = span_of(&value);
    match value.as_rule() {
        Rule::none_lit => Ok(Assignment {
            value: AssignedValue::None,
            value_span,
        }),
        Rule::string_lit => Ok(Assignment {
            value: AssignedValue::Str(parse_string_lit(value)),
            value_span,
        }),
        Rule::tuple_lit => {
            let items = value
                .into_inner()
                .filter(|p| p.as_rule() == Rule::string_lit)
                .map(parse_string_lit)
                .collect();
            Ok(Assignment {
                value: AssignedValue::Tuple(items),
                value_span,
            })
        }
        Rule::raw_value => {
            let text = value.as_str().trim_end();
            Ok(Assignment {
                value: AssignedValue::Raw(text.to_string()),
                value_span: SourceSpan::new(value_span.start, value_span.start + text.len()),
            })
        }
        other => Err(ParseDiagnostic::new(
            ParseFailure::Syntax(format!("unexpected rule: {:?}", other)),
            Some(value_span),
        )),
    }
}

fn parse_string_lit(pair: Pair<Rule>) -> StringLit {
    let quote = pair.as_str().chars().next().unwrap_or('"');
    let value = pair
        .into_inner()
        .next()
        .map(|body| body.as_str().to_string())
        .unwrap_or_default();
    StringLit { value, quote }
}

fn parse_header(pair: Pair<Rule>) -> HeaderField {
    let end = pair.as_span().end();
    match pair.into_inner().next() {
        Some(value) => {
            let start = value.as_span().start();
            let text = value.as_str().trim_end();
            HeaderField {
                value: text.to_string(),
                span: SourceSpan::new(start, start + text.len()),
            }
        }
        None => HeaderField {
            value: String::new(),
            span: SourceSpan::new(end, end),
        },
    }
}
