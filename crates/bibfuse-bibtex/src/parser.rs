//! BibTeX parser implementation using nom
//!
//! Handles standard BibTeX format including:
//! - @string definitions
//! - @preamble declarations
//! - @comment sections
//! - Braced and quoted field values
//! - String concatenation with #
//! - Nested braces in field values
//!
//! Field values are preserved verbatim (LaTeX escapes and diacritic macros
//! included); normalization for comparison happens downstream.

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::map,
    IResult,
};
use std::collections::HashMap;

use super::entry::BibEntry;

/// Parse error with source location context
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct BibParseError {
    pub line: u32,
    pub message: String,
}

/// Result of parsing a BibTeX file
#[derive(Debug, Clone, Default)]
pub struct BibParseResult {
    pub entries: Vec<BibEntry>,
    pub preambles: Vec<String>,
    pub strings: HashMap<String, String>,
    pub errors: Vec<BibParseError>,
}

/// Parse a BibTeX source string.
///
/// Malformed entries are recorded in `errors` with their line number and
/// skipped; parsing resumes at the next `@`. The caller decides whether
/// recorded errors abort the import (strict mode) or not (degraded mode).
pub fn parse(input: &str) -> BibParseResult {
    let mut result = BibParseResult::default();

    let mut remaining = input;
    let mut current_line = 1u32;

    while !remaining.is_empty() {
        let (rest, skipped) = skip_whitespace_and_comments(remaining);
        current_line += skipped.matches('\n').count() as u32;
        remaining = rest;

        if remaining.is_empty() {
            break;
        }

        if remaining.starts_with('@') {
            match parse_at_entry(remaining, &result.strings) {
                Ok((rest, at_entry)) => {
                    let consumed = &remaining[..remaining.len() - rest.len()];
                    current_line += consumed.matches('\n').count() as u32;
                    match at_entry {
                        AtEntry::Entry(entry) => result.entries.push(entry),
                        AtEntry::String(key, value) => {
                            result.strings.insert(key, value);
                        }
                        AtEntry::Preamble(text) => result.preambles.push(text),
                        AtEntry::Comment => {}
                    }
                    remaining = rest;
                }
                Err(_) => {
                    result.errors.push(BibParseError {
                        line: current_line,
                        message: "failed to parse entry".to_string(),
                    });
                    // Skip to next @ or end
                    if let Some(pos) = remaining[1..].find('@') {
                        let skipped = &remaining[..pos + 1];
                        current_line += skipped.matches('\n').count() as u32;
                        remaining = &remaining[pos + 1..];
                    } else {
                        break;
                    }
                }
            }
        } else if let Some(pos) = remaining.find('@') {
            let skipped = &remaining[..pos];
            current_line += skipped.matches('\n').count() as u32;
            remaining = &remaining[pos..];
        } else {
            break;
        }
    }

    result
}

/// Result of parsing a single @ item
enum AtEntry {
    Entry(BibEntry),
    String(String, String),
    Preamble(String),
    Comment,
}

/// Skip whitespace and % line comments, return remaining input and skipped text
fn skip_whitespace_and_comments(input: &str) -> (&str, &str) {
    let mut pos = 0;
    let bytes = input.as_bytes();

    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
        } else if bytes[pos] == b'%' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
        } else {
            break;
        }
    }

    (&input[pos..], &input[..pos])
}

fn parse_at_entry<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, AtEntry> {
    let (rest, _) = char('@')(input)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, entry_type) = take_while1(|c: char| c.is_ascii_alphanumeric())(rest)?;

    match entry_type.to_lowercase().as_str() {
        "string" => {
            let (rest, (key, value)) = parse_string_definition(rest, strings)?;
            Ok((rest, AtEntry::String(key, value)))
        }
        "preamble" => {
            let (rest, text) = parse_preamble(rest, strings)?;
            Ok((rest, AtEntry::Preamble(text)))
        }
        "comment" => {
            let (rest, _) = parse_comment_body(rest)?;
            Ok((rest, AtEntry::Comment))
        }
        _ => {
            let (rest, entry) = parse_entry_body(rest, entry_type, strings)?;
            Ok((rest, AtEntry::Entry(entry)))
        }
    }
}

fn parse_string_definition<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, _) = char('{')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, key) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, value) = parse_field_value(rest, strings)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('}')(rest)?;

    Ok((rest, (key.to_string(), value)))
}

fn parse_preamble<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, String> {
    let (rest, _) = multispace0(input)?;
    let (rest, _) = char('{')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, value) = parse_field_value(rest, strings)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('}')(rest)?;

    Ok((rest, value))
}

/// Parse a @comment body (braced block, or to end of line)
fn parse_comment_body(input: &str) -> IResult<&str, ()> {
    let (rest, _) = multispace0(input)?;
    if rest.starts_with('{') {
        let (rest, _) = parse_braced_content(rest)?;
        Ok((rest, ()))
    } else {
        let pos = rest.find('\n').unwrap_or(rest.len());
        Ok((&rest[pos..], ()))
    }
}

fn parse_entry_body<'a>(
    input: &'a str,
    entry_type: &str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, BibEntry> {
    let (rest, _) = multispace0(input)?;
    let (rest, _) = char('{')(rest)?;
    let (rest, _) = multispace0(rest)?;

    let (rest, cite_key) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || "_-:./".contains(c))(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char(',')(rest)?;

    let (rest, fields) = parse_fields(rest, strings)?;

    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('}')(rest)?;

    let mut entry = BibEntry::new(cite_key, entry_type);
    for (key, value) in fields {
        entry.add_field(key, value);
    }

    Ok((rest, entry))
}

fn parse_fields<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, Vec<(String, String)>> {
    let mut fields = Vec::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;

        if rest.starts_with('}') {
            return Ok((rest, fields));
        }

        match parse_single_field(rest, strings) {
            Ok((rest, (key, value))) => {
                fields.push((key, value));
                remaining = rest;

                // Skip optional comma
                let (rest, _) = multispace0(remaining)?;
                remaining = rest.strip_prefix(',').unwrap_or(rest);
            }
            Err(_) => {
                return Ok((remaining, fields));
            }
        }
    }
}

fn parse_single_field<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, (String, String)> {
    let (rest, _) = multispace0(input)?;
    let (rest, key) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, _) = char('=')(rest)?;
    let (rest, _) = multispace0(rest)?;
    let (rest, value) = parse_field_value(rest, strings)?;

    Ok((rest, (key.to_string(), value)))
}

/// Parse a field value (braced, quoted, number, or string reference),
/// honoring # concatenation
fn parse_field_value<'a>(
    input: &'a str,
    strings: &HashMap<String, String>,
) -> IResult<&'a str, String> {
    let mut result = String::new();
    let mut remaining = input;

    loop {
        let (rest, _) = multispace0(remaining)?;

        let (rest, part) = alt((
            parse_braced_value,
            parse_quoted_value,
            map(take_while1(|c: char| c.is_ascii_digit()), |s: &str| {
                s.to_string()
            }),
            map(
                take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
                |s: &str| strings.get(s).cloned().unwrap_or_else(|| s.to_string()),
            ),
        ))(rest)?;

        result.push_str(&part);
        remaining = rest;

        let (rest, _) = multispace0(remaining)?;
        if let Some(stripped) = rest.strip_prefix('#') {
            remaining = stripped;
        } else {
            return Ok((rest, result));
        }
    }
}

fn parse_braced_value(input: &str) -> IResult<&str, String> {
    let (rest, content) = parse_braced_content(input)?;
    let inner = &content[1..content.len() - 1];
    Ok((rest, inner.to_string()))
}

/// Parse braced content including nested braces
fn parse_braced_content(input: &str) -> IResult<&str, &str> {
    if !input.starts_with('{') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let mut depth = 0;
    let mut pos = 0;
    let bytes = input.as_bytes();

    while pos < bytes.len() {
        match bytes[pos] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&input[pos + 1..], &input[..pos + 1]));
                }
            }
            b'\\' => {
                pos += 1;
            }
            _ => {}
        }
        pos += 1;
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

fn parse_quoted_value(input: &str) -> IResult<&str, String> {
    if !input.starts_with('"') {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Char,
        )));
    }

    let mut result = String::new();
    let mut chars = input.char_indices().skip(1).peekable();
    let mut brace_depth = 0;

    while let Some((i, c)) = chars.next() {
        match c {
            '"' if brace_depth == 0 => {
                return Ok((&input[i + 1..], result));
            }
            '{' => {
                brace_depth += 1;
                result.push('{');
            }
            '}' => {
                brace_depth -= 1;
                result.push('}');
            }
            '\\' => {
                result.push('\\');
                if let Some((_, next)) = chars.next() {
                    result.push(next);
                }
            }
            c => result.push(c),
        }
    }

    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_entry() {
        let input = r#"
@book{g:Fourie:Mbalanhu,
    author = {David J. Fourie},
    title = {Mbalanhu},
    year = {1993},
    volume = {03},
}
"#;
        let result = parse(input);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.errors.len(), 0);

        let entry = &result.entries[0];
        assert_eq!(entry.cite_key, "g:Fourie:Mbalanhu");
        assert_eq!(entry.entry_type, "book");
        assert_eq!(entry.author(), Some("David J. Fourie"));
        assert_eq!(entry.title(), Some("Mbalanhu"));
        assert_eq!(entry.get_field("volume"), Some("03"));
    }

    #[test]
    fn test_parse_quoted_values() {
        let input = r#"
@article{Test,
    author = "Jane Doe",
    title = "Testing \"Quotes\"",
}
"#;
        let result = parse(input);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].author(), Some("Jane Doe"));
    }

    #[test]
    fn test_parse_nested_braces_preserved() {
        let input = r#"
@article{Test,
    title = {A Grammar of {Foo} with \'{e}scapes},
}
"#;
        let result = parse(input);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(
            result.entries[0].title(),
            Some("A Grammar of {Foo} with \\'{e}scapes")
        );
    }

    #[test]
    fn test_parse_string_definitions_and_concat() {
        let input = r#"
@string{lincom = "LINCOM"}
@book{Test,
    publisher = lincom,
    series = lincom # { Europa},
}
"#;
        let result = parse(input);
        assert_eq!(result.strings.get("lincom"), Some(&"LINCOM".to_string()));
        assert_eq!(result.entries[0].get_field("publisher"), Some("LINCOM"));
        assert_eq!(result.entries[0].get_field("series"), Some("LINCOM Europa"));
    }

    #[test]
    fn test_parse_recovers_after_malformed_entry() {
        let input = r#"
@book{broken
@book{ok,
    title = {Fine},
}
"#;
        let result = parse(input);
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].cite_key, "ok");
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].line, 2);
    }

    #[test]
    fn test_parse_numeric_and_acronym_values() {
        let input = r#"
@book{Test,
    year = 1993,
    volume = 03,
}
"#;
        let result = parse(input);
        assert_eq!(result.entries[0].year(), Some("1993"));
        assert_eq!(result.entries[0].get_field("volume"), Some("03"));
    }
}
