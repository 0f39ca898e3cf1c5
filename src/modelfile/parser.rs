//! Line-oriented Modelfile parsing.
//!
//! The grammar is one directive per line: a keyword (case-insensitive on
//! input) followed by exactly one whitespace-delimited value. Comments start
//! with `#` at column 0; blank and whitespace-only lines are skipped. Line
//! numbers are 1-based and count every physical line, blanks and comments
//! included.

use crate::error::{Error, Result};
use crate::modelfile::command;

/// One parsed directive with its source line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Directive {
    pub keyword: &'static str,
    pub value: String,
    pub line: usize,
}

/// Parse Modelfile text into its directives. CRLF line endings are accepted.
pub(crate) fn parse_text(text: &str) -> Result<Vec<Directive>> {
    let mut directives = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let number = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('#') {
            continue;
        }

        let (keyword, value) = split_command(line, number)?;
        directives.push(Directive {
            keyword,
            value,
            line: number,
        });
    }

    Ok(directives)
}

/// Split a line into keyword and single argument, rejecting anything else.
fn split_command(line: &str, number: usize) -> Result<(&'static str, String)> {
    let parse_error = || Error::Parse {
        line: number,
        content: line.trim().to_string(),
    };

    let mut tokens = line.split_whitespace();
    let head = tokens.next().ok_or_else(parse_error)?;
    let keyword = command::lookup(&head.to_uppercase()).ok_or_else(parse_error)?;

    let value = tokens.next().ok_or_else(parse_error)?;
    if tokens.next().is_some() {
        return Err(parse_error());
    }

    Ok((keyword, value.to_string()))
}
