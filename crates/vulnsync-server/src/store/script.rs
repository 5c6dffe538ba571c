//! Command script line format
//!
//! One command per line: `<COMMAND> <arg> <arg> ...`. Arguments are separated by
//! whitespace; an argument wrapped in single quotes may contain whitespace, and inside
//! quotes `\'` and `\\` stand for a literal quote and backslash.

use super::{StoreError, StoreResult};

/// Lines starting with this marker are comments.
pub const COMMENT_MARKER: &str = "--";

/// Wrap a value in single quotes, escaping quotes and backslashes.
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    quoted
}

/// Render a comment line. Newlines in the message are flattened so the comment stays
/// on one line.
pub fn comment(message: impl std::fmt::Display) -> String {
    let message = message.to_string().replace(['\r', '\n'], " ");
    format!("{} {}", COMMENT_MARKER, message)
}

/// Whether a line carries no command (blank or comment).
pub fn is_ignorable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with(COMMENT_MARKER)
}

/// Split a script line into its command and arguments.
pub fn tokenize(line: &str) -> StoreResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => {
                                return Err(StoreError::Syntax(
                                    "dangling escape at end of line".to_string(),
                                ))
                            }
                        },
                        Some('\'') => break,
                        Some(other) => current.push(other),
                        None => {
                            return Err(StoreError::Syntax(format!(
                                "unterminated quoted argument in: {}",
                                line
                            )))
                        }
                    }
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                current.push(c);
            }
        }
    }

    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
