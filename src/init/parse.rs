// SPDX-License-Identifier: Apache-2.0

use tower::BoxError;

/// Parse a line delimiter, expanding `\n`, `\r`, `\t` and `\\` escapes so a
/// delimiter can be passed through a shell or environment variable.
pub(crate) fn parse_delimiter(s: &str) -> Result<String, BoxError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => return Err(format!("unknown escape `\\{other}` in delimiter").into()),
            None => return Err("delimiter ends with a lone `\\`".into()),
        }
    }

    if out.is_empty() {
        return Err("delimiter must not be empty".into());
    }
    Ok(out)
}
