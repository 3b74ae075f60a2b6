//! SQL Statement Splitter
//!
//! Splits SQL text into individual statements on top-level semicolons.
//!
//! Semicolons inside any of the following do not end a statement:
//! - single-quoted string literals (`'a;b'`, with `''` escapes)
//! - escape strings (`E'a\';b'`, where a backslash escapes the next byte)
//! - double-quoted identifiers (`"odd;name"`, with `""` escapes)
//! - line comments (`-- ...`) and block comments (`/* ... */`)
//! - dollar-quoted bodies (`$$ ... $$`, `$tag$ ... $tag$`)
//!
//! Segments that hold only whitespace and comments are dropped, so a
//! trailing `-- done` after the last statement does not count as one.

/// Split SQL text into trimmed, non-empty statements in source order.
pub fn split_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_code = false;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'E' | b'e' if is_escape_string_start(bytes, i) => {
                i = skip_escape_string(bytes, i + 1);
                has_code = true;
            }
            b'\'' | b'"' => {
                i = skip_quoted(bytes, i);
                has_code = true;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i += 2;
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
                // Unterminated comment swallows the rest of the input.
                i = i.min(bytes.len());
            }
            b'$' => {
                match dollar_tag_len(bytes, i) {
                    Some(tag_len) => {
                        i = skip_dollar_quoted(bytes, i, tag_len);
                    }
                    None => i += 1,
                }
                has_code = true;
            }
            b';' => {
                if has_code {
                    push_trimmed(&mut statements, &sql[start..i]);
                }
                i += 1;
                start = i;
                has_code = false;
            }
            b if b.is_ascii_whitespace() => i += 1,
            _ => {
                has_code = true;
                i += 1;
            }
        }
    }

    if has_code && start < sql.len() {
        push_trimmed(&mut statements, &sql[start..]);
    }

    statements
}

// Non-ASCII whitespace counts as code above but is trimmed here.
fn push_trimmed<'a>(statements: &mut Vec<&'a str>, segment: &'a str) {
    let trimmed = segment.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed);
    }
}

/// Skip a quoted run starting at `open`, honoring doubled-quote escapes.
/// Returns the index just past the closing quote (or end of input).
fn skip_quoted(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// `E'` opens an escape string unless the `E` ends a longer identifier.
fn is_escape_string_start(bytes: &[u8], i: usize) -> bool {
    if bytes.get(i + 1) != Some(&b'\'') {
        return false;
    }
    match i.checked_sub(1).map(|p| bytes[p]) {
        Some(prev) => !(prev.is_ascii_alphanumeric() || prev == b'_' || prev >= 0x80),
        None => true,
    }
}

/// Skip an escape string whose opening quote is at `open`. Both `\x` and
/// `''` escape; returns the index just past the closing quote.
fn skip_escape_string(bytes: &[u8], open: usize) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\'' if bytes.get(i + 1) == Some(&b'\'') => i += 2,
            b'\'' => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// If a dollar-quote opener (`$$` or `$tag$`) starts at `i`, return its
/// length including both dollar signs. `$1` style parameters are not openers.
fn dollar_tag_len(bytes: &[u8], i: usize) -> Option<usize> {
    let mut j = i + 1;
    if let Some(&first) = bytes.get(j) {
        if first.is_ascii_digit() {
            return None;
        }
    }
    while let Some(&b) = bytes.get(j) {
        if b == b'$' {
            return Some(j - i + 1);
        }
        if !(b.is_ascii_alphanumeric() || b == b'_') {
            return None;
        }
        j += 1;
    }
    None
}

/// Skip past the matching closing delimiter of a dollar-quoted body.
fn skip_dollar_quoted(bytes: &[u8], open: usize, tag_len: usize) -> usize {
    let tag = &bytes[open..open + tag_len];
    let mut i = open + tag_len;
    while i + tag_len <= bytes.len() {
        if &bytes[i..i + tag_len] == tag {
            return i + tag_len;
        }
        i += 1;
    }
    bytes.len()
}
