//! Bracket-depth scanner
//!
//! Signature text is never parsed with a grammar. Every structural question
//! (where does this generic list end, where may a parameter list be split)
//! is answered by counting `()`, `<>` and `[]` depth with a single counter.

/// Byte offset of the bracket closing the one at `open`.
///
/// All three bracket kinds share one depth counter. The `>` of an `->`
/// arrow is not a closing bracket.
pub fn matching_close(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if !matches!(bytes.get(open), Some(b'(' | b'<' | b'[')) {
        return None;
    }

    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' | b'<' | b'[' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'-' => {}
            b')' | b'>' | b']' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `text` on `sep`, only where the bracket depth is zero.
///
/// Pieces are trimmed; empty pieces (such as the one after a trailing
/// comma) are dropped.
pub fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0isize;
    let mut start = 0;
    let mut prev = '\0';

    for (i, c) in text.char_indices() {
        match c {
            '(' | '<' | '[' => depth += 1,
            '>' if prev == '-' => {}
            ')' | '>' | ']' => depth -= 1,
            _ if c == sep && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
        prev = c;
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Offset of the first `name: type` colon at depth zero.
///
/// Path separators (`::`) are skipped.
pub fn find_type_colon(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0isize;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' | b'<' | b'[' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'-' => {}
            b')' | b'>' | b']' => depth -= 1,
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
                continue;
            }
            b':' if depth == 0 => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// End offset of the comment or literal starting at byte `i`, or `None`
/// when `i` starts ordinary code.
///
/// Covers line and nested block comments, string and raw string literals,
/// and character literals. A lifetime or label (`'a`) is code.
pub fn skip_literal_or_comment(text: &str, i: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let at = |k: usize| bytes.get(k).copied();

    match at(i)? {
        b'/' if at(i + 1) == Some(b'/') => Some(
            bytes[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(bytes.len(), |n| i + n),
        ),
        b'/' if at(i + 1) == Some(b'*') => {
            let mut depth = 0usize;
            let mut k = i;
            while k < bytes.len() {
                match (bytes[k], at(k + 1)) {
                    (b'/', Some(b'*')) => {
                        depth += 1;
                        k += 2;
                    }
                    (b'*', Some(b'/')) => {
                        depth -= 1;
                        k += 2;
                        if depth == 0 {
                            return Some(k);
                        }
                    }
                    _ => k += 1,
                }
            }
            Some(bytes.len())
        }
        b'"' => {
            let mut k = i + 1;
            while k < bytes.len() {
                match bytes[k] {
                    b'\\' => k += 2,
                    b'"' => return Some(k + 1),
                    _ => k += 1,
                }
            }
            Some(bytes.len())
        }
        b'r' | b'b' if i == 0 || !is_ident_byte(bytes[i - 1]) => {
            let start = if bytes[i] == b'b' && at(i + 1) == Some(b'r') { i + 2 } else { i + 1 };
            if bytes[i] == b'b' && start == i + 1 {
                return None;
            }
            let hashes = bytes[start..].iter().take_while(|&&b| b == b'#').count();
            if at(start + hashes) != Some(b'"') {
                return None;
            }
            let body = start + hashes + 1;
            let mut close = Vec::with_capacity(hashes + 1);
            close.push(b'"');
            close.extend(std::iter::repeat(b'#').take(hashes));
            Some(
                bytes[body..]
                    .windows(close.len())
                    .position(|w| w == close.as_slice())
                    .map_or(bytes.len(), |n| body + n + close.len()),
            )
        }
        b'\'' => {
            if at(i + 1) == Some(b'\\') {
                let from = i + 3;
                return bytes
                    .get(from..)?
                    .iter()
                    .position(|&b| b == b'\'')
                    .map(|n| from + n + 1);
            }
            let width = match at(i + 1)? {
                b if b >= 0xF0 => 4,
                b if b >= 0xE0 => 3,
                b if b >= 0xC0 => 2,
                _ => 1,
            };
            (at(i + 1 + width) == Some(b'\'')).then_some(i + 2 + width)
        }
        _ => None,
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Remove `//` and `/* */` comments, keeping line structure.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    loop {
        let line = rest.find("//");
        let block = rest.find("/*");
        match (line, block) {
            (Some(l), b) if b.map_or(true, |b| l < b) => {
                out.push_str(&rest[..l]);
                match rest[l..].find('\n') {
                    Some(nl) => rest = &rest[l + nl..],
                    None => return out,
                }
            }
            (_, Some(b)) => {
                out.push_str(&rest[..b]);
                match rest[b + 2..].find("*/") {
                    Some(end) => {
                        out.push(' ');
                        rest = &rest[b + 2 + end + 2..];
                    }
                    None => return out,
                }
            }
            _ => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

/// Collapse runs of whitespace to a single space.
pub fn normalize_type(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
