//! Marker-driven item extraction

use log::debug;
use serde::Serialize;

use super::scanner::{
    find_type_colon, matching_close, normalize_type, skip_literal_or_comment, split_top_level,
    strip_comments,
};
use super::{FunctionSignature, Param, StructSignature};

/// Attribute names treated as export markers when none are configured
pub const DEFAULT_MARKERS: &[&str] = &["export", "no_mangle"];

/// Everything exported from one source text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedItems {
    pub functions: Vec<FunctionSignature>,
    pub structs: Vec<StructSignature>,
}

impl ExtractedItems {
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.structs.is_empty()
    }

    /// Names of every exported function, in source order
    pub fn function_names(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.name.clone()).collect()
    }
}

/// Finds marker-annotated functions and structs in source text
#[derive(Debug, Clone)]
pub struct SignatureExtractor {
    markers: Vec<String>,
}

enum Item {
    Function(FunctionSignature, Option<Receiver>),
    Struct(StructSignature),
}

/// How a method takes `self`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Receiver {
    Shared,
    Exclusive,
    /// `self`, `mut self` or a typed `self: T`
    Owned,
}

/// Brace block the scan is inside
enum Block {
    /// `impl` body; the owner type when its methods can be exported
    Impl(Option<String>),
    Other,
}

impl SignatureExtractor {
    /// Extractor recognising [`DEFAULT_MARKERS`]
    pub fn new() -> Self {
        Self::with_markers(DEFAULT_MARKERS.iter().copied())
    }

    /// Extractor recognising the given attribute names
    ///
    /// A marker matches the attribute name itself or the last segment of a
    /// path (`my_crate::export` matches `export`).
    pub fn with_markers<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Function signatures in source order
    pub fn extract(&self, source: &str) -> Vec<FunctionSignature> {
        self.extract_items(source).functions
    }

    /// Struct signatures in source order
    pub fn extract_structs(&self, source: &str) -> Vec<StructSignature> {
        self.extract_items(source).structs
    }

    /// Functions and structs in one pass
    ///
    /// Markers count on top-level items and on methods directly inside a
    /// non-generic `impl` block; a method is reported as `Type_method`.
    /// Markers inside comments, literals and other nested blocks are ignored.
    pub fn extract_items(&self, source: &str) -> ExtractedItems {
        let mut items = ExtractedItems::default();
        let bytes = source.as_bytes();
        let mut blocks: Vec<Block> = Vec::new();
        let mut item_start = true;
        let mut pos = 0;

        while pos < bytes.len() {
            if let Some(end) = skip_literal_or_comment(source, pos) {
                pos = end;
                continue;
            }
            match bytes[pos] {
                b'#' if bytes.get(pos + 1) == Some(&b'[') => {
                    let open = pos + 1;
                    let Some(close) = matching_close(source, open) else {
                        debug!("unterminated attribute at byte {}, stopping extraction", pos);
                        break;
                    };
                    let attr = &source[open + 1..close];
                    pos = close + 1;
                    item_start = true;

                    if !self.is_marker(attr) {
                        continue;
                    }
                    let owner = match blocks.last() {
                        None => None,
                        Some(Block::Impl(Some(owner))) if blocks.len() == 1 => Some(owner.as_str()),
                        Some(_) => {
                            debug!("ignoring nested #[{}] at byte {}", attr.trim(), open - 1);
                            continue;
                        }
                    };

                    match parse_item(&source[pos..]) {
                        Some((item, consumed)) => {
                            // a second marker on the same item lies inside `consumed`
                            pos += consumed;
                            match (item, owner) {
                                (Item::Function(sig, _), None) => items.functions.push(sig),
                                (Item::Struct(sig), None) => items.structs.push(sig),
                                (Item::Function(sig, receiver), Some(owner)) => {
                                    let name = sig.name.clone();
                                    match method_signature(owner, sig, receiver) {
                                        Some(sig) => items.functions.push(sig),
                                        None => debug!("{}::{} has no C ABI form", owner, name),
                                    }
                                }
                                (Item::Struct(sig), Some(owner)) => {
                                    debug!("ignoring struct {} inside impl {}", sig.name, owner)
                                }
                            }
                        }
                        None => debug!(
                            "skipping unreadable item after #[{}] at byte {}",
                            attr.trim(),
                            open - 1
                        ),
                    }
                }
                b'{' => {
                    blocks.push(Block::Other);
                    item_start = true;
                    pos += 1;
                }
                b'}' => {
                    blocks.pop();
                    item_start = true;
                    pos += 1;
                }
                b';' | b']' => {
                    item_start = true;
                    pos += 1;
                }
                b if b.is_ascii_alphabetic() || b == b'_' => {
                    let len = source[pos..]
                        .find(|c: char| !is_ident_char(c))
                        .unwrap_or(source.len() - pos);
                    let word = &source[pos..pos + len];
                    pos += len;

                    if word == "impl" && item_start {
                        if let Some((owner, body)) = parse_impl_header(source, pos) {
                            let owner = if blocks.is_empty() { owner } else { None };
                            blocks.push(Block::Impl(owner));
                            pos = body + 1;
                            continue;
                        }
                    }
                    item_start = item_start && matches!(word, "unsafe" | "default");
                }
                b => {
                    if !b.is_ascii_whitespace() {
                        item_start = false;
                    }
                    pos += 1;
                }
            }
        }

        items
    }

    fn is_marker(&self, attr: &str) -> bool {
        let mut attr = attr.trim();
        if let Some(inner) = attr.strip_prefix("unsafe(").and_then(|a| a.strip_suffix(')')) {
            attr = inner.trim();
        }
        let name = attr
            .split(|c: char| c == '(' || c == '=')
            .next()
            .unwrap_or_default()
            .trim();
        let last = name.rsplit("::").next().unwrap_or(name);
        self.markers.iter().any(|m| m == name || m == last)
    }
}

impl Default for SignatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Item parsing
// =============================================================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    /// Skip whitespace, comments and attributes
    fn skip_trivia(&mut self) -> Option<()> {
        loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.starts_with("//") {
                self.pos += rest.find('\n').unwrap_or(rest.len());
            } else if rest.starts_with("/*") {
                self.pos += rest.find("*/")? + 2;
            } else if rest.starts_with("#[") {
                let close = matching_close(self.text, self.pos + 1)?;
                self.pos = close + 1;
            } else {
                return Some(());
            }
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        let rest = self.rest();
        if rest.starts_with(kw) && !rest[kw.len()..].starts_with(is_ident_char) {
            self.pos += kw.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        if rest.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        let len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    /// Inner text of the bracket group starting at the cursor
    fn bracketed(&mut self) -> Option<&'a str> {
        let close = matching_close(self.text, self.pos)?;
        let inner = &self.text[self.pos + 1..close];
        self.pos = close + 1;
        Some(inner)
    }
}

/// Parse the item following a marker; returns the item and the bytes consumed
/// up to its body (or terminating semicolon).
fn parse_item(text: &str) -> Option<(Item, usize)> {
    let mut cur = Cursor::new(text);
    cur.skip_trivia()?;

    loop {
        cur.skip_ws();
        if cur.eat_keyword("pub") {
            cur.skip_ws();
            if cur.peek() == Some('(') {
                cur.bracketed()?;
            }
            continue;
        }
        if cur.eat_keyword("unsafe")
            || cur.eat_keyword("const")
            || cur.eat_keyword("async")
            || cur.eat_keyword("default")
        {
            continue;
        }
        if cur.eat_keyword("extern") {
            cur.skip_ws();
            if cur.peek() == Some('"') {
                cur.pos += cur.rest()[1..].find('"')? + 2;
            }
            continue;
        }
        break;
    }

    if cur.eat_keyword("fn") {
        let (sig, receiver) = parse_fn(&mut cur)?;
        Some((Item::Function(sig, receiver), cur.pos))
    } else if cur.eat_keyword("struct") {
        let sig = parse_struct(&mut cur)?;
        Some((Item::Struct(sig), cur.pos))
    } else {
        None
    }
}

fn parse_fn(cur: &mut Cursor<'_>) -> Option<(FunctionSignature, Option<Receiver>)> {
    cur.skip_ws();
    let name = cur.ident()?.to_string();

    cur.skip_ws();
    let generic_params = if cur.peek() == Some('<') {
        parse_generics(cur.bracketed()?)
    } else {
        Vec::new()
    };

    cur.skip_ws();
    if cur.peek() != Some('(') {
        return None;
    }
    let (params, receiver) = parse_params(cur.bracketed()?)?;

    cur.skip_ws();
    let return_type = if cur.rest().starts_with("->") {
        cur.pos += 2;
        let end = scan_depth_zero(cur.rest(), true)?;
        let ty = normalize_type(&cur.rest()[..end]);
        if ty.is_empty() {
            return None;
        }
        cur.pos += end;
        ty
    } else {
        "()".to_string()
    };

    cur.pos += scan_depth_zero(cur.rest(), false)?;

    let sig = FunctionSignature {
        name,
        params,
        return_type,
        is_generic: !generic_params.is_empty(),
        generic_params,
    };
    Some((sig, receiver))
}

fn parse_struct(cur: &mut Cursor<'_>) -> Option<StructSignature> {
    cur.skip_ws();
    let name = cur.ident()?.to_string();

    cur.skip_ws();
    let generic_params = if cur.peek() == Some('<') {
        parse_generics(cur.bracketed()?)
    } else {
        Vec::new()
    };

    cur.skip_ws();
    let fields = match cur.peek()? {
        '(' => {
            let inner = strip_comments(cur.bracketed()?);
            split_top_level(&inner, ',')
                .into_iter()
                .enumerate()
                .map(|(i, f)| Param::new(i.to_string(), normalize_type(strip_visibility(f))))
                .collect()
        }
        ';' => Vec::new(),
        _ => {
            // skip a where clause up to the field block
            cur.pos += scan_depth_zero(cur.rest(), false)?;
            if cur.peek() != Some('{') {
                return Some(StructSignature {
                    name,
                    fields: Vec::new(),
                    generic_params,
                });
            }
            let close = find_brace_close(cur.text, cur.pos)?;
            let inner = strip_comments(&cur.text[cur.pos + 1..close]);
            cur.pos = close + 1;
            parse_fields(&inner)?
        }
    };

    Some(StructSignature {
        name,
        fields,
        generic_params,
    })
}

fn parse_generics(text: &str) -> Vec<String> {
    split_top_level(text, ',')
        .into_iter()
        .filter(|g| !g.starts_with('\''))
        .map(|g| {
            let g = g.strip_prefix("const ").unwrap_or(g).trim_start();
            let end = g.find([':', '=']).unwrap_or(g.len());
            g[..end].trim().to_string()
        })
        .filter(|g| !g.is_empty())
        .collect()
}

fn parse_params(text: &str) -> Option<(Vec<Param>, Option<Receiver>)> {
    let text = strip_comments(text);
    let mut params = Vec::new();
    let mut receiver = None;

    for piece in split_top_level(&text, ',') {
        if let Some(kind) = receiver_kind(piece) {
            receiver = Some(kind);
            continue;
        }
        let colon = find_type_colon(piece)?;
        let pattern = piece[..colon].trim();
        let name = pattern.strip_prefix("mut ").unwrap_or(pattern).trim();
        let ty = normalize_type(&piece[colon + 1..]);
        if name.is_empty() || ty.is_empty() {
            return None;
        }
        params.push(Param::new(name, ty));
    }

    Some((params, receiver))
}

fn parse_fields(text: &str) -> Option<Vec<Param>> {
    let mut fields = Vec::new();
    for piece in split_top_level(text, ',') {
        let mut piece = piece;
        // field attributes such as #[serde(..)]
        while piece.starts_with("#[") {
            let close = matching_close(piece, 1)?;
            piece = piece[close + 1..].trim_start();
        }
        let piece = strip_visibility(piece);
        let colon = find_type_colon(piece)?;
        fields.push(Param::new(
            piece[..colon].trim(),
            normalize_type(&piece[colon + 1..]),
        ));
    }
    Some(fields)
}

fn receiver_kind(param: &str) -> Option<Receiver> {
    let p = param.trim();
    let (by_ref, p) = match p.strip_prefix('&') {
        Some(rest) => {
            let rest = rest.trim_start();
            let rest = if rest.starts_with('\'') {
                rest.find(char::is_whitespace).map_or(rest, |i| rest[i..].trim_start())
            } else {
                rest
            };
            (true, rest)
        }
        None => (false, p),
    };
    let (mutable, p) = match p.strip_prefix("mut ") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, p),
    };

    if p == "self" {
        return Some(match (by_ref, mutable) {
            (true, true) => Receiver::Exclusive,
            (true, false) => Receiver::Shared,
            (false, _) => Receiver::Owned,
        });
    }
    let typed = p
        .strip_prefix("self")
        .map_or(false, |rest| rest.trim_start().starts_with(':') && !rest.trim_start().starts_with("::"));
    (!by_ref && typed).then_some(Receiver::Owned)
}

/// Signature of the `Owner_method` wrapper lowering emits for a method
///
/// A reference receiver becomes a leading `this` pointer and a `Self`
/// return becomes an owning `*mut Owner`. Methods taking `self` by value or
/// naming `Self` anywhere else have no wrapper.
fn method_signature(
    owner: &str,
    sig: FunctionSignature,
    receiver: Option<Receiver>,
) -> Option<FunctionSignature> {
    let FunctionSignature {
        name,
        mut params,
        return_type,
        is_generic,
        generic_params,
    } = sig;

    if params.iter().any(|p| mentions_self(&p.ty)) {
        return None;
    }
    match receiver {
        Some(Receiver::Owned) => return None,
        Some(Receiver::Shared) => params.insert(0, Param::new("this", format!("*const {}", owner))),
        Some(Receiver::Exclusive) => params.insert(0, Param::new("this", format!("*mut {}", owner))),
        None => {}
    }

    let return_type = if return_type == "Self" || return_type == owner {
        format!("*mut {}", owner)
    } else if mentions_self(&return_type) {
        return None;
    } else {
        return_type
    };

    let short = owner.rsplit("::").next().unwrap_or(owner);
    Some(FunctionSignature {
        name: format!("{}_{}", short, name),
        params,
        return_type,
        is_generic,
        generic_params,
    })
}

fn mentions_self(ty: &str) -> bool {
    ty.split(|c: char| !is_ident_char(c)).any(|word| word == "Self")
}

/// Owner type and body offset of the `impl` whose header starts at `from`
///
/// The owner is `None` for generic impls and for self types that are not
/// a plain path.
fn parse_impl_header(source: &str, from: usize) -> Option<(Option<String>, usize)> {
    let rest = &source[from..];
    let brace = scan_depth_zero(rest, false)?;
    if rest.as_bytes()[brace] != b'{' {
        return None;
    }
    if rest.trim_start().starts_with('<') {
        return Some((None, from + brace));
    }

    let mut header = &rest[..brace];
    if let Some(at) = find_word(header, "where") {
        header = &header[..at];
    }
    let self_ty = match find_word(header, "for") {
        Some(at) => &header[at + 3..],
        None => header,
    };
    let self_ty = normalize_type(&strip_comments(self_ty));
    let plain = !self_ty.is_empty()
        && self_ty.split("::").all(|segment| {
            !segment.is_empty()
                && !segment.starts_with(|c: char| c.is_ascii_digit())
                && segment.chars().all(is_ident_char)
        });
    Some((plain.then_some(self_ty), from + brace))
}

fn find_word(text: &str, word: &str) -> Option<usize> {
    text.match_indices(word).map(|(i, _)| i).find(|&i| {
        let before = text[..i].chars().next_back().map_or(true, |c| !is_ident_char(c));
        let after = !text[i + word.len()..].starts_with(is_ident_char);
        before && after
    })
}

fn strip_visibility(text: &str) -> &str {
    let text = text.trim();
    match text.strip_prefix("pub") {
        Some(rest) if rest.starts_with('(') => match matching_close(rest, 0) {
            Some(close) => rest[close + 1..].trim_start(),
            None => text,
        },
        Some(rest) if rest.starts_with(char::is_whitespace) => rest.trim_start(),
        _ => text,
    }
}

/// Offset of the first `{` or `;` at bracket depth zero, or of a `where`
/// keyword when `stop_at_where` is set.
fn scan_depth_zero(text: &str, stop_at_where: bool) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0isize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'<' | b'[' => depth += 1,
            b'>' if i > 0 && bytes[i - 1] == b'-' => {}
            b')' | b'>' | b']' => depth -= 1,
            b'{' | b';' if depth == 0 => return Some(i),
            b'w' if depth == 0 && stop_at_where && is_where_at(text, i) => return Some(i),
            _ => {}
        }
    }
    None
}

fn is_where_at(text: &str, i: usize) -> bool {
    let before_ok = text[..i].chars().next_back().map_or(true, |c| !is_ident_char(c));
    let rest = &text[i..];
    before_ok && rest.starts_with("where") && !rest[5..].starts_with(is_ident_char)
}

fn find_brace_close(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in text.bytes().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
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
