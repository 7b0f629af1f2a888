//! Control-tag recognition.
//!
//! Each tag is a lowercase keyword plus required punctuation. When the
//! punctuation that would commit the keyword is absent the caller keeps the
//! text as-is; once committed, a missing closing delimiter is a parse error.

use super::{find_close, parse_into, split_quoted, unquote};
use crate::ast::{DynamicSql, SqlNode};
use crate::error::{DynSqlError, DynSqlResult};

/// Try to read a control tag at the start of `rest`. Returns the node and
/// the number of bytes consumed, or `None` when `rest` is plain text.
pub(crate) fn try_tag(rest: &str, abs: usize) -> DynSqlResult<Option<(SqlNode, usize)>> {
    if let Some(n) = keyword_at(rest, "if") {
        return tag_if(rest, n, abs);
    }
    if let Some(n) = keyword_at(rest, "choose") {
        return tag_choose(rest, n, abs);
    }
    if let Some(n) = keyword_at(rest, "foreach") {
        return tag_foreach(rest, n, abs);
    }
    if let Some(n) = keyword_at(rest, "where") {
        return tag_block(rest, n, abs, false);
    }
    if let Some(n) = keyword_at(rest, "set") {
        return tag_block(rest, n, abs, true);
    }
    if let Some(n) = keyword_at(rest, "bind") {
        return tag_bind(rest, n, abs);
    }
    if let Some(n) = keyword_at(rest, "include") {
        return tag_ref(rest, n, abs, false);
    }
    if let Some(n) = keyword_at(rest, "macro") {
        return tag_ref(rest, n, abs, true);
    }
    Ok(None)
}

/// Length of `keyword` when `s` starts with it at a word boundary.
fn keyword_at(s: &str, keyword: &str) -> Option<usize> {
    if !s.starts_with(keyword) {
        return None;
    }
    match s[keyword.len()..].chars().next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' => None,
        _ => Some(keyword.len()),
    }
}

fn skip_ws(s: &str, from: usize) -> usize {
    s[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(s.len(), |(idx, _)| from + idx)
}

fn parse_body(src: &str, base: usize) -> DynSqlResult<DynamicSql> {
    let mut body = DynamicSql::new();
    parse_into(src, base, &mut body)?;
    Ok(body)
}

/// `if (test) {body}`. Without the brace the keyword stays text, so SQL
/// functions spelled `if(...)` are unaffected.
fn tag_if(rest: &str, after: usize, abs: usize) -> DynSqlResult<Option<(SqlNode, usize)>> {
    let p = skip_ws(rest, after);
    if !rest[p..].starts_with('(') {
        return Ok(None);
    }
    let Some(pc) = find_close(rest, p, '(', ')') else {
        return Ok(None);
    };
    let b = skip_ws(rest, pc + 1);
    if !rest[b..].starts_with('{') {
        return Ok(None);
    }
    let bc = find_close(rest, b, '{', '}')
        .ok_or_else(|| DynSqlError::parse(abs + b, "unterminated if body"))?;
    let test = rest[p + 1..pc].trim().to_string();
    let body = parse_body(&rest[b + 1..bc], abs + b + 1)?;
    Ok(Some((SqlNode::If { test, body }, bc + 1)))
}

/// `where {body}` / `set {body}`.
fn tag_block(rest: &str, after: usize, abs: usize, is_set: bool) -> DynSqlResult<Option<(SqlNode, usize)>> {
    let b = skip_ws(rest, after);
    if !rest[b..].starts_with('{') {
        return Ok(None);
    }
    let bc = find_close(rest, b, '{', '}')
        .ok_or_else(|| DynSqlError::parse(abs + b, "unterminated tag body"))?;
    let body = parse_body(&rest[b + 1..bc], abs + b + 1)?;
    let node = if is_set { SqlNode::Set(body) } else { SqlNode::Where(body) };
    Ok(Some((node, bc + 1)))
}

/// `bind (name, expr)`.
fn tag_bind(rest: &str, after: usize, abs: usize) -> DynSqlResult<Option<(SqlNode, usize)>> {
    let p = skip_ws(rest, after);
    if !rest[p..].starts_with('(') {
        return Ok(None);
    }
    let pc = find_close(rest, p, '(', ')')
        .ok_or_else(|| DynSqlError::parse(abs + p, "unterminated bind tag"))?;
    let inner = &rest[p + 1..pc];
    let (name, expr) = inner
        .split_once(',')
        .ok_or_else(|| DynSqlError::parse(abs + p, "bind tag requires (name, expr)"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(DynSqlError::parse(abs + p, "bind tag has an empty name"));
    }
    let node = SqlNode::Bind {
        name: name.to_string(),
        expr: expr.trim().to_string(),
    };
    Ok(Some((node, pc + 1)))
}

/// `include (name)` / `macro (name)`.
fn tag_ref(rest: &str, after: usize, abs: usize, is_macro: bool) -> DynSqlResult<Option<(SqlNode, usize)>> {
    let p = skip_ws(rest, after);
    if !rest[p..].starts_with('(') {
        return Ok(None);
    }
    let pc = find_close(rest, p, '(', ')')
        .ok_or_else(|| DynSqlError::parse(abs + p, "unterminated reference tag"))?;
    let name = rest[p + 1..pc].trim();
    if name.is_empty() {
        return Err(DynSqlError::parse(abs + p, "reference tag has an empty name"));
    }
    let ref_name = name.to_string();
    let node = if is_macro {
        SqlNode::Macro { ref_name }
    } else {
        SqlNode::Include { ref_name }
    };
    Ok(Some((node, pc + 1)))
}

/// `foreach (collection, item, open, close, separator) {body}`.
fn tag_foreach(rest: &str, after: usize, abs: usize) -> DynSqlResult<Option<(SqlNode, usize)>> {
    let p = skip_ws(rest, after);
    if !rest[p..].starts_with('(') {
        return Ok(None);
    }
    let pc = find_close(rest, p, '(', ')')
        .ok_or_else(|| DynSqlError::parse(abs + p, "unterminated foreach tag"))?;
    let b = skip_ws(rest, pc + 1);
    if !rest[b..].starts_with('{') {
        return Ok(None);
    }
    let args = split_quoted(&rest[p + 1..pc], ',');
    if args.len() != 5 {
        return Err(DynSqlError::parse(
            abs + p,
            format!(
                "foreach tag requires (collection, item, open, close, separator), got {} arguments",
                args.len()
            ),
        ));
    }
    let bc = find_close(rest, b, '{', '}')
        .ok_or_else(|| DynSqlError::parse(abs + b, "unterminated foreach body"))?;
    let body = parse_body(&rest[b + 1..bc], abs + b + 1)?;
    let node = SqlNode::Foreach {
        collection: unquote(args[0]).to_string(),
        item: unquote(args[1]).to_string(),
        open: unquote(args[2]).to_string(),
        close: unquote(args[3]).to_string(),
        separator: unquote(args[4]).to_string(),
        body,
    };
    Ok(Some((node, bc + 1)))
}

/// `choose { when (test) {body} ... otherwise {body} }`.
fn tag_choose(rest: &str, after: usize, abs: usize) -> DynSqlResult<Option<(SqlNode, usize)>> {
    let open = skip_ws(rest, after);
    if !rest[open..].starts_with('{') {
        return Ok(None);
    }
    let close = find_close(rest, open, '{', '}')
        .ok_or_else(|| DynSqlError::parse(abs + open, "unterminated choose block"))?;
    let inner = &rest[open + 1..close];
    let inner_abs = abs + open + 1;

    let mut whens = Vec::new();
    let mut otherwise = None;
    let mut k = skip_ws(inner, 0);
    while k < inner.len() {
        if let Some(n) = keyword_at(&inner[k..], "when") {
            if otherwise.is_some() {
                return Err(DynSqlError::parse(inner_abs + k, "'when' after 'otherwise'"));
            }
            let p = skip_ws(inner, k + n);
            if !inner[p..].starts_with('(') {
                return Err(DynSqlError::parse(inner_abs + p, "expected '(' after 'when'"));
            }
            let pc = find_close(inner, p, '(', ')')
                .ok_or_else(|| DynSqlError::parse(inner_abs + p, "unterminated when test"))?;
            let b = skip_ws(inner, pc + 1);
            if !inner[b..].starts_with('{') {
                return Err(DynSqlError::parse(inner_abs + b, "expected '{' after when test"));
            }
            let bc = find_close(inner, b, '{', '}')
                .ok_or_else(|| DynSqlError::parse(inner_abs + b, "unterminated when body"))?;
            let test = inner[p + 1..pc].trim().to_string();
            whens.push((test, parse_body(&inner[b + 1..bc], inner_abs + b + 1)?));
            k = skip_ws(inner, bc + 1);
        } else if let Some(n) = keyword_at(&inner[k..], "otherwise") {
            if otherwise.is_some() {
                return Err(DynSqlError::parse(inner_abs + k, "duplicate 'otherwise'"));
            }
            let b = skip_ws(inner, k + n);
            if !inner[b..].starts_with('{') {
                return Err(DynSqlError::parse(inner_abs + b, "expected '{' after 'otherwise'"));
            }
            let bc = find_close(inner, b, '{', '}')
                .ok_or_else(|| DynSqlError::parse(inner_abs + b, "unterminated otherwise body"))?;
            otherwise = Some(parse_body(&inner[b + 1..bc], inner_abs + b + 1)?);
            k = skip_ws(inner, bc + 1);
        } else {
            return Err(DynSqlError::parse(
                inner_abs + k,
                "choose block allows only 'when' and 'otherwise' branches",
            ));
        }
    }
    if whens.is_empty() {
        return Err(DynSqlError::parse(abs, "choose block requires at least one 'when'"));
    }
    Ok(Some((SqlNode::Choose { whens, otherwise }, close + 1)))
}
