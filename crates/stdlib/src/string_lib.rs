//! `string.sub/find/split/charAt/len`, proto-dispatched through the
//! String tag (`spec.md` §3 "Proto-object table", §8 scenario 6).
//!
//! Every function here reads its receiver from argument 0, so both
//! `string.sub(s, 1, 3)` and `s:sub(1, 3)` resolve to the same callable -
//! `INVOKE` splices the receiver in as arg 0 the same way an ordinary call
//! passes it explicitly.

use cosmo_core::{NativeContext, NativeError, Object, TableObj, Value};

use crate::support::expect_string;

/// `string.sub(s, i, j)`: `i`/`j` are 0-based, `j` inclusive, both clamped
/// to `[0, length]` (`spec.md` §9 open question (a)). `j` defaults to the
/// last index when omitted.
pub(crate) fn sub(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let s = expect_string(ctx, 0, "string.sub")?;
    let len = s.len() as i64;
    let start = ctx.arg(1).as_number().unwrap_or(0.0) as i64;
    let end = if ctx.argc() > 2 { ctx.arg(2).as_number().unwrap_or((len - 1) as f64) as i64 } else { len - 1 };

    let start = start.clamp(0, len) as usize;
    let end_exclusive = (end.clamp(-1, len - 1) + 1).max(0) as usize;
    let slice = if end_exclusive <= start { "" } else { s.get(start..end_exclusive.min(len as usize)).unwrap_or("") };

    let r = ctx.intern(slice);
    ctx.push(Value::Obj(r));
    Ok(1)
}

/// `string.find(s, needle)`: 0-based index of the first match, or `nil`.
pub(crate) fn find(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let s = expect_string(ctx, 0, "string.find")?;
    let needle = expect_string(ctx, 1, "string.find")?;
    match s.find(needle.as_str()) {
        Some(idx) => ctx.push(Value::Number(idx as f64)),
        None => ctx.push(Value::Nil),
    }
    Ok(1)
}

/// `string.split(s, sep)`: a Table of the pieces, 1-based keys (the same
/// array convention the VM's variadic-argument collection uses).
pub(crate) fn split(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let s = expect_string(ctx, 0, "string.split")?;
    let sep = expect_string(ctx, 1, "string.split")?;

    let pieces: Vec<String> = if sep.is_empty() {
        s.chars().map(String::from).collect()
    } else {
        s.split(sep.as_str()).map(String::from).collect()
    };

    let mut table = TableObj::new();
    for (i, piece) in pieces.into_iter().enumerate() {
        let r = ctx.intern(&piece);
        table.insert(Value::Number((i + 1) as f64), Value::Obj(r));
    }
    let obj = ctx.heap_mut().alloc(Object::Table(table));
    ctx.push(Value::Obj(obj));
    Ok(1)
}

/// `string.charAt(s, i)`: the single-character string at 0-based index
/// `i`, or `nil` out of bounds.
pub(crate) fn char_at(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let s = expect_string(ctx, 0, "string.charAt")?;
    let i = ctx.arg(1).as_number().unwrap_or(-1.0) as i64;
    let found = if i >= 0 && (i as usize) < s.len() { s.get(i as usize..i as usize + 1) } else { None };
    match found {
        Some(c) => {
            let r = ctx.intern(c);
            ctx.push(Value::Obj(r));
        }
        None => ctx.push(Value::Nil),
    }
    Ok(1)
}

pub(crate) fn len(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let s = expect_string(ctx, 0, "string.len")?;
    ctx.push(Value::Number(s.len() as f64));
    Ok(1)
}
