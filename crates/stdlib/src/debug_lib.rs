//! `debug.reflect`/`debug.stack`/`debug.setGlobal` - minimal VM-reflection
//! hooks (`spec.md` §1, §9 open question (c)).

use cosmo_core::{NativeContext, NativeError, Object, TableObj, Value};

use crate::support::type_name;

/// `debug.reflect(v) -> { tag: string, len: number? }`.
pub(crate) fn reflect(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let v = ctx.arg(0);
    let tag = type_name(ctx, v);
    let mut table = TableObj::new();
    let tag_key = ctx.intern("tag");
    let tag_val = ctx.intern(tag);
    table.insert(Value::Obj(tag_key), Value::Obj(tag_val));
    if let Value::Obj(r) = v {
        if let Some(length) = ctx.heap_mut().get(r).length() {
            let len_key = ctx.intern("len");
            table.insert(Value::Obj(len_key), Value::Number(length as f64));
        }
    }
    let obj = ctx.heap_mut().alloc(Object::Table(table));
    ctx.push(Value::Obj(obj));
    Ok(1)
}

/// `debug.stack() -> { depth: number }`: the active call-frame count. A
/// full per-frame trace would need function display names threaded
/// through the embedding boundary; out of scope for this hook.
pub(crate) fn stack(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let mut table = TableObj::new();
    let key = ctx.intern("depth");
    table.insert(Value::Obj(key), Value::Number(ctx.call_depth() as f64));
    let obj = ctx.heap_mut().alloc(Object::Table(table));
    ctx.push(Value::Obj(obj));
    Ok(1)
}

/// `debug.setGlobal(name, value)`: installs a global unconditionally,
/// bypassing whatever the script's own lexical discipline would otherwise
/// enforce. Noted as unsafe but permitted (`spec.md` §9 open question (c)).
pub(crate) fn set_global(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let name = crate::support::expect_string(ctx, 0, "debug.setGlobal")?;
    let value = ctx.arg(1);
    ctx.set_global(&name, value);
    Ok(0)
}
