//! The base library: `print`, `assert`, `type`, `tonumber`, `tostring`,
//! `error`, `pcall` (`spec.md` §1, §8 laws, §8 scenario 4).

use cosmo_core::{NativeContext, NativeError, Object, Value};

use crate::support::{display_value, type_name};

pub(crate) fn print(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let argc = ctx.argc();
    let mut out = String::new();
    for i in 0..argc {
        out.push_str(&display_value(ctx, ctx.arg(i))?);
    }
    println!("{out}");
    Ok(0)
}

pub(crate) fn assert_fn(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let argc = ctx.argc();
    let v = ctx.arg(0);
    if v.is_truthy() {
        for i in 0..argc {
            ctx.push(ctx.arg(i));
        }
        return Ok(argc);
    }
    let message = if argc > 1 {
        display_value(ctx, ctx.arg(1))?
    } else {
        "assertion failed!".to_string()
    };
    Err(ctx.runtime_error(message))
}

pub(crate) fn type_of(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let v = ctx.arg(0);
    let name = type_name(ctx, v);
    let r = ctx.intern(name);
    ctx.push(Value::Obj(r));
    Ok(1)
}

pub(crate) fn tonumber(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let v = ctx.arg(0);
    let parsed = match v {
        Value::Number(n) => Some(n),
        Value::Obj(r) => match ctx.heap_mut().get(r) {
            Object::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        },
        _ => None,
    };
    ctx.push(parsed.map(Value::Number).unwrap_or(Value::Nil));
    Ok(1)
}

pub(crate) fn tostring(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let v = ctx.arg(0);
    let s = display_value(ctx, v)?;
    let r = ctx.intern(&s);
    ctx.push(Value::Obj(r));
    Ok(1)
}

/// `error(fmt, …)` (`spec.md` §6 item 7): abort the current interpretation
/// with a message, recoverable via `pcall`. Extra arguments beyond the
/// first are concatenated the same way `print` joins its arguments.
pub(crate) fn error_fn(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let argc = ctx.argc();
    let mut message = String::new();
    for i in 0..argc {
        message.push_str(&display_value(ctx, ctx.arg(i))?);
    }
    if message.is_empty() {
        message.push_str("error");
    }
    Err(ctx.runtime_error(message))
}

/// `pcall(f, args…) -> (ok, result)` (`spec.md` §8 law, scenario 4).
///
/// The native ABI only reports a pushed-count, not a full result vector,
/// so only `f`'s first return value (or its error message) is forwarded
/// alongside `ok` - multi-return `pcall` is not exercised by any scenario
/// here.
pub(crate) fn pcall(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let argc = ctx.argc();
    if argc == 0 {
        return Err(ctx.runtime_error("pcall: expected a function argument".to_string()));
    }
    let callee = ctx.arg(0);
    let forwarded: Vec<Value> = (1..argc).map(|i| ctx.arg(i)).collect();
    ctx.push(callee);
    for v in &forwarded {
        ctx.push(*v);
    }
    let ok = ctx.pcall(forwarded.len() as u8, 1)?;
    let result = ctx.pop();
    ctx.push(Value::Bool(ok));
    ctx.push(result);
    Ok(2)
}
