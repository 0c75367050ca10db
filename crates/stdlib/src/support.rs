//! Shared helpers for built-in callables: value formatting and argument
//! coercion (`spec.md` §1, standard library surface).

use cosmo_core::{NativeContext, NativeError, Object, Value};

/// `toString` capability (`spec.md` §3, "Object"): every value can be
/// rendered for `print`/`tostring`/string concatenation.
pub(crate) fn display_value(ctx: &mut dyn NativeContext, v: Value) -> Result<String, NativeError> {
    Ok(match v {
        Value::Nil => "nil".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => format_number(n),
        Value::Obj(r) => match ctx.heap_mut().get(r) {
            Object::Str(s) => s.to_string(),
            Object::Table(_) => format!("table: {r}"),
            Object::UserObject(_) => format!("object: {r}"),
            Object::Closure(_) | Object::Function(_) => format!("function: {r}"),
            Object::Native(n) => format!("function: builtin '{}'", n.name),
            Object::Upvalue(_) => format!("upvalue: {r}"),
        },
    })
}

/// Canonical double rendering; integral doubles print without a decimal
/// point so `tostring(tonumber(s)) == s` holds for integer literals
/// (`spec.md` §8, "Round-trip for numbers").
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// The dynamic type name as surfaced by `type(v)` (`spec.md` §1).
pub(crate) fn type_name(ctx: &mut dyn NativeContext, v: Value) -> &'static str {
    match v {
        Value::Nil => "nil",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::Obj(r) => match ctx.heap_mut().get(r) {
            Object::Str(_) => "string",
            Object::Table(_) => "table",
            Object::UserObject(_) => "object",
            Object::Closure(_) | Object::Function(_) => "function",
            Object::Native(_) => "userdata",
            Object::Upvalue(_) => "userdata",
        },
    }
}

/// Read argument `index` as a string, raising a type error naming `who`
/// otherwise.
pub(crate) fn expect_string(ctx: &mut dyn NativeContext, index: usize, who: &str) -> Result<String, NativeError> {
    match ctx.arg(index) {
        Value::Obj(r) => match ctx.heap_mut().get(r) {
            Object::Str(s) => Ok(s.to_string()),
            _ => Err(ctx.runtime_error(format!("{who}: argument {index} must be a string"))),
        },
        _ => Err(ctx.runtime_error(format!("{who}: argument {index} must be a string"))),
    }
}
