//! Built-in advance-callable for iterating a bare Table with `for k,v in
//! t do ... end` (`spec.md` §8 scenario 3). Registered once, lazily, as
//! the `__call` entry on [`crate::vm::Vm::table_iter_proto`].

use cosmo_core::{NativeContext, NativeError, Object, Value};

pub(crate) fn table_iterator_advance(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let state_ref = ctx
        .arg(0)
        .as_obj()
        .ok_or_else(|| ctx.runtime_error("table iterator called without its state".to_string()))?;

    let (table_ref, index) = match ctx.heap_mut().get(state_ref) {
        Object::UserObject(o) => {
            let table_ref = o
                .fields
                .get("__table")
                .and_then(Value::as_obj)
                .expect("table iterator state missing __table");
            let index = o
                .fields
                .get("__index")
                .and_then(Value::as_number)
                .expect("table iterator state missing __index") as usize;
            (table_ref, index)
        }
        _ => return Err(ctx.runtime_error("table iterator state is not an object".to_string())),
    };

    let entry = match ctx.heap_mut().get(table_ref) {
        Object::Table(t) => t.get_index(index),
        _ => return Err(ctx.runtime_error("table iterator's table went away".to_string())),
    };

    let Some((key, value)) = entry else {
        ctx.push(Value::Nil);
        return Ok(1);
    };

    if let Object::UserObject(o) = ctx.heap_mut().get_mut(state_ref) {
        o.fields.insert("__index".into(), Value::Number((index + 1) as f64));
    }
    ctx.push(key);
    ctx.push(value);
    Ok(2)
}
