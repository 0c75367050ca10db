//! `loadstring(source, name?)` (`spec.md` §9 open question (b): the
//! original's base-library registration drops this entry through a missing
//! comma; Cosmo registers it correctly).

use cosmo_core::{ClosureObj, NativeContext, NativeError, Object, Value};

use crate::support::expect_string;

pub(crate) fn loadstring(ctx: &mut dyn NativeContext) -> Result<usize, NativeError> {
    let source = expect_string(ctx, 0, "loadstring")?;
    let module_name = if ctx.argc() > 1 {
        expect_string(ctx, 1, "loadstring")?
    } else {
        "<loadstring>".to_string()
    };

    match cosmo_compiler::compile_string(ctx.heap_mut(), &source, &module_name) {
        Ok(script) => {
            let closure = ctx
                .heap_mut()
                .alloc(Object::Closure(ClosureObj { function: script.function, upvalues: Vec::new() }));
            ctx.push(Value::Obj(closure));
            Ok(1)
        }
        Err(errors) => {
            let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n");
            ctx.push(Value::Nil);
            let r = ctx.intern(&message);
            ctx.push(Value::Obj(r));
            Ok(2)
        }
    }
}
