//! Built-in callables registered into a Cosmo VM through the embedding API
//! (`spec.md` §1's "explicitly out of scope" standard library, expanded in
//! full by `SPEC_FULL.md` §4).
//!
//! Everything here is wired through [`cosmo_vm::Vm::define_native`],
//! [`cosmo_vm::Vm::define_global`], and
//! [`cosmo_vm::Vm::register_proto_object`] - the only seams `cosmo-vm`
//! exposes to an external collaborator (`spec.md` §6).

mod base;
mod debug_lib;
mod loadstring;
mod string_lib;
mod support;

use std::collections::HashMap;

use cosmo_core::{NativeFn, NativeObj, Object, ObjectTag, TableObj, UserObj, Value};
use cosmo_vm::Vm;

/// Render `v` the same way `print`/`tostring` do, for hosts (the REPL) that
/// need display formatting outside of a native call.
pub fn display_for_repl(vm: &mut Vm, v: Value) -> String {
    support::display_value(vm, v).unwrap_or_else(|e| format!("<error: {}>", e.0))
}

/// Register every built-in named in `spec.md` §1 as a global on `vm`.
pub fn install(vm: &mut Vm) {
    vm.define_native("print", base::print);
    vm.define_native("assert", base::assert_fn);
    vm.define_native("type", base::type_of);
    vm.define_native("tonumber", base::tonumber);
    vm.define_native("tostring", base::tostring);
    vm.define_native("error", base::error_fn);
    vm.define_native("pcall", base::pcall);
    vm.define_native("loadstring", loadstring::loadstring);

    install_string_lib(vm);
    install_debug_lib(vm);
}

/// `string.sub/find/split/charAt/len`, plus the String proto object so
/// `s:sub(1, 3)` method syntax resolves the same callables
/// (`spec.md` §8 scenario 6).
fn install_string_lib(vm: &mut Vm) {
    let entries: [(&str, NativeFn); 5] = [
        ("sub", string_lib::sub as NativeFn),
        ("find", string_lib::find as NativeFn),
        ("split", string_lib::split as NativeFn),
        ("charAt", string_lib::char_at as NativeFn),
        ("len", string_lib::len as NativeFn),
    ];

    let mut table = TableObj::new();
    let mut proto_fields: HashMap<Box<str>, Value> = HashMap::new();
    for (name, func) in entries {
        let native = vm.heap_mut().alloc(Object::Native(NativeObj { name: name.into(), func }));
        let key = vm.intern(name);
        table.insert(Value::Obj(key), Value::Obj(native));
        proto_fields.insert(Box::from(name), Value::Obj(native));
    }
    let table_obj = vm.heap_mut().alloc(Object::Table(table));
    vm.define_global("string", Value::Obj(table_obj));

    let proto = vm.heap_mut().alloc(Object::UserObject(UserObj { fields: proto_fields, proto: None }));
    vm.register_proto_object(ObjectTag::String, proto);
}

fn install_debug_lib(vm: &mut Vm) {
    let entries: [(&str, NativeFn); 3] = [
        ("reflect", debug_lib::reflect as NativeFn),
        ("stack", debug_lib::stack as NativeFn),
        ("setGlobal", debug_lib::set_global as NativeFn),
    ];

    let mut table = TableObj::new();
    for (name, func) in entries {
        let native = vm.heap_mut().alloc(Object::Native(NativeObj { name: name.into(), func }));
        let key = vm.intern(name);
        table.insert(Value::Obj(key), Value::Obj(native));
    }
    let table_obj = vm.heap_mut().alloc(Object::Table(table));
    vm.define_global("debug", Value::Obj(table_obj));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> Result<(), cosmo_vm::VmError> {
        let mut vm = Vm::new();
        install(&mut vm);
        let script = cosmo_compiler::compile_string(vm.heap_mut(), source, "<test>").expect("compiles");
        let closure = vm.wrap_script(script.function);
        vm.call(closure, &[], 0).map(|_| ())
    }

    #[test]
    fn assert_true_is_a_no_op() {
        run("assert(true);").expect("no-op");
    }

    #[test]
    fn assert_false_raises() {
        let err = run("assert(false, \"boom\");").expect_err("assert(false) raises");
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn pcall_catches_error() {
        run(
            r#"
            var ok, msg = pcall(function() error("boom"); end);
            assert(ok == false);
            "#,
        )
        .expect("script itself does not raise");
    }

    #[test]
    fn string_sub_scenario() {
        run(
            r#"
            var s = "hello";
            assert(string.sub(s, 1, 3) == "ell");
            "#,
        )
        .expect("sub slices with an inclusive end index");
    }

    #[test]
    fn proto_method_dispatch_scenario() {
        run(
            r#"
            proto P
                function greet(self)
                    return "hi";
                end
            end
            var o = {};
            o.__proto = P;
            assert(o:greet() == "hi");
            "#,
        )
        .expect("method call dispatches through the proto chain");
    }
}
