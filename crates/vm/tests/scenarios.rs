//! Whole-script scenarios exercising the interpreter end to end, independent
//! of `cosmo-stdlib` (no `print`/`assert` registered here).

use cosmo_core::Value;
use cosmo_vm::Vm;

fn run(source: &str) -> Vec<Value> {
    let mut vm = Vm::new();
    let script = cosmo_compiler::compile_string(vm.heap_mut(), source, "<test>").expect("compiles");
    let closure = vm.wrap_script(script.function);
    vm.call(closure, &[], 1).expect("runs")
}

#[test]
fn for_loop_accumulates_sum_of_evens_excluded() {
    let out = run(
        r#"
        var sum = 0;
        for (var i = 0; i < 10; i++) do
            if i % 2 == 0
                continue;
            end
            sum = sum + i;
        end
        return sum;
        "#,
    );
    assert_eq!(out, vec![Value::Number(25.0)]);
}

#[test]
fn closure_counter_increments_independently_of_caller() {
    let out = run(
        r#"
        function counter()
            local n = 0;
            return function()
                n++;
                return n;
            end
        end
        var c = counter();
        c();
        c();
        return c();
        "#,
    );
    assert_eq!(out, vec![Value::Number(3.0)]);
}

#[test]
fn and_short_circuits_on_falsy_lhs_without_evaluating_rhs() {
    assert_eq!(run("return false and 2;"), vec![Value::Bool(false)]);
    assert_eq!(run("return nil and 2;"), vec![Value::Nil]);
}

#[test]
fn and_falls_through_to_rhs_on_truthy_lhs() {
    assert_eq!(run("return 1 and 2;"), vec![Value::Number(2.0)]);
}

#[test]
fn or_short_circuits_on_truthy_lhs_without_evaluating_rhs() {
    assert_eq!(run("return 1 or 2;"), vec![Value::Number(1.0)]);
}

#[test]
fn or_falls_through_to_rhs_on_falsy_lhs() {
    assert_eq!(run("return false or 2;"), vec![Value::Number(2.0)]);
    assert_eq!(run("return nil or 2;"), vec![Value::Number(2.0)]);
}

#[test]
fn and_or_results_are_usable_as_a_sole_call_argument() {
    let out = run(
        r#"
        function id(x)
            return x;
        end
        return id(1 and 2);
        "#,
    );
    assert_eq!(out, vec![Value::Number(2.0)]);
}

#[test]
fn concat_binds_looser_than_equality() {
    // `1 == 1 .. "x"` must parse as `(1 == 1) .. "x"`, not `1 == (1 .. "x")`.
    let mut vm = Vm::new();
    let script =
        cosmo_compiler::compile_string(vm.heap_mut(), r#"return 1 == 1 .. "x";"#, "<test>")
            .expect("compiles");
    let closure = vm.wrap_script(script.function);
    let out = vm.call(closure, &[], 1).expect("runs");

    if let Value::Obj(r) = out[0] {
        let rendered = match vm.heap().get(r) {
            cosmo_core::Object::Str(s) => s.to_string(),
            _ => panic!("expected a string"),
        };
        assert_eq!(rendered, "truex");
    } else {
        panic!("expected a string value");
    }
}

#[test]
fn table_iteration_preserves_insertion_order() {
    let mut vm = Vm::new();
    let script = cosmo_compiler::compile_string(
        vm.heap_mut(),
        r#"
        var t = {};
        t.a = 1;
        t.b = 2;
        t.c = 3;
        var order = "";
        for k, v in t do
            order = order .. k;
        end
        return order;
        "#,
        "<test>",
    )
    .expect("compiles");
    let closure = vm.wrap_script(script.function);
    let out = vm.call(closure, &[], 1).expect("runs");

    if let Value::Obj(r) = out[0] {
        let rendered = match vm.heap().get(r) {
            cosmo_core::Object::Str(s) => s.to_string(),
            _ => panic!("expected a string"),
        };
        assert_eq!(rendered, "abc");
    } else {
        panic!("expected a string value");
    }
}

#[test]
fn pcall_resets_stack_and_frames_on_failure() {
    let mut vm = Vm::new();
    let script = cosmo_compiler::compile_string(
        vm.heap_mut(),
        r#"
        function boom()
            return 1 / 0;
        end
        "#,
        "<test>",
    )
    .expect("compiles");
    let wrapper = vm.wrap_script(script.function);
    vm.call(wrapper, &[], 0).expect("top-level defines boom");

    let boom = vm.get_global("boom").expect("boom is defined");
    let closure = match boom {
        Value::Obj(r) => r,
        _ => panic!("boom should be a closure"),
    };

    let result = vm.pcall(closure, &[], 0);
    assert!(!result.ok);
    assert!(vm.heap().allocated_count() > 0);
}
