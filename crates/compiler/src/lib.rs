//! Lexer and single-pass compiler for the Cosmo language (`spec.md` §4.1-4.2).

pub mod error;
pub mod lexer;
mod compiler;

pub use compiler::{CompiledScript, Compiler};
pub use error::CompileError;

use cosmo_core::Heap;

/// Compile `source` into a top-level script function named `module_name`
/// (used for error messages and stack traces).
pub fn compile_string(
    heap: &mut Heap,
    source: &str,
    module_name: &str,
) -> Result<CompiledScript, Vec<CompileError>> {
    Compiler::compile(heap, source, module_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(src: &str) -> CompiledScript {
        let mut heap = Heap::new();
        compile_string(&mut heap, src, "<test>").expect("compiles")
    }

    #[test]
    fn compiles_empty_script() {
        compile_ok("");
    }

    #[test]
    fn compiles_arithmetic_statement() {
        compile_ok("1 + 2 * 3;");
    }

    #[test]
    fn compiles_var_and_function() {
        compile_ok(
            r#"
            var x = 1;
            function add(a, b)
                return a + b;
            end
            x = add(x, 2);
            "#,
        );
    }

    #[test]
    fn compiles_control_flow() {
        compile_ok(
            r#"
            var sum = 0;
            for (var i = 0; i < 10; i++) do
                if i % 2 == 0
                    continue;
                end
                sum = sum + i;
            end
            while sum < 1 do
                sum++;
            end
            "#,
        );
    }

    #[test]
    fn compiles_closure() {
        compile_ok(
            r#"
            function counter()
                local n = 0;
                return function()
                    n++;
                    return n;
                end
            end
            var c = counter();
            print(c());
            "#,
        );
    }

    #[test]
    fn compiles_proto_and_table() {
        compile_ok(
            r#"
            proto P
                function greet(self)
                    return "hi";
                end
            end
            var o = { x: 1, y: 2 };
            "#,
        );
    }

    #[test]
    fn reports_error_on_unterminated_block() {
        let mut heap = Heap::new();
        let result = compile_string(&mut heap, "function f() return 1", "<test>");
        assert!(result.is_err());
    }
}
