//! `cosmo run <path>` (`spec.md` §5).

use std::path::Path;
use std::process;

use cosmo_vm::Vm;

pub fn run(path: &Path, module_name: &str) {
    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}: {e}", path.display());
            process::exit(1);
        }
    };

    let mut vm = Vm::new();
    cosmo_stdlib::install(&mut vm);

    let script = match cosmo_compiler::compile_string(vm.heap_mut(), &source, module_name) {
        Ok(script) => script,
        Err(errors) => {
            for e in &errors {
                eprintln!("{e}");
            }
            process::exit(1);
        }
    };

    let closure = vm.wrap_script(script.function);
    if let Err(e) = vm.call(closure, &[], 0) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
