//! `cosmo repl` (`spec.md` §5): a line editor over one persistent `Vm`.
//!
//! Each line is tried first as an expression (`return <line>;`, printing
//! the result) and, if that fails to compile, as a statement - the same
//! two-attempt trick interactive Lua-family REPLs use so `1 + 1` prints `2`
//! while `var x = 1;` just runs.

use cosmo_vm::Vm;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use crate::config::Config;

pub fn run() {
    let config = Config::load();
    let mut vm = Vm::new();
    cosmo_stdlib::install(&mut vm);

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Error: failed to start line editor: {e}");
            std::process::exit(1);
        }
    };

    let history_path = config.history_path();
    if let Some(path) = &history_path {
        let _ = editor.load_history(path);
    }

    println!("Cosmo REPL - Ctrl-D to exit");

    loop {
        match editor.readline("cosmo> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(trimmed);
                eval_line(&mut vm, trimmed);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error: {e}");
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let _ = editor.save_history(path);
    }
}

fn eval_line(vm: &mut Vm, line: &str) {
    let as_expression = format!("return {line};");
    let source = match cosmo_compiler::compile_string(vm.heap_mut(), &as_expression, "<repl>") {
        Ok(script) => script,
        Err(_) => match cosmo_compiler::compile_string(vm.heap_mut(), line, "<repl>") {
            Ok(script) => script,
            Err(errors) => {
                for e in &errors {
                    eprintln!("{e}");
                }
                return;
            }
        },
    };

    let closure = vm.wrap_script(source.function);
    match vm.call(closure, &[], 1) {
        Ok(values) => {
            if let Some(v) = values.first() {
                if !v.is_nil() {
                    println!("{}", cosmo_stdlib::display_for_repl(vm, *v));
                }
            }
        }
        Err(e) => eprintln!("Error: {e}"),
    }
}
