//! `impl NativeContext for Vm`: the seam through which a `NativeFn`
//! registered by `cosmo-stdlib` reaches VM state without this crate's
//! dependency on `cosmo-core` becoming a cycle (`spec.md` §3, "C-callable").

use cosmo_core::{NativeContext, NativeError, Value};

use crate::vm::Vm;

impl NativeContext for Vm {
    fn argc(&self) -> usize {
        self.native_frames.last().map(|&(_, argc)| argc as usize).unwrap_or(0)
    }

    fn arg(&self, index: usize) -> Value {
        let (start, argc) = *self.native_frames.last().expect("arg() outside a native call");
        if index >= argc as usize {
            return Value::Nil;
        }
        self.stack[start + index]
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        Vm::pop(self)
    }

    fn heap_mut(&mut self) -> &mut cosmo_core::Heap {
        &mut self.heap
    }

    fn intern(&mut self, s: &str) -> cosmo_core::ObjRef {
        self.heap.intern_copy(s)
    }

    fn runtime_error(&mut self, message: String) -> NativeError {
        NativeError(message)
    }

    fn call_depth(&self) -> usize {
        self.frames.len()
    }

    fn set_global(&mut self, name: &str, value: Value) {
        self.define_global(name, value);
    }

    fn call(&mut self, argc: u8, expected: u8) -> Result<(), NativeError> {
        let floor_frames = self.frames.len();
        self.invoke_value(argc, expected).map_err(|e| NativeError(e.message()))?;
        self.run_until(floor_frames).map_err(|e| NativeError(e.message()))
    }

    fn pcall(&mut self, argc: u8, expected: u8) -> Result<bool, NativeError> {
        let callee_slot = self.stack.len() - argc as usize - 1;
        let floor_frames = self.frames.len();
        match self.invoke_value(argc, expected).and_then(|()| self.run_until(floor_frames)) {
            Ok(()) => Ok(true),
            Err(e) => {
                self.frames.truncate(floor_frames);
                self.close_upvalues_above(callee_slot);
                self.stack.truncate(callee_slot);
                let msg = self.heap.intern_copy(&e.message());
                self.stack.push(Value::Obj(msg));
                Ok(false)
            }
        }
    }
}
