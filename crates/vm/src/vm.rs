//! The `Vm` struct: value stack, call frames, globals, and open upvalues
//! (`spec.md` §4.3, §5 "Shared resources").

use std::collections::HashMap;

use cosmo_core::{Heap, NativeFn, NativeObj, Object, ObjRef, ObjectTag, Value};

use crate::error::VmError;
use crate::frame::CallFrame;

/// What a top-level `call`/`pcall` produced, mirroring the embedding API's
/// `call(argc, expected)` / `pcall(argc, expected) -> ok-bool` contract
/// (`spec.md` §6).
pub struct CallResult {
    pub ok: bool,
    pub values: Vec<Value>,
}

pub struct Vm {
    pub(crate) heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    /// Open upvalues, sorted by stack address descending (`spec.md` §5).
    pub(crate) open_upvalues: Vec<ObjRef>,
    pub(crate) globals: HashMap<ObjRef, Value>,
    /// `(args_start, argc)` for each currently-executing native call,
    /// innermost last; lets a `NativeContext` implementation answer
    /// `argc`/`arg` without the trait threading that state explicitly,
    /// and supports re-entrant native calls (e.g. `pcall` calling back
    /// into a closure that itself calls a native).
    pub(crate) native_frames: Vec<(usize, u8)>,
    /// Lazily allocated the first time a bare Table is iterated; the
    /// advance-callable's proto, not a built-in `ObjectTag` proto.
    pub(crate) table_iter_proto: Option<ObjRef>,
    /// Depth, in frames, of the innermost `pcall` boundary; `None` when no
    /// protected call is active (errors reaching the top propagate to the
    /// embedding host instead of unwinding to a boundary).
    pub(crate) pcall_depth: Option<usize>,
    /// Allocation count at which the next GC pass runs; doubles after every
    /// collection that doesn't shrink the heap by much, so collections grow
    /// rarer as a program's steady-state working set grows (`spec.md` §4.4).
    gc_threshold: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_FRAMES: usize = 256;
const MAX_STACK: usize = MAX_FRAMES * 64;
const INITIAL_GC_THRESHOLD: usize = 1024;

impl Vm {
    pub fn new() -> Self {
        Vm {
            heap: Heap::new(),
            stack: Vec::with_capacity(256),
            frames: Vec::new(),
            open_upvalues: Vec::new(),
            globals: HashMap::new(),
            native_frames: Vec::new(),
            table_iter_proto: None,
            pcall_depth: None,
            gc_threshold: INITIAL_GC_THRESHOLD,
        }
    }

    /// Roots: the value stack, every open upvalue, every frame's closure,
    /// every global's value, and the cached table-iterator proto
    /// (`spec.md` §4.4). The proto-object table is rooted by `Heap::collect`
    /// itself.
    fn roots(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.stack
            .iter()
            .filter_map(|v| v.as_obj())
            .chain(self.open_upvalues.iter().copied())
            .chain(self.frames.iter().map(|f| f.closure))
            .chain(self.globals.values().filter_map(|v| v.as_obj()))
            .chain(self.table_iter_proto)
    }

    /// Run a mark-sweep pass right now, regardless of the allocation
    /// threshold. Safe to call between opcodes, or from an embedding host
    /// between top-level `call`/`pcall` invocations.
    pub fn collect(&mut self) {
        let roots: Vec<ObjRef> = self.roots().collect();
        self.heap.collect(roots);
    }

    /// Collect if the heap has grown enough since the last pass to be worth
    /// the walk; called once per opcode dispatched.
    pub(crate) fn maybe_collect(&mut self) {
        if self.heap.allocated_count() < self.gc_threshold {
            return;
        }
        self.collect();
        self.gc_threshold = (self.heap.allocated_count() * 2).max(INITIAL_GC_THRESHOLD);
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn intern(&mut self, s: &str) -> ObjRef {
        self.heap.intern_copy(s)
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Value {
        self.stack.pop().expect("pop from empty VM stack")
    }

    /// `registerProtoObject(tag, obj)` (`spec.md` §6).
    pub fn register_proto_object(&mut self, tag: ObjectTag, obj: ObjRef) {
        self.heap.set_proto(tag, obj);
    }

    /// Install a single `(name, value)` pair as a global, the one-pair
    /// building block `register(n)` (`spec.md` §6 item 3) is built from.
    pub fn define_global(&mut self, name: &str, value: Value) {
        let key = self.heap.intern_copy(name);
        self.globals.insert(key, value);
    }

    pub fn define_native(&mut self, name: &str, func: NativeFn) {
        let obj = self
            .heap
            .alloc(Object::Native(NativeObj { name: name.into(), func }));
        self.define_global(name, Value::Obj(obj));
    }

    pub fn get_global(&self, name: &str) -> Option<Value> {
        let key = self.heap.find_interned(name)?;
        self.globals.get(&key).copied()
    }

    /// Wrap a bare compiled `Function` (as produced by `cosmo_compiler`'s
    /// top-level `CompiledScript`) in a zero-upvalue Closure so it can be
    /// run with [`Vm::call`]/[`Vm::pcall`].
    pub fn wrap_script(&mut self, function: ObjRef) -> ObjRef {
        self.heap.alloc(Object::Closure(cosmo_core::ClosureObj { function, upvalues: Vec::new() }))
    }

    /// Run `closure` (a freshly compiled top-level script, or any closure)
    /// with `args` pushed as its arguments and `expected` results
    /// requested, unprotected: a runtime error propagates to the host
    /// instead of being caught (`spec.md` §6 item 6, `call`).
    pub fn call(&mut self, closure: ObjRef, args: &[Value], expected: u8) -> Result<Vec<Value>, VmError> {
        let base = self.stack.len();
        let floor_frames = self.frames.len();
        self.stack.push(Value::Obj(closure));
        for a in args {
            self.stack.push(*a);
        }
        self.invoke_value(args.len() as u8, expected)?;
        self.run_until(floor_frames)?;
        let out = self.stack.split_off(base);
        Ok(out)
    }

    /// `pcall(argc, expected) -> ok-bool` (`spec.md` §6 item 6, §4.3
    /// "Protected call"). On failure the stack and frames are reset to
    /// exactly how they stood before the call, so VM failure state is
    /// fully reset before control returns.
    pub fn pcall(&mut self, closure: ObjRef, args: &[Value], expected: u8) -> CallResult {
        let base = self.stack.len();
        let floor_frames = self.frames.len();
        self.stack.push(Value::Obj(closure));
        for a in args {
            self.stack.push(*a);
        }
        match self.invoke_value(args.len() as u8, expected).and_then(|()| self.run_until(floor_frames)) {
            Ok(()) => {
                let values = self.stack.split_off(base);
                CallResult { ok: true, values }
            }
            Err(e) => {
                self.frames.truncate(floor_frames);
                self.close_upvalues_above(base);
                self.stack.truncate(base);
                let msg = self.heap.intern_copy(&e.message());
                CallResult { ok: false, values: vec![Value::Obj(msg)] }
            }
        }
    }

    pub(crate) fn check_stack(&self) -> Result<(), VmError> {
        if self.stack.len() >= MAX_STACK || self.frames.len() >= MAX_FRAMES {
            return Err(VmError::StackOverflow);
        }
        Ok(())
    }
}
