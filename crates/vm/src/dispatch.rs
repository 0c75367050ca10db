//! The opcode dispatch loop (`spec.md` §4.3).

use cosmo_core::{
    ClosureObj, Object, ObjRef, ObjectTag, OpCode, TableObj, UpvalueObj, UpvalueState, UserObj,
    Value,
};

use crate::error::VmError;
use crate::frame::CallFrame;
use crate::vm::Vm;

const MAX_PROTO_DEPTH: usize = 64;

impl Vm {
    /// Run opcodes until the frame stack unwinds back down to
    /// `floor_frames` - i.e. until the frame [`Vm::invoke_value`] most
    /// recently pushed has returned (a native callee never pushes one, so
    /// this is then a no-op loop).
    pub(crate) fn run_until(&mut self, floor_frames: usize) -> Result<(), VmError> {
        while self.frames.len() > floor_frames {
            self.maybe_collect();
            self.step()?;
        }
        Ok(())
    }

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn chunk_of(&self, frame: &CallFrame) -> &cosmo_core::Chunk {
        let Object::Closure(c) = self.heap.get(frame.closure) else {
            panic!("frame closure is not a Closure object");
        };
        let Object::Function(f) = self.heap.get(c.function) else {
            panic!("closure's function slot is not a Function object");
        };
        &f.chunk
    }

    fn read_u8(&mut self) -> u8 {
        let idx = self.frames.len() - 1;
        let ip = self.frames[idx].ip;
        let byte = self.chunk_of(&self.frames[idx]).code[ip];
        self.frames[idx].ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let idx = self.frames.len() - 1;
        let ip = self.frames[idx].ip;
        let value = self.chunk_of(&self.frames[idx]).read_u16(ip);
        self.frames[idx].ip += 2;
        value
    }

    fn read_constant(&mut self) -> Value {
        let k = self.read_u16();
        let idx = self.frames.len() - 1;
        self.chunk_of(&self.frames[idx]).constants[k as usize]
    }

    fn jump(&mut self, forward: bool) {
        let off = self.read_u16() as usize;
        let idx = self.frames.len() - 1;
        if forward {
            self.frames[idx].ip += off;
        } else {
            self.frames[idx].ip -= off;
        }
    }

    // -----------------------------------------------------------------
    // One opcode
    // -----------------------------------------------------------------

    fn step(&mut self) -> Result<(), VmError> {
        let byte = self.read_u8();
        let op = OpCode::from_u8(byte).expect("corrupt bytecode: unknown opcode byte");
        match op {
            OpCode::LoadConst => {
                let v = self.read_constant();
                self.stack.push(v);
            }
            OpCode::True => self.stack.push(Value::Bool(true)),
            OpCode::False => self.stack.push(Value::Bool(false)),
            OpCode::Nil => self.stack.push(Value::Nil),
            OpCode::Pop => {
                let n = self.read_u8() as usize;
                let new_len = self.stack.len().saturating_sub(n);
                self.stack.truncate(new_len);
            }

            OpCode::Add => self.binary_numeric(|a, b| Ok(a + b))?,
            OpCode::Sub => self.binary_numeric(|a, b| Ok(a - b))?,
            OpCode::Mult => self.binary_numeric(|a, b| Ok(a * b))?,
            OpCode::Div => self.binary_numeric(|a, b| {
                if b == 0.0 {
                    Err("attempt to divide by zero".to_string())
                } else {
                    Ok(a / b)
                }
            })?,
            OpCode::Mod => self.binary_numeric(|a, b| {
                if b == 0.0 {
                    Err("attempt to perform 'n%%0'".to_string())
                } else {
                    Ok(a % b)
                }
            })?,
            OpCode::Negate => {
                let v = self.pop();
                let n = self.expect_number(v)?;
                self.push(Value::Number(-n));
            }
            OpCode::Not => {
                let v = self.pop();
                self.push(Value::Bool(!v.is_truthy()));
            }
            OpCode::Count => {
                let v = self.pop();
                let n = self.op_count(v)?;
                self.push(Value::Number(n as f64));
            }
            OpCode::Concat => {
                let n = self.read_u8();
                self.op_concat(n as usize)?;
            }
            OpCode::Equal => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(self.values_equal(a, b)));
            }
            OpCode::Greater => self.compare(|o| o == std::cmp::Ordering::Greater)?,
            OpCode::Less => self.compare(|o| o == std::cmp::Ordering::Less)?,
            OpCode::GreaterEqual => self.compare(|o| o != std::cmp::Ordering::Less)?,
            OpCode::LessEqual => self.compare(|o| o != std::cmp::Ordering::Greater)?,

            OpCode::GetLocal => {
                let idx = self.read_u8() as usize;
                let base = self.frame().base;
                self.push(self.stack[base + idx]);
            }
            OpCode::SetLocal => {
                let idx = self.read_u8() as usize;
                let base = self.frame().base;
                let v = *self.stack.last().expect("assignment rhs on stack");
                self.stack[base + idx] = v;
            }
            OpCode::IncLocal => {
                let delta = self.read_u8() as i32 - 128;
                let idx = self.read_u8() as usize;
                let base = self.frame().base;
                let updated = self.inc_slot(base + idx, delta)?;
                self.push(updated);
            }
            OpCode::GetUpval => {
                let idx = self.read_u8() as usize;
                let r = self.upvalue_ref(idx);
                self.push(self.read_upvalue(r));
            }
            OpCode::SetUpval => {
                let idx = self.read_u8() as usize;
                let r = self.upvalue_ref(idx);
                let v = *self.stack.last().expect("assignment rhs on stack");
                self.write_upvalue(r, v);
            }
            OpCode::IncUpval => {
                let delta = self.read_u8() as i32 - 128;
                let idx = self.read_u8() as usize;
                let r = self.upvalue_ref(idx);
                let old = self.expect_number(self.read_upvalue(r))?;
                let updated = Value::Number(old + delta as f64);
                self.write_upvalue(r, updated);
                self.push(updated);
            }
            OpCode::GetGlobal => {
                let name = self.read_constant();
                let key = name.as_obj().expect("global name constant is a string");
                let v = self.globals.get(&key).copied().unwrap_or(Value::Nil);
                self.push(v);
            }
            OpCode::SetGlobal => {
                let name = self.read_constant();
                let key = name.as_obj().expect("global name constant is a string");
                let v = *self.stack.last().expect("assignment rhs on stack");
                self.globals.insert(key, v);
            }
            OpCode::IncGlobal => {
                let delta = self.read_u8() as i32 - 128;
                let name = self.read_constant();
                let key = name.as_obj().expect("global name constant is a string");
                let old = self.globals.get(&key).copied().unwrap_or(Value::Nil);
                let old_n = self.expect_number(old)?;
                let updated = Value::Number(old_n + delta as f64);
                self.globals.insert(key, updated);
                self.push(updated);
            }
            OpCode::Close => {
                let at = self.stack.len() - 1;
                self.close_upvalues_above(at);
                self.stack.truncate(at);
            }

            OpCode::Jmp => self.jump(true),
            OpCode::JmpBack => self.jump(false),
            OpCode::Pejmp => {
                let v = self.pop();
                if v.is_truthy() {
                    let _ = self.read_u16();
                } else {
                    self.jump(true);
                }
            }
            OpCode::Ejmp => {
                let v = *self.stack.last().expect("EJMP operand");
                if v.is_truthy() {
                    let _ = self.read_u16();
                } else {
                    self.jump(true);
                }
            }

            OpCode::Call => {
                let argc = self.read_u8();
                let expected = self.read_u8();
                self.invoke_value(argc, expected)?;
            }
            OpCode::Invoke => {
                let name = self.read_constant();
                let key = name.as_obj().expect("method name constant is a string");
                let argc = self.read_u8();
                let expected = self.read_u8();
                self.invoke_method(key, argc, expected)?;
            }
            OpCode::Return => {
                let n = self.read_u8() as usize;
                self.do_return(n);
            }
            OpCode::Closure => {
                let k = self.read_constant();
                let function = k.as_obj().expect("CLOSURE constant is a Function");
                let upvalue_count = match self.heap.get(function) {
                    Object::Function(f) => f.upvalue_count,
                    _ => panic!("CLOSURE constant is not a Function object"),
                };
                let base = self.frame().base;
                let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                for _ in 0..upvalue_count {
                    let is_local = self.read_u8() != 0;
                    let index = self.read_u8() as usize;
                    if is_local {
                        upvalues.push(self.capture_upvalue(base + index));
                    } else {
                        upvalues.push(self.upvalue_ref(index));
                    }
                }
                let obj = self.heap.alloc(Object::Closure(ClosureObj { function, upvalues }));
                self.push(Value::Obj(obj));
            }

            OpCode::NewDict => {
                let n = self.read_u16() as usize;
                let start = self.stack.len() - 2 * n;
                let mut table = TableObj::new();
                let pairs: Vec<(Value, Value)> = self.stack[start..]
                    .chunks(2)
                    .map(|kv| (kv[0], kv[1]))
                    .collect();
                for (k, v) in pairs {
                    table.insert(k, v);
                }
                self.stack.truncate(start);
                let obj = self.heap.alloc(Object::Table(table));
                self.push(Value::Obj(obj));
            }
            OpCode::NewObject => {
                let n = self.read_u16() as usize;
                let start = self.stack.len() - 2 * n;
                let mut fields = std::collections::HashMap::new();
                let pairs: Vec<(Value, Value)> = self.stack[start..]
                    .chunks(2)
                    .map(|kv| (kv[0], kv[1]))
                    .collect();
                for (k, v) in pairs {
                    let key_str = self.value_as_field_name(k)?;
                    fields.insert(key_str, v);
                }
                self.stack.truncate(start);
                let obj = self.heap.alloc(Object::UserObject(UserObj { fields, proto: None }));
                self.push(Value::Obj(obj));
            }
            OpCode::GetObject => {
                let key = self.pop();
                let receiver = self.pop();
                let key_str = self.value_as_field_name(key)?;
                let v = self.get_field(receiver, &key_str)?.unwrap_or(Value::Nil);
                self.push(v);
            }
            OpCode::SetObject => {
                let key = self.pop();
                let receiver = self.pop();
                let value = *self.stack.last().expect("assignment rhs on stack");
                let key_str = self.value_as_field_name(key)?;
                self.set_field(receiver, &key_str, value)?;
            }
            OpCode::Index => {
                let key = self.pop();
                let receiver = self.pop();
                let v = self.index_get(receiver, key)?;
                self.push(v);
            }
            OpCode::NewIndex => {
                let key = self.pop();
                let receiver = self.pop();
                let value = *self.stack.last().expect("assignment rhs on stack");
                self.index_set(receiver, key, value)?;
            }
            OpCode::IncObject => {
                let delta = self.read_u8() as i32 - 128;
                let name = self.read_constant();
                let key_str = self.value_as_field_name(name)?;
                let receiver = *self.stack.last().expect("receiver on stack");
                let old = self.get_field(receiver, &key_str)?.unwrap_or(Value::Nil);
                let old_n = self.expect_number(old)?;
                let updated = Value::Number(old_n + delta as f64);
                self.set_field(receiver, &key_str, updated)?;
                self.stack.pop();
                self.push(updated);
            }
            OpCode::IncIndex => {
                let delta = self.read_u8() as i32 - 128;
                let key = self.pop();
                let receiver = self.pop();
                let old = self.index_get(receiver, key)?;
                let old_n = self.expect_number(old)?;
                let updated = Value::Number(old_n + delta as f64);
                self.index_set(receiver, key, updated)?;
                self.push(updated);
            }

            OpCode::Iter => {
                let v = self.pop();
                let advance = self.make_iterator(v)?;
                self.push(advance);
            }
            OpCode::Next => {
                let n = self.read_u8();
                let exit = self.read_u16();
                let advance = *self.stack.last().expect("iterator advance-callable on stack");
                let base = self.stack.len();
                self.invoke_advance(advance, n)?;
                let first = self.stack[base];
                if first.is_nil() {
                    self.stack.truncate(base);
                    let idx = self.frames.len() - 1;
                    self.frames[idx].ip += exit as usize;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Arithmetic / comparison helpers
    // -----------------------------------------------------------------

    fn expect_number(&self, v: Value) -> Result<f64, VmError> {
        v.as_number()
            .ok_or_else(|| VmError::Type { message: format!("expected number, got {}", v.type_name()) })
    }

    fn binary_numeric(&mut self, f: impl Fn(f64, f64) -> Result<f64, String>) -> Result<(), VmError> {
        let b = self.pop();
        let a = self.pop();
        let an = self.expect_number(a)?;
        let bn = self.expect_number(b)?;
        let r = f(an, bn).map_err(|message| VmError::Arithmetic { message })?;
        self.push(Value::Number(r));
        Ok(())
    }

    fn compare(&mut self, accept: impl Fn(std::cmp::Ordering) -> bool) -> Result<(), VmError> {
        let b = self.pop();
        let a = self.pop();
        let an = self.expect_number(a)?;
        let bn = self.expect_number(b)?;
        let ord = an.partial_cmp(&bn).ok_or_else(|| VmError::Arithmetic {
            message: "cannot compare NaN".to_string(),
        })?;
        self.push(Value::Bool(accept(ord)));
        Ok(())
    }

    pub(crate) fn values_equal(&self, a: Value, b: Value) -> bool {
        match (a, b) {
            (Value::Obj(ra), Value::Obj(rb)) if ra != rb => {
                matches!(
                    (self.heap.get(ra), self.heap.get(rb)),
                    (Object::Str(_), Object::Str(_))
                ) && ra == rb
            }
            _ => a == b,
        }
    }

    fn op_count(&self, v: Value) -> Result<usize, VmError> {
        match v {
            Value::Obj(r) => self
                .heap
                .get(r)
                .length()
                .ok_or_else(|| VmError::Type { message: format!("cannot take length of {}", v.type_name()) }),
            _ => Err(VmError::Type { message: format!("cannot take length of {}", v.type_name()) }),
        }
    }

    pub(crate) fn display_string(&self, v: Value) -> Result<String, VmError> {
        Ok(match v {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Obj(r) => match self.heap.get(r) {
                Object::Str(s) => s.to_string(),
                _ => return Err(VmError::Type { message: format!("cannot concatenate {}", v.type_name()) }),
            },
        })
    }

    fn op_concat(&mut self, n: usize) -> Result<(), VmError> {
        let start = self.stack.len() - n;
        let mut out = String::new();
        for v in self.stack[start..].to_vec() {
            out.push_str(&self.display_string(v)?);
        }
        self.stack.truncate(start);
        let r = self.heap.intern_take(out);
        self.push(Value::Obj(r));
        Ok(())
    }

    fn inc_slot(&mut self, slot: usize, delta: i32) -> Result<Value, VmError> {
        let old = self.expect_number(self.stack[slot])?;
        let updated = Value::Number(old + delta as f64);
        self.stack[slot] = updated;
        Ok(updated)
    }

    // -----------------------------------------------------------------
    // Upvalues
    // -----------------------------------------------------------------

    fn upvalue_ref(&self, index: usize) -> ObjRef {
        let Object::Closure(c) = self.heap.get(self.frame().closure) else {
            panic!("frame closure is not a Closure object");
        };
        c.upvalues[index]
    }

    fn read_upvalue(&self, r: ObjRef) -> Value {
        match self.heap.get(r) {
            Object::Upvalue(u) => match u.state {
                UpvalueState::Open(addr) => self.stack[addr],
                UpvalueState::Closed(v) => v,
            },
            _ => panic!("upvalue slot is not an Upvalue object"),
        }
    }

    fn write_upvalue(&mut self, r: ObjRef, value: Value) {
        let addr = match self.heap.get(r) {
            Object::Upvalue(u) => match u.state {
                UpvalueState::Open(addr) => Some(addr),
                UpvalueState::Closed(_) => None,
            },
            _ => panic!("upvalue slot is not an Upvalue object"),
        };
        match addr {
            Some(addr) => self.stack[addr] = value,
            None => {
                if let Object::Upvalue(u) = self.heap.get_mut(r) {
                    u.state = UpvalueState::Closed(value);
                }
            }
        }
    }

    /// Find or create the open upvalue pointing at stack address `addr`,
    /// keeping [`Vm::open_upvalues`] sorted descending by address.
    fn capture_upvalue(&mut self, addr: usize) -> ObjRef {
        for &r in &self.open_upvalues {
            if let Object::Upvalue(u) = self.heap.get(r) {
                if let UpvalueState::Open(a) = u.state {
                    if a == addr {
                        return r;
                    }
                }
            }
        }
        let r = self.heap.alloc(Object::Upvalue(UpvalueObj { state: UpvalueState::Open(addr) }));
        let pos = self.open_upvalues.iter().position(|&existing| {
            matches!(self.heap.get(existing), Object::Upvalue(u) if matches!(u.state, UpvalueState::Open(a) if a < addr))
        });
        match pos {
            Some(i) => self.open_upvalues.insert(i, r),
            None => self.open_upvalues.push(r),
        }
        r
    }

    /// Close every open upvalue pointing at or above stack address `from`.
    pub(crate) fn close_upvalues_above(&mut self, from: usize) {
        while let Some(&r) = self.open_upvalues.first() {
            let addr = match self.heap.get(r) {
                Object::Upvalue(u) => match u.state {
                    UpvalueState::Open(a) => a,
                    UpvalueState::Closed(_) => break,
                },
                _ => break,
            };
            if addr < from {
                break;
            }
            let value = self.stack[addr];
            if let Object::Upvalue(u) = self.heap.get_mut(r) {
                u.state = UpvalueState::Closed(value);
            }
            self.open_upvalues.remove(0);
        }
    }

    // -----------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------

    /// Invoke a value and run it to completion before returning, unlike
    /// [`Vm::invoke_value`] alone (which, for a Closure, only pushes the
    /// frame and lets the ordinary fetch-decode loop step through it).
    /// Needed wherever a single opcode's handling must see the callee's
    /// results immediately - `NEXT`'s advance-callable and `ITER`'s
    /// `__iter` lookup - rather than resuming the outer loop and reading
    /// results on a later iteration.
    fn call_sync(&mut self, argc: u8, expected: u8) -> Result<(), VmError> {
        let floor_frames = self.frames.len();
        self.invoke_value(argc, expected)?;
        self.run_until(floor_frames)
    }

    /// `CALL argc expected` (`spec.md` §4.3, "Call discipline").
    pub(crate) fn invoke_value(&mut self, argc: u8, expected: u8) -> Result<(), VmError> {
        self.check_stack()?;
        let callee_slot = self.stack.len() - argc as usize - 1;
        let callee = self.stack[callee_slot];
        match callee {
            Value::Obj(r) => match self.heap.get(r).clone() {
                Object::Native(n) => {
                    let before = self.stack.len();
                    self.native_frames.push((callee_slot + 1, argc));
                    let call_result = (n.func)(self);
                    self.native_frames.pop();
                    call_result.map_err(|e| VmError::User { message: e.0 })?;
                    let results = self.stack.split_off(before);
                    self.stack.truncate(callee_slot);
                    self.push_reconciled(results, expected);
                    Ok(())
                }
                Object::Closure(c) => {
                    let Object::Function(f) = self.heap.get(c.function) else {
                        panic!("closure's function slot is not a Function object");
                    };
                    let arity = f.arity as usize;
                    let is_variadic = f.is_variadic;
                    self.align_call_args(callee_slot, argc as usize, arity, is_variadic);
                    self.frames.push(CallFrame { closure: r, ip: 0, base: callee_slot, expected });
                    Ok(())
                }
                other => Err(VmError::Type {
                    message: format!("attempt to call a {} value", object_kind_name(&other)),
                }),
            },
            _ => Err(VmError::Type { message: format!("attempt to call a {} value", callee.type_name()) }),
        }
    }

    /// `INVOKE key argc expected`: field lookup on the receiver sitting
    /// where `CALL`'s callee would be, then a call with the receiver
    /// spliced in as argument 0 (`spec.md` §4.3, "Method dispatch").
    fn invoke_method(&mut self, key: ObjRef, argc: u8, expected: u8) -> Result<(), VmError> {
        let receiver_slot = self.stack.len() - argc as usize - 1;
        let receiver = self.stack[receiver_slot];
        let key_str = match self.heap.get(key) {
            Object::Str(s) => s.to_string(),
            _ => panic!("INVOKE key constant is not a string"),
        };
        let method = self
            .get_field(receiver, &key_str)?
            .ok_or_else(|| VmError::Type { message: format!("attempt to call missing method '{key_str}'") })?;
        self.stack.insert(receiver_slot, method);
        self.invoke_value(argc + 1, expected)
    }

    /// Pad/truncate the caller's `argc` arguments to the callee's fixed
    /// arity, then (if variadic) collect any surplus into a trailing
    /// Table bound to the variadic slot (`spec.md` §4.2, "receives extra
    /// args as a table").
    fn align_call_args(&mut self, callee_slot: usize, argc: usize, arity: usize, is_variadic: bool) {
        for _ in 0..(arity.saturating_sub(argc)) {
            self.stack.push(Value::Nil);
        }
        let fixed_end = callee_slot + 1 + arity;
        if argc > arity {
            let extra: Vec<Value> = self.stack[fixed_end..callee_slot + 1 + argc].to_vec();
            self.stack.truncate(fixed_end);
            if is_variadic {
                let mut table = TableObj::new();
                for (i, v) in extra.into_iter().enumerate() {
                    table.insert(Value::Number((i + 1) as f64), v);
                }
                let obj = self.heap.alloc(Object::Table(table));
                self.stack.push(Value::Obj(obj));
            }
        } else if is_variadic {
            let obj = self.heap.alloc(Object::Table(TableObj::new()));
            self.stack.push(Value::Obj(obj));
        }
    }

    fn push_reconciled(&mut self, mut results: Vec<Value>, expected: u8) {
        results.resize(expected as usize, Value::Nil);
        self.stack.extend(results);
    }

    /// `RETURN n`: copy the top `n` values down over the callee and its
    /// arguments, pop the frame, and reconcile against the caller's
    /// `expected` count.
    fn do_return(&mut self, n: usize) {
        let frame = self.frames.pop().expect("RETURN with no active frame");
        self.close_upvalues_above(frame.base);
        let top = self.stack.len();
        let results = self.stack[top - n..].to_vec();
        self.stack.truncate(frame.base);
        self.push_reconciled(results, frame.expected);
    }

    // -----------------------------------------------------------------
    // Fields, indexing, and proto-chain lookup
    // -----------------------------------------------------------------

    pub(crate) fn value_as_field_name(&self, v: Value) -> Result<String, VmError> {
        match v {
            Value::Obj(r) => match self.heap.get(r) {
                Object::Str(s) => Ok(s.to_string()),
                _ => Err(VmError::Type { message: "field name must be a string".to_string() }),
            },
            _ => Err(VmError::Type { message: "field name must be a string".to_string() }),
        }
    }

    fn proto_of(&self, receiver: Value) -> Option<ObjRef> {
        let Value::Obj(r) = receiver else { return None };
        match self.heap.get(r) {
            Object::Table(t) => t.proto,
            Object::UserObject(o) => o.proto,
            Object::Str(_) => self.heap.proto_for(ObjectTag::String),
            _ => None,
        }
    }

    fn own_field(&self, obj: ObjRef, key: &str) -> Option<Value> {
        match self.heap.get(obj) {
            Object::Table(t) => {
                let key_obj = self.heap.find_interned(key)?;
                t.get(&Value::Obj(key_obj))
            }
            Object::UserObject(o) => o.fields.get(key).copied(),
            _ => None,
        }
    }

    /// Walk `receiver`'s own storage, then its proto chain, for `key`.
    pub(crate) fn get_field(&self, receiver: Value, key: &str) -> Result<Option<Value>, VmError> {
        if key == "__proto" {
            return Ok(self.proto_of(receiver).map(Value::Obj));
        }
        let Value::Obj(r) = receiver else {
            return Err(VmError::Type {
                message: format!("attempt to index a {} value", receiver.type_name()),
            });
        };
        if let Some(v) = self.own_field(r, key) {
            return Ok(Some(v));
        }
        let mut current = self.proto_of(receiver);
        for _ in 0..MAX_PROTO_DEPTH {
            let Some(proto_ref) = current else { break };
            if let Some(v) = self.own_field(proto_ref, key) {
                return Ok(Some(v));
            }
            current = match self.heap.get(proto_ref) {
                Object::Table(t) => t.proto,
                Object::UserObject(o) => o.proto,
                _ => None,
            };
        }
        Ok(None)
    }

    pub(crate) fn set_field(&mut self, receiver: Value, key: &str, value: Value) -> Result<(), VmError> {
        let Value::Obj(r) = receiver else {
            return Err(VmError::Type {
                message: format!("attempt to index a {} value", receiver.type_name()),
            });
        };
        if key == "__proto" {
            let proto = match value {
                Value::Obj(p) => Some(p),
                Value::Nil => None,
                _ => return Err(VmError::Type { message: "__proto must be an object or nil".to_string() }),
            };
            match self.heap.get_mut(r) {
                Object::Table(t) => t.proto = proto,
                Object::UserObject(o) => o.proto = proto,
                _ => return Err(VmError::Type { message: "value has no prototype slot".to_string() }),
            }
            return Ok(());
        }
        if matches!(self.heap.get(r), Object::Table(_)) {
            let key_obj = self.heap.intern_copy(key);
            if let Object::Table(t) = self.heap.get_mut(r) {
                t.insert(Value::Obj(key_obj), value);
            }
            return Ok(());
        }
        match self.heap.get_mut(r) {
            Object::UserObject(o) => {
                o.fields.insert(key.into(), value);
                Ok(())
            }
            _ => Err(VmError::Type { message: "value has no fields".to_string() }),
        }
    }

    pub(crate) fn index_get(&mut self, receiver: Value, key: Value) -> Result<Value, VmError> {
        match receiver {
            Value::Obj(r) => match self.heap.get(r) {
                Object::Table(t) => {
                    if let Some(v) = t.get(&key) {
                        return Ok(v);
                    }
                    match self.value_as_field_name(key) {
                        Ok(name) => Ok(self.get_field(receiver, &name)?.unwrap_or(Value::Nil)),
                        Err(_) => Ok(Value::Nil),
                    }
                }
                _ => {
                    let name = self.value_as_field_name(key)?;
                    self.get_field(receiver, &name).map(|v| v.unwrap_or(Value::Nil))
                }
            },
            _ => Err(VmError::Type { message: format!("attempt to index a {} value", receiver.type_name()) }),
        }
    }

    pub(crate) fn index_set(&mut self, receiver: Value, key: Value, value: Value) -> Result<(), VmError> {
        match receiver {
            Value::Obj(r) => match self.heap.get_mut(r) {
                Object::Table(t) => {
                    t.insert(key, value);
                    Ok(())
                }
                _ => {
                    let name = self.value_as_field_name(key)?;
                    self.set_field(receiver, &name, value)
                }
            },
            _ => Err(VmError::Type { message: format!("attempt to index a {} value", receiver.type_name()) }),
        }
    }

    // -----------------------------------------------------------------
    // Iteration
    // -----------------------------------------------------------------

    /// `ITER`: replace the value with a stateful advance-callable
    /// (`spec.md` §4.3, "Iterator protocol"). Tables get a built-in
    /// position-tracking iterator; anything already callable is used
    /// as-is; anything else is resolved through a `__iter` proto method.
    fn make_iterator(&mut self, v: Value) -> Result<Value, VmError> {
        if let Value::Obj(r) = v {
            if matches!(self.heap.get(r), Object::Closure(_) | Object::Native(_)) {
                return Ok(v);
            }
            if matches!(self.heap.get(r), Object::Table(_)) {
                return Ok(Value::Obj(self.new_table_iterator(r)));
            }
        }
        let method = self
            .get_field(v, "__iter")?
            .ok_or_else(|| VmError::Type { message: format!("{} value is not iterable", v.type_name()) })?;
        let base = self.stack.len();
        self.push(method);
        self.push(v);
        self.call_sync(1, 1)?;
        let advance = self.stack[base];
        self.stack.truncate(base);
        Ok(advance)
    }

    /// Invoke a `NEXT` advance-callable: either an ordinary Closure/Native
    /// (used as-is, called with no arguments), or a Table's built-in
    /// iterator state object, called through its proto's `__call` field
    /// with itself spliced in as the receiver.
    fn invoke_advance(&mut self, advance: Value, expected: u8) -> Result<(), VmError> {
        if let Value::Obj(r) = advance {
            if matches!(self.heap.get(r), Object::Closure(_) | Object::Native(_)) {
                self.push(advance);
                return self.call_sync(0, expected);
            }
        }
        let method = self
            .get_field(advance, "__call")?
            .ok_or_else(|| VmError::Type { message: "value is not iterable".to_string() })?;
        self.push(method);
        self.push(advance);
        self.call_sync(1, expected)
    }

    fn new_table_iterator(&mut self, table: ObjRef) -> ObjRef {
        let proto = self.table_iterator_proto();
        let mut fields = std::collections::HashMap::new();
        fields.insert("__table".into(), Value::Obj(table));
        fields.insert("__index".into(), Value::Number(0.0));
        self.heap.alloc(Object::UserObject(UserObj { fields, proto: Some(proto) }))
    }

    fn table_iterator_proto(&mut self) -> ObjRef {
        if let Some(r) = self.table_iter_proto {
            return r;
        }
        let mut fields = std::collections::HashMap::new();
        let native = self
            .heap
            .alloc(Object::Native(cosmo_core::NativeObj { name: "__call".into(), func: crate::iter::table_iterator_advance }));
        fields.insert("__call".into(), Value::Obj(native));
        let proto = self.heap.alloc(Object::UserObject(UserObj { fields, proto: None }));
        self.table_iter_proto = Some(proto);
        proto
    }
}

fn object_kind_name(o: &Object) -> &'static str {
    match o {
        Object::Str(_) => "string",
        Object::Function(_) => "function",
        Object::Closure(_) => "function",
        Object::Upvalue(_) => "upvalue",
        Object::Native(_) => "function",
        Object::Table(_) => "table",
        Object::UserObject(_) => "object",
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
