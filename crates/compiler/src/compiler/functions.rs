//! Function, method, and `proto` compilation (`spec.md` §4.2, "Function
//! compilation" and "proto declarations").
//!
//! A nested function is compiled in its own [`super::FunctionFrame`]: push,
//! parse parameters and body, then [`Compiler::end_function`] finalizes the
//! frame into a heap-allocated `FunctionObj` and pops it, after which the
//! caller emits `CLOSURE` into the now-current (enclosing) frame together
//! with one `(is-local, index)` pair per captured upvalue.

use cosmo_core::{Object, ObjRef, OpCode, Value};

use super::{Compiler, FunctionFrame, FunctionKind};
use crate::lexer::TokenType;

impl<'a, 'src> Compiler<'a, 'src> {
    /// Finalize the innermost frame: append the `NIL; RETURN 1` trailing
    /// sentinel, pop it, and allocate the resulting `FunctionObj`.
    pub(crate) fn end_function(&mut self) -> ObjRef {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
        self.emit_u8(1);

        let frame = self.frames.pop().expect("end_function with no frame");
        let function = cosmo_core::FunctionObj {
            chunk: frame.chunk,
            arity: frame.arity,
            is_variadic: frame.is_variadic,
            upvalue_count: frame.upvalues.len() as u8,
            module_name: self.module_name,
            name: frame.name,
        };
        self.heap.alloc(Object::Function(function))
    }

    /// Compile `(params) body end`, then emit `CLOSURE` + upvalue pairs
    /// into the (now current again) enclosing frame. Leaves one value -
    /// the new closure - on the enclosing frame's compile-time stack.
    pub(crate) fn function_body(&mut self, kind: FunctionKind, name: Option<ObjRef>) {
        self.frames.push(FunctionFrame::new(kind, name));

        self.consume(TokenType::LeftParen, "expected '(' after function name");
        if !self.check(TokenType::RightParen) {
            loop {
                if self.match_token(TokenType::DotDotDot) {
                    self.frame_mut().is_variadic = true;
                    self.consume(TokenType::Identifier, "expected name for variadic parameter");
                    let name = self.previous.lexeme.to_string();
                    if self.declare_local(&name).is_err() {
                        self.error("duplicate parameter name");
                    }
                    break;
                }
                self.consume(TokenType::Identifier, "expected parameter name");
                let name = self.previous.lexeme.to_string();
                if self.frame().arity == u8::MAX {
                    self.error("too many parameters");
                } else {
                    self.frame_mut().arity += 1;
                }
                if self.declare_local(&name).is_err() {
                    self.error("duplicate parameter name");
                }
                if !self.match_token(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "expected ')' after parameters");

        while !self.check(TokenType::End) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::End, "expected 'end' to close function body");

        let upvalues = self.frame().upvalues.clone();
        let function_ref = self.end_function();

        let idx = self.make_constant(Value::Obj(function_ref));
        self.emit_op(OpCode::Closure);
        self.emit_u16(idx);
        for up in &upvalues {
            self.emit_u8(up.is_local as u8);
            self.emit_u8(up.index);
        }
        self.adjust_stack(1);
    }

    /// `function name(params) … end` (`spec.md` §6). Pre-declares the
    /// local binding before compiling the body so the function can call
    /// itself recursively by name.
    pub(crate) fn function_declaration(&mut self) {
        self.consume(TokenType::Identifier, "expected function name");
        let name = self.previous.lexeme.to_string();
        let is_local = self.frame().scope_depth > 0;
        if is_local && self.declare_local(&name).is_err() {
            self.error("too many local variables in function, or duplicate name in this scope");
        }

        let name_ref = self.heap.intern_copy(&name);
        self.function_body(FunctionKind::Function, Some(name_ref));

        if !is_local {
            let idx = self.identifier_constant(&name);
            self.emit_op(OpCode::SetGlobal);
            self.emit_u16(idx);
            self.emit_op(OpCode::Pop);
            self.emit_u8(1);
            self.adjust_stack(-1);
        }
    }

    /// `function (params) … end` used as an expression.
    pub(crate) fn function_expression(&mut self) {
        self.function_body(FunctionKind::Function, None);
    }

    /// `proto Name function m1(…) … end function m2(…) … end end`
    /// (`spec.md` §4.2, "proto declarations"): a sequence of
    /// `LOADCONST key; CLOSURE …` pairs, then `NEWOBJECT n(u16)`.
    pub(crate) fn proto_declaration(&mut self) {
        self.consume(TokenType::Identifier, "expected proto name");
        let name = self.previous.lexeme.to_string();
        let is_local = self.frame().scope_depth > 0;
        if is_local && self.declare_local(&name).is_err() {
            self.error("too many local variables in function, or duplicate name in this scope");
        }

        let mut count: u32 = 0;
        while self.match_token(TokenType::Function) {
            self.consume(TokenType::Identifier, "expected method name");
            let method_name = self.previous.lexeme.to_string();
            let key_idx = self.identifier_constant(&method_name);
            self.emit_op(OpCode::LoadConst);
            self.emit_u16(key_idx);
            self.adjust_stack(1);

            let method_ref = self.heap.intern_copy(&method_name);
            self.function_body(FunctionKind::Method, Some(method_ref));
            count += 1;
        }
        self.consume(TokenType::End, "expected 'end' to close proto declaration");

        if count > u16::MAX as u32 {
            self.error("too many methods in proto declaration");
        }
        self.emit_op(OpCode::NewObject);
        self.emit_u16(count as u16);
        self.adjust_stack(-(2 * count as i32) + 1);

        if !is_local {
            let idx = self.identifier_constant(&name);
            self.emit_op(OpCode::SetGlobal);
            self.emit_u16(idx);
            self.emit_op(OpCode::Pop);
            self.emit_u8(1);
            self.adjust_stack(-1);
        }
    }
}
