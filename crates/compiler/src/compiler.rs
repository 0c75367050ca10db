//! Single-pass Pratt-style compiler (`spec.md` §4.2).
//!
//! Parses tokens from the [`Lexer`] and emits bytecode directly into a
//! [`Chunk`] as it goes - there is no intermediate AST. A stack of
//! [`FunctionFrame`]s tracks one frame per function currently being
//! compiled, innermost last, mirroring the enclosing-pointer chain of the
//! reference implementation's `CCompilerState`.

use cosmo_core::{Chunk, Heap, ObjRef, OpCode, Value};

use crate::error::CompileError;
use crate::lexer::{Lexer, Token, TokenType};

mod expressions;
mod functions;
mod statements;
mod variables;

const MAX_LOCALS: usize = 256;
const MAX_UPVALUES: usize = 256;

struct Local {
    name: String,
    depth: i32,
    captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueSlot {
    index: u8,
    is_local: bool,
}

struct LoopState {
    /// Scope depth the loop was entered at; `break`/`continue` pop locals
    /// declared deeper than this without touching the compile-time local
    /// count, since the logical scope is still open.
    scope_depth: i32,
    /// Where `continue` jumps back to - the condition for `while`, the
    /// iterator clause for C-style `for`, the `NEXT` instruction for
    /// foreach (`spec.md` §4.2).
    continue_target: usize,
    break_patches: Vec<usize>,
    /// Extra raw pops `break` must emit beyond `scope_depth` - used by
    /// foreach to also discard its anonymous iterator slot, which sits at
    /// exactly `scope_depth` and so isn't covered by the usual
    /// pop-locals-above-depth walk.
    extra_break_pop: u8,
}

#[derive(PartialEq)]
enum FunctionKind {
    Script,
    Function,
    Method,
}

struct FunctionFrame {
    chunk: Chunk,
    arity: u8,
    is_variadic: bool,
    name: Option<ObjRef>,
    kind: FunctionKind,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueSlot>,
    scope_depth: i32,
    pushed_values: i32,
    loops: Vec<LoopState>,
}

impl FunctionFrame {
    pub(crate) fn new(kind: FunctionKind, name: Option<ObjRef>) -> Self {
        // Slot 0 is reserved for the callee itself (`spec.md` §4.2,
        // "Function compilation"); it has no surface name, so user code can
        // never shadow or reference it by name. A method's receiver is
        // just its first ordinary declared parameter, conventionally named
        // `self` by the source program - not this slot.
        FunctionFrame {
            chunk: Chunk::new(),
            arity: 0,
            is_variadic: false,
            name,
            kind,
            locals: vec![Local {
                name: String::new(),
                depth: 0,
                captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
            pushed_values: 0,
            loops: Vec::new(),
        }
    }
}

pub struct Compiler<'a, 'src> {
    lexer: Lexer<'src>,
    heap: &'a mut Heap,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    module_name: ObjRef,
    frames: Vec<FunctionFrame>,
}

/// Result of a successful compile: the top-level script function, already
/// allocated on the heap, and its upvalue descriptor list (always empty
/// for the top level, kept for symmetry with nested closures).
pub struct CompiledScript {
    pub function: ObjRef,
}

impl<'a, 'src> Compiler<'a, 'src> {
    pub fn compile(
        heap: &'a mut Heap,
        source: &'src str,
        module_name: &str,
    ) -> Result<CompiledScript, Vec<CompileError>> {
        heap.freeze();
        let result = Self::compile_inner(heap, source, module_name);
        heap.unfreeze();
        result
    }

    pub(crate) fn compile_inner(
        heap: &'a mut Heap,
        source: &'src str,
        module_name: &str,
    ) -> Result<CompiledScript, Vec<CompileError>> {
        let module_ref = heap.intern_copy(module_name);
        let mut lexer = Lexer::new(source);
        let first = lexer.next_token();
        let mut compiler = Compiler {
            lexer,
            heap,
            current: first,
            previous: first,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            module_name: module_ref,
            frames: vec![FunctionFrame::new(FunctionKind::Script, None)],
        };

        while !compiler.check(TokenType::Eof) {
            compiler.declaration();
        }
        compiler.consume_eof();

        let function = compiler.end_function();
        if compiler.had_error {
            Err(compiler.errors)
        } else {
            Ok(CompiledScript { function })
        }
    }

    // ---------------------------------------------------------------
    // Token stream plumbing
    // ---------------------------------------------------------------

    pub(crate) fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenType::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    pub(crate) fn check(&self, kind: TokenType) -> bool {
        self.current.kind == kind
    }

    pub(crate) fn match_token(&mut self, kind: TokenType) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    pub(crate) fn consume(&mut self, kind: TokenType, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    pub(crate) fn consume_eof(&mut self) {
        if !self.check(TokenType::Eof) {
            self.error_at_current("expected end of input");
        }
    }

    pub(crate) fn skip_statement_terminator(&mut self) {
        self.match_token(TokenType::Semicolon);
    }

    // ---------------------------------------------------------------
    // Error reporting & panic-mode recovery (`spec.md` §4.2, "Error recovery")
    // ---------------------------------------------------------------

    pub(crate) fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current.line, message);
    }

    pub(crate) fn error(&mut self, message: &str) {
        self.error_at(self.previous.line, message);
    }

    pub(crate) fn error_at(&mut self, line: u32, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(CompileError {
            line,
            message: message.to_string(),
        });
    }

    pub(crate) fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenType::Eof {
            if self.previous.kind == TokenType::Semicolon {
                return;
            }
            match self.current.kind {
                TokenType::If
                | TokenType::While
                | TokenType::For
                | TokenType::Function
                | TokenType::Proto
                | TokenType::Local
                | TokenType::Var
                | TokenType::Return
                | TokenType::End
                | TokenType::Break
                | TokenType::Continue => return,
                _ => {}
            }
            self.advance();
        }
    }

    // ---------------------------------------------------------------
    // Frame accessors
    // ---------------------------------------------------------------

    pub(crate) fn frame(&self) -> &FunctionFrame {
        self.frames.last().expect("at least one frame")
    }

    pub(crate) fn frame_mut(&mut self) -> &mut FunctionFrame {
        self.frames.last_mut().expect("at least one frame")
    }

    pub(crate) fn line(&self) -> u32 {
        self.previous.line
    }

    // ---------------------------------------------------------------
    // Bytecode emission helpers
    // ---------------------------------------------------------------

    pub(crate) fn emit_u8(&mut self, byte: u8) {
        let line = self.line();
        self.frame_mut().chunk.write_u8(byte, line);
    }

    pub(crate) fn emit_op(&mut self, op: OpCode) {
        let line = self.line();
        self.frame_mut().chunk.write_op(op, line);
    }

    pub(crate) fn emit_u16(&mut self, value: u16) {
        let line = self.line();
        self.frame_mut().chunk.write_u16(value, line);
    }

    pub(crate) fn adjust_stack(&mut self, delta: i32) {
        self.frame_mut().pushed_values += delta;
    }

    /// Emit `op` then a placeholder 16-bit operand; returns the operand's
    /// byte offset for later [`Compiler::patch_jump`].
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        let at = self.frame().chunk.len();
        self.emit_u16(0xFFFF);
        at
    }

    pub(crate) fn patch_jump(&mut self, at: usize) {
        let target = self.frame().chunk.len();
        let offset = target - at - 2;
        if offset > u16::MAX as usize {
            self.error("jump target too far to encode in 16 bits");
            return;
        }
        self.frame_mut().chunk.patch_u16(at, offset as u16);
    }

    pub(crate) fn emit_loop_back(&mut self, loop_start: usize) {
        self.emit_op(OpCode::JmpBack);
        let after_operand = self.frame().chunk.len() + 2;
        if after_operand < loop_start {
            self.error("loop body too large to encode backward jump");
            self.emit_u16(0);
            return;
        }
        let offset = after_operand - loop_start;
        if offset > u16::MAX as usize {
            self.error("loop body too large to encode backward jump");
        }
        self.emit_u16(offset as u16);
    }

    pub(crate) fn current_offset(&self) -> usize {
        self.frame().chunk.len()
    }

    pub(crate) fn make_constant(&mut self, value: Value) -> u16 {
        self.frame_mut().chunk.add_constant(value)
    }

    pub(crate) fn identifier_constant(&mut self, name: &str) -> u16 {
        let r = self.heap.intern_copy(name);
        self.make_constant(Value::Obj(r))
    }

    // ---------------------------------------------------------------
    // Scope management (`spec.md` §4.2, "Scope discipline")
    // ---------------------------------------------------------------

    pub(crate) fn begin_scope(&mut self) {
        self.frame_mut().scope_depth += 1;
    }

    pub(crate) fn end_scope(&mut self) {
        let frame = self.frame_mut();
        frame.scope_depth -= 1;
        let depth = frame.scope_depth;

        let mut pop_batch: u32 = 0;
        while let Some(local) = frame.locals.last() {
            if local.depth <= depth {
                break;
            }
            let local = frame.locals.pop().unwrap();
            if local.captured {
                if pop_batch > 0 {
                    self.flush_pop_batch(pop_batch);
                    pop_batch = 0;
                }
                self.emit_op(OpCode::Close);
                self.adjust_stack(-1);
            } else {
                pop_batch += 1;
            }
        }
        if pop_batch > 0 {
            self.flush_pop_batch(pop_batch);
        }
    }

    pub(crate) fn flush_pop_batch(&mut self, mut count: u32) {
        while count > 0 {
            let chunk_count = count.min(u8::MAX as u32);
            self.emit_op(OpCode::Pop);
            self.emit_u8(chunk_count as u8);
            self.adjust_stack(-(chunk_count as i32));
            count -= chunk_count;
        }
    }

    /// Emit raw `POP` instructions without touching `pushed_values` - used
    /// by `break`/`continue`, whose pops only fire along the jump-taken
    /// path, not the straight-line path the compile-time counter tracks.
    pub(crate) fn emit_raw_pop(&mut self, mut count: u32) {
        while count > 0 {
            let chunk_count = count.min(u8::MAX as u32);
            self.emit_op(OpCode::Pop);
            self.emit_u8(chunk_count as u8);
            count -= chunk_count;
        }
    }

    /// Emit pops (or `CLOSE`s, for captured locals) for every local
    /// declared deeper than `depth`, without removing them from the
    /// compiler's local list - the logical scope is still open on the
    /// straight-line path (`spec.md` §4.2, "break / continue").
    pub(crate) fn pop_locals_above(&mut self, depth: i32) {
        let count_above = self
            .frame()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth > depth)
            .count();
        if count_above == 0 {
            return;
        }
        let start = self.frame().locals.len() - count_above;
        let mut pop_batch: u32 = 0;
        for i in (start..self.frame().locals.len()).rev() {
            if self.frame().locals[i].captured {
                if pop_batch > 0 {
                    self.emit_raw_pop(pop_batch);
                    pop_batch = 0;
                }
                self.emit_op(OpCode::Close);
            } else {
                pop_batch += 1;
            }
        }
        if pop_batch > 0 {
            self.emit_raw_pop(pop_batch);
        }
    }

    pub(crate) fn declare_local(&mut self, name: &str) -> Result<(), ()> {
        let frame = self.frame_mut();
        if frame.locals.len() >= MAX_LOCALS {
            return Err(());
        }
        let depth = frame.scope_depth;
        for local in frame.locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                return Err(());
            }
        }
        frame.locals.push(Local {
            name: name.to_string(),
            depth,
            captured: false,
        });
        Ok(())
    }

    // ---------------------------------------------------------------
    // Variable resolution (`spec.md` §4.2, "Variable resolution")
    // ---------------------------------------------------------------

    pub(crate) fn resolve_local(&self, frame_idx: usize, name: &str) -> Option<u8> {
        let frame = &self.frames[frame_idx];
        for (i, local) in frame.locals.iter().enumerate().rev() {
            if local.name == name {
                return Some(i as u8);
            }
        }
        None
    }

    pub(crate) fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        if frame_idx == 0 {
            return None;
        }
        if let Some(local_idx) = self.resolve_local(frame_idx - 1, name) {
            self.frames[frame_idx - 1].locals[local_idx as usize].captured = true;
            return Some(self.add_upvalue(frame_idx, local_idx, true));
        }
        if let Some(up_idx) = self.resolve_upvalue(frame_idx - 1, name) {
            return Some(self.add_upvalue(frame_idx, up_idx, false));
        }
        None
    }

    pub(crate) fn add_upvalue(&mut self, frame_idx: usize, index: u8, is_local: bool) -> u8 {
        let frame = &mut self.frames[frame_idx];
        for (i, up) in frame.upvalues.iter().enumerate() {
            if up.index == index && up.is_local == is_local {
                return i as u8;
            }
        }
        frame.upvalues.push(UpvalueSlot { index, is_local });
        (frame.upvalues.len() - 1) as u8
    }

    // ---------------------------------------------------------------
    // Declarations & statements
    // ---------------------------------------------------------------

    pub(crate) fn declaration(&mut self) {
        if self.match_token(TokenType::Function) {
            self.function_declaration();
        } else if self.match_token(TokenType::Proto) {
            self.proto_declaration();
        } else if self.match_token(TokenType::Var) {
            self.var_declaration(false);
        } else if self.match_token(TokenType::Local) {
            self.var_declaration(true);
        } else {
            self.statement();
        }
        if self.panic_mode {
            self.synchronize();
        }
    }

    pub(crate) fn statement(&mut self) {
        if self.match_token(TokenType::If) {
            self.if_statement();
        } else if self.match_token(TokenType::While) {
            self.while_statement();
        } else if self.match_token(TokenType::For) {
            self.for_statement();
        } else if self.match_token(TokenType::Break) {
            self.break_statement();
        } else if self.match_token(TokenType::Continue) {
            self.continue_statement();
        } else if self.match_token(TokenType::Return) {
            self.return_statement();
        } else {
            self.expression_statement();
        }
    }

    pub(crate) fn expression_statement(&mut self) {
        let saved = self.frame().pushed_values;
        self.expression_default();
        self.skip_statement_terminator();
        self.align_stack(saved);
    }

    /// `spec.md` §4.2: after every statement, pop any surplus compile-time
    /// values (an expression-statement's result is always discarded).
    pub(crate) fn align_stack(&mut self, saved: i32) {
        let current = self.frame().pushed_values;
        if current > saved {
            let n = (current - saved) as u32;
            self.flush_pop_batch(n);
        } else if current < saved {
            self.error("internal error: statement underflowed the compile-time stack");
        }
    }
}
