//! Control-flow statement compilation (`spec.md` §4.2, "Control flow").

use cosmo_core::OpCode;

use super::{Compiler, LoopState};
use crate::lexer::TokenType;

impl<'a, 'src> Compiler<'a, 'src> {
    /// `if cond … (elseif cond …)* (else …)? end`. Each condition's false
    /// branch falls through to the next `elseif` check (or `else`, or the
    /// end); each true branch jumps past the rest of the chain.
    pub(crate) fn if_statement(&mut self) {
        let mut end_jumps = Vec::new();

        self.if_branch(&mut end_jumps);
        while self.match_token(TokenType::Elseif) {
            self.if_branch(&mut end_jumps);
        }
        if self.match_token(TokenType::Else) {
            self.begin_scope();
            while !self.check(TokenType::End) && !self.check(TokenType::Eof) {
                self.declaration();
            }
            self.end_scope();
        }
        self.consume(TokenType::End, "expected 'end' to close if statement");

        for jump in end_jumps {
            self.patch_jump(jump);
        }
    }

    fn if_branch(&mut self, end_jumps: &mut Vec<usize>) {
        self.expression_default();
        self.adjust_stack(-1); // PEJMP pops the condition regardless of outcome
        let else_jump = self.emit_jump(OpCode::Pejmp);

        self.begin_scope();
        while !self.check(TokenType::Elseif)
            && !self.check(TokenType::Else)
            && !self.check(TokenType::End)
            && !self.check(TokenType::Eof)
        {
            self.declaration();
        }
        self.end_scope();

        end_jumps.push(self.emit_jump(OpCode::Jmp));
        self.patch_jump(else_jump);
    }

    /// `while cond do … end`.
    pub(crate) fn while_statement(&mut self) {
        let loop_start = self.current_offset();
        self.expression_default();
        self.adjust_stack(-1);
        let exit_jump = self.emit_jump(OpCode::Pejmp);

        self.frame_mut().loops.push(LoopState {
            scope_depth: self.frame().scope_depth,
            continue_target: loop_start,
            break_patches: Vec::new(),
            extra_break_pop: 0,
        });

        self.consume(TokenType::Do, "expected 'do' after while condition");
        self.begin_scope();
        while !self.check(TokenType::End) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.end_scope();
        self.consume(TokenType::End, "expected 'end' to close while loop");

        self.emit_loop_back(loop_start);
        self.patch_jump(exit_jump);

        let loop_state = self.frame_mut().loops.pop().expect("loop state pushed above");
        for p in loop_state.break_patches {
            self.patch_jump(p);
        }
    }

    /// Dispatches to the C-style or foreach form based on what follows
    /// `for` (`spec.md` §4.2).
    pub(crate) fn for_statement(&mut self) {
        if self.check(TokenType::LeftParen) {
            self.c_style_for();
        } else {
            self.foreach_for();
        }
    }

    /// `for (init; cond; iter) do … end`. Preserves the "double jump"
    /// shape: a forward `JMP` over the iterator to the body, then a
    /// `JMPBACK` from the body to the iterator, then a `JMPBACK` from the
    /// iterator to the condition - so `continue` can land on the iterator.
    fn c_style_for(&mut self) {
        self.begin_scope();
        self.consume(TokenType::LeftParen, "expected '(' after 'for'");

        if self.match_token(TokenType::Semicolon) {
            // no initializer
        } else if self.match_token(TokenType::Var) {
            self.var_declaration(false);
        } else if self.match_token(TokenType::Local) {
            self.var_declaration(true);
        } else {
            let saved = self.frame().pushed_values;
            self.expression_default();
            self.align_stack(saved);
            self.consume(TokenType::Semicolon, "expected ';' after for-loop initializer");
        }

        let loop_start = self.current_offset();
        let mut exit_jump: Option<usize> = None;
        if !self.check(TokenType::Semicolon) {
            self.expression_default();
            self.adjust_stack(-1);
            exit_jump = Some(self.emit_jump(OpCode::Pejmp));
        }
        self.consume(TokenType::Semicolon, "expected ';' after for-loop condition");

        let body_jump = self.emit_jump(OpCode::Jmp);
        let increment_start = self.current_offset();
        if !self.check(TokenType::RightParen) {
            let saved = self.frame().pushed_values;
            self.expression_default();
            self.align_stack(saved);
        }
        self.consume(TokenType::RightParen, "expected ')' after for clauses");
        self.emit_loop_back(loop_start);
        self.patch_jump(body_jump);

        self.frame_mut().loops.push(LoopState {
            scope_depth: self.frame().scope_depth,
            continue_target: increment_start,
            break_patches: Vec::new(),
            extra_break_pop: 0,
        });

        self.consume(TokenType::Do, "expected 'do' before for-loop body");
        self.begin_scope();
        while !self.check(TokenType::End) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.end_scope();
        self.consume(TokenType::End, "expected 'end' to close for loop");

        self.emit_loop_back(increment_start);
        if let Some(ex) = exit_jump {
            self.patch_jump(ex);
        }

        let loop_state = self.frame_mut().loops.pop().expect("loop state pushed above");
        for p in loop_state.break_patches {
            self.patch_jump(p);
        }

        self.end_scope();
    }

    /// `for v1, v2, … in expr do … end`. The iterable occupies one
    /// anonymous local slot (replaced in place by `ITER`); the named loop
    /// variables live in a nested scope re-entered by `NEXT` every
    /// iteration, so the ordinary body-scope pops double as the
    /// per-iteration cleanup `continue` needs before looping back.
    fn foreach_for(&mut self) {
        self.begin_scope();

        let mut names = Vec::new();
        loop {
            self.consume(TokenType::Identifier, "expected loop variable name");
            names.push(self.previous.lexeme.to_string());
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        self.consume(TokenType::In, "expected 'in' in for-each loop");

        let saved = self.frame().pushed_values;
        self.expression_default();
        debug_assert_eq!(self.frame().pushed_values, saved + 1);
        self.emit_op(OpCode::Iter);
        if self.declare_local("").is_err() {
            self.error("too many local variables in function");
        }
        let iterator_depth = self.frame().scope_depth;

        let loop_start = self.current_offset();

        self.begin_scope();
        self.emit_op(OpCode::Next);
        self.emit_u8(names.len() as u8);
        let exit_at = self.current_offset();
        self.emit_u16(0xFFFF);
        self.adjust_stack(names.len() as i32);
        for name in &names {
            if self.declare_local(name).is_err() {
                self.error("too many local variables in function, or duplicate name in this scope");
            }
        }

        self.frame_mut().loops.push(LoopState {
            scope_depth: iterator_depth,
            continue_target: loop_start,
            break_patches: Vec::new(),
            extra_break_pop: 1,
        });

        self.consume(TokenType::Do, "expected 'do' before for-loop body");
        while !self.check(TokenType::End) && !self.check(TokenType::Eof) {
            self.declaration();
        }
        self.consume(TokenType::End, "expected 'end' to close for loop");

        let loop_state = self.frame_mut().loops.pop().expect("loop state pushed above");

        self.end_scope();
        self.emit_loop_back(loop_start);
        self.patch_jump(exit_at);

        self.end_scope();

        for p in loop_state.break_patches {
            self.patch_jump(p);
        }
    }

    pub(crate) fn break_statement(&mut self) {
        self.skip_statement_terminator();
        if self.frame().loops.is_empty() {
            self.error("'break' outside of a loop");
            return;
        }
        let loop_state = self.frame().loops.last().unwrap();
        let depth = loop_state.scope_depth;
        let extra = loop_state.extra_break_pop;

        self.pop_locals_above(depth);
        if extra > 0 {
            self.emit_raw_pop(extra as u32);
        }
        let patch = self.emit_jump(OpCode::Jmp);
        self.frame_mut().loops.last_mut().unwrap().break_patches.push(patch);
    }

    pub(crate) fn continue_statement(&mut self) {
        self.skip_statement_terminator();
        if self.frame().loops.is_empty() {
            self.error("'continue' outside of a loop");
            return;
        }
        let loop_state = self.frame().loops.last().unwrap();
        let depth = loop_state.scope_depth;
        let target = loop_state.continue_target;

        self.pop_locals_above(depth);
        self.emit_loop_back(target);
    }

    /// `return e1, e2, … ` / bare `return`.
    pub(crate) fn return_statement(&mut self) {
        if self.at_statement_end() {
            self.emit_op(OpCode::Nil);
            self.emit_op(OpCode::Return);
            self.emit_u8(1);
            self.skip_statement_terminator();
            return;
        }

        let mut count: u32 = 0;
        loop {
            self.expression_default();
            count += 1;
            if !self.match_token(TokenType::Comma) {
                break;
            }
        }
        if count > u8::MAX as u32 {
            self.error("too many return values");
        }
        self.emit_op(OpCode::Return);
        self.emit_u8(count as u8);
        self.skip_statement_terminator();
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.current.kind,
            TokenType::Semicolon
                | TokenType::End
                | TokenType::Eof
                | TokenType::Elseif
                | TokenType::Else
        )
    }
}
