//! Call frames (`spec.md` §4.3: "a stack of call frames, each frame
//! holding `{closure, instruction-pointer, base-of-stack-slot}`").

use cosmo_core::ObjRef;

pub(crate) struct CallFrame {
    pub(crate) closure: ObjRef,
    pub(crate) ip: usize,
    pub(crate) base: usize,
    /// The `expected` operand the call site supplied; `RETURN` reconciles
    /// the callee's actual return count against this.
    pub(crate) expected: u8,
}
