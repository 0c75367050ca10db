//! Value and object model for Cosmo.
//!
//! This crate is the leaf of the workspace's dependency order: the value
//! representation, the heap object variants, string interning, the
//! proto-object table, and the mark-sweep garbage collector all live here
//! with no dependency on the compiler or VM.

pub mod chunk;
pub mod gc;
pub mod object;
pub mod value;

pub use chunk::{Chunk, OpCode};
pub use gc::Heap;
pub use object::{
    ClosureObj, FunctionObj, NativeContext, NativeError, NativeFn, NativeObj, Object, ObjectTag,
    TableObj, UpvalueObj, UpvalueState, UserObj,
};
pub use value::{ObjRef, Value};
