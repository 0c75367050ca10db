//! Runtime error type (`spec.md` §7, "Error handling design").

#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Operand of wrong variant at runtime.
    Type { message: String },
    /// Wrong argument count to a built-in or declared callable.
    Arity { message: String },
    /// Index outside string/table range.
    Bounds { message: String },
    /// Division by zero, or a non-numeric operand to an arithmetic op.
    Arithmetic { message: String },
    /// VM value or frame stack exhausted.
    StackOverflow,
    /// Raised explicitly by `error()` or `assert()`, or uncaught at the
    /// top level with no enclosing `pcall`.
    User { message: String },
}

impl VmError {
    pub fn message(&self) -> String {
        match self {
            VmError::Type { message }
            | VmError::Arity { message }
            | VmError::Bounds { message }
            | VmError::Arithmetic { message }
            | VmError::User { message } => message.clone(),
            VmError::StackOverflow => "stack overflow".to_string(),
        }
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for VmError {}
