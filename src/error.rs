//! Error types for the CIL to SIL translator

use thiserror::Error;

/// Translation errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Translation invariants
    /// Operand stack popped while empty
    ///
    /// **Triggered by:** A handler consuming more entries than the symbolic stack holds.
    /// This means the translator itself is wrong, not the input.
    #[error("Stack underflow in {method} at {instruction} ({location})")]
    StackUnderflow {
        /// Signature of the method being translated
        method: String,
        /// The instruction being translated
        instruction: String,
        /// Source location of the instruction
        location: String,
        /// Instructions translated so far, in visit order
        parsed: Vec<String>,
        /// Text dump of the procedure's nodes at the point of failure
        procedure: String,
    },

    // Input problems, the procedure is abandoned
    /// Opcode the translator has no handler for
    #[error("Unsupported opcode {opcode} at IL_{offset:04x}")]
    UnsupportedOpcode {
        /// Opcode mnemonic
        opcode: String,
        /// Byte offset of the instruction
        offset: i32,
    },

    /// Operand does not have the shape the opcode requires
    ///
    /// **Triggered by:** e.g. `ldfld` carrying a method reference, or a local index
    /// outside the declared locals.
    #[error("Invalid operand for {opcode} at IL_{offset:04x}: expected {expected}")]
    InvalidOperand {
        /// Opcode mnemonic
        opcode: String,
        /// Byte offset of the instruction
        offset: i32,
        /// Description of the expected operand
        expected: String,
    },

    /// Type shape the handler cannot model
    #[error("Unhandled type in {context}: {ty}")]
    UnhandledType {
        /// What was being translated
        context: String,
        /// The offending type
        ty: String,
    },

    /// An offset was memoized too many times
    #[error("Offset IL_{offset:04x} visited {visits} times, giving up")]
    VisitThresholdExceeded {
        /// Byte offset
        offset: i32,
        /// Memo entries at the offset
        visits: usize,
    },

    /// The worklist loop ran longer than allowed
    #[error("Translation exceeded {limit} iterations")]
    IterationLimitExceeded {
        /// Configured limit
        limit: usize,
    },

    /// Filter and fault handlers are not modelled
    #[error("Unsupported exception handler kind: {kind}")]
    UnsupportedExceptionHandler {
        /// Handler kind
        kind: String,
    },

    /// Protected region inside a catch or finally body
    #[error("Unsupported exception handler nesting at IL_{offset:04x}")]
    UnsupportedExceptionNesting {
        /// Try start offset of the nested region
        offset: i32,
    },

    /// Branch or handler refers to an offset with no instruction
    #[error("No instruction at IL_{offset:04x}")]
    MissingInstruction {
        /// Byte offset
        offset: i32,
    },

    // Skips
    /// Procedure signature already translated
    #[error("Duplicate procedure: {name}")]
    DuplicateProcedure {
        /// Procedure signature
        name: String,
    },

    /// Method without sequence points
    #[error("No debug information for {name}")]
    MissingDebugInfo {
        /// Procedure signature
        name: String,
    },

    // Output
    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(String),

    /// I/O failure while writing output
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic translation error
    #[error("Translation error: {0}")]
    TranslationError(String),
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorSeverity {
    /// Translator bug, escalate
    Fatal,
    /// Procedure abandoned, run continues
    Recoverable,
    /// Procedure skipped on purpose
    Warning,
}

impl Error {
    /// Create a translation error with a message
    pub fn translation(msg: impl Into<String>) -> Self {
        Error::TranslationError(msg.into())
    }

    /// Create an invalid-operand error
    pub fn invalid_operand(opcode: impl Into<String>, offset: i32, expected: impl Into<String>) -> Self {
        Error::InvalidOperand {
            opcode: opcode.into(),
            offset,
            expected: expected.into(),
        }
    }

    /// Create an unhandled-type error
    pub fn unhandled_type(context: impl Into<String>, ty: impl ToString) -> Self {
        Error::UnhandledType {
            context: context.into(),
            ty: ty.to_string(),
        }
    }

    /// Classify error severity
    pub fn classify(&self) -> ErrorSeverity {
        match self {
            Error::StackUnderflow { .. } => ErrorSeverity::Fatal,

            Error::DuplicateProcedure { .. } => ErrorSeverity::Warning,
            Error::MissingDebugInfo { .. } => ErrorSeverity::Warning,

            _ => ErrorSeverity::Recoverable,
        }
    }

    /// Whether the error was caused by an instruction the translator does not know
    pub fn is_unknown_instruction(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedOpcode { .. } | Error::InvalidOperand { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Result type for translator operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underflow_is_fatal() {
        let err = Error::StackUnderflow {
            method: "System.Void A::M()".to_string(),
            instruction: "IL_0000: pop".to_string(),
            location: "a.cs:1".to_string(),
            parsed: vec![],
            procedure: String::new(),
        };
        assert_eq!(err.classify(), ErrorSeverity::Fatal);
    }

    #[test]
    fn test_skips_are_warnings() {
        let err = Error::DuplicateProcedure {
            name: "x".to_string(),
        };
        assert_eq!(err.classify(), ErrorSeverity::Warning);
        assert_eq!(
            Error::translation("boom").classify(),
            ErrorSeverity::Recoverable
        );
    }

    #[test]
    fn test_offset_formatting() {
        let err = Error::UnsupportedOpcode {
            opcode: "calli".to_string(),
            offset: 0x1a,
        };
        assert_eq!(err.to_string(), "Unsupported opcode calli at IL_001a");
        assert!(err.is_unknown_instruction());
    }
}
