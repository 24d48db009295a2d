use thiserror::Error;

use crate::metadata::token::Token;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Conversion Planning
/// - [`Error::UnsupportedConversion`] - The slot pairing is recognized but has no rule yet
/// - [`Error::IllegalConversion`] - No rule can ever make the slot pairing valid
///
/// ## Method Adaptation
/// - [`Error::MissingInstance`] - An instance method was adapted without a receiver parameter
/// - [`Error::ArityMismatch`] - No binding strategy reconciles the parameter counts
/// - [`Error::AdaptationFailed`] - Top-level failure wrapping one of the causes above
///
/// ## Code Generation
/// - [`Error::InvalidOpcode`], [`Error::WrongOperandType`], [`Error::InvalidBranch`]
/// - [`Error::DuplicateLabel`], [`Error::UndefinedLabel`]
/// - [`Error::Malformed`] - Inconsistent method body (stack depth, label state, ...)
/// - [`Error::OutOfBounds`] - Decoding ran past the end of a body
///
/// ## Execution
/// - [`Error::ManagedException`] - A managed exception escaped the invoked delegate
/// - [`Error::LimitExceeded`] - An execution limit was reached
/// - [`Error::InvalidPointer`], [`Error::StackUnderflow`], [`Error::TypeMismatch`]
/// - [`Error::ArgumentCount`] - A delegate was invoked with the wrong number of arguments
///
/// # Examples
///
/// ```rust,no_run
/// use dotreflect::Error;
///
/// fn classify(err: &Error) -> &'static str {
///     match err {
///         Error::UnsupportedConversion { .. } => "not implemented yet",
///         Error::IllegalConversion { .. } => "impossible",
///         Error::ManagedException { .. } => "threw at runtime",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // Conversion planning
    /// The conversion planner recognizes the slot shapes but has no rule for them.
    ///
    /// Pointer types and `ref`/`in`/`out` crossings between differing types land here.
    /// Kept distinct from [`Error::IllegalConversion`] so that new rules can be added
    /// without changing the API.
    #[error("Conversion from '{source_slot}' to '{target_slot}' is not supported")]
    UnsupportedConversion {
        /// Rendered source slot
        source_slot: String,
        /// Rendered destination slot
        target_slot: String,
    },

    /// No rule can ever make this slot pairing valid.
    #[error("Cannot convert '{source_slot}' to '{target_slot}'")]
    IllegalConversion {
        /// Rendered source slot
        source_slot: String,
        /// Rendered destination slot
        target_slot: String,
    },

    // Adaptation
    /// An instance method was adapted to a delegate shape with no parameter to supply
    /// the receiver.
    #[error("Instance method '{method}' needs a receiver but the delegate has no parameters")]
    MissingInstance {
        /// Rendered method
        method: String,
    },

    /// The delegate shape and the callee parameter count cannot be reconciled by any
    /// binding strategy.
    #[error("Cannot bind {available} delegate parameter(s) to the {expected} parameter(s) of '{method}'")]
    ArityMismatch {
        /// Rendered method
        method: String,
        /// Number of parameters the callee declares
        expected: usize,
        /// Number of delegate parameters left after instance resolution
        available: usize,
    },

    /// Adapting a method to a delegate shape failed.
    ///
    /// Carries the callee, the target shape and the cause of the last failed strategy.
    #[error("Failed to adapt '{method}' to '{signature}' - {source}")]
    AdaptationFailed {
        /// Rendered callee
        method: String,
        /// Rendered target delegate signature
        signature: String,
        /// The cause
        source: Box<Error>,
    },

    // Code generation
    /// The opcode byte sequence is not a known instruction.
    #[error("Invalid opcode - {0}")]
    InvalidOpcode(String),

    /// The operand does not match what the instruction expects.
    #[error("Wrong operand type - expected {expected}")]
    WrongOperandType {
        /// Expected operand kind
        expected: String,
    },

    /// A branch could not be encoded.
    #[error("Invalid branch - {0}")]
    InvalidBranch(String),

    /// A label was defined twice.
    #[error("Duplicate label - {0}")]
    DuplicateLabel(String),

    /// A branch refers to a label that was never marked.
    #[error("Undefined label - {0}")]
    UndefinedLabel(String),

    /// A token operand does not resolve in the body's token table.
    #[error("Unresolved token - {0}")]
    UnresolvedToken(Token),

    /// The method body is inconsistent.
    ///
    /// Includes the source location where the problem was detected.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while decoding.
    #[error("Out of Bound read would have occurred - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    // Execution
    /// A managed exception escaped the invoked method.
    #[error("Unhandled {type_name}: {message}")]
    ManagedException {
        /// Full name of the exception type
        type_name: String,
        /// Exception message
        message: String,
    },

    /// An execution limit was reached.
    #[error("Execution limit reached - {limit} ({value})")]
    LimitExceeded {
        /// Which limit
        limit: &'static str,
        /// The configured value
        value: u64,
    },

    /// A managed pointer no longer refers to live storage.
    #[error("Invalid managed pointer - {0}")]
    InvalidPointer(String),

    /// An instruction popped from an empty evaluation stack.
    #[error("Evaluation stack underflow")]
    StackUnderflow,

    /// A value had the wrong shape for an operation.
    #[error("Type mismatch in '{operation}' - expected {expected}, found {found}")]
    TypeMismatch {
        /// Operation being performed
        operation: &'static str,
        /// Expected value kind
        expected: &'static str,
        /// Actual value kind
        found: String,
    },

    /// A delegate was invoked with the wrong number of arguments.
    #[error("Expected {expected} argument(s), got {found}")]
    ArgumentCount {
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        found: usize,
    },

    /// A method has no implementation to execute.
    #[error("Method '{0}' has no implementation")]
    NoImplementation(String),
}

impl Error {
    /// Returns the innermost cause, unwrapping [`Error::AdaptationFailed`] layers.
    #[must_use]
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::AdaptationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Creates a managed-exception error for a BCL exception type.
    pub(crate) fn managed(type_name: &str, message: impl Into<String>) -> Self {
        Error::ManagedException {
            type_name: type_name.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_adaptation_failures() {
        let inner = Error::IllegalConversion {
            source_slot: "System.DateTime".to_string(),
            target_slot: "System.Guid".to_string(),
        };
        let err = Error::AdaptationFailed {
            method: "Demo.Take".to_string(),
            signature: "(System.DateTime)->System.Void".to_string(),
            source: Box::new(inner.clone()),
        };

        assert_eq!(err.root_cause(), &inner);
        assert!(err.to_string().contains("Demo.Take"));
        assert!(err.to_string().contains("Cannot convert"));
    }

    #[test]
    fn malformed_macro_records_location() {
        let err = malformed_error!("bad depth {}", 3);
        match err {
            Error::Malformed { message, file, .. } => {
                assert_eq!(message, "bad depth 3");
                assert!(file.ends_with("error.rs"));
            }
            _ => panic!("Expected Malformed"),
        }
    }
}
