use thiserror::Error;

use crate::ir::{BlockId, FunctionId, GlobalId};

macro_rules! invalid_ir {
    // Single string version
    ($msg:expr) => {
        crate::Error::InvalidIr {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::InvalidIr {
            message: format!($fmt, $($arg)*),
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
/// ## Configuration Errors
/// - [`Error::InvalidProbability`] - Element probability outside of `(0, 100]`
/// - [`Error::InvalidAnnotation`] - A function annotation could not be parsed
///
/// These abort the transformation of the affected function only. The
/// [`crate::compiler::PassScheduler`] turns them into error events and moves on.
///
/// ## IR Errors
/// - [`Error::FunctionNotFound`], [`Error::GlobalNotFound`], [`Error::BlockNotFound`] - Dangling ids
/// - [`Error::InvalidIr`] - Structurally invalid IR (missing terminator, bad operand, ...)
///
/// ## Emulation Errors
/// - [`Error::Emulation`] - The reference interpreter hit an unsupported construct
/// - [`Error::EmulationLimit`] - The instruction budget was exhausted
///
/// # Examples
///
/// ```rust
/// use ircloak::{obfuscation::validate_probability, Error};
///
/// match validate_probability(0) {
///     Err(Error::InvalidProbability(p)) => assert_eq!(p, 0),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The element encryption probability is outside of `(0, 100]`.
    ///
    /// Raised while resolving the configuration of a function, either from the
    /// global [`crate::obfuscation::ProtectionConfig`] or from a
    /// `strcry_prob=N` annotation.
    #[error("element encryption probability must satisfy 0 < x <= 100, got {0}")]
    InvalidProbability(u32),

    /// A function annotation carried a value that could not be parsed.
    #[error("invalid function annotation '{0}'")]
    InvalidAnnotation(String),

    /// The referenced function does not exist in the module.
    #[error("function {0} not found in module")]
    FunctionNotFound(FunctionId),

    /// The referenced global does not exist (or has been erased).
    #[error("global {0} not found in module")]
    GlobalNotFound(GlobalId),

    /// The referenced basic block does not exist in the function.
    #[error("block {0} not found in function")]
    BlockNotFound(BlockId),

    /// The IR is structurally invalid for the requested operation.
    ///
    /// # Fields
    ///
    /// * `message` - Description of the violated invariant
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Invalid IR - {file}:{line}: {message}")]
    InvalidIr {
        /// The message to be printed for the InvalidIr error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// The reference interpreter encountered something it cannot execute.
    #[error("emulation failed: {0}")]
    Emulation(String),

    /// The reference interpreter exceeded its instruction budget.
    #[error("emulation exceeded the instruction limit of {0}")]
    EmulationLimit(u64),
}

impl Error {
    /// Returns `true` for errors caused by user configuration rather than by the IR.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::InvalidProbability(_) | Self::InvalidAnnotation(_))
    }
}
