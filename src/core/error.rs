// This module defines error types for the WAM32 backend using the thiserror crate for
// idiomatic Rust error handling. BackendError is the main error enum covering the fatal
// tier of failures: unsupported condition codes in select expansion, unsupported
// addressing modes (position-independent globals), unsupported argument kinds (by-value
// aggregates), unsupported sub-word access widths, encoding requests for opcodes with
// no layout entry, and malformed instruction shapes. Each variant carries relevant
// context (mnemonics, widths, symbol names, reasons) for diagnostics. The module also
// provides BackendResult<T> as a convenience type alias. Soft conditions (such as an
// unanalyzable terminator run) are not errors and are reported through ordinary enum
// results by the passes concerned.

//! Error types for the WAM32 backend.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for backend compilation.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Unsupported condition code {code} in select expansion")]
    UnsupportedCondition { code: i64 },

    #[error("Position-independent addressing is not supported (global `{symbol}`)")]
    UnsupportedRelocModel { symbol: String },

    #[error("Unsupported {kind} argument")]
    UnsupportedArgument { kind: &'static str },

    #[error("Unsupported {width}-bit {operation} access")]
    UnsupportedWidth {
        operation: &'static str,
        width: u32,
    },

    #[error("No encoding for opcode {mnemonic}")]
    MissingEncoding { mnemonic: &'static str },

    #[error("Malformed {mnemonic} instruction: {reason}")]
    MalformedInstruction {
        mnemonic: &'static str,
        reason: &'static str,
    },

    #[error("Frame layout error: {reason}")]
    FrameLayout { reason: String },
}

/// Result type alias for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
