// This module serves as the central hub for the WAM32 backend's shared infrastructure,
// providing the building blocks the target-specific passes operate on. It exports and
// organizes: error handling (one thiserror enum with a BackendResult alias used by every
// pass), session management (bumpalo arena allocation for interned symbol names plus
// per-run statistics), the register file (two register classes with a permanently
// reserved subset), and the machine IR (functions, blocks, instructions, operands and
// the frame-object table). Everything target-specific -- the opcode encoding table, the
// calling convention, the legalization and expansion passes, the encoder -- lives under
// the `wam` module and consumes these types.

//! Core WAM32 backend infrastructure.
//!
//! # Key Components
//!
//! ## Machine IR (`machine_ir`)
//! - Functions, basic blocks, instructions and operands
//! - Frame-object table with resolve-once offsets
//!
//! ## Register File (`register_file`)
//! - Register classes, reserved-register set, bitset tracking
//!
//! ## Session Management (`session`)
//! - Arena-based symbol interning using `bumpalo`
//! - Pass statistics (delay slots filled, selects expanded, ...)
//!
//! ## Error Handling (`error`)
//! - `BackendError` / `BackendResult` via `thiserror`

pub mod error;
pub mod machine_ir;
pub mod register_file;
pub mod session;

pub use error::{BackendError, BackendResult};

pub use machine_ir::{
    AccessWidth, BasicBlock, BlockId, CondCode, FrameInfo, FrameObject, MachineFunction,
    MachineInst, Opcode, Operand,
};

pub use register_file::{is_allocatable, reserved_regs, Reg, RegClass, RegSet};

pub use session::{CompilationSession, SessionStats};
