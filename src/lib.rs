//! WAM32 code-generation backend core.
//!
//! WAM32 is a 32-bit, word-addressed, big-endian RISC target with branch
//! delay slots. This crate owns the target-dependent heart of a compiler
//! for it: legalizing operations the hardware cannot execute (sub-word
//! memory access, whole global addresses), marshaling values across the
//! calling convention, expanding the conditional-select pseudo into real
//! control flow, analyzing and editing basic-block terminators, filling
//! delay slots, and encoding instructions into relocatable binary.
//! Instruction selection, register allocation and object-file writing are
//! external collaborators that exchange the machine IR defined here.
//!
//! # Usage
//!
//! ```ignore
//! use bumpalo::Bump;
//! use wam32::core::CompilationSession;
//! use wam32::wam::{TargetDescriptor, WamBackend};
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let backend = WamBackend::new(TargetDescriptor::default(), &session);
//!
//! // ... the selector builds a MachineFunction `func` ...
//! backend.prepare_function(&mut func)?;      // select pseudos -> diamonds
//! // ... external register allocation ...
//! let encoded = backend.finalize_function(&mut func)?;
//! let relocations = encoded.relocations();   // for the object emitter
//! ```
//!
//! # Architecture
//!
//! - [`core`] -- shared infrastructure: machine IR, register file, session,
//!   errors
//! - [`wam`] -- target-specific passes, encoding table and pipeline driver

pub mod core;
pub mod wam;

pub use crate::core::{
    AccessWidth, BackendError, BackendResult, BasicBlock, BlockId, CompilationSession, CondCode,
    FrameInfo, MachineFunction, MachineInst, Opcode, Operand, Reg, RegClass, RegSet, SessionStats,
};
pub use crate::wam::{
    BranchInfo, EncodedFunction, Fixup, FixupKind, RelocationRecord, TargetDescriptor, WamBackend,
};
