// This module gathers everything specific to the WAM32 target: the backend
// descriptor and per-opcode encoding table, operation legalization for the word-
// addressed bus, the calling convention, conditional-select expansion, branch
// analysis/editing, frame lowering, delay-slot filling, instruction encoding with
// fixups, and the pipeline driver that runs the passes in order. The shared machine
// IR and session infrastructure these passes operate on lives in `core`.

//! WAM32 target-specific passes and encoding.
//!
//! # Pass order over a function
//!
//! 1. [`legalizer`] -- rewrite sub-word memory access and global addresses
//!    while the selector builds instructions
//! 2. [`calling_convention`] -- marshal arguments and returns at entry/exit
//!    construction
//! 3. [`select_expansion`] -- replace select pseudos with real control flow
//! 4. external register allocation
//! 5. [`frame`] -- freeze the frame, resolve frame indices
//! 6. [`delay_filler`] -- nop out every delay slot
//! 7. [`encoder`] + [`fixups`] -- produce bytes, fixups and relocations
//!
//! [`backend::WamBackend`] drives the sequence.

pub mod backend;
pub mod branch_info;
pub mod calling_convention;
pub mod delay_filler;
pub mod encoder;
pub mod fixups;
pub mod frame;
pub mod legalizer;
pub mod select_expansion;
pub mod target;

pub use backend::{EncodedFunction, WamBackend};
pub use branch_info::{analyze_branch, insert_branch, remove_branch, BranchCond, BranchInfo};
pub use calling_convention::{
    lower_call, lower_formal_arguments, lower_return, marshal_arguments, marshal_returns,
    CCAssignment, ExtMode, Location, ValueDescriptor, ValueKind, WamAssigner,
};
pub use delay_filler::fill_delay_slots;
pub use encoder::{encode_function, encode_instruction};
pub use fixups::{
    adjust_fixup_value, apply_fixup, relocation_records, relocation_type, Fixup, FixupKind,
    RelocationRecord,
};
pub use frame::{eliminate_frame_indices, finalize_frame, remove_call_frame_pseudos};
pub use legalizer::{legalize_graph, needs_legalization, OpGraph, OpKind};
pub use select_expansion::expand_selects;
pub use target::{encoding_info, InstFormat, OpcodeInfo, RelocModel, TargetDescriptor};
