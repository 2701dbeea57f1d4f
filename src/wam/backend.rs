// This module is the pipeline driver tying the passes together in their fixed order.
// WamBackend owns the target parameter block and borrows the compilation session; it
// is an explicit value handed to callers, never a global registration. The driver has
// three entry points matching the three times a function crosses this crate's fence:
// legalize_graph rewrites illegal operation nodes while the upstream selector builds
// instructions; prepare_function runs after selection and expands every conditional-
// select pseudo so the external register allocator sees only real control flow; and
// finalize_function runs after allocation, freezing the frame, resolving frame
// indices, deleting the call-frame markers, filling delay slots and encoding the
// instruction stream into bytes plus an ordered fixup list. Every pass reports its
// counters to the session. The encoded function converts to relocation records for
// the external object emitter.

//! The WAM32 backend pipeline driver.

use log::{debug, info};

use crate::core::error::BackendResult;
use crate::core::machine_ir::MachineFunction;
use crate::core::register_file::Reg;
use crate::core::session::CompilationSession;

use super::calling_convention;
use super::delay_filler::fill_delay_slots;
use super::encoder::encode_function;
use super::fixups::{relocation_records, Fixup, RelocationRecord};
use super::frame::{eliminate_frame_indices, finalize_frame, remove_call_frame_pseudos};
use super::legalizer::OpGraph;
use super::select_expansion::expand_selects;
use super::target::TargetDescriptor;

/// A fully encoded function: the byte stream and its ordered fixup list.
#[derive(Debug)]
pub struct EncodedFunction<'a> {
    pub code: Vec<u8>,
    pub fixups: Vec<Fixup<'a>>,
}

impl<'a> EncodedFunction<'a> {
    /// Relocation records for the external object emitter.
    pub fn relocations(&self) -> Vec<RelocationRecord<'a>> {
        relocation_records(&self.fixups)
    }
}

/// The backend: target parameters plus the session the passes report to.
pub struct WamBackend<'s, 'arena> {
    target: TargetDescriptor,
    session: &'s CompilationSession<'arena>,
}

impl<'s, 'arena> WamBackend<'s, 'arena> {
    pub fn new(target: TargetDescriptor, session: &'s CompilationSession<'arena>) -> Self {
        Self { target, session }
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn session(&self) -> &'s CompilationSession<'arena> {
        self.session
    }

    /// Legalize an operation graph in place, recording the rewrite count.
    pub fn legalize_graph(&self, graph: &mut OpGraph<'arena>) -> BackendResult<usize> {
        let rewritten = super::legalizer::legalize_graph(graph, &self.target)?;
        self.session.record_nodes_legalized(rewritten);
        Ok(rewritten)
    }

    /// Marshal and lower formal arguments into the entry block.
    pub fn lower_formal_arguments(
        &self,
        func: &mut MachineFunction<'arena>,
        descs: &[calling_convention::ValueDescriptor],
        dests: &[Reg],
    ) -> BackendResult<()> {
        calling_convention::lower_formal_arguments(func, &self.target, descs, dests)
    }

    /// Post-selection preparation: expand select pseudos into real control
    /// flow. The function is then ready for external register allocation.
    pub fn prepare_function(&self, func: &mut MachineFunction<'arena>) -> BackendResult<()> {
        debug!("preparing {}", func.name);
        let expanded = expand_selects(func)?;
        self.session.record_selects_expanded(expanded);
        self.session.record_function_prepared();
        Ok(())
    }

    /// Post-allocation finalization: freeze the frame, resolve frame
    /// indices, drop the call-frame markers, fill delay slots and encode.
    pub fn finalize_function(
        &self,
        func: &mut MachineFunction<'arena>,
    ) -> BackendResult<EncodedFunction<'arena>> {
        finalize_frame(func)?;
        eliminate_frame_indices(func)?;
        remove_call_frame_pseudos(func);

        let filled = fill_delay_slots(func);
        self.session.record_delay_slots_filled(filled);

        let (code, fixups) = encode_function(func)?;
        self.session.record_function_encoded(code.len(), fixups.len());
        info!(
            "{}: {} bytes, {} fixups, {} delay slots",
            func.name,
            code.len(),
            fixups.len(),
            filled
        );
        Ok(EncodedFunction { code, fixups })
    }
}
