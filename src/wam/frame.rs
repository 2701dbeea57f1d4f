// This module lowers the abstract stack frame to concrete stack-pointer arithmetic,
// after register allocation and before delay-slot filling. Frame finalization assigns
// every frame object its fixed byte offset and freezes the total stack size; the
// prologue then decrements the stack pointer by that size at function entry and each
// return is preceded by the matching increment (both omitted for an empty frame).
// Frame-index elimination rewrites every frame-slot operand, exactly once, into the
// stack-pointer register plus an immediate: the object's resolved offset added to the
// instruction's displacement. Fixed objects (incoming stack arguments) resolve above
// the frame, at total-stack-size plus their position in the caller's outgoing area.
// The call-frame pseudo markers bracketing calls carry no machine semantics once the
// frame is frozen and are deleted here.

//! Frame finalization, prologue/epilogue emission and frame-index
//! elimination.

use log::{debug, trace};

use crate::core::error::{BackendError, BackendResult};
use crate::core::machine_ir::{MachineFunction, MachineInst, Opcode, Operand};
use crate::core::register_file::Reg;

/// `addi r30, r30, delta`.
fn build_sp_adjust<'a>(delta: i64) -> MachineInst<'a> {
    MachineInst::new(
        Opcode::Addi,
        vec![
            Operand::Reg(Reg::SP),
            Operand::Reg(Reg::SP),
            Operand::Imm(delta),
        ],
    )
}

/// Freeze the frame layout and emit the prologue and epilogues.
///
/// The prologue is a single stack-pointer decrement at the head of the
/// entry block; every `ret` gains the matching increment in front of it.
/// Nothing is emitted when the frame is empty.
pub fn finalize_frame(func: &mut MachineFunction<'_>) -> BackendResult<()> {
    func.frame.finalize()?;
    let stack_size = func.frame.stack_size().unwrap_or(0);
    debug!("{}: frame frozen at {stack_size} bytes", func.name);
    if stack_size == 0 {
        return Ok(());
    }

    let entry = func.entry();
    func.block_mut(entry)?
        .insts
        .insert(0, build_sp_adjust(-(stack_size as i64)));

    for block in &mut func.blocks {
        let mut i = 0;
        while i < block.insts.len() {
            if block.insts[i].opcode == Opcode::Ret {
                block.insts.insert(i, build_sp_adjust(stack_size as i64));
                i += 1;
            }
            i += 1;
        }
    }
    Ok(())
}

/// Rewrite every frame-slot operand to `r30 + immediate`.
///
/// The frame must be finalized first. Each rewritten instruction must carry
/// an immediate displacement after the frame operand; the object's resolved
/// offset is added to it.
pub fn eliminate_frame_indices(func: &mut MachineFunction<'_>) -> BackendResult<()> {
    if !func.frame.is_finalized() {
        return Err(BackendError::FrameLayout {
            reason: "frame-index elimination before frame finalization".to_string(),
        });
    }

    // Collect offsets up front; the borrow on the frame table ends before
    // the instruction rewrite below.
    let frame = &func.frame;
    let mut rewrites = Vec::new();
    for (block_pos, block) in func.blocks.iter().enumerate() {
        for (inst_pos, inst) in block.insts.iter().enumerate() {
            let Some(op_pos) = inst
                .operands
                .iter()
                .position(|o| matches!(o, Operand::Frame(_)))
            else {
                continue;
            };
            let Some(&Operand::Frame(index)) = inst.operands.get(op_pos) else {
                unreachable!()
            };
            let offset = frame.object_offset(index)?;
            trace!(
                "{}: frame index {index} -> sp+{offset} in {}",
                func.name,
                inst.opcode.mnemonic()
            );
            rewrites.push((block_pos, inst_pos, op_pos, offset));
        }
    }

    for (block_pos, inst_pos, op_pos, offset) in rewrites {
        let inst = &mut func.blocks[block_pos].insts[inst_pos];
        let mnemonic = inst.opcode.mnemonic();
        inst.operands[op_pos] = Operand::Reg(Reg::SP);
        match inst.operands.get_mut(op_pos + 1) {
            Some(Operand::Imm(v)) => *v += offset as i64,
            _ => {
                return Err(BackendError::MalformedInstruction {
                    mnemonic,
                    reason: "frame operand without a displacement immediate",
                })
            }
        }
    }
    Ok(())
}

/// Delete the call-frame pseudo markers. Their stack adjustment is folded
/// into the frozen frame, so they carry no machine semantics here.
pub fn remove_call_frame_pseudos(func: &mut MachineFunction<'_>) {
    for block in &mut func.blocks {
        block.insts.retain(|inst| {
            !matches!(inst.opcode, Opcode::CallseqStart | Opcode::CallseqEnd)
        });
    }
}
