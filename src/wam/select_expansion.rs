// This module expands the conditional-select pseudo instruction into real control
// flow, since WAM32 has no conditional-move instruction. Each select becomes a
// diamond built from three blocks: the origin keeps everything before the pseudo and
// branches to the merge block when the condition holds, falling through to a fresh
// false-path block otherwise; the false path falls through to the merge block; the
// merge block receives everything after the pseudo, preceded by a value-merge (phi)
// instruction that selects the false value when control arrived via the false path
// and the true value when it arrived straight from the origin. The machine only has
// four branch comparisons (equal, not-equal, unsigned-greater, signed-greater), so
// the ten source condition codes canonicalize onto them by swapping the compared
// operands and/or the selected values. Branch operands are emitted as (rhs, lhs):
// the branch takes when its second operand compares greater than (or equal to) its
// first. The pseudo is deleted; the merge block always ends up with exactly two
// predecessor edges. Any condition code outside the table is a fatal unsupported-
// condition error.

//! Conditional-select expansion into branch/merge diamonds.

use std::mem;

use log::{debug, trace};

use crate::core::error::{BackendError, BackendResult};
use crate::core::machine_ir::{CondCode, MachineFunction, MachineInst, Opcode, Operand};

use super::branch_info::{insert_branch, BranchCond};

/// Canonical branch emission for one condition code: the branch opcode,
/// whether the compared operands swap, and whether the selected values swap.
fn canonicalize(cc: CondCode) -> (Opcode, bool, bool) {
    match cc {
        CondCode::Eq => (Opcode::Beq, false, false),
        CondCode::Ne => (Opcode::Bne, false, false),
        CondCode::UGt => (Opcode::Bgtu, false, false),
        CondCode::SGt => (Opcode::Bgts, false, false),
        // a >= b ? c : d  ->  b > a ? d : c
        CondCode::UGe => (Opcode::Bgtu, true, true),
        CondCode::SGe => (Opcode::Bgts, true, true),
        // a <= b ? c : d  ->  a > b ? d : c
        CondCode::ULe => (Opcode::Bgtu, false, true),
        CondCode::SLe => (Opcode::Bgts, false, true),
        // a < b ? c : d  ->  b > a ? c : d
        CondCode::ULt => (Opcode::Bgtu, true, false),
        CondCode::SLt => (Opcode::Bgts, true, false),
    }
}

/// Expand one select pseudo at `inst_pos` of the block at layout position
/// `block_pos`.
///
/// Select operand shape: `dest, lhs, rhs, trueVal, falseVal, cc`.
fn expand_one<'a>(
    func: &mut MachineFunction<'a>,
    block_pos: usize,
    inst_pos: usize,
) -> BackendResult<()> {
    let inst = func.blocks[block_pos].insts[inst_pos].clone();
    let dest = inst.reg_operand(0)?;
    let mut lhs = inst.reg_operand(1)?;
    let mut rhs = inst.reg_operand(2)?;
    let mut true_val = inst.reg_operand(3)?;
    let mut false_val = inst.reg_operand(4)?;
    let cc_imm = inst.imm_operand(5)?;
    let cc = CondCode::from_imm(cc_imm)
        .ok_or(BackendError::UnsupportedCondition { code: cc_imm })?;

    let (branch_op, swap_operands, swap_values) = canonicalize(cc);
    if swap_operands {
        mem::swap(&mut lhs, &mut rhs);
    }
    if swap_values {
        mem::swap(&mut true_val, &mut false_val);
    }
    trace!(
        "expanding select {cc:?} in block {} -> {} (rhs, lhs) = ({rhs}, {lhs})",
        func.blocks[block_pos].id,
        branch_op.mnemonic(),
    );

    let mut false_block = func.alloc_block();
    let mut merge_block = func.alloc_block();
    let false_id = false_block.id;
    let merge_id = merge_block.id;

    let origin = &mut func.blocks[block_pos];
    let origin_id = origin.id;

    // The merge block takes everything after the pseudo, and the origin's
    // old successors; the pseudo itself is deleted.
    merge_block.insts = origin.insts.split_off(inst_pos + 1);
    origin.insts.pop();
    merge_block.successors = mem::take(&mut origin.successors);

    origin.successors = vec![false_id, merge_id];
    false_block.successors = vec![merge_id];

    // Branch to the merge block when the condition holds; fall through to
    // the false path otherwise. Operand order is (rhs, lhs): the branch
    // takes when the second operand compares greater.
    let cond = BranchCond {
        opcode: branch_op,
        operands: vec![Operand::Reg(rhs), Operand::Reg(lhs)],
    };
    insert_branch(origin, merge_id, None, Some(&cond));

    // The value merge: false value from the false path, true value from the
    // origin.
    merge_block.insts.insert(
        0,
        MachineInst::new(
            Opcode::Phi,
            vec![
                Operand::Reg(dest),
                Operand::Reg(false_val),
                Operand::Block(false_id),
                Operand::Reg(true_val),
                Operand::Block(origin_id),
            ],
        ),
    );

    // Layout order: origin, false path, merge.
    func.blocks.insert(block_pos + 1, false_block);
    func.blocks.insert(block_pos + 2, merge_block);
    Ok(())
}

/// Expand every select pseudo in the function, returning the count.
///
/// Selects that were split into the merge block of an earlier expansion are
/// picked up on a later sweep.
pub fn expand_selects<'a>(func: &mut MachineFunction<'a>) -> BackendResult<usize> {
    let mut expanded = 0;
    loop {
        let found = func.blocks.iter().enumerate().find_map(|(block_pos, block)| {
            block
                .insts
                .iter()
                .position(|inst| inst.opcode == Opcode::Select)
                .map(|inst_pos| (block_pos, inst_pos))
        });
        let Some((block_pos, inst_pos)) = found else {
            break;
        };
        expand_one(func, block_pos, inst_pos)?;
        expanded += 1;
    }
    if expanded > 0 {
        debug!("expanded {expanded} selects in {}", func.name);
    }
    Ok(expanded)
}
