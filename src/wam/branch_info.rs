// This module analyzes and edits the trailing terminator run of a basic block, plus a
// handful of instruction-building utilities the rest of the backend shares. Analysis
// scans backward over the block (skipping debug-only markers) and classifies the
// terminator suffix: fall-through, a single unconditional branch, a single conditional
// branch, or a conditional branch followed by an unconditional one. A conditional
// branch comparing a register against itself is an unconditional branch in disguise and
// is reported as such; when editing is permitted, a redundant trailing branch behind
// such a disguised unconditional is erased. Indirect terminators (ret) and runs of
// three or more analyzable branches are reported as not analyzable -- a soft answer
// telling control-flow passes to leave the block alone, never an error. Insertion emits
// the canonical unconditional branch as `beq r0, r0, target`, and removal strips at
// most two trailing analyzable branches, so insert followed by remove is an exact undo.

//! Branch analysis and editing, plus instruction-info utilities.

use crate::core::machine_ir::{BasicBlock, BlockId, MachineInst, Opcode, Operand};
use crate::core::register_file::Reg;

/// Condition of an analyzable conditional branch: the branch opcode and its
/// non-target operands in instruction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCond<'a> {
    pub opcode: Opcode,
    pub operands: Vec<Operand<'a>>,
}

/// Result of analyzing a block's terminator suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchInfo<'a> {
    /// The terminator run cannot be understood (indirect jump, or three or
    /// more trailing branches). Callers must leave the block alone.
    NotAnalyzable,
    /// No terminators: the block falls through to its layout successor.
    FallThrough,
    /// Single unconditional branch.
    Unconditional { target: BlockId },
    /// Single conditional branch; falls through when not taken.
    Conditional {
        target: BlockId,
        cond: BranchCond<'a>,
    },
    /// Conditional branch followed by an unconditional branch.
    ConditionalAndUnconditional {
        true_target: BlockId,
        cond: BranchCond<'a>,
        false_target: BlockId,
    },
}

/// Whether the opcode is a branch this module can analyze and remove.
/// Indirect terminators (`ret`) are deliberately excluded.
pub fn is_analyzable_branch(opcode: Opcode) -> bool {
    matches!(
        opcode,
        Opcode::Beq | Opcode::Bne | Opcode::Bgtu | Opcode::Bgts | Opcode::Jmp
    )
}

/// Target of an instruction that transfers control unconditionally: a `jmp`,
/// or a `beq` whose two compared registers are identical.
fn unconditional_target(inst: &MachineInst<'_>) -> Option<BlockId> {
    match inst.opcode {
        Opcode::Jmp => inst.operands.first().and_then(|o| o.block()),
        Opcode::Beq => {
            let lhs = inst.operands.first().and_then(|o| o.reg())?;
            let rhs = inst.operands.get(1).and_then(|o| o.reg())?;
            if lhs == rhs {
                inst.operands.get(2).and_then(|o| o.block())
            } else {
                None
            }
        }
        _ => None,
    }
}

fn conditional_info<'a>(inst: &MachineInst<'a>) -> Option<(BlockId, BranchCond<'a>)> {
    let target = inst.operands.last().and_then(|o| o.block())?;
    let cond = BranchCond {
        opcode: inst.opcode,
        operands: inst.operands[..inst.operands.len() - 1].to_vec(),
    };
    Some((target, cond))
}

/// Classify the trailing terminator run of a block.
///
/// With `allow_modify`, a redundant trailing branch behind a disguised
/// unconditional branch is erased while analyzing, the way downstream
/// control-flow cleanups expect.
pub fn analyze_branch<'a>(block: &mut BasicBlock<'a>, allow_modify: bool) -> BranchInfo<'a> {
    // Skip trailing debug-only markers.
    let mut end = block.insts.len();
    while end > 0 && block.insts[end - 1].is_debug() {
        end -= 1;
    }

    if end == 0 || !block.insts[end - 1].is_terminator() {
        return BranchInfo::FallThrough;
    }

    let last = end - 1;
    if !is_analyzable_branch(block.insts[last].opcode) {
        // Must be an indirect jump.
        return BranchInfo::NotAnalyzable;
    }

    // Look at the second-to-last instruction.
    let second = last.checked_sub(1).filter(|&s| block.insts[s].is_terminator());
    if let Some(s) = second {
        if !is_analyzable_branch(block.insts[s].opcode) {
            return BranchInfo::NotAnalyzable;
        }
    }

    let Some(second) = second else {
        // Exactly one terminator.
        let inst = &block.insts[last];
        if let Some(target) = unconditional_target(inst) {
            return BranchInfo::Unconditional { target };
        }
        return match conditional_info(inst) {
            Some((target, cond)) => BranchInfo::Conditional { target, cond },
            None => BranchInfo::NotAnalyzable,
        };
    };

    // Two branches. Three or more trailing terminators is a shape we give
    // up on rather than reject.
    if second > 0 && block.insts[second - 1].is_terminator() {
        return BranchInfo::NotAnalyzable;
    }

    // If the second-to-last branch is already unconditional, the last one is
    // unreachable; drop it when we are allowed to edit.
    if let Some(target) = unconditional_target(&block.insts[second]) {
        if !allow_modify {
            return BranchInfo::NotAnalyzable;
        }
        block.insts.remove(last);
        return BranchInfo::Unconditional { target };
    }

    // Conditional followed by unconditional: the last must transfer
    // unconditionally or the pair is not analyzable.
    let Some(false_target) = unconditional_target(&block.insts[last]) else {
        return BranchInfo::NotAnalyzable;
    };
    match conditional_info(&block.insts[second]) {
        Some((true_target, cond)) => BranchInfo::ConditionalAndUnconditional {
            true_target,
            cond,
            false_target,
        },
        None => BranchInfo::NotAnalyzable,
    }
}

/// Canonical unconditional branch: `beq r0, r0, target`.
fn build_uncond_branch<'a>(target: BlockId) -> MachineInst<'a> {
    MachineInst::new(
        Opcode::Beq,
        vec![
            Operand::Reg(Reg::ZERO),
            Operand::Reg(Reg::ZERO),
            Operand::Block(target),
        ],
    )
}

fn build_cond_branch<'a>(cond: &BranchCond<'a>, target: BlockId) -> MachineInst<'a> {
    let mut operands = cond.operands.clone();
    operands.push(Operand::Block(target));
    MachineInst::new(cond.opcode, operands)
}

/// Append branch instructions implementing the given control transfer.
///
/// With a false target present, emits the conditional branch to
/// `true_target` followed by an unconditional branch (2 instructions);
/// otherwise a single conditional or unconditional branch (1). Returns the
/// number of instructions inserted. Successor edges are the caller's to
/// maintain.
pub fn insert_branch<'a>(
    block: &mut BasicBlock<'a>,
    true_target: BlockId,
    false_target: Option<BlockId>,
    cond: Option<&BranchCond<'a>>,
) -> usize {
    if let (Some(false_target), Some(cond)) = (false_target, cond) {
        block.push(build_cond_branch(cond, true_target));
        block.push(build_uncond_branch(false_target));
        return 2;
    }

    match cond {
        None => block.push(build_uncond_branch(true_target)),
        Some(cond) => block.push(build_cond_branch(cond, true_target)),
    }
    1
}

/// Strip up to two trailing analyzable branches, returning the count
/// removed. Stops early at anything that is not an analyzable branch, so
/// indirect jumps are never removed. Trailing debug markers are kept.
pub fn remove_branch(block: &mut BasicBlock<'_>) -> usize {
    let mut end = block.insts.len();
    while end > 0 && block.insts[end - 1].is_debug() {
        end -= 1;
    }

    let mut start = end;
    while start > 0 && end - start < 2 && is_analyzable_branch(block.insts[start - 1].opcode) {
        start -= 1;
    }

    let removed = end - start;
    block.insts.drain(start..end);
    removed
}

// ==== INSTRUCTION-INFO UTILITIES ====

/// Synthesize a register move as `or rd, r0, rs`.
pub fn build_register_move<'a>(dst: Reg, src: Reg) -> MachineInst<'a> {
    MachineInst::new(
        Opcode::Or,
        vec![
            Operand::Reg(dst),
            Operand::Reg(Reg::ZERO),
            Operand::Reg(src),
        ],
    )
}

/// Spill a register to a frame slot: `stw src, [slot + 0]`.
pub fn store_reg_to_stack_slot<'a>(src: Reg, frame_index: usize) -> MachineInst<'a> {
    MachineInst::new(
        Opcode::Stw,
        vec![
            Operand::Reg(src),
            Operand::Frame(frame_index),
            Operand::Imm(0),
        ],
    )
}

/// Reload a register from a frame slot: `ldw dst, [slot + 0]`.
pub fn load_reg_from_stack_slot<'a>(dst: Reg, frame_index: usize) -> MachineInst<'a> {
    MachineInst::new(
        Opcode::Ldw,
        vec![
            Operand::Reg(dst),
            Operand::Frame(frame_index),
            Operand::Imm(0),
        ],
    )
}

/// If the instruction is a plain reload of a frame slot (zero
/// displacement), return the destination register and the slot index.
pub fn is_load_from_stack_slot(inst: &MachineInst<'_>) -> Option<(Reg, usize)> {
    stack_slot_access(inst, Opcode::Ldw)
}

/// If the instruction is a plain spill to a frame slot (zero displacement),
/// return the source register and the slot index.
pub fn is_store_to_stack_slot(inst: &MachineInst<'_>) -> Option<(Reg, usize)> {
    stack_slot_access(inst, Opcode::Stw)
}

fn stack_slot_access(inst: &MachineInst<'_>, opcode: Opcode) -> Option<(Reg, usize)> {
    if inst.opcode != opcode {
        return None;
    }
    let reg = inst.operands.first().and_then(|o| o.reg())?;
    let index = match inst.operands.get(1) {
        Some(&Operand::Frame(index)) => index,
        _ => return None,
    };
    match inst.operands.get(2) {
        Some(&Operand::Imm(0)) => Some((reg, index)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::machine_ir::BasicBlock;

    fn cond_bne<'a>(lhs: Reg, rhs: Reg) -> BranchCond<'a> {
        BranchCond {
            opcode: Opcode::Bne,
            operands: vec![Operand::Reg(lhs), Operand::Reg(rhs)],
        }
    }

    #[test]
    fn test_fall_through_block() {
        let mut block = BasicBlock::new(0);
        block.push(MachineInst::new(
            Opcode::Add,
            vec![
                Operand::Reg(Reg::gpr(1)),
                Operand::Reg(Reg::gpr(2)),
                Operand::Reg(Reg::gpr(3)),
            ],
        ));
        assert_eq!(analyze_branch(&mut block, true), BranchInfo::FallThrough);
        assert_eq!(analyze_branch(&mut BasicBlock::new(0), true), BranchInfo::FallThrough);
    }

    #[test]
    fn test_indirect_terminator_not_analyzable() {
        let mut block = BasicBlock::new(0);
        block.push(MachineInst::new(Opcode::Ret, vec![Operand::Reg(Reg::RA)]));
        assert_eq!(analyze_branch(&mut block, true), BranchInfo::NotAnalyzable);
        // ...and never removed.
        assert_eq!(remove_branch(&mut block), 0);
        assert_eq!(block.insts.len(), 1);
    }

    #[test]
    fn test_single_conditional() {
        let mut block = BasicBlock::new(0);
        insert_branch(&mut block, 7, None, Some(&cond_bne(Reg::gpr(1), Reg::gpr(2))));

        match analyze_branch(&mut block, true) {
            BranchInfo::Conditional { target, cond } => {
                assert_eq!(target, 7);
                assert_eq!(cond.opcode, Opcode::Bne);
                assert_eq!(cond.operands.len(), 2);
            }
            other => panic!("unexpected analysis: {other:?}"),
        }
    }

    #[test]
    fn test_disguised_unconditional_is_normalized() {
        let mut block = BasicBlock::new(0);
        // beq r4, r4 always branches.
        block.push(MachineInst::new(
            Opcode::Beq,
            vec![
                Operand::Reg(Reg::gpr(4)),
                Operand::Reg(Reg::gpr(4)),
                Operand::Block(3),
            ],
        ));
        assert_eq!(
            analyze_branch(&mut block, false),
            BranchInfo::Unconditional { target: 3 }
        );
    }

    #[test]
    fn test_redundant_branch_behind_unconditional() {
        let mut block = BasicBlock::new(0);
        insert_branch(&mut block, 5, None, None);
        insert_branch(&mut block, 9, None, Some(&cond_bne(Reg::gpr(1), Reg::gpr(2))));
        assert_eq!(block.insts.len(), 2);

        // Without permission to edit we refuse to touch the block.
        assert_eq!(analyze_branch(&mut block, false), BranchInfo::NotAnalyzable);
        assert_eq!(block.insts.len(), 2);

        // With permission the dead trailing branch is erased.
        assert_eq!(
            analyze_branch(&mut block, true),
            BranchInfo::Unconditional { target: 5 }
        );
        assert_eq!(block.insts.len(), 1);
    }

    #[test]
    fn test_three_terminators_reported_soft() {
        let mut block = BasicBlock::new(0);
        insert_branch(&mut block, 1, None, Some(&cond_bne(Reg::gpr(1), Reg::gpr(2))));
        insert_branch(&mut block, 2, None, Some(&cond_bne(Reg::gpr(3), Reg::gpr(4))));
        insert_branch(&mut block, 3, None, None);

        assert_eq!(analyze_branch(&mut block, true), BranchInfo::NotAnalyzable);
        // The soft answer must not have edited anything.
        assert_eq!(block.insts.len(), 3);
    }

    #[test]
    fn test_insert_remove_round_trip() {
        let base_inst = MachineInst::new(
            Opcode::Add,
            vec![
                Operand::Reg(Reg::gpr(1)),
                Operand::Reg(Reg::gpr(2)),
                Operand::Reg(Reg::gpr(3)),
            ],
        );

        // Unconditional only.
        let mut block = BasicBlock::new(0);
        block.push(base_inst.clone());
        let snapshot = block.insts.clone();
        assert_eq!(insert_branch(&mut block, 4, None, None), 1);
        assert_eq!(remove_branch(&mut block), 1);
        assert_eq!(block.insts, snapshot);

        // Conditional only.
        let cond = cond_bne(Reg::gpr(5), Reg::gpr(6));
        assert_eq!(insert_branch(&mut block, 4, None, Some(&cond)), 1);
        assert_eq!(remove_branch(&mut block), 1);
        assert_eq!(block.insts, snapshot);

        // Conditional plus unconditional.
        assert_eq!(insert_branch(&mut block, 4, Some(8), Some(&cond)), 2);
        assert_eq!(remove_branch(&mut block), 2);
        assert_eq!(block.insts, snapshot);
    }

    #[test]
    fn test_analyze_reports_inserted_config() {
        let cond = cond_bne(Reg::gpr(5), Reg::gpr(6));
        let mut block = BasicBlock::new(0);
        insert_branch(&mut block, 4, Some(8), Some(&cond));

        match analyze_branch(&mut block, false) {
            BranchInfo::ConditionalAndUnconditional {
                true_target,
                cond: reported,
                false_target,
            } => {
                assert_eq!(true_target, 4);
                assert_eq!(false_target, 8);
                assert_eq!(reported, cond);
            }
            other => panic!("unexpected analysis: {other:?}"),
        }
    }

    #[test]
    fn test_remove_keeps_trailing_debug_markers() {
        let mut block = BasicBlock::new(0);
        insert_branch(&mut block, 4, None, None);
        block.push(MachineInst::new(Opcode::DbgValue, vec![]));

        assert_eq!(remove_branch(&mut block), 1);
        assert_eq!(block.insts.len(), 1);
        assert_eq!(block.insts[0].opcode, Opcode::DbgValue);
    }

    #[test]
    fn test_stack_slot_predicates() {
        let spill = store_reg_to_stack_slot(Reg::gpr(7), 2);
        assert_eq!(is_store_to_stack_slot(&spill), Some((Reg::gpr(7), 2)));
        assert_eq!(is_load_from_stack_slot(&spill), None);

        let reload = load_reg_from_stack_slot(Reg::gpr(7), 2);
        assert_eq!(is_load_from_stack_slot(&reload), Some((Reg::gpr(7), 2)));

        // Non-zero displacement is not a plain slot access.
        let mut offset = load_reg_from_stack_slot(Reg::gpr(7), 2);
        offset.operands[2] = Operand::Imm(4);
        assert_eq!(is_load_from_stack_slot(&offset), None);
    }

    #[test]
    fn test_register_move_shape() {
        let mv = build_register_move(Reg::gpr(9), Reg::gpr(4));
        assert_eq!(mv.opcode, Opcode::Or);
        assert_eq!(mv.operands[1], Operand::Reg(Reg::ZERO));
    }
}
