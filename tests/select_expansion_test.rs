// This test suite verifies that expanding a conditional-select pseudo into a
// branch/merge diamond preserves the select's value semantics for every supported
// condition code. The expansion canonicalizes ten condition codes onto the machine's
// four branch comparisons by swapping compared operands and/or selected values, so
// the risky part is exactly the swap table: an off-by-one there silently computes
// the wrong value for half the inputs. The tests simulate the expanded control flow
// (evaluate the emitted branch against the machine's branch-taken rule, follow the
// taken edge, read the phi operand arriving from that edge) and compare the result
// with directly evaluating `cc(lhs, rhs) ? trueVal : falseVal` over boundary values:
// 0, -1, i32::MIN, i32::MAX and a pair distinguishing signed from unsigned order.

//! Select-expansion equivalence against direct condition evaluation.

use wam32::core::{CondCode, MachineFunction, MachineInst, Opcode, Operand, Reg};
use wam32::wam::expand_selects;

const LHS: Reg = Reg::gpr(1);
const RHS: Reg = Reg::gpr(2);
const TRUE_VAL: Reg = Reg::gpr(3);
const FALSE_VAL: Reg = Reg::gpr(4);
const DEST: Reg = Reg::gpr(10);

/// Directly evaluate the condition the select pseudo expresses.
fn direct_cc(cc: CondCode, lhs: i32, rhs: i32) -> bool {
    let (ul, ur) = (lhs as u32, rhs as u32);
    match cc {
        CondCode::Eq => lhs == rhs,
        CondCode::Ne => lhs != rhs,
        CondCode::UGt => ul > ur,
        CondCode::SGt => lhs > rhs,
        CondCode::UGe => ul >= ur,
        CondCode::SGe => lhs >= rhs,
        CondCode::ULe => ul <= ur,
        CondCode::SLe => lhs <= rhs,
        CondCode::ULt => ul < ur,
        CondCode::SLt => lhs < rhs,
    }
}

/// The machine's branch-taken rule: the second operand compares against the
/// first, so `bgts ra, rb` takes when rb > ra.
fn branch_taken(opcode: Opcode, first: i32, second: i32) -> bool {
    match opcode {
        Opcode::Beq => first == second,
        Opcode::Bne => first != second,
        Opcode::Bgtu => (second as u32) > (first as u32),
        Opcode::Bgts => second > first,
        other => panic!("unexpected branch opcode {other:?}"),
    }
}

fn reg_value(reg: Reg, lhs: i32, rhs: i32, true_sentinel: i32, false_sentinel: i32) -> i32 {
    match reg {
        LHS => lhs,
        RHS => rhs,
        TRUE_VAL => true_sentinel,
        FALSE_VAL => false_sentinel,
        other => panic!("unexpected register {other}"),
    }
}

/// Expand a select with the given condition code and simulate the diamond
/// for one (lhs, rhs) input, returning the value merged into the
/// destination.
fn run_expanded(cc: CondCode, lhs: i32, rhs: i32) -> i32 {
    let true_sentinel = 111;
    let false_sentinel = 222;

    let mut func = MachineFunction::new("select_test");
    let entry = func.entry();
    func.block_mut(entry).unwrap().push(MachineInst::new(
        Opcode::Select,
        vec![
            Operand::Reg(DEST),
            Operand::Reg(LHS),
            Operand::Reg(RHS),
            Operand::Reg(TRUE_VAL),
            Operand::Reg(FALSE_VAL),
            Operand::Imm(cc.as_imm()),
        ],
    ));
    assert_eq!(expand_selects(&mut func).unwrap(), 1);

    // Origin ends in the emitted branch to the merge block.
    let origin = &func.blocks[0];
    let branch = origin.insts.last().unwrap();
    let first = branch.operands[0].reg().unwrap();
    let second = branch.operands[1].reg().unwrap();
    let merge_id = branch.operands[2].block().unwrap();
    let taken = branch_taken(
        branch.opcode,
        reg_value(first, lhs, rhs, true_sentinel, false_sentinel),
        reg_value(second, lhs, rhs, true_sentinel, false_sentinel),
    );

    // Which predecessor did control arrive from?
    let arrived_from = if taken { origin.id } else { func.blocks[1].id };

    let merge = func
        .blocks
        .iter()
        .find(|b| b.id == merge_id)
        .expect("merge block in layout");
    let phi = &merge.insts[0];
    assert_eq!(phi.opcode, Opcode::Phi);
    assert_eq!(phi.operands[0], Operand::Reg(DEST));

    // Phi operands: (value, predecessor) pairs after the destination.
    for pair in phi.operands[1..].chunks(2) {
        let value = pair[0].reg().unwrap();
        let pred = pair[1].block().unwrap();
        if pred == arrived_from {
            return reg_value(value, lhs, rhs, true_sentinel, false_sentinel);
        }
    }
    panic!("no phi operand for predecessor {arrived_from}");
}

#[test]
fn expanded_diamond_matches_direct_evaluation() {
    let _ = env_logger::builder().is_test(true).try_init();

    // Boundary values plus a pair only unsigned comparison distinguishes:
    // 1 vs -1 orders differently signed and unsigned.
    let values = [0i32, -1, i32::MIN, i32::MAX, 1];

    for cc in CondCode::ALL {
        for &lhs in &values {
            for &rhs in &values {
                let expected = if direct_cc(cc, lhs, rhs) { 111 } else { 222 };
                let actual = run_expanded(cc, lhs, rhs);
                assert_eq!(
                    actual, expected,
                    "cc {cc:?} lhs {lhs} rhs {rhs}: diamond computed {actual}, direct {expected}"
                );
            }
        }
    }
}

#[test]
fn merge_block_always_has_two_predecessors() {
    for cc in CondCode::ALL {
        let mut func = MachineFunction::new("preds");
        let entry = func.entry();
        func.block_mut(entry).unwrap().push(MachineInst::new(
            Opcode::Select,
            vec![
                Operand::Reg(DEST),
                Operand::Reg(LHS),
                Operand::Reg(RHS),
                Operand::Reg(TRUE_VAL),
                Operand::Reg(FALSE_VAL),
                Operand::Imm(cc.as_imm()),
            ],
        ));
        expand_selects(&mut func).unwrap();

        let merge_id = func.blocks[2].id;
        let preds = func
            .blocks
            .iter()
            .filter(|b| b.successors.contains(&merge_id))
            .count();
        assert_eq!(preds, 2, "cc {cc:?}");
    }
}
