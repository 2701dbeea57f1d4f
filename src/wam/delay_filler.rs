// This pass runs last before encoding, after register allocation, and inserts a nop
// immediately after every instruction whose opcode architecturally executes the
// following slot regardless of the branch outcome (all branches, jumps, calls and
// returns on WAM32). No attempt is made to hoist a useful instruction into the slot:
// the policy is always-correct, never-optimal. The number of slots filled is returned
// so the session can accumulate it as a statistic.

//! Branch delay-slot filling.

use log::debug;

use crate::core::machine_ir::{MachineFunction, MachineInst};

/// Fill every delay slot in the function with a nop. Returns the count.
pub fn fill_delay_slots(func: &mut MachineFunction<'_>) -> usize {
    let mut filled = 0;
    for block in &mut func.blocks {
        let mut i = 0;
        while i < block.insts.len() {
            if block.insts[i].has_delay_slot() {
                block.insts.insert(i + 1, MachineInst::nop());
                filled += 1;
                i += 1; // the nop itself has no slot
            }
            i += 1;
        }
    }
    if filled > 0 {
        debug!("filled {filled} delay slots in {}", func.name);
    }
    filled
}
