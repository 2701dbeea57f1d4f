// This module implements the WAM32 calling convention. Integer arguments pass in
// r1-r4, consumed greedily in declaration order; once the pool is exhausted the
// remaining values go to the stack at strictly increasing word-sized offsets starting
// at 0, with no reordering or packing. Return values use the same pool in the same
// order and must all fit in registers. Values narrower than the 32-bit machine word
// are widened to register width (sign, zero or any extension per the descriptor)
// before their location is assigned, never after. The module provides the pure
// assignment state machine (WamAssigner) plus the three lowering entry points that
// consume it: formal-argument lowering at function entry (register copies recorded as
// live-ins, incoming stack arguments loaded through fixed frame objects), return
// lowering (copies into the return pool, live-outs, and a ret always carrying the
// return-address register), and call lowering (call-frame markers, argument copies
// and outgoing stack stores around the call instruction). By-value aggregate
// arguments fail fast with a diagnostic; tail calls are never emitted and degrade to
// normal calls.

//! Calling-convention marshaling for WAM32.

use log::{debug, trace};

use crate::core::error::{BackendError, BackendResult};
use crate::core::machine_ir::{
    AccessWidth, BlockId, MachineFunction, MachineInst, Opcode, Operand,
};
use crate::core::register_file::Reg;

use super::branch_info::build_register_move;
use super::target::TargetDescriptor;

/// Bytes a value occupies in the stack overflow area: the natural width
/// rounded up to the word size.
const STACK_SLOT_BYTES: u32 = 4;

/// Extension applied to a sub-word value before its location is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtMode {
    /// The value is already word-width.
    None,
    Sign,
    Zero,
    /// Either extension is acceptable; the upper bits are unspecified.
    Any,
}

/// Kind of a formal argument or return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    /// By-value struct. Not supported; assignment fails fast.
    Aggregate,
}

/// One formal argument or return value, as described by the upstream
/// selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueDescriptor {
    pub kind: ValueKind,
    pub width: AccessWidth,
    pub ext: ExtMode,
}

impl ValueDescriptor {
    pub fn integer(width: AccessWidth, ext: ExtMode) -> Self {
        Self {
            kind: ValueKind::Integer,
            width,
            ext,
        }
    }

    /// A plain word-width integer.
    pub fn word() -> Self {
        Self::integer(AccessWidth::Word, ExtMode::None)
    }

    pub fn aggregate() -> Self {
        Self {
            kind: ValueKind::Aggregate,
            width: AccessWidth::Word,
            ext: ExtMode::None,
        }
    }
}

/// Where a value lives across the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Reg(Reg),
    /// Byte offset into the stack overflow area.
    Stack(u32),
}

/// One marshaled value: its location plus the extension applied before
/// placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CCAssignment {
    pub location: Location,
    pub ext: ExtMode,
}

/// Greedy assignment state machine: registers from the pool in order, then
/// strictly increasing stack offsets. One assigner per argument list or
/// return list; state is never shared across lists.
#[derive(Debug)]
pub struct WamAssigner<'t> {
    pool: &'t [Reg],
    next_reg: usize,
    next_stack: u32,
}

impl<'t> WamAssigner<'t> {
    pub fn new(pool: &'t [Reg]) -> Self {
        Self {
            pool,
            next_reg: 0,
            next_stack: 0,
        }
    }

    /// Assign the next value in declaration order.
    pub fn assign(&mut self, desc: &ValueDescriptor) -> BackendResult<CCAssignment> {
        if desc.kind == ValueKind::Aggregate {
            return Err(BackendError::UnsupportedArgument {
                kind: "by-value aggregate",
            });
        }

        let location = if self.next_reg < self.pool.len() {
            let reg = self.pool[self.next_reg];
            self.next_reg += 1;
            Location::Reg(reg)
        } else {
            let offset = self.next_stack;
            self.next_stack += STACK_SLOT_BYTES;
            Location::Stack(offset)
        };
        trace!("assigned {desc:?} to {location:?}");
        Ok(CCAssignment {
            location,
            ext: desc.ext,
        })
    }

    /// Bytes of stack overflow area consumed so far.
    pub fn stack_size(&self) -> u32 {
        self.next_stack
    }

    pub fn reset(&mut self) {
        self.next_reg = 0;
        self.next_stack = 0;
    }
}

/// Marshal an argument list: one location per value, in declaration order.
pub fn marshal_arguments(
    target: &TargetDescriptor,
    descs: &[ValueDescriptor],
) -> BackendResult<Vec<CCAssignment>> {
    let mut assigner = WamAssigner::new(&target.arg_regs);
    descs.iter().map(|d| assigner.assign(d)).collect()
}

/// Marshal a return-value list. Returns always go in registers; a list
/// longer than the pool is a capability gap, not a stack spill.
pub fn marshal_returns(
    target: &TargetDescriptor,
    descs: &[ValueDescriptor],
) -> BackendResult<Vec<CCAssignment>> {
    let mut assigner = WamAssigner::new(target.ret_regs());
    descs
        .iter()
        .map(|d| {
            let assignment = assigner.assign(d)?;
            match assignment.location {
                Location::Reg(_) => Ok(assignment),
                Location::Stack(_) => Err(BackendError::UnsupportedArgument {
                    kind: "stack-assigned return value",
                }),
            }
        })
        .collect()
}

/// Instructions widening a sub-word value in `reg` to register width.
///
/// Zero extension masks with `andi`; sign extension is the shift-up/
/// shift-down pair. Word-width values and any-extension need nothing.
pub fn extend_to_word<'a>(reg: Reg, desc: &ValueDescriptor) -> Vec<MachineInst<'a>> {
    let bits = desc.width.bits();
    if bits == 32 {
        return vec![];
    }
    match desc.ext {
        ExtMode::None | ExtMode::Any => vec![],
        ExtMode::Zero => {
            let mask = (1i64 << bits) - 1;
            vec![MachineInst::new(
                Opcode::Andi,
                vec![Operand::Reg(reg), Operand::Reg(reg), Operand::Imm(mask)],
            )]
        }
        ExtMode::Sign => {
            let amount = (32 - bits) as i64;
            vec![
                MachineInst::new(
                    Opcode::Shl,
                    vec![Operand::Reg(reg), Operand::Reg(reg), Operand::Imm(amount)],
                ),
                MachineInst::new(
                    Opcode::Sar,
                    vec![Operand::Reg(reg), Operand::Reg(reg), Operand::Imm(amount)],
                ),
            ]
        }
    }
}

/// Lower formal arguments at function entry.
///
/// For each argument, in declaration order: a register argument is recorded
/// as a live-in and copied into its destination; a stack argument gets a
/// fixed frame object in the caller's outgoing area and a load through it.
/// Callers pre-widen sub-word arguments, so no extension happens here.
pub fn lower_formal_arguments<'a>(
    func: &mut MachineFunction<'a>,
    target: &TargetDescriptor,
    descs: &[ValueDescriptor],
    dests: &[Reg],
) -> BackendResult<()> {
    debug_assert_eq!(descs.len(), dests.len());
    debug!("lowering {} formal arguments for {}", descs.len(), func.name);

    let assignments = marshal_arguments(target, descs)?;
    let entry = func.entry();
    let mut insts = Vec::new();
    for (assignment, &dest) in assignments.iter().zip(dests) {
        match assignment.location {
            Location::Reg(reg) => {
                func.live_ins.insert(reg);
                insts.push(build_register_move(dest, reg));
            }
            Location::Stack(offset) => {
                let slot = func.frame.create_fixed_object(STACK_SLOT_BYTES, offset);
                insts.push(MachineInst::new(
                    Opcode::Ldw,
                    vec![Operand::Reg(dest), Operand::Frame(slot), Operand::Imm(0)],
                ));
            }
        }
    }

    let block = func.block_mut(entry)?;
    for (i, inst) in insts.into_iter().enumerate() {
        block.insts.insert(i, inst);
    }
    Ok(())
}

/// Lower a return: copy each value into its return register (widening
/// first), record live-outs, and close the block with `ret r31`. A function
/// with no return value emits the bare `ret`.
pub fn lower_return<'a>(
    func: &mut MachineFunction<'a>,
    target: &TargetDescriptor,
    block: BlockId,
    values: &[(Reg, ValueDescriptor)],
) -> BackendResult<()> {
    let descs: Vec<ValueDescriptor> = values.iter().map(|(_, d)| *d).collect();
    let assignments = marshal_returns(target, &descs)?;

    let mut insts = Vec::new();
    for ((src, desc), assignment) in values.iter().zip(&assignments) {
        // Widen before placement.
        insts.extend(extend_to_word(*src, desc));
        let Location::Reg(ret_reg) = assignment.location else {
            unreachable!("marshal_returns only assigns registers");
        };
        func.live_outs.insert(ret_reg);
        insts.push(build_register_move(ret_reg, *src));
    }
    insts.push(MachineInst::new(Opcode::Ret, vec![Operand::Reg(Reg::RA)]));

    let block = func.block_mut(block)?;
    block.insts.extend(insts);
    Ok(())
}

/// Lower a call to `callee`.
///
/// Emits the call-frame markers around the argument copies and the call.
/// Register arguments are widened then copied into the pool; stack
/// arguments are widened then stored to the outgoing area at `sp + offset`.
/// `tail_call` requests are honored as ordinary calls: the backend never
/// emits a tail call.
pub fn lower_call<'a>(
    func: &mut MachineFunction<'a>,
    target: &TargetDescriptor,
    block: BlockId,
    callee: &'a str,
    args: &[(Reg, ValueDescriptor)],
    tail_call: bool,
) -> BackendResult<()> {
    if tail_call {
        debug!("tail call to `{callee}` demoted to a normal call");
    }

    let descs: Vec<ValueDescriptor> = args.iter().map(|(_, d)| *d).collect();
    let mut assigner = WamAssigner::new(&target.arg_regs);
    let assignments: Vec<CCAssignment> = descs
        .iter()
        .map(|d| assigner.assign(d))
        .collect::<BackendResult<_>>()?;
    let stack_bytes = assigner.stack_size();

    let mut insts = Vec::new();
    insts.push(MachineInst::new(
        Opcode::CallseqStart,
        vec![Operand::Imm(stack_bytes as i64)],
    ));
    for ((src, desc), assignment) in args.iter().zip(&assignments) {
        insts.extend(extend_to_word(*src, desc));
        match assignment.location {
            Location::Reg(arg_reg) => insts.push(build_register_move(arg_reg, *src)),
            Location::Stack(offset) => insts.push(MachineInst::new(
                Opcode::Stw,
                vec![
                    Operand::Reg(*src),
                    Operand::Reg(Reg::SP),
                    Operand::Imm(offset as i64),
                ],
            )),
        }
    }
    insts.push(MachineInst::new(
        Opcode::Call,
        vec![Operand::Sym {
            name: callee,
            addend: 0,
        }],
    ));
    insts.push(MachineInst::new(
        Opcode::CallseqEnd,
        vec![Operand::Imm(stack_bytes as i64)],
    ));

    let block = func.block_mut(block)?;
    block.insts.extend(insts);
    Ok(())
}
