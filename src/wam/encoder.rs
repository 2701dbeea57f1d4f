// This module converts fully operand-resolved machine instructions into relocatable
// binary. Every WAM32 instruction encodes into exactly four big-endian bytes according
// to the per-opcode layout table in the target descriptor. Register operands encode as
// their class-local index; memory operands pack the base register into bits 25:21 with
// a 16-bit displacement in the low half; shift amounts mask to 5 bits, logic immediates
// to 16 unsigned bits, and arithmetic immediates are sign-extended from 16 bits.
// Operands that name an unresolved symbol encode as a zero field plus a fixup of the
// operand's required kind. Branch targets that name a block of the same function are
// resolved directly against the precomputed block offsets. encode_instruction is a pure
// function of the instruction and its byte offset in the output buffer, so instructions
// must be encoded in final emission order; encode_function drives that order and
// accumulates the byte stream plus the ordered fixup list.

//! WAM32 instruction encoding.

use std::collections::HashMap;

use crate::core::error::{BackendError, BackendResult};
use crate::core::machine_ir::{BlockId, MachineFunction, MachineInst, Operand};

use super::fixups::{pc_relative_field, Fixup, FixupKind};
use super::target::{encoding_info, InstFormat, OpcodeInfo};

/// Size in bytes of every encoded instruction.
pub const INST_BYTES: u32 = 4;

/// Byte offsets of each block in the encoded function, keyed by block id.
pub type BlockOffsets = HashMap<BlockId, u32>;

/// Compute the byte offset of every block in layout order.
///
/// Valid only once all pseudo instructions are expanded: every remaining
/// instruction occupies exactly one word.
pub fn block_offsets(func: &MachineFunction<'_>) -> BackendResult<BlockOffsets> {
    let mut offsets = HashMap::new();
    let mut offset = 0u32;
    for block in &func.blocks {
        offsets.insert(block.id, offset);
        for inst in &block.insts {
            if encoding_info(inst.opcode).is_none() {
                return Err(BackendError::MissingEncoding {
                    mnemonic: inst.opcode.mnemonic(),
                });
            }
            offset += INST_BYTES;
        }
    }
    Ok(offsets)
}

fn layout(inst: &MachineInst<'_>) -> BackendResult<&'static OpcodeInfo> {
    encoding_info(inst.opcode).ok_or(BackendError::MissingEncoding {
        mnemonic: inst.opcode.mnemonic(),
    })
}

fn reg_field(inst: &MachineInst<'_>, idx: usize) -> BackendResult<u32> {
    Ok(inst.reg_operand(idx)?.encoding())
}

/// Immediate field value, or a zero placeholder plus a fixup for a symbol
/// operand. `fixup_kind` is the kind the operand position requires.
fn imm_field<'a>(
    inst: &MachineInst<'a>,
    idx: usize,
    mask: u32,
    fixup_kind: FixupKind,
    inst_offset: u32,
    fixups: &mut Vec<Fixup<'a>>,
) -> BackendResult<u32> {
    match inst.operands.get(idx) {
        Some(&Operand::Imm(v)) => Ok((v as u32) & mask),
        Some(&Operand::Sym { name, addend }) => {
            fixups.push(Fixup {
                offset: inst_offset,
                kind: fixup_kind,
                symbol: name,
                addend,
            });
            Ok(0)
        }
        _ => Err(BackendError::MalformedInstruction {
            mnemonic: inst.opcode.mnemonic(),
            reason: "expected immediate or symbol operand",
        }),
    }
}

/// Branch-target field: a block reference resolves directly, a symbol
/// becomes a pc16 fixup, a raw immediate passes through.
fn target_field<'a>(
    inst: &MachineInst<'a>,
    idx: usize,
    inst_offset: u32,
    offsets: &BlockOffsets,
    fixups: &mut Vec<Fixup<'a>>,
) -> BackendResult<u32> {
    match inst.operands.get(idx) {
        Some(&Operand::Block(target)) => {
            let target_offset =
                offsets
                    .get(&target)
                    .copied()
                    .ok_or(BackendError::MalformedInstruction {
                        mnemonic: inst.opcode.mnemonic(),
                        reason: "branch target block is not in the function layout",
                    })?;
            Ok(pc_relative_field(target_offset, inst_offset))
        }
        Some(&Operand::Sym { name, addend }) => {
            fixups.push(Fixup {
                offset: inst_offset,
                kind: FixupKind::Pc16,
                symbol: name,
                addend,
            });
            Ok(0)
        }
        Some(&Operand::Imm(v)) => Ok((v as u32) & 0xffff),
        _ => Err(BackendError::MalformedInstruction {
            mnemonic: inst.opcode.mnemonic(),
            reason: "expected block, symbol or immediate branch target",
        }),
    }
}

/// Encode one instruction at the given byte offset.
///
/// Returns the instruction word and appends any fixups for unresolved
/// symbol operands. Pure: identical inputs always produce identical output.
pub fn encode_instruction<'a>(
    inst: &MachineInst<'a>,
    inst_offset: u32,
    offsets: &BlockOffsets,
    fixups: &mut Vec<Fixup<'a>>,
) -> BackendResult<u32> {
    let info = layout(inst)?;
    let mut word = (info.major as u32) << 26;

    match info.format {
        InstFormat::Reg3 => {
            // op rd, rs, rt
            word |= reg_field(inst, 0)? << 11;
            word |= reg_field(inst, 1)? << 21;
            word |= reg_field(inst, 2)? << 16;
        }
        InstFormat::RegImm(_) => {
            // op rt, rs, imm16. Arithmetic immediates sign-extend from 16
            // bits and logic immediates are unsigned; both occupy the same
            // low half, so the field value is the masked low 16 bits either
            // way. Symbol operands here carry the low address half.
            word |= reg_field(inst, 0)? << 16;
            word |= reg_field(inst, 1)? << 21;
            word |= imm_field(inst, 2, 0xffff, FixupKind::Lo16, inst_offset, fixups)?;
        }
        InstFormat::ShiftImm => {
            // op rd, rt, sa
            word |= reg_field(inst, 0)? << 11;
            word |= reg_field(inst, 1)? << 16;
            word |= imm_field(inst, 2, 0x1f, FixupKind::Lo16, inst_offset, fixups)? << 6;
        }
        InstFormat::UpperImm => {
            // op rt, imm16 -- symbol operands take the high address half.
            word |= reg_field(inst, 0)? << 16;
            word |= imm_field(inst, 1, 0xffff, FixupKind::Hi16, inst_offset, fixups)?;
        }
        InstFormat::Mem => {
            // op rt, base, disp16
            word |= reg_field(inst, 0)? << 16;
            word |= reg_field(inst, 1)? << 21;
            word |= imm_field(inst, 2, 0xffff, FixupKind::Lo16, inst_offset, fixups)?;
        }
        InstFormat::Branch => {
            // op rs, rt, target
            word |= reg_field(inst, 0)? << 21;
            word |= reg_field(inst, 1)? << 16;
            word |= target_field(inst, 2, inst_offset, offsets, fixups)?;
        }
        InstFormat::Jump => {
            word |= target_field(inst, 0, inst_offset, offsets, fixups)?;
        }
        InstFormat::CallTarget => {
            word |= target_field(inst, 0, inst_offset, offsets, fixups)?;
        }
        InstFormat::Return => {
            word |= reg_field(inst, 0)? << 21;
        }
        InstFormat::NoOperands => {}
    }

    Ok(word)
}

/// Encode a whole function in layout order.
///
/// Returns the big-endian byte stream and the ordered fixup list. Fixup
/// offsets are relative to the returned buffer, so the instruction order
/// is final once this runs.
pub fn encode_function<'a>(
    func: &MachineFunction<'a>,
) -> BackendResult<(Vec<u8>, Vec<Fixup<'a>>)> {
    let offsets = block_offsets(func)?;

    let mut code = Vec::new();
    let mut fixups = Vec::new();

    for block in &func.blocks {
        for inst in &block.insts {
            let inst_offset = code.len() as u32;
            let word = encode_instruction(inst, inst_offset, &offsets, &mut fixups)?;
            code.extend_from_slice(&word.to_be_bytes());
        }
    }

    log::debug!(
        "encoded {}: {} bytes, {} fixups",
        func.name,
        code.len(),
        fixups.len()
    );

    Ok((code, fixups))
}
