// This module implements the fixup side of instruction encoding: the FixupKind
// enumeration, the per-kind value transform applied once a symbol's address is known,
// in-place application of a transformed value into already-encoded bytes, and the pure
// mapping from fixup kinds to ELF relocation type codes for the external object
// emitter. The transforms are: hi16 takes the upper address half, lo16 the lower half,
// pc16 converts a byte distance into a word-granular branch displacement with the
// 4-byte pipeline offset, and abs32 is the identity. Application ORs the transformed
// bits into the existing instruction word at the fixup's byte offset, masked to the
// kind's field width; a transformed value of zero skips the write since the field
// already reads as zero. The relocation type codes reuse the MIPS numbers from the
// object crate's ELF tables, which is what the rest of the toolchain expects.

//! Fixups and relocation-type mapping.

use object::elf;

/// Kinds of deferred patches recorded during encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixupKind {
    /// Upper 16 bits of an absolute address.
    Hi16,
    /// Lower 16 bits of an absolute address.
    Lo16,
    /// PC-relative 16-bit branch displacement in words.
    Pc16,
    /// Absolute 32-bit data word.
    Abs32,
}

impl FixupKind {
    /// Width in bits of the field the fixup patches.
    pub fn bits(self) -> u32 {
        match self {
            FixupKind::Hi16 | FixupKind::Lo16 | FixupKind::Pc16 => 16,
            FixupKind::Abs32 => 32,
        }
    }

    pub fn is_pc_relative(self) -> bool {
        matches!(self, FixupKind::Pc16)
    }
}

/// A deferred patch: where in the output buffer, what kind, which symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup<'a> {
    /// Byte offset of the patched instruction word in the output buffer.
    pub offset: u32,
    pub kind: FixupKind,
    pub symbol: &'a str,
    pub addend: i64,
}

/// Persisted relocation record handed to the external object emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationRecord<'a> {
    pub type_code: u32,
    pub symbol: &'a str,
    pub section_offset: u32,
    pub addend: i64,
}

/// Transform a resolved value for the target field of the given fixup kind.
///
/// For pc-relative fixups the input is already the distance from the fixup
/// location to the target; the transform accounts for the 4-byte pipeline
/// offset and the word-granular displacement field.
pub fn adjust_fixup_value(kind: FixupKind, value: u32) -> u32 {
    match kind {
        FixupKind::Hi16 => (value >> 16) & 0xffff,
        FixupKind::Lo16 => value & 0xffff,
        FixupKind::Pc16 => value.wrapping_sub(4) >> 2,
        FixupKind::Abs32 => value,
    }
}

/// Apply a resolved value to already-encoded code.
///
/// ORs the transformed bits into the existing instruction word at the
/// fixup's byte offset (big-endian), masked to the kind's field width.
/// A transformed value of zero skips the write; the field already reads
/// as zero. Bits outside the field are never touched.
pub fn apply_fixup(code: &mut [u8], fixup_offset: usize, kind: FixupKind, value: u32) {
    let value = adjust_fixup_value(kind, value);
    if value == 0 {
        return; // Doesn't change encoding.
    }

    let mut word = 0u32;
    for i in 0..4 {
        word = (word << 8) | code[fixup_offset + i] as u32;
    }

    let mask = if kind.bits() == 32 {
        u32::MAX
    } else {
        (1u32 << kind.bits()) - 1
    };
    word |= value & mask;

    for i in 0..4 {
        code[fixup_offset + i] = (word >> (8 * (3 - i))) as u8;
    }
}

/// Map a fixup kind to the ELF relocation type the object emitter persists.
///
/// The match is exhaustive over the kind enumeration, so the "unknown fixup
/// kind" failure of looser representations cannot occur here.
pub fn relocation_type(kind: FixupKind) -> u32 {
    match kind {
        FixupKind::Hi16 => elf::R_MIPS_HI16,
        FixupKind::Lo16 => elf::R_MIPS_LO16,
        FixupKind::Pc16 => elf::R_MIPS_PC16,
        FixupKind::Abs32 => elf::R_MIPS_32,
    }
}

/// Convert an ordered fixup list into persisted relocation records.
pub fn relocation_records<'a>(fixups: &[Fixup<'a>]) -> Vec<RelocationRecord<'a>> {
    fixups
        .iter()
        .map(|f| RelocationRecord {
            type_code: relocation_type(f.kind),
            symbol: f.symbol,
            section_offset: f.offset,
            addend: f.addend,
        })
        .collect()
}

/// Field value for a branch whose target block is known at encoding time.
///
/// `target_offset` and `inst_offset` are byte offsets in the output buffer.
/// The displacement is measured in words with the same 4-byte pipeline
/// offset the pc16 fixup transform applies.
pub fn pc_relative_field(target_offset: u32, inst_offset: u32) -> u32 {
    let distance = (target_offset as i64) - (inst_offset as i64) - 4;
    ((distance >> 2) as u32) & 0xffff
}
