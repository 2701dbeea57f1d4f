// This module defines the machine-level intermediate representation exchanged between
// the upstream instruction selector, the backend passes in this crate, and the external
// register allocator. A MachineFunction is an ordered list of BasicBlocks (entry block
// first) plus a frame-object table and live-in/live-out register sets for calling-
// convention bookkeeping. Each BasicBlock owns an ordered instruction list and a
// successor set; terminator instructions must form a suffix of the list. A MachineInst
// is an opcode tag plus an ordered operand list where operands are registers, immediate
// integers, interned symbol references, frame-slot references, or basic-block
// references. The Opcode enum carries behavioral properties (terminator, delay slot,
// pseudo, debug-only) as match-dispatched methods; the per-opcode encoding layout lives
// in the target descriptor, not here. Frame objects carry size and alignment and
// receive a fixed byte offset exactly once, when the frame is finalized.

//! Machine IR for the WAM32 backend.
//!
//! The representation is deliberately flat: blocks are identified by stable
//! ids, the block vector order is the layout order, and all registers are
//! physical. Pseudo instructions (`select`, `phi`, call-frame markers) are
//! expanded or deleted by the backend passes before encoding.

use super::error::{BackendError, BackendResult};
use super::register_file::{Reg, RegSet};

/// Stable identifier of a basic block within its function.
pub type BlockId = usize;

/// Memory access width for loads, stores and value extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte,
    Half,
    Word,
}

impl AccessWidth {
    pub fn bits(self) -> u32 {
        match self {
            AccessWidth::Byte => 8,
            AccessWidth::Half => 16,
            AccessWidth::Word => 32,
        }
    }
}

/// Condition codes carried by the conditional-select pseudo operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondCode {
    Eq,
    Ne,
    UGt,
    SGt,
    UGe,
    SGe,
    ULe,
    SLe,
    ULt,
    SLt,
}

impl CondCode {
    /// Decode a condition-code immediate as carried in a select pseudo.
    /// Unknown values are the caller's fatal-error case.
    pub fn from_imm(imm: i64) -> Option<CondCode> {
        match imm {
            0 => Some(CondCode::Eq),
            1 => Some(CondCode::Ne),
            2 => Some(CondCode::UGt),
            3 => Some(CondCode::SGt),
            4 => Some(CondCode::UGe),
            5 => Some(CondCode::SGe),
            6 => Some(CondCode::ULe),
            7 => Some(CondCode::SLe),
            8 => Some(CondCode::ULt),
            9 => Some(CondCode::SLt),
            _ => None,
        }
    }

    pub fn as_imm(self) -> i64 {
        match self {
            CondCode::Eq => 0,
            CondCode::Ne => 1,
            CondCode::UGt => 2,
            CondCode::SGt => 3,
            CondCode::UGe => 4,
            CondCode::SGe => 5,
            CondCode::ULe => 6,
            CondCode::SLe => 7,
            CondCode::ULt => 8,
            CondCode::SLt => 9,
        }
    }

    /// All supported condition codes, for exhaustive testing.
    pub const ALL: [CondCode; 10] = [
        CondCode::Eq,
        CondCode::Ne,
        CondCode::UGt,
        CondCode::SGt,
        CondCode::UGe,
        CondCode::SGe,
        CondCode::ULe,
        CondCode::SLe,
        CondCode::ULt,
        CondCode::SLt,
    ];
}

/// WAM32 opcodes, real and pseudo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Register-format ALU.
    Add,
    Sub,
    And,
    Or,
    Xor,
    // Shifts by a 5-bit immediate amount.
    Shl,
    Shr,
    Sar,
    // Immediate-format ALU.
    Addi,
    Andi,
    Ori,
    Xori,
    /// Load a 16-bit immediate into the upper half of a register.
    Lui,
    // Word memory access.
    Ldw,
    Stw,
    // Branches: taken when the second operand compares against the first
    // (`beq rx, ry` branches on rx == ry; `bgts rx, ry` branches on ry > rx).
    Beq,
    Bne,
    Bgtu,
    Bgts,
    Jmp,
    Call,
    Ret,
    Nop,
    // Pseudo instructions, gone before encoding.
    Phi,
    Select,
    CallseqStart,
    CallseqEnd,
    DbgValue,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::Shr => "shr",
            Opcode::Sar => "sar",
            Opcode::Addi => "addi",
            Opcode::Andi => "andi",
            Opcode::Ori => "ori",
            Opcode::Xori => "xori",
            Opcode::Lui => "lui",
            Opcode::Ldw => "ldw",
            Opcode::Stw => "stw",
            Opcode::Beq => "beq",
            Opcode::Bne => "bne",
            Opcode::Bgtu => "bgtu",
            Opcode::Bgts => "bgts",
            Opcode::Jmp => "jmp",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Nop => "nop",
            Opcode::Phi => "phi",
            Opcode::Select => "select",
            Opcode::CallseqStart => "callseq_start",
            Opcode::CallseqEnd => "callseq_end",
            Opcode::DbgValue => "dbg_value",
        }
    }

    /// Whether the instruction ends a basic block.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Beq
                | Opcode::Bne
                | Opcode::Bgtu
                | Opcode::Bgts
                | Opcode::Jmp
                | Opcode::Ret
        )
    }

    /// Whether the hardware executes the following slot regardless of the
    /// branch outcome.
    pub fn has_delay_slot(self) -> bool {
        matches!(
            self,
            Opcode::Beq
                | Opcode::Bne
                | Opcode::Bgtu
                | Opcode::Bgts
                | Opcode::Jmp
                | Opcode::Call
                | Opcode::Ret
        )
    }

    /// Whether the opcode is a pseudo with no hardware encoding.
    pub fn is_pseudo(self) -> bool {
        matches!(
            self,
            Opcode::Phi
                | Opcode::Select
                | Opcode::CallseqStart
                | Opcode::CallseqEnd
                | Opcode::DbgValue
        )
    }

    /// Debug-only marker carrying no machine semantics.
    pub fn is_debug(self) -> bool {
        matches!(self, Opcode::DbgValue)
    }
}

/// A machine instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand<'a> {
    Reg(Reg),
    Imm(i64),
    /// Reference to a symbol whose address is resolved at link time.
    Sym { name: &'a str, addend: i64 },
    /// Reference to a frame object, replaced by sp + offset when the
    /// frame is finalized.
    Frame(usize),
    /// Reference to a basic block of the same function.
    Block(BlockId),
}

impl<'a> Operand<'a> {
    pub fn reg(self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn imm(self) -> Option<i64> {
        match self {
            Operand::Imm(v) => Some(v),
            _ => None,
        }
    }

    pub fn block(self) -> Option<BlockId> {
        match self {
            Operand::Block(b) => Some(b),
            _ => None,
        }
    }
}

/// A machine instruction: opcode plus ordered operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineInst<'a> {
    pub opcode: Opcode,
    pub operands: Vec<Operand<'a>>,
}

impl<'a> MachineInst<'a> {
    pub fn new(opcode: Opcode, operands: Vec<Operand<'a>>) -> Self {
        Self { opcode, operands }
    }

    /// A `nop` instruction.
    pub fn nop() -> Self {
        Self::new(Opcode::Nop, vec![])
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    pub fn has_delay_slot(&self) -> bool {
        self.opcode.has_delay_slot()
    }

    pub fn is_debug(&self) -> bool {
        self.opcode.is_debug()
    }

    /// Fetch operand `idx` as a register or fail with a shape diagnostic.
    pub fn reg_operand(&self, idx: usize) -> BackendResult<Reg> {
        self.operands
            .get(idx)
            .and_then(|o| o.reg())
            .ok_or(BackendError::MalformedInstruction {
                mnemonic: self.opcode.mnemonic(),
                reason: "expected register operand",
            })
    }

    /// Fetch operand `idx` as an immediate or fail with a shape diagnostic.
    pub fn imm_operand(&self, idx: usize) -> BackendResult<i64> {
        self.operands
            .get(idx)
            .and_then(|o| o.imm())
            .ok_or(BackendError::MalformedInstruction {
                mnemonic: self.opcode.mnemonic(),
                reason: "expected immediate operand",
            })
    }

    /// Fetch operand `idx` as a block reference or fail with a shape diagnostic.
    pub fn block_operand(&self, idx: usize) -> BackendResult<BlockId> {
        self.operands
            .get(idx)
            .and_then(|o| o.block())
            .ok_or(BackendError::MalformedInstruction {
                mnemonic: self.opcode.mnemonic(),
                reason: "expected block operand",
            })
    }
}

/// A basic block: instruction list plus successor edges.
#[derive(Debug, Clone)]
pub struct BasicBlock<'a> {
    pub id: BlockId,
    pub insts: Vec<MachineInst<'a>>,
    pub successors: Vec<BlockId>,
}

impl<'a> BasicBlock<'a> {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            insts: Vec::new(),
            successors: Vec::new(),
        }
    }

    pub fn push(&mut self, inst: MachineInst<'a>) {
        self.insts.push(inst);
    }

    pub fn add_successor(&mut self, succ: BlockId) {
        if !self.successors.contains(&succ) {
            self.successors.push(succ);
        }
    }
}

/// A stack slot in the frame-object table.
#[derive(Debug, Clone)]
pub struct FrameObject {
    pub size: u32,
    pub align: u32,
    /// Byte offset from the post-prologue stack pointer; assigned exactly
    /// once by frame finalization.
    pub offset: Option<u32>,
    /// Fixed objects live in the caller's frame, above ours: their offset is
    /// relative to the pre-prologue stack pointer. Used for incoming stack
    /// arguments.
    pub fixed: bool,
}

/// The function's frame-object table.
#[derive(Debug, Clone, Default)]
pub struct FrameInfo {
    pub objects: Vec<FrameObject>,
    stack_size: Option<u32>,
}

impl FrameInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new frame object and return its index.
    pub fn create_object(&mut self, size: u32, align: u32) -> usize {
        self.objects.push(FrameObject {
            size,
            align: align.max(1),
            offset: None,
            fixed: false,
        });
        self.objects.len() - 1
    }

    /// Allocate an object at a fixed offset in the caller's frame, just
    /// above our own. Incoming stack arguments live here.
    pub fn create_fixed_object(&mut self, size: u32, offset: u32) -> usize {
        self.objects.push(FrameObject {
            size,
            align: 4,
            offset: Some(offset),
            fixed: true,
        });
        self.objects.len() - 1
    }

    pub fn is_finalized(&self) -> bool {
        self.stack_size.is_some()
    }

    /// Total stack size, available once the frame is finalized.
    pub fn stack_size(&self) -> Option<u32> {
        self.stack_size
    }

    /// Assign every object a fixed offset and freeze the total stack size.
    /// Offsets are assigned in creation order, each aligned to the object's
    /// alignment; the total is rounded up to 8 bytes. Calling this twice is
    /// a frame-layout error: offsets are immutable once resolved.
    pub fn finalize(&mut self) -> BackendResult<()> {
        if self.is_finalized() {
            return Err(BackendError::FrameLayout {
                reason: "frame offsets already resolved".to_string(),
            });
        }

        let mut offset = 0u32;
        for obj in &mut self.objects {
            if obj.fixed {
                continue;
            }
            offset = align_up(offset, obj.align);
            obj.offset = Some(offset);
            offset += obj.size;
        }
        self.stack_size = Some(align_up(offset, 8));
        Ok(())
    }

    /// Resolved byte offset of an object from the post-prologue stack
    /// pointer. Fixed objects sit above the frame, so their offset is the
    /// total stack size plus their position in the caller's outgoing area.
    pub fn object_offset(&self, index: usize) -> BackendResult<u32> {
        let obj = self
            .objects
            .get(index)
            .filter(|o| o.offset.is_some())
            .ok_or_else(|| BackendError::FrameLayout {
                reason: format!("frame object {index} has no resolved offset"),
            })?;
        let offset = obj.offset.unwrap_or(0);
        if obj.fixed {
            let stack_size = self.stack_size.ok_or_else(|| BackendError::FrameLayout {
                reason: "fixed object offset requested before frame finalization".to_string(),
            })?;
            Ok(stack_size + offset)
        } else {
            Ok(offset)
        }
    }
}

fn align_up(value: u32, align: u32) -> u32 {
    (value + align - 1) & !(align - 1)
}

/// A machine function: blocks in layout order, frame table, and the
/// live-in/live-out register sets maintained by calling-convention lowering.
#[derive(Debug)]
pub struct MachineFunction<'a> {
    pub name: &'a str,
    pub blocks: Vec<BasicBlock<'a>>,
    pub frame: FrameInfo,
    pub live_ins: RegSet,
    pub live_outs: RegSet,
    next_block: BlockId,
}

impl<'a> MachineFunction<'a> {
    /// Create a function with an empty entry block.
    pub fn new(name: &'a str) -> Self {
        Self {
            name,
            blocks: vec![BasicBlock::new(0)],
            frame: FrameInfo::new(),
            live_ins: RegSet::new(),
            live_outs: RegSet::new(),
            next_block: 1,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.blocks[0].id
    }

    /// Allocate a fresh block that is not yet part of the layout.
    pub fn alloc_block(&mut self) -> BasicBlock<'a> {
        let id = self.next_block;
        self.next_block += 1;
        BasicBlock::new(id)
    }

    /// Append a fresh block at the end of the layout and return its id.
    pub fn append_block(&mut self) -> BlockId {
        let block = self.alloc_block();
        let id = block.id;
        self.blocks.push(block);
        id
    }

    /// Layout position of a block.
    pub fn block_position(&self, id: BlockId) -> Option<usize> {
        self.blocks.iter().position(|b| b.id == id)
    }

    pub fn block(&self, id: BlockId) -> BackendResult<&BasicBlock<'a>> {
        self.blocks
            .iter()
            .find(|b| b.id == id)
            .ok_or(BackendError::MalformedInstruction {
                mnemonic: "block",
                reason: "reference to a block not in the function",
            })
    }

    pub fn block_mut(&mut self, id: BlockId) -> BackendResult<&mut BasicBlock<'a>> {
        self.blocks
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(BackendError::MalformedInstruction {
                mnemonic: "block",
                reason: "reference to a block not in the function",
            })
    }
}
