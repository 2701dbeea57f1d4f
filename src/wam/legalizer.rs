// This module rewrites operation nodes the target cannot execute natively into
// equivalent sequences of supported nodes, before instruction building. WAM32 has a
// word-addressed memory bus, so a byte load becomes: align the address down to the
// containing word, load the whole word, shift the wanted byte down and mask it out.
// A byte store is the read-modify-write dual: load the containing word, clear the
// target byte lane with a mask, shift the new byte into position, OR it in and store
// the word back. Both assume big-endian byte packing within the word, and the store
// is not atomic with respect to other writers of the same word. Global addresses
// cannot be expressed as a single immediate either; under static relocation they
// materialize as the OR of a high-half and a low-half node, each later encoded with
// the matching fixup. Position-independent code is rejected outright. Every node the
// legalizer emits is legal by construction, so re-running classification over its
// output finds nothing to rewrite and the rewrite loop terminates.

//! Operation legalization for the word-addressed WAM32 bus.

use log::{debug, trace};

use crate::core::error::{BackendError, BackendResult};
use crate::core::machine_ir::AccessWidth;

use super::target::{RelocModel, TargetDescriptor};

/// Stable identifier of a node in an [`OpGraph`].
pub type NodeId = usize;

/// Operation kinds of the pre-instruction value graph.
///
/// The graph is the selector's side of the fence: nodes carry value
/// semantics, not encodings. `Shl`/`Shr` here shift by another node, which
/// the selector later strength-reduces to immediate-amount shifts where it
/// can.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind<'a> {
    /// Constant 32-bit value.
    Const(i64),
    /// Opaque input value (function argument, prior computation).
    Input,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    /// Memory load of the given width; operand 0 is the address.
    Load(AccessWidth),
    /// Memory store of the given width; operand 0 is the value, 1 the address.
    Store(AccessWidth),
    /// Address of a global symbol.
    GlobalAddr { symbol: &'a str },
    /// Upper 16 bits of a symbol's address (encoded with a hi16 fixup).
    HighPart { symbol: &'a str },
    /// Lower 16 bits of a symbol's address (encoded with a lo16 fixup).
    LowPart { symbol: &'a str },
}

/// One node: kind plus ordered operand node ids.
#[derive(Debug, Clone)]
pub struct OpNode<'a> {
    pub kind: OpKind<'a>,
    pub operands: Vec<NodeId>,
}

/// A flat value graph. Nodes are append-only; rewrites replace a node's
/// kind/operands in place so existing users keep their ids.
#[derive(Debug, Default)]
pub struct OpGraph<'a> {
    nodes: Vec<OpNode<'a>>,
}

impl<'a> OpGraph<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: OpKind<'a>, operands: Vec<NodeId>) -> NodeId {
        self.nodes.push(OpNode { kind, operands });
        self.nodes.len() - 1
    }

    pub fn constant(&mut self, value: i64) -> NodeId {
        self.add(OpKind::Const(value), vec![])
    }

    pub fn node(&self, id: NodeId) -> &OpNode<'a> {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn replace(&mut self, id: NodeId, kind: OpKind<'a>, operands: Vec<NodeId>) {
        self.nodes[id] = OpNode { kind, operands };
    }
}

/// Whether a node must be rewritten before instruction building.
///
/// Word-width memory access and plain ALU nodes are native; sub-word access
/// and whole global addresses are not. The legalizer only ever emits native
/// kinds, which is what makes legalization idempotent.
pub fn needs_legalization(kind: OpKind<'_>) -> bool {
    match kind {
        OpKind::Load(width) | OpKind::Store(width) => width != AccessWidth::Word,
        OpKind::GlobalAddr { .. } => true,
        _ => false,
    }
}

/// `aligned = addr & !3` and `shift = 24 - ((addr & 3) << 3)`, as nodes.
///
/// `shift` is the bit position of the addressed byte within its big-endian
/// containing word: byte 0 sits in bits 31:24.
fn aligned_addr_and_shift<'a>(graph: &mut OpGraph<'a>, addr: NodeId) -> (NodeId, NodeId) {
    let three = graph.constant(3);
    let byte_in_word = graph.add(OpKind::And, vec![addr, three]);
    let bit_offset = {
        let shl3 = graph.constant(3);
        graph.add(OpKind::Shl, vec![byte_in_word, shl3])
    };
    let twenty_four = graph.constant(24);
    let shift = graph.add(OpKind::Sub, vec![twenty_four, bit_offset]);

    let not_three = graph.constant(!3);
    let aligned = graph.add(OpKind::And, vec![addr, not_three]);
    (aligned, shift)
}

/// Rewrite a byte load in place: word load at the aligned address, shift the
/// byte lane down, mask to 8 bits.
fn legalize_byte_load(graph: &mut OpGraph<'_>, id: NodeId) -> BackendResult<()> {
    let addr = graph.node(id).operands[0];
    let (aligned, shift) = aligned_addr_and_shift(graph, addr);

    let word = graph.add(OpKind::Load(AccessWidth::Word), vec![aligned]);
    let shifted = graph.add(OpKind::Shr, vec![word, shift]);
    let mask = graph.constant(0xff);
    graph.replace(id, OpKind::And, vec![shifted, mask]);
    Ok(())
}

/// Rewrite a byte store in place as the read-modify-write word sequence.
///
/// Not atomic: a concurrent writer to the same word races with the reload.
fn legalize_byte_store(graph: &mut OpGraph<'_>, id: NodeId) -> BackendResult<()> {
    let value = graph.node(id).operands[0];
    let addr = graph.node(id).operands[1];
    let (aligned, shift) = aligned_addr_and_shift(graph, addr);

    let word = graph.add(OpKind::Load(AccessWidth::Word), vec![aligned]);

    // mask = !(0xff << shift), built as xor with all-ones.
    let byte_mask = graph.constant(0xff);
    let lane = graph.add(OpKind::Shl, vec![byte_mask, shift]);
    let all_ones = graph.constant(-1);
    let keep_mask = graph.add(OpKind::Xor, vec![lane, all_ones]);
    let kept = graph.add(OpKind::And, vec![word, keep_mask]);

    let byte_mask2 = graph.constant(0xff);
    let new_byte = graph.add(OpKind::And, vec![value, byte_mask2]);
    let placed = graph.add(OpKind::Shl, vec![new_byte, shift]);
    let combined = graph.add(OpKind::Or, vec![kept, placed]);

    graph.replace(id, OpKind::Store(AccessWidth::Word), vec![combined, aligned]);
    Ok(())
}

/// Rewrite a global address as `HighPart(sym) | LowPart(sym)`.
fn legalize_global_addr<'a>(
    graph: &mut OpGraph<'a>,
    id: NodeId,
    symbol: &'a str,
    target: &TargetDescriptor,
) -> BackendResult<()> {
    if target.reloc_model == RelocModel::Pic {
        return Err(BackendError::UnsupportedRelocModel {
            symbol: symbol.to_string(),
        });
    }

    let hi = graph.add(OpKind::HighPart { symbol }, vec![]);
    let lo = graph.add(OpKind::LowPart { symbol }, vec![]);
    graph.replace(id, OpKind::Or, vec![hi, lo]);
    Ok(())
}

/// Legalize one node. Nodes that are already legal are left alone.
pub fn legalize_node<'a>(
    graph: &mut OpGraph<'a>,
    id: NodeId,
    target: &TargetDescriptor,
) -> BackendResult<bool> {
    let node = graph.node(id);
    match node.kind {
        OpKind::Load(AccessWidth::Byte) => {
            trace!("legalizing byte load at node {id}");
            legalize_byte_load(graph, id)?;
            Ok(true)
        }
        OpKind::Store(AccessWidth::Byte) => {
            trace!("legalizing byte store at node {id}");
            legalize_byte_store(graph, id)?;
            Ok(true)
        }
        OpKind::Load(AccessWidth::Half) => Err(BackendError::UnsupportedWidth {
            operation: "load",
            width: 16,
        }),
        OpKind::Store(AccessWidth::Half) => Err(BackendError::UnsupportedWidth {
            operation: "store",
            width: 16,
        }),
        OpKind::GlobalAddr { symbol } => {
            trace!("legalizing global address of `{symbol}` at node {id}");
            legalize_global_addr(graph, id, symbol, target)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// Legalize every illegal node in the graph and return the rewrite count.
///
/// Nodes appended by a rewrite are themselves visited; since rewrites only
/// emit legal kinds the sweep reaches a fixed point after one pass over the
/// final node list.
pub fn legalize_graph<'a>(
    graph: &mut OpGraph<'a>,
    target: &TargetDescriptor,
) -> BackendResult<usize> {
    let mut rewritten = 0;
    let mut id = 0;
    while id < graph.len() {
        if legalize_node(graph, id, target)? {
            rewritten += 1;
        }
        id += 1;
    }
    if rewritten > 0 {
        debug!("legalized {rewritten} nodes");
    }
    Ok(rewritten)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference word-addressable memory: an array of big-endian 32-bit
    /// words, addressed in bytes.
    struct WordMemory {
        words: Vec<u32>,
    }

    impl WordMemory {
        fn new(words: usize) -> Self {
            Self {
                words: vec![0; words],
            }
        }

        fn load_word(&self, addr: u32) -> u32 {
            assert_eq!(addr & 3, 0, "word access to unaligned address {addr:#x}");
            self.words[(addr / 4) as usize]
        }

        fn store_word(&mut self, addr: u32, value: u32) {
            assert_eq!(addr & 3, 0, "word access to unaligned address {addr:#x}");
            self.words[(addr / 4) as usize] = value;
        }
    }

    /// Evaluate the graph against the reference memory. Symbol parts resolve
    /// through `resolve`.
    fn eval(
        graph: &OpGraph<'_>,
        id: NodeId,
        inputs: &[(NodeId, u32)],
        memory: &mut WordMemory,
        resolve: &dyn Fn(&str) -> u32,
    ) -> u32 {
        let node = graph.node(id);
        let op =
            |n: usize, memory: &mut WordMemory| eval(graph, node.operands[n], inputs, memory, resolve);
        match node.kind {
            OpKind::Const(v) => v as u32,
            OpKind::Input => {
                inputs
                    .iter()
                    .find(|(input, _)| *input == id)
                    .expect("unbound input node")
                    .1
            }
            OpKind::Add => op(0, memory).wrapping_add(op(1, memory)),
            OpKind::Sub => op(0, memory).wrapping_sub(op(1, memory)),
            OpKind::And => op(0, memory) & op(1, memory),
            OpKind::Or => op(0, memory) | op(1, memory),
            OpKind::Xor => op(0, memory) ^ op(1, memory),
            OpKind::Shl => op(0, memory) << (op(1, memory) & 31),
            OpKind::Shr => op(0, memory) >> (op(1, memory) & 31),
            OpKind::Load(AccessWidth::Word) => {
                let addr = op(0, memory);
                memory.load_word(addr)
            }
            OpKind::Store(AccessWidth::Word) => {
                let value = op(0, memory);
                let addr = op(1, memory);
                memory.store_word(addr, value);
                0
            }
            OpKind::Load(_) | OpKind::Store(_) => panic!("sub-word access survived legalization"),
            OpKind::GlobalAddr { .. } => panic!("global address survived legalization"),
            OpKind::HighPart { symbol } => resolve(symbol) & 0xffff_0000,
            OpKind::LowPart { symbol } => resolve(symbol) & 0xffff,
        }
    }

    fn no_symbols(_: &str) -> u32 {
        panic!("no symbols in this test")
    }

    #[test]
    fn test_byte_store_then_load_round_trip() {
        let target = TargetDescriptor::default();

        // All four byte lanes, two byte values each.
        for lane in 0..4u32 {
            for value in [0x00u32, 0xa5] {
                let addr_val = 8 + lane;

                let mut graph = OpGraph::new();
                let addr = graph.add(OpKind::Input, vec![]);
                let val = graph.add(OpKind::Input, vec![]);
                let store = graph.add(OpKind::Store(AccessWidth::Byte), vec![val, addr]);
                let load = graph.add(OpKind::Load(AccessWidth::Byte), vec![addr]);
                legalize_graph(&mut graph, &target).unwrap();

                let mut memory = WordMemory::new(8);
                memory.store_word(8, 0x1122_3344);

                let inputs = [(addr, addr_val), (val, value)];
                eval(&graph, store, &inputs, &mut memory, &no_symbols);
                let read = eval(&graph, load, &inputs, &mut memory, &no_symbols);
                assert_eq!(read, value, "lane {lane} value {value:#x}");

                // The other three bytes of the containing word are intact.
                let word = memory.load_word(8);
                for other in 0..4u32 {
                    if other == lane {
                        continue;
                    }
                    let shift = 24 - other * 8;
                    let expected = (0x1122_3344u32 >> shift) & 0xff;
                    assert_eq!(
                        (word >> shift) & 0xff,
                        expected,
                        "lane {other} disturbed by store to lane {lane}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_byte_load_is_big_endian() {
        let target = TargetDescriptor::default();
        let mut graph = OpGraph::new();
        let addr = graph.add(OpKind::Input, vec![]);
        let load = graph.add(OpKind::Load(AccessWidth::Byte), vec![addr]);
        legalize_graph(&mut graph, &target).unwrap();

        let mut memory = WordMemory::new(1);
        memory.store_word(0, 0x1122_3344);

        // Byte 0 is the most significant byte of the word.
        for (lane, expected) in [(0, 0x11), (1, 0x22), (2, 0x33), (3, 0x44)] {
            let read = eval(&graph, load, &[(addr, lane)], &mut memory, &no_symbols);
            assert_eq!(read, expected);
        }
    }

    #[test]
    fn test_legalization_is_idempotent() {
        let target = TargetDescriptor::default();
        let mut graph = OpGraph::new();
        let addr = graph.add(OpKind::Input, vec![]);
        let val = graph.add(OpKind::Input, vec![]);
        graph.add(OpKind::Store(AccessWidth::Byte), vec![val, addr]);
        graph.add(OpKind::Load(AccessWidth::Byte), vec![addr]);
        graph.add(OpKind::GlobalAddr { symbol: "table" }, vec![]);

        let first = legalize_graph(&mut graph, &target).unwrap();
        assert_eq!(first, 3);

        // Everything the legalizer produced is already legal.
        let second = legalize_graph(&mut graph, &target).unwrap();
        assert_eq!(second, 0);
    }

    #[test]
    fn test_global_address_splits_into_halves() {
        let target = TargetDescriptor::default();
        let mut graph = OpGraph::new();
        let ga = graph.add(OpKind::GlobalAddr { symbol: "table" }, vec![]);
        legalize_graph(&mut graph, &target).unwrap();

        // hi | lo reconstructs the address once the symbol resolves.
        let resolve = |symbol: &str| -> u32 {
            assert_eq!(symbol, "table");
            0x0001_2345
        };
        let mut memory = WordMemory::new(1);
        let value = eval(&graph, ga, &[], &mut memory, &resolve);
        assert_eq!(value, 0x0001_2345);

        // The rewritten node itself is a plain Or.
        assert_eq!(graph.node(ga).kind, OpKind::Or);
    }

    #[test]
    fn test_pic_global_address_fails_fast() {
        let target = TargetDescriptor::new(RelocModel::Pic);
        let mut graph = OpGraph::new();
        graph.add(OpKind::GlobalAddr { symbol: "table" }, vec![]);

        let err = legalize_graph(&mut graph, &target).unwrap_err();
        assert!(matches!(err, BackendError::UnsupportedRelocModel { .. }));
    }

    #[test]
    fn test_halfword_access_is_unsupported() {
        let target = TargetDescriptor::default();

        let mut graph = OpGraph::new();
        let addr = graph.add(OpKind::Input, vec![]);
        graph.add(OpKind::Load(AccessWidth::Half), vec![addr]);
        let err = legalize_graph(&mut graph, &target).unwrap_err();
        assert!(matches!(
            err,
            BackendError::UnsupportedWidth {
                operation: "load",
                width: 16
            }
        ));

        let mut graph = OpGraph::new();
        let addr = graph.add(OpKind::Input, vec![]);
        let val = graph.add(OpKind::Input, vec![]);
        graph.add(OpKind::Store(AccessWidth::Half), vec![val, addr]);
        let err = legalize_graph(&mut graph, &target).unwrap_err();
        assert!(matches!(
            err,
            BackendError::UnsupportedWidth {
                operation: "store",
                width: 16
            }
        ));
    }

    #[test]
    fn test_word_access_is_already_legal() {
        let target = TargetDescriptor::default();
        let mut graph = OpGraph::new();
        let addr = graph.add(OpKind::Input, vec![]);
        graph.add(OpKind::Load(AccessWidth::Word), vec![addr]);
        assert_eq!(legalize_graph(&mut graph, &target).unwrap(), 0);
    }
}
