//! Classifier predicates: `riprelp`/`immrelp`/`syscallp` from
//! `examples/original_source/build/xv-x64.c`, ported directly — each is a
//! one-line inline function there, kept one-line here.

use crate::instruction::{AddrMode, Escape, Instruction};
use crate::table;

/// Does this instruction's memory operand address relative to `%rip`?
pub fn is_rip_relative(insn: &Instruction) -> bool {
    insn.addr == AddrMode::RipRelative
}

/// Does this instruction's immediate/displacement encode a `%rip`-relative
/// branch target (so moving the instruction requires recomputing it)?
pub fn is_immediate_relative(insn: &Instruction) -> bool {
    table::lookup(insn.escape, insn.opcode).imm.is_branch_relative()
}

/// Is this instruction a system call: `SYSCALL`, `SYSENTER`, or `INT 0x80`?
pub fn is_syscall(insn: &Instruction) -> bool {
    (insn.escape == Escape::Esc1 && (insn.opcode == 0x05 || insn.opcode == 0x34))
        || (insn.escape == Escape::Esc0 && insn.opcode == 0xcd && insn.immediate == 0x80)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::read_insn;

    #[test]
    fn syscall_and_sysenter_classify() {
        let (insn, _) = read_insn(&[0x0f, 0x05], 0).unwrap();
        assert!(is_syscall(&insn));
        let (insn, _) = read_insn(&[0x0f, 0x34], 0).unwrap();
        assert!(is_syscall(&insn));
    }

    #[test]
    fn int_0x80_classifies_as_syscall_only_with_that_immediate() {
        let (insn, _) = read_insn(&[0xcd, 0x80], 0).unwrap();
        assert!(is_syscall(&insn));
        let (insn, _) = read_insn(&[0xcd, 0x03], 0).unwrap();
        assert!(!is_syscall(&insn));
    }

    #[test]
    fn lea_rip_relative_classifies() {
        let bytes = [0x48, 0x8d, 0x05, 0x10, 0x00, 0x00, 0x00];
        let (insn, _) = read_insn(&bytes, 0).unwrap();
        assert!(is_rip_relative(&insn));
        assert!(!is_syscall(&insn));
    }

    #[test]
    fn call_rel32_is_immediate_relative() {
        let bytes = [0xe8, 0, 0, 0, 0];
        let (insn, _) = read_insn(&bytes, 0).unwrap();
        assert!(is_immediate_relative(&insn));
    }

    #[test]
    fn mov_immediate_is_not_relative() {
        let bytes = [0xb8, 1, 0, 0, 0];
        let (insn, _) = read_insn(&bytes, 0).unwrap();
        assert!(!is_immediate_relative(&insn));
    }
}
