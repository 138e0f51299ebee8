//! Pretty-printer: a single line of AT&T-flavored hex text per decoded
//! instruction, for debugging and tests — never a disassembled mnemonic
//! (mnemonic lookup is out of scope, per spec's Non-goals).
//!
//! Grounded on spec §4.5's literal format and buffer/overflow contract, and
//! on `examples/original_source/test/disasm.c`'s use of `xv_x64_print_insn`
//! for one line per instruction while walking a buffer. The original's exact
//! `sprintf` format string wasn't in the filtered snapshot, but spec.md §4.5
//! gives the format explicitly, so that (not the C source) is what this is
//! grounded on.

use std::fmt::Write as _;

use crate::instruction::{AddrMode, Escape, ImmKind, Instruction, Prefix1, Prefix2};
use crate::table::{self, group3_immediate_override};

fn escape_token(escape: Escape) -> Option<&'static str> {
    match escape {
        Escape::Esc0 => None,
        Escape::Esc1 => Some("0f"),
        Escape::Esc238 => Some("0f38"),
        Escape::Esc23a => Some("0f3a"),
    }
}

fn prefix1_token(p: Prefix1) -> Option<&'static str> {
    match p {
        Prefix1::None => None,
        Prefix1::Lock => Some("lock"),
        Prefix1::Repnz => Some("repnz"),
        Prefix1::Repz => Some("repz"),
    }
}

fn prefix2_token(p: Prefix2) -> Option<&'static str> {
    match p {
        Prefix2::None => None,
        Prefix2::Cs => Some("cs"),
        Prefix2::Ss => Some("ss"),
        Prefix2::Ds => Some("ds"),
        Prefix2::Es => Some("es"),
        Prefix2::Fs => Some("fs"),
        Prefix2::Gs => Some("gs"),
    }
}

/// The `vex.[l ][w ]|rex.w ` alternative from spec §4.5: a VEX instruction
/// shows `vex.` plus whichever of `l`/`w` apply (`vex.lw`, `vex.l`, `vex.w`,
/// or bare `vex.` if neither), a non-VEX instruction with `rex_w` shows
/// `rex.w`, and otherwise there is nothing to show.
fn vex_or_rex_token(insn: &Instruction) -> Option<String> {
    if insn.vex {
        let mut s = String::from("vex.");
        if insn.vex_l {
            s.push('l');
        }
        if insn.rex_w {
            s.push('w');
        }
        Some(s)
    } else if insn.rex_w {
        Some("rex.w".to_string())
    } else {
        None
    }
}

/// The operand-form grammar from spec §4.5, keyed on `addr`. `AddrMode::None`
/// (no ModR/M byte at all) has no ModR/M-derived operand to show — opcodes
/// that embed a register in their low 3 bits (`PUSH`/`POP`/`MOV r,Iv`) are
/// identified by `opcode` alone, which is already printed.
fn operand_form(insn: &Instruction) -> Option<String> {
    match insn.addr {
        AddrMode::None => None,
        AddrMode::Register => Some(format!("%{} %{}", insn.reg, insn.base)),
        AddrMode::RipRelative => {
            let abs = insn.rip.wrapping_add(insn.displacement as i64 as u64);
            Some(format!("{}(%rip) [= {abs:016x}]", insn.displacement))
        }
        AddrMode::ZeroRel => Some(format!("{}(0)", insn.displacement)),
        AddrMode::BaseDisp => Some(format!("{}(%{})", insn.displacement, insn.base)),
        AddrMode::Sib => Some(format!(
            "{}(%{}, %{}, {})",
            insn.displacement,
            insn.base,
            insn.index,
            insn.scale as u8,
        )),
    }
}

/// The immediate kind actually carried by this instruction, after the
/// Group-3 reg-dependent override — the same resolution `decode`/`encode`
/// apply, needed here only to decide whether an immediate token is present.
fn resolved_imm_kind(insn: &Instruction) -> ImmKind {
    let entry = table::lookup(insn.escape, insn.opcode);
    if entry.has_modrm {
        if let Some(over) = group3_immediate_override(insn.escape, insn.opcode, insn.reg & 0x07) {
            return over;
        }
    }
    entry.imm
}

fn immediate_token(insn: &Instruction) -> Option<String> {
    let kind = resolved_imm_kind(insn);
    if kind == ImmKind::None {
        return None;
    }
    let mut s = format!("{:#x}", insn.immediate);
    if kind.is_branch_relative() {
        let target = insn.rip.wrapping_add(insn.immediate as u64);
        let _ = write!(s, " [= {target:016x}]");
    }
    Some(s)
}

/// Render `insn` as spec §4.5's single line of text:
/// `<start:16-hex> (<length:1-hex>): <p1> <p2> [66][67][vex./rex.w] <escape>
/// <opcode:2-hex> <operand-form> [imm]`.
fn render(insn: &Instruction) -> String {
    let length = (insn.rip - insn.start) as u8;
    let mut s = format!("{:016x} ({:x}):", insn.start, length);

    let mut push = |token: &str| {
        s.push(' ');
        s.push_str(token);
    };

    if let Some(t) = prefix1_token(insn.p1) {
        push(t);
    }
    if let Some(t) = prefix2_token(insn.p2) {
        push(t);
    }
    if insn.p66 {
        push("66");
    }
    if insn.p67 {
        push("67");
    }
    if let Some(t) = vex_or_rex_token(insn) {
        push(&t);
    }
    if let Some(t) = escape_token(insn.escape) {
        push(t);
    }
    push(&format!("{:02x}", insn.opcode));
    if let Some(t) = operand_form(insn) {
        push(&t);
    }
    if let Some(t) = immediate_token(insn) {
        push(&t);
    }

    s
}

/// Write `insn`'s pretty-printed line into `out` as a null-terminated string,
/// per spec §4.5/§6: `out` is a caller-supplied staging area (spec names a
/// 128-byte one). Returns the length of the text, excluding the terminating
/// NUL. If `out` can't hold the text plus its NUL, `out` is left untouched
/// and `0` is returned.
pub fn print_insn(out: &mut [u8], insn: &Instruction) -> usize {
    let text = render(insn);
    let len = text.len();
    if len + 1 > out.len() {
        return 0;
    }
    out[..len].copy_from_slice(text.as_bytes());
    out[len] = 0;
    len
}
