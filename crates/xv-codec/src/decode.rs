//! The instruction decoder: turns a byte slice into one [`Instruction`] plus
//! the number of bytes it consumed.
//!
//! Grounded on `examples/original_source/build/xv-x64.c`'s `xv_x64_read_insn`
//! for prefix/REX/VEX bit layout and the ModR/M+SIB+displacement+immediate
//! reading order. Two spots in that source reuse a byte-lookahead variable
//! across loop iterations without refreshing it, which would silently
//! misparse any REX-prefixed instruction and any two-byte-escape instruction
//! that isn't immediately followed by 0x38/0x3A — not a deliberate design
//! choice like the VEX `pp == 0` note, so this port reads a fresh byte at
//! each step instead. See DESIGN.md.

use crate::instruction::{AddrMode, Escape, Instruction, Prefix1, Prefix2, ScaleFactor};
use crate::table::{self, group3_immediate_override};
use crate::DecodeError;

fn take(bytes: &[u8], offset: &mut usize, err: DecodeError) -> Result<u8, DecodeError> {
    let b = *bytes.get(*offset).ok_or(err)?;
    *offset += 1;
    Ok(b)
}

const fn is_group1(b: u8) -> bool {
    matches!(b, 0xf0 | 0xf2 | 0xf3)
}

const fn is_group2(b: u8) -> bool {
    matches!(b, 0x2e | 0x36 | 0x3e | 0x26 | 0x64 | 0x65)
}

const fn is_rex(b: u8) -> bool {
    b & 0xf0 == 0x40
}

/// Decode one instruction starting at `bytes[0]`. `logical_start` is the
/// logical address corresponding to `bytes[0]`; the returned instruction's
/// `start`/`rip` fields are computed relative to it.
///
/// On success, returns the instruction and the number of bytes consumed.
pub fn read_insn(bytes: &[u8], logical_start: u64) -> Result<(Instruction, usize), DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EndOfStream);
    }

    let mut insn = Instruction {
        start: logical_start,
        ..Instruction::default()
    };
    let mut off = 0usize;

    // Step 1: group 1-4 legacy prefixes, at most one of p1/p2 kept (first
    // one wins), 0x66/0x67 simply OR in.
    loop {
        let b = *bytes.get(off).ok_or(DecodeError::EndOfPrefixes)?;
        if is_group1(b) {
            if insn.p1 == Prefix1::None {
                insn.p1 = match b {
                    0xf0 => Prefix1::Lock,
                    0xf2 => Prefix1::Repnz,
                    _ => Prefix1::Repz,
                };
            }
            off += 1;
        } else if is_group2(b) {
            if insn.p2 == Prefix2::None {
                insn.p2 = match b {
                    0x2e => Prefix2::Cs,
                    0x36 => Prefix2::Ss,
                    0x3e => Prefix2::Ds,
                    0x26 => Prefix2::Es,
                    0x64 => Prefix2::Fs,
                    _ => Prefix2::Gs,
                };
            }
            off += 1;
        } else if b == 0x66 {
            insn.p66 = true;
            off += 1;
        } else if b == 0x67 {
            insn.p67 = true;
            off += 1;
        } else {
            break;
        }
    }

    // Step 2: REX, or VEX2/VEX3, or neither.
    let rex_or_vex_lead = take(bytes, &mut off, DecodeError::EndOfPrefixes)?;

    // escape_trigger is the byte to be checked against 0x0F; it is either a
    // fresh read (REX consumed, or VEX already resolved the escape map) or
    // the lead byte itself, reused, when it was neither REX nor VEX.
    let escape_trigger;

    if is_rex(rex_or_vex_lead) {
        insn.rex_w = rex_or_vex_lead & 0x08 != 0;
        insn.reg |= (rex_or_vex_lead & 0x04) << 1;
        insn.index |= (rex_or_vex_lead & 0x02) << 2;
        insn.base |= (rex_or_vex_lead & 0x01) << 3;
        escape_trigger = take(bytes, &mut off, DecodeError::EndOfOpcodeByte1)?;
    } else if rex_or_vex_lead == 0xc5 {
        // VEX2: one payload byte, escape map is implicitly 0x0F (Esc1).
        let p = take(bytes, &mut off, DecodeError::EndOfVex2Payload)?;
        insn.vex = true;
        insn.escape = Escape::Esc1;
        insn.reg |= (!p & 0x80) >> 4;
        apply_vex_common(&mut insn, p);
        return finish_after_opcode_map(bytes, &mut off, insn);
    } else if rex_or_vex_lead == 0xc4 {
        // VEX3: two payload bytes, escape map is VEX.m-mmmm.
        let p1 = take(bytes, &mut off, DecodeError::EndOfVex3Payload)?;
        let p2 = take(bytes, &mut off, DecodeError::EndOfVex3Payload)?;
        insn.reg |= (!p1 & 0x80) >> 4;
        insn.index |= (!p1 & 0x40) >> 3;
        insn.base |= (!p1 & 0x20) >> 2;
        insn.escape = match p1 & 0x1f {
            1 => Escape::Esc1,
            2 => Escape::Esc238,
            3 => Escape::Esc23a,
            other => return Err(DecodeError::InvalidVexMap(other)),
        };
        insn.rex_w = p2 & 0x80 != 0;
        insn.vex = true;
        apply_vex_common(&mut insn, p2);
        return finish_after_opcode_map(bytes, &mut off, insn);
    } else {
        escape_trigger = rex_or_vex_lead;
    }

    // Step 3: 0x0F escape, and if present, 0x38/0x3A sub-escape.
    if escape_trigger == 0x0f {
        let b3 = take(bytes, &mut off, DecodeError::EndOfOpcodeByte2)?;
        match b3 {
            0x38 => {
                insn.escape = Escape::Esc238;
                insn.opcode = take(bytes, &mut off, DecodeError::EndOfOpcodeByte3)?;
            }
            0x3a => {
                insn.escape = Escape::Esc23a;
                insn.opcode = take(bytes, &mut off, DecodeError::EndOfOpcodeByte3)?;
            }
            _ => {
                insn.escape = Escape::Esc1;
                insn.opcode = b3;
            }
        }
    } else {
        insn.escape = Escape::Esc0;
        insn.opcode = escape_trigger;
    }

    finish_after_opcode_map(bytes, &mut off, insn)
}

/// VEX.vvvv / VEX.L / VEX.pp shared between the VEX2 and VEX3 forms.
///
/// `pp` selects the same mandatory-prefix space as group-1 legacy prefixes
/// (`00` = none, `01` = 0x66, `10` = 0xF3/REPZ, `11` = 0xF2/REPNZ) — it is
/// not a segment override, so it folds into `p1`/`p66`, not `p2`.
fn apply_vex_common(insn: &mut Instruction, payload: u8) {
    insn.aux = (payload & 0x78) >> 3 ^ 0x0f;
    insn.vex_l = payload & 0x04 != 0;
    insn.p1 = match payload & 0x03 {
        0x01 => {
            insn.p66 = true;
            insn.p1
        }
        0x02 => Prefix1::Repz,
        0x03 => Prefix1::Repnz,
        _ => insn.p1,
    };
}

/// VEX opcode read: exactly one more byte, directly the opcode, no 0x0F
/// scanning (the escape map is already known from VEX.m-mmmm).
fn finish_after_opcode_map(
    bytes: &[u8],
    off: &mut usize,
    mut insn: Instruction,
) -> Result<(Instruction, usize), DecodeError> {
    if insn.vex {
        insn.opcode = take(bytes, off, DecodeError::EndOfOpcodeByte4)?;
    }

    let entry = table::lookup(insn.escape, insn.opcode);
    if entry.invalid {
        return Err(DecodeError::InvalidOpcode {
            opcode: insn.opcode,
            escape: insn.escape,
        });
    }

    let mut imm_kind = entry.imm;

    if entry.has_modrm {
        let modrm = take(bytes, off, DecodeError::EndOfModRm)?;
        let mode = (modrm & 0xc0) >> 6;
        let reg_field = (modrm & 0x38) >> 3;
        let rm_field = modrm & 0x07;
        insn.reg |= reg_field;

        if let Some(over) = group3_immediate_override(insn.escape, insn.opcode, insn.reg & 0x07) {
            imm_kind = over;
        }

        if mode == 3 {
            insn.addr = AddrMode::Register;
            insn.base |= rm_field;
        } else {
            let mut displacement_bytes = match mode {
                0 => {
                    if rm_field == 5 {
                        4
                    } else {
                        0
                    }
                }
                1 => 1,
                2 => 4,
                _ => 0,
            };

            if mode == 0 && rm_field == 5 {
                insn.addr = AddrMode::RipRelative;
            } else if rm_field == 4 {
                let sib = take(bytes, off, DecodeError::EndOfSib)?;
                let sib_index = (sib & 0x38) >> 3;
                let sib_base = sib & 0x07;
                insn.scale = ScaleFactor::from_bits((sib & 0xc0) >> 6);
                insn.index |= sib_index;
                if mode == 0 && sib_base == 5 {
                    // SIB.base == 101 at mod == 00 names no base register at
                    // all, regardless of index: a disp32 always follows.
                    displacement_bytes = 4;
                    insn.addr = if sib_index == 4 {
                        AddrMode::ZeroRel
                    } else {
                        AddrMode::Sib
                    };
                } else {
                    insn.base |= sib_base;
                    insn.addr = AddrMode::Sib;
                }
            } else {
                insn.base |= rm_field;
                insn.addr = AddrMode::BaseDisp;
            }

            if displacement_bytes > 0 {
                let mut disp: i32 = 0;
                for i in 0..displacement_bytes {
                    let byte = take(bytes, off, DecodeError::EndOfDisplacement)?;
                    disp |= (byte as i32) << (8 * i);
                }
                // sign-extend
                let shift = 32 - 8 * displacement_bytes;
                insn.displacement = (disp << shift) >> shift;
            }
        }
    }

    let imm_len = imm_kind.byte_len(insn.p66, insn.rex_w);
    if imm_len > 0 {
        let mut imm: i64 = 0;
        for i in 0..imm_len {
            let byte = take(bytes, off, DecodeError::EndOfImmediate)?;
            imm |= (byte as i64) << (8 * i);
        }
        let shift = 64 - 8 * imm_len as u32;
        insn.immediate = (imm << shift) >> shift;
    }

    insn.rip = insn.start + *off as u64;
    Ok((insn, *off))
}
