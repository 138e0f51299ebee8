//! The codec's closed failure taxonomy, as `thiserror` enums instead of the
//! original's integer status codes. Each `EndOf*` decode variant names the
//! exact byte-read call site that ran out of input, so a caller can match on
//! where decoding died the way the original's phase-specific `END_*` codes
//! let it.

use thiserror::Error;

use crate::instruction::Escape;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Zero bytes available at an instruction boundary — a clean end of
    /// stream, not a truncated instruction.
    #[error("end of stream at instruction boundary")]
    EndOfStream,

    /// Ran out while scanning group-1..4 legacy prefixes, or peeking the
    /// byte that follows them.
    #[error("end of stream while scanning prefixes")]
    EndOfPrefixes,

    /// VEX2 (0xC5) lead byte consumed but its single payload byte is
    /// missing.
    #[error("end of stream reading VEX2 payload byte")]
    EndOfVex2Payload,

    /// VEX3 (0xC4) lead byte consumed but one of its two payload bytes is
    /// missing.
    #[error("end of stream reading VEX3 payload bytes")]
    EndOfVex3Payload,

    /// The byte read immediately after prefix scanning: determines REX vs.
    /// VEX2/VEX3 vs. a direct escape-determination byte.
    #[error("end of stream reading opcode byte 1")]
    EndOfOpcodeByte1,

    /// The escape-determination byte read after a REX prefix.
    #[error("end of stream reading opcode byte 2")]
    EndOfOpcodeByte2,

    /// The byte following a 0x0F lead, checked against 0x38/0x3A, or used
    /// directly as the opcode in the two-byte-escape case.
    #[error("end of stream reading opcode byte 3")]
    EndOfOpcodeByte3,

    /// The final opcode byte in the three-byte-escape-after-REX case, or the
    /// VEX path's dedicated opcode-byte read.
    #[error("end of stream reading opcode byte 4")]
    EndOfOpcodeByte4,

    #[error("end of stream reading ModR/M byte")]
    EndOfModRm,

    #[error("end of stream reading SIB byte")]
    EndOfSib,

    #[error("end of stream reading displacement bytes")]
    EndOfDisplacement,

    #[error("end of stream reading immediate bytes")]
    EndOfImmediate,

    /// The table marks this `(escape, opcode)` pair invalid.
    #[error("invalid opcode 0x{opcode:02x} in escape map {escape:?}")]
    InvalidOpcode { opcode: u8, escape: Escape },

    /// VEX `m-mmmm` field names an escape map this decoder doesn't model.
    #[error("unsupported VEX opcode map {0}")]
    InvalidVexMap(u8),
}

impl DecodeError {
    /// True for every "ran out of bytes" variant, as opposed to a
    /// structurally invalid opcode.
    pub const fn is_truncation(self) -> bool {
        !matches!(self, DecodeError::InvalidOpcode { .. } | DecodeError::InvalidVexMap(_))
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The instruction record names an `(escape, opcode)` pair the table
    /// marks invalid — it cannot have come from a successful decode.
    #[error("instruction has an invalid (escape, opcode) pair")]
    InvalidOpcode,

    /// A corrected displacement or relative branch target no longer fits
    /// the width the original encoding used.
    #[error("displacement or relative immediate overflows its encoded width")]
    Overflow,

    /// The destination buffer doesn't have room for the encoded bytes.
    #[error("output buffer is full")]
    BufferFull,
}
