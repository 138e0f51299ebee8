//! Sample disassembler: reads a flat file of machine code, decodes and
//! pretty-prints every instruction, and optionally re-encodes the whole
//! stream into a second file for external diffing.
//!
//! Grounded directly on `examples/original_source/test/disasm.c`: mmap the
//! input read-only `PRIVATE`, loop `read_insn` + `print_insn`, and on
//! `--reencode`, `write_insn` each instruction into a freshly allocated
//! output buffer, retrying with a larger buffer on overflow instead of the
//! original's single fixed-size attempt.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;

use xv_buffer::InstructionBuffer;
use xv_codec::{encoded_len, print_insn, read_insn, write_insn};

#[derive(Parser)]
#[command(version, about = "Decode (and optionally re-encode) a flat x86-64 machine code file")]
struct Args {
    /// Input file containing raw x86-64 machine code.
    input: PathBuf,

    /// Re-encode every decoded instruction into this output file.
    #[arg(long)]
    reencode: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let file = File::open(&args.input)
        .with_context(|| format!("opening {}", args.input.display()))?;
    let mapping = unsafe { Mmap::map(&file) }
        .with_context(|| format!("mapping {}", args.input.display()))?;

    let mut insns = Vec::new();
    let mut offset = 0usize;
    let mut line = [0u8; 128];
    while offset < mapping.len() {
        match read_insn(&mapping[offset..], offset as u64) {
            Ok((insn, len)) => {
                let n = print_insn(&mut line, &insn);
                anyhow::ensure!(n != 0, "pretty-printed line overflowed the staging area");
                println!("{}", std::str::from_utf8(&line[..n])?);
                insns.push(insn);
                offset += len;
            }
            Err(e) => {
                anyhow::bail!("decode failed at offset {offset:#x}: {e}");
            }
        }
    }

    if let Some(out_path) = args.reencode {
        let mut capacity = mapping.len().max(64);
        let encoded = loop {
            let mut buf = InstructionBuffer::with_capacity(0, capacity)
                .context("allocating re-encode buffer")?;
            match reencode_all(&insns, &mut buf) {
                Ok(()) => break buf,
                Err(xv_codec::EncodeError::BufferFull) => {
                    log::debug!("xv-disasm: output buffer too small at {capacity} bytes, doubling");
                    capacity *= 2;
                }
                Err(e) => anyhow::bail!("re-encode failed: {e}"),
            }
        };

        std::fs::write(&out_path, encoded.as_slice())
            .with_context(|| format!("writing {}", out_path.display()))?;
        println!(
            "re-encoded {} instructions into {} ({} bytes)",
            insns.len(),
            out_path.display(),
            encoded.len()
        );
    }

    Ok(())
}

fn reencode_all(
    insns: &[xv_codec::Instruction],
    buf: &mut InstructionBuffer,
) -> std::result::Result<(), xv_codec::EncodeError> {
    let mut scratch = [0u8; 32];
    for insn in insns {
        let len = encoded_len(insn)?;
        let written = write_insn(insn, &mut scratch[..len])?;
        buf.push(&scratch[..written])
            .map_err(|_| xv_codec::EncodeError::BufferFull)?;
    }
    Ok(())
}
