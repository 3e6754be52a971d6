//! Human-readable listings of generated code.

use std::io::{self, Write};

use super::bytecode::{Opcode, Operands};

/// One decoded bytecode instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub len: usize,
    pub mnemonic: &'static str,
    pub operands: String,
}

fn read_i32(code: &[u8], at: usize) -> Option<i32> {
    let raw = code.get(at..at + 4)?;
    Some(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

fn read_i64(code: &[u8], at: usize) -> Option<i64> {
    let raw: [u8; 8] = code.get(at..at + 8)?.try_into().ok()?;
    Some(i64::from_le_bytes(raw))
}

/// Decode the instruction at `offset`, or `None` if it is malformed.
pub fn decode(code: &[u8], offset: usize) -> Option<Instruction> {
    let opcode = Opcode::from_byte(*code.get(offset)?)?;
    let at = offset + 1;
    let operands = match opcode.operands() {
        Operands::None => String::new(),
        Operands::Imm64 => read_i64(code, at)?.to_string(),
        Operands::Offset => {
            let value = read_i32(code, at)?;
            match opcode {
                Opcode::LoadGlobal | Opcode::StoreGlobal | Opcode::LeaGlobal => {
                    format!("data+{value:#x}")
                }
                _ => format!("bp{value:+}"),
            }
        }
        Operands::OffsetDelta => {
            let value = read_i32(code, at)?;
            let delta = *code.get(at + 4)? as i8;
            if opcode == Opcode::IncGlobal {
                format!("data+{value:#x}, {delta}")
            } else {
                format!("bp{value:+}, {delta}")
            }
        }
        Operands::Relative => {
            let target = (at as i64 + 4 + read_i32(code, at)? as i64) as usize;
            format!("{target:#06x}")
        }
        Operands::Argc => code.get(at)?.to_string(),
        Operands::Host => format!("#{}, {}", read_i32(code, at)?, code.get(at + 4)?),
        Operands::Count => read_i32(code, at)?.to_string(),
    };
    Some(Instruction {
        offset,
        len: opcode.width(),
        mnemonic: opcode.mnemonic(),
        operands,
    })
}

/// Decode a whole buffer. Undecodable bytes show up as `.byte` entries.
pub fn disassemble(code: &[u8]) -> Vec<Instruction> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let insn = decode(code, offset).unwrap_or_else(|| Instruction {
            offset,
            len: 1,
            mnemonic: ".byte",
            operands: format!("{:#04x}", code[offset]),
        });
        offset += insn.len;
        out.push(insn);
    }
    out
}

fn label_at<'a>(labels: &'a [(String, usize)], offset: usize) -> impl Iterator<Item = &'a str> {
    labels
        .iter()
        .filter(move |(_, entry)| *entry == offset)
        .map(|(name, _)| name.as_str())
}

/// `offset: mnemonic operands`, with function labels interleaved.
pub fn write_bytecode_listing<W: Write>(
    code: &[u8],
    labels: &[(String, usize)],
    sink: &mut W,
) -> io::Result<()> {
    for insn in disassemble(code) {
        for name in label_at(labels, insn.offset) {
            writeln!(sink, "{name}:")?;
        }
        if insn.operands.is_empty() {
            writeln!(sink, "  {:06x}  {}", insn.offset, insn.mnemonic)?;
        } else {
            writeln!(sink, "  {:06x}  {:<6} {}", insn.offset, insn.mnemonic, insn.operands)?;
        }
    }
    Ok(())
}

/// Hex dump of native code, one row per 16 bytes, restarting at each function.
pub fn write_hex_listing<W: Write>(
    code: &[u8],
    labels: &[(String, usize)],
    sink: &mut W,
) -> io::Result<()> {
    let mut starts: Vec<usize> = labels.iter().map(|(_, entry)| *entry).collect();
    starts.push(0);
    starts.push(code.len());
    starts.sort_unstable();
    starts.dedup();

    for window in starts.windows(2) {
        let (start, end) = (window[0], window[1]);
        for name in label_at(labels, start) {
            writeln!(sink, "{name}:")?;
        }
        for row in (start..end).step_by(16) {
            let bytes = &code[row..(row + 16).min(end)];
            let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
            writeln!(sink, "  {row:06x}  {}", hex.join(" "))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_relative_target() {
        // jmp back to 0 from a field at 1
        let code = [Opcode::Jmp as u8, 0xfb, 0xff, 0xff, 0xff];
        let insn = decode(&code, 0).unwrap();
        assert_eq!(insn.mnemonic, "jmp");
        assert_eq!(insn.operands, "0x0000");
        assert_eq!(insn.len, 5);
    }

    #[test]
    fn test_truncated_instruction_becomes_byte() {
        let code = [Opcode::Imm as u8, 1, 2];
        let out = disassemble(&code);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].mnemonic, ".byte");
    }

    #[test]
    fn test_bytecode_listing_has_labels() {
        let code = [Opcode::Enter as u8, 0, 0, 0, 0, Opcode::Leave as u8];
        let labels = vec![("main".to_string(), 0)];
        let mut out = Vec::new();
        write_bytecode_listing(&code, &labels, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "main:\n  000000  enter  0\n  000005  leave\n");
    }

    #[test]
    fn test_hex_listing_splits_rows() {
        let code = vec![0x90u8; 20];
        let mut out = Vec::new();
        write_hex_listing(&code, &[], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().nth(1).unwrap().starts_with("  000010  90 90 90 90"));
    }
}
