//! Built-in host functions for the bytecode VM
//!
//! The VM cannot call into the C library, so calls to unknown names are
//! resolved against this table at compile time instead.
//!
//! # Supported functions
//!
//! - `printf(format, ...)`: `%d %i %u %x %X %c %s %p %%`, with `-`/`0`
//!   flags, a width and `l`/`ll`/`h` length modifiers
//! - `puts(s)`, `putchar(c)`
//! - `strlen(s)`, `abs(n)`, `atoi(s)`
//!
//! Without a length modifier integer conversions use the low 32 bits of the
//! argument, the same thing the C library does with an `int` argument.

use std::io::{self, Write};
use std::sync::OnceLock;

use rustc_hash::FxHashMap;

use super::memory::Memory;

/// Output written by the program.
#[derive(Debug, Clone, Default)]
pub struct Console {
    bytes: Vec<u8>,
    echo: bool,
}

impl Console {
    /// `echo` also forwards everything to the process's stdout.
    pub fn new(echo: bool) -> Self {
        Console {
            bytes: Vec::new(),
            echo,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.bytes.extend_from_slice(bytes);
        if self.echo {
            let mut out = io::stdout().lock();
            out.write_all(bytes)?;
            out.flush()?;
        }
        Ok(())
    }

    pub fn output(&self) -> &[u8] {
        &self.bytes
    }

    /// Output split into lines, without a trailing empty line.
    pub fn lines(&self) -> Vec<String> {
        let text = String::from_utf8_lossy(&self.bytes);
        let mut lines: Vec<String> = text.split('\n').map(str::to_string).collect();
        if lines.last().is_some_and(|s| s.is_empty()) {
            lines.pop();
        }
        lines
    }
}

/// What a host function may touch.
pub struct HostContext<'a> {
    pub memory: &'a mut Memory,
    pub console: &'a mut Console,
}

pub type HostResult = Result<i64, String>;

pub struct HostFunction {
    pub name: &'static str,
    pub call: fn(&mut HostContext<'_>, &[i64]) -> HostResult,
}

const HOST_FUNCTIONS: &[HostFunction] = &[
    HostFunction {
        name: "printf",
        call: host_printf,
    },
    HostFunction {
        name: "puts",
        call: host_puts,
    },
    HostFunction {
        name: "putchar",
        call: host_putchar,
    },
    HostFunction {
        name: "strlen",
        call: host_strlen,
    },
    HostFunction {
        name: "abs",
        call: host_abs,
    },
    HostFunction {
        name: "atoi",
        call: host_atoi,
    },
];

fn table() -> &'static FxHashMap<&'static str, u32> {
    static TABLE: OnceLock<FxHashMap<&'static str, u32>> = OnceLock::new();
    TABLE.get_or_init(|| {
        HOST_FUNCTIONS
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name, i as u32))
            .collect()
    })
}

/// Index of the built-in called `name`.
pub fn lookup(name: &str) -> Option<u32> {
    table().get(name).copied()
}

pub fn function(index: u32) -> Option<&'static HostFunction> {
    HOST_FUNCTIONS.get(index as usize)
}

fn arg(args: &[i64], index: usize) -> Result<i64, String> {
    args.get(index)
        .copied()
        .ok_or_else(|| format!("missing argument {}", index + 1))
}

fn string_arg(ctx: &HostContext<'_>, args: &[i64], index: usize) -> Result<Vec<u8>, String> {
    let address = arg(args, index)?;
    ctx.memory
        .read_c_string(address as u64)
        .map_err(|e| e.to_string())
}

fn emit(ctx: &mut HostContext<'_>, bytes: &[u8]) -> Result<(), String> {
    ctx.console.write(bytes).map_err(|e| e.to_string())
}

fn host_puts(ctx: &mut HostContext<'_>, args: &[i64]) -> HostResult {
    let mut text = string_arg(ctx, args, 0)?;
    text.push(b'\n');
    emit(ctx, &text)?;
    Ok(0)
}

fn host_putchar(ctx: &mut HostContext<'_>, args: &[i64]) -> HostResult {
    let c = arg(args, 0)? as u8;
    emit(ctx, &[c])?;
    Ok(i64::from(c))
}

fn host_strlen(ctx: &mut HostContext<'_>, args: &[i64]) -> HostResult {
    Ok(string_arg(ctx, args, 0)?.len() as i64)
}

fn host_abs(_: &mut HostContext<'_>, args: &[i64]) -> HostResult {
    Ok(i64::from((arg(args, 0)? as i32).wrapping_abs()))
}

fn host_atoi(ctx: &mut HostContext<'_>, args: &[i64]) -> HostResult {
    let text = string_arg(ctx, args, 0)?;
    let mut digits = text.iter().skip_while(|c| c.is_ascii_whitespace()).peekable();
    let negative = match digits.peek() {
        Some(b'-') => {
            digits.next();
            true
        }
        Some(b'+') => {
            digits.next();
            false
        }
        _ => false,
    };
    let mut value: i32 = 0;
    for d in digits.take_while(|c| c.is_ascii_digit()) {
        value = value.wrapping_mul(10).wrapping_add(i32::from(d - b'0'));
    }
    Ok(i64::from(if negative { value.wrapping_neg() } else { value }))
}

/// One parsed `%` conversion.
#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    width: usize,
    long: bool,
}

impl Spec {
    fn pad(&self, body: String, out: &mut Vec<u8>) {
        let fill = self.width.saturating_sub(body.len());
        if self.left {
            out.extend_from_slice(body.as_bytes());
            out.resize(out.len() + fill, b' ');
        } else if self.zero {
            // zeros go after a sign
            let (sign, digits) = match body.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", body.as_str()),
            };
            out.extend_from_slice(sign.as_bytes());
            out.resize(out.len() + fill, b'0');
            out.extend_from_slice(digits.as_bytes());
        } else {
            out.resize(out.len() + fill, b' ');
            out.extend_from_slice(body.as_bytes());
        }
    }
}

/// Render a printf format against word-sized arguments.
pub fn format_printf(memory: &Memory, format: &[u8], args: &[i64]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    let mut next = args.iter().copied();
    let mut take = || next.next().ok_or_else(|| "not enough arguments for format string".to_string());
    let mut i = 0;

    while i < format.len() {
        let c = format[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = format.get(i) {
            match flag {
                b'-' => spec.left = true,
                b'0' => spec.zero = true,
                _ => break,
            }
            i += 1;
        }
        while let Some(d) = format.get(i).filter(|d| d.is_ascii_digit()) {
            spec.width = spec.width * 10 + usize::from(d - b'0');
            i += 1;
        }
        while let Some(&m) = format.get(i) {
            match m {
                b'l' => spec.long = true,
                b'h' => {}
                _ => break,
            }
            i += 1;
        }

        let Some(&conv) = format.get(i) else {
            return Err("format string ends inside a conversion".to_string());
        };
        i += 1;
        let body = match conv {
            b'%' => "%".to_string(),
            b'd' | b'i' => {
                let v = take()?;
                if spec.long { v.to_string() } else { (v as i32).to_string() }
            }
            b'u' => {
                let v = take()?;
                if spec.long { (v as u64).to_string() } else { (v as u32).to_string() }
            }
            b'x' => {
                let v = take()?;
                if spec.long { format!("{:x}", v as u64) } else { format!("{:x}", v as u32) }
            }
            b'X' => {
                let v = take()?;
                if spec.long { format!("{:X}", v as u64) } else { format!("{:X}", v as u32) }
            }
            b'p' => format!("{:#x}", take()? as u64),
            b'c' => {
                let v = take()? as u8;
                let fill = spec.width.saturating_sub(1);
                if !spec.left {
                    out.resize(out.len() + fill, b' ');
                }
                out.push(v);
                if spec.left {
                    out.resize(out.len() + fill, b' ');
                }
                continue;
            }
            b's' => {
                let text = memory
                    .read_c_string(take()? as u64)
                    .map_err(|e| e.to_string())?;
                String::from_utf8_lossy(&text).into_owned()
            }
            other => return Err(format!("unsupported conversion '%{}'", other as char)),
        };
        spec.pad(body, &mut out);
    }
    Ok(out)
}

fn host_printf(ctx: &mut HostContext<'_>, args: &[i64]) -> HostResult {
    let format = string_arg(ctx, args, 0)?;
    let text = format_printf(ctx.memory, &format, &args[1..])?;
    emit(ctx, &text)?;
    Ok(text.len() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::bytecode::MEMORY_BASE;

    fn render(format: &str, args: &[i64]) -> String {
        let mem = Memory::new(64);
        String::from_utf8(format_printf(&mem, format.as_bytes(), args).unwrap()).unwrap()
    }

    #[test]
    fn test_lookup_known_names() {
        assert_eq!(lookup("printf"), Some(0));
        assert!(lookup("atoi").is_some());
        assert_eq!(lookup("malloc"), None);
        assert_eq!(function(lookup("puts").unwrap()).unwrap().name, "puts");
    }

    #[test]
    fn test_printf_integers() {
        assert_eq!(render("%d + %i = %d\n", &[1, 2, 3]), "1 + 2 = 3\n");
        assert_eq!(render("%d", &[0xffff_ffff]), "-1");
        assert_eq!(render("%ld", &[0xffff_ffff]), "4294967295");
        assert_eq!(render("%x %X %u", &[255, 255, -1]), "ff FF 4294967295");
        assert_eq!(render("100%%", &[]), "100%");
    }

    #[test]
    fn test_printf_width_and_flags() {
        assert_eq!(render("[%5d]", &[42]), "[   42]");
        assert_eq!(render("[%-5d]", &[42]), "[42   ]");
        assert_eq!(render("[%05d]", &[-42]), "[-0042]");
        assert_eq!(render("[%c]", &[65]), "[A]");
        assert_eq!(render("[%3c]", &[65]), "[  A]");
    }

    #[test]
    fn test_printf_strings() {
        let mut mem = Memory::new(64);
        mem.write_bytes(MEMORY_BASE, b"abc\0").unwrap();
        let out = format_printf(&mem, b"<%s>", &[MEMORY_BASE as i64]).unwrap();
        assert_eq!(out, b"<abc>".to_vec());
    }

    #[test]
    fn test_printf_missing_argument() {
        let mem = Memory::new(8);
        assert!(format_printf(&mem, b"%d", &[]).is_err());
    }

    #[test]
    fn test_atoi_and_abs() {
        let mut mem = Memory::new(64);
        mem.write_bytes(MEMORY_BASE, b"  -123abc\0").unwrap();
        let mut console = Console::default();
        let mut ctx = HostContext {
            memory: &mut mem,
            console: &mut console,
        };
        assert_eq!(host_atoi(&mut ctx, &[MEMORY_BASE as i64]).unwrap(), -123);
        assert_eq!(host_abs(&mut ctx, &[-7]).unwrap(), 7);
    }

    #[test]
    fn test_console_lines() {
        let mut console = Console::default();
        console.write(b"one\ntwo\n").unwrap();
        assert_eq!(console.lines(), vec!["one", "two"]);
    }
}
