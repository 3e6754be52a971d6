//! Append-only code buffer and backpatch chains
//!
//! Every instruction that refers to a not-yet-known location is emitted with
//! a 4-byte operand field. While the target is unknown the field holds the
//! buffer offset of the previous unresolved field that wants the same target,
//! forming a singly linked list threaded through the code itself. The head of
//! that list is a [`PatchChain`]. Resolving a chain walks it once and replaces
//! every link with the instruction-pointer-relative displacement
//! `target - field - 4`.
//!
//! The same mechanism serves forward branches inside a function and forward
//! calls to functions that have not been defined yet.

use std::fmt;

/// Which arena ran out of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arena {
    Code,
    Data,
    Symbols,
}

impl fmt::Display for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arena::Code => write!(f, "code buffer"),
            Arena::Data => write!(f, "data segment"),
            Arena::Symbols => write!(f, "symbol table"),
        }
    }
}

/// An arena would grow past its configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{arena} capacity of {limit} exceeded")]
pub struct CapacityError {
    pub arena: Arena,
    pub limit: usize,
}

pub type EmitResult<T = ()> = Result<T, CapacityError>;

/// Head of a backpatch chain.
///
/// `0` means the chain is empty; any other value is the buffer offset of the
/// most recently emitted unresolved operand field. Offset 0 can never hold an
/// operand because every field is preceded by at least one opcode byte.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PatchChain {
    head: u32,
}

impl PatchChain {
    pub const fn new() -> Self {
        PatchChain { head: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.head == 0
    }

    /// Offset of the newest unresolved field, if any.
    pub fn head(&self) -> Option<usize> {
        (self.head != 0).then_some(self.head as usize)
    }

    /// Take the chain out, leaving an empty one behind.
    pub fn take(&mut self) -> PatchChain {
        std::mem::take(self)
    }
}

/// Growable byte buffer with a hard upper bound.
#[derive(Debug, Clone)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl CodeBuffer {
    pub fn new(capacity: usize) -> Self {
        CodeBuffer {
            bytes: Vec::new(),
            capacity,
        }
    }

    /// Current write position.
    pub fn position(&self) -> usize {
        self.bytes.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn reserve(&self, extra: usize) -> EmitResult {
        if self.bytes.len() + extra > self.capacity {
            return Err(CapacityError {
                arena: Arena::Code,
                limit: self.capacity,
            });
        }
        Ok(())
    }

    /// Append raw instruction bytes.
    pub fn emit_bytes(&mut self, bytes: &[u8]) -> EmitResult {
        self.reserve(bytes.len())?;
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }

    pub fn emit_i32(&mut self, value: i32) -> EmitResult {
        self.emit_bytes(&value.to_le_bytes())
    }

    pub fn emit_i64(&mut self, value: i64) -> EmitResult {
        self.emit_bytes(&value.to_le_bytes())
    }

    /// Append `opcode` followed by a 4-byte field holding `operand`.
    ///
    /// Returns the offset of the field, which doubles as a patch handle.
    pub fn emit_with_operand(&mut self, opcode: &[u8], operand: i32) -> EmitResult<usize> {
        self.reserve(opcode.len() + 4)?;
        self.bytes.extend_from_slice(opcode);
        let field = self.bytes.len();
        self.bytes.extend_from_slice(&operand.to_le_bytes());
        Ok(field)
    }

    /// Append `opcode` with a field linked into `chain`.
    pub fn emit_linked(&mut self, opcode: &[u8], chain: &mut PatchChain) -> EmitResult {
        let field = self.emit_with_operand(opcode, chain.head as i32)?;
        chain.head = field as u32;
        Ok(())
    }

    /// Append `opcode` with a displacement field already pointing at `target`.
    pub fn emit_relative(&mut self, opcode: &[u8], target: usize) -> EmitResult {
        let field = self.position() + opcode.len();
        self.emit_with_operand(opcode, displacement(field, target))?;
        Ok(())
    }

    pub fn read_i32(&self, offset: usize) -> i32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[offset..offset + 4]);
        i32::from_le_bytes(raw)
    }

    pub fn patch_i32(&mut self, offset: usize, value: i32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Resolve every link of `chain` to the current write position.
    pub fn resolve(&mut self, chain: &mut PatchChain) {
        let target = self.position();
        self.resolve_to(chain, target);
    }

    /// Resolve every link of `chain` to `target`.
    pub fn resolve_to(&mut self, chain: &mut PatchChain, target: usize) {
        let mut link = chain.take().head as usize;
        while link != 0 {
            let next = self.read_i32(link) as usize;
            self.patch_i32(link, displacement(link, target));
            link = next;
        }
    }
}

/// Displacement written into a 4-byte field at `field` so that it reaches
/// `target`, measured from the end of the field.
pub fn displacement(field: usize, target: usize) -> i32 {
    (target as i64 - field as i64 - 4) as i32
}
