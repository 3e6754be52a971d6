//! Global data arena: global variable cells and string literals.

use super::buffer::{Arena, CapacityError, EmitResult};

/// Size of a variable cell. `int` is the machine word.
pub const WORD: usize = 8;

#[derive(Debug, Clone)]
pub struct DataSegment {
    bytes: Vec<u8>,
    capacity: usize,
}

impl DataSegment {
    pub fn new(capacity: usize) -> Self {
        DataSegment {
            bytes: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn grow_to(&mut self, len: usize) -> EmitResult {
        if len > self.capacity {
            return Err(CapacityError {
                arena: Arena::Data,
                limit: self.capacity,
            });
        }
        self.bytes.resize(len, 0);
        Ok(())
    }

    /// Reserve one zeroed, word-aligned cell and return its offset.
    pub fn reserve_word(&mut self) -> EmitResult<u32> {
        let offset = self.bytes.len().next_multiple_of(WORD);
        self.grow_to(offset + WORD)?;
        Ok(offset as u32)
    }

    /// Copy a string literal, NUL-terminate it and realign the arena to 4 bytes.
    pub fn push_string(&mut self, text: &[u8]) -> EmitResult<u32> {
        let offset = self.bytes.len();
        let end = (offset + text.len() + 1).next_multiple_of(4);
        self.grow_to(end)?;
        self.bytes[offset..offset + text.len()].copy_from_slice(text);
        Ok(offset as u32)
    }
}
