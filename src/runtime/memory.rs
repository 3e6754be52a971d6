//! Linear memory of the bytecode VM
//!
//! One byte vector mapped at [`MEMORY_BASE`]. Address 0 and everything below
//! the base is unmapped, so null pointer accesses fault instead of aliasing
//! the data segment.
//!
//! Layout, low to high: data segment image, `argv` strings and pointer array,
//! free space, stack (growing down from the top).

use std::fmt;

use crate::codegen::bytecode::MEMORY_BASE;
use crate::codegen::data::WORD;

/// An access that touched unmapped memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessError {
    pub address: u64,
    pub len: usize,
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}-byte access at {:#x}", self.len, self.address)
    }
}

impl std::error::Error for AccessError {}

#[derive(Debug, Clone)]
pub struct Memory {
    bytes: Vec<u8>,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        Memory {
            bytes: vec![0; size],
        }
    }

    pub fn base(&self) -> u64 {
        MEMORY_BASE
    }

    /// One past the highest mapped address.
    pub fn end(&self) -> u64 {
        MEMORY_BASE + self.bytes.len() as u64
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn range(&self, address: u64, len: usize) -> Result<std::ops::Range<usize>, AccessError> {
        let err = AccessError { address, len };
        let start = address.checked_sub(MEMORY_BASE).ok_or(err)? as usize;
        let end = start.checked_add(len).ok_or(err)?;
        if end > self.bytes.len() {
            return Err(err);
        }
        Ok(start..end)
    }

    pub fn read_word(&self, address: u64) -> Result<i64, AccessError> {
        let range = self.range(address, WORD)?;
        let mut raw = [0u8; WORD];
        raw.copy_from_slice(&self.bytes[range]);
        Ok(i64::from_le_bytes(raw))
    }

    pub fn write_word(&mut self, address: u64, value: i64) -> Result<(), AccessError> {
        let range = self.range(address, WORD)?;
        self.bytes[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_byte(&self, address: u64) -> Result<u8, AccessError> {
        let range = self.range(address, 1)?;
        Ok(self.bytes[range.start])
    }

    pub fn write_byte(&mut self, address: u64, value: u8) -> Result<(), AccessError> {
        let range = self.range(address, 1)?;
        self.bytes[range.start] = value;
        Ok(())
    }

    pub fn write_bytes(&mut self, address: u64, data: &[u8]) -> Result<(), AccessError> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    pub fn fill(&mut self, address: u64, len: usize, value: u8) -> Result<(), AccessError> {
        let range = self.range(address, len)?;
        self.bytes[range].fill(value);
        Ok(())
    }

    /// Bytes of the NUL-terminated string at `address`, without the NUL.
    pub fn read_c_string(&self, address: u64) -> Result<Vec<u8>, AccessError> {
        let start = self.range(address, 1)?.start;
        let len = self.bytes[start..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(AccessError {
                address,
                len: self.bytes.len() - start,
            })?;
        Ok(self.bytes[start..start + len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_faults() {
        let mem = Memory::new(64);
        assert_eq!(mem.read_word(0), Err(AccessError { address: 0, len: 8 }));
        assert!(mem.read_byte(8).is_err());
    }

    #[test]
    fn test_word_round_trip_and_bounds() {
        let mut mem = Memory::new(16);
        mem.write_word(MEMORY_BASE + 8, -2).unwrap();
        assert_eq!(mem.read_word(MEMORY_BASE + 8).unwrap(), -2);
        assert!(mem.write_word(MEMORY_BASE + 9, 1).is_err());
        assert_eq!(mem.read_byte(MEMORY_BASE + 8).unwrap(), 0xfe);
    }

    #[test]
    fn test_c_string() {
        let mut mem = Memory::new(16);
        mem.write_bytes(MEMORY_BASE, b"hey\0").unwrap();
        assert_eq!(mem.read_c_string(MEMORY_BASE).unwrap(), b"hey".to_vec());
        mem.fill(MEMORY_BASE, 16, b'x').unwrap();
        assert!(mem.read_c_string(MEMORY_BASE).is_err());
    }
}
