//! Symbol table: one slot per identifier spelling.
//!
//! There is a single flat namespace. Declaring a name again simply overwrites
//! the slot's binding; nothing is restored when a function or block ends.

use std::ops::{Index, IndexMut};

use rustc_hash::FxHashMap;

use super::errors::SourceLocation;
use crate::codegen::buffer::{Arena, CapacityError, EmitResult, PatchChain};
use crate::codegen::Place;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(u32);

/// Byte range of a macro body inside the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroBody {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    #[default]
    Unbound,
    /// Data segment offset of a global cell.
    Global(u32),
    /// Code offset of a compiled function.
    Function(u32),
    /// Frame offset of a parameter or local.
    Frame(i32),
    Macro(MacroBody),
}

impl Binding {
    /// The memory place of a variable binding.
    pub fn place(self) -> Option<Place> {
        match self {
            Binding::Global(offset) => Some(Place::Global(offset)),
            Binding::Frame(offset) => Some(Place::Frame(offset)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub binding: Binding,
    /// Call sites still waiting for this function's definition.
    pub pending_calls: PatchChain,
    /// Where the oldest pending call was written.
    pub first_call: Option<SourceLocation>,
}

#[derive(Debug, Clone)]
pub struct SymbolTable {
    index: FxHashMap<String, SymbolId>,
    slots: Vec<Symbol>,
    max_symbols: usize,
}

impl SymbolTable {
    pub fn new(max_symbols: usize) -> Self {
        SymbolTable {
            index: FxHashMap::default(),
            slots: Vec::new(),
            max_symbols,
        }
    }

    /// Slot for `name`, created unbound on first sight.
    pub fn intern(&mut self, name: &str) -> EmitResult<SymbolId> {
        if let Some(&id) = self.index.get(name) {
            return Ok(id);
        }
        if self.slots.len() >= self.max_symbols {
            return Err(CapacityError {
                arena: Arena::Symbols,
                limit: self.max_symbols,
            });
        }
        let id = SymbolId(self.slots.len() as u32);
        self.slots.push(Symbol {
            name: name.to_string(),
            binding: Binding::Unbound,
            pending_calls: PatchChain::new(),
            first_call: None,
        });
        self.index.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn lookup(&self, name: &str) -> Option<&Symbol> {
        self.index.get(name).map(|&id| &self[id])
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.slots.iter()
    }

    /// Compiled functions as `(name, entry)`, in code order.
    pub fn functions(&self) -> Vec<(String, usize)> {
        let mut out: Vec<(String, usize)> = self
            .slots
            .iter()
            .filter_map(|s| match s.binding {
                Binding::Function(entry) => Some((s.name.clone(), entry as usize)),
                _ => None,
            })
            .collect();
        out.sort_by_key(|(_, entry)| *entry);
        out
    }
}

impl Index<SymbolId> for SymbolTable {
    type Output = Symbol;

    fn index(&self, id: SymbolId) -> &Symbol {
        &self.slots[id.0 as usize]
    }
}

impl IndexMut<SymbolId> for SymbolTable {
    fn index_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.slots[id.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent_and_case_sensitive() {
        let mut table = SymbolTable::new(8);
        let a = table.intern("count").unwrap();
        let b = table.intern("count").unwrap();
        let c = table.intern("Count").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
        assert_eq!(table[a].binding, Binding::Unbound);
    }

    #[test]
    fn test_rebinding_overwrites() {
        let mut table = SymbolTable::new(8);
        let x = table.intern("x").unwrap();
        table[x].binding = Binding::Global(0);
        table[x].binding = Binding::Frame(-8);
        assert_eq!(table.lookup("x").unwrap().binding, Binding::Frame(-8));
        assert_eq!(table[x].binding.place(), Some(Place::Frame(-8)));
    }

    #[test]
    fn test_symbol_limit() {
        let mut table = SymbolTable::new(1);
        table.intern("a").unwrap();
        table.intern("a").unwrap();
        let err = table.intern("b").unwrap_err();
        assert_eq!(err.arena, Arena::Symbols);
    }

    #[test]
    fn test_functions_sorted_by_entry() {
        let mut table = SymbolTable::new(8);
        let f = table.intern("f").unwrap();
        let main = table.intern("main").unwrap();
        table[main].binding = Binding::Function(40);
        table[f].binding = Binding::Function(0);
        assert_eq!(
            table.functions(),
            vec![("f".to_string(), 0), ("main".to_string(), 40)]
        );
    }
}
