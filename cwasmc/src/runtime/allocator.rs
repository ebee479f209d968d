//! Heap allocator behind the `malloc` and `free` builtins.
//!
//! First fit over a list of free blocks, falling back to bumping the heap
//! pointer. Freed blocks are never merged with their neighbours.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::trace;

use super::memory::{ensure_capacity, AResult, AllocatorError, MemoryModel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryBlock {
    pub address: u32,
    pub size: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Allocator {
    /// Address to size of every live allocation
    allocated: BTreeMap<u32, u32>,
    free_list: Vec<MemoryBlock>,
}

impl Allocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn malloc(&mut self, memory: &mut impl MemoryModel, size: u32) -> AResult<u32> {
        if let Some(index) = self.free_list.iter().position(|block| block.size >= size) {
            let block = self.free_list.remove(index);

            if block.size > size {
                self.free_list.push(MemoryBlock {
                    address: block.address + size,
                    size: block.size - size,
                });
            }

            trace!(address = block.address, size, "malloc reused a free block");
            self.allocated.insert(block.address, size);
            return Ok(block.address);
        }

        ensure_capacity(memory, size)?;

        let address = memory.hp();
        let end = address.checked_add(size).ok_or(AllocatorError::OutOfMemory)?;
        memory.set_hp(end);

        trace!(address, size, "malloc moved the heap pointer");
        self.allocated.insert(address, size);
        Ok(address)
    }

    pub fn free(&mut self, address: u32) -> AResult<()> {
        let size = self
            .allocated
            .remove(&address)
            .ok_or(AllocatorError::UnknownAddress(address))?;

        trace!(address, size, "free");
        self.free_list.push(MemoryBlock { address, size });
        Ok(())
    }

    pub fn allocated(&self) -> &BTreeMap<u32, u32> {
        &self.allocated
    }

    pub fn free_list(&self) -> &[MemoryBlock] {
        &self.free_list
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::runtime::memory::FlatMemory;

    #[test]
    fn freed_blocks_are_split_and_reused() {
        let mut memory = FlatMemory::new(1, 1);
        let mut allocator = Allocator::new();

        let first = allocator.malloc(&mut memory, 16).unwrap();
        let second = allocator.malloc(&mut memory, 16).unwrap();
        assert_eq!((first, second), (0, 16));
        assert_eq!(memory.hp(), 32);

        allocator.free(first).unwrap();
        let third = allocator.malloc(&mut memory, 8).unwrap();

        assert_eq!(third, first);
        assert_eq!(memory.hp(), 32);
        assert_eq!(
            allocator.free_list(),
            &[MemoryBlock {
                address: 8,
                size: 8
            }]
        );
        assert_eq!(allocator.allocated().get(&third), Some(&8));
    }

    #[test]
    fn adjacent_free_blocks_stay_separate() {
        let mut memory = FlatMemory::new(1, 1);
        let mut allocator = Allocator::new();

        let a = allocator.malloc(&mut memory, 8).unwrap();
        let b = allocator.malloc(&mut memory, 8).unwrap();
        allocator.free(a).unwrap();
        allocator.free(b).unwrap();

        // 16 contiguous free bytes, but no single block is large enough
        let c = allocator.malloc(&mut memory, 16).unwrap();
        assert_eq!(c, 16);
        assert_eq!(allocator.free_list().len(), 2);
    }

    #[test]
    fn unknown_addresses_cannot_be_freed() {
        let mut memory = FlatMemory::new(1, 1);
        let mut allocator = Allocator::new();
        let address = allocator.malloc(&mut memory, 4).unwrap();

        assert_eq!(
            allocator.free(address + 1),
            Err(AllocatorError::UnknownAddress(address + 1))
        );
        allocator.free(address).unwrap();
        assert_eq!(
            allocator.free(address).unwrap_err().to_string(),
            "free(): No allocated block with given address"
        );
    }

    #[test]
    fn exhausting_memory_is_an_error() {
        let mut memory = FlatMemory::new(1, 1);
        let mut allocator = Allocator::new();

        assert_eq!(
            allocator.malloc(&mut memory, 70000),
            Err(AllocatorError::OutOfMemory)
        );
    }

    #[test]
    fn allocation_grows_memory_under_the_stack() {
        let mut memory = FlatMemory::new(1, 2);
        let mut allocator = Allocator::new();

        allocator.malloc(&mut memory, 60000).unwrap();
        let address = allocator.malloc(&mut memory, 10000).unwrap();

        assert_eq!(address, 60000);
        assert_eq!(memory.size(), 2 * 65536);
        assert!(memory.hp() <= memory.sp());
    }

    #[derive(Debug, Clone)]
    enum Operation {
        Malloc(u32),
        /// Frees the live allocation at this index, modulo their count
        Free(usize),
    }

    fn operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            (1u32..256).prop_map(Operation::Malloc),
            any::<usize>().prop_map(Operation::Free),
        ]
    }

    proptest! {
        #[test]
        fn live_blocks_never_overlap(operations in prop::collection::vec(operation(), 1..64)) {
            let mut memory = FlatMemory::new(1, 4);
            let mut allocator = Allocator::new();
            let mut live: Vec<(u32, u32)> = vec![];

            for operation in operations {
                match operation {
                    Operation::Malloc(size) => {
                        let address = allocator.malloc(&mut memory, size).unwrap();
                        live.push((address, size));
                    }
                    Operation::Free(index) if !live.is_empty() => {
                        let (address, _) = live.remove(index % live.len());
                        allocator.free(address).unwrap();
                    }
                    Operation::Free(_) => {}
                }

                for (i, (a, a_size)) in live.iter().enumerate() {
                    for (b, b_size) in &live[i + 1..] {
                        prop_assert!(a + a_size <= *b || b + b_size <= *a);
                    }
                }
            }
        }
    }
}
