//! Host-side view of a running module's linear memory and registers.

use thiserror::Error;
use tracing::debug;

use crate::{translator::translator::PAGE_SIZE, types::types::POINTER_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocatorError {
    #[error("free(): No allocated block with given address")]
    UnknownAddress(u32),

    #[error("malloc(): unable to grow memory")]
    OutOfMemory,

    #[error("memory access out of bounds at {0}")]
    OutOfBounds(u32),

    #[error("stack frame: {0}")]
    FrameMismatch(String),
}

pub type AResult<T> = Result<T, AllocatorError>;

/// What the allocator and the host builtins need from a module instance.
pub trait MemoryModel {
    fn size(&self) -> u32;
    /// Grows memory by `pages` pages, returns false when it cannot grow
    fn grow(&mut self, pages: u32) -> bool;

    fn read_byte(&self, address: u32) -> AResult<u8>;
    fn write_byte(&mut self, address: u32, value: u8) -> AResult<()>;

    fn sp(&self) -> u32;
    fn set_sp(&mut self, value: u32);
    fn bp(&self) -> u32;
    fn set_bp(&mut self, value: u32);
    fn hp(&self) -> u32;
    fn set_hp(&mut self, value: u32);

    fn read_u32(&self, address: u32) -> AResult<u32> {
        let mut bytes = [0; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.read_byte(address + i as u32)?;
        }
        Ok(u32::from_le_bytes(bytes))
    }

    fn write_u32(&mut self, address: u32, value: u32) -> AResult<()> {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.write_byte(address + i as u32, byte)?;
        }
        Ok(())
    }

    /// Bytes from `address` up to the first zero
    fn read_c_string(&self, address: u32) -> AResult<Vec<u8>> {
        let mut bytes = vec![];
        let mut cursor = address;
        loop {
            let byte = self.read_byte(cursor)?;
            if byte == 0 {
                return Ok(bytes);
            }
            bytes.push(byte);
            cursor += 1;
        }
    }
}

/// Makes sure `bytes` more bytes fit between the heap and the stack.
///
/// Grows memory by whole pages, moves the stack segment to the new top byte
/// by byte and shifts `sp`, `bp` and every saved base pointer in the frame
/// chain. Compiled code does the same in its `__grow_stack` helper.
pub fn ensure_capacity(memory: &mut impl MemoryModel, bytes: u32) -> AResult<()> {
    let (sp, hp) = (memory.sp(), memory.hp());
    if sp.checked_sub(bytes).is_some_and(|free_top| free_top >= hp) {
        return Ok(());
    }

    let pages = bytes.div_ceil(PAGE_SIZE);
    let old_size = memory.size();
    if !memory.grow(pages) {
        return Err(AllocatorError::OutOfMemory);
    }

    let delta = pages * PAGE_SIZE;
    debug!(pages, old_size, "growing memory, moving the stack");

    for address in (sp..old_size).rev() {
        let byte = memory.read_byte(address)?;
        memory.write_byte(address + delta, byte)?;
    }

    memory.set_sp(sp + delta);
    memory.set_bp(memory.bp() + delta);

    let mut frame = memory.bp();
    loop {
        let link = memory.read_u32(frame)?;
        if link == 0 {
            break;
        }
        memory.write_u32(frame, link + delta)?;
        frame = link + delta;
    }

    Ok(())
}

/// Memory held in a plain vector, for running the allocator without an engine.
#[derive(Debug, Clone)]
pub struct FlatMemory {
    bytes: Vec<u8>,
    sp: u32,
    bp: u32,
    hp: u32,
    max_pages: u32,
}

impl FlatMemory {
    /// Memory of `pages` pages with an empty stack at the top: `bp` points
    /// to a zero saved-bp slot and `sp` equals `bp`.
    pub fn new(pages: u32, max_pages: u32) -> Self {
        let size = pages * PAGE_SIZE;
        let bp = size - POINTER_SIZE;

        Self {
            bytes: vec![0; size as usize],
            sp: bp,
            bp,
            hp: 0,
            max_pages,
        }
    }
}

impl MemoryModel for FlatMemory {
    fn size(&self) -> u32 {
        self.bytes.len() as u32
    }

    fn grow(&mut self, pages: u32) -> bool {
        let new_pages = self.size() / PAGE_SIZE + pages;
        if new_pages > self.max_pages {
            return false;
        }

        self.bytes.resize((new_pages * PAGE_SIZE) as usize, 0);
        true
    }

    fn read_byte(&self, address: u32) -> AResult<u8> {
        self.bytes
            .get(address as usize)
            .copied()
            .ok_or(AllocatorError::OutOfBounds(address))
    }

    fn write_byte(&mut self, address: u32, value: u8) -> AResult<()> {
        let byte = self
            .bytes
            .get_mut(address as usize)
            .ok_or(AllocatorError::OutOfBounds(address))?;
        *byte = value;
        Ok(())
    }

    fn sp(&self) -> u32 {
        self.sp
    }

    fn set_sp(&mut self, value: u32) {
        self.sp = value;
    }

    fn bp(&self) -> u32 {
        self.bp
    }

    fn set_bp(&mut self, value: u32) {
        self.bp = value;
    }

    fn hp(&self) -> u32 {
        self.hp
    }

    fn set_hp(&mut self, value: u32) {
        self.hp = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enough_room_leaves_memory_alone() {
        let mut memory = FlatMemory::new(1, 4);
        ensure_capacity(&mut memory, 1024).unwrap();
        assert_eq!(memory.size(), PAGE_SIZE);
        assert_eq!(memory.sp(), PAGE_SIZE - 4);
    }

    #[test]
    fn growing_moves_the_stack_and_relinks_frames() {
        let mut memory = FlatMemory::new(1, 4);
        let top = PAGE_SIZE - 4;

        // a second frame of 8 bytes below the outermost one
        let inner_bp = top - 4 - 8;
        memory.write_u32(inner_bp, top).unwrap();
        memory.write_u32(inner_bp - 8, 0xDEAD_BEEF).unwrap();
        memory.set_bp(inner_bp);
        memory.set_sp(inner_bp - 8);
        memory.set_hp(inner_bp - 8 - 100);

        ensure_capacity(&mut memory, 200).unwrap();

        let delta = PAGE_SIZE;
        assert_eq!(memory.size(), 2 * PAGE_SIZE);
        assert_eq!(memory.sp(), inner_bp - 8 + delta);
        assert_eq!(memory.bp(), inner_bp + delta);
        assert_eq!(memory.read_u32(memory.bp()).unwrap(), top + delta);
        assert_eq!(memory.read_u32(top + delta).unwrap(), 0);
        assert_eq!(memory.read_u32(memory.sp()).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn growth_beyond_the_limit_fails() {
        let mut memory = FlatMemory::new(1, 1);
        memory.set_hp(PAGE_SIZE - 16);
        assert_eq!(
            ensure_capacity(&mut memory, 64),
            Err(AllocatorError::OutOfMemory)
        );
    }

    #[test]
    fn strings_stop_at_the_terminator() {
        let mut memory = FlatMemory::new(1, 1);
        for (i, byte) in b"hi\0there".iter().enumerate() {
            memory.write_byte(10 + i as u32, *byte).unwrap();
        }
        assert_eq!(memory.read_c_string(10).unwrap(), b"hi".to_vec());
    }
}
