//! Calling compiled functions from the host.
//!
//! The host builds the same frame a compiled caller would (see
//! `translator::memory`), calls the function with no wasm arguments, reads
//! the return slot above the callee's saved `bp` and pops the frame again.

use tracing::debug;

use super::memory::{ensure_capacity, AResult, AllocatorError, MemoryModel};
use crate::{
    processor::symbol_table::FunctionLayout,
    types::{
        layout::PrimitiveCell,
        types::{ScalarType, WasmType, POINTER_SIZE},
    },
};

/// One primitive cell's worth of value, typed the way wasm sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl ScalarValue {
    pub fn wasm_type(self) -> WasmType {
        match self {
            ScalarValue::I32(_) => WasmType::I32,
            ScalarValue::I64(_) => WasmType::I64,
            ScalarValue::F32(_) => WasmType::F32,
            ScalarValue::F64(_) => WasmType::F64,
        }
    }
}

fn write_bytes(memory: &mut impl MemoryModel, address: u32, bytes: &[u8]) -> AResult<()> {
    for (i, byte) in bytes.iter().enumerate() {
        memory.write_byte(address + i as u32, *byte)?;
    }
    Ok(())
}

/// Stores `value` into a cell of type `data_type`, truncating integers to
/// the cell's width.
pub fn write_scalar(
    memory: &mut impl MemoryModel,
    address: u32,
    data_type: ScalarType,
    value: ScalarValue,
) -> AResult<()> {
    if value.wasm_type() != data_type.wasm_type() {
        return Err(AllocatorError::FrameMismatch(format!(
            "a {} value cannot be stored in a {} cell",
            value.wasm_type().name(),
            data_type.name()
        )));
    }

    let size = data_type.size() as usize;
    match value {
        ScalarValue::I32(value) => write_bytes(memory, address, &value.to_le_bytes()[..size]),
        ScalarValue::I64(value) => write_bytes(memory, address, &value.to_le_bytes()),
        ScalarValue::F32(value) => write_bytes(memory, address, &value.to_le_bytes()),
        ScalarValue::F64(value) => write_bytes(memory, address, &value.to_le_bytes()),
    }
}

/// Loads a cell of type `data_type`, extending narrow integers by their
/// signedness.
pub fn read_scalar(
    memory: &impl MemoryModel,
    address: u32,
    data_type: ScalarType,
) -> AResult<ScalarValue> {
    let mut bytes = [0u8; 8];
    let size = data_type.size() as usize;
    for (i, byte) in bytes.iter_mut().take(size).enumerate() {
        *byte = memory.read_byte(address + i as u32)?;
    }

    let value = match data_type.wasm_type() {
        WasmType::I64 => ScalarValue::I64(i64::from_le_bytes(bytes)),
        WasmType::F32 => ScalarValue::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        WasmType::F64 => ScalarValue::F64(f64::from_le_bytes(bytes)),
        WasmType::I32 => {
            let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            let value = match (size, data_type.is_signed()) {
                (1, true) => raw as u8 as i8 as i32,
                (2, true) => raw as u16 as i16 as i32,
                _ => raw as i32,
            };
            ScalarValue::I32(value)
        }
    };

    Ok(value)
}

fn param_cells(layout: &FunctionLayout) -> impl Iterator<Item = &PrimitiveCell> {
    layout.param_cells.iter().flatten()
}

/// Pushes a frame for a function with `layout` and `frame_size` bytes of
/// parameters and locals. `args` holds one value per parameter cell.
///
/// Afterwards `bp` is the callee's base and `sp` the start of its frame,
/// exactly as a compiled `call` leaves them.
pub fn load_stack_frame(
    memory: &mut impl MemoryModel,
    layout: &FunctionLayout,
    frame_size: u32,
    args: &[ScalarValue],
) -> AResult<()> {
    let cells = param_cells(layout).count();
    if cells != args.len() {
        return Err(AllocatorError::FrameMismatch(format!(
            "expected {} argument cells, got {}",
            cells,
            args.len()
        )));
    }

    let return_size = layout.size_of_return;
    ensure_capacity(memory, return_size + POINTER_SIZE + frame_size)?;

    let link = memory.sp() - return_size - POINTER_SIZE;
    memory.write_u32(link, memory.bp())?;

    let base = link - frame_size;
    for (cell, value) in param_cells(layout).zip(args) {
        write_scalar(memory, base + cell.offset, cell.data_type, *value)?;
    }

    memory.set_sp(base);
    memory.set_bp(link);

    debug!(bp = link, frame_size, return_size, "loaded stack frame");
    Ok(())
}

/// Values in the return slot of the frame at `bp`, one per return cell.
pub fn read_return_values(memory: &impl MemoryModel, layout: &FunctionLayout) -> AResult<Vec<ScalarValue>> {
    let slot = memory.bp() + POINTER_SIZE;

    layout
        .return_cells
        .iter()
        .flatten()
        .map(|cell| read_scalar(memory, slot + cell.offset, cell.data_type))
        .collect()
}

/// Pops the frame at `bp` together with its return slot.
pub fn tear_down_stack_frame(memory: &mut impl MemoryModel, layout: &FunctionLayout) -> AResult<()> {
    let bp = memory.bp();
    memory.set_sp(bp + POINTER_SIZE + layout.size_of_return);
    memory.set_bp(memory.read_u32(bp)?);
    Ok(())
}
