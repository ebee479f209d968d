//! Numeric conversions between scalar types.

use super::wat_ast::{Instr, NumericOp};
use crate::types::types::{ScalarType, WasmType};

/// Appends the instructions converting a value of type `from` on top of the
/// stack to type `to`.
///
/// `char` and `short` values live in i32 registers and are kept normalized
/// (sign or zero extended to 32 bits), so narrowing to them masks or
/// re-extends the low bits.
pub fn convert(from: ScalarType, to: ScalarType, out: &mut Vec<Instr>) {
    use NumericOp::*;
    use WasmType::*;

    let op = match (from.wasm_type(), to.wasm_type()) {
        (I32, I32) => {
            if to.size() < from.size() || (to.size() < 4 && to.is_signed() != from.is_signed()) {
                normalize(to, out);
            }
            return;
        }
        (I64, I64) | (F32, F32) | (F64, F64) => return,

        (I64, I32) => {
            out.push(I32WrapI64.into());
            normalize(to, out);
            return;
        }
        (I32, I64) if from.is_signed() => I64ExtendI32S,
        (I32, I64) => I64ExtendI32U,

        (F32, F64) => F64PromoteF32,
        (F64, F32) => F32DemoteF64,

        (F32 | F64, I32) => {
            let op = match (from.wasm_type(), to.is_signed()) {
                (F32, true) => I32TruncF32S,
                (F32, false) => I32TruncF32U,
                (_, true) => I32TruncF64S,
                (_, false) => I32TruncF64U,
            };
            out.push(op.into());
            normalize(to, out);
            return;
        }
        (F32, I64) if to.is_signed() => I64TruncF32S,
        (F32, I64) => I64TruncF32U,
        (F64, I64) if to.is_signed() => I64TruncF64S,
        (F64, I64) => I64TruncF64U,

        (I32, F32) if from.is_signed() => F32ConvertI32S,
        (I32, F32) => F32ConvertI32U,
        (I64, F32) if from.is_signed() => F32ConvertI64S,
        (I64, F32) => F32ConvertI64U,
        (I32, F64) if from.is_signed() => F64ConvertI32S,
        (I32, F64) => F64ConvertI32U,
        (I64, F64) if from.is_signed() => F64ConvertI64S,
        (I64, F64) => F64ConvertI64U,
    };

    out.push(op.into());
}

/// Brings an i32 holding a `char` or `short` back into its value range.
fn normalize(to: ScalarType, out: &mut Vec<Instr>) {
    match (to.size(), to.is_signed()) {
        (1, true) => out.push(NumericOp::I32Extend8S.into()),
        (2, true) => out.push(NumericOp::I32Extend16S.into()),
        (1, false) => out.extend([Instr::I32Const(0xFF), NumericOp::I32And.into()]),
        (2, false) => out.extend([Instr::I32Const(0xFFFF), NumericOp::I32And.into()]),
        _ => {}
    }
}
