//! WebAssembly-Text AST produced by the translator. It is rendered to text
//! by `codegen::wat` and encoded to a binary module by `codegen::codegen`.

use serde::Serialize;

use crate::types::types::WasmType;

/// Name of the helper that grows memory and moves the stack to the new top
pub const GROW_STACK: &str = "__grow_stack";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WatModule {
    pub imports: Vec<WatImport>,
    pub memory_pages: u32,
    pub globals: Vec<WatGlobal>,
    /// Functions reachable through `call_indirect`, in table order
    pub function_table: Vec<String>,
    /// Initial contents of memory starting at address 0
    pub data_segment: Vec<u8>,
    pub functions: Vec<WatFunction>,
}

impl WatModule {
    pub fn function(&self, name: &str) -> Option<&WatFunction> {
        self.functions.iter().find(|function| function.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WatImport {
    pub module: String,
    pub name: String,
    pub params: Vec<WasmType>,
    pub result: Option<WasmType>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WatGlobal {
    pub register: Register,
    pub init: i32,
    pub export: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WatFunction {
    pub name: String,
    pub locals: Vec<WasmType>,
    pub body: Vec<Instr>,
    pub export: bool,
}

/// Mutable i32 globals of the calling convention, in global index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Register {
    /// Lowest used byte of the stack
    Sp,
    /// Base of the running function's frame
    Bp,
    /// First byte above the heap
    Hp,
    R1,
    R2,
}

impl Register {
    pub const ALL: [Register; 5] = [
        Register::Sp,
        Register::Bp,
        Register::Hp,
        Register::R1,
        Register::R2,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Register::Sp => "sp",
            Register::Bp => "bp",
            Register::Hp => "hp",
            Register::R1 => "r1",
            Register::R2 => "r2",
        }
    }

    pub fn index(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MemoryOp {
    I32Load,
    I64Load,
    F32Load,
    F64Load,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I32Store,
    I64Store,
    F32Store,
    F64Store,
    I32Store8,
    I32Store16,
}

impl MemoryOp {
    pub fn name(self) -> &'static str {
        match self {
            MemoryOp::I32Load => "i32.load",
            MemoryOp::I64Load => "i64.load",
            MemoryOp::F32Load => "f32.load",
            MemoryOp::F64Load => "f64.load",
            MemoryOp::I32Load8S => "i32.load8_s",
            MemoryOp::I32Load8U => "i32.load8_u",
            MemoryOp::I32Load16S => "i32.load16_s",
            MemoryOp::I32Load16U => "i32.load16_u",
            MemoryOp::I32Store => "i32.store",
            MemoryOp::I64Store => "i64.store",
            MemoryOp::F32Store => "f32.store",
            MemoryOp::F64Store => "f64.store",
            MemoryOp::I32Store8 => "i32.store8",
            MemoryOp::I32Store16 => "i32.store16",
        }
    }

    /// log2 of the natural alignment
    pub fn align(self) -> u32 {
        match self {
            MemoryOp::I32Load8S | MemoryOp::I32Load8U | MemoryOp::I32Store8 => 0,
            MemoryOp::I32Load16S | MemoryOp::I32Load16U | MemoryOp::I32Store16 => 1,
            MemoryOp::I32Load | MemoryOp::F32Load | MemoryOp::I32Store | MemoryOp::F32Store => 2,
            MemoryOp::I64Load | MemoryOp::F64Load | MemoryOp::I64Store | MemoryOp::F64Store => 3,
        }
    }
}

macro_rules! numeric_ops {
    ($($variant:ident => $name:literal,)*) => {
        /// Stack-only numeric instructions
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
        pub enum NumericOp {
            $($variant,)*
        }

        impl NumericOp {
            pub fn name(self) -> &'static str {
                match self {
                    $(NumericOp::$variant => $name,)*
                }
            }

            pub fn instruction(self) -> wasm_encoder::Instruction<'static> {
                match self {
                    $(NumericOp::$variant => wasm_encoder::Instruction::$variant,)*
                }
            }
        }
    };
}

numeric_ops! {
    I32Eqz => "i32.eqz",
    I32Eq => "i32.eq",
    I32Ne => "i32.ne",
    I32LtS => "i32.lt_s",
    I32LtU => "i32.lt_u",
    I32GtS => "i32.gt_s",
    I32GtU => "i32.gt_u",
    I32LeS => "i32.le_s",
    I32LeU => "i32.le_u",
    I32GeS => "i32.ge_s",
    I32GeU => "i32.ge_u",
    I64Eqz => "i64.eqz",
    I64Eq => "i64.eq",
    I64Ne => "i64.ne",
    I64LtS => "i64.lt_s",
    I64LtU => "i64.lt_u",
    I64GtS => "i64.gt_s",
    I64GtU => "i64.gt_u",
    I64LeS => "i64.le_s",
    I64LeU => "i64.le_u",
    I64GeS => "i64.ge_s",
    I64GeU => "i64.ge_u",
    F32Eq => "f32.eq",
    F32Ne => "f32.ne",
    F32Lt => "f32.lt",
    F32Gt => "f32.gt",
    F32Le => "f32.le",
    F32Ge => "f32.ge",
    F64Eq => "f64.eq",
    F64Ne => "f64.ne",
    F64Lt => "f64.lt",
    F64Gt => "f64.gt",
    F64Le => "f64.le",
    F64Ge => "f64.ge",
    I32Add => "i32.add",
    I32Sub => "i32.sub",
    I32Mul => "i32.mul",
    I32DivS => "i32.div_s",
    I32DivU => "i32.div_u",
    I32RemS => "i32.rem_s",
    I32RemU => "i32.rem_u",
    I32And => "i32.and",
    I32Or => "i32.or",
    I32Xor => "i32.xor",
    I32Shl => "i32.shl",
    I32ShrS => "i32.shr_s",
    I32ShrU => "i32.shr_u",
    I64Add => "i64.add",
    I64Sub => "i64.sub",
    I64Mul => "i64.mul",
    I64DivS => "i64.div_s",
    I64DivU => "i64.div_u",
    I64RemS => "i64.rem_s",
    I64RemU => "i64.rem_u",
    I64And => "i64.and",
    I64Or => "i64.or",
    I64Xor => "i64.xor",
    I64Shl => "i64.shl",
    I64ShrS => "i64.shr_s",
    I64ShrU => "i64.shr_u",
    F32Neg => "f32.neg",
    F32Add => "f32.add",
    F32Sub => "f32.sub",
    F32Mul => "f32.mul",
    F32Div => "f32.div",
    F64Neg => "f64.neg",
    F64Add => "f64.add",
    F64Sub => "f64.sub",
    F64Mul => "f64.mul",
    F64Div => "f64.div",
    I32WrapI64 => "i32.wrap_i64",
    I32TruncF32S => "i32.trunc_f32_s",
    I32TruncF32U => "i32.trunc_f32_u",
    I32TruncF64S => "i32.trunc_f64_s",
    I32TruncF64U => "i32.trunc_f64_u",
    I64ExtendI32S => "i64.extend_i32_s",
    I64ExtendI32U => "i64.extend_i32_u",
    I64TruncF32S => "i64.trunc_f32_s",
    I64TruncF32U => "i64.trunc_f32_u",
    I64TruncF64S => "i64.trunc_f64_s",
    I64TruncF64U => "i64.trunc_f64_u",
    F32ConvertI32S => "f32.convert_i32_s",
    F32ConvertI32U => "f32.convert_i32_u",
    F32ConvertI64S => "f32.convert_i64_s",
    F32ConvertI64U => "f32.convert_i64_u",
    F32DemoteF64 => "f32.demote_f64",
    F64ConvertI32S => "f64.convert_i32_s",
    F64ConvertI32U => "f64.convert_i32_u",
    F64ConvertI64S => "f64.convert_i64_s",
    F64ConvertI64U => "f64.convert_i64_u",
    F64PromoteF32 => "f64.promote_f32",
    I32Extend8S => "i32.extend8_s",
    I32Extend16S => "i32.extend16_s",
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Instr {
    I32Const(i32),
    I64Const(i64),
    F32Const(f32),
    F64Const(f64),
    LocalGet(u32),
    LocalSet(u32),
    LocalTee(u32),
    GlobalGet(Register),
    GlobalSet(Register),
    Load { op: MemoryOp, offset: u32 },
    Store { op: MemoryOp, offset: u32 },
    Numeric(NumericOp),
    Block { label: String, body: Vec<Instr> },
    Loop { label: String, body: Vec<Instr> },
    If {
        result: Option<WasmType>,
        then_body: Vec<Instr>,
        else_body: Vec<Instr>,
    },
    Br(String),
    BrIf(String),
    BrTable { labels: Vec<String>, default: String },
    Call(String),
    /// Calls the function table entry on top of the stack, all entries are `() -> ()`
    CallIndirect,
    Return,
    Drop,
    Select,
    Unreachable,
    MemorySize,
    MemoryGrow,
}

impl From<NumericOp> for Instr {
    fn from(op: NumericOp) -> Self {
        Instr::Numeric(op)
    }
}
