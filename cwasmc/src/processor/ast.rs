//! Processed AST: every C operation expanded into typed primitive-cell
//! loads, stores and address computations.

use serde::Serialize;

use super::symbol_table::FunctionLayout;
use crate::{
    errors::errors::{ProcResult, ProcessingError, Warning},
    modules::builtins::Builtin,
    parser::ast::BinaryOperator,
    types::{
        layout::PrimitiveCell,
        types::{DataType, PrimaryKind, ScalarType},
    },
};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessedProgram {
    pub functions: Vec<ProcessedFunction>,
    /// Initial image of the data segment, globals first
    pub data_segment: Vec<u8>,
    /// Functions whose address is taken, in table index order
    pub function_table: Vec<String>,
    /// Data segment offset of the frame sizes of `function_table` entries
    pub frame_table_offset: u32,
    pub imported_functions: Vec<Builtin>,
    pub warnings: Vec<Warning>,
}

impl ProcessedProgram {
    pub fn function(&self, name: &str) -> Option<&ProcessedFunction> {
        self.functions.iter().find(|function| function.name == name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessedFunction {
    pub name: String,
    pub layout: FunctionLayout,
    /// Bytes of parameters and locals below the base pointer
    pub frame_size: u32,
    pub body: Vec<StatementP>,
}

/// A processed C expression.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ProcessedExpression {
    /// One primitive expression per unpacked cell. Arrays and functions carry
    /// a single expression holding their address.
    Value {
        data_type: DataType,
        exprs: Vec<ExpressionP>,
    },
    /// No value, only side effects, e.g. a call to a void function
    Void(Vec<StatementP>),
}

impl ProcessedExpression {
    pub fn scalar(data_type: DataType, expr: ExpressionP) -> Self {
        ProcessedExpression::Value {
            data_type,
            exprs: vec![expr],
        }
    }

    pub fn data_type(&self) -> ProcResult<&DataType> {
        match self {
            ProcessedExpression::Value { data_type, .. } => Ok(data_type),
            ProcessedExpression::Void(_) => Err(void_value()),
        }
    }

    /// Value of a scalar after array and function decay.
    pub fn into_scalar(self) -> ProcResult<(DataType, ExpressionP)> {
        match self {
            ProcessedExpression::Value {
                data_type,
                mut exprs,
            } => {
                if exprs.len() != 1 {
                    return Err(ProcessingError::new(
                        "aggregate value used where a scalar is required",
                    ));
                }

                Ok((data_type.decayed(), exprs.remove(0)))
            }
            ProcessedExpression::Void(_) => Err(void_value()),
        }
    }
}

fn void_value() -> ProcessingError {
    ProcessingError::new("void value not ignored as it ought to be")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ReturnMode {
    /// Callee writes its return value, relative to its own base pointer
    Store,
    /// Caller reads it back after teardown, relative to the stack pointer
    Load,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Address {
    /// Relative to the frame base, `bp - frame_size + offset`
    Local { offset: u32 },
    DataSegment { offset: u32 },
    Dynamic(Box<ExpressionP>),
    ReturnObject { offset: u32, mode: ReturnMode },
    FunctionTableIndex { index: u32 },
}

impl Address {
    /// `*&a` is `a`: a computed address that is itself a plain address unwraps.
    pub fn dynamic(expr: ExpressionP) -> Address {
        match expr {
            ExpressionP::Address(address) => address,
            other => Address::Dynamic(Box::new(other)),
        }
    }

    pub fn offset_by(&self, bytes: u32) -> Address {
        if bytes == 0 {
            return self.clone();
        }

        match self {
            Address::Local { offset } => Address::Local {
                offset: offset + bytes,
            },
            Address::DataSegment { offset } => Address::DataSegment {
                offset: offset + bytes,
            },
            Address::Dynamic(expr) => Address::Dynamic(Box::new(ExpressionP::Binary {
                operator: BinaryOperator::Add,
                left: expr.clone(),
                right: Box::new(ExpressionP::IntegerConstant {
                    value: i128::from(bytes),
                    data_type: ScalarType::Pointer,
                }),
                operand_type: ScalarType::Pointer,
                data_type: ScalarType::Pointer,
            })),
            Address::ReturnObject { offset, mode } => Address::ReturnObject {
                offset: offset + bytes,
                mode: *mode,
            },
            // a table index is not a memory address
            Address::FunctionTableIndex { .. } => self.clone(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum UnaryOperator {
    Negate,
    BitwiseNot,
    LogicalNot,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ExpressionP {
    IntegerConstant {
        value: i128,
        data_type: ScalarType,
    },
    FloatConstant {
        value: f64,
        data_type: ScalarType,
    },
    Load {
        address: Address,
        data_type: ScalarType,
    },
    /// The address itself as a pointer value
    Address(Address),
    Binary {
        operator: BinaryOperator,
        left: Box<ExpressionP>,
        right: Box<ExpressionP>,
        /// Type both operands have been converted to
        operand_type: ScalarType,
        data_type: ScalarType,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<ExpressionP>,
        data_type: ScalarType,
    },
    Convert {
        operand: Box<ExpressionP>,
        from: ScalarType,
        to: ScalarType,
    },
    Conditional {
        condition: Box<ExpressionP>,
        then_expr: Box<ExpressionP>,
        else_expr: Box<ExpressionP>,
        data_type: ScalarType,
    },
    /// Run `statements`, then evaluate `expr`
    PreStatement {
        statements: Vec<StatementP>,
        expr: Box<ExpressionP>,
    },
    /// Evaluate `expr`, then run `statements`; the value is the one of `expr`
    PostStatement {
        expr: Box<ExpressionP>,
        statements: Vec<StatementP>,
    },
    HostCall {
        builtin: Builtin,
        args: Vec<ExpressionP>,
    },
}

impl ExpressionP {
    pub fn data_type(&self) -> ScalarType {
        match self {
            ExpressionP::IntegerConstant { data_type, .. }
            | ExpressionP::FloatConstant { data_type, .. }
            | ExpressionP::Load { data_type, .. }
            | ExpressionP::Binary { data_type, .. }
            | ExpressionP::Unary { data_type, .. }
            | ExpressionP::Conditional { data_type, .. } => *data_type,
            ExpressionP::Address(_) => ScalarType::Pointer,
            ExpressionP::Convert { to, .. } => *to,
            ExpressionP::PreStatement { expr, .. } | ExpressionP::PostStatement { expr, .. } => {
                expr.data_type()
            }
            ExpressionP::HostCall { builtin, .. } => match builtin {
                Builtin::Malloc => ScalarType::Pointer,
                // no value; never used as an operand
                _ => ScalarType::Primary(PrimaryKind::SignedInt),
            },
        }
    }

    /// Whether evaluating the expression may run a call. Memory can grow
    /// during a call, which moves the stack.
    pub fn contains_call(&self) -> bool {
        match self {
            ExpressionP::IntegerConstant { .. } | ExpressionP::FloatConstant { .. } => false,
            ExpressionP::Load { address, .. } | ExpressionP::Address(address) => {
                address.contains_call()
            }
            ExpressionP::Binary { left, right, .. } => left.contains_call() || right.contains_call(),
            ExpressionP::Unary { operand, .. } | ExpressionP::Convert { operand, .. } => {
                operand.contains_call()
            }
            ExpressionP::Conditional {
                condition,
                then_expr,
                else_expr,
                ..
            } => condition.contains_call() || then_expr.contains_call() || else_expr.contains_call(),
            ExpressionP::PreStatement { statements, expr }
            | ExpressionP::PostStatement { expr, statements } => {
                expr.contains_call() || statements.iter().any(StatementP::contains_call)
            }
            ExpressionP::HostCall { .. } => true,
        }
    }

    pub fn integer(value: i128, kind: PrimaryKind) -> ExpressionP {
        ExpressionP::IntegerConstant {
            value,
            data_type: ScalarType::Primary(kind),
        }
    }
}

impl Address {
    fn contains_call(&self) -> bool {
        match self {
            Address::Dynamic(expr) => expr.contains_call(),
            _ => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Callee {
    Direct(String),
    /// Function table index computed at run time
    Indirect(Box<ExpressionP>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ArgumentP {
    /// Destination cell, relative to the callee's frame base
    pub cell: PrimitiveCell,
    pub value: ExpressionP,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionCallP {
    pub callee: Callee,
    pub layout: FunctionLayout,
    /// Last argument first; cells inside one argument stay low to high
    pub args: Vec<ArgumentP>,
    /// Leave the return slot reserved so the caller can read it
    pub keep_return: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SwitchCaseP {
    pub value: i128,
    pub body: Vec<StatementP>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum StatementP {
    Store {
        address: Address,
        value: ExpressionP,
        data_type: ScalarType,
    },
    FunctionCall(FunctionCallP),
    /// Pops the return slot a kept call left reserved
    ReleaseReturn { size: u32 },
    HostCall {
        builtin: Builtin,
        args: Vec<ExpressionP>,
    },
    /// Evaluated for side effects, the value is dropped
    Expression(ExpressionP),
    Selection {
        condition: ExpressionP,
        then_branch: Vec<StatementP>,
        else_branch: Vec<StatementP>,
    },
    While {
        condition: ExpressionP,
        body: Vec<StatementP>,
    },
    DoWhile {
        condition: ExpressionP,
        body: Vec<StatementP>,
    },
    For {
        clause: Vec<StatementP>,
        condition: Option<ExpressionP>,
        update: Vec<StatementP>,
        body: Vec<StatementP>,
    },
    Switch {
        expression: ExpressionP,
        cases: Vec<SwitchCaseP>,
        default: Vec<StatementP>,
    },
    Return,
    Break,
    Continue,
}

impl StatementP {
    pub fn contains_call(&self) -> bool {
        match self {
            StatementP::Store { address, value, .. } => {
                address.contains_call() || value.contains_call()
            }
            StatementP::FunctionCall(_) | StatementP::HostCall { .. } => true,
            StatementP::ReleaseReturn { .. }
            | StatementP::Return
            | StatementP::Break
            | StatementP::Continue => false,
            StatementP::Expression(expr) => expr.contains_call(),
            StatementP::Selection {
                condition,
                then_branch,
                else_branch,
            } => {
                condition.contains_call()
                    || then_branch.iter().any(StatementP::contains_call)
                    || else_branch.iter().any(StatementP::contains_call)
            }
            StatementP::While { condition, body } | StatementP::DoWhile { condition, body } => {
                condition.contains_call() || body.iter().any(StatementP::contains_call)
            }
            StatementP::For {
                clause,
                condition,
                update,
                body,
            } => {
                clause.iter().any(StatementP::contains_call)
                    || condition.as_ref().is_some_and(ExpressionP::contains_call)
                    || update.iter().any(StatementP::contains_call)
                    || body.iter().any(StatementP::contains_call)
            }
            StatementP::Switch {
                expression,
                cases,
                default,
            } => {
                expression.contains_call()
                    || cases
                        .iter()
                        .any(|case| case.body.iter().any(StatementP::contains_call))
                    || default.iter().any(StatementP::contains_call)
            }
        }
    }
}
