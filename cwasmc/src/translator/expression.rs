use super::{
    conversion::convert,
    translator::FunctionTranslator,
    wat_ast::{Instr, NumericOp},
};
use crate::{
    errors::errors::{TResult, TranslationError},
    parser::ast::BinaryOperator,
    processor::ast::{ExpressionP, UnaryOperator},
    types::types::{ScalarType, WasmType},
};

impl FunctionTranslator<'_> {
    pub(super) fn translate_expression(
        &mut self,
        expr: &ExpressionP,
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        match expr {
            ExpressionP::IntegerConstant { value, data_type } => {
                out.push(match data_type.wasm_type() {
                    WasmType::I32 => Instr::I32Const(*value as i32),
                    WasmType::I64 => Instr::I64Const(*value as i64),
                    WasmType::F32 => Instr::F32Const(*value as f32),
                    WasmType::F64 => Instr::F64Const(*value as f64),
                });
            }

            ExpressionP::FloatConstant { value, data_type } => {
                out.push(match data_type.wasm_type() {
                    WasmType::F32 => Instr::F32Const(*value as f32),
                    WasmType::F64 => Instr::F64Const(*value),
                    other => {
                        return Err(TranslationError::new(format!(
                            "float constant {} typed as {}",
                            value,
                            other.name()
                        )))
                    }
                });
            }

            ExpressionP::Load { address, data_type } => {
                self.translate_load(address, *data_type, out)?
            }

            ExpressionP::Address(address) => self.translate_address_value(address, out)?,

            ExpressionP::Binary {
                operator,
                left,
                right,
                operand_type,
                ..
            } => {
                let op = binary_op(*operator, *operand_type)?;
                self.translate_expression(left, out)?;
                self.translate_expression(right, out)?;
                out.push(op.into());
            }

            ExpressionP::Unary {
                operator,
                operand,
                data_type,
            } => self.translate_unary(*operator, operand, *data_type, out)?,

            ExpressionP::Convert { operand, from, to } => {
                self.translate_expression(operand, out)?;
                convert(*from, *to, out);
            }

            ExpressionP::Conditional {
                condition,
                then_expr,
                else_expr,
                data_type,
            } => {
                self.translate_expression(condition, out)?;

                let mut then_body = vec![];
                self.translate_expression(then_expr, &mut then_body)?;
                let mut else_body = vec![];
                self.translate_expression(else_expr, &mut else_body)?;

                out.push(Instr::If {
                    result: Some(data_type.wasm_type()),
                    then_body,
                    else_body,
                });
            }

            ExpressionP::PreStatement { statements, expr } => {
                self.translate_statements(statements, out)?;
                self.translate_expression(expr, out)?;
            }

            ExpressionP::PostStatement { expr, statements } => {
                let local = self.new_local(expr.data_type().wasm_type());
                self.translate_expression(expr, out)?;
                out.push(Instr::LocalSet(local));
                self.translate_statements(statements, out)?;
                out.push(Instr::LocalGet(local));
            }

            ExpressionP::HostCall { builtin, args } => {
                if builtin.wasm_result().is_none() {
                    return Err(TranslationError::new(format!(
                        "{} has no value",
                        builtin.name()
                    )));
                }

                for arg in args {
                    self.translate_expression(arg, out)?;
                }
                out.push(Instr::Call(builtin.name().to_string()));
            }
        }

        Ok(())
    }

    fn translate_unary(
        &mut self,
        operator: UnaryOperator,
        operand: &ExpressionP,
        data_type: ScalarType,
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        let operand_type = operand.data_type().wasm_type();

        match (operator, operand_type) {
            (UnaryOperator::Negate, WasmType::F32) => {
                self.translate_expression(operand, out)?;
                out.push(NumericOp::F32Neg.into());
            }
            (UnaryOperator::Negate, WasmType::F64) => {
                self.translate_expression(operand, out)?;
                out.push(NumericOp::F64Neg.into());
            }
            (UnaryOperator::Negate, WasmType::I32) => {
                out.push(Instr::I32Const(0));
                self.translate_expression(operand, out)?;
                out.push(NumericOp::I32Sub.into());
            }
            (UnaryOperator::Negate, WasmType::I64) => {
                out.push(Instr::I64Const(0));
                self.translate_expression(operand, out)?;
                out.push(NumericOp::I64Sub.into());
            }

            (UnaryOperator::BitwiseNot, WasmType::I32) => {
                self.translate_expression(operand, out)?;
                out.extend([Instr::I32Const(-1), NumericOp::I32Xor.into()]);
            }
            (UnaryOperator::BitwiseNot, WasmType::I64) => {
                self.translate_expression(operand, out)?;
                out.extend([Instr::I64Const(-1), NumericOp::I64Xor.into()]);
            }
            (UnaryOperator::BitwiseNot, _) => {
                return Err(TranslationError::new(format!(
                    "bitwise not of {}",
                    data_type.name()
                )))
            }

            (UnaryOperator::LogicalNot, ty) => {
                self.translate_expression(operand, out)?;
                match ty {
                    WasmType::I32 => out.push(NumericOp::I32Eqz.into()),
                    WasmType::I64 => out.push(NumericOp::I64Eqz.into()),
                    WasmType::F32 => out.extend([Instr::F32Const(0.0), NumericOp::F32Eq.into()]),
                    WasmType::F64 => out.extend([Instr::F64Const(0.0), NumericOp::F64Eq.into()]),
                }
            }
        }

        Ok(())
    }
}

/// Instruction for `operator` applied to two operands of `operand_type`.
pub fn binary_op(operator: BinaryOperator, operand_type: ScalarType) -> TResult<NumericOp> {
    use BinaryOperator::*;
    use NumericOp::*;

    let signed = operand_type.is_signed();

    let op = match operand_type.wasm_type() {
        WasmType::I32 => match operator {
            Add => I32Add,
            Subtract => I32Sub,
            Multiply => I32Mul,
            Divide if signed => I32DivS,
            Divide => I32DivU,
            Remainder if signed => I32RemS,
            Remainder => I32RemU,
            ShiftLeft => I32Shl,
            ShiftRight if signed => I32ShrS,
            ShiftRight => I32ShrU,
            LessThan if signed => I32LtS,
            LessThan => I32LtU,
            LessEqual if signed => I32LeS,
            LessEqual => I32LeU,
            GreaterThan if signed => I32GtS,
            GreaterThan => I32GtU,
            GreaterEqual if signed => I32GeS,
            GreaterEqual => I32GeU,
            Equal => I32Eq,
            NotEqual => I32Ne,
            BitwiseAnd => I32And,
            BitwiseOr => I32Or,
            BitwiseXor => I32Xor,
            LogicalAnd | LogicalOr => return Err(short_circuit(operator)),
        },
        WasmType::I64 => match operator {
            Add => I64Add,
            Subtract => I64Sub,
            Multiply => I64Mul,
            Divide if signed => I64DivS,
            Divide => I64DivU,
            Remainder if signed => I64RemS,
            Remainder => I64RemU,
            ShiftLeft => I64Shl,
            ShiftRight if signed => I64ShrS,
            ShiftRight => I64ShrU,
            LessThan if signed => I64LtS,
            LessThan => I64LtU,
            LessEqual if signed => I64LeS,
            LessEqual => I64LeU,
            GreaterThan if signed => I64GtS,
            GreaterThan => I64GtU,
            GreaterEqual if signed => I64GeS,
            GreaterEqual => I64GeU,
            Equal => I64Eq,
            NotEqual => I64Ne,
            BitwiseAnd => I64And,
            BitwiseOr => I64Or,
            BitwiseXor => I64Xor,
            LogicalAnd | LogicalOr => return Err(short_circuit(operator)),
        },
        WasmType::F32 => match operator {
            Add => F32Add,
            Subtract => F32Sub,
            Multiply => F32Mul,
            Divide => F32Div,
            LessThan => F32Lt,
            LessEqual => F32Le,
            GreaterThan => F32Gt,
            GreaterEqual => F32Ge,
            Equal => F32Eq,
            NotEqual => F32Ne,
            _ => return Err(float_operator(operator)),
        },
        WasmType::F64 => match operator {
            Add => F64Add,
            Subtract => F64Sub,
            Multiply => F64Mul,
            Divide => F64Div,
            LessThan => F64Lt,
            LessEqual => F64Le,
            GreaterThan => F64Gt,
            GreaterEqual => F64Ge,
            Equal => F64Eq,
            NotEqual => F64Ne,
            _ => return Err(float_operator(operator)),
        },
    };

    Ok(op)
}

fn short_circuit(operator: BinaryOperator) -> TranslationError {
    TranslationError::new(format!(
        "'{}' reached the translator unexpanded",
        operator.symbol()
    ))
}

fn float_operator(operator: BinaryOperator) -> TranslationError {
    TranslationError::new(format!(
        "invalid operands of floating type to '{}'",
        operator.symbol()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::parser::parse_program,
        processor::processor::process,
        translator::{
            translator::translate,
            wat_ast::{MemoryOp, Register},
        },
        types::types::PrimaryKind,
    };

    fn main_body(source: &str) -> Vec<Instr> {
        let program = process(&parse_program(source).unwrap()).unwrap();
        translate(&program, 1)
            .unwrap()
            .function("main")
            .unwrap()
            .body
            .clone()
    }

    #[test]
    fn signedness_selects_the_instruction() {
        let int = ScalarType::Primary(PrimaryKind::SignedInt);
        let unsigned = ScalarType::Primary(PrimaryKind::UnsignedInt);
        let long = ScalarType::Primary(PrimaryKind::UnsignedLong);

        assert_eq!(binary_op(BinaryOperator::Divide, int).unwrap(), NumericOp::I32DivS);
        assert_eq!(binary_op(BinaryOperator::Divide, unsigned).unwrap(), NumericOp::I32DivU);
        assert_eq!(binary_op(BinaryOperator::ShiftRight, long).unwrap(), NumericOp::I64ShrU);
        assert_eq!(
            binary_op(BinaryOperator::LessThan, ScalarType::Pointer).unwrap(),
            NumericOp::I32LtU
        );
        assert_eq!(
            binary_op(BinaryOperator::GreaterEqual, ScalarType::Primary(PrimaryKind::Double)).unwrap(),
            NumericOp::F64Ge
        );
    }

    #[test]
    fn invalid_operators_are_translation_errors() {
        let float = ScalarType::Primary(PrimaryKind::Float);
        assert!(binary_op(BinaryOperator::Remainder, float).is_err());
        assert!(binary_op(BinaryOperator::ShiftLeft, float).is_err());

        let error = binary_op(BinaryOperator::LogicalAnd, ScalarType::Pointer).unwrap_err();
        assert!(error.to_string().starts_with("TRANSLATION ERROR"));
    }

    #[test]
    fn globals_are_read_from_the_data_segment() {
        let body = main_body("int x = 5; int main(void) { x = x + 3; return x; }");

        assert_eq!(
            &body[..6],
            &[
                Instr::I32Const(0),
                Instr::I32Const(0),
                Instr::Load {
                    op: MemoryOp::I32Load,
                    offset: 0
                },
                Instr::I32Const(3),
                NumericOp::I32Add.into(),
                Instr::Store {
                    op: MemoryOp::I32Store,
                    offset: 0
                },
            ]
        );
    }

    #[test]
    fn locals_are_addressed_below_the_base_pointer() {
        let body = main_body("int main(void) { int x = 10; int *p = &x; return x; }");

        assert_eq!(
            &body[..4],
            &[
                Instr::GlobalGet(Register::Bp),
                Instr::I32Const(8),
                NumericOp::I32Sub.into(),
                Instr::I32Const(10),
            ]
        );
        // &x is bp - 8 + 0
        assert!(body.windows(3).any(|window| window
            == [
                Instr::GlobalGet(Register::Bp),
                Instr::I32Const(8),
                NumericOp::I32Sub.into(),
            ]));
    }

    #[test]
    fn conditional_expressions_use_a_typed_if() {
        let body = main_body("int main(void) { int a = 1; long b = a ? 2 : 3; return 0; }");

        assert!(body.iter().any(|instr| matches!(
            instr,
            Instr::If {
                result: Some(WasmType::I32),
                ..
            }
        )));
    }

    #[test]
    fn negation_subtracts_from_zero() {
        let body = main_body("int main(void) { int a = 1; int b = -a; return b; }");
        let negated = [
            Instr::I32Const(0),
            Instr::GlobalGet(Register::Bp),
            Instr::I32Const(8),
            NumericOp::I32Sub.into(),
            Instr::Load {
                op: MemoryOp::I32Load,
                offset: 0,
            },
            NumericOp::I32Sub.into(),
        ];
        assert!(body.windows(negated.len()).any(|window| window == negated));
    }
}
