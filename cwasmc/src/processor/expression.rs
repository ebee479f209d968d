use super::{
    ast::{
        Address, ArgumentP, Callee, ExpressionP, FunctionCallP, ProcessedExpression, ReturnMode,
        StatementP, UnaryOperator,
    },
    constant::{fold_prefix, Constant},
    processor::Processor,
    symbol_table::{FunctionLayout, Storage, SymbolEntry, VariableEntry},
};
use crate::{
    errors::errors::{ProcResult, ProcessingError},
    parser::ast::{
        BinaryOperator, Expression, ExpressionKind, Position, PostfixOperator, PrefixOperator,
    },
    types::{
        layout::{size_of, unpack},
        types::{stringify, DataType, PrimaryKind, ScalarType, WasmType, PTRDIFF_T, SIZE_T},
    },
};

/// A processed scalar together with the type it had before decay, which is
/// what diagnostics print.
pub(super) struct Operand {
    pub original: DataType,
    pub position: Position,
    pub data_type: DataType,
    pub expr: ExpressionP,
}

impl Operand {
    pub fn kind(&self) -> Option<PrimaryKind> {
        match self.data_type {
            DataType::Primary(kind) => Some(kind),
            _ => None,
        }
    }
}

pub(super) fn zero(data_type: ScalarType) -> ExpressionP {
    if data_type.is_float() {
        ExpressionP::FloatConstant {
            value: 0.0,
            data_type,
        }
    } else {
        ExpressionP::IntegerConstant {
            value: 0,
            data_type,
        }
    }
}

fn constant_of(expr: &ExpressionP) -> Option<Constant> {
    match expr {
        ExpressionP::IntegerConstant { value, data_type } => Some(Constant::Integer {
            value: *value,
            kind: match data_type {
                ScalarType::Primary(kind) => *kind,
                ScalarType::Pointer => PrimaryKind::UnsignedInt,
            },
        }),
        ExpressionP::FloatConstant {
            value,
            data_type: ScalarType::Primary(kind),
        } => Some(Constant::Float {
            value: *value,
            kind: *kind,
        }),
        _ => None,
    }
}

fn is_null_constant(expr: &ExpressionP) -> bool {
    matches!(expr, ExpressionP::IntegerConstant { value: 0, .. })
}

/// Implicit conversion of a scalar, folded for constants.
pub(super) fn convert(expr: ExpressionP, to: ScalarType) -> ExpressionP {
    let from = expr.data_type();
    if from == to {
        return expr;
    }

    if let Some(constant) = constant_of(&expr) {
        return match to {
            ScalarType::Primary(kind) => constant.convert(kind).to_expression(),
            ScalarType::Pointer => ExpressionP::IntegerConstant {
                value: constant.convert(PrimaryKind::UnsignedInt).as_integer(),
                data_type: ScalarType::Pointer,
            },
        };
    }

    ExpressionP::Convert {
        operand: Box::new(expr),
        from,
        to,
    }
}

/// An i32 that is non-zero exactly when `expr` is.
pub(super) fn truthy(expr: ExpressionP) -> ExpressionP {
    let data_type = expr.data_type();

    if data_type.wasm_type() == WasmType::I32 {
        return expr;
    }

    boolean(expr)
}

/// 1 when `expr` is non-zero, else 0
fn boolean(expr: ExpressionP) -> ExpressionP {
    let data_type = expr.data_type();

    ExpressionP::Binary {
        operator: BinaryOperator::NotEqual,
        left: Box::new(expr),
        right: Box::new(zero(data_type)),
        operand_type: data_type,
        data_type: ScalarType::Primary(PrimaryKind::SignedInt),
    }
}

fn signed_int() -> ScalarType {
    ScalarType::Primary(PrimaryKind::SignedInt)
}

/// Statements that keep the side effects of `expr` while dropping its value.
pub(super) fn discard(expr: ExpressionP) -> Vec<StatementP> {
    match expr {
        ExpressionP::IntegerConstant { .. } | ExpressionP::FloatConstant { .. } => vec![],
        ExpressionP::Address(Address::Dynamic(inner))
        | ExpressionP::Load {
            address: Address::Dynamic(inner),
            ..
        } => discard(*inner),
        ExpressionP::Address(_) | ExpressionP::Load { .. } => vec![],
        ExpressionP::Binary { left, right, .. } => {
            let mut statements = discard(*left);
            statements.extend(discard(*right));
            statements
        }
        ExpressionP::Unary { operand, .. } | ExpressionP::Convert { operand, .. } => {
            discard(*operand)
        }
        ExpressionP::Conditional {
            condition,
            then_expr,
            else_expr,
            ..
        } => {
            let then_branch = discard(*then_expr);
            let else_branch = discard(*else_expr);

            if then_branch.is_empty() && else_branch.is_empty() {
                discard(*condition)
            } else {
                vec![StatementP::Selection {
                    condition: *condition,
                    then_branch,
                    else_branch,
                }]
            }
        }
        ExpressionP::PreStatement {
            mut statements,
            expr,
        } => {
            statements.extend(discard(*expr));
            statements
        }
        ExpressionP::PostStatement { expr, statements } => match *expr {
            // a call whose value is dropped need not keep its return slot
            ExpressionP::PreStatement {
                statements: mut calls,
                expr: load,
            } => {
                let reads_return = matches!(
                    *load,
                    ExpressionP::Load {
                        address: Address::ReturnObject { .. },
                        ..
                    }
                );

                if let (true, [StatementP::ReleaseReturn { .. }], Some(StatementP::FunctionCall(call))) =
                    (reads_return, statements.as_slice(), calls.last_mut())
                {
                    call.keep_return = false;
                    return calls;
                }

                calls.extend(discard(*load));
                calls.extend(statements);
                calls
            }
            other => {
                let mut result = discard(other);
                result.extend(statements);
                result
            }
        },
        ExpressionP::HostCall { builtin, args } => vec![StatementP::HostCall { builtin, args }],
    }
}

pub(super) fn discard_value(processed: ProcessedExpression) -> Vec<StatementP> {
    match processed {
        ProcessedExpression::Void(statements) => statements,
        ProcessedExpression::Value { exprs, .. } => exprs.into_iter().flat_map(discard).collect(),
    }
}

/// Value of an object of type `data_type` stored at `address`.
fn load_value(data_type: DataType, address: Address) -> ProcResult<ProcessedExpression> {
    match data_type {
        DataType::Array { .. } | DataType::Function(_) => Ok(ProcessedExpression::scalar(
            data_type,
            ExpressionP::Address(address),
        )),
        _ => {
            let exprs = unpack(&data_type)?
                .into_iter()
                .map(|cell| ExpressionP::Load {
                    address: address.offset_by(cell.offset),
                    data_type: cell.data_type,
                })
                .collect();

            Ok(ProcessedExpression::Value { data_type, exprs })
        }
    }
}

fn variable_address(entry: &VariableEntry) -> Address {
    match entry.storage {
        Storage::Local => Address::Local {
            offset: entry.offset,
        },
        Storage::DataSegment => Address::DataSegment {
            offset: entry.offset,
        },
    }
}

impl Processor {
    pub(super) fn process_expression(&mut self, expr: &Expression) -> ProcResult<ProcessedExpression> {
        self.process_expression_kind(expr)
            .map_err(|e| e.with_position(expr.position))
    }

    pub(super) fn process_operand(&mut self, expr: &Expression) -> ProcResult<Operand> {
        let processed = self.process_expression(expr)?;
        let original = processed
            .data_type()
            .map_err(|e| e.with_position(expr.position))?
            .clone();
        let (data_type, expr_p) = processed
            .into_scalar()
            .map_err(|e| e.with_position(expr.position))?;

        Ok(Operand {
            original,
            position: expr.position,
            data_type,
            expr: expr_p,
        })
    }

    /// Scalar condition as an i32 truth value.
    pub(super) fn process_condition(&mut self, expr: &Expression) -> ProcResult<ExpressionP> {
        Ok(truthy(self.process_operand(expr)?.expr))
    }

    fn process_expression_kind(&mut self, expr: &Expression) -> ProcResult<ProcessedExpression> {
        let position = expr.position;

        match &expr.kind {
            ExpressionKind::IntegerConstant { value, suffix } => {
                let constant = Constant::integer_literal(*value, *suffix);
                Ok(ProcessedExpression::scalar(
                    DataType::Primary(constant.kind()),
                    constant.to_expression(),
                ))
            }

            ExpressionKind::FloatConstant { value, is_float } => {
                let constant = Constant::float_literal(*value, *is_float);
                Ok(ProcessedExpression::scalar(
                    DataType::Primary(constant.kind()),
                    constant.to_expression(),
                ))
            }

            ExpressionKind::StringLiteral(bytes) => {
                let offset = self.add_string(bytes);
                Ok(ProcessedExpression::scalar(
                    DataType::array_of(
                        DataType::Primary(PrimaryKind::SignedChar),
                        bytes.len() as u32 + 1,
                    ),
                    ExpressionP::Address(Address::DataSegment { offset }),
                ))
            }

            ExpressionKind::Identifier(name) => self.process_identifier(name, position),

            ExpressionKind::Binary {
                operator,
                left,
                right,
            } => self.process_binary(*operator, left, right),

            ExpressionKind::Assignment { target, value } => {
                self.process_assignment(target, value, position)
            }

            ExpressionKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => self.process_conditional(condition, then_expr, else_expr),

            ExpressionKind::Prefix { operator, operand } => match operator {
                PrefixOperator::Increment => self.process_increment(operand, true, false),
                PrefixOperator::Decrement => self.process_increment(operand, false, false),
                _ => self.process_unary(*operator, operand),
            },

            ExpressionKind::Postfix { operator, operand } => match operator {
                PostfixOperator::Increment => self.process_increment(operand, true, true),
                PostfixOperator::Decrement => self.process_increment(operand, false, true),
            },

            ExpressionKind::AddressOf(operand) => self.process_address_of(operand, position),

            ExpressionKind::Dereference(operand) => {
                let pointer = self.process_operand(operand)?;

                let Some(pointee) = pointer.data_type.pointee() else {
                    return Err(ProcessingError::new(format!(
                        "invalid type argument of unary '*' (have '{}')",
                        stringify(&pointer.original)
                    )));
                };

                match pointee {
                    Some(pointee) => load_value(pointee.clone(), Address::dynamic(pointer.expr)),
                    None => {
                        self.warn("dereferencing 'void *' pointer", position);
                        Ok(ProcessedExpression::Void(discard(pointer.expr)))
                    }
                }
            }

            ExpressionKind::Call { callee, arguments } => {
                self.process_call(callee, arguments)
            }

            ExpressionKind::SizeOfExpression(operand) => {
                let data_type = match self.process_expression(operand)? {
                    ProcessedExpression::Value { data_type, .. } => data_type,
                    ProcessedExpression::Void(_) => {
                        return Err(ProcessingError::new(
                            "invalid application of 'sizeof' to a void type",
                        ))
                    }
                };

                Ok(Self::size_constant(size_of(&data_type)?))
            }

            ExpressionKind::SizeOfType(data_type) => {
                let data_type = self.resolve_type(data_type)?;
                Ok(Self::size_constant(size_of(&data_type)?))
            }
        }
    }

    fn size_constant(size: u32) -> ProcessedExpression {
        ProcessedExpression::scalar(
            DataType::Primary(SIZE_T),
            ExpressionP::integer(i128::from(size), SIZE_T),
        )
    }

    fn process_identifier(&mut self, name: &str, position: Position) -> ProcResult<ProcessedExpression> {
        match self.symbol_table.lookup(name)?.clone() {
            SymbolEntry::Variable(entry) => load_value(entry.data_type.clone(), variable_address(&entry)),
            SymbolEntry::Function(entry) => {
                if entry.builtin.is_some() {
                    return Err(ProcessingError::unsupported(format!(
                        "address of host function '{}'",
                        name
                    )));
                }

                let index = self.function_table_index(name, position);
                Ok(ProcessedExpression::scalar(
                    DataType::Function(entry.function_type),
                    ExpressionP::Address(Address::FunctionTableIndex { index }),
                ))
            }
            SymbolEntry::EnumConstant { value } => Ok(ProcessedExpression::scalar(
                Self::int_type(),
                ExpressionP::integer(value, PrimaryKind::SignedInt),
            )),
        }
    }

    fn process_binary(
        &mut self,
        operator: BinaryOperator,
        left: &Expression,
        right: &Expression,
    ) -> ProcResult<ProcessedExpression> {
        let left = self.process_operand(left)?;
        let right = self.process_operand(right)?;

        let invalid = || {
            ProcessingError::new(format!(
                "invalid operands to binary '{}' (have '{}' and '{}')",
                operator.symbol(),
                stringify(&left.original),
                stringify(&right.original)
            ))
        };

        let (left_kind, right_kind) = (left.kind(), right.kind());
        let both_arithmetic = left_kind.is_some() && right_kind.is_some();
        let both_integral = both_arithmetic
            && left.data_type.is_integral()
            && right.data_type.is_integral();

        match operator {
            BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr => {
                let condition = truthy(left.expr);
                let other = boolean(right.expr);
                let (then_expr, else_expr) = match operator {
                    BinaryOperator::LogicalAnd => (other, ExpressionP::integer(0, PrimaryKind::SignedInt)),
                    _ => (ExpressionP::integer(1, PrimaryKind::SignedInt), other),
                };

                Ok(ProcessedExpression::scalar(
                    Self::int_type(),
                    ExpressionP::Conditional {
                        condition: Box::new(condition),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                        data_type: signed_int(),
                    },
                ))
            }

            BinaryOperator::Add => match (left.data_type.is_pointer(), right.data_type.is_pointer()) {
                (false, false) if both_arithmetic => Ok(arithmetic(operator, left, right)),
                (true, false) if right.data_type.is_integral() => {
                    self.pointer_offset(operator, left, right)
                }
                (false, true) if left.data_type.is_integral() => {
                    self.pointer_offset(operator, right, left)
                }
                _ => Err(invalid()),
            },

            BinaryOperator::Subtract => match (left.data_type.is_pointer(), right.data_type.is_pointer()) {
                (false, false) if both_arithmetic => Ok(arithmetic(operator, left, right)),
                (true, false) if right.data_type.is_integral() => {
                    self.pointer_offset(operator, left, right)
                }
                (true, true) => self.pointer_difference(left, right),
                _ => Err(invalid()),
            },

            BinaryOperator::Multiply | BinaryOperator::Divide if both_arithmetic => {
                Ok(arithmetic(operator, left, right))
            }

            BinaryOperator::Remainder
            | BinaryOperator::BitwiseAnd
            | BinaryOperator::BitwiseOr
            | BinaryOperator::BitwiseXor
                if both_integral =>
            {
                Ok(arithmetic(operator, left, right))
            }

            BinaryOperator::ShiftLeft | BinaryOperator::ShiftRight if both_integral => {
                // the left operand alone decides the type
                let kind = left_kind.map(PrimaryKind::promoted).unwrap_or(PrimaryKind::SignedInt);
                let data_type = ScalarType::Primary(kind);

                Ok(ProcessedExpression::scalar(
                    DataType::Primary(kind),
                    ExpressionP::Binary {
                        operator,
                        left: Box::new(convert(left.expr, data_type)),
                        right: Box::new(convert(right.expr, data_type)),
                        operand_type: data_type,
                        data_type,
                    },
                ))
            }

            _ if operator.is_comparison() => {
                let operand_type = match (left.data_type.is_pointer(), right.data_type.is_pointer()) {
                    (false, false) if both_arithmetic => {
                        let kind = left_kind
                            .zip(right_kind)
                            .map(|(l, r)| l.common(r))
                            .unwrap_or(PrimaryKind::SignedInt);
                        ScalarType::Primary(kind)
                    }
                    (true, true) => ScalarType::Pointer,
                    (true, false) if right.data_type.is_integral() => {
                        if !is_null_constant(&right.expr) {
                            self.warn("comparison between pointer and integer", right.position);
                        }
                        ScalarType::Pointer
                    }
                    (false, true) if left.data_type.is_integral() => {
                        if !is_null_constant(&left.expr) {
                            self.warn("comparison between pointer and integer", right.position);
                        }
                        ScalarType::Pointer
                    }
                    _ => return Err(invalid()),
                };

                Ok(ProcessedExpression::scalar(
                    Self::int_type(),
                    ExpressionP::Binary {
                        operator,
                        left: Box::new(convert(left.expr, operand_type)),
                        right: Box::new(convert(right.expr, operand_type)),
                        operand_type,
                        data_type: signed_int(),
                    },
                ))
            }

            _ => Err(invalid()),
        }
    }

    /// Bytes a pointer of type `pointer` moves per element.
    fn pointee_size(pointer: &DataType) -> ProcResult<u32> {
        match pointer.pointee() {
            Some(Some(DataType::Function(_))) => Err(ProcessingError::new(
                "pointer arithmetic on a pointer to function",
            )),
            Some(Some(pointee)) => size_of(pointee),
            // void pointers move bytewise
            _ => Ok(1),
        }
    }

    /// `pointer ± integer`, the integer scaled by the pointee size.
    fn pointer_offset(
        &mut self,
        operator: BinaryOperator,
        pointer: Operand,
        index: Operand,
    ) -> ProcResult<ProcessedExpression> {
        let size = Self::pointee_size(&pointer.data_type)?;
        let index = convert(index.expr, ScalarType::Pointer);

        let scaled = match index {
            ExpressionP::IntegerConstant { value, .. } => ExpressionP::IntegerConstant {
                value: value * i128::from(size),
                data_type: ScalarType::Pointer,
            },
            index if size == 1 => index,
            index => ExpressionP::Binary {
                operator: BinaryOperator::Multiply,
                left: Box::new(index),
                right: Box::new(ExpressionP::IntegerConstant {
                    value: i128::from(size),
                    data_type: ScalarType::Pointer,
                }),
                operand_type: ScalarType::Pointer,
                data_type: ScalarType::Pointer,
            },
        };

        // constant offsets from a static address stay static
        if let (
            BinaryOperator::Add,
            ExpressionP::Address(address @ (Address::Local { .. } | Address::DataSegment { .. })),
            ExpressionP::IntegerConstant { value, .. },
        ) = (operator, &pointer.expr, &scaled)
        {
            if let Ok(bytes) = u32::try_from(*value) {
                return Ok(ProcessedExpression::scalar(
                    pointer.data_type,
                    ExpressionP::Address(address.offset_by(bytes)),
                ));
            }
        }

        Ok(ProcessedExpression::scalar(
            pointer.data_type,
            ExpressionP::Binary {
                operator,
                left: Box::new(pointer.expr),
                right: Box::new(scaled),
                operand_type: ScalarType::Pointer,
                data_type: ScalarType::Pointer,
            },
        ))
    }

    fn pointer_difference(&mut self, left: Operand, right: Operand) -> ProcResult<ProcessedExpression> {
        let size = Self::pointee_size(&left.data_type)?;
        let ptrdiff = ScalarType::Primary(PTRDIFF_T);

        let difference = convert(
            ExpressionP::Binary {
                operator: BinaryOperator::Subtract,
                left: Box::new(left.expr),
                right: Box::new(right.expr),
                operand_type: ScalarType::Pointer,
                data_type: ScalarType::Pointer,
            },
            ptrdiff,
        );

        let expr = if size == 1 {
            difference
        } else {
            ExpressionP::Binary {
                operator: BinaryOperator::Divide,
                left: Box::new(difference),
                right: Box::new(ExpressionP::integer(i128::from(size), PTRDIFF_T)),
                operand_type: ptrdiff,
                data_type: ptrdiff,
            }
        };

        Ok(ProcessedExpression::scalar(DataType::Primary(PTRDIFF_T), expr))
    }

    /// Place an assignable expression designates.
    fn process_lvalue(&mut self, expr: &Expression, what: &str) -> ProcResult<(DataType, Address)> {
        let not_lvalue = || ProcessingError::new(format!("lvalue required as {}", what)).with_position(expr.position);

        let (data_type, address) = match &expr.kind {
            ExpressionKind::Identifier(name) => match self.symbol_table.lookup(name) {
                Ok(SymbolEntry::Variable(entry)) => (entry.data_type.clone(), variable_address(entry)),
                Ok(_) => return Err(not_lvalue()),
                Err(e) => return Err(e.with_position(expr.position)),
            },
            ExpressionKind::Dereference(pointer) => {
                let pointer = self.process_operand(pointer)?;

                match pointer.data_type.pointee() {
                    Some(Some(pointee)) => (pointee.clone(), Address::dynamic(pointer.expr)),
                    Some(None) => {
                        return Err(ProcessingError::new("invalid use of void expression")
                            .with_position(expr.position))
                    }
                    None => {
                        return Err(ProcessingError::new(format!(
                            "invalid type argument of unary '*' (have '{}')",
                            stringify(&pointer.original)
                        ))
                        .with_position(expr.position))
                    }
                }
            }
            _ => return Err(not_lvalue()),
        };

        match data_type {
            DataType::Array { .. } => Err(ProcessingError::new(format!(
                "assignment to expression with array type '{}'",
                stringify(&data_type)
            ))
            .with_position(expr.position)),
            DataType::Function(_) => Err(not_lvalue()),
            _ => Ok((data_type, address)),
        }
    }

    /// Pins a computed address into a frame slot so it can be used twice.
    fn stabilize(&mut self, address: Address) -> ProcResult<(Vec<StatementP>, Address)> {
        match address {
            Address::Dynamic(expr) if !matches!(*expr, ExpressionP::IntegerConstant { .. }) => {
                let offset = self.symbol_table.add_temporary(&DataType::void_pointer())?;
                let slot = Address::Local { offset };

                Ok((
                    vec![StatementP::Store {
                        address: slot.clone(),
                        value: *expr,
                        data_type: ScalarType::Pointer,
                    }],
                    Address::Dynamic(Box::new(ExpressionP::Load {
                        address: slot,
                        data_type: ScalarType::Pointer,
                    })),
                ))
            }
            address => Ok((vec![], address)),
        }
    }

    /// Converts `value` for storage into a cell of type `target`. `context`
    /// names the operation in diagnostics.
    pub(super) fn coerce(
        &mut self,
        value: Operand,
        target: ScalarType,
        context: &str,
        position: Position,
    ) -> ProcResult<ExpressionP> {
        let source_is_pointer = value.data_type.is_pointer();
        let target_is_pointer = target == ScalarType::Pointer;

        match (target_is_pointer, source_is_pointer) {
            (true, true) => {}
            (true, false) if value.data_type.is_integral() => {
                if !is_null_constant(&value.expr) {
                    self.warn(
                        format!("{} makes pointer from integer without a cast", context),
                        position,
                    );
                }
            }
            (false, true) if !target.is_float() => {
                self.warn(
                    format!("{} makes integer from pointer without a cast", context),
                    position,
                );
            }
            (false, false) if value.data_type.is_arithmetic() => {}
            _ => {
                return Err(ProcessingError::new(format!(
                    "incompatible types in {}: cannot convert '{}' to '{}'",
                    context,
                    stringify(&value.original),
                    target.name()
                ))
                .with_position(position))
            }
        }

        Ok(convert(value.expr, target))
    }

    fn process_assignment(
        &mut self,
        target: &Expression,
        value: &Expression,
        position: Position,
    ) -> ProcResult<ProcessedExpression> {
        let (data_type, address) = self.process_lvalue(target, "left operand of assignment")?;
        let cell = scalar_of(&data_type)?;

        let value = self.process_operand(value)?;
        let mut value = self.coerce(value, cell, "assignment", position)?;
        let mut statements = vec![];

        // a call in the value can move the stack under a pinned address
        if value.contains_call() && matches!(address, Address::Dynamic(_)) {
            let offset = self.symbol_table.add_temporary(&data_type)?;
            let slot = Address::Local { offset };
            statements.push(StatementP::Store {
                address: slot.clone(),
                value,
                data_type: cell,
            });
            value = ExpressionP::Load {
                address: slot,
                data_type: cell,
            };
        }

        let (pinned, address) = self.stabilize(address)?;
        statements.extend(pinned);

        statements.push(StatementP::Store {
            address: address.clone(),
            value,
            data_type: cell,
        });

        Ok(ProcessedExpression::scalar(
            data_type,
            ExpressionP::PreStatement {
                statements,
                expr: Box::new(ExpressionP::Load {
                    address,
                    data_type: cell,
                }),
            },
        ))
    }

    /// `++x`, `--x`, `x++` and `x--`
    fn process_increment(
        &mut self,
        operand: &Expression,
        increment: bool,
        postfix: bool,
    ) -> ProcResult<ProcessedExpression> {
        let what = if increment {
            "increment operand"
        } else {
            "decrement operand"
        };

        let (data_type, address) = self.process_lvalue(operand, what)?;
        let cell = scalar_of(&data_type)?;
        let operator = if increment {
            BinaryOperator::Add
        } else {
            BinaryOperator::Subtract
        };

        let (mut statements, address) = self.stabilize(address)?;
        let current = ExpressionP::Load {
            address: address.clone(),
            data_type: cell,
        };

        let updated = match &data_type {
            DataType::Pointer(_) => {
                let size = Self::pointee_size(&data_type)?;
                ExpressionP::Binary {
                    operator,
                    left: Box::new(current),
                    right: Box::new(ExpressionP::IntegerConstant {
                        value: i128::from(size),
                        data_type: ScalarType::Pointer,
                    }),
                    operand_type: ScalarType::Pointer,
                    data_type: ScalarType::Pointer,
                }
            }
            DataType::Primary(kind) => {
                let kind = kind.common(PrimaryKind::SignedInt);
                let operand_type = ScalarType::Primary(kind);
                let sum = ExpressionP::Binary {
                    operator,
                    left: Box::new(convert(current, operand_type)),
                    right: Box::new(Constant::Integer {
                        value: 1,
                        kind: PrimaryKind::SignedInt,
                    }
                    .convert(kind)
                    .to_expression()),
                    operand_type,
                    data_type: operand_type,
                };
                convert(sum, cell)
            }
            other => {
                return Err(ProcessingError::new(format!(
                    "wrong type argument to {} (have '{}')",
                    what,
                    stringify(other)
                )))
            }
        };

        let store = StatementP::Store {
            address: address.clone(),
            value: updated,
            data_type: cell,
        };
        let load = ExpressionP::Load {
            address,
            data_type: cell,
        };

        let expr = if postfix {
            let post = ExpressionP::PostStatement {
                expr: Box::new(load),
                statements: vec![store],
            };

            if statements.is_empty() {
                post
            } else {
                ExpressionP::PreStatement {
                    statements,
                    expr: Box::new(post),
                }
            }
        } else {
            statements.push(store);
            ExpressionP::PreStatement {
                statements,
                expr: Box::new(load),
            }
        };

        Ok(ProcessedExpression::scalar(data_type, expr))
    }

    fn process_unary(&mut self, operator: PrefixOperator, operand: &Expression) -> ProcResult<ProcessedExpression> {
        let operand = self.process_operand(operand)?;

        let wrong_type = |required: &str| {
            ProcessingError::new(format!(
                "wrong type argument to unary '{}' expression; {} type required",
                operator.symbol(),
                required
            ))
        };

        if let Some(constant) = constant_of(&operand.expr).filter(|_| !operand.data_type.is_pointer()) {
            let folded = fold_prefix(operator, constant)?;
            return Ok(ProcessedExpression::scalar(
                DataType::Primary(folded.kind()),
                folded.to_expression(),
            ));
        }

        match operator {
            PrefixOperator::LogicalNot => {
                if !operand.data_type.is_scalar() {
                    return Err(wrong_type("scalar"));
                }

                Ok(ProcessedExpression::scalar(
                    Self::int_type(),
                    ExpressionP::Unary {
                        operator: UnaryOperator::LogicalNot,
                        operand: Box::new(operand.expr),
                        data_type: signed_int(),
                    },
                ))
            }
            PrefixOperator::Plus | PrefixOperator::Minus | PrefixOperator::BitwiseNot => {
                let Some(kind) = operand.kind() else {
                    return Err(wrong_type(if operator == PrefixOperator::BitwiseNot {
                        "integral"
                    } else {
                        "arithmetic"
                    }));
                };

                if operator == PrefixOperator::BitwiseNot && kind.is_float() {
                    return Err(wrong_type("integral"));
                }

                let kind = kind.promoted();
                let data_type = ScalarType::Primary(kind);
                let promoted = convert(operand.expr, data_type);

                let expr = match operator {
                    PrefixOperator::Plus => promoted,
                    PrefixOperator::Minus => ExpressionP::Unary {
                        operator: UnaryOperator::Negate,
                        operand: Box::new(promoted),
                        data_type,
                    },
                    _ => ExpressionP::Unary {
                        operator: UnaryOperator::BitwiseNot,
                        operand: Box::new(promoted),
                        data_type,
                    },
                };

                Ok(ProcessedExpression::scalar(DataType::Primary(kind), expr))
            }
            PrefixOperator::Increment | PrefixOperator::Decrement => Err(ProcessingError::new(
                format!("unexpected unary '{}'", operator.symbol()),
            )),
        }
    }

    fn process_conditional(
        &mut self,
        condition: &Expression,
        then_expr: &Expression,
        else_expr: &Expression,
    ) -> ProcResult<ProcessedExpression> {
        let condition = self.process_condition(condition)?;
        let then_value = self.process_expression(then_expr)?;
        let else_value = self.process_expression(else_expr)?;

        let (then_value, else_value) = match (then_value, else_value) {
            (ProcessedExpression::Void(then_branch), ProcessedExpression::Void(else_branch)) => {
                return Ok(ProcessedExpression::Void(vec![StatementP::Selection {
                    condition,
                    then_branch,
                    else_branch,
                }]))
            }
            (then_value, else_value) => (then_value.into_scalar()?, else_value.into_scalar()?),
        };

        let ((then_type, then_p), (else_type, else_p)) = (then_value, else_value);

        let (data_type, scalar) = match (&then_type, &else_type) {
            (DataType::Primary(a), DataType::Primary(b)) => {
                let kind = a.common(*b);
                (DataType::Primary(kind), ScalarType::Primary(kind))
            }
            (DataType::Pointer(_), DataType::Pointer(_)) => (then_type.clone(), ScalarType::Pointer),
            (DataType::Pointer(_), _) if is_null_constant(&else_p) => (then_type.clone(), ScalarType::Pointer),
            (_, DataType::Pointer(_)) if is_null_constant(&then_p) => (else_type.clone(), ScalarType::Pointer),
            _ => {
                return Err(ProcessingError::new(format!(
                    "type mismatch in conditional expression ('{}' and '{}')",
                    stringify(&then_type),
                    stringify(&else_type)
                )))
            }
        };

        Ok(ProcessedExpression::scalar(
            data_type,
            ExpressionP::Conditional {
                condition: Box::new(condition),
                then_expr: Box::new(convert(then_p, scalar)),
                else_expr: Box::new(convert(else_p, scalar)),
                data_type: scalar,
            },
        ))
    }

    fn process_address_of(&mut self, operand: &Expression, position: Position) -> ProcResult<ProcessedExpression> {
        match &operand.kind {
            ExpressionKind::Identifier(name) => match self.symbol_table.lookup(name)?.clone() {
                SymbolEntry::Variable(entry) => Ok(ProcessedExpression::scalar(
                    DataType::pointer_to(entry.data_type.clone()),
                    ExpressionP::Address(variable_address(&entry)),
                )),
                SymbolEntry::Function(_) => {
                    let (data_type, expr) = self.process_identifier(name, position)?.into_scalar()?;
                    Ok(ProcessedExpression::scalar(data_type, expr))
                }
                SymbolEntry::EnumConstant { .. } => Err(ProcessingError::new(
                    "lvalue required as unary '&' operand",
                )),
            },

            // &*p is p, neither operator is evaluated
            ExpressionKind::Dereference(pointer) => {
                let processed = self.process_expression(pointer)?;

                if processed.data_type()?.decayed().pointee().is_none() {
                    return Err(ProcessingError::new(format!(
                        "invalid type argument of unary '*' (have '{}')",
                        stringify(processed.data_type()?)
                    )));
                }

                Ok(processed)
            }

            ExpressionKind::StringLiteral(_) => {
                let (data_type, expr) = match self.process_expression(operand)? {
                    ProcessedExpression::Value { data_type, mut exprs } if exprs.len() == 1 => {
                        (data_type, exprs.remove(0))
                    }
                    _ => return Err(ProcessingError::new("lvalue required as unary '&' operand")),
                };

                Ok(ProcessedExpression::scalar(DataType::pointer_to(data_type), expr))
            }

            _ => Err(ProcessingError::new("lvalue required as unary '&' operand")),
        }
    }

    fn process_call(
        &mut self,
        callee: &Expression,
        arguments: &[Expression],
    ) -> ProcResult<ProcessedExpression> {
        let direct = match &callee.kind {
            ExpressionKind::Identifier(name) => match self.symbol_table.lookup(name) {
                Ok(SymbolEntry::Function(entry)) => Some((name.clone(), entry.clone())),
                _ => None,
            },
            _ => None,
        };

        let (target, function_type, layout, builtin, display) = match direct {
            Some((name, entry)) => {
                if entry.builtin.is_none() {
                    self.reference_function(&name, callee.position);
                }

                (
                    Callee::Direct(name.clone()),
                    entry.function_type,
                    entry.layout,
                    entry.builtin,
                    name,
                )
            }
            None => {
                let pointer = self.process_operand(callee)?;

                let function_type = match &pointer.data_type {
                    DataType::Pointer(Some(pointee)) => match pointee.as_ref() {
                        DataType::Function(function_type) => function_type.clone(),
                        _ => return Err(not_callable(&pointer.original)),
                    },
                    _ => return Err(not_callable(&pointer.original)),
                };

                let layout = FunctionLayout::new(&function_type)?;
                let display = match &callee.kind {
                    ExpressionKind::Identifier(name) => name.clone(),
                    _ => "function pointer".to_string(),
                };

                (
                    Callee::Indirect(Box::new(pointer.expr)),
                    function_type,
                    layout,
                    None,
                    display,
                )
            }
        };

        if arguments.len() < function_type.params.len() {
            return Err(ProcessingError::new(format!(
                "too few arguments to function '{}'",
                display
            )));
        }

        if arguments.len() > function_type.params.len() {
            return Err(ProcessingError::new(format!(
                "too many arguments to function '{}'",
                display
            )));
        }

        let mut values = vec![];
        for (i, (argument, param)) in arguments.iter().zip(&function_type.params).enumerate() {
            let operand = self.process_operand(argument)?;
            let value = self.coerce(
                operand,
                scalar_of(param)?,
                &format!("passing argument {} of '{}'", i + 1, display),
                argument.position,
            )?;
            values.push(value);
        }

        if let Some(builtin) = builtin {
            self.used_builtins.insert(builtin);

            return Ok(match &function_type.return_type {
                Some(return_type) => ProcessedExpression::scalar(
                    return_type.as_ref().clone(),
                    ExpressionP::HostCall {
                        builtin,
                        args: values,
                    },
                ),
                None => ProcessedExpression::Void(vec![StatementP::HostCall {
                    builtin,
                    args: values,
                }]),
            });
        }

        // last argument first, matching a stack that grows down
        let args = values
            .into_iter()
            .zip(&layout.param_cells)
            .rev()
            .map(|(value, cells)| {
                cells
                    .first()
                    .map(|cell| ArgumentP { cell: *cell, value })
                    .ok_or_else(|| ProcessingError::new("parameter without a memory cell"))
            })
            .collect::<ProcResult<Vec<_>>>()?;

        let return_cell = layout
            .return_cells
            .as_ref()
            .and_then(|cells| cells.first().copied());
        let return_size = layout.size_of_return;

        let call = FunctionCallP {
            callee: target,
            layout,
            args,
            keep_return: return_cell.is_some(),
        };

        match (&function_type.return_type, return_cell) {
            (Some(return_type), Some(cell)) => Ok(ProcessedExpression::scalar(
                return_type.as_ref().clone(),
                ExpressionP::PostStatement {
                    expr: Box::new(ExpressionP::PreStatement {
                        statements: vec![StatementP::FunctionCall(call)],
                        expr: Box::new(ExpressionP::Load {
                            address: Address::ReturnObject {
                                offset: cell.offset,
                                mode: ReturnMode::Load,
                            },
                            data_type: cell.data_type,
                        }),
                    }),
                    statements: vec![StatementP::ReleaseReturn { size: return_size }],
                },
            )),
            _ => Ok(ProcessedExpression::Void(vec![StatementP::FunctionCall(call)])),
        }
    }
}

fn arithmetic(operator: BinaryOperator, left: Operand, right: Operand) -> ProcessedExpression {
    let kind = match (left.kind(), right.kind()) {
        (Some(l), Some(r)) => l.common(r),
        _ => PrimaryKind::SignedInt,
    };
    let data_type = ScalarType::Primary(kind);

    ProcessedExpression::scalar(
        DataType::Primary(kind),
        ExpressionP::Binary {
            operator,
            left: Box::new(convert(left.expr, data_type)),
            right: Box::new(convert(right.expr, data_type)),
            operand_type: data_type,
            data_type,
        },
    )
}

fn scalar_of(data_type: &DataType) -> ProcResult<ScalarType> {
    data_type.decayed().scalar_type().ok_or_else(|| {
        ProcessingError::unsupported(stringify(data_type))
    })
}

fn not_callable(data_type: &DataType) -> ProcessingError {
    ProcessingError::new(format!(
        "called object is not a function or function pointer (have '{}')",
        stringify(data_type)
    ))
}

#[cfg(test)]
mod tests {
    use crate::{
        errors::errors::ProcessingError,
        parser::{ast::BinaryOperator, parser::parse_program},
        processor::{
            ast::{Address, ExpressionP, ProcessedProgram, ReturnMode, StatementP},
            processor::process,
        },
        types::types::{PrimaryKind, ScalarType},
    };

    fn processed(source: &str) -> ProcessedProgram {
        process(&parse_program(source).unwrap()).unwrap()
    }

    fn error(source: &str) -> ProcessingError {
        process(&parse_program(source).unwrap()).unwrap_err()
    }

    fn main_body(source: &str) -> Vec<StatementP> {
        processed(source).function("main").unwrap().body.clone()
    }

    /// Value stored by the statement at `index` of `main`
    fn stored(body: &[StatementP], index: usize) -> ExpressionP {
        match &body[index] {
            StatementP::Store { value, .. } => value.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn address_of_and_dereference_cancel() {
        let body = main_body("int main(void) { int *p; int *q; q = &*p; q = p; return 0; }");
        assert_eq!(body[0], body[1]);

        let body = main_body("int main(void) { int x; int y; y = *&x; y = x; return 0; }");
        assert_eq!(body[0], body[1]);
        assert_eq!(
            stored(&body, 0),
            ExpressionP::Load {
                address: Address::Local { offset: 0 },
                data_type: ScalarType::Primary(PrimaryKind::SignedInt),
            }
        );
    }

    #[test]
    fn pointer_arithmetic_scales_by_the_pointee() {
        let body = main_body("int main(void) { int *p; int *q; long i; q = p + i; return 0; }");

        let expected = ExpressionP::Binary {
            operator: BinaryOperator::Add,
            left: Box::new(ExpressionP::Load {
                address: Address::Local { offset: 0 },
                data_type: ScalarType::Pointer,
            }),
            right: Box::new(ExpressionP::Binary {
                operator: BinaryOperator::Multiply,
                left: Box::new(ExpressionP::Convert {
                    operand: Box::new(ExpressionP::Load {
                        address: Address::Local { offset: 8 },
                        data_type: ScalarType::Primary(PrimaryKind::SignedLong),
                    }),
                    from: ScalarType::Primary(PrimaryKind::SignedLong),
                    to: ScalarType::Pointer,
                }),
                right: Box::new(ExpressionP::IntegerConstant {
                    value: 4,
                    data_type: ScalarType::Pointer,
                }),
                operand_type: ScalarType::Pointer,
                data_type: ScalarType::Pointer,
            }),
            operand_type: ScalarType::Pointer,
            data_type: ScalarType::Pointer,
        };
        assert_eq!(stored(&body, 0), expected);

        // constant offsets into a local array stay static addresses
        let body = main_body("int main(void) { int a[4]; int *q; q = a + 2; return 0; }");
        assert_eq!(
            stored(&body, 0),
            ExpressionP::Address(Address::Local { offset: 8 })
        );
    }

    #[test]
    fn pointer_difference_divides_by_the_pointee() {
        let body = main_body("int main(void) { int a[4]; int d; d = &a[3] - &a[0]; return d; }");

        match stored(&body, 0) {
            ExpressionP::Binary {
                operator: BinaryOperator::Divide,
                left,
                right,
                ..
            } => {
                assert!(matches!(
                    *left,
                    ExpressionP::Convert {
                        from: ScalarType::Pointer,
                        to: ScalarType::Primary(PrimaryKind::SignedInt),
                        ..
                    }
                ));
                assert_eq!(*right, ExpressionP::integer(4, PrimaryKind::SignedInt));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn only_calls_used_as_values_keep_the_return_slot() {
        let body = main_body(
            "int f(int a) { return a; } int main(void) { int x; x = f(1); f(2); return 0; }",
        );

        match stored(&body, 0) {
            ExpressionP::PostStatement { expr, statements } => {
                assert_eq!(statements, vec![StatementP::ReleaseReturn { size: 4 }]);
                match *expr {
                    ExpressionP::PreStatement { statements, expr } => {
                        assert!(matches!(
                            &statements[..],
                            [StatementP::FunctionCall(call)] if call.keep_return
                        ));
                        assert_eq!(
                            *expr,
                            ExpressionP::Load {
                                address: Address::ReturnObject {
                                    offset: 0,
                                    mode: ReturnMode::Load,
                                },
                                data_type: ScalarType::Primary(PrimaryKind::SignedInt),
                            }
                        );
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(&body[1], StatementP::FunctionCall(call) if !call.keep_return));
    }

    #[test]
    fn logical_and_short_circuits() {
        let body = main_body("int main(void) { int a; int b; int c; c = a && b; return c; }");

        match stored(&body, 0) {
            ExpressionP::Conditional {
                condition,
                else_expr,
                ..
            } => {
                assert_eq!(
                    *condition,
                    ExpressionP::Load {
                        address: Address::Local { offset: 0 },
                        data_type: ScalarType::Primary(PrimaryKind::SignedInt),
                    }
                );
                assert_eq!(*else_expr, ExpressionP::integer(0, PrimaryKind::SignedInt));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn operand_type_errors() {
        assert_eq!(
            error("int main(void) { int *p; int *q; p + q; return 0; }").message,
            "invalid operands to binary '+' (have 'pointer to signed int' and 'pointer to signed int')"
        );
        assert_eq!(
            error("int main(void) { double d; d % 2; return 0; }").message,
            "invalid operands to binary '%' (have 'double' and 'signed int')"
        );
        assert_eq!(
            error("int main(void) { int *p; -p; return 0; }").message,
            "wrong type argument to unary '-' expression; arithmetic type required"
        );
        assert_eq!(
            error("int main(void) { double d; ~d; return 0; }").message,
            "wrong type argument to unary '~' expression; integral type required"
        );
        assert_eq!(
            error("int f(int a) { return a; } int main(void) { return f(); }").message,
            "too few arguments to function 'f'"
        );
    }

    #[test]
    fn comparing_pointers_with_integers_warns() {
        let program = processed(
            "int main(void) { int *p; int c; c = p == 1; c = p == 0; return c; }",
        );

        assert_eq!(program.warnings.len(), 1);
        assert_eq!(
            program.warnings[0].message,
            "comparison between pointer and integer"
        );
    }

    #[test]
    fn sizeof_is_a_size_t_constant() {
        let body = main_body(
            "int main(void) { int a[5]; unsigned int s; s = sizeof(long); s = sizeof(a); return 0; }",
        );

        assert_eq!(stored(&body, 0), ExpressionP::integer(8, PrimaryKind::UnsignedInt));
        assert_eq!(stored(&body, 1), ExpressionP::integer(20, PrimaryKind::UnsignedInt));
    }

    #[test]
    fn calls_are_stored_before_a_computed_address_is_pinned() {
        let body = main_body(
            "int g(void) { return 5; }
             int main(void) { int a[2]; int i; i = 1; a[i] = g(); return a[1]; }",
        );
        let start = body
            .iter()
            .position(|statement| matches!(statement, StatementP::Store { value, .. } if value.contains_call()))
            .unwrap();

        let temporary = match &body[start] {
            StatementP::Store {
                address: Address::Local { offset },
                ..
            } => *offset,
            other => panic!("unexpected {:?}", other),
        };
        assert!(matches!(
            &body[start + 1],
            StatementP::Store { data_type: ScalarType::Pointer, value, .. } if !value.contains_call()
        ));
        match &body[start + 2] {
            StatementP::Store {
                address: Address::Dynamic(_),
                value,
                ..
            } => assert_eq!(
                *value,
                ExpressionP::Load {
                    address: Address::Local { offset: temporary },
                    data_type: ScalarType::Primary(PrimaryKind::SignedInt),
                }
            ),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn call_free_values_store_directly() {
        let body = main_body("int main(void) { int a[2]; int i; i = 1; a[i] = 7; return 0; }");

        assert!(matches!(
            &body[2],
            StatementP::Store { value: ExpressionP::IntegerConstant { .. }, address: Address::Dynamic(_), .. }
        ));
    }
}
