//! Typing, capping and compile-time folding of constants.

use serde::Serialize;

use super::{
    ast::ExpressionP,
    processor::Processor,
    symbol_table::SymbolEntry,
};
use crate::{
    errors::errors::{ProcResult, ProcessingError},
    parser::ast::{BinaryOperator, Expression, ExpressionKind, IntegerSuffix, PrefixOperator},
    types::{
        layout::size_of,
        types::{PrimaryKind, ScalarType, SIZE_T},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum Constant {
    Integer { value: i128, kind: PrimaryKind },
    Float { value: f64, kind: PrimaryKind },
}

impl Constant {
    /// Types an integer literal by its suffix and magnitude.
    pub fn integer_literal(value: u128, suffix: Option<IntegerSuffix>) -> Constant {
        let value = i128::try_from(value).unwrap_or(i128::MAX);
        let fits = |kind: PrimaryKind| value <= kind.int_bounds().1;

        let kind = match suffix {
            Some(IntegerSuffix::UnsignedLong) => PrimaryKind::UnsignedLong,
            Some(IntegerSuffix::Unsigned) if fits(PrimaryKind::UnsignedInt) => {
                PrimaryKind::UnsignedInt
            }
            Some(IntegerSuffix::Unsigned) => PrimaryKind::UnsignedLong,
            Some(IntegerSuffix::Long) => PrimaryKind::SignedLong,
            None if fits(PrimaryKind::SignedInt) => PrimaryKind::SignedInt,
            None => PrimaryKind::SignedLong,
        };

        Constant::Integer {
            value: cap_integer(value, kind),
            kind,
        }
    }

    pub fn float_literal(value: f64, is_float: bool) -> Constant {
        if is_float {
            Constant::Float {
                value: f64::from(value as f32),
                kind: PrimaryKind::Float,
            }
        } else {
            Constant::Float {
                value,
                kind: PrimaryKind::Double,
            }
        }
    }

    pub fn kind(self) -> PrimaryKind {
        match self {
            Constant::Integer { kind, .. } | Constant::Float { kind, .. } => kind,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Constant::Integer { value, .. } => value == 0,
            Constant::Float { value, .. } => value == 0.0,
        }
    }

    /// Floats truncate toward zero
    pub fn as_integer(self) -> i128 {
        match self {
            Constant::Integer { value, .. } => value,
            Constant::Float { value, .. } => value.trunc() as i128,
        }
    }

    pub fn as_float(self) -> f64 {
        match self {
            Constant::Integer { value, .. } => value as f64,
            Constant::Float { value, .. } => value,
        }
    }

    /// Value as seen after an implicit conversion to `kind`.
    pub fn convert(self, kind: PrimaryKind) -> Constant {
        if kind.is_float() {
            let value = self.as_float();
            let value = if kind == PrimaryKind::Float {
                f64::from(value as f32)
            } else {
                value
            };

            return Constant::Float { value, kind };
        }

        Constant::Integer {
            value: wrap_integer(self.as_integer(), kind),
            kind,
        }
    }

    pub fn to_expression(self) -> ExpressionP {
        match self {
            Constant::Integer { value, kind } => ExpressionP::integer(value, kind),
            Constant::Float { value, kind } => ExpressionP::FloatConstant {
                value,
                data_type: ScalarType::Primary(kind),
            },
        }
    }

    /// Little-endian image of the constant stored into a cell of type `target`.
    pub fn to_bytes(self, target: ScalarType) -> Vec<u8> {
        let kind = match target {
            ScalarType::Primary(kind) => kind,
            ScalarType::Pointer => PrimaryKind::UnsignedInt,
        };

        match self.convert(kind) {
            Constant::Float { value, .. } if kind == PrimaryKind::Float => {
                (value as f32).to_le_bytes().to_vec()
            }
            Constant::Float { value, .. } => value.to_le_bytes().to_vec(),
            Constant::Integer { value, .. } => {
                value.to_le_bytes()[..kind.size() as usize].to_vec()
            }
        }
    }
}

/// Brings an out-of-range literal back into the range of `kind`. Overflowing
/// signed values follow the wraparound other compilers exhibit.
pub fn cap_integer(value: i128, kind: PrimaryKind) -> i128 {
    let (min, max) = kind.int_bounds();
    let bits = kind.size() * 8;

    if value > max {
        if kind.is_signed() {
            min + ((value - max) % (1i128 << bits)) - 1
        } else {
            value % max
        }
    } else if value < 0 {
        if !kind.is_signed() {
            return value.rem_euclid(max + 1);
        }

        let min_negative = -(1i128 << bits) - 1;
        if value >= min_negative {
            return value;
        }

        (1i128 << (bits - 1)) - ((min_negative - value) % ((1i128 << kind.size()) * 8))
    } else {
        value
    }
}

/// Adjusts the result of a folded operation to its type.
pub fn adjust_integer(value: i128, kind: PrimaryKind) -> i128 {
    let max = kind.int_bounds().1;

    if value > max {
        value % (max + 1)
    } else if value < 0 && !kind.is_signed() {
        value.rem_euclid(max + 1)
    } else {
        value
    }
}

/// Two's complement truncation to the width of `kind`.
fn wrap_integer(value: i128, kind: PrimaryKind) -> i128 {
    let bits = kind.size() * 8;
    let modulus = 1i128 << bits;
    let wrapped = value.rem_euclid(modulus);

    if kind.is_signed() && wrapped >= modulus / 2 {
        wrapped - modulus
    } else {
        wrapped
    }
}

fn invalid_operands(operator: &str, left: PrimaryKind, right: PrimaryKind) -> ProcessingError {
    ProcessingError::new(format!(
        "invalid operands to binary '{}' (have '{}' and '{}')",
        operator,
        left.name(),
        right.name()
    ))
}

fn boolean(value: bool) -> Constant {
    Constant::Integer {
        value: i128::from(value),
        kind: PrimaryKind::SignedInt,
    }
}

pub fn fold_binary(operator: BinaryOperator, left: Constant, right: Constant) -> ProcResult<Constant> {
    let (left_kind, right_kind) = (left.kind(), right.kind());

    if operator.is_logical() {
        let value = match operator {
            BinaryOperator::LogicalAnd => !left.is_zero() && !right.is_zero(),
            _ => !left.is_zero() || !right.is_zero(),
        };

        return Ok(boolean(value));
    }

    let integral_only = matches!(
        operator,
        BinaryOperator::Remainder
            | BinaryOperator::ShiftLeft
            | BinaryOperator::ShiftRight
            | BinaryOperator::BitwiseAnd
            | BinaryOperator::BitwiseOr
            | BinaryOperator::BitwiseXor
    );

    if integral_only && (left_kind.is_float() || right_kind.is_float()) {
        return Err(invalid_operands(operator.symbol(), left_kind, right_kind));
    }

    if matches!(operator, BinaryOperator::ShiftLeft | BinaryOperator::ShiftRight) {
        let kind = left_kind.promoted();
        let value = left.as_integer();
        let shift = right.as_integer();

        if !(0..i128::from(kind.size() * 8)).contains(&shift) {
            return Err(ProcessingError::new("shift count out of range in constant expression"));
        }

        let value = match operator {
            BinaryOperator::ShiftLeft => value
                .checked_mul(1i128 << shift)
                .ok_or_else(|| ProcessingError::new("integer overflow in constant expression"))?,
            _ => value >> shift,
        };

        return Ok(Constant::Integer {
            value: adjust_integer(value, kind),
            kind,
        });
    }

    let kind = left_kind.common(right_kind);
    let (left, right) = (left.convert(kind), right.convert(kind));

    if kind.is_float() {
        let (a, b) = (left.as_float(), right.as_float());

        let value = match operator {
            BinaryOperator::Add => a + b,
            BinaryOperator::Subtract => a - b,
            BinaryOperator::Multiply => a * b,
            BinaryOperator::Divide => a / b,
            BinaryOperator::LessThan => return Ok(boolean(a < b)),
            BinaryOperator::LessEqual => return Ok(boolean(a <= b)),
            BinaryOperator::GreaterThan => return Ok(boolean(a > b)),
            BinaryOperator::GreaterEqual => return Ok(boolean(a >= b)),
            BinaryOperator::Equal => return Ok(boolean(a == b)),
            BinaryOperator::NotEqual => return Ok(boolean(a != b)),
            _ => return Err(invalid_operands(operator.symbol(), left_kind, right_kind)),
        };

        return Ok(Constant::Float { value, kind }.convert(kind));
    }

    let (a, b) = (left.as_integer(), right.as_integer());

    let value = match operator {
        BinaryOperator::Add => a + b,
        BinaryOperator::Subtract => a - b,
        BinaryOperator::Multiply => a * b,
        BinaryOperator::Divide | BinaryOperator::Remainder if b == 0 => {
            return Err(ProcessingError::new("division by zero in constant expression"))
        }
        BinaryOperator::Divide => a / b,
        BinaryOperator::Remainder => a % b,
        BinaryOperator::BitwiseAnd => a & b,
        BinaryOperator::BitwiseOr => a | b,
        BinaryOperator::BitwiseXor => a ^ b,
        BinaryOperator::LessThan => return Ok(boolean(a < b)),
        BinaryOperator::LessEqual => return Ok(boolean(a <= b)),
        BinaryOperator::GreaterThan => return Ok(boolean(a > b)),
        BinaryOperator::GreaterEqual => return Ok(boolean(a >= b)),
        BinaryOperator::Equal => return Ok(boolean(a == b)),
        BinaryOperator::NotEqual => return Ok(boolean(a != b)),
        _ => return Err(invalid_operands(operator.symbol(), left_kind, right_kind)),
    };

    Ok(Constant::Integer {
        value: adjust_integer(value, kind),
        kind,
    })
}

pub fn fold_prefix(operator: PrefixOperator, operand: Constant) -> ProcResult<Constant> {
    let kind = operand.kind();

    match (operator, operand) {
        (PrefixOperator::LogicalNot, _) => Ok(boolean(operand.is_zero())),
        (PrefixOperator::Plus, _) => Ok(operand.convert(kind.promoted())),
        (PrefixOperator::Minus, Constant::Float { value, kind }) => {
            Ok(Constant::Float { value: -value, kind })
        }
        (PrefixOperator::Minus, Constant::Integer { value, kind }) => {
            let kind = kind.promoted();
            Ok(Constant::Integer {
                value: adjust_integer(-value, kind),
                kind,
            })
        }
        (PrefixOperator::BitwiseNot, Constant::Integer { value, kind }) => {
            let kind = kind.promoted();
            Ok(Constant::Integer {
                value: adjust_integer(!value, kind),
                kind,
            })
        }
        (PrefixOperator::BitwiseNot, Constant::Float { .. }) => Err(ProcessingError::new(
            "wrong type argument to unary '~' expression; integral type required",
        )),
        _ => Err(ProcessingError::new(format!(
            "'{}' in a constant expression",
            operator.symbol()
        ))),
    }
}

impl Processor {
    /// Folds `expr` at compile time. `context` is the error reported when
    /// the expression is not constant.
    pub(super) fn evaluate_constant(&mut self, expr: &Expression, context: &str) -> ProcResult<Constant> {
        let not_constant = || ProcessingError::new(context).with_position(expr.position);

        let constant = match &expr.kind {
            ExpressionKind::IntegerConstant { value, suffix } => {
                Constant::integer_literal(*value, *suffix)
            }
            ExpressionKind::FloatConstant { value, is_float } => {
                Constant::float_literal(*value, *is_float)
            }
            ExpressionKind::Identifier(name) => match self.symbol_table.lookup(name) {
                Ok(SymbolEntry::EnumConstant { value }) => Constant::Integer {
                    value: *value,
                    kind: PrimaryKind::SignedInt,
                },
                Ok(_) => return Err(not_constant()),
                Err(e) => return Err(e.with_position(expr.position)),
            },
            ExpressionKind::Prefix { operator, operand } => {
                let operand = self.evaluate_constant(operand, context)?;
                fold_prefix(*operator, operand).map_err(|e| e.with_position(expr.position))?
            }
            ExpressionKind::Binary {
                operator,
                left,
                right,
            } => {
                let left = self.evaluate_constant(left, context)?;
                let right = self.evaluate_constant(right, context)?;
                fold_binary(*operator, left, right).map_err(|e| e.with_position(expr.position))?
            }
            ExpressionKind::Conditional {
                condition,
                then_expr,
                else_expr,
            } => {
                let condition = self.evaluate_constant(condition, context)?;
                let then_value = self.evaluate_constant(then_expr, context)?;
                let else_value = self.evaluate_constant(else_expr, context)?;
                let kind = then_value.kind().common(else_value.kind());

                if condition.is_zero() {
                    else_value.convert(kind)
                } else {
                    then_value.convert(kind)
                }
            }
            ExpressionKind::SizeOfType(data_type) => {
                let data_type = self.resolve_type(data_type)?;
                Constant::Integer {
                    value: i128::from(size_of(&data_type)?),
                    kind: SIZE_T,
                }
            }
            ExpressionKind::SizeOfExpression(_) => {
                match self.process_expression(expr)?.into_scalar()? {
                    (_, ExpressionP::IntegerConstant { value, .. }) => Constant::Integer {
                        value,
                        kind: SIZE_T,
                    },
                    _ => return Err(not_constant()),
                }
            }
            _ => return Err(not_constant()),
        };

        Ok(constant)
    }
}
