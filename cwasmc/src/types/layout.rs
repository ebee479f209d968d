//! Byte sizes and primitive-cell decomposition of data types.

use serde::Serialize;

use super::types::{DataType, ScalarType, POINTER_SIZE};
use crate::{
    errors::errors::{ProcResult, ProcessingError},
    parser::ast::{BinaryOperator, Expression, ExpressionKind, PrefixOperator},
};

/// One scalar storage unit of an unpacked data type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PrimitiveCell {
    pub data_type: ScalarType,
    pub offset: u32,
}

pub fn size_of(data_type: &DataType) -> ProcResult<u32> {
    match data_type {
        DataType::Primary(kind) => Ok(kind.size()),
        DataType::Pointer(_) => Ok(POINTER_SIZE),
        DataType::Array { element, count } => {
            let count = array_count(count.as_deref())?;
            let element_size = size_of(element)?;

            element_size
                .checked_mul(count)
                .ok_or_else(|| ProcessingError::new("size of array is too large"))
        }
        DataType::Function(_) => Err(ProcessingError::new(
            "invalid application of 'sizeof' to a function type",
        )),
        DataType::Struct(name) => Err(ProcessingError::unsupported(format!("struct {}", name))),
        DataType::Typedef(name) => Err(ProcessingError::unsupported(format!("typedef {}", name))),
    }
}

/// Depth-first decomposition into primitive cells, lowest offset first.
pub fn unpack(data_type: &DataType) -> ProcResult<Vec<PrimitiveCell>> {
    let mut cells = vec![];
    unpack_into(data_type, 0, &mut cells)?;

    Ok(cells)
}

fn unpack_into(data_type: &DataType, base: u32, cells: &mut Vec<PrimitiveCell>) -> ProcResult<()> {
    match data_type {
        DataType::Primary(_) | DataType::Pointer(_) => {
            // scalar_type is total for these two
            if let Some(scalar) = data_type.scalar_type() {
                cells.push(PrimitiveCell {
                    data_type: scalar,
                    offset: base,
                });
            }
        }
        DataType::Array { element, count } => {
            let count = array_count(count.as_deref())?;
            let element_size = size_of(element)?;

            for i in 0..count {
                unpack_into(element, base + i * element_size, cells)?;
            }
        }
        DataType::Function(_) => {
            return Err(ProcessingError::new("function type cannot be unpacked into memory"))
        }
        DataType::Struct(name) => {
            return Err(ProcessingError::unsupported(format!("struct {}", name)))
        }
        DataType::Typedef(name) => {
            return Err(ProcessingError::unsupported(format!("typedef {}", name)))
        }
    }

    Ok(())
}

pub fn num_primitive_cells(data_type: &DataType) -> ProcResult<u32> {
    match data_type {
        DataType::Primary(_) | DataType::Pointer(_) => Ok(1),
        DataType::Array { element, count } => {
            Ok(num_primitive_cells(element)? * array_count(count.as_deref())?)
        }
        _ => Ok(unpack(data_type)?.len() as u32),
    }
}

/// Element count of an array type.
pub fn array_count(count: Option<&Expression>) -> ProcResult<u32> {
    let Some(count) = count else {
        return Err(ProcessingError::new("array size missing"));
    };

    let value = fold_count(count).map_err(|e| e.with_position(count.position))?;

    if value <= 0 {
        return Err(ProcessingError::new("size of array must be greater than zero")
            .with_position(count.position));
    }

    u32::try_from(value)
        .map_err(|_| ProcessingError::new("size of array is too large").with_position(count.position))
}

// Only literal arithmetic is folded here, identifiers are resolved by the processor
// before a type reaches the layout engine.
fn fold_count(expr: &Expression) -> ProcResult<i128> {
    let not_constant = || ProcessingError::new("array size must be compile-time constant");

    match &expr.kind {
        ExpressionKind::IntegerConstant { value, .. } => {
            i128::try_from(*value).map_err(|_| not_constant())
        }
        ExpressionKind::Prefix { operator, operand } => {
            let value = fold_count(operand)?;
            match operator {
                PrefixOperator::Plus => Ok(value),
                PrefixOperator::Minus => Ok(-value),
                PrefixOperator::BitwiseNot => Ok(!value),
                PrefixOperator::LogicalNot => Ok((value == 0) as i128),
                _ => Err(not_constant()),
            }
        }
        ExpressionKind::Binary {
            operator,
            left,
            right,
        } => {
            let left = fold_count(left)?;
            let right = fold_count(right)?;

            let value = match operator {
                BinaryOperator::Add => left.checked_add(right),
                BinaryOperator::Subtract => left.checked_sub(right),
                BinaryOperator::Multiply => left.checked_mul(right),
                BinaryOperator::Divide => left.checked_div(right),
                BinaryOperator::Remainder => left.checked_rem(right),
                BinaryOperator::ShiftLeft => u32::try_from(right)
                    .ok()
                    .filter(|shift| *shift < 64)
                    .map(|shift| left << shift),
                BinaryOperator::ShiftRight => u32::try_from(right)
                    .ok()
                    .filter(|shift| *shift < 64)
                    .map(|shift| left >> shift),
                _ => None,
            };

            value.ok_or_else(not_constant)
        }
        ExpressionKind::SizeOfType(data_type) => Ok(i128::from(size_of(data_type)?)),
        _ => Err(not_constant()),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::types::types::PrimaryKind;

    fn int() -> DataType {
        DataType::Primary(PrimaryKind::SignedInt)
    }

    #[test]
    fn sizes() {
        assert_eq!(size_of(&int()).unwrap(), 4);
        assert_eq!(size_of(&DataType::void_pointer()).unwrap(), 4);
        assert_eq!(
            size_of(&DataType::array_of(DataType::Primary(PrimaryKind::Double), 3)).unwrap(),
            24
        );
        assert_eq!(
            size_of(&DataType::array_of(DataType::array_of(int(), 2), 5)).unwrap(),
            40
        );
    }

    #[test]
    fn struct_is_unsupported() {
        let err = size_of(&DataType::Struct("point".into())).unwrap_err();
        assert!(err.is_unsupported());

        let err = unpack(&DataType::Typedef("myint".into())).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn non_constant_count() {
        let array = DataType::Array {
            element: Box::new(int()),
            count: Some(Box::new(Expression::new(
                ExpressionKind::Identifier("n".into()),
                Default::default(),
            ))),
        };

        let err = size_of(&array).unwrap_err();
        assert_eq!(err.message, "array size must be compile-time constant");
    }

    #[test]
    fn unpack_array_of_pointers() {
        let array = DataType::array_of(DataType::pointer_to(int()), 3);
        let cells = unpack(&array).unwrap();

        assert_eq!(
            cells,
            vec![
                PrimitiveCell {
                    data_type: ScalarType::Pointer,
                    offset: 0
                },
                PrimitiveCell {
                    data_type: ScalarType::Pointer,
                    offset: 4
                },
                PrimitiveCell {
                    data_type: ScalarType::Pointer,
                    offset: 8
                },
            ]
        );
        assert_eq!(num_primitive_cells(&array).unwrap(), 3);
    }

    fn primary_kind() -> impl Strategy<Value = PrimaryKind> {
        prop_oneof![
            Just(PrimaryKind::SignedChar),
            Just(PrimaryKind::UnsignedChar),
            Just(PrimaryKind::SignedShort),
            Just(PrimaryKind::UnsignedShort),
            Just(PrimaryKind::SignedInt),
            Just(PrimaryKind::UnsignedInt),
            Just(PrimaryKind::SignedLong),
            Just(PrimaryKind::UnsignedLong),
            Just(PrimaryKind::Float),
            Just(PrimaryKind::Double),
        ]
    }

    fn data_type() -> impl Strategy<Value = DataType> {
        let leaf = prop_oneof![
            primary_kind().prop_map(DataType::Primary),
            Just(DataType::void_pointer()),
        ];

        leaf.prop_recursive(4, 32, 4, |inner| {
            prop_oneof![
                inner.clone().prop_map(DataType::pointer_to),
                (inner, 1u32..5).prop_map(|(element, count)| DataType::array_of(element, count)),
            ]
        })
    }

    proptest! {
        #[test]
        fn cells_cover_the_whole_type(ty in data_type()) {
            let cells = unpack(&ty).unwrap();
            let total: u32 = cells.iter().map(|cell| cell.data_type.size()).sum();

            prop_assert!(!cells.is_empty());
            prop_assert_eq!(total, size_of(&ty).unwrap());
            prop_assert_eq!(cells.len() as u32, num_primitive_cells(&ty).unwrap());

            for pair in cells.windows(2) {
                prop_assert_eq!(pair[1].offset, pair[0].offset + pair[0].data_type.size());
            }
        }
    }
}
