use serde::Serialize;
use wasm_encoder::ValType;

use crate::parser::ast::{Expression, ExpressionKind};

/// Width in bytes of a pointer in linear memory
pub const POINTER_SIZE: u32 = 4;

pub const SIZE_T: PrimaryKind = PrimaryKind::UnsignedInt;
pub const PTRDIFF_T: PrimaryKind = PrimaryKind::SignedInt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PrimaryKind {
    SignedChar,
    UnsignedChar,
    SignedShort,
    UnsignedShort,
    SignedInt,
    UnsignedInt,
    SignedLong,
    UnsignedLong,
    Float,
    Double,
}

impl PrimaryKind {
    pub fn size(self) -> u32 {
        match self {
            PrimaryKind::SignedChar | PrimaryKind::UnsignedChar => 1,
            PrimaryKind::SignedShort | PrimaryKind::UnsignedShort => 2,
            PrimaryKind::SignedInt | PrimaryKind::UnsignedInt | PrimaryKind::Float => 4,
            PrimaryKind::SignedLong | PrimaryKind::UnsignedLong | PrimaryKind::Double => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimaryKind::Float | PrimaryKind::Double)
    }

    pub fn is_integral(self) -> bool {
        !self.is_float()
    }

    /// Floats count as signed
    pub fn is_signed(self) -> bool {
        !matches!(
            self,
            PrimaryKind::UnsignedChar
                | PrimaryKind::UnsignedShort
                | PrimaryKind::UnsignedInt
                | PrimaryKind::UnsignedLong
        )
    }

    pub fn wasm_type(self) -> WasmType {
        match self {
            PrimaryKind::SignedLong | PrimaryKind::UnsignedLong => WasmType::I64,
            PrimaryKind::Float => WasmType::F32,
            PrimaryKind::Double => WasmType::F64,
            _ => WasmType::I32,
        }
    }

    /// Integer conversion rank: char < short < int < long
    pub fn rank(self) -> u32 {
        match self {
            PrimaryKind::SignedChar | PrimaryKind::UnsignedChar => 1,
            PrimaryKind::SignedShort | PrimaryKind::UnsignedShort => 2,
            PrimaryKind::SignedInt | PrimaryKind::UnsignedInt => 3,
            PrimaryKind::SignedLong | PrimaryKind::UnsignedLong => 4,
            PrimaryKind::Float => 5,
            PrimaryKind::Double => 6,
        }
    }

    pub fn to_unsigned(self) -> PrimaryKind {
        match self {
            PrimaryKind::SignedChar => PrimaryKind::UnsignedChar,
            PrimaryKind::SignedShort => PrimaryKind::UnsignedShort,
            PrimaryKind::SignedInt => PrimaryKind::UnsignedInt,
            PrimaryKind::SignedLong => PrimaryKind::UnsignedLong,
            other => other,
        }
    }

    /// Smallest and largest representable integer value
    pub fn int_bounds(self) -> (i128, i128) {
        let bits = self.size() * 8;
        if self.is_signed() {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        }
    }

    /// Integer promotion, ranks below int become signed int
    pub fn promoted(self) -> PrimaryKind {
        if self.rank() < PrimaryKind::SignedInt.rank() {
            PrimaryKind::SignedInt
        } else {
            self
        }
    }

    /// Usual arithmetic conversion of two operand kinds.
    pub fn common(self, other: PrimaryKind) -> PrimaryKind {
        if self == PrimaryKind::Double || other == PrimaryKind::Double {
            return PrimaryKind::Double;
        }

        if self == PrimaryKind::Float || other == PrimaryKind::Float {
            return PrimaryKind::Float;
        }

        let (a, b) = (self.promoted(), other.promoted());

        if a == b {
            a
        } else if a.rank() == b.rank() {
            a.to_unsigned()
        } else if a.rank() > b.rank() {
            a
        } else {
            b
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimaryKind::SignedChar => "signed char",
            PrimaryKind::UnsignedChar => "unsigned char",
            PrimaryKind::SignedShort => "signed short",
            PrimaryKind::UnsignedShort => "unsigned short",
            PrimaryKind::SignedInt => "signed int",
            PrimaryKind::UnsignedInt => "unsigned int",
            PrimaryKind::SignedLong => "signed long",
            PrimaryKind::UnsignedLong => "unsigned long",
            PrimaryKind::Float => "float",
            PrimaryKind::Double => "double",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum WasmType {
    I32,
    I64,
    F32,
    F64,
}

impl WasmType {
    pub fn name(self) -> &'static str {
        match self {
            WasmType::I32 => "i32",
            WasmType::I64 => "i64",
            WasmType::F32 => "f32",
            WasmType::F64 => "f64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, WasmType::F32 | WasmType::F64)
    }

    pub fn size(self) -> u32 {
        match self {
            WasmType::I32 | WasmType::F32 => 4,
            WasmType::I64 | WasmType::F64 => 8,
        }
    }
}

impl From<WasmType> for ValType {
    fn from(value: WasmType) -> Self {
        match value {
            WasmType::I32 => ValType::I32,
            WasmType::I64 => ValType::I64,
            WasmType::F32 => ValType::F32,
            WasmType::F64 => ValType::F64,
        }
    }
}

/// Type of a single primitive cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarType {
    Primary(PrimaryKind),
    Pointer,
}

impl ScalarType {
    pub fn size(self) -> u32 {
        match self {
            ScalarType::Primary(kind) => kind.size(),
            ScalarType::Pointer => POINTER_SIZE,
        }
    }

    pub fn wasm_type(self) -> WasmType {
        match self {
            ScalarType::Primary(kind) => kind.wasm_type(),
            ScalarType::Pointer => WasmType::I32,
        }
    }

    /// Pointers compare and extend as unsigned values
    pub fn is_signed(self) -> bool {
        match self {
            ScalarType::Primary(kind) => kind.is_signed(),
            ScalarType::Pointer => false,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Primary(kind) if kind.is_float())
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Primary(kind) => kind.name(),
            ScalarType::Pointer => "pointer",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionType {
    pub params: Vec<DataType>,
    /// `None` for void
    pub return_type: Option<Box<DataType>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum DataType {
    Primary(PrimaryKind),
    /// `None` pointee is `void *`
    Pointer(Option<Box<DataType>>),
    Array {
        element: Box<DataType>,
        /// `None` until an initializer or a parameter position decides it
        count: Option<Box<Expression>>,
    },
    Function(FunctionType),
    Struct(String),
    Typedef(String),
}

impl DataType {
    pub fn pointer_to(pointee: DataType) -> DataType {
        DataType::Pointer(Some(Box::new(pointee)))
    }

    pub fn void_pointer() -> DataType {
        DataType::Pointer(None)
    }

    pub fn array_of(element: DataType, count: u32) -> DataType {
        DataType::Array {
            element: Box::new(element),
            count: Some(Box::new(Expression::integer(
                u128::from(count),
                Default::default(),
            ))),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, DataType::Pointer(_))
    }

    pub fn is_void_pointer(&self) -> bool {
        matches!(self, DataType::Pointer(None))
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(self, DataType::Primary(_))
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, DataType::Primary(kind) if kind.is_integral())
    }

    /// Scalar after array/function decay
    pub fn is_scalar(&self) -> bool {
        self.scalar_type().is_some()
    }

    /// Arrays and functions decay to pointers when used as values.
    pub fn decayed(&self) -> DataType {
        match self {
            DataType::Array { element, .. } => DataType::Pointer(Some(element.clone())),
            DataType::Function(_) => DataType::pointer_to(self.clone()),
            other => other.clone(),
        }
    }

    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            DataType::Primary(kind) => Some(ScalarType::Primary(*kind)),
            DataType::Pointer(_) | DataType::Array { .. } | DataType::Function(_) => {
                Some(ScalarType::Pointer)
            }
            DataType::Struct(_) | DataType::Typedef(_) => None,
        }
    }

    pub fn pointee(&self) -> Option<Option<&DataType>> {
        match self {
            DataType::Pointer(pointee) => Some(pointee.as_deref()),
            DataType::Array { element, .. } => Some(Some(element)),
            _ => None,
        }
    }

    /// Structural equality that ignores where array counts were written.
    pub fn same_as(&self, other: &DataType) -> bool {
        match (self, other) {
            (DataType::Primary(a), DataType::Primary(b)) => a == b,
            (DataType::Pointer(a), DataType::Pointer(b)) => match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_as(b),
                _ => false,
            },
            (
                DataType::Array {
                    element: a,
                    count: count_a,
                },
                DataType::Array {
                    element: b,
                    count: count_b,
                },
            ) => a.same_as(b) && literal_count(count_a) == literal_count(count_b),
            (DataType::Function(a), DataType::Function(b)) => a.same_as(b),
            (DataType::Struct(a), DataType::Struct(b)) => a == b,
            (DataType::Typedef(a), DataType::Typedef(b)) => a == b,
            _ => false,
        }
    }
}

impl FunctionType {
    pub fn same_params(&self, other: &FunctionType) -> bool {
        self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(&other.params)
                .all(|(a, b)| a.same_as(b))
    }

    pub fn same_return(&self, other: &FunctionType) -> bool {
        match (&self.return_type, &other.return_type) {
            (None, None) => true,
            (Some(a), Some(b)) => a.same_as(b),
            _ => false,
        }
    }

    pub fn same_as(&self, other: &FunctionType) -> bool {
        self.same_params(other) && self.same_return(other)
    }
}

fn literal_count(count: &Option<Box<Expression>>) -> Option<u128> {
    match count.as_deref().map(|c| &c.kind) {
        Some(ExpressionKind::IntegerConstant { value, .. }) => Some(*value),
        _ => None,
    }
}

/// Renders a type the way diagnostics spell it, e.g. `pointer to signed int`
pub fn stringify(data_type: &DataType) -> String {
    match data_type {
        DataType::Primary(kind) => kind.name().to_string(),
        DataType::Pointer(None) => "pointer to void".to_string(),
        DataType::Pointer(Some(pointee)) => format!("pointer to {}", stringify(pointee)),
        DataType::Array { element, count } => match literal_count(count) {
            Some(count) => format!("array with size {} of {}", count, stringify(element)),
            None => format!("array of {}", stringify(element)),
        },
        DataType::Function(function) => format!(
            "function ({}) returning {}",
            function
                .params
                .iter()
                .map(stringify)
                .collect::<Vec<String>>()
                .join(", "),
            function
                .return_type
                .as_deref()
                .map(stringify)
                .unwrap_or_else(|| "void".to_string())
        ),
        DataType::Struct(name) => format!("struct {}", name),
        DataType::Typedef(name) => name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringify_types() {
        let ty = DataType::pointer_to(DataType::array_of(
            DataType::Primary(PrimaryKind::SignedInt),
            3,
        ));
        assert_eq!(stringify(&ty), "pointer to array with size 3 of signed int");

        let func = DataType::Function(FunctionType {
            params: vec![DataType::Primary(PrimaryKind::SignedChar), DataType::void_pointer()],
            return_type: None,
        });
        assert_eq!(
            stringify(&func),
            "function (signed char, pointer to void) returning void"
        );
    }

    #[test]
    fn bounds() {
        assert_eq!(PrimaryKind::SignedChar.int_bounds(), (-128, 127));
        assert_eq!(PrimaryKind::UnsignedShort.int_bounds(), (0, 65535));
        assert_eq!(
            PrimaryKind::UnsignedLong.int_bounds(),
            (0, u64::MAX as i128)
        );
    }

    #[test]
    fn arithmetic_conversions() {
        use PrimaryKind::*;

        assert_eq!(SignedChar.promoted(), SignedInt);
        assert_eq!(UnsignedShort.promoted(), SignedInt);
        assert_eq!(UnsignedInt.promoted(), UnsignedInt);

        assert_eq!(SignedChar.common(SignedShort), SignedInt);
        assert_eq!(SignedInt.common(UnsignedInt), UnsignedInt);
        assert_eq!(UnsignedInt.common(SignedLong), SignedLong);
        assert_eq!(SignedLong.common(UnsignedLong), UnsignedLong);
        assert_eq!(UnsignedLong.common(Float), Float);
        assert_eq!(Float.common(Double), Double);
    }

    #[test]
    fn decay() {
        let array = DataType::array_of(DataType::Primary(PrimaryKind::Double), 4);
        assert!(array
            .decayed()
            .same_as(&DataType::pointer_to(DataType::Primary(PrimaryKind::Double))));
        assert_eq!(array.scalar_type(), Some(ScalarType::Pointer));
        assert_eq!(DataType::Struct("s".into()).scalar_type(), None);
    }
}
