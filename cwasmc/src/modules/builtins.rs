//! Host functions imported from the `source_stdlib` module.

use serde::Serialize;

use crate::types::types::{DataType, FunctionType, PrimaryKind, WasmType};

pub const MODULE_NAME: &str = "source_stdlib";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Builtin {
    PrintInt,
    PrintIntUnsigned,
    PrintChar,
    PrintLong,
    PrintLongUnsigned,
    PrintFloat,
    PrintDouble,
    PrintAddress,
    PrintString,
    Malloc,
    Free,
}

impl Builtin {
    pub const ALL: [Builtin; 11] = [
        Builtin::PrintInt,
        Builtin::PrintIntUnsigned,
        Builtin::PrintChar,
        Builtin::PrintLong,
        Builtin::PrintLongUnsigned,
        Builtin::PrintFloat,
        Builtin::PrintDouble,
        Builtin::PrintAddress,
        Builtin::PrintString,
        Builtin::Malloc,
        Builtin::Free,
    ];

    /// Import name, also the C identifier it is declared under
    pub fn name(self) -> &'static str {
        match self {
            Builtin::PrintInt => "print_int",
            Builtin::PrintIntUnsigned => "print_int_unsigned",
            Builtin::PrintChar => "print_char",
            Builtin::PrintLong => "print_long",
            Builtin::PrintLongUnsigned => "print_long_unsigned",
            Builtin::PrintFloat => "print_float",
            Builtin::PrintDouble => "print_double",
            Builtin::PrintAddress => "print_address",
            Builtin::PrintString => "print_string",
            Builtin::Malloc => "malloc",
            Builtin::Free => "free",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        Builtin::ALL
            .into_iter()
            .find(|builtin| builtin.name() == name)
    }

    /// C signature the builtin is pre-declared with
    pub fn function_type(self) -> FunctionType {
        let primary = |kind| DataType::Primary(kind);
        let char_pointer = DataType::pointer_to(primary(PrimaryKind::SignedChar));

        let (params, return_type) = match self {
            Builtin::PrintInt => (vec![primary(PrimaryKind::SignedInt)], None),
            Builtin::PrintIntUnsigned => (vec![primary(PrimaryKind::UnsignedInt)], None),
            Builtin::PrintChar => (vec![primary(PrimaryKind::SignedChar)], None),
            Builtin::PrintLong => (vec![primary(PrimaryKind::SignedLong)], None),
            Builtin::PrintLongUnsigned => (vec![primary(PrimaryKind::UnsignedLong)], None),
            Builtin::PrintFloat => (vec![primary(PrimaryKind::Float)], None),
            Builtin::PrintDouble => (vec![primary(PrimaryKind::Double)], None),
            Builtin::PrintAddress => (vec![DataType::void_pointer()], None),
            Builtin::PrintString => (vec![char_pointer], None),
            Builtin::Malloc => (
                vec![primary(PrimaryKind::UnsignedInt)],
                Some(Box::new(DataType::void_pointer())),
            ),
            Builtin::Free => (vec![DataType::void_pointer()], None),
        };

        FunctionType {
            params,
            return_type,
        }
    }

    /// Parameter types of the host function itself
    pub fn wasm_params(self) -> &'static [WasmType] {
        match self {
            Builtin::PrintInt
            | Builtin::PrintIntUnsigned
            | Builtin::PrintChar
            | Builtin::PrintAddress
            | Builtin::PrintString
            | Builtin::Malloc
            | Builtin::Free => &[WasmType::I32],
            Builtin::PrintLong | Builtin::PrintLongUnsigned => &[WasmType::I64],
            Builtin::PrintFloat => &[WasmType::F32],
            Builtin::PrintDouble => &[WasmType::F64],
        }
    }

    pub fn wasm_result(self) -> Option<WasmType> {
        match self {
            Builtin::Malloc => Some(WasmType::I32),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::from_name(builtin.name()), Some(builtin));
        }

        assert_eq!(Builtin::from_name("printf"), None);
    }

    #[test]
    fn malloc_signature() {
        let function_type = Builtin::Malloc.function_type();

        assert_eq!(
            function_type.params,
            vec![DataType::Primary(PrimaryKind::UnsignedInt)]
        );
        assert!(function_type
            .return_type
            .is_some_and(|ty| ty.is_void_pointer()));
        assert_eq!(Builtin::Malloc.wasm_result(), Some(WasmType::I32));
    }
}
