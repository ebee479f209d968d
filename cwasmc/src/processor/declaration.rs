use super::{
    ast::{Address, StatementP},
    constant::Constant,
    expression::zero,
    processor::Processor,
    symbol_table::{Storage, SymbolEntry},
};
use crate::{
    errors::errors::{ProcResult, ProcessingError},
    parser::ast::{
        Declaration, EnumDeclaration, Expression, ExpressionKind, Initializer, StorageClass,
        TagDeclaration,
    },
    types::{
        layout::{array_count, num_primitive_cells, unpack},
        types::{stringify, DataType, FunctionType, PrimaryKind, ScalarType},
    },
};

/// What a single primitive cell of a declared object starts out as.
#[derive(Debug)]
enum CellInit<'a> {
    Expr(&'a Expression),
    Zero,
    /// Character of a string literal initializing a char array
    Byte(u8),
}

fn is_scalar_object(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Primary(_) | DataType::Pointer(_))
}

fn is_char_array(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Array { element, .. } if matches!(
            element.as_ref(),
            DataType::Primary(PrimaryKind::SignedChar | PrimaryKind::UnsignedChar)
        )
    )
}

fn string_literal(initializer: &Initializer) -> Option<&[u8]> {
    match initializer {
        Initializer::Single(Expression {
            kind: ExpressionKind::StringLiteral(bytes),
            ..
        }) => Some(bytes.as_slice()),
        _ => None,
    }
}

/// Flattens `initializer` into one entry per primitive cell of `data_type`.
fn flatten_initializer<'a>(data_type: &DataType, initializer: &'a Initializer) -> ProcResult<Vec<CellInit<'a>>> {
    let mut cells = vec![];

    if let (true, Some(bytes)) = (is_char_array(data_type), string_literal(initializer)) {
        string_cells(data_type, bytes, &mut cells)?;
        return Ok(cells);
    }

    match (data_type, initializer) {
        (DataType::Function(_), _) => {
            return Err(ProcessingError::new(
                "A function cannot be initialized like a variable",
            ))
        }
        (_, Initializer::Single(expr)) if is_scalar_object(data_type) => {
            cells.push(CellInit::Expr(expr))
        }
        (_, Initializer::List { items, .. }) if is_scalar_object(data_type) => {
            if items.len() > 1 {
                return Err(ProcessingError::new("Excess elements in scalar intializer"));
            }

            walk(data_type, items, 0, &mut cells)?;
        }
        (DataType::Array { .. }, Initializer::List { items, .. }) => {
            let consumed = walk(data_type, items, 0, &mut cells)?;

            if consumed < items.len() {
                return Err(ProcessingError::new("Excess elements in array initializer"));
            }
        }
        (DataType::Array { .. }, Initializer::Single(_)) => {
            return Err(ProcessingError::new("Invalid initializer for aggregate type"))
        }
        (other, _) => return Err(ProcessingError::unsupported(stringify(other))),
    }

    Ok(cells)
}

/// Consumes items of one brace level starting at `index` until `data_type`
/// is filled, returning the index of the first unused item. Missing items
/// become zero cells.
fn walk<'a>(
    data_type: &DataType,
    items: &'a [Initializer],
    mut index: usize,
    cells: &mut Vec<CellInit<'a>>,
) -> ProcResult<usize> {
    match data_type {
        DataType::Primary(_) | DataType::Pointer(_) => {
            let Some(mut item) = items.get(index) else {
                cells.push(CellInit::Zero);
                return Ok(index);
            };

            // braces around a scalar are dropped
            loop {
                match item {
                    Initializer::Single(expr) => {
                        cells.push(CellInit::Expr(expr));
                        break;
                    }
                    Initializer::List { items: inner, .. } => match inner.first() {
                        Some(first) => item = first,
                        None => {
                            cells.push(CellInit::Zero);
                            break;
                        }
                    },
                }
            }

            Ok(index + 1)
        }
        DataType::Array { element, count } => {
            let count = array_count(count.as_deref())?;

            for _ in 0..count {
                if is_scalar_object(element) {
                    index = walk(element, items, index, cells)?;
                    continue;
                }

                match items.get(index) {
                    Some(item @ Initializer::List { .. }) => {
                        cells.extend(flatten_initializer(element, item)?);
                        index += 1;
                    }
                    Some(item) if is_char_array(element) && string_literal(item).is_some() => {
                        cells.extend(flatten_initializer(element, item)?);
                        index += 1;
                    }
                    _ => index = walk(element, items, index, cells)?,
                }
            }

            Ok(index)
        }
        other => Err(ProcessingError::unsupported(stringify(other))),
    }
}

fn string_cells(data_type: &DataType, bytes: &[u8], cells: &mut Vec<CellInit>) -> ProcResult<()> {
    let DataType::Array { count, .. } = data_type else {
        return Err(ProcessingError::new("Invalid initializer for aggregate type"));
    };

    let count = array_count(count.as_deref())? as usize;

    if bytes.len() > count {
        return Err(ProcessingError::new("initializer-string for array of chars is too long"));
    }

    for i in 0..count {
        cells.push(CellInit::Byte(bytes.get(i).copied().unwrap_or(0)));
    }

    Ok(())
}

/// Number of elements an unsized array gets from its initializer.
fn inferred_count(element: &DataType, initializer: &Initializer) -> ProcResult<u32> {
    match initializer {
        Initializer::Single(Expression {
            kind: ExpressionKind::StringLiteral(bytes),
            ..
        }) if matches!(element, DataType::Primary(PrimaryKind::SignedChar | PrimaryKind::UnsignedChar)) => {
            Ok(bytes.len() as u32 + 1)
        }
        Initializer::Single(_) => Err(ProcessingError::new("Invalid initializer for aggregate type")),
        Initializer::List { items, .. } if is_scalar_object(element) => Ok(items.len() as u32),
        Initializer::List { items, .. } => {
            // elided braces take as many items as the element has cells
            let per_element = num_primitive_cells(element)? as usize;
            let (mut index, mut count) = (0, 0);

            while index < items.len() {
                let braced = matches!(items[index], Initializer::List { .. })
                    || (is_char_array(element) && string_literal(&items[index]).is_some());

                index += if braced { 1 } else { per_element.max(1) };
                count += 1;
            }

            Ok(count)
        }
    }
}

impl Processor {
    /// Copy of `data_type` with every array count folded to a literal.
    pub(super) fn resolve_type(&mut self, data_type: &DataType) -> ProcResult<DataType> {
        match data_type {
            DataType::Primary(_) | DataType::Pointer(None) => Ok(data_type.clone()),
            DataType::Pointer(Some(pointee)) => Ok(DataType::pointer_to(self.resolve_type(pointee)?)),
            DataType::Array { element, count } => {
                let element = self.resolve_type(element)?;

                if matches!(element, DataType::Function(_)) {
                    return Err(ProcessingError::new("declaration of array of functions"));
                }

                let count = match count.as_deref() {
                    Some(count) => {
                        let value = self
                            .evaluate_constant(count, "array size must be compile-time constant")?;

                        let Constant::Integer { value, .. } = value else {
                            return Err(ProcessingError::new("size of array has non-integer type")
                                .with_position(count.position));
                        };

                        if value <= 0 {
                            return Err(ProcessingError::new("size of array must be greater than zero")
                                .with_position(count.position));
                        }

                        Some(Box::new(Expression::integer(value as u128, count.position)))
                    }
                    None => None,
                };

                Ok(DataType::Array {
                    element: Box::new(element),
                    count,
                })
            }
            DataType::Function(function_type) => {
                Ok(DataType::Function(self.resolve_function_type(function_type)?))
            }
            DataType::Struct(name) => Err(ProcessingError::unsupported(format!("struct {}", name))),
            DataType::Typedef(name) => Err(ProcessingError::unsupported(format!("typedef {}", name))),
        }
    }

    /// Parameters of array or function type decay to pointers.
    pub(super) fn resolve_function_type(&mut self, function_type: &FunctionType) -> ProcResult<FunctionType> {
        let params = function_type
            .params
            .iter()
            .map(|param| Ok(self.resolve_type(param)?.decayed()))
            .collect::<ProcResult<Vec<_>>>()?;

        let return_type = match function_type.return_type.as_deref() {
            Some(return_type) => Some(Box::new(self.resolve_type(return_type)?)),
            None => None,
        };

        Ok(FunctionType {
            params,
            return_type,
        })
    }

    /// Gives an unsized array the length its initializer implies.
    fn complete_array(
        &self,
        declaration: &Declaration,
        data_type: DataType,
    ) -> ProcResult<DataType> {
        let DataType::Array {
            element,
            count: None,
        } = data_type
        else {
            return Ok(data_type);
        };

        let Some(initializer) = &declaration.initializer else {
            return Err(ProcessingError::new(format!(
                "array size missing in '{}'",
                declaration.name
            )));
        };

        let count = inferred_count(&element, initializer)?;
        if count == 0 {
            return Err(ProcessingError::new("zero or negative size array"));
        }

        Ok(DataType::Array {
            element,
            count: Some(Box::new(Expression::integer(
                u128::from(count),
                initializer.position(),
            ))),
        })
    }

    pub(super) fn process_global_declaration(&mut self, declaration: &Declaration) -> ProcResult<()> {
        self.process_static_declaration(declaration)
            .map_err(|e| e.with_position(declaration.position))
    }

    /// Declaration at file scope or with `static` storage: lives in the data
    /// segment and starts out as a constant byte image.
    fn process_static_declaration(&mut self, declaration: &Declaration) -> ProcResult<()> {
        let data_type = self.resolve_type(&declaration.data_type)?;

        if let DataType::Function(function_type) = &data_type {
            if declaration.initializer.is_some() {
                return Err(ProcessingError::new(
                    "A function cannot be initialized like a variable",
                ));
            }

            self.symbol_table.add_function(&declaration.name, function_type)?;
            return Ok(());
        }

        let data_type = self.complete_array(declaration, data_type)?;

        let entry = self
            .symbol_table
            .add_variable(&declaration.name, data_type.clone(), Storage::DataSegment)?;

        let Some(initializer) = &declaration.initializer else {
            return Ok(());
        };

        let inits = flatten_initializer(&data_type, initializer)?;

        for (cell, init) in unpack(&data_type)?.into_iter().zip(inits) {
            let bytes = match init {
                CellInit::Expr(expr) => self
                    .constant_cell(expr, cell.data_type)
                    .map_err(|e| e.with_position(expr.position))?,
                CellInit::Zero => vec![0; cell.data_type.size() as usize],
                CellInit::Byte(byte) => vec![byte],
            };

            self.write_data(entry.offset + cell.offset, &bytes);
        }

        Ok(())
    }

    pub(super) fn process_local_declaration(&mut self, declaration: &Declaration) -> ProcResult<Vec<StatementP>> {
        self.process_local(declaration)
            .map_err(|e| e.with_position(declaration.position))
    }

    fn process_local(&mut self, declaration: &Declaration) -> ProcResult<Vec<StatementP>> {
        match declaration.storage_class {
            StorageClass::Extern => {
                return Err(ProcessingError::unsupported("extern declaration inside a function"))
            }
            StorageClass::Static => {
                self.process_static_declaration(declaration)?;
                return Ok(vec![]);
            }
            StorageClass::Auto => {}
        }

        let data_type = self.resolve_type(&declaration.data_type)?;

        if let DataType::Function(function_type) = &data_type {
            if declaration.initializer.is_some() {
                return Err(ProcessingError::new(
                    "A function cannot be initialized like a variable",
                ));
            }

            self.symbol_table.add_function(&declaration.name, function_type)?;
            return Ok(vec![]);
        }

        let data_type = self.complete_array(declaration, data_type)?;
        let entry = self
            .symbol_table
            .add_variable(&declaration.name, data_type.clone(), Storage::Local)?;

        let Some(initializer) = &declaration.initializer else {
            return Ok(vec![]);
        };

        let inits = flatten_initializer(&data_type, initializer)?;
        let mut statements = vec![];

        for (cell, init) in unpack(&data_type)?.into_iter().zip(inits) {
            let value = match init {
                CellInit::Expr(expr) => {
                    let operand = self.process_operand(expr)?;
                    self.coerce(operand, cell.data_type, "initialization", expr.position)?
                }
                CellInit::Zero => zero(cell.data_type),
                CellInit::Byte(byte) => Constant::Integer {
                    value: i128::from(byte),
                    kind: PrimaryKind::UnsignedChar,
                }
                .convert(match cell.data_type {
                    ScalarType::Primary(kind) => kind,
                    ScalarType::Pointer => PrimaryKind::UnsignedInt,
                })
                .to_expression(),
            };

            statements.push(StatementP::Store {
                address: Address::Local {
                    offset: entry.offset + cell.offset,
                },
                value,
                data_type: cell.data_type,
            });
        }

        Ok(statements)
    }

    /// Byte image of one cell of a statically initialized object.
    fn constant_cell(&mut self, expr: &Expression, target: ScalarType) -> ProcResult<Vec<u8>> {
        if let Some(address) = self.address_constant(expr)? {
            if target != ScalarType::Pointer {
                if target.is_float() {
                    return Err(ProcessingError::new(
                        "Initializer element is not compile-time constant",
                    ));
                }

                self.warn("initialization makes integer from pointer without a cast", expr.position);
            }

            return Ok(Constant::Integer {
                value: i128::from(address),
                kind: PrimaryKind::UnsignedInt,
            }
            .to_bytes(target));
        }

        let constant = self.evaluate_constant(expr, "Initializer element is not compile-time constant")?;

        if target == ScalarType::Pointer {
            match constant {
                Constant::Float { .. } => {
                    return Err(ProcessingError::new(
                        "incompatible types in initialization: cannot convert floating constant to pointer",
                    ))
                }
                Constant::Integer { value, .. } if value != 0 => {
                    self.warn(
                        "initialization makes pointer from integer without a cast",
                        expr.position,
                    );
                }
                _ => {}
            }
        }

        Ok(constant.to_bytes(target))
    }

    /// Value of an address known before the program runs: string literals,
    /// addresses of data segment objects and function designators.
    fn address_constant(&mut self, expr: &Expression) -> ProcResult<Option<u32>> {
        let name = match &expr.kind {
            ExpressionKind::StringLiteral(bytes) => return Ok(Some(self.add_string(bytes))),
            ExpressionKind::AddressOf(operand) => match &operand.kind {
                ExpressionKind::Identifier(name) => name,
                _ => return Ok(None),
            },
            ExpressionKind::Identifier(name) => name,
            _ => return Ok(None),
        };

        let taking_address = matches!(expr.kind, ExpressionKind::AddressOf(_));

        match self.symbol_table.lookup(name)?.clone() {
            SymbolEntry::Variable(entry) if entry.storage == Storage::DataSegment => {
                if taking_address || matches!(entry.data_type, DataType::Array { .. }) {
                    Ok(Some(entry.offset))
                } else {
                    Ok(None)
                }
            }
            SymbolEntry::Function(entry) if entry.builtin.is_none() => {
                Ok(Some(self.function_table_index(name, expr.position)))
            }
            _ => Ok(None),
        }
    }

    pub(super) fn process_enum(&mut self, declaration: &EnumDeclaration) -> ProcResult<()> {
        let mut next = 0;

        for enumerator in &declaration.enumerators {
            let value = match &enumerator.value {
                Some(expr) => {
                    let context = format!(
                        "enumerator value for '{}' is not an integer constant",
                        enumerator.name
                    );

                    match self.evaluate_constant(expr, &context)? {
                        Constant::Integer { value, .. } => value,
                        Constant::Float { .. } => {
                            return Err(ProcessingError::new(context).with_position(expr.position))
                        }
                    }
                }
                None => next,
            };

            self.symbol_table
                .add_enum_constant(&enumerator.name, value)
                .map_err(|e| e.with_position(enumerator.position))?;
            next = value + 1;
        }

        Ok(())
    }

    pub(super) fn unsupported_tag(declaration: &TagDeclaration) -> ProcessingError {
        ProcessingError::unsupported(stringify(&declaration.data_type)).with_position(declaration.position)
    }
}
