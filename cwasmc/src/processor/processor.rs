use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::{
    ast::{Address, ExpressionP, ProcessedFunction, ProcessedProgram, StatementP, ReturnMode},
    symbol_table::{ScopeKind, Storage, SymbolTable},
};
use crate::{
    errors::errors::{ProcResult, ProcessingError, Warning},
    modules::builtins::Builtin,
    parser::ast::{ExternalDeclaration, FunctionDefinition, Position, Program},
    types::types::{DataType, PrimaryKind, ScalarType, POINTER_SIZE},
};

/// Walks the C AST once, resolving every name and lowering every operation
/// to loads and stores of primitive cells.
pub struct Processor {
    pub(super) symbol_table: SymbolTable,
    pub(super) data_segment: Vec<u8>,
    /// Functions whose address is taken, in table order
    function_table: Vec<String>,
    /// First reference of every function called or taken the address of
    referenced_functions: BTreeMap<String, Position>,
    pub(super) used_builtins: BTreeSet<Builtin>,
    pub(super) warnings: Vec<Warning>,
    /// Return type of the function being processed, `None` for void
    pub(super) return_type: Option<DataType>,
    pub(super) loop_depth: u32,
    /// Loops and switches a `break` can leave
    pub(super) breakable_depth: u32,
}

pub fn process(program: &Program) -> ProcResult<ProcessedProgram> {
    Processor::new()?.process_program(program)
}

impl Processor {
    pub fn new() -> ProcResult<Self> {
        Ok(Self {
            symbol_table: SymbolTable::new()?,
            data_segment: vec![],
            function_table: vec![],
            referenced_functions: BTreeMap::new(),
            used_builtins: BTreeSet::new(),
            warnings: vec![],
            return_type: None,
            loop_depth: 0,
            breakable_depth: 0,
        })
    }

    pub fn process_program(mut self, program: &Program) -> ProcResult<ProcessedProgram> {
        let mut functions: Vec<ProcessedFunction> = vec![];

        for child in &program.children {
            match child {
                ExternalDeclaration::Declaration(declaration) => {
                    self.process_global_declaration(declaration)?
                }
                ExternalDeclaration::Enum(declaration) => self.process_enum(declaration)?,
                ExternalDeclaration::Tag(declaration) => {
                    return Err(Self::unsupported_tag(declaration))
                }
                ExternalDeclaration::Function(definition) => {
                    if functions.iter().any(|f| f.name == definition.name) {
                        return Err(ProcessingError::new(format!(
                            "redefinition of '{}'",
                            definition.name
                        ))
                        .with_position(definition.position));
                    }

                    let function = self
                        .process_function(definition)
                        .map_err(|e| e.with_position(definition.position))?;
                    functions.push(function);
                }
            }
        }

        if !functions.iter().any(|f| f.name == "main") {
            return Err(ProcessingError::new("undefined reference to 'main'"));
        }

        for (name, position) in &self.referenced_functions {
            if !functions.iter().any(|f| &f.name == name) {
                return Err(ProcessingError::new(format!("undefined reference to '{}'", name))
                    .with_position(*position));
            }
        }

        // callers of a function pointer read the callee's frame size here
        let frame_table_offset = self
            .symbol_table
            .reserve_data(POINTER_SIZE * self.function_table.len() as u32);

        for (i, name) in self.function_table.iter().enumerate() {
            let frame_size = functions
                .iter()
                .find(|f| &f.name == name)
                .map(|f| f.frame_size)
                .unwrap_or(0);

            let offset = frame_table_offset + i as u32 * POINTER_SIZE;
            write_bytes(&mut self.data_segment, offset, &frame_size.to_le_bytes());
        }

        let size = self.symbol_table.data_segment_size() as usize;
        self.data_segment.resize(size, 0);

        debug!(
            functions = functions.len(),
            data_segment = size,
            function_table = self.function_table.len(),
            "processed program"
        );

        Ok(ProcessedProgram {
            functions,
            data_segment: self.data_segment,
            function_table: self.function_table,
            frame_table_offset,
            imported_functions: self.used_builtins.into_iter().collect(),
            warnings: self.warnings,
        })
    }

    fn process_function(&mut self, definition: &FunctionDefinition) -> ProcResult<ProcessedFunction> {
        let function_type = self.resolve_function_type(&definition.function_type)?;
        let entry = self
            .symbol_table
            .define_function(&definition.name, &function_type)?;

        self.symbol_table.enter_scope(ScopeKind::Function);

        for (name, data_type) in definition.param_names.iter().zip(&function_type.params) {
            self.symbol_table
                .add_variable(name, data_type.clone(), Storage::Local)?;
        }

        self.return_type = function_type.return_type.as_deref().cloned();

        // parameters and the outermost block share one scope
        let mut body = self.process_block_items(&definition.body.items)?;

        if definition.name == "main" {
            if let Some(DataType::Primary(kind)) = &self.return_type {
                // falling off the end of main returns 0
                body.push(StatementP::Store {
                    address: Address::ReturnObject {
                        offset: 0,
                        mode: ReturnMode::Store,
                    },
                    value: ExpressionP::integer(0, *kind),
                    data_type: ScalarType::Primary(*kind),
                });
                body.push(StatementP::Return);
            }
        }

        let frame_size = self.symbol_table.frame_size();
        self.symbol_table.exit_scope();
        self.return_type = None;

        debug!(name = %definition.name, frame_size, "processed function");

        Ok(ProcessedFunction {
            name: definition.name.clone(),
            layout: entry.layout,
            frame_size,
            body,
        })
    }

    /// Table index of `name`, adding it on first use.
    pub(super) fn function_table_index(&mut self, name: &str, position: Position) -> u32 {
        self.reference_function(name, position);

        match self.function_table.iter().position(|f| f == name) {
            Some(index) => index as u32,
            None => {
                self.function_table.push(name.to_string());
                self.function_table.len() as u32 - 1
            }
        }
    }

    pub(super) fn reference_function(&mut self, name: &str, position: Position) {
        self.referenced_functions
            .entry(name.to_string())
            .or_insert(position);
    }

    /// Copies `bytes` into the data segment at `offset`.
    pub(super) fn write_data(&mut self, offset: u32, bytes: &[u8]) {
        write_bytes(&mut self.data_segment, offset, bytes);
    }

    /// Appends a NUL terminated string literal to the data segment.
    pub(super) fn add_string(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.symbol_table.reserve_data(bytes.len() as u32 + 1);
        let mut image = bytes.to_vec();
        image.push(0);
        self.write_data(offset, &image);

        offset
    }

    pub(super) fn warn(&mut self, message: impl Into<String>, position: Position) {
        let message = message.into();
        warn!(line = position.start.line, "{}", message);

        self.warnings.push(Warning { message, position });
    }

    pub(super) fn int_type() -> DataType {
        DataType::Primary(PrimaryKind::SignedInt)
    }
}

fn write_bytes(data: &mut Vec<u8>, offset: u32, bytes: &[u8]) {
    let start = offset as usize;
    let end = start + bytes.len();

    if data.len() < end {
        data.resize(end, 0);
    }

    data[start..end].copy_from_slice(bytes);
}
