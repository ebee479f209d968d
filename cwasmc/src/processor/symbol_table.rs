use std::collections::HashMap;

use serde::Serialize;

use crate::{
    errors::errors::{ProcResult, ProcessingError},
    modules::builtins::Builtin,
    types::{
        layout::{size_of, unpack, PrimitiveCell},
        types::{stringify, DataType, FunctionType},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Storage {
    /// In the current stack frame
    Local,
    DataSegment,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VariableEntry {
    pub data_type: DataType,
    pub storage: Storage,
    pub offset: u32,
}

/// Where arguments and the return value of a function live, relative to the
/// callee's frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionLayout {
    /// Cells of each parameter, offsets counted from the start of the frame
    pub param_cells: Vec<Vec<PrimitiveCell>>,
    /// `None` for void functions
    pub return_cells: Option<Vec<PrimitiveCell>>,
    pub size_of_params: u32,
    pub size_of_return: u32,
}

impl FunctionLayout {
    pub fn new(function_type: &FunctionType) -> ProcResult<Self> {
        let mut param_cells = vec![];
        let mut size_of_params = 0;

        for param in &function_type.params {
            let cells = unpack(param)?
                .into_iter()
                .map(|cell| PrimitiveCell {
                    data_type: cell.data_type,
                    offset: size_of_params + cell.offset,
                })
                .collect();

            param_cells.push(cells);
            size_of_params += size_of(param)?;
        }

        let (return_cells, size_of_return) = match function_type.return_type.as_deref() {
            Some(return_type @ (DataType::Array { .. } | DataType::Function(_))) => {
                return Err(ProcessingError::new(format!(
                    "function cannot return {}",
                    stringify(return_type)
                )))
            }
            Some(return_type) => (Some(unpack(return_type)?), size_of(return_type)?),
            None => (None, 0),
        };

        Ok(Self {
            param_cells,
            return_cells,
            size_of_params,
            size_of_return,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionEntry {
    pub function_type: FunctionType,
    pub layout: FunctionLayout,
    /// Set when the name resolves to a host function
    pub builtin: Option<Builtin>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum SymbolEntry {
    Variable(VariableEntry),
    Function(FunctionEntry),
    EnumConstant { value: i128 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    entries: HashMap<String, SymbolEntry>,
    /// Running byte offset, only meaningful for global and function scopes
    offset: u32,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            entries: HashMap::new(),
            offset: 0,
        }
    }
}

/// Chain of scopes, innermost last. Block scopes allocate their locals from
/// the enclosing function's counter, so a frame grows monotonically while a
/// function is processed.
#[derive(Debug)]
pub struct SymbolTable {
    builtins: HashMap<String, SymbolEntry>,
    scopes: Vec<Scope>,
}

impl SymbolTable {
    pub fn new() -> ProcResult<Self> {
        let mut builtins = HashMap::new();

        for builtin in Builtin::ALL {
            let function_type = builtin.function_type();
            let layout = FunctionLayout::new(&function_type)?;

            builtins.insert(
                builtin.name().to_string(),
                SymbolEntry::Function(FunctionEntry {
                    function_type,
                    layout,
                    builtin: Some(builtin),
                }),
            );
        }

        Ok(Self {
            builtins,
            scopes: vec![Scope::new(ScopeKind::Global)],
        })
    }

    pub fn enter_scope(&mut self, kind: ScopeKind) {
        self.scopes.push(Scope::new(kind));
    }

    pub fn exit_scope(&mut self) {
        // the global scope is never left
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn is_global_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    fn current(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn frame_scope(&mut self) -> &mut Scope {
        let index = self
            .scopes
            .iter()
            .rposition(|scope| scope.kind != ScopeKind::Block)
            .unwrap_or(0);

        &mut self.scopes[index]
    }

    /// Bytes of parameters and locals allocated so far in the current function
    pub fn frame_size(&self) -> u32 {
        self.scopes
            .iter()
            .rev()
            .find(|scope| scope.kind == ScopeKind::Function)
            .map(|scope| scope.offset)
            .unwrap_or(0)
    }

    pub fn data_segment_size(&self) -> u32 {
        self.scopes[0].offset
    }

    /// Appends `size` bytes to the data segment and returns their offset.
    pub fn reserve_data(&mut self, size: u32) -> u32 {
        let offset = self.scopes[0].offset;
        self.scopes[0].offset += size;

        offset
    }

    /// Unnamed frame slot used for values the processor needs to keep around.
    pub fn add_temporary(&mut self, data_type: &DataType) -> ProcResult<u32> {
        let size = size_of(data_type)?;
        let scope = self.frame_scope();
        let offset = scope.offset;
        scope.offset += size;

        Ok(offset)
    }

    pub fn add_variable(
        &mut self,
        name: &str,
        data_type: DataType,
        storage: Storage,
    ) -> ProcResult<VariableEntry> {
        let is_global = self.is_global_scope();

        if let Some(existing) = self.current().entries.get(name) {
            // multiple declarations are only allowed outside of functions
            if !is_global {
                return Err(ProcessingError::new(format!(
                    "Redeclaration error: {} redeclared in scope.",
                    name
                )));
            }

            return match existing {
                SymbolEntry::Variable(entry) if entry.data_type.same_as(&data_type) => {
                    Ok(entry.clone())
                }
                SymbolEntry::Variable(entry) => Err(ProcessingError::new(format!(
                    "conflicting types for '{}': {} and {}",
                    name,
                    stringify(&entry.data_type),
                    stringify(&data_type)
                ))),
                _ => Err(ProcessingError::new(format!(
                    "Redeclaration error: {} redeclared as variable instead of function",
                    name
                ))),
            };
        }

        let size = size_of(&data_type)?;

        let offset = match storage {
            Storage::Local => {
                let scope = self.frame_scope();
                let offset = scope.offset;
                scope.offset += size;
                offset
            }
            Storage::DataSegment => self.reserve_data(size),
        };

        let entry = VariableEntry {
            data_type,
            storage,
            offset,
        };

        self.current()
            .entries
            .insert(name.to_string(), SymbolEntry::Variable(entry.clone()));

        Ok(entry)
    }

    pub fn add_function(
        &mut self,
        name: &str,
        function_type: &FunctionType,
    ) -> ProcResult<FunctionEntry> {
        if let Some(existing) = self.current().entries.get(name) {
            let SymbolEntry::Function(entry) = existing else {
                return Err(ProcessingError::new(format!(
                    "{} redeclared as different kind of symbol: function instead of variable",
                    name
                )));
            };

            if !entry.function_type.same_params(function_type) {
                return Err(ProcessingError::new(format!(
                    "{} redeclared as function with different signature: different parameters",
                    name
                )));
            }

            if !entry.function_type.same_return(function_type) {
                return Err(ProcessingError::new(format!(
                    "{} redeclared as function with different signature: different return type",
                    name
                )));
            }

            return Ok(entry.clone());
        }

        // a matching prototype of a host function keeps resolving to the host
        let builtin = Builtin::from_name(name)
            .filter(|builtin| builtin.function_type().same_as(function_type));

        let entry = FunctionEntry {
            function_type: function_type.clone(),
            layout: FunctionLayout::new(function_type)?,
            builtin,
        };

        self.current()
            .entries
            .insert(name.to_string(), SymbolEntry::Function(entry.clone()));

        Ok(entry)
    }

    /// Like `add_function`, for a function that gets a body in this module.
    pub fn define_function(
        &mut self,
        name: &str,
        function_type: &FunctionType,
    ) -> ProcResult<FunctionEntry> {
        let mut entry = self.add_function(name, function_type)?;
        entry.builtin = None;

        self.current()
            .entries
            .insert(name.to_string(), SymbolEntry::Function(entry.clone()));

        Ok(entry)
    }

    pub fn add_enum_constant(&mut self, name: &str, value: i128) -> ProcResult<()> {
        let scope = self.current();

        if scope.entries.contains_key(name) {
            return Err(ProcessingError::new(format!(
                "Redeclaration error: {} redeclared in scope.",
                name
            )));
        }

        scope
            .entries
            .insert(name.to_string(), SymbolEntry::EnumConstant { value });

        Ok(())
    }

    /// Innermost entry named `name`, host functions last.
    pub fn lookup(&self, name: &str) -> ProcResult<&SymbolEntry> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.entries.get(name))
            .or_else(|| self.builtins.get(name))
            .ok_or_else(|| ProcessingError::not_found(name))
    }
}
