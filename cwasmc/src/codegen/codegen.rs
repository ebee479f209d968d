use std::{borrow::Cow, collections::HashMap};

use tracing::debug;
use wasm_encoder::{
    BlockType, CodeSection, ConstExpr, DataSection, ElementSection, Elements, EntityType,
    ExportKind, ExportSection, Function, FunctionSection, GlobalSection, GlobalType,
    ImportSection, Instruction, MemArg, MemorySection, MemoryType, Module, RefType, TableSection,
    TableType, TypeSection, ValType,
};

use crate::{
    errors::errors::{TResult, TranslationError},
    translator::wat_ast::{Instr, MemoryOp, WatFunction, WatModule},
    types::types::WasmType,
};

/// Encodes a translated module to the WebAssembly binary format.
pub fn generate_wasm(module: &WatModule) -> TResult<Vec<u8>> {
    let mut ctx = Context::new(module);
    ctx.visit()?;

    Ok(ctx.generate())
}

/// Binary codegen context
pub struct Context<'a> {
    /// The result of the translator
    wat: &'a WatModule,

    /// Final module
    module: Module,

    /// Function signatures
    pub(crate) type_ctx: TypeContext,

    /// Names and indices of imported and defined functions
    pub(crate) function_ctx: FunctionContext,

    /// Function bodies
    pub(crate) code_ctx: CodeContext,

    /// Linear memory and its initial contents
    pub(crate) memory_ctx: MemoryContext,

    /// Exported functions, globals and memory
    pub(crate) export_ctx: ExportContext,

    /// Host functions
    pub(crate) import_ctx: ImportContext,

    /// Pseudo-registers
    pub(crate) global_ctx: GlobalContext,
}

impl<'a> Context<'a> {
    pub fn new(wat: &'a WatModule) -> Self {
        let memory = MemoryType {
            minimum: u64::from(wat.memory_pages),
            maximum: None,
            memory64: false,
            shared: false,
        };

        Self {
            wat,
            module: Module::new(),
            type_ctx: TypeContext::new(),
            function_ctx: FunctionContext::new(),
            code_ctx: CodeContext::new(),
            memory_ctx: MemoryContext::new(memory, &wat.data_segment),
            export_ctx: ExportContext::new(),
            import_ctx: ImportContext::new(),
            global_ctx: GlobalContext::new(),
        }
    }

    /// Registers every import, global and function, then encodes the bodies.
    pub fn visit(&mut self) -> TResult<()> {
        // all defined functions share the first type
        let void_type = self.type_ctx.function_type(&[], None);

        for import in &self.wat.imports {
            let type_index = self.type_ctx.function_type(&import.params, import.result);
            self.import_ctx
                .import_func(&import.module, &import.name, EntityType::Function(type_index));
            self.function_ctx.new_external_function(&import.name);
        }

        for global in &self.wat.globals {
            let index = self
                .global_ctx
                .add_global_int(ConstExpr::i32_const(global.init), true);

            if global.export {
                self.export_ctx.export_global(global.register.name(), index);
            }
        }

        for function in &self.wat.functions {
            let index = self.function_ctx.new_function(void_type, &function.name);

            if function.export {
                self.export_ctx.export_function(&function.name, index);
            }
        }

        for function in &self.wat.functions {
            let instructions = self.function_instructions(function, void_type)?;
            self.code_ctx.new_function_code(&function.locals, &instructions);
        }

        debug!(
            functions = self.wat.functions.len(),
            imports = self.wat.imports.len(),
            "encoded module"
        );

        Ok(())
    }

    pub fn generate(&mut self) -> Vec<u8> {
        self.export_ctx.export_memory("memory", 0);
        self.export_ctx.export_table("table", 0);

        let table_size = self.wat.function_table.len() as u32;
        let mut table_section = TableSection::new();
        table_section.table(TableType {
            element_type: RefType::FUNCREF,
            minimum: table_size,
            maximum: Some(table_size),
        });

        let table_entries: Vec<u32> = self
            .wat
            .function_table
            .iter()
            .filter_map(|name| self.function_ctx.get_function(name))
            .collect();
        let mut element_section = ElementSection::new();
        if !table_entries.is_empty() {
            element_section.active(
                None,
                &ConstExpr::i32_const(0),
                Elements::Functions(&table_entries),
            );
        }

        self.module.section(&self.type_ctx.get_section());
        self.module.section(&self.import_ctx.get_section());
        self.module.section(&self.function_ctx.get_section());
        self.module.section(&table_section);

        let (memory_section, data_section) = self.memory_ctx.get_sections();
        self.module.section(&memory_section);
        self.module.section(&self.global_ctx.get_section());
        self.module.section(&self.export_ctx.get_section());
        self.module.section(&element_section);
        self.module.section(&self.code_ctx.get_section());
        self.module.section(&data_section);

        self.module.clone().finish()
    }

    fn function_instructions(
        &self,
        function: &WatFunction,
        void_type: u32,
    ) -> TResult<Vec<Instruction<'static>>> {
        let mut encoder = BodyEncoder {
            functions: &self.function_ctx,
            void_type,
            labels: vec![],
            instructions: vec![],
        };

        encoder.encode_all(&function.body).map_err(|e| {
            TranslationError::new(format!("in function '{}': {}", function.name, e.0))
        })?;
        encoder.instructions.push(Instruction::End);

        Ok(encoder.instructions)
    }
}

/// Lowers one function body, resolving label names to relative depths.
struct BodyEncoder<'a> {
    functions: &'a FunctionContext,
    void_type: u32,
    /// Innermost last; `None` for the unnamed label of an `if`
    labels: Vec<Option<&'a str>>,
    instructions: Vec<Instruction<'static>>,
}

impl<'a> BodyEncoder<'a> {
    fn encode_all(&mut self, body: &'a [Instr]) -> TResult<()> {
        for instr in body {
            self.encode(instr)?;
        }

        Ok(())
    }

    fn depth(&self, label: &str) -> TResult<u32> {
        self.labels
            .iter()
            .rev()
            .position(|candidate| *candidate == Some(label))
            .map(|depth| depth as u32)
            .ok_or_else(|| TranslationError::new(format!("branch to unknown label ${}", label)))
    }

    fn function(&self, name: &str) -> TResult<u32> {
        self.functions
            .get_function(name)
            .ok_or_else(|| TranslationError::new(format!("call to unknown function ${}", name)))
    }

    fn encode(&mut self, instr: &'a Instr) -> TResult<()> {
        let instruction = match instr {
            Instr::Block { label, body } | Instr::Loop { label, body } => {
                self.instructions.push(match instr {
                    Instr::Block { .. } => Instruction::Block(BlockType::Empty),
                    _ => Instruction::Loop(BlockType::Empty),
                });
                self.labels.push(Some(label.as_str()));
                self.encode_all(body)?;
                self.labels.pop();
                Instruction::End
            }
            Instr::If {
                result,
                then_body,
                else_body,
            } => {
                let block_type = match result {
                    Some(result) => BlockType::Result(ValType::from(*result)),
                    None => BlockType::Empty,
                };
                self.instructions.push(Instruction::If(block_type));
                self.labels.push(None);
                self.encode_all(then_body)?;
                if !else_body.is_empty() {
                    self.instructions.push(Instruction::Else);
                    self.encode_all(else_body)?;
                }
                self.labels.pop();
                Instruction::End
            }

            Instr::I32Const(value) => Instruction::I32Const(*value),
            Instr::I64Const(value) => Instruction::I64Const(*value),
            Instr::F32Const(value) => Instruction::F32Const(*value),
            Instr::F64Const(value) => Instruction::F64Const(*value),
            Instr::LocalGet(index) => Instruction::LocalGet(*index),
            Instr::LocalSet(index) => Instruction::LocalSet(*index),
            Instr::LocalTee(index) => Instruction::LocalTee(*index),
            Instr::GlobalGet(register) => Instruction::GlobalGet(register.index()),
            Instr::GlobalSet(register) => Instruction::GlobalSet(register.index()),
            Instr::Load { op, offset } | Instr::Store { op, offset } => memory_instruction(*op, *offset),
            Instr::Numeric(op) => op.instruction(),
            Instr::Br(label) => Instruction::Br(self.depth(label)?),
            Instr::BrIf(label) => Instruction::BrIf(self.depth(label)?),
            Instr::BrTable { labels, default } => {
                let depths = labels
                    .iter()
                    .map(|label| self.depth(label))
                    .collect::<TResult<Vec<_>>>()?;
                Instruction::BrTable(Cow::Owned(depths), self.depth(default)?)
            }
            Instr::Call(name) => Instruction::Call(self.function(name)?),
            Instr::CallIndirect => Instruction::CallIndirect {
                ty: self.void_type,
                table: 0,
            },
            Instr::Return => Instruction::Return,
            Instr::Drop => Instruction::Drop,
            Instr::Select => Instruction::Select,
            Instr::Unreachable => Instruction::Unreachable,
            Instr::MemorySize => Instruction::MemorySize(0),
            Instr::MemoryGrow => Instruction::MemoryGrow(0),
        };

        self.instructions.push(instruction);
        Ok(())
    }
}

fn memory_instruction(op: MemoryOp, offset: u32) -> Instruction<'static> {
    let memarg = MemArg {
        offset: u64::from(offset),
        align: op.align(),
        memory_index: 0,
    };

    match op {
        MemoryOp::I32Load => Instruction::I32Load(memarg),
        MemoryOp::I64Load => Instruction::I64Load(memarg),
        MemoryOp::F32Load => Instruction::F32Load(memarg),
        MemoryOp::F64Load => Instruction::F64Load(memarg),
        MemoryOp::I32Load8S => Instruction::I32Load8S(memarg),
        MemoryOp::I32Load8U => Instruction::I32Load8U(memarg),
        MemoryOp::I32Load16S => Instruction::I32Load16S(memarg),
        MemoryOp::I32Load16U => Instruction::I32Load16U(memarg),
        MemoryOp::I32Store => Instruction::I32Store(memarg),
        MemoryOp::I64Store => Instruction::I64Store(memarg),
        MemoryOp::F32Store => Instruction::F32Store(memarg),
        MemoryOp::F64Store => Instruction::F64Store(memarg),
        MemoryOp::I32Store8 => Instruction::I32Store8(memarg),
        MemoryOp::I32Store16 => Instruction::I32Store16(memarg),
    }
}

pub struct TypeContext {
    section: TypeSection,
    /// Signatures already in the section
    types: HashMap<(Vec<WasmType>, Option<WasmType>), u32>,
}

impl TypeContext {
    pub fn new() -> Self {
        Self {
            section: TypeSection::new(),
            types: HashMap::new(),
        }
    }

    /// Index of the function type, added on first use
    pub fn function_type(&mut self, params: &[WasmType], result: Option<WasmType>) -> u32 {
        let key = (params.to_vec(), result);
        if let Some(index) = self.types.get(&key) {
            return *index;
        }

        self.section.function(
            params.iter().map(|param| ValType::from(*param)),
            result.map(ValType::from),
        );

        let index = self.types.len() as u32;
        self.types.insert(key, index);

        index
    }

    pub fn get_section(&self) -> TypeSection {
        self.section.clone()
    }
}

pub struct FunctionContext {
    functions: HashMap<String, u32>,
    section: FunctionSection,
    functions_index: u32,
}

impl FunctionContext {
    pub fn new() -> Self {
        Self {
            section: FunctionSection::new(),
            functions_index: 0,
            functions: HashMap::new(),
        }
    }

    pub fn get_function(&self, function_name: &str) -> Option<u32> {
        self.functions.get(function_name).copied()
    }

    /// Imports take the first indices, they must all be added before any
    /// defined function.
    pub fn new_external_function(&mut self, name: &str) -> u32 {
        let index = self.functions_index;
        self.functions.insert(name.to_string(), index);
        self.functions_index += 1;

        index
    }

    pub fn new_function(&mut self, type_index: u32, name: &str) -> u32 {
        let index = self.new_external_function(name);
        self.section.function(type_index);

        index
    }

    pub fn get_section(&self) -> FunctionSection {
        self.section.clone()
    }
}

pub struct CodeContext {
    section: CodeSection,
}

impl CodeContext {
    pub fn new() -> Self {
        Self {
            section: CodeSection::new(),
        }
    }

    pub fn new_function_code(&mut self, locals: &[WasmType], instructions: &[Instruction]) {
        let mut func = Function::new_with_locals_types(locals.iter().map(|l| ValType::from(*l)));

        for instruction in instructions {
            func.instruction(instruction);
        }

        self.section.function(&func);
    }

    pub fn get_section(&self) -> CodeSection {
        self.section.clone()
    }
}

pub struct MemoryContext {
    memory_section: MemorySection,
    data_section: DataSection,
}

impl MemoryContext {
    /// One memory whose initial contents start at address 0
    pub fn new(memory: MemoryType, data: &[u8]) -> Self {
        let mut memory_section = MemorySection::new();
        memory_section.memory(memory);

        let mut data_section = DataSection::new();
        if !data.is_empty() {
            data_section.active(0, &ConstExpr::i32_const(0), data.iter().copied());
        }

        Self {
            memory_section,
            data_section,
        }
    }

    pub fn get_sections(&self) -> (MemorySection, DataSection) {
        (self.memory_section.clone(), self.data_section.clone())
    }
}

pub struct ExportContext {
    section: ExportSection,
}

impl ExportContext {
    pub fn new() -> Self {
        Self {
            section: ExportSection::new(),
        }
    }

    pub fn export_memory(&mut self, name: &str, id: u32) {
        self.section.export(name, ExportKind::Memory, id);
    }

    pub fn export_table(&mut self, name: &str, id: u32) {
        self.section.export(name, ExportKind::Table, id);
    }

    pub fn export_function(&mut self, name: &str, id: u32) {
        self.section.export(name, ExportKind::Func, id);
    }

    pub fn export_global(&mut self, name: &str, id: u32) {
        self.section.export(name, ExportKind::Global, id);
    }

    pub fn get_section(&self) -> ExportSection {
        self.section.clone()
    }
}

pub struct ImportContext {
    section: ImportSection,
}

impl ImportContext {
    pub fn new() -> Self {
        Self {
            section: ImportSection::new(),
        }
    }

    pub fn import_func(&mut self, module: &str, function_name: &str, function_type: EntityType) {
        self.section.import(module, function_name, function_type);
    }

    pub fn get_section(&self) -> ImportSection {
        self.section.clone()
    }
}

pub struct GlobalContext {
    section: GlobalSection,
    globals_id: u32,
}

impl GlobalContext {
    pub fn new() -> Self {
        Self {
            section: GlobalSection::new(),
            globals_id: 0,
        }
    }

    /// Adds an i32 global and returns its index
    pub fn add_global_int(&mut self, init: ConstExpr, mutable: bool) -> u32 {
        self.section.global(
            GlobalType {
                val_type: ValType::I32,
                mutable,
            },
            &init,
        );

        let index = self.globals_id;
        self.globals_id += 1;

        index
    }

    pub fn get_section(&self) -> GlobalSection {
        self.section.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translator::{
        memory::grow_stack_function,
        wat_ast::{NumericOp, Register, WatGlobal},
    };

    fn module_with(body: Vec<Instr>) -> WatModule {
        WatModule {
            imports: vec![],
            memory_pages: 1,
            globals: vec![WatGlobal {
                register: Register::Sp,
                init: 0,
                export: true,
            }],
            function_table: vec![],
            data_segment: vec![],
            functions: vec![WatFunction {
                name: "main".to_string(),
                locals: vec![WasmType::I32],
                body,
                export: true,
            }],
        }
    }

    fn encode(module: &WatModule) -> TResult<Vec<Instruction<'static>>> {
        let ctx = Context::new(module);
        ctx.function_instructions(&module.functions[0], 0)
    }

    #[test]
    fn labels_resolve_to_relative_depths() {
        let module = module_with(vec![Instr::Block {
            label: "out".to_string(),
            body: vec![Instr::Loop {
                label: "top".to_string(),
                body: vec![
                    Instr::I32Const(1),
                    Instr::If {
                        result: None,
                        then_body: vec![Instr::Br("out".to_string())],
                        else_body: vec![Instr::Br("top".to_string())],
                    },
                ],
            }],
        }]);

        let instructions = encode(&module).unwrap();
        assert!(matches!(instructions[4], Instruction::Br(2)));
        assert!(matches!(instructions[5], Instruction::Else));
        assert!(matches!(instructions[6], Instruction::Br(1)));
    }

    #[test]
    fn unknown_labels_and_functions_are_errors() {
        let module = module_with(vec![Instr::Br("nowhere".to_string())]);
        assert!(encode(&module).is_err());

        let module = module_with(vec![Instr::Call("missing".to_string())]);
        let error = encode(&module).unwrap_err();
        assert!(error.to_string().contains("missing"));
    }

    #[test]
    fn encoded_module_starts_with_the_magic() {
        let mut module = module_with(vec![
            Instr::GlobalGet(Register::Sp),
            NumericOp::I32Eqz.into(),
            Instr::Drop,
        ]);
        module.functions.push(grow_stack_function());

        let wasm = generate_wasm(&module).unwrap();
        assert_eq!(&wasm[..4], b"\0asm");
    }

    #[test]
    fn function_table_is_filled_and_exported() {
        let mut module = module_with(vec![]);
        module.function_table = vec!["main".to_string()];

        let wasm = generate_wasm(&module).unwrap();
        wasmparser::validate(&wasm).unwrap();

        let mut elements = 0;
        let mut table_exports = vec![];
        for payload in wasmparser::Parser::new(0).parse_all(&wasm) {
            match payload.unwrap() {
                wasmparser::Payload::ElementSection(reader) => elements += reader.count(),
                wasmparser::Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export.unwrap();
                        if export.kind == wasmparser::ExternalKind::Table {
                            table_exports.push(export.name.to_string());
                        }
                    }
                }
                _ => {}
            }
        }

        assert_eq!(elements, 1);
        assert_eq!(table_exports, vec!["table".to_string()]);
    }

    #[test]
    fn signatures_are_shared() {
        let mut types = TypeContext::new();
        let void = types.function_type(&[], None);
        let print = types.function_type(&[WasmType::I32], None);
        assert_eq!((void, print), (0, 1));
        assert_eq!(types.function_type(&[WasmType::I32], None), 1);
    }
}
