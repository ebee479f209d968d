use tracing::debug;

use super::{
    memory::grow_stack_function,
    wat_ast::{Instr, Register, WatFunction, WatGlobal, WatImport, WatModule},
};
use crate::{
    errors::errors::{TResult, TranslationError},
    modules::builtins::MODULE_NAME,
    processor::ast::{ProcessedFunction, ProcessedProgram},
    types::types::{stringify, DataType, FunctionType, WasmType, POINTER_SIZE},
};

pub const PAGE_SIZE: u32 = 65536;

/// Largest memory a 32-bit module can address, in pages
const MAX_PAGES: u32 = 65536;

/// Lowers a processed program to a WAT module.
///
/// Memory is laid out from address 0 as data segment, heap and stack. The
/// stack starts at the top of `initial_pages` pages (more if the data
/// segment and the frame of `main` do not fit) and `main`'s frame is already
/// in place when the module starts, so the host only calls the export.
pub fn translate(program: &ProcessedProgram, initial_pages: u32) -> TResult<WatModule> {
    let main = program
        .function("main")
        .ok_or_else(|| TranslationError::new("no function named 'main'"))?;

    let heap_start = align_up(program.data_segment.len() as u32, POINTER_SIZE);
    let main_stack = POINTER_SIZE + main.layout.size_of_return + main.frame_size;
    let needed = u64::from(heap_start) + u64::from(main_stack);
    let memory_pages = (needed.div_ceil(u64::from(PAGE_SIZE)) as u32)
        .max(initial_pages)
        .max(1);

    if memory_pages > MAX_PAGES {
        return Err(TranslationError::new(format!(
            "program needs {} pages of memory, at most {} are addressable",
            memory_pages, MAX_PAGES
        )));
    }

    let top = u64::from(memory_pages) * u64::from(PAGE_SIZE);
    let bp = top - u64::from(POINTER_SIZE + main.layout.size_of_return);
    let sp = bp - u64::from(main.frame_size);

    let globals = Register::ALL
        .into_iter()
        .map(|register| {
            let init = match register {
                Register::Sp => sp as u32 as i32,
                Register::Bp => bp as u32 as i32,
                Register::Hp => heap_start as i32,
                Register::R1 | Register::R2 => 0,
            };

            WatGlobal {
                register,
                init,
                export: matches!(register, Register::Sp | Register::Bp | Register::Hp),
            }
        })
        .collect();

    let imports = program
        .imported_functions
        .iter()
        .map(|builtin| {
            check_import_signature(
                builtin.name(),
                &builtin.function_type(),
                builtin.wasm_params(),
                builtin.wasm_result(),
            )?;

            Ok(WatImport {
                module: MODULE_NAME.to_string(),
                name: builtin.name().to_string(),
                params: builtin.wasm_params().to_vec(),
                result: builtin.wasm_result(),
            })
        })
        .collect::<TResult<Vec<_>>>()?;

    let mut functions = program
        .functions
        .iter()
        .map(|function| FunctionTranslator::new(program, function).translate())
        .collect::<TResult<Vec<_>>>()?;
    functions.push(grow_stack_function());

    debug!(
        memory_pages,
        functions = functions.len(),
        heap_start,
        "translated program"
    );

    Ok(WatModule {
        imports,
        memory_pages,
        globals,
        function_table: program.function_table.clone(),
        data_segment: program.data_segment.clone(),
        functions,
    })
}

/// Host functions take their arguments as wasm values, so the C signature
/// calls were checked against has to lower to the import's signature.
fn check_import_signature(
    name: &str,
    function_type: &FunctionType,
    params: &[WasmType],
    result: Option<WasmType>,
) -> TResult<()> {
    let lower = |data_type: &DataType| data_type.scalar_type().map(|scalar| scalar.wasm_type());

    let declared_params = function_type
        .params
        .iter()
        .map(lower)
        .collect::<Option<Vec<_>>>();
    let declared_result = match function_type.return_type.as_deref() {
        None => Some(None),
        Some(return_type) => lower(return_type).map(Some),
    };

    if declared_params.as_deref() == Some(params) && declared_result == Some(result) {
        Ok(())
    } else {
        Err(TranslationError::new(format!(
            "imported function '{}' is declared as {} but the host provides ({}) -> {}",
            name,
            stringify(&DataType::Function(function_type.clone())),
            params.iter().map(|param| param.name()).collect::<Vec<_>>().join(", "),
            result.map_or("void", WasmType::name),
        )))
    }
}

pub(super) fn align_up(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

#[derive(Debug, Clone)]
pub(super) enum LabelScope {
    Loop {
        break_label: String,
        continue_label: String,
    },
    Switch {
        break_label: String,
    },
}

/// Translation state of one function body.
pub(super) struct FunctionTranslator<'a> {
    pub(super) program: &'a ProcessedProgram,
    pub(super) function: &'a ProcessedFunction,
    locals: Vec<WasmType>,
    pub(super) labels: Vec<LabelScope>,
    next_label: u32,
}

impl<'a> FunctionTranslator<'a> {
    pub(super) fn new(program: &'a ProcessedProgram, function: &'a ProcessedFunction) -> Self {
        Self {
            program,
            function,
            locals: vec![],
            labels: vec![],
            next_label: 0,
        }
    }

    pub(super) fn translate(mut self) -> TResult<WatFunction> {
        let function = self.function;
        let mut body = vec![];
        self.translate_statements(&function.body, &mut body)?;

        Ok(WatFunction {
            name: function.name.clone(),
            locals: self.locals,
            body,
            export: function.name == "main",
        })
    }

    /// Fresh wasm local, used to hold values across a call
    pub(super) fn new_local(&mut self, ty: WasmType) -> u32 {
        self.locals.push(ty);
        self.locals.len() as u32 - 1
    }

    pub(super) fn new_label(&mut self, prefix: &str) -> String {
        let label = format!("{}_{}", prefix, self.next_label);
        self.next_label += 1;
        label
    }

    pub(super) fn break_label(&self) -> TResult<String> {
        match self.labels.last() {
            Some(LabelScope::Loop { break_label, .. } | LabelScope::Switch { break_label }) => {
                Ok(break_label.clone())
            }
            None => Err(TranslationError::new("break statement outside of a loop or switch")),
        }
    }

    pub(super) fn continue_label(&self) -> TResult<String> {
        self.labels
            .iter()
            .rev()
            .find_map(|scope| match scope {
                LabelScope::Loop { continue_label, .. } => Some(continue_label.clone()),
                LabelScope::Switch { .. } => None,
            })
            .ok_or_else(|| TranslationError::new("continue statement outside of a loop"))
    }

    /// Runs `f` with `scope` as the innermost break/continue target.
    pub(super) fn with_labels<T>(
        &mut self,
        scope: LabelScope,
        f: impl FnOnce(&mut Self) -> TResult<T>,
    ) -> TResult<T> {
        self.labels.push(scope);
        let result = f(self);
        self.labels.pop();
        result
    }

    pub(super) fn frame_size(&self) -> u32 {
        self.function.frame_size
    }
}

pub(super) fn global_add(register: Register, amount: i32, out: &mut Vec<Instr>) {
    out.extend([
        Instr::GlobalGet(register),
        Instr::I32Const(amount),
        Instr::Numeric(super::wat_ast::NumericOp::I32Add),
        Instr::GlobalSet(register),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::parser::parse_program,
        processor::processor::process,
        modules::builtins::Builtin,
        translator::wat_ast::{NumericOp, GROW_STACK},
        types::types::PrimaryKind,
    };

    fn translate_source(source: &str) -> WatModule {
        let program = process(&parse_program(source).unwrap()).unwrap();
        translate(&program, 1).unwrap()
    }

    fn init(module: &WatModule, register: Register) -> i32 {
        module
            .globals
            .iter()
            .find(|global| global.register == register)
            .unwrap()
            .init
    }

    #[test]
    fn registers_start_below_the_frame_of_main() {
        let module = translate_source("int x = 5; char c; int main(void) { int a; long b; return a; }");

        assert_eq!(module.memory_pages, 1);
        assert_eq!(module.data_segment.len(), 5);
        assert_eq!(init(&module, Register::Hp), 8);
        assert_eq!(init(&module, Register::Bp), 65536 - 4 - 4);
        assert_eq!(init(&module, Register::Sp), 65536 - 8 - 12);
        assert_eq!(init(&module, Register::R1), 0);

        let exported: Vec<_> = module
            .globals
            .iter()
            .filter(|global| global.export)
            .map(|global| global.register.name())
            .collect();
        assert_eq!(exported, vec!["sp", "bp", "hp"]);
    }

    #[test]
    fn memory_grows_to_fit_the_data_segment() {
        let module = translate_source("char buffer[70000]; int main(void) { return 0; }");
        assert_eq!(module.memory_pages, 2);

        let program = process(&parse_program("int main(void) { return 0; }").unwrap()).unwrap();
        assert_eq!(translate(&program, 3).unwrap().memory_pages, 3);
    }

    #[test]
    fn only_main_is_exported_and_the_helper_is_appended() {
        let module = translate_source("int f(void) { return 1; } int main(void) { return f(); }");

        let names: Vec<_> = module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["f", "main", GROW_STACK]);
        assert!(module.function("main").unwrap().export);
        assert!(!module.function("f").unwrap().export);
    }

    #[test]
    fn used_builtins_are_imported() {
        let module = translate_source("int main(void) { print_int(1); free(malloc(4)); return 0; }");

        let imports: Vec<_> = module
            .imports
            .iter()
            .map(|import| (import.name.as_str(), import.params.clone(), import.result))
            .collect();
        assert_eq!(
            imports,
            vec![
                ("print_int", vec![WasmType::I32], None),
                ("malloc", vec![WasmType::I32], Some(WasmType::I32)),
                ("free", vec![WasmType::I32], None),
            ]
        );
        assert!(module.imports.iter().all(|import| import.module == MODULE_NAME));
    }

    #[test]
    fn every_builtin_lowers_to_its_import() {
        for builtin in Builtin::ALL {
            check_import_signature(
                builtin.name(),
                &builtin.function_type(),
                builtin.wasm_params(),
                builtin.wasm_result(),
            )
            .unwrap();
        }
    }

    #[test]
    fn mismatched_import_signatures_are_errors() {
        let print_long = FunctionType {
            params: vec![DataType::Primary(PrimaryKind::SignedLong)],
            return_type: None,
        };

        let error = check_import_signature("print_long", &print_long, &[WasmType::I32], None).unwrap_err();
        assert!(error.to_string().contains("'print_long'"));
        assert!(error.to_string().contains("(i32) -> void"));

        // a result the declaration does not have
        assert!(check_import_signature("print_long", &print_long, &[WasmType::I64], Some(WasmType::I32)).is_err());
        assert!(check_import_signature("print_long", &print_long, &[WasmType::I64], None).is_ok());
    }

    #[test]
    fn release_return_pops_the_slot() {
        let mut out = vec![];
        global_add(Register::Sp, 8, &mut out);
        assert_eq!(
            out,
            vec![
                Instr::GlobalGet(Register::Sp),
                Instr::I32Const(8),
                Instr::Numeric(NumericOp::I32Add),
                Instr::GlobalSet(Register::Sp),
            ]
        );
    }
}
