pub mod codegen;
pub mod errors;
pub mod lexer;
pub mod modules;
pub mod parser;
pub mod processor;
pub mod runtime;
pub mod translator;
pub mod types;

use serde::Serialize;
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;

use codegen::{codegen::generate_wasm, wat::generate_wat};
use errors::errors::{CompileError, Warning};
use modules::builtins::Builtin;
use parser::{ast::Program, parser::parse_program};
use processor::{ast::ProcessedProgram, processor::process};
use translator::{translator::translate, wat_ast::WatModule};

/// Knobs of a compilation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    /// Memory the module starts with, more is used if the program needs it
    pub initial_memory_pages: u32,
    /// Also render the module as WebAssembly text
    pub emit_wat: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            initial_memory_pages: 1,
            emit_wat: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilationOutput {
    /// Empty unless `emit_wat` was set
    pub wat: String,
    pub wasm: Vec<u8>,
    pub data_segment_size: u32,
    pub function_table_size: u32,
    /// Data segment address of the frame sizes of the function table entries
    pub frame_table_offset: u32,
    pub imported_functions: Vec<Builtin>,
    pub warnings: Vec<Warning>,
}

pub fn compile(source: &str) -> Result<CompilationOutput, CompileError> {
    compile_with_options(source, &CompilerOptions::default())
}

pub fn compile_with_options(
    source: &str,
    options: &CompilerOptions,
) -> Result<CompilationOutput, CompileError> {
    let program = compile_to_processed_ast(source)?;
    compile_program(&program, options)
}

/// Back half of the pipeline, for callers that also inspect the processed
/// program.
pub fn compile_program(
    program: &ProcessedProgram,
    options: &CompilerOptions,
) -> Result<CompilationOutput, CompileError> {
    let module = translate(program, options.initial_memory_pages)?;
    let wasm = generate_wasm(&module)?;

    let wat = if options.emit_wat {
        generate_wat(&module)
    } else {
        String::new()
    };

    debug!(bytes = wasm.len(), pages = module.memory_pages, "compiled");

    Ok(CompilationOutput {
        wat,
        wasm,
        data_segment_size: program.data_segment.len() as u32,
        function_table_size: program.function_table.len() as u32,
        frame_table_offset: program.frame_table_offset,
        imported_functions: program.imported_functions.clone(),
        warnings: program.warnings.clone(),
    })
}

pub fn compile_to_ast(source: &str) -> Result<Program, CompileError> {
    Ok(parse_program(source)?)
}

pub fn compile_to_processed_ast(source: &str) -> Result<ProcessedProgram, CompileError> {
    let program = parse_program(source)?;
    Ok(process(&program)?)
}

pub fn compile_to_processed_ast_json(source: &str) -> Result<String, CompileError> {
    processed_ast_json(&compile_to_processed_ast(source)?)
}

pub fn processed_ast_json(program: &ProcessedProgram) -> Result<String, CompileError> {
    Ok(serde_json::to_string_pretty(program)?)
}

pub fn compile_to_wat_module(source: &str) -> Result<WatModule, CompileError> {
    let program = compile_to_processed_ast(source)?;
    Ok(translate(&program, CompilerOptions::default().initial_memory_pages)?)
}

pub fn compile_to_wat(source: &str) -> Result<String, CompileError> {
    Ok(generate_wat(&compile_to_wat_module(source)?))
}

/// Browser entry point; an empty module means compilation failed.
#[wasm_bindgen]
pub fn compile_wasm(source: &str) -> Vec<u8> {
    let options = CompilerOptions {
        emit_wat: false,
        ..CompilerOptions::default()
    };

    match compile_with_options(source, &options) {
        Ok(output) => output.wasm,
        Err(err) => {
            warn!("{}", err.render("main.c", source));
            vec![]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_reports_sizes_and_imports() {
        let output = compile(
            "int table[4]; int twice(int x) { return 2 * x; }
             int main(void) { int (*f)(int) = twice; print_int(f(2)); return 0; }",
        )
        .unwrap();

        // the array and one frame table entry
        assert_eq!(output.data_segment_size, 20);
        assert_eq!(output.function_table_size, 1);
        assert_eq!(output.imported_functions, vec![Builtin::PrintInt]);
        assert!(output.wat.starts_with("(module"));
        assert_eq!(&output.wasm[..4], b"\0asm");
    }

    #[test]
    fn wat_can_be_skipped() {
        let options = CompilerOptions {
            emit_wat: false,
            ..CompilerOptions::default()
        };
        let output = compile_with_options("int main(void) { return 0; }", &options).unwrap();
        assert!(output.wat.is_empty());
        assert!(!output.wasm.is_empty());
    }

    #[test]
    fn errors_render_with_an_excerpt() {
        let source = "int main(void) {\n  return y;\n}\n";
        let error = compile(source).unwrap_err();

        assert!(matches!(error, CompileError::Processing(_)));
        let rendered = error.render("test.c", source);
        assert!(rendered.contains("Symbol y not found in symbol table"));
        assert!(rendered.contains("return y;"));
    }

    #[test]
    fn processed_ast_serializes_to_json() {
        let json = compile_to_processed_ast_json("int main(void) { int x = 10; return x; }").unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["functions"][0]["name"], "main");
        assert_eq!(value["functions"][0]["frame_size"], 4);
    }

    #[test]
    fn one_processed_program_gives_both_json_and_wasm() {
        let source = "int twice(int x) { return 2 * x; } int main(void) { return twice(3); }";
        let program = compile_to_processed_ast(source).unwrap();

        let json = processed_ast_json(&program).unwrap();
        let output = compile_program(&program, &CompilerOptions::default()).unwrap();

        assert_eq!(json, compile_to_processed_ast_json(source).unwrap());
        assert_eq!(output, compile(source).unwrap());
    }

    #[test]
    fn warnings_are_collected() {
        let output = compile("int main(void) { int *p = 5; return 0; }").unwrap();
        assert_eq!(output.warnings.len(), 1);
    }

    #[test]
    fn failed_browser_compilation_is_empty() {
        assert!(compile_wasm("int main(void) { return }").is_empty());
        assert!(!compile_wasm("int main(void) { return 1; }").is_empty());
    }
}
