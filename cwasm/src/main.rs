mod host;

use clap::{Args, Parser, Subcommand};
use cwasmc::errors::errors::CompileError;
use cwasmc::processor::ast::ProcessedProgram;
use cwasmc::{
    compile_program, compile_to_processed_ast, processed_ast_json, CompilationOutput, CompilerOptions,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::exit;
use thiserror::Error;
use wasmprinter::print_bytes;

use host::{run, HostError};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compiles a C file to a Wasm module
    Compile(CompileArgs),

    /// Compiles and runs a C file, exiting with the value main returns
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// C file path
    c_file_path: PathBuf,

    #[arg(long, default_value_t = 1)]
    /// Pages of linear memory to start with
    pages: u32,
}

#[derive(Args, Debug)]
struct CompileArgs {
    /// C file path
    c_file_path: PathBuf,

    #[arg(long, action)]
    /// Print Wat
    print_wat: bool,

    #[arg(long, action)]
    /// Write the generated Wat next to the Wasm module
    emit_wat: bool,

    #[arg(long, action)]
    /// Print the processed program as JSON
    dump_ast: bool,

    #[arg(long, default_value_t = 1)]
    /// Pages of linear memory to start with
    pages: u32,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Compile(String),

    #[error("{0}")]
    Host(#[from] HostError),

    #[error("invalid file name: {0}")]
    FileName(PathBuf),
}

struct Source {
    path: PathBuf,
    text: String,
}

impl Source {
    fn read(path: &Path) -> Result<Self, CliError> {
        Ok(Self {
            path: path.to_path_buf(),
            text: fs::read_to_string(path)?,
        })
    }

    fn stem(&self) -> Result<&str, CliError> {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| CliError::FileName(self.path.clone()))
    }

    fn report(&self, err: CompileError) -> CliError {
        CliError::Compile(err.render(&self.path.to_string_lossy(), &self.text))
    }

    fn process(&self) -> Result<ProcessedProgram, CliError> {
        compile_to_processed_ast(&self.text).map_err(|e| self.report(e))
    }

    fn compile(
        &self,
        program: &ProcessedProgram,
        options: &CompilerOptions,
    ) -> Result<CompilationOutput, CliError> {
        let output = compile_program(program, options).map_err(|e| self.report(e))?;

        for warning in &output.warnings {
            eprintln!("{}", warning.render(&self.path.to_string_lossy(), &self.text));
        }

        Ok(output)
    }
}

fn compile_command(args: &CompileArgs) -> Result<i32, CliError> {
    let source = Source::read(&args.c_file_path)?;
    let options = CompilerOptions {
        initial_memory_pages: args.pages,
        emit_wat: args.emit_wat,
    };

    let program = source.process()?;
    if args.dump_ast {
        let json = processed_ast_json(&program).map_err(|e| source.report(e))?;
        println!("{}", json);
    }

    let output = source.compile(&program, &options)?;

    if args.print_wat {
        let wat = print_bytes(&output.wasm)
            .unwrap_or("Couldn't print compiled wasm to wat!".to_string());

        println!("{}", wat);
    };

    let stem = source.stem()?;
    fs::write(format!("./{}.wasm", stem), &output.wasm)?;

    if args.emit_wat {
        fs::write(format!("./{}.wat", stem), &output.wat)?;
    }

    Ok(0)
}

fn run_command(args: &RunArgs) -> Result<i32, CliError> {
    let source = Source::read(&args.c_file_path)?;
    let options = CompilerOptions {
        initial_memory_pages: args.pages,
        emit_wat: false,
    };

    let program = source.process()?;
    let output = source.compile(&program, &options)?;
    let outcome = run(&output.wasm, true)?;

    Ok(outcome.exit_code)
}

fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::Compile(c_args) => compile_command(c_args),
        Commands::Run(r_args) => run_command(r_args),
    };

    match result {
        Ok(code) => exit(code),
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    }
}
