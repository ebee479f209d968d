//! Runs compiled modules under wasmer with the `source_stdlib` imports.

use cwasmc::modules::builtins::{Builtin, MODULE_NAME};
use cwasmc::runtime::allocator::Allocator;
use cwasmc::processor::symbol_table::FunctionLayout;
use cwasmc::runtime::frame::{
    load_stack_frame, read_return_values, tear_down_stack_frame, ScalarValue,
};
use cwasmc::runtime::memory::{AResult, AllocatorError, MemoryModel};
use thiserror::Error;
use tracing::debug;
use wasmer::{
    imports, AsStoreMut, ExportError, Function, FunctionEnv, FunctionEnvMut, Global, Imports,
    Instance, InstantiationError, Memory, Module, Pages, RuntimeError, Store, StoreMut, Value,
};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("could not load module: {0}")]
    Compile(#[from] wasmer::CompileError),

    #[error("could not instantiate module: {0}")]
    Instantiation(#[from] InstantiationError),

    #[error("{0}")]
    Export(#[from] ExportError),

    #[error("{}", .0.message())]
    Runtime(#[from] RuntimeError),

    #[error("{0}")]
    Memory(#[from] AllocatorError),

    #[error("no function at table index {0}")]
    FunctionPointer(u32),
}

/// Globals the compiled code keeps its stack and heap pointers in
#[derive(Clone)]
struct Registers {
    sp: Global,
    bp: Global,
    hp: Global,
}

pub struct Env {
    memory: Option<Memory>,
    registers: Option<Registers>,
    allocator: Allocator,
    output: String,
    /// Also write printed lines to stdout
    echo: bool,
}

impl Env {
    fn new(echo: bool) -> Self {
        Self {
            memory: None,
            registers: None,
            allocator: Allocator::new(),
            output: String::new(),
            echo,
        }
    }

    fn attach<'a>(&self, store: StoreMut<'a>) -> Result<WasmerMemory<'a>, RuntimeError> {
        match (&self.memory, &self.registers) {
            (Some(memory), Some(registers)) => {
                WasmerMemory::new(memory.clone(), registers.clone(), store)
            }
            _ => Err(RuntimeError::new("memory is not linked yet")),
        }
    }

    fn print(&mut self, line: String) {
        if self.echo {
            println!("{}", line);
        }
        self.output.push_str(&line);
        self.output.push('\n');
    }
}

/// Linear memory of a running instance.
///
/// The registers are read once when attaching and only written back by
/// [`WasmerMemory::finish`].
struct WasmerMemory<'a> {
    memory: Memory,
    registers: Registers,
    store: StoreMut<'a>,
    sp: u32,
    bp: u32,
    hp: u32,
}

fn read_register(global: &Global, store: &mut StoreMut) -> Result<u32, RuntimeError> {
    match global.get(store) {
        Value::I32(value) => Ok(value as u32),
        _ => Err(RuntimeError::new("register is not an i32")),
    }
}

impl<'a> WasmerMemory<'a> {
    fn new(
        memory: Memory,
        registers: Registers,
        mut store: StoreMut<'a>,
    ) -> Result<Self, RuntimeError> {
        let sp = read_register(&registers.sp, &mut store)?;
        let bp = read_register(&registers.bp, &mut store)?;
        let hp = read_register(&registers.hp, &mut store)?;

        Ok(Self {
            memory,
            registers,
            store,
            sp,
            bp,
            hp,
        })
    }

    fn finish(mut self) -> Result<(), RuntimeError> {
        let Registers { sp, bp, hp } = &self.registers;
        sp.set(&mut self.store, Value::I32(self.sp as i32))?;
        bp.set(&mut self.store, Value::I32(self.bp as i32))?;
        hp.set(&mut self.store, Value::I32(self.hp as i32))
    }
}

impl MemoryModel for WasmerMemory<'_> {
    fn size(&self) -> u32 {
        self.memory.view(&self.store).data_size() as u32
    }

    fn grow(&mut self, pages: u32) -> bool {
        self.memory.grow(&mut self.store, Pages(pages)).is_ok()
    }

    fn read_byte(&self, address: u32) -> AResult<u8> {
        self.memory
            .view(&self.store)
            .read_u8(address as u64)
            .map_err(|_| AllocatorError::OutOfBounds(address))
    }

    fn write_byte(&mut self, address: u32, value: u8) -> AResult<()> {
        self.memory
            .view(&self.store)
            .write_u8(address as u64, value)
            .map_err(|_| AllocatorError::OutOfBounds(address))
    }

    fn sp(&self) -> u32 {
        self.sp
    }

    fn set_sp(&mut self, value: u32) {
        self.sp = value;
    }

    fn bp(&self) -> u32 {
        self.bp
    }

    fn set_bp(&mut self, value: u32) {
        self.bp = value;
    }

    fn hp(&self) -> u32 {
        self.hp
    }

    fn set_hp(&mut self, value: u32) {
        self.hp = value;
    }
}

fn trap(err: AllocatorError) -> RuntimeError {
    RuntimeError::new(err.to_string())
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{:.6}", value)
    }
}

fn print_int(mut ctx: FunctionEnvMut<Env>, value: i32) {
    ctx.data_mut().print(value.to_string());
}

fn print_int_unsigned(mut ctx: FunctionEnvMut<Env>, value: i32) {
    ctx.data_mut().print((value as u32).to_string());
}

fn print_char(mut ctx: FunctionEnvMut<Env>, value: i32) {
    ctx.data_mut().print((value as u8 as char).to_string());
}

fn print_long(mut ctx: FunctionEnvMut<Env>, value: i64) {
    ctx.data_mut().print(value.to_string());
}

fn print_long_unsigned(mut ctx: FunctionEnvMut<Env>, value: i64) {
    ctx.data_mut().print((value as u64).to_string());
}

fn print_float(mut ctx: FunctionEnvMut<Env>, value: f32) {
    ctx.data_mut().print(format_float(value as f64));
}

fn print_double(mut ctx: FunctionEnvMut<Env>, value: f64) {
    ctx.data_mut().print(format_float(value));
}

fn print_address(mut ctx: FunctionEnvMut<Env>, value: i32) {
    ctx.data_mut().print((value as u32).to_string());
}

fn print_string(mut ctx: FunctionEnvMut<Env>, address: i32) -> Result<(), RuntimeError> {
    let (env, store) = ctx.data_and_store_mut();
    let memory = env.attach(store)?;
    let bytes = memory.read_c_string(address as u32).map_err(trap)?;

    env.print(String::from_utf8_lossy(&bytes).into_owned());
    Ok(())
}

fn malloc(mut ctx: FunctionEnvMut<Env>, size: i32) -> Result<i32, RuntimeError> {
    let (env, store) = ctx.data_and_store_mut();
    let mut memory = env.attach(store)?;
    let address = env
        .allocator
        .malloc(&mut memory, size as u32)
        .map_err(trap)?;

    memory.finish()?;
    Ok(address as i32)
}

fn free(mut ctx: FunctionEnvMut<Env>, address: i32) -> Result<(), RuntimeError> {
    ctx.data_mut().allocator.free(address as u32).map_err(trap)
}

fn stdlib_imports(store: &mut Store, env: &FunctionEnv<Env>) -> Imports {
    imports! {
        MODULE_NAME => {
            Builtin::PrintInt.name() => Function::new_typed_with_env(store, env, print_int),
            Builtin::PrintIntUnsigned.name() => Function::new_typed_with_env(store, env, print_int_unsigned),
            Builtin::PrintChar.name() => Function::new_typed_with_env(store, env, print_char),
            Builtin::PrintLong.name() => Function::new_typed_with_env(store, env, print_long),
            Builtin::PrintLongUnsigned.name() => Function::new_typed_with_env(store, env, print_long_unsigned),
            Builtin::PrintFloat.name() => Function::new_typed_with_env(store, env, print_float),
            Builtin::PrintDouble.name() => Function::new_typed_with_env(store, env, print_double),
            Builtin::PrintAddress.name() => Function::new_typed_with_env(store, env, print_address),
            Builtin::PrintString.name() => Function::new_typed_with_env(store, env, print_string),
            Builtin::Malloc.name() => Function::new_typed_with_env(store, env, malloc),
            Builtin::Free.name() => Function::new_typed_with_env(store, env, free),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Value returned by `main`
    pub exit_code: i32,
    /// Everything printed, one line per print call
    pub output: String,
}

fn register(instance: &Instance, name: &'static str) -> Result<Global, HostError> {
    Ok(instance.exports.get_global(name)?.clone())
}

/// An instantiated module with the stdlib linked in.
pub struct Runner {
    store: Store,
    instance: Instance,
    env: FunctionEnv<Env>,
    memory: Memory,
    registers: Registers,
}

impl Runner {
    pub fn new(wasm: &[u8], echo: bool) -> Result<Self, HostError> {
        let mut store = Store::default();
        let module = Module::new(&store, wasm)?;

        let env = FunctionEnv::new(&mut store, Env::new(echo));
        let import_object = stdlib_imports(&mut store, &env);
        let instance = Instance::new(&mut store, &module, &import_object)?;

        let memory = instance.exports.get_memory("memory")?.clone();
        let registers = Registers {
            sp: register(&instance, "sp")?,
            bp: register(&instance, "bp")?,
            hp: register(&instance, "hp")?,
        };

        let env_data = env.as_mut(&mut store);
        env_data.memory = Some(memory.clone());
        env_data.registers = Some(registers.clone());

        Ok(Self {
            store,
            instance,
            env,
            memory,
            registers,
        })
    }

    fn attach(&mut self) -> Result<WasmerMemory<'_>, RuntimeError> {
        WasmerMemory::new(
            self.memory.clone(),
            self.registers.clone(),
            self.store.as_store_mut(),
        )
    }

    /// Calls `main` in the frame the module starts with and returns its
    /// result.
    pub fn call_main(&mut self) -> Result<i32, HostError> {
        let main_fn = self.instance.exports.get_function("main")?.clone();
        main_fn.call(&mut self.store, &[])?;

        // main writes its result into the return slot above its saved bp
        let memory = self.attach()?;
        let exit_code = memory.read_u32(memory.bp() + 4)? as i32;

        debug!(exit_code, "main returned");
        Ok(exit_code)
    }

    /// Calls entry `index` of the function table the way compiled code
    /// calls a function pointer. The frame size comes from the frame table
    /// at `frame_table_offset`, `args` holds one value per parameter cell.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn call_function_pointer(
        &mut self,
        frame_table_offset: u32,
        index: u32,
        layout: &FunctionLayout,
        args: &[ScalarValue],
    ) -> Result<Vec<ScalarValue>, HostError> {
        let function = match self
            .instance
            .exports
            .get_table("table")?
            .get(&mut self.store, index)
        {
            Some(Value::FuncRef(Some(function))) => function,
            _ => return Err(HostError::FunctionPointer(index)),
        };

        let mut memory = self.attach()?;
        let frame_size = memory.read_u32(frame_table_offset + index * 4)?;
        load_stack_frame(&mut memory, layout, frame_size, args)?;
        memory.finish()?;

        function.call(&mut self.store, &[])?;

        let mut memory = self.attach()?;
        let values = read_return_values(&memory, layout)?;
        tear_down_stack_frame(&mut memory, layout)?;
        memory.finish()?;

        Ok(values)
    }

    pub fn output(&self) -> String {
        self.env.as_ref(&self.store).output.clone()
    }
}

/// Instantiates `wasm`, calls its `main` and collects what it printed.
pub fn run(wasm: &[u8], echo: bool) -> Result<RunOutcome, HostError> {
    let mut runner = Runner::new(wasm, echo)?;
    let exit_code = runner.call_main()?;

    Ok(RunOutcome {
        exit_code,
        output: runner.output(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cwasmc::processor::ast::ProcessedProgram;
    use cwasmc::{compile_program, compile_to_processed_ast, CompilerOptions};

    fn run_source(source: &str) -> RunOutcome {
        let output = cwasmc::compile(source)
            .unwrap_or_else(|e| panic!("{}", e.render("test.c", source)));
        run(&output.wasm, false).unwrap_or_else(|e| panic!("{}\n{}", e, output.wat))
    }

    #[test]
    fn main_returns_a_local() {
        let outcome = run_source("int main(void) { int x = 10; return x; }");
        assert_eq!(outcome.exit_code, 10);
        assert!(outcome.output.is_empty());
    }

    #[test]
    fn globals_live_in_the_data_segment() {
        let outcome = run_source("int x = 5; int main(void) { x = x + 3; return x; }");
        assert_eq!(outcome.exit_code, 8);
    }

    #[test]
    fn calls_pass_arguments_and_return_values() {
        let outcome = run_source("int f(int a) { return a * 2; } int main(void) { return f(4); }");
        assert_eq!(outcome.exit_code, 8);
    }

    #[test]
    fn recursion() {
        let outcome = run_source(
            "long fib(long n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
             int main(void) { print_long(fib(10)); return fib(7); }",
        );
        assert_eq!(outcome.exit_code, 13);
        assert_eq!(outcome.output, "55\n");
    }

    #[test]
    fn printing_builtins() {
        let outcome = run_source(
            "int main(void) {
                print_int(-3);
                print_int_unsigned(7);
                print_char('A');
                print_long_unsigned(42);
                print_float(0.25);
                print_double(1.5);
                print_string(\"hello\");
                return 0;
            }",
        );
        assert_eq!(
            outcome.output,
            "-3\n7\nA\n42\n0.250000\n1.500000\nhello\n"
        );
    }

    #[test]
    fn malloc_reuses_freed_blocks() {
        let outcome = run_source(
            "int main(void) {
                int *a = malloc(16);
                int *b = malloc(16);
                print_address(b);
                free(a);
                int *c = malloc(8);
                *c = 40;
                c[1] = 2;
                return (c == a) + c[0] + c[1];
            }",
        );
        assert_eq!(outcome.output, "16\n");
        assert_eq!(outcome.exit_code, 43);
    }

    #[test]
    fn function_pointers_and_loops() {
        let outcome = run_source(
            "int square(int x) { return x * x; }
             int apply(int (*f)(int), int x) { return f(x); }
             int main(void) {
                int total = 0;
                for (int i = 1; i <= 3; i++) total += apply(square, i);
                switch (total) { case 14: total = 1; break; default: total = 0; }
                return total;
             }",
        );
        assert_eq!(outcome.exit_code, 1);
    }

    #[test]
    fn deep_recursion_grows_the_stack() {
        let outcome = run_source(
            "int depth(int n) {
                int pad[64];
                pad[63] = n;
                if (n == 0) return 0;
                return depth(n - 1) + pad[63] - n + 1;
             }
             int main(void) { return depth(1000); }",
        );
        assert_eq!(outcome.exit_code, 1000);
    }

    #[test]
    fn heap_growth_moves_a_live_stack() {
        let outcome = run_source(
            "int fill(int n) {
                if (n == 0) { char *big = malloc(70000); big[69999] = 7; return big[69999]; }
                int local = n;
                return fill(n - 1) + local - n;
             }
             int main(void) { return fill(20); }",
        );
        assert_eq!(outcome.exit_code, 7);
    }

    #[test]
    fn freeing_an_unknown_address_traps() {
        let output = cwasmc::compile("int x; int main(void) { free(&x + 1); return 0; }").unwrap();
        let err = run(&output.wasm, false).unwrap_err();

        assert!(err
            .to_string()
            .contains("free(): No allocated block with given address"));
    }

    #[test]
    fn pointer_arguments_survive_stack_growth() {
        let outcome = run_source(
            "int set(int *p, int n) { int pad[20000]; pad[0] = 0; *p = n; return pad[0]; }
             int main(void) { int x = 1; set(&x, 9); return x; }",
        );
        assert_eq!(outcome.exit_code, 9);
    }

    #[test]
    fn indexed_stores_of_call_results_survive_stack_growth() {
        let g = "int g(void) { int pad[20000]; pad[0] = 5; return pad[0]; }";

        let outcome = run_source(&format!(
            "{} int main(void) {{ int a[2]; int i = 1; a[1] = 0; a[i] = g(); return a[1]; }}",
            g
        ));
        assert_eq!(outcome.exit_code, 5);

        let outcome = run_source(&format!(
            "{} int main(void) {{ int a[2]; int i = 1; a[1] = 1; a[i] += g(); return a[1]; }}",
            g
        ));
        assert_eq!(outcome.exit_code, 6);
    }

    fn runner_for(source: &str) -> (Runner, ProcessedProgram, u32) {
        let program = compile_to_processed_ast(source).unwrap();
        let output = compile_program(&program, &CompilerOptions::default()).unwrap();
        let runner = Runner::new(&output.wasm, false).unwrap();
        (runner, program, output.frame_table_offset)
    }

    fn table_index(program: &ProcessedProgram, name: &str) -> u32 {
        program
            .function_table
            .iter()
            .position(|entry| entry == name)
            .unwrap() as u32
    }

    #[test]
    fn host_calls_through_the_function_table() {
        let (mut runner, program, frame_table) = runner_for(
            "int square(int x) { int y = x * x; return y; }
             double scale(char c, double d) { print_char(c); return d * 2; }
             int main(void) { int (*f)(int) = square; double (*g)(char, double) = scale; return f(3); }",
        );
        assert_eq!(runner.call_main().unwrap(), 9);

        let before = {
            let memory = runner.attach().unwrap();
            (memory.sp(), memory.bp())
        };

        let square = program.function("square").unwrap();
        let values = runner
            .call_function_pointer(
                frame_table,
                table_index(&program, "square"),
                &square.layout,
                &[ScalarValue::I32(7)],
            )
            .unwrap();
        assert_eq!(values, vec![ScalarValue::I32(49)]);

        let scale = program.function("scale").unwrap();
        let values = runner
            .call_function_pointer(
                frame_table,
                table_index(&program, "scale"),
                &scale.layout,
                &[ScalarValue::I32('z' as i32), ScalarValue::F64(1.25)],
            )
            .unwrap();
        assert_eq!(values, vec![ScalarValue::F64(2.5)]);
        assert_eq!(runner.output(), "z\n");

        let memory = runner.attach().unwrap();
        assert_eq!((memory.sp(), memory.bp()), before);
    }

    #[test]
    fn host_calls_grow_the_stack_when_needed() {
        let (mut runner, program, frame_table) = runner_for(
            "int big(int n) { int pad[20000]; pad[19999] = n; return pad[19999] + 1; }
             int main(void) { int (*f)(int) = big; return 0; }",
        );
        runner.call_main().unwrap();

        let big = program.function("big").unwrap();
        let values = runner
            .call_function_pointer(frame_table, table_index(&program, "big"), &big.layout, &[ScalarValue::I32(41)])
            .unwrap();
        assert_eq!(values, vec![ScalarValue::I32(42)]);
    }

    #[test]
    fn unknown_table_entries_are_errors() {
        let (mut runner, program, frame_table) =
            runner_for("int one(void) { return 1; } int main(void) { int (*f)(void) = one; return f(); }");
        runner.call_main().unwrap();

        let one = program.function("one").unwrap();
        let err = runner
            .call_function_pointer(frame_table, 5, &one.layout, &[])
            .unwrap_err();
        assert!(matches!(err, HostError::FunctionPointer(5)));
    }
}
