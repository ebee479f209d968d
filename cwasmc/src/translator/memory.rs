//! Memory access and the stack-frame calling convention.
//!
//! A frame looks like this, addresses growing to the right:
//!
//! ```text
//! sp                  bp           bp+4            bp+4+R
//! | params | locals   | saved bp   | return slot   | caller frame ...
//! ```
//!
//! The callee never touches `sp` or `bp`, the caller builds and tears down
//! the frame around the `call`.

use super::{
    translator::{global_add, FunctionTranslator},
    wat_ast::{Instr, MemoryOp, NumericOp, Register, WatFunction, GROW_STACK},
};
use crate::{
    errors::errors::{TResult, TranslationError},
    processor::ast::{Address, Callee, ExpressionP, FunctionCallP, ReturnMode},
    types::types::{ScalarType, WasmType, POINTER_SIZE},
};

pub fn load_op(data_type: ScalarType) -> MemoryOp {
    match (data_type.wasm_type(), data_type.size(), data_type.is_signed()) {
        (WasmType::I64, ..) => MemoryOp::I64Load,
        (WasmType::F32, ..) => MemoryOp::F32Load,
        (WasmType::F64, ..) => MemoryOp::F64Load,
        (WasmType::I32, 1, true) => MemoryOp::I32Load8S,
        (WasmType::I32, 1, false) => MemoryOp::I32Load8U,
        (WasmType::I32, 2, true) => MemoryOp::I32Load16S,
        (WasmType::I32, 2, false) => MemoryOp::I32Load16U,
        (WasmType::I32, ..) => MemoryOp::I32Load,
    }
}

pub fn store_op(data_type: ScalarType) -> MemoryOp {
    match (data_type.wasm_type(), data_type.size()) {
        (WasmType::I64, _) => MemoryOp::I64Store,
        (WasmType::F32, _) => MemoryOp::F32Store,
        (WasmType::F64, _) => MemoryOp::F64Store,
        (WasmType::I32, 1) => MemoryOp::I32Store8,
        (WasmType::I32, 2) => MemoryOp::I32Store16,
        (WasmType::I32, _) => MemoryOp::I32Store,
    }
}

/// Frame size of a callee, known statically for direct calls and read from
/// the frame table for calls through a pointer.
enum FrameSize {
    Static(u32),
    Local(u32),
}

impl FrameSize {
    fn push_plus(&self, extra: u32, out: &mut Vec<Instr>) {
        match self {
            FrameSize::Static(size) => out.push(Instr::I32Const((size + extra) as i32)),
            FrameSize::Local(local) => {
                out.push(Instr::LocalGet(*local));
                if extra > 0 {
                    out.extend([Instr::I32Const(extra as i32), NumericOp::I32Add.into()]);
                }
            }
        }
    }
}

impl FunctionTranslator<'_> {
    /// Pushes the base of `address` and returns the static offset to put in
    /// the memory instruction.
    pub(super) fn translate_address(
        &mut self,
        address: &Address,
        out: &mut Vec<Instr>,
    ) -> TResult<u32> {
        match address {
            Address::Local { offset } => {
                out.push(Instr::GlobalGet(Register::Bp));
                if self.frame_size() > 0 {
                    out.extend([
                        Instr::I32Const(self.frame_size() as i32),
                        NumericOp::I32Sub.into(),
                    ]);
                }
                Ok(*offset)
            }
            Address::DataSegment { offset } => {
                out.push(Instr::I32Const(*offset as i32));
                Ok(0)
            }
            Address::Dynamic(expr) => {
                self.translate_expression(expr, out)?;
                Ok(0)
            }
            Address::ReturnObject {
                offset,
                mode: ReturnMode::Load,
            } => {
                out.push(Instr::GlobalGet(Register::Sp));
                Ok(*offset)
            }
            Address::ReturnObject {
                offset,
                mode: ReturnMode::Store,
            } => {
                out.push(Instr::GlobalGet(Register::Bp));
                Ok(POINTER_SIZE + offset)
            }
            Address::FunctionTableIndex { index } => Err(TranslationError::new(format!(
                "function table entry {} used as a memory address",
                index
            ))),
        }
    }

    /// Pushes `address` as a pointer value.
    pub(super) fn translate_address_value(
        &mut self,
        address: &Address,
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        let offset = match address {
            Address::Local { offset } => {
                out.extend([
                    Instr::GlobalGet(Register::Bp),
                    Instr::I32Const(self.frame_size() as i32 - *offset as i32),
                    NumericOp::I32Sub.into(),
                ]);
                return Ok(());
            }
            Address::FunctionTableIndex { index } => {
                out.push(Instr::I32Const(*index as i32));
                return Ok(());
            }
            other => self.translate_address(other, out)?,
        };

        if offset > 0 {
            out.extend([Instr::I32Const(offset as i32), NumericOp::I32Add.into()]);
        }

        Ok(())
    }

    pub(super) fn translate_load(
        &mut self,
        address: &Address,
        data_type: ScalarType,
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        let offset = self.translate_address(address, out)?;
        out.push(Instr::Load {
            op: load_op(data_type),
            offset,
        });

        Ok(())
    }

    pub(super) fn translate_store(
        &mut self,
        address: &Address,
        value: &ExpressionP,
        data_type: ScalarType,
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        // a call in the value may move the stack, so the address is taken after it
        let spilled = if value.contains_call() {
            let local = self.new_local(data_type.wasm_type());
            self.translate_expression(value, out)?;
            out.push(Instr::LocalSet(local));
            Some(local)
        } else {
            None
        };

        let offset = self.translate_address(address, out)?;

        match spilled {
            Some(local) => out.push(Instr::LocalGet(local)),
            None => self.translate_expression(value, out)?,
        }

        out.push(Instr::Store {
            op: store_op(data_type),
            offset,
        });

        Ok(())
    }

    /// Lowers a call to a defined function: frame setup, the call itself and
    /// teardown. With `keep_return` the return slot stays below `sp`.
    pub(super) fn translate_call(
        &mut self,
        call: &FunctionCallP,
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        let (frame, table_index) = match &call.callee {
            Callee::Direct(name) => {
                let callee = self.program.function(name).ok_or_else(|| {
                    TranslationError::new(format!("call to undefined function '{}'", name))
                })?;
                (FrameSize::Static(callee.frame_size), None)
            }
            Callee::Indirect(expr) => {
                let index = self.new_local(WasmType::I32);
                let frame = self.new_local(WasmType::I32);
                self.translate_expression(expr, out)?;
                out.extend([
                    Instr::LocalTee(index),
                    Instr::I32Const(POINTER_SIZE as i32),
                    NumericOp::I32Mul.into(),
                    Instr::Load {
                        op: MemoryOp::I32Load,
                        offset: self.program.frame_table_offset,
                    },
                    Instr::LocalSet(frame),
                ]);
                (FrameSize::Local(frame), Some(index))
            }
        };

        let args: Vec<_> = call
            .args
            .iter()
            .map(|arg| (self.new_local(arg.cell.data_type.wasm_type()), arg))
            .collect();

        // nested calls may move the stack, they run before the check
        for (local, arg) in args.iter().filter(|(_, arg)| arg.value.contains_call()) {
            self.translate_expression(&arg.value, out)?;
            out.push(Instr::LocalSet(*local));
        }

        let return_size = call.layout.size_of_return;
        self.ensure_stack(&frame, return_size + POINTER_SIZE, out);

        // addresses of stack objects are only taken once the stack is settled
        for (local, arg) in args.iter().filter(|(_, arg)| !arg.value.contains_call()) {
            self.translate_expression(&arg.value, out)?;
            out.push(Instr::LocalSet(*local));
        }

        let args: Vec<_> = args.into_iter().map(|(local, arg)| (local, arg.cell)).collect();

        if return_size > 0 {
            global_add(Register::Sp, -(return_size as i32), out);
        }

        // link to the caller's frame
        global_add(Register::Sp, -(POINTER_SIZE as i32), out);
        out.extend([
            Instr::GlobalGet(Register::Sp),
            Instr::GlobalGet(Register::Bp),
            Instr::Store {
                op: MemoryOp::I32Store,
                offset: 0,
            },
        ]);

        out.push(Instr::GlobalGet(Register::Sp));
        frame.push_plus(0, out);
        out.extend([NumericOp::I32Sub.into(), Instr::GlobalSet(Register::Sp)]);

        for (local, cell) in args {
            out.extend([
                Instr::GlobalGet(Register::Sp),
                Instr::LocalGet(local),
                Instr::Store {
                    op: store_op(cell.data_type),
                    offset: cell.offset,
                },
            ]);
        }

        out.push(Instr::GlobalGet(Register::Sp));
        frame.push_plus(0, out);
        out.extend([NumericOp::I32Add.into(), Instr::GlobalSet(Register::Bp)]);

        match (&call.callee, table_index) {
            (Callee::Direct(name), _) => out.push(Instr::Call(name.clone())),
            (Callee::Indirect(_), Some(index)) => {
                out.extend([Instr::LocalGet(index), Instr::CallIndirect])
            }
            (Callee::Indirect(_), None) => {
                return Err(TranslationError::new("indirect call without a table index"))
            }
        }

        let released = if call.keep_return {
            POINTER_SIZE
        } else {
            POINTER_SIZE + return_size
        };

        out.extend([
            Instr::GlobalGet(Register::Bp),
            Instr::I32Const(released as i32),
            NumericOp::I32Add.into(),
            Instr::GlobalSet(Register::Sp),
            Instr::GlobalGet(Register::Bp),
            Instr::Load {
                op: MemoryOp::I32Load,
                offset: 0,
            },
            Instr::GlobalSet(Register::Bp),
        ]);

        Ok(())
    }

    /// Grows the stack unless `frame + extra` bytes fit between `hp` and `sp`.
    /// Both comparisons are unsigned so a frame larger than `sp` itself
    /// cannot wrap around.
    fn ensure_stack(&mut self, frame: &FrameSize, extra: u32, out: &mut Vec<Instr>) {
        let needed = self.new_local(WasmType::I32);
        frame.push_plus(extra, out);
        out.extend([
            Instr::LocalSet(needed),
            Instr::GlobalGet(Register::Sp),
            Instr::LocalGet(needed),
            NumericOp::I32LtU.into(),
            Instr::GlobalGet(Register::Sp),
            Instr::LocalGet(needed),
            NumericOp::I32Sub.into(),
            Instr::GlobalGet(Register::Hp),
            NumericOp::I32LtU.into(),
            NumericOp::I32Or.into(),
            Instr::If {
                result: None,
                then_body: vec![
                    Instr::LocalGet(needed),
                    Instr::GlobalSet(Register::R1),
                    Instr::Call(GROW_STACK.to_string()),
                ],
                else_body: vec![],
            },
        ]);
    }
}

/// Helper called when a new frame does not fit between `hp` and `sp`.
///
/// Grows memory by enough pages for `r1` bytes, moves the stack to the new
/// top of memory and shifts `sp`, `bp` and every saved base pointer in the
/// frame chain by the same distance.
pub fn grow_stack_function() -> WatFunction {
    use NumericOp::*;

    const PAGES: u32 = 0;
    const OLD_SIZE: u32 = 1;
    const DELTA: u32 = 2;
    const CURSOR: u32 = 3;
    const FRAME: u32 = 4;
    const LINK: u32 = 5;

    let copy = vec![
        Instr::LocalGet(CURSOR),
        Instr::GlobalGet(Register::Sp),
        I32LeU.into(),
        Instr::BrIf("copy_done".to_string()),
        Instr::LocalGet(CURSOR),
        Instr::I32Const(1),
        I32Sub.into(),
        Instr::LocalSet(CURSOR),
        Instr::LocalGet(CURSOR),
        Instr::LocalGet(DELTA),
        I32Add.into(),
        Instr::LocalGet(CURSOR),
        Instr::Load {
            op: MemoryOp::I32Load8U,
            offset: 0,
        },
        Instr::Store {
            op: MemoryOp::I32Store8,
            offset: 0,
        },
        Instr::Br("copy".to_string()),
    ];

    let relink = vec![
        Instr::LocalGet(FRAME),
        Instr::Load {
            op: MemoryOp::I32Load,
            offset: 0,
        },
        Instr::LocalTee(LINK),
        I32Eqz.into(),
        Instr::BrIf("relink_done".to_string()),
        Instr::LocalGet(FRAME),
        Instr::LocalGet(LINK),
        Instr::LocalGet(DELTA),
        I32Add.into(),
        Instr::Store {
            op: MemoryOp::I32Store,
            offset: 0,
        },
        Instr::LocalGet(LINK),
        Instr::LocalGet(DELTA),
        I32Add.into(),
        Instr::LocalSet(FRAME),
        Instr::Br("relink".to_string()),
    ];

    let mut body = vec![
        Instr::GlobalGet(Register::R1),
        Instr::I32Const(65535),
        I32Add.into(),
        Instr::I32Const(16),
        I32ShrU.into(),
        Instr::LocalTee(PAGES),
        Instr::MemoryGrow,
        Instr::LocalTee(OLD_SIZE),
        Instr::I32Const(-1),
        I32Eq.into(),
        Instr::If {
            result: None,
            then_body: vec![Instr::Unreachable],
            else_body: vec![],
        },
        Instr::LocalGet(OLD_SIZE),
        Instr::I32Const(16),
        I32Shl.into(),
        Instr::LocalTee(OLD_SIZE),
        Instr::LocalSet(CURSOR),
        Instr::LocalGet(PAGES),
        Instr::I32Const(16),
        I32Shl.into(),
        Instr::LocalSet(DELTA),
        Instr::Block {
            label: "copy_done".to_string(),
            body: vec![Instr::Loop {
                label: "copy".to_string(),
                body: copy,
            }],
        },
    ];

    global_add_local(Register::Sp, DELTA, &mut body);
    global_add_local(Register::Bp, DELTA, &mut body);

    body.extend([
        Instr::GlobalGet(Register::Bp),
        Instr::LocalSet(FRAME),
        Instr::Block {
            label: "relink_done".to_string(),
            body: vec![Instr::Loop {
                label: "relink".to_string(),
                body: relink,
            }],
        },
    ]);

    WatFunction {
        name: GROW_STACK.to_string(),
        locals: vec![WasmType::I32; 6],
        body,
        export: false,
    }
}

fn global_add_local(register: Register, local: u32, out: &mut Vec<Instr>) {
    out.extend([
        Instr::GlobalGet(register),
        Instr::LocalGet(local),
        NumericOp::I32Add.into(),
        Instr::GlobalSet(register),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::parser::parse_program,
        processor::{ast::StatementP, processor::process},
        translator::translator::translate,
        types::types::PrimaryKind,
    };

    /// Net change of `sp` over a straight-line instruction sequence, counting
    /// only the constant adjustments the call convention makes.
    fn sp_trace(body: &[Instr], frame_size: i64, return_size: i64) -> i64 {
        let mut sp = 0i64;
        let mut bp = 1_000_000i64;
        let caller_bp = bp;
        let mut stack: Vec<i64> = vec![];

        for instr in body {
            match instr {
                Instr::GlobalGet(Register::Sp) => stack.push(sp),
                Instr::GlobalGet(Register::Bp) => stack.push(bp),
                Instr::I32Const(value) => stack.push(i64::from(*value)),
                Instr::Numeric(NumericOp::I32Add) => {
                    let (b, a) = (stack.pop().unwrap(), stack.pop().unwrap());
                    stack.push(a + b);
                }
                Instr::Numeric(NumericOp::I32Sub) => {
                    let (b, a) = (stack.pop().unwrap(), stack.pop().unwrap());
                    stack.push(a - b);
                }
                Instr::GlobalSet(Register::Sp) => sp = stack.pop().unwrap(),
                Instr::GlobalSet(Register::Bp) => bp = stack.pop().unwrap(),
                Instr::Load { op: MemoryOp::I32Load, .. } => {
                    stack.pop();
                    stack.push(caller_bp);
                }
                Instr::Store { .. } => {
                    stack.pop();
                    stack.pop();
                }
                Instr::LocalGet(_) => stack.push(0),
                Instr::Call(_) => {
                    // the callee's frame base
                    assert_eq!(bp, sp + frame_size);
                    assert_eq!(bp, -4 - return_size);
                }
                _ => stack.clear(),
            }
        }

        assert_eq!(bp, caller_bp);
        sp
    }

    fn calls_in(source: &str) -> (Vec<Instr>, u32, u32) {
        let program = process(&parse_program(source).unwrap()).unwrap();
        let module = translate(&program, 1).unwrap();
        let main = module.function("main").unwrap();
        let callee = program.function("f").unwrap();
        (main.body.clone(), callee.frame_size, callee.layout.size_of_return)
    }

    #[test]
    fn statement_call_leaves_sp_unchanged() {
        let (body, frame, ret) = calls_in("int f(int a, long b) { return a; } int main(void) { f(1, 2); return 0; }");
        let mut whole: Vec<_> = body
            .iter()
            .skip_while(|instr| !matches!(instr, Instr::If { .. }))
            .cloned()
            .collect();
        // up to and including the teardown of the call
        let end = whole
            .iter()
            .rposition(|instr| matches!(instr, Instr::GlobalSet(Register::Bp)))
            .unwrap();
        whole.truncate(end + 1);

        assert_eq!(sp_trace(&whole, i64::from(frame), i64::from(ret)), 0);
    }

    #[test]
    fn value_call_keeps_the_return_slot() {
        let program = process(
            &parse_program("int f(int a) { return a * 2; } int main(void) { return f(4); }").unwrap(),
        )
        .unwrap();
        let main = program.function("main").unwrap();

        let call = main
            .body
            .iter()
            .find_map(|statement| match statement {
                StatementP::Store { value, .. } => Some(value.clone()),
                _ => None,
            })
            .unwrap();

        let mut translator = FunctionTranslator::new(&program, main);
        let mut out = vec![];
        translator.translate_expression(&call, &mut out).unwrap();

        // everything up to the release of the return slot
        let release = out
            .iter()
            .rposition(|instr| matches!(instr, Instr::I32Const(4)))
            .unwrap();
        let callee = program.function("f").unwrap();
        let net = sp_trace(&out[..release - 1], i64::from(callee.frame_size), 4);
        assert_eq!(net, -4);
        assert_eq!(sp_trace(&out, i64::from(callee.frame_size), 4), 0);
    }

    #[test]
    fn argument_cells_are_written_relative_to_the_new_frame() {
        let (body, _, _) = calls_in("void f(int a, char b) { } int main(void) { f(7, 'x'); return 0; }");

        let stores: Vec<_> = body
            .windows(3)
            .filter_map(|window| match window {
                [Instr::GlobalGet(Register::Sp), Instr::LocalGet(_), Instr::Store { op, offset }] => {
                    Some((*op, *offset))
                }
                _ => None,
            })
            .collect();

        assert_eq!(stores, vec![(MemoryOp::I32Store8, 4), (MemoryOp::I32Store, 0)]);
    }

    fn translated_call_value(source: &str) -> Vec<Instr> {
        let program = process(&parse_program(source).unwrap()).unwrap();
        let main = program.function("main").unwrap();

        let call = main
            .body
            .iter()
            .find_map(|statement| match statement {
                StatementP::Store { value, .. } if value.contains_call() => Some(value.clone()),
                _ => None,
            })
            .unwrap();

        let mut translator = FunctionTranslator::new(&program, main);
        let mut out = vec![];
        translator.translate_expression(&call, &mut out).unwrap();
        out
    }

    fn is_grow(instr: &Instr) -> bool {
        matches!(
            instr,
            Instr::If { then_body, .. } if then_body.contains(&Instr::Call(GROW_STACK.to_string()))
        )
    }

    #[test]
    fn stack_is_checked_before_argument_addresses_are_taken() {
        let out = translated_call_value(
            "int set(int *p, int n) { int pad[20000]; pad[0] = 0; *p = n; return pad[0]; }
             int main(void) { int x = 1; int r = set(&x, 9); return x; }",
        );

        let grow = out.iter().position(is_grow).unwrap();
        let first_address = out
            .iter()
            .position(|instr| matches!(instr, Instr::GlobalGet(Register::Bp)))
            .unwrap();

        assert!(grow < first_address);
    }

    #[test]
    fn nested_calls_in_arguments_run_before_the_check() {
        let out = translated_call_value(
            "int g(void) { return 3; } int f(int *p, int n) { return n; }
             int main(void) { int x = 1; int r = f(&x, g()); return r; }",
        );

        let checks: Vec<_> = out
            .iter()
            .enumerate()
            .filter(|(_, instr)| is_grow(instr))
            .map(|(index, _)| index)
            .collect();
        let calls: Vec<_> = out
            .iter()
            .enumerate()
            .filter_map(|(index, instr)| match instr {
                Instr::Call(name) if name != GROW_STACK => Some((index, name.as_str())),
                _ => None,
            })
            .collect();

        assert_eq!(checks.len(), 2);
        assert_eq!(calls.iter().map(|(_, name)| *name).collect::<Vec<_>>(), vec!["g", "f"]);
        // g returns before the frame of f is checked
        assert!(calls[0].0 < checks[1]);
    }

    #[test]
    fn stack_check_compares_unsigned() {
        let out = translated_call_value("int f(int a) { return a; } int main(void) { int r = f(1); return r; }");
        let grow = out.iter().position(is_grow).unwrap();
        let condition = &out[..grow];

        assert!(!condition.contains(&Instr::from(NumericOp::I32LtS)));
        assert_eq!(
            condition
                .iter()
                .filter(|instr| **instr == Instr::from(NumericOp::I32LtU))
                .count(),
            2
        );
        assert_eq!(condition.last(), Some(&Instr::from(NumericOp::I32Or)));
    }

    #[test]
    fn memory_ops_follow_the_cell_type() {
        let char_type = ScalarType::Primary(PrimaryKind::UnsignedChar);
        assert_eq!(load_op(char_type), MemoryOp::I32Load8U);
        assert_eq!(load_op(ScalarType::Primary(PrimaryKind::SignedShort)), MemoryOp::I32Load16S);
        assert_eq!(load_op(ScalarType::Pointer), MemoryOp::I32Load);
        assert_eq!(load_op(ScalarType::Primary(PrimaryKind::Double)), MemoryOp::F64Load);
        assert_eq!(store_op(char_type), MemoryOp::I32Store8);
        assert_eq!(store_op(ScalarType::Primary(PrimaryKind::UnsignedLong)), MemoryOp::I64Store);
    }

    #[test]
    fn grow_helper_traps_when_memory_cannot_grow() {
        let helper = grow_stack_function();
        assert_eq!(helper.name, GROW_STACK);
        assert!(helper.body.iter().any(|instr| matches!(
            instr,
            Instr::If { then_body, .. } if then_body == &vec![Instr::Unreachable]
        )));
        assert!(helper.body.contains(&Instr::MemoryGrow));
    }
}
