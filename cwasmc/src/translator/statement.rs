use super::{
    translator::{global_add, FunctionTranslator, LabelScope},
    wat_ast::{Instr, NumericOp, Register},
};
use crate::{
    errors::errors::{TResult, TranslationError},
    processor::ast::{ExpressionP, StatementP, SwitchCaseP},
    types::types::WasmType,
};

impl FunctionTranslator<'_> {
    pub(super) fn translate_statements(
        &mut self,
        statements: &[StatementP],
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        for statement in statements {
            self.translate_statement(statement, out)?;
        }

        Ok(())
    }

    fn translate_statement(&mut self, statement: &StatementP, out: &mut Vec<Instr>) -> TResult<()> {
        match statement {
            StatementP::Store {
                address,
                value,
                data_type,
            } => self.translate_store(address, value, *data_type, out)?,

            StatementP::FunctionCall(call) => self.translate_call(call, out)?,

            StatementP::ReleaseReturn { size } => {
                global_add(Register::Sp, *size as i32, out)
            }

            StatementP::HostCall { builtin, args } => {
                for arg in args {
                    self.translate_expression(arg, out)?;
                }
                out.push(Instr::Call(builtin.name().to_string()));
                if builtin.wasm_result().is_some() {
                    out.push(Instr::Drop);
                }
            }

            StatementP::Expression(expr) => {
                self.translate_expression(expr, out)?;
                out.push(Instr::Drop);
            }

            StatementP::Selection {
                condition,
                then_branch,
                else_branch,
            } => {
                self.translate_expression(condition, out)?;

                let mut then_body = vec![];
                self.translate_statements(then_branch, &mut then_body)?;
                let mut else_body = vec![];
                self.translate_statements(else_branch, &mut else_body)?;

                out.push(Instr::If {
                    result: None,
                    then_body,
                    else_body,
                });
            }

            StatementP::While { condition, body } => self.translate_while(condition, body, out)?,

            StatementP::DoWhile { condition, body } => {
                self.translate_do_while(condition, body, out)?
            }

            StatementP::For {
                clause,
                condition,
                update,
                body,
            } => {
                self.translate_statements(clause, out)?;
                self.translate_for(condition.as_ref(), update, body, out)?;
            }

            StatementP::Switch {
                expression,
                cases,
                default,
            } => self.translate_switch(expression, cases, default, out)?,

            StatementP::Return => out.push(Instr::Return),
            StatementP::Break => out.push(Instr::Br(self.break_label()?)),
            StatementP::Continue => out.push(Instr::Br(self.continue_label()?)),
        }

        Ok(())
    }

    /// Branches to `label` when the i32 condition is false.
    fn exit_unless(
        &mut self,
        condition: &ExpressionP,
        label: &str,
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        self.translate_expression(condition, out)?;
        out.extend([NumericOp::I32Eqz.into(), Instr::BrIf(label.to_string())]);
        Ok(())
    }

    fn translate_while(
        &mut self,
        condition: &ExpressionP,
        body: &[StatementP],
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        let break_label = self.new_label("block");
        let loop_label = self.new_label("loop");

        let mut inner = vec![];
        self.exit_unless(condition, &break_label, &mut inner)?;

        let scope = LabelScope::Loop {
            break_label: break_label.clone(),
            continue_label: loop_label.clone(),
        };
        self.with_labels(scope, |this| this.translate_statements(body, &mut inner))?;
        inner.push(Instr::Br(loop_label.clone()));

        out.push(Instr::Block {
            label: break_label,
            body: vec![Instr::Loop {
                label: loop_label,
                body: inner,
            }],
        });

        Ok(())
    }

    fn translate_do_while(
        &mut self,
        condition: &ExpressionP,
        body: &[StatementP],
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        let break_label = self.new_label("block");
        let loop_label = self.new_label("loop");
        let continue_label = self.new_label("continue");

        let scope = LabelScope::Loop {
            break_label: break_label.clone(),
            continue_label: continue_label.clone(),
        };
        let mut iteration = vec![];
        self.with_labels(scope, |this| this.translate_statements(body, &mut iteration))?;

        let mut inner = vec![Instr::Block {
            label: continue_label,
            body: iteration,
        }];
        self.translate_expression(condition, &mut inner)?;
        inner.push(Instr::BrIf(loop_label.clone()));

        out.push(Instr::Block {
            label: break_label,
            body: vec![Instr::Loop {
                label: loop_label,
                body: inner,
            }],
        });

        Ok(())
    }

    fn translate_for(
        &mut self,
        condition: Option<&ExpressionP>,
        update: &[StatementP],
        body: &[StatementP],
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        let break_label = self.new_label("block");
        let loop_label = self.new_label("loop");
        let continue_label = self.new_label("continue");

        let mut inner = vec![];
        if let Some(condition) = condition {
            self.exit_unless(condition, &break_label, &mut inner)?;
        }

        let scope = LabelScope::Loop {
            break_label: break_label.clone(),
            continue_label: continue_label.clone(),
        };
        let mut iteration = vec![];
        self.with_labels(scope, |this| this.translate_statements(body, &mut iteration))?;

        inner.push(Instr::Block {
            label: continue_label,
            body: iteration,
        });
        self.translate_statements(update, &mut inner)?;
        inner.push(Instr::Br(loop_label.clone()));

        out.push(Instr::Block {
            label: break_label,
            body: vec![Instr::Loop {
                label: loop_label,
                body: inner,
            }],
        });

        Ok(())
    }

    /// Lowers a switch to nested blocks, one per case with the default
    /// outermost, entered through a `br_table` on the matching case index.
    /// Leaving a case block falls through into the next case's body.
    fn translate_switch(
        &mut self,
        expression: &ExpressionP,
        cases: &[SwitchCaseP],
        default: &[StatementP],
        out: &mut Vec<Instr>,
    ) -> TResult<()> {
        let value_type = expression.data_type().wasm_type();
        let (constant, not_equal): (fn(i128) -> Instr, NumericOp) = match value_type {
            WasmType::I32 => (|value: i128| Instr::I32Const(value as i32), NumericOp::I32Ne),
            WasmType::I64 => (|value: i128| Instr::I64Const(value as i64), NumericOp::I64Ne),
            other => {
                return Err(TranslationError::new(format!(
                    "switch on a value of type {}",
                    other.name()
                )))
            }
        };

        let value = self.new_local(value_type);
        self.translate_expression(expression, out)?;
        out.push(Instr::LocalSet(value));

        let break_label = self.new_label("block");
        let default_label = self.new_label("default");
        let case_labels: Vec<_> = cases.iter().map(|_| self.new_label("case")).collect();

        // index of the first matching case, `cases.len()` when none match
        let mut dispatch = vec![Instr::I32Const(cases.len() as i32)];
        for (index, case) in cases.iter().enumerate().rev() {
            dispatch.extend([
                Instr::I32Const(index as i32),
                Instr::LocalGet(value),
                constant(case.value),
                not_equal.into(),
                Instr::Select,
            ]);
        }
        dispatch.push(Instr::BrTable {
            labels: case_labels.clone(),
            default: default_label.clone(),
        });

        let scope = LabelScope::Switch {
            break_label: break_label.clone(),
        };
        self.with_labels(scope, |this| {
            let mut inner = dispatch;
            for (case, label) in cases.iter().zip(case_labels) {
                let mut next = vec![Instr::Block { label, body: inner }];
                this.translate_statements(&case.body, &mut next)?;
                inner = next;
            }

            let mut outer = vec![Instr::Block {
                label: default_label,
                body: inner,
            }];
            this.translate_statements(default, &mut outer)?;

            out.push(Instr::Block {
                label: break_label,
                body: outer,
            });

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::parser::parse_program,
        processor::processor::process,
        translator::translator::translate,
    };

    fn main_body(source: &str) -> Vec<Instr> {
        let program = process(&parse_program(source).unwrap()).unwrap();
        translate(&program, 1)
            .unwrap()
            .function("main")
            .unwrap()
            .body
            .clone()
    }

    fn find_block<'a>(body: &'a [Instr], prefix: &str) -> Option<&'a Vec<Instr>> {
        body.iter().find_map(|instr| match instr {
            Instr::Block { label, body } if label.starts_with(prefix) => Some(body),
            _ => None,
        })
    }

    #[test]
    fn while_loops_exit_on_a_false_condition() {
        let body = main_body("int main(void) { int i = 0; while (i < 3) { i++; } return i; }");
        let block = find_block(&body, "block").unwrap();

        let Instr::Loop { label, body: inner } = &block[0] else {
            panic!("expected a loop, got {:?}", block[0]);
        };
        assert_eq!(inner.last(), Some(&Instr::Br(label.clone())));
        assert!(inner.contains(&Instr::BrIf("block_0".to_string())));
    }

    #[test]
    fn continue_in_a_for_loop_runs_the_update() {
        let body = main_body(
            "int main(void) { int s = 0; for (int i = 0; i < 3; i++) { if (i) continue; s++; } return s; }",
        );
        let block = find_block(&body, "block").unwrap();
        let Instr::Loop { body: inner, .. } = &block[0] else {
            panic!("expected a loop");
        };

        let iteration = find_block(inner, "continue").unwrap();
        let Instr::If { then_body, .. } = iteration
            .iter()
            .find(|instr| matches!(instr, Instr::If { .. }))
            .unwrap()
        else {
            unreachable!()
        };
        assert_eq!(then_body, &vec![Instr::Br("continue_2".to_string())]);
    }

    #[test]
    fn break_leaves_the_innermost_construct() {
        let body = main_body(
            "int main(void) { int i = 0; while (1) { switch (i) { case 0: break; } break; } return i; }",
        );

        let loop_block = find_block(&body, "block").unwrap();
        let Instr::Loop { body: inner, .. } = &loop_block[0] else {
            panic!("expected a loop");
        };
        assert_eq!(inner.iter().rev().nth(1), Some(&Instr::Br("block_0".to_string())));

        let switch_block = find_block(inner, "block").unwrap();
        let default_block = find_block(switch_block, "default").unwrap();
        let case_body_end = default_block.last().unwrap();
        assert_eq!(case_body_end, &Instr::Br("block_2".to_string()));
    }

    #[test]
    fn switch_dispatches_through_a_branch_table() {
        let body = main_body(
            "int main(void) { int x = 2; int r = 0; switch (x) { case 1: r = 10; case 2: r += 20; break; default: r = 5; } return r; }",
        );

        let switch_block = find_block(&body, "block").unwrap();
        let default_block = find_block(switch_block, "default").unwrap();
        let case_1 = find_block(default_block, "case").unwrap();
        let case_0 = find_block(case_1, "case").unwrap();

        assert_eq!(
            case_0.last(),
            Some(&Instr::BrTable {
                labels: vec!["case_2".to_string(), "case_3".to_string()],
                default: "default_1".to_string(),
            })
        );
        assert_eq!(
            &case_0[..6],
            &[
                Instr::I32Const(2),
                Instr::I32Const(1),
                Instr::LocalGet(0),
                Instr::I32Const(2),
                NumericOp::I32Ne.into(),
                Instr::Select,
            ]
        );
        // the default body follows its block inside the break block
        assert!(matches!(switch_block.last(), Some(Instr::Store { .. })));
    }

    #[test]
    fn do_while_continues_at_the_condition() {
        let body = main_body("int main(void) { int i = 0; do { i++; continue; } while (i < 3); return i; }");
        let block = find_block(&body, "block").unwrap();
        let Instr::Loop { label, body: inner } = &block[0] else {
            panic!("expected a loop");
        };

        let iteration = find_block(inner, "continue").unwrap();
        assert_eq!(iteration.last(), Some(&Instr::Br("continue_2".to_string())));
        assert_eq!(inner.last(), Some(&Instr::BrIf(label.clone())));
    }
}
