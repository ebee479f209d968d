use super::{
    ast::{Address, ProcessedExpression, ReturnMode, StatementP, SwitchCaseP},
    constant::Constant,
    expression::{convert, discard_value},
    processor::Processor,
    symbol_table::ScopeKind,
};
use crate::{
    errors::errors::{ProcResult, ProcessingError},
    parser::ast::{
        BlockItem, ForClause, ForStatement, IfStatement, ReturnStatement, Statement,
        SwitchStatement, WhileStatement,
    },
    types::{
        layout::unpack,
        types::{stringify, DataType, ScalarType},
    },
};

impl Processor {
    pub(super) fn process_block_items(&mut self, items: &[BlockItem]) -> ProcResult<Vec<StatementP>> {
        let mut statements = vec![];

        for item in items {
            match item {
                BlockItem::Declaration(declaration) => {
                    statements.extend(self.process_local_declaration(declaration)?)
                }
                BlockItem::Enum(declaration) => self.process_enum(declaration)?,
                BlockItem::Tag(declaration) => return Err(Self::unsupported_tag(declaration)),
                BlockItem::Statement(statement) => {
                    statements.extend(self.process_statement(statement)?)
                }
            }
        }

        Ok(statements)
    }

    /// Statements run in a fresh block scope.
    fn process_scoped(&mut self, statement: &Statement) -> ProcResult<Vec<StatementP>> {
        self.symbol_table.enter_scope(ScopeKind::Block);
        let result = self.process_statement(statement);
        self.symbol_table.exit_scope();

        result
    }

    pub(super) fn process_statement(&mut self, statement: &Statement) -> ProcResult<Vec<StatementP>> {
        let position = statement.position();

        match statement {
            Statement::Block(block) => {
                self.symbol_table.enter_scope(ScopeKind::Block);
                let result = self.process_block_items(&block.items);
                self.symbol_table.exit_scope();

                result
            }

            Statement::Expression(expr) => Ok(discard_value(self.process_expression(expr)?)),

            Statement::Empty(_) => Ok(vec![]),

            Statement::If(IfStatement {
                condition,
                then_branch,
                else_branch,
                ..
            }) => {
                let condition = self.process_condition(condition)?;
                let then_branch = self.process_scoped(then_branch)?;
                let else_branch = match else_branch {
                    Some(else_branch) => self.process_scoped(else_branch)?,
                    None => vec![],
                };

                Ok(vec![StatementP::Selection {
                    condition,
                    then_branch,
                    else_branch,
                }])
            }

            Statement::While(WhileStatement {
                condition, body, ..
            }) => {
                let condition = self.process_condition(condition)?;
                let body = self.process_loop_body(body)?;

                Ok(vec![StatementP::While { condition, body }])
            }

            Statement::DoWhile(WhileStatement {
                condition, body, ..
            }) => {
                let body = self.process_loop_body(body)?;
                let condition = self.process_condition(condition)?;

                Ok(vec![StatementP::DoWhile { condition, body }])
            }

            Statement::For(statement) => {
                self.symbol_table.enter_scope(ScopeKind::Block);
                let result = self.process_for(statement);
                self.symbol_table.exit_scope();

                result
            }

            Statement::Switch(statement) => {
                self.symbol_table.enter_scope(ScopeKind::Block);
                self.breakable_depth += 1;
                let result = self.process_switch(statement);
                self.breakable_depth -= 1;
                self.symbol_table.exit_scope();

                result.map_err(|e| e.with_position(position))
            }

            Statement::Break(_) => {
                if self.breakable_depth == 0 {
                    return Err(ProcessingError::new(
                        "Break statement cannot be present outside a loop or switch body",
                    )
                    .with_position(position));
                }

                Ok(vec![StatementP::Break])
            }

            Statement::Continue(_) => {
                if self.loop_depth == 0 {
                    return Err(ProcessingError::new(
                        "Continue statement cannot be present outside a loop body",
                    )
                    .with_position(position));
                }

                Ok(vec![StatementP::Continue])
            }

            Statement::Return(statement) => self
                .process_return(statement)
                .map_err(|e| e.with_position(position)),
        }
    }

    fn process_loop_body(&mut self, body: &Statement) -> ProcResult<Vec<StatementP>> {
        self.loop_depth += 1;
        self.breakable_depth += 1;
        let result = self.process_scoped(body);
        self.loop_depth -= 1;
        self.breakable_depth -= 1;

        result
    }

    fn process_for(&mut self, statement: &ForStatement) -> ProcResult<Vec<StatementP>> {
        let clause = match &statement.clause {
            Some(ForClause::Declarations(declarations)) => {
                let mut statements = vec![];
                for declaration in declarations {
                    statements.extend(self.process_local_declaration(declaration)?);
                }
                statements
            }
            Some(ForClause::Expression(expr)) => discard_value(self.process_expression(expr)?),
            None => vec![],
        };

        let condition = match &statement.condition {
            Some(condition) => Some(self.process_condition(condition)?),
            None => None,
        };

        let update = match &statement.update {
            Some(update) => discard_value(self.process_expression(update)?),
            None => vec![],
        };

        let body = self.process_loop_body(&statement.body)?;

        Ok(vec![StatementP::For {
            clause,
            condition,
            update,
            body,
        }])
    }

    fn process_switch(&mut self, statement: &SwitchStatement) -> ProcResult<Vec<StatementP>> {
        let operand = self.process_operand(&statement.expression)?;

        let Some(kind) = operand.kind().filter(|kind| kind.is_integral()) else {
            return Err(ProcessingError::new("switch quantity not an integer")
                .with_position(statement.expression.position));
        };

        let kind = kind.promoted();
        let expression = convert(operand.expr, ScalarType::Primary(kind));

        let mut cases: Vec<SwitchCaseP> = vec![];

        for case in &statement.cases {
            let value = match self
                .evaluate_constant(&case.value, "case label does not reduce to an integer constant")?
            {
                constant @ Constant::Integer { .. } => constant.convert(kind).as_integer(),
                Constant::Float { .. } => {
                    return Err(ProcessingError::new(
                        "case label does not reduce to an integer constant",
                    )
                    .with_position(case.value.position))
                }
            };

            if cases.iter().any(|existing| existing.value == value) {
                return Err(ProcessingError::new("duplicate case value").with_position(case.position));
            }

            let body = self.process_block_items(&case.items)?;
            cases.push(SwitchCaseP { value, body });
        }

        let default = match &statement.default {
            Some(items) => self.process_block_items(items)?,
            None => vec![],
        };

        Ok(vec![StatementP::Switch {
            expression,
            cases,
            default,
        }])
    }

    fn process_return(&mut self, statement: &ReturnStatement) -> ProcResult<Vec<StatementP>> {
        let Some(value) = &statement.value else {
            if self.return_type.is_some() {
                self.warn(
                    "'return' with no value, in function returning non-void",
                    statement.position,
                );
            }

            return Ok(vec![StatementP::Return]);
        };

        let Some(return_type) = self.return_type.clone() else {
            // a void expression may still be returned from a void function
            return match self.process_expression(value)? {
                ProcessedExpression::Void(mut statements) => {
                    statements.push(StatementP::Return);
                    Ok(statements)
                }
                ProcessedExpression::Value { .. } => Err(ProcessingError::new(
                    "'return' with a value, in function returning void",
                )),
            };
        };

        let mut statements = vec![];

        match &return_type {
            DataType::Primary(_) | DataType::Pointer(_) => {
                let cell = unpack(&return_type)?
                    .into_iter()
                    .next()
                    .ok_or_else(|| ProcessingError::new("return type without a memory cell"))?;

                let operand = self.process_operand(value)?;
                let value = self.coerce(operand, cell.data_type, "return", value.position)?;

                statements.push(StatementP::Store {
                    address: Address::ReturnObject {
                        offset: cell.offset,
                        mode: ReturnMode::Store,
                    },
                    value,
                    data_type: cell.data_type,
                });
            }
            other => {
                return Err(ProcessingError::unsupported(format!(
                    "returning {}",
                    stringify(other)
                )))
            }
        }

        statements.push(StatementP::Return);

        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        errors::errors::ProcessingError,
        parser::parser::parse_program,
        processor::{
            ast::{Address, ExpressionP, ProcessedProgram, StatementP},
            processor::process,
        },
        types::types::{PrimaryKind, ScalarType},
    };

    fn processed(source: &str) -> ProcessedProgram {
        process(&parse_program(source).unwrap()).unwrap()
    }

    fn error(source: &str) -> ProcessingError {
        process(&parse_program(source).unwrap()).unwrap_err()
    }

    fn body(program: &ProcessedProgram, name: &str) -> Vec<StatementP> {
        program.function(name).unwrap().body.clone()
    }

    #[test]
    fn local_initializer_stores_into_frame() {
        let program = processed("int main() { int x = 10; return x; }");
        let body = body(&program, "main");

        assert_eq!(
            body[0],
            StatementP::Store {
                address: Address::Local { offset: 0 },
                value: ExpressionP::integer(10, PrimaryKind::SignedInt),
                data_type: ScalarType::Primary(PrimaryKind::SignedInt),
            }
        );
        assert_eq!(program.function("main").unwrap().frame_size, 4);
    }

    #[test]
    fn global_assignment_reads_and_writes_data_segment() {
        let program = processed("int x = 2; int main() { x = x + 3; return 0; }");
        assert_eq!(&program.data_segment[..4], &[2, 0, 0, 0]);

        let load = ExpressionP::Load {
            address: Address::DataSegment { offset: 0 },
            data_type: ScalarType::Primary(PrimaryKind::SignedInt),
        };

        match &body(&program, "main")[0] {
            StatementP::Store { address, value, .. } => {
                assert_eq!(address, &Address::DataSegment { offset: 0 });
                match value {
                    ExpressionP::Binary { left, right, .. } => {
                        assert_eq!(left.as_ref(), &load);
                        assert_eq!(right.as_ref(), &ExpressionP::integer(3, PrimaryKind::SignedInt));
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn for_variables_are_scoped_to_the_loop() {
        let err = error("int main() { for (int i = 0; i < 3; i++) {} return i; }");
        assert_eq!(err.message, "Symbol i not found in symbol table");

        let program = processed("int main() { int s = 0; for (int i = 0; i < 3; i++) s = s + i; return s; }");
        assert!(matches!(body(&program, "main")[1], StatementP::For { .. }));
    }

    #[test]
    fn call_writes_arguments_into_callee_frame() {
        let program = processed("int f(int a) { return a * 2; } int main() { f(4); return 0; }");

        let call = match &body(&program, "main")[0] {
            StatementP::FunctionCall(call) => call.clone(),
            other => panic!("unexpected {:?}", other),
        };

        assert!(!call.keep_return);
        assert_eq!(call.args.len(), 1);
        assert_eq!(call.args[0].cell.offset, 0);
        assert_eq!(call.args[0].value, ExpressionP::integer(4, PrimaryKind::SignedInt));
        assert_eq!(call.layout.size_of_return, 4);
    }

    #[test]
    fn jump_statements_need_an_enclosing_loop() {
        assert_eq!(
            error("int main() { break; }").message,
            "Break statement cannot be present outside a loop or switch body"
        );
        assert_eq!(
            error("int main() { switch (1) { case 1: continue; } }").message,
            "Continue statement cannot be present outside a loop body"
        );
        processed("int main() { while (1) { switch (2) { case 2: break; default: continue; } } }");
    }

    #[test]
    fn switch_rules() {
        assert_eq!(
            error("int main() { switch (1) { case 1: case 1: break; } return 0; }").message,
            "duplicate case value"
        );
        assert_eq!(
            error("int main() { double d = 1.0; switch (d) { default: break; } return 0; }").message,
            "switch quantity not an integer"
        );
        assert_eq!(
            error("int main() { int x = 1; switch (1) { case x: break; } return 0; }").message,
            "case label does not reduce to an integer constant"
        );

        let program = processed(
            "enum { A = 3 }; int main() { switch (3) { case A: return 1; case A + 1: return 2; } return 0; }",
        );
        match &body(&program, "main")[0] {
            StatementP::Switch { cases, .. } => {
                assert_eq!(cases.iter().map(|c| c.value).collect::<Vec<_>>(), vec![3, 4]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn return_checks() {
        assert_eq!(
            error("void f() { return 1; } int main() { f(); return 0; }").message,
            "'return' with a value, in function returning void"
        );

        let program = processed("int f() { return; } int main() { return f(); }");
        assert_eq!(program.warnings.len(), 1);
        assert_eq!(
            program.warnings[0].message,
            "'return' with no value, in function returning non-void"
        );
    }
}
