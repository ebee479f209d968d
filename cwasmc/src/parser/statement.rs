use super::ast::{
    Block, BlockItem, Expression, ForClause, ForStatement, IfStatement, ReturnStatement,
    Statement, SwitchCase, SwitchStatement, WhileStatement,
};
use super::declaration::{parse_declaration, starts_declaration, ParsedDeclaration};
use super::parser::{PResult, Parse, Parser, ParserError, Precedence};
use crate::lexer::token::Token;

impl<'a> Parse<'a> for Block {
    fn parse(parser: &mut Parser<'a>, _precedence: Option<Precedence>) -> PResult<Self> {
        let start = parser.current_position();
        let mut items = vec![];

        // skip the {
        parser.next_token()?;

        while !parser.current_token_is(&Token::RSquirly) {
            if parser.current_token_is(&Token::Eof) {
                return Err(ParserError::expected(
                    Token::RSquirly,
                    Token::Eof,
                    parser.current_position(),
                ));
            }

            items.extend(parse_block_item(parser)?);
            parser.next_token()?;
        }

        Ok(Block {
            items,
            position: parser.span_from(start),
        })
    }
}

/// A declaration may expand to several items, e.g. `int a, b;`
pub(super) fn parse_block_item(parser: &mut Parser) -> PResult<Vec<BlockItem>> {
    if !starts_declaration(parser) {
        return Ok(vec![BlockItem::Statement(Statement::parse(parser, None)?)]);
    }

    match parse_declaration(parser, false)? {
        ParsedDeclaration::Declarations {
            enum_declaration,
            tag,
            declarations,
        } => {
            let mut items = vec![];
            items.extend(enum_declaration.map(BlockItem::Enum));
            items.extend(tag.map(BlockItem::Tag));
            items.extend(declarations.into_iter().map(BlockItem::Declaration));

            Ok(items)
        }
        ParsedDeclaration::Function(function) => Err(ParserError::Unexpected {
            message: format!(
                "function definition is not allowed here at line {}",
                function.position.start.line
            ),
            position: function.position,
        }),
    }
}

impl<'a> Parse<'a> for Statement {
    fn parse(parser: &mut Parser<'a>, _precedence: Option<Precedence>) -> PResult<Self> {
        let start = parser.current_position();

        match parser.current_token {
            Token::LSquirly => Ok(Statement::Block(Block::parse(parser, None)?)),

            Token::Semicolon => Ok(Statement::Empty(start)),

            Token::If => {
                let condition = parse_condition(parser)?;
                parser.next_token()?;
                let then_branch = Box::new(Statement::parse(parser, None)?);

                let else_branch = if parser.next_token_is(&Token::Else) {
                    parser.next_token()?;
                    parser.next_token()?;
                    Some(Box::new(Statement::parse(parser, None)?))
                } else {
                    None
                };

                Ok(Statement::If(IfStatement {
                    condition,
                    then_branch,
                    else_branch,
                    position: parser.span_from(start),
                }))
            }

            Token::While => {
                let condition = parse_condition(parser)?;
                parser.next_token()?;
                let body = Box::new(Statement::parse(parser, None)?);

                Ok(Statement::While(WhileStatement {
                    condition,
                    body,
                    position: parser.span_from(start),
                }))
            }

            Token::Do => {
                parser.next_token()?;
                let body = Box::new(Statement::parse(parser, None)?);
                parser.expect_peek(Token::While)?;
                let condition = parse_condition(parser)?;
                parser.expect_peek(Token::Semicolon)?;

                Ok(Statement::DoWhile(WhileStatement {
                    condition,
                    body,
                    position: parser.span_from(start),
                }))
            }

            Token::For => parse_for(parser),

            Token::Switch => parse_switch(parser),

            Token::Break => {
                parser.expect_peek(Token::Semicolon)?;
                Ok(Statement::Break(parser.span_from(start)))
            }

            Token::Continue => {
                parser.expect_peek(Token::Semicolon)?;
                Ok(Statement::Continue(parser.span_from(start)))
            }

            Token::Return => {
                let value = if parser.next_token_is(&Token::Semicolon) {
                    None
                } else {
                    parser.next_token()?;
                    Some(Expression::parse(parser, Some(Precedence::Lowest))?)
                };

                parser.expect_peek(Token::Semicolon)?;

                Ok(Statement::Return(ReturnStatement {
                    value,
                    position: parser.span_from(start),
                }))
            }

            Token::Case | Token::Default => Err(ParserError::Unexpected {
                message: format!(
                    "'{}' label not within a switch statement at line {}",
                    parser.current_token,
                    parser.current_line()
                ),
                position: start,
            }),

            _ => {
                let expression = Expression::parse(parser, Some(Precedence::Lowest))?;
                parser.expect_peek(Token::Semicolon)?;

                Ok(Statement::Expression(expression))
            }
        }
    }
}

/// `( expression )` following the current keyword
fn parse_condition(parser: &mut Parser) -> PResult<Expression> {
    parser.expect_peek(Token::Lparen)?;
    parser.next_token()?;
    let condition = Expression::parse(parser, Some(Precedence::Lowest))?;
    parser.expect_peek(Token::Rparen)?;

    Ok(condition)
}

fn parse_for(parser: &mut Parser) -> PResult<Statement> {
    let start = parser.current_position();
    parser.expect_peek(Token::Lparen)?;

    let clause = if parser.next_token_is(&Token::Semicolon) {
        parser.next_token()?;
        None
    } else {
        parser.next_token()?;

        if starts_declaration(parser) {
            match parse_declaration(parser, false)? {
                ParsedDeclaration::Declarations {
                    enum_declaration: None,
                    tag: None,
                    declarations,
                } => Some(ForClause::Declarations(declarations)),
                _ => {
                    return Err(ParserError::Unexpected {
                        message: format!(
                            "declaration of a non-variable in 'for' loop initial declaration at line {}",
                            parser.current_line()
                        ),
                        position: parser.current_position(),
                    })
                }
            }
        } else {
            let expression = Expression::parse(parser, Some(Precedence::Lowest))?;
            parser.expect_peek(Token::Semicolon)?;
            Some(ForClause::Expression(expression))
        }
    };

    let condition = if parser.next_token_is(&Token::Semicolon) {
        parser.next_token()?;
        None
    } else {
        parser.next_token()?;
        let condition = Expression::parse(parser, Some(Precedence::Lowest))?;
        parser.expect_peek(Token::Semicolon)?;
        Some(condition)
    };

    let update = if parser.next_token_is(&Token::Rparen) {
        parser.next_token()?;
        None
    } else {
        parser.next_token()?;
        let update = Expression::parse(parser, Some(Precedence::Lowest))?;
        parser.expect_peek(Token::Rparen)?;
        Some(update)
    };

    parser.next_token()?;
    let body = Box::new(Statement::parse(parser, None)?);

    Ok(Statement::For(ForStatement {
        clause,
        condition,
        update,
        body,
        position: parser.span_from(start),
    }))
}

fn parse_switch(parser: &mut Parser) -> PResult<Statement> {
    let start = parser.current_position();
    let expression = parse_condition(parser)?;
    parser.expect_peek(Token::LSquirly)?;

    let mut cases = vec![];
    let mut default = None;

    loop {
        parser.next_token()?;
        let label_start = parser.current_position();

        match parser.current_token {
            Token::RSquirly => break,

            Token::Case => {
                if default.is_some() {
                    return Err(ParserError::Unexpected {
                        message: format!(
                            "'case' label after 'default' is not supported at line {}",
                            parser.current_line()
                        ),
                        position: label_start,
                    });
                }

                parser.next_token()?;
                let value = Expression::parse(parser, Some(Precedence::Lowest))?;
                parser.expect_peek(Token::Colon)?;
                let items = parse_case_items(parser)?;

                cases.push(SwitchCase {
                    value,
                    items,
                    position: parser.span_from(label_start),
                });
            }

            Token::Default => {
                if default.is_some() {
                    return Err(ParserError::Unexpected {
                        message: format!(
                            "multiple default labels in one switch at line {}",
                            parser.current_line()
                        ),
                        position: label_start,
                    });
                }

                parser.expect_peek(Token::Colon)?;
                default = Some(parse_case_items(parser)?);
            }

            Token::Eof => {
                return Err(ParserError::expected(
                    Token::RSquirly,
                    Token::Eof,
                    label_start,
                ))
            }

            ref tkn => {
                return Err(ParserError::expected(
                    "case or default label",
                    tkn,
                    label_start,
                ))
            }
        }
    }

    Ok(Statement::Switch(SwitchStatement {
        expression,
        cases,
        default,
        position: parser.span_from(start),
    }))
}

/// Items up to the next label or the end of the switch body
fn parse_case_items(parser: &mut Parser) -> PResult<Vec<BlockItem>> {
    let mut items = vec![];

    while !matches!(
        parser.next_token,
        Token::Case | Token::Default | Token::RSquirly | Token::Eof
    ) {
        parser.next_token()?;
        items.extend(parse_block_item(parser)?);
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lexer::Lexer;
    use crate::parser::ast::ExpressionKind;

    fn parse_statement(source: &str) -> PResult<Statement> {
        let mut lexer = Lexer::new(source.to_string());
        let mut parser = Parser::new(&mut lexer)?;
        Statement::parse(&mut parser, None)
    }

    #[test]
    fn if_else_chain() {
        let stmt = parse_statement("if (a) x = 1; else if (b) x = 2; else { x = 3; }").unwrap();

        match stmt {
            Statement::If(IfStatement {
                else_branch: Some(else_branch),
                ..
            }) => assert!(matches!(*else_branch, Statement::If(_))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn for_with_declaration() {
        let stmt = parse_statement("for (int i = 0; i < 10; i++) sum += i;").unwrap();

        match stmt {
            Statement::For(ForStatement {
                clause: Some(ForClause::Declarations(declarations)),
                condition: Some(_),
                update: Some(_),
                ..
            }) => assert_eq!(declarations[0].name, "i"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_for() {
        let stmt = parse_statement("for (;;) break;").unwrap();

        match stmt {
            Statement::For(ForStatement {
                clause: None,
                condition: None,
                update: None,
                body,
                ..
            }) => assert!(matches!(*body, Statement::Break(_))),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn do_while() {
        let stmt = parse_statement("do { i++; } while (i < 3);").unwrap();
        assert!(matches!(stmt, Statement::DoWhile(_)));
    }

    #[test]
    fn switch_cases() {
        let stmt = parse_statement(
            "switch (x) { case 1: y = 1; break; case 2: case 3: { y = 2; } break; default: y = 0; }",
        )
        .unwrap();

        match stmt {
            Statement::Switch(switch) => {
                assert_eq!(switch.cases.len(), 3);
                assert_eq!(switch.cases[0].items.len(), 2);
                assert!(switch.cases[1].items.is_empty());
                assert!(matches!(
                    switch.cases[2].value.kind,
                    ExpressionKind::IntegerConstant { value: 3, .. }
                ));
                assert_eq!(switch.default.map(|items| items.len()), Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn block_with_declarations() {
        let stmt = parse_statement("{ int a, b = 2; a = b; }").unwrap();

        match stmt {
            Statement::Block(block) => {
                assert_eq!(block.items.len(), 3);
                assert!(matches!(block.items[0], BlockItem::Declaration(_)));
                assert!(matches!(block.items[2], BlockItem::Statement(_)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unterminated_block() {
        let err = parse_statement("{ x = 1;").unwrap_err();
        assert_eq!(err.to_string(), "expected } found End of file at line 1");
    }

    #[test]
    fn stray_case_label() {
        let err = parse_statement("case 1: x;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'case' label not within a switch statement at line 1"
        );
    }
}
