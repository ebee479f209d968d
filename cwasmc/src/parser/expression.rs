use super::ast::{
    BinaryOperator, Expression, ExpressionKind, IntegerSuffix, PostfixOperator, PrefixOperator,
};
use super::declaration::parse_type_name;
use super::parser::{PResult, Parse, Parser, ParserError, Precedence};
use crate::lexer::token::Token;

impl<'a> Parse<'a> for Expression {
    fn parse(parser: &mut Parser<'a>, precedence: Option<Precedence>) -> PResult<Self> {
        let start = parser.current_position();

        let mut left_expr = match &parser.current_token {
            Token::Int(text) => {
                let (value, suffix) = parse_integer(text).ok_or_else(|| {
                    ParserError::unexpected(format!("integer constant {}", text), start)
                })?;

                Ok(Expression::new(
                    ExpressionKind::IntegerConstant { value, suffix },
                    start,
                ))
            }

            Token::Float(text) => {
                let (value, is_float) = parse_float(text).ok_or_else(|| {
                    ParserError::unexpected(format!("floating constant {}", text), start)
                })?;

                Ok(Expression::new(
                    ExpressionKind::FloatConstant { value, is_float },
                    start,
                ))
            }

            Token::Char(c) => Ok(Expression::integer(u128::from(*c), start)),

            Token::String(_) => parse_string(parser),

            Token::Ident(ident) => Ok(Expression::new(
                ExpressionKind::Identifier(ident.clone()),
                start,
            )),

            Token::Lparen => {
                if parser.next_token.starts_declaration() {
                    return Err(ParserError::unsupported(
                        "casts",
                        parser.next_position(),
                    ));
                }

                parser.next_token()?;
                let mut expression = Expression::parse(parser, Some(Precedence::Lowest))?;
                parser.expect_peek(Token::Rparen)?;
                expression.position = parser.span_from(start);

                Ok(expression)
            }

            Token::Plus
            | Token::Minus
            | Token::Bang
            | Token::Tilde
            | Token::Increment
            | Token::Decrement => {
                let operator = match parser.current_token {
                    Token::Plus => PrefixOperator::Plus,
                    Token::Minus => PrefixOperator::Minus,
                    Token::Bang => PrefixOperator::LogicalNot,
                    Token::Tilde => PrefixOperator::BitwiseNot,
                    Token::Increment => PrefixOperator::Increment,
                    _ => PrefixOperator::Decrement,
                };

                parser.next_token()?;
                let operand = Expression::parse(parser, Some(Precedence::Prefix))?;

                Ok(Expression::new(
                    ExpressionKind::Prefix {
                        operator,
                        operand: Box::new(operand),
                    },
                    parser.span_from(start),
                ))
            }

            Token::Asterisk | Token::Ampersand => {
                let is_deref = parser.current_token_is(&Token::Asterisk);

                parser.next_token()?;
                let operand = Box::new(Expression::parse(parser, Some(Precedence::Prefix))?);

                let kind = if is_deref {
                    ExpressionKind::Dereference(operand)
                } else {
                    ExpressionKind::AddressOf(operand)
                };

                Ok(Expression::new(kind, parser.span_from(start)))
            }

            Token::Sizeof => {
                if parser.next_token_is(&Token::Lparen)
                    && parser.peek_after_next()?.starts_declaration()
                {
                    parser.next_token()?;
                    parser.next_token()?;
                    let data_type = parse_type_name(parser)?;
                    parser.expect_peek(Token::Rparen)?;

                    Ok(Expression::new(
                        ExpressionKind::SizeOfType(data_type),
                        parser.span_from(start),
                    ))
                } else {
                    parser.next_token()?;
                    let operand = Expression::parse(parser, Some(Precedence::Prefix))?;

                    Ok(Expression::new(
                        ExpressionKind::SizeOfExpression(Box::new(operand)),
                        parser.span_from(start),
                    ))
                }
            }

            tkn => Err(ParserError::unexpected(tkn, start)),
        }?;

        let precedence = precedence.unwrap_or(Precedence::Lowest);

        while let Some(p) = parser.next_precedence() {
            if precedence >= p {
                break;
            }

            parser.next_token()?;
            left_expr = parse_infix(parser, left_expr)?;
        }

        Ok(left_expr)
    }
}

/// Continues an expression whose operator is the current token
fn parse_infix(parser: &mut Parser, left: Expression) -> PResult<Expression> {
    let start = left.position;

    match parser.current_token.clone() {
        Token::Assign => {
            parser.next_token()?;
            // assignment is right associative
            let value = Expression::parse(parser, Some(Precedence::Lowest))?;

            Ok(Expression::new(
                ExpressionKind::Assignment {
                    target: Box::new(left),
                    value: Box::new(value),
                },
                parser.span_from(start),
            ))
        }

        Token::PlusAssign
        | Token::MinusAssign
        | Token::AsteriskAssign
        | Token::ForwardSlashAssign
        | Token::ModAssign
        | Token::AmpersandAssign
        | Token::PipeAssign
        | Token::CaretAssign
        | Token::ShiftLeftAssign
        | Token::ShiftRightAssign => {
            let operator = compound_operator(&parser.current_token);
            parser.next_token()?;
            let right = Expression::parse(parser, Some(Precedence::Lowest))?;
            let position = parser.span_from(start);

            // a op= b  =>  a = a op b
            let value = Expression::new(
                ExpressionKind::Binary {
                    operator,
                    left: Box::new(left.clone()),
                    right: Box::new(right),
                },
                position,
            );

            Ok(Expression::new(
                ExpressionKind::Assignment {
                    target: Box::new(left),
                    value: Box::new(value),
                },
                position,
            ))
        }

        Token::Question => {
            parser.next_token()?;
            let then_expr = Expression::parse(parser, Some(Precedence::Lowest))?;
            parser.expect_peek(Token::Colon)?;
            parser.next_token()?;
            let else_expr = Expression::parse(parser, Some(Precedence::Assign))?;

            Ok(Expression::new(
                ExpressionKind::Conditional {
                    condition: Box::new(left),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                },
                parser.span_from(start),
            ))
        }

        Token::Lparen => {
            let mut arguments = vec![];

            if parser.next_token_is(&Token::Rparen) {
                parser.next_token()?;
            } else {
                loop {
                    parser.next_token()?;
                    arguments.push(Expression::parse(parser, Some(Precedence::Lowest))?);

                    if parser.next_token_is(&Token::Comma) {
                        parser.next_token()?;
                        continue;
                    }

                    parser.expect_peek(Token::Rparen)?;
                    break;
                }
            }

            Ok(Expression::new(
                ExpressionKind::Call {
                    callee: Box::new(left),
                    arguments,
                },
                parser.span_from(start),
            ))
        }

        Token::LBrack => {
            parser.next_token()?;
            let index = Expression::parse(parser, Some(Precedence::Lowest))?;
            parser.expect_peek(Token::RBrack)?;
            let position = parser.span_from(start);

            // a[i]  =>  *(a + i)
            Ok(Expression::new(
                ExpressionKind::Dereference(Box::new(Expression::new(
                    ExpressionKind::Binary {
                        operator: BinaryOperator::Add,
                        left: Box::new(left),
                        right: Box::new(index),
                    },
                    position,
                ))),
                position,
            ))
        }

        Token::Increment | Token::Decrement => {
            let operator = if parser.current_token_is(&Token::Increment) {
                PostfixOperator::Increment
            } else {
                PostfixOperator::Decrement
            };

            Ok(Expression::new(
                ExpressionKind::Postfix {
                    operator,
                    operand: Box::new(left),
                },
                parser.span_from(start),
            ))
        }

        tkn => {
            let operator = binary_operator(&tkn)
                .ok_or_else(|| ParserError::unexpected(&tkn, parser.current_position()))?;
            let precedence = parser.current_precedence();

            parser.next_token()?;
            let right = Expression::parse(parser, precedence)?;

            Ok(Expression::new(
                ExpressionKind::Binary {
                    operator,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                parser.span_from(start),
            ))
        }
    }
}

fn binary_operator(token: &Token) -> Option<BinaryOperator> {
    Some(match token {
        Token::Plus => BinaryOperator::Add,
        Token::Minus => BinaryOperator::Subtract,
        Token::Asterisk => BinaryOperator::Multiply,
        Token::ForwardSlash => BinaryOperator::Divide,
        Token::Mod => BinaryOperator::Remainder,
        Token::ShiftLeft => BinaryOperator::ShiftLeft,
        Token::ShiftRight => BinaryOperator::ShiftRight,
        Token::LessThan => BinaryOperator::LessThan,
        Token::LessEqual => BinaryOperator::LessEqual,
        Token::GreaterThan => BinaryOperator::GreaterThan,
        Token::GreaterEqual => BinaryOperator::GreaterEqual,
        Token::Equal => BinaryOperator::Equal,
        Token::NotEqual => BinaryOperator::NotEqual,
        Token::Ampersand => BinaryOperator::BitwiseAnd,
        Token::Pipe => BinaryOperator::BitwiseOr,
        Token::Caret => BinaryOperator::BitwiseXor,
        Token::And => BinaryOperator::LogicalAnd,
        Token::Or => BinaryOperator::LogicalOr,
        _ => return None,
    })
}

fn compound_operator(token: &Token) -> BinaryOperator {
    match token {
        Token::PlusAssign => BinaryOperator::Add,
        Token::MinusAssign => BinaryOperator::Subtract,
        Token::AsteriskAssign => BinaryOperator::Multiply,
        Token::ForwardSlashAssign => BinaryOperator::Divide,
        Token::ModAssign => BinaryOperator::Remainder,
        Token::AmpersandAssign => BinaryOperator::BitwiseAnd,
        Token::PipeAssign => BinaryOperator::BitwiseOr,
        Token::CaretAssign => BinaryOperator::BitwiseXor,
        Token::ShiftLeftAssign => BinaryOperator::ShiftLeft,
        _ => BinaryOperator::ShiftRight,
    }
}

/// Adjacent string literals are concatenated
fn parse_string(parser: &mut Parser) -> PResult<Expression> {
    let start = parser.current_position();
    let mut bytes = vec![];

    if let Token::String(s) = &parser.current_token {
        bytes.extend_from_slice(s);
    }

    while let Token::String(s) = &parser.next_token {
        bytes.extend_from_slice(s);
        parser.next_token()?;
    }

    Ok(Expression::new(
        ExpressionKind::StringLiteral(bytes),
        parser.span_from(start),
    ))
}

pub(super) fn parse_integer(text: &str) -> Option<(u128, Option<IntegerSuffix>)> {
    let digits = text.trim_end_matches(|c: char| matches!(c, 'u' | 'U' | 'l' | 'L'));
    let suffix = text[digits.len()..].to_ascii_lowercase();

    let suffix = match (suffix.contains('u'), suffix.contains('l')) {
        (true, true) => Some(IntegerSuffix::UnsignedLong),
        (true, false) => Some(IntegerSuffix::Unsigned),
        (false, true) => Some(IntegerSuffix::Long),
        (false, false) => None,
    };

    let value = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u128::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        u128::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<u128>().ok()?
    };

    // nothing wider than 64 bits exists
    if value > u128::from(u64::MAX) {
        return None;
    }

    Some((value, suffix))
}

pub(super) fn parse_float(text: &str) -> Option<(f64, bool)> {
    let digits = text.trim_end_matches(|c: char| matches!(c, 'f' | 'F' | 'l' | 'L'));
    let is_float = text[digits.len()..].eq_ignore_ascii_case("f");

    digits.parse::<f64>().ok().map(|value| (value, is_float))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lexer::Lexer;

    fn parse(source: &str) -> Expression {
        let mut lexer = Lexer::new(source.to_string());
        let mut parser = Parser::new(&mut lexer).unwrap();
        Expression::parse(&mut parser, None).unwrap()
    }

    fn ident(name: &str) -> ExpressionKind {
        ExpressionKind::Identifier(name.to_string())
    }

    fn int(value: u128) -> ExpressionKind {
        ExpressionKind::IntegerConstant {
            value,
            suffix: None,
        }
    }

    #[test]
    fn integer_literals() {
        assert_eq!(parse_integer("42"), Some((42, None)));
        assert_eq!(parse_integer("0x1F"), Some((31, None)));
        assert_eq!(parse_integer("017"), Some((15, None)));
        assert_eq!(parse_integer("0"), Some((0, None)));
        assert_eq!(
            parse_integer("10ul"),
            Some((10, Some(IntegerSuffix::UnsignedLong)))
        );
        assert_eq!(parse_integer("3L"), Some((3, Some(IntegerSuffix::Long))));
        assert_eq!(parse_integer("99999999999999999999999"), None);
        assert_eq!(parse_float("1.5f"), Some((1.5, true)));
        assert_eq!(parse_float("2e3"), Some((2000.0, false)));
    }

    #[test]
    fn precedence_climbing() {
        let expr = parse("1 + 2 * 3");

        match expr.kind {
            ExpressionKind::Binary {
                operator: BinaryOperator::Add,
                left,
                right,
            } => {
                assert_eq!(left.kind, int(1));
                match right.kind {
                    ExpressionKind::Binary {
                        operator: BinaryOperator::Multiply,
                        ..
                    } => {}
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn left_associative_subtraction() {
        let expr = parse("a - b - c");

        match expr.kind {
            ExpressionKind::Binary {
                operator: BinaryOperator::Subtract,
                left,
                right,
            } => {
                assert_eq!(right.kind, ident("c"));
                assert!(matches!(
                    left.kind,
                    ExpressionKind::Binary {
                        operator: BinaryOperator::Subtract,
                        ..
                    }
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn right_associative_assignment() {
        let expr = parse("a = b = 3");

        match expr.kind {
            ExpressionKind::Assignment { target, value } => {
                assert_eq!(target.kind, ident("a"));
                assert!(matches!(value.kind, ExpressionKind::Assignment { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn compound_assignment_desugars() {
        let expr = parse("x += 2");

        match expr.kind {
            ExpressionKind::Assignment { target, value } => {
                assert_eq!(target.kind, ident("x"));
                match value.kind {
                    ExpressionKind::Binary {
                        operator: BinaryOperator::Add,
                        left,
                        right,
                    } => {
                        assert_eq!(left.kind, ident("x"));
                        assert_eq!(right.kind, int(2));
                    }
                    other => panic!("unexpected {:?}", other),
                }
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn subscript_desugars() {
        let expr = parse("a[i + 1]");

        match expr.kind {
            ExpressionKind::Dereference(inner) => match inner.kind {
                ExpressionKind::Binary {
                    operator: BinaryOperator::Add,
                    left,
                    ..
                } => assert_eq!(left.kind, ident("a")),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn calls_and_postfix() {
        let expr = parse("f(1, g(x))++");

        match expr.kind {
            ExpressionKind::Postfix {
                operator: PostfixOperator::Increment,
                operand,
            } => match operand.kind {
                ExpressionKind::Call { callee, arguments } => {
                    assert_eq!(callee.kind, ident("f"));
                    assert_eq!(arguments.len(), 2);
                    assert!(matches!(arguments[1].kind, ExpressionKind::Call { .. }));
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nested_conditional() {
        let expr = parse("a ? 1 : b ? 2 : 3");

        match expr.kind {
            ExpressionKind::Conditional { else_expr, .. } => {
                assert!(matches!(else_expr.kind, ExpressionKind::Conditional { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn prefix_binds_tighter_than_binary() {
        let expr = parse("-*p + 1");

        match expr.kind {
            ExpressionKind::Binary { left, .. } => match left.kind {
                ExpressionKind::Prefix {
                    operator: PrefixOperator::Minus,
                    operand,
                } => assert!(matches!(operand.kind, ExpressionKind::Dereference(_))),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sizeof_forms() {
        assert!(matches!(
            parse("sizeof(int*)").kind,
            ExpressionKind::SizeOfType(_)
        ));
        assert!(matches!(
            parse("sizeof x").kind,
            ExpressionKind::SizeOfExpression(_)
        ));
        assert!(matches!(
            parse("sizeof(x)").kind,
            ExpressionKind::SizeOfExpression(_)
        ));
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            parse("\"ab\" \"cd\"").kind,
            ExpressionKind::StringLiteral(b"abcd".to_vec())
        );
    }

    #[test]
    fn casts_are_rejected() {
        let mut lexer = Lexer::new("(int) x".to_string());
        let mut parser = Parser::new(&mut lexer).unwrap();
        let err = Expression::parse(&mut parser, None).unwrap_err();

        assert_eq!(err.to_string(), "casts are not supported at line 1");
    }
}
