use std::fmt::Display;
use std::mem;

use thiserror::Error;

use super::ast::{Position, Program};
use crate::lexer::{
    lexer::{Lexer, LexerError},
    token::Token,
};

#[derive(Debug, Clone, PartialEq, PartialOrd)]
#[repr(u8)]
pub enum Precedence {
    Lowest,
    Assign,
    Conditional,
    LogicalOr,
    LogicalAnd,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    Equals,
    LessGreater,
    Shift,
    Sum,
    Product,
    Prefix,
    Postfix,
}

impl Precedence {
    pub fn from_token(token: &Token) -> Option<Self> {
        match token {
            Token::Assign
            | Token::PlusAssign
            | Token::MinusAssign
            | Token::AsteriskAssign
            | Token::ForwardSlashAssign
            | Token::ModAssign
            | Token::AmpersandAssign
            | Token::PipeAssign
            | Token::CaretAssign
            | Token::ShiftLeftAssign
            | Token::ShiftRightAssign => Some(Self::Assign),
            Token::Question => Some(Self::Conditional),
            Token::Or => Some(Self::LogicalOr),
            Token::And => Some(Self::LogicalAnd),
            Token::Pipe => Some(Self::BitwiseOr),
            Token::Caret => Some(Self::BitwiseXor),
            Token::Ampersand => Some(Self::BitwiseAnd),
            Token::Equal | Token::NotEqual => Some(Self::Equals),
            Token::LessThan | Token::LessEqual | Token::GreaterThan | Token::GreaterEqual => {
                Some(Self::LessGreater)
            }
            Token::ShiftLeft | Token::ShiftRight => Some(Self::Shift),
            Token::Plus | Token::Minus => Some(Self::Sum),
            Token::ForwardSlash | Token::Mod | Token::Asterisk => Some(Self::Product),
            Token::Lparen | Token::LBrack | Token::Increment | Token::Decrement => {
                Some(Self::Postfix)
            }

            _ => None,
        }
    }
}

pub trait Parse<'a> {
    fn parse(parser: &mut Parser<'a>, precedence: Option<Precedence>) -> PResult<Self>
    where
        Self: Sized;
}

#[derive(Debug)]
pub struct Parser<'a> {
    lexer: &'a mut Lexer,
    pub current_token: Token,
    pub next_token: Token,
    current_position: Position,
    next_position: Position,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParserError {
    #[error("{message}")]
    Unexpected { message: String, position: Position },

    #[error("{message}")]
    Expected { message: String, position: Position },

    #[error("{0}")]
    Lexer(#[from] LexerError),
}

impl ParserError {
    pub fn unexpected<T>(what: T, position: Position) -> Self
    where
        T: Display,
    {
        Self::Unexpected {
            message: format!("Unexpected token: {} at line {}", what, position.start.line),
            position,
        }
    }

    pub fn expected<T, F>(expected: T, found: F, position: Position) -> Self
    where
        T: Display,
        F: Display,
    {
        Self::Expected {
            message: format!(
                "expected {} found {} at line {}",
                expected, found, position.start.line
            ),
            position,
        }
    }

    pub fn unsupported<T>(what: T, position: Position) -> Self
    where
        T: Display,
    {
        Self::Unexpected {
            message: format!("{} are not supported at line {}", what, position.start.line),
            position,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            ParserError::Unexpected { position, .. } | ParserError::Expected { position, .. } => {
                *position
            }
            ParserError::Lexer(err) => err.position(),
        }
    }
}

pub type PResult<T> = Result<T, ParserError>;

/// Lexes and parses a whole translation unit.
pub fn parse_program(source: &str) -> PResult<Program> {
    let mut lexer = Lexer::new(source.to_string());
    let mut parser = Parser::new(&mut lexer)?;

    Program::parse(&mut parser, None)
}

impl<'a> Parser<'a> {
    pub fn new(lexer: &'a mut Lexer) -> PResult<Self> {
        let current_token = lexer.next_token()?;
        let current_position = lexer.token_position();
        let next_token = lexer.next_token()?;
        let next_position = lexer.token_position();

        Ok(Self {
            lexer,
            current_token,
            next_token,
            current_position,
            next_position,
        })
    }

    pub(super) fn current_token_is(&self, token: &Token) -> bool {
        &self.current_token == token
    }

    pub(super) fn next_token(&mut self) -> PResult<()> {
        self.current_token = self.lexer.next_token()?;
        self.current_position = self.lexer.token_position();
        mem::swap(&mut self.current_token, &mut self.next_token);
        mem::swap(&mut self.current_position, &mut self.next_position);

        Ok(())
    }

    pub(super) fn next_token_is(&self, token: &Token) -> bool {
        &self.next_token == token
    }

    /// Token after `next_token`, without consuming anything
    pub(super) fn peek_after_next(&self) -> PResult<Token> {
        Ok(self.lexer.clone().next_token()?)
    }

    pub(super) fn next_precedence(&self) -> Option<Precedence> {
        Precedence::from_token(&self.next_token)
    }

    pub(super) fn current_precedence(&self) -> Option<Precedence> {
        Precedence::from_token(&self.current_token)
    }

    pub(super) fn expect_peek(&mut self, expected: Token) -> PResult<()> {
        if !self.next_token_is(&expected) {
            return Err(ParserError::expected(
                expected,
                &self.next_token,
                self.next_position,
            ));
        }

        self.next_token()?;

        Ok(())
    }

    pub fn current_position(&self) -> Position {
        self.current_position
    }

    pub(super) fn next_position(&self) -> Position {
        self.next_position
    }

    /// Span from `start` up to the end of the current token
    pub(super) fn span_from(&self, start: Position) -> Position {
        start.to(self.current_position)
    }

    pub fn current_line(&self) -> u32 {
        self.current_position.start.line
    }
}
