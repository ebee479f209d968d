// MIT License
//
// Copyright (c) 2024 The Fig Programming Language
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use thiserror::Error;

use super::token::Token;
use crate::parser::ast::{Location, Position};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at line {}", .location.line)]
pub struct LexerError {
    pub message: String,
    pub location: Location,
}

impl LexerError {
    fn new(message: impl Into<String>, location: Location) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }

    pub fn position(&self) -> Position {
        Position {
            start: self.location,
            end: Location {
                offset: self.location.offset + 1,
                column: self.location.column + 1,
                ..self.location
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct Lexer {
    position: usize,
    read_position: usize,
    ch: u8,
    pub line_no: u32,
    column: u32,
    input: Vec<u8>,

    /// Where the last returned token starts and ends
    token_start: Location,
    token_end: Location,
}

impl Lexer {
    pub fn new(input: String) -> Lexer {
        let mut lex = Lexer {
            position: 0,
            read_position: 0,
            ch: 0,
            line_no: 1,
            column: 0,
            input: input.into_bytes(),
            token_start: Location::default(),
            token_end: Location::default(),
        };

        lex.read_char();

        lex
    }

    pub fn next_token(&mut self) -> Result<Token, LexerError> {
        self.skip_whitespace()?;

        self.token_start = self.location();

        let tok = match self.ch {
            b'{' => Token::LSquirly,
            b'}' => Token::RSquirly,
            b'(' => Token::Lparen,
            b')' => Token::Rparen,
            b'[' => Token::LBrack,
            b']' => Token::RBrack,
            b',' => Token::Comma,
            b';' => Token::Semicolon,
            b':' => Token::Colon,
            b'?' => Token::Question,
            b'~' => Token::Tilde,
            b'+' => match self.peek() {
                b'+' => self.double(Token::Increment),
                b'=' => self.double(Token::PlusAssign),
                _ => Token::Plus,
            },
            b'-' => match self.peek() {
                b'-' => self.double(Token::Decrement),
                b'=' => self.double(Token::MinusAssign),
                _ => Token::Minus,
            },
            b'*' => self.with_assign(Token::Asterisk, Token::AsteriskAssign),
            b'/' => self.with_assign(Token::ForwardSlash, Token::ForwardSlashAssign),
            b'%' => self.with_assign(Token::Mod, Token::ModAssign),
            b'^' => self.with_assign(Token::Caret, Token::CaretAssign),
            b'!' => self.with_assign(Token::Bang, Token::NotEqual),
            b'=' => self.with_assign(Token::Assign, Token::Equal),
            b'&' => match self.peek() {
                b'&' => self.double(Token::And),
                b'=' => self.double(Token::AmpersandAssign),
                _ => Token::Ampersand,
            },
            b'|' => match self.peek() {
                b'|' => self.double(Token::Or),
                b'=' => self.double(Token::PipeAssign),
                _ => Token::Pipe,
            },
            b'<' => match self.peek() {
                b'<' => {
                    self.read_char();
                    self.with_assign(Token::ShiftLeft, Token::ShiftLeftAssign)
                }
                b'=' => self.double(Token::LessEqual),
                _ => Token::LessThan,
            },
            b'>' => match self.peek() {
                b'>' => {
                    self.read_char();
                    self.with_assign(Token::ShiftRight, Token::ShiftRightAssign)
                }
                b'=' => self.double(Token::GreaterEqual),
                _ => Token::GreaterThan,
            },

            b'"' => Token::String(self.read_string()?),
            b'\'' => Token::Char(self.read_char_constant()?),

            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let ident = self.read_ident();
                self.token_end = self.location();

                return Ok(Token::from_keyword(&ident).unwrap_or(Token::Ident(ident)));
            }
            b'0'..=b'9' => {
                let tok = self.read_number()?;
                self.token_end = self.location();

                return Ok(tok);
            }
            b'.' if self.peek().is_ascii_digit() => {
                let tok = self.read_number()?;
                self.token_end = self.location();

                return Ok(tok);
            }
            0 if self.position >= self.input.len() => Token::Eof,
            other => {
                return Err(LexerError::new(
                    format!("Unexpected character '{}'", char::from(other)),
                    self.token_start,
                ))
            }
        };

        if tok != Token::Eof {
            self.read_char();
        }

        self.token_end = self.location();

        Ok(tok)
    }

    /// Position of the token returned by the last `next_token` call
    pub fn token_position(&self) -> Position {
        Position {
            start: self.token_start,
            end: self.token_end,
        }
    }

    fn location(&self) -> Location {
        Location {
            line: self.line_no,
            column: self.column,
            offset: self.position as u32,
        }
    }

    fn double(&mut self, tok: Token) -> Token {
        self.read_char();
        tok
    }

    fn with_assign(&mut self, plain: Token, assign: Token) -> Token {
        if self.peek() == b'=' {
            self.read_char();
            assign
        } else {
            plain
        }
    }

    fn peek(&self) -> u8 {
        if self.read_position >= self.input.len() {
            0
        } else {
            self.input[self.read_position]
        }
    }

    fn read_char(&mut self) {
        if self.ch == b'\n' {
            self.line_no += 1;
            self.column = 0;
        }

        if self.read_position >= self.input.len() {
            self.ch = 0;
        } else {
            self.ch = self.input[self.read_position];
        }

        self.position = self.read_position;
        self.read_position += 1;
        self.column += 1;
    }

    fn skip_whitespace(&mut self) -> Result<(), LexerError> {
        loop {
            if self.ch.is_ascii_whitespace() {
                self.read_char();
            } else if self.ch == b'/' && self.peek() == b'/' {
                self.skip_comment();
            } else if self.ch == b'/' && self.peek() == b'*' {
                self.skip_block_comment()?;
            } else {
                return Ok(());
            }
        }
    }

    fn skip_comment(&mut self) {
        while self.ch != b'\n' && self.ch != 0 {
            self.read_char();
        }
    }

    fn skip_block_comment(&mut self) -> Result<(), LexerError> {
        let start = self.location();

        // pass "/*"
        self.read_char();
        self.read_char();

        loop {
            if self.ch == 0 && self.position >= self.input.len() {
                return Err(LexerError::new("Unterminated comment", start));
            }

            if self.ch == b'*' && self.peek() == b'/' {
                self.read_char();
                self.read_char();
                return Ok(());
            }

            self.read_char();
        }
    }

    fn read_ident(&mut self) -> String {
        let pos = self.position;
        while self.ch.is_ascii_alphanumeric() || self.ch == b'_' {
            self.read_char();
        }

        String::from_utf8_lossy(&self.input[pos..self.position]).to_string()
    }

    /// Reads integer and floating constants, suffixes included.
    fn read_number(&mut self) -> Result<Token, LexerError> {
        let pos = self.position;
        let mut is_float = false;

        if self.ch == b'0' && matches!(self.peek(), b'x' | b'X') {
            self.read_char();
            self.read_char();

            while self.ch.is_ascii_hexdigit() {
                self.read_char();
            }
        } else {
            while self.ch.is_ascii_digit() {
                self.read_char();
            }

            if self.ch == b'.' {
                is_float = true;
                self.read_char();

                while self.ch.is_ascii_digit() {
                    self.read_char();
                }
            }

            if matches!(self.ch, b'e' | b'E') {
                is_float = true;
                self.read_char();

                if matches!(self.ch, b'+' | b'-') {
                    self.read_char();
                }

                if !self.ch.is_ascii_digit() {
                    return Err(LexerError::new("Exponent has no digits", self.token_start));
                }

                while self.ch.is_ascii_digit() {
                    self.read_char();
                }
            }
        }

        while matches!(self.ch, b'u' | b'U' | b'l' | b'L' | b'f' | b'F') {
            self.read_char();
        }

        if self.ch.is_ascii_alphanumeric() || self.ch == b'_' {
            return Err(LexerError::new(
                format!("Invalid suffix on constant starting with '{}'", char::from(self.ch)),
                self.token_start,
            ));
        }

        let text = String::from_utf8_lossy(&self.input[pos..self.position]).to_string();

        Ok(if is_float {
            Token::Float(text)
        } else {
            Token::Int(text)
        })
    }

    /// Reads one possibly escaped character, leaving `ch` on its last byte
    fn read_escaped(&mut self) -> Result<u8, LexerError> {
        if self.ch != b'\\' {
            return Ok(self.ch);
        }

        let start = self.location();
        self.read_char();

        let value = match self.ch {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'\\' => b'\\',
            b'\'' => b'\'',
            b'"' => b'"',
            b'?' => b'?',
            b'x' => {
                let mut value: u32 = 0;
                let mut digits = 0;

                while self.peek().is_ascii_hexdigit() {
                    self.read_char();
                    value = value * 16 + char::from(self.ch).to_digit(16).unwrap_or(0);
                    digits += 1;
                }

                if digits == 0 {
                    return Err(LexerError::new("\\x used with no following hex digits", start));
                }

                (value & 0xff) as u8
            }
            b'0'..=b'7' => {
                let mut value: u32 = u32::from(self.ch - b'0');
                let mut digits = 1;

                while digits < 3 && matches!(self.peek(), b'0'..=b'7') {
                    self.read_char();
                    value = value * 8 + u32::from(self.ch - b'0');
                    digits += 1;
                }

                (value & 0xff) as u8
            }
            other => {
                return Err(LexerError::new(
                    format!("Unknown escape sequence '\\{}'", char::from(other)),
                    start,
                ))
            }
        };

        Ok(value)
    }

    fn read_char_constant(&mut self) -> Result<u8, LexerError> {
        // Skip the ' char
        self.read_char();

        if self.ch == b'\'' || self.ch == b'\n' || self.ch == 0 {
            return Err(LexerError::new("Empty character constant", self.token_start));
        }

        let value = self.read_escaped()?;

        self.read_char();

        if self.ch != b'\'' {
            return Err(LexerError::new(
                "Unterminated character constant",
                self.token_start,
            ));
        }

        Ok(value)
    }

    fn read_string(&mut self) -> Result<Vec<u8>, LexerError> {
        let mut bytes = vec![];

        loop {
            self.read_char();

            match self.ch {
                b'"' => break,
                b'\n' | 0 => {
                    return Err(LexerError::new("Unterminated string literal", self.token_start))
                }
                _ => bytes.push(self.read_escaped()?),
            }
        }

        Ok(bytes)
    }
}
