use std::fmt::Display;

use codespan_reporting::{
    diagnostic::{Diagnostic, Label, Severity},
    files::SimpleFile,
    term::{self, termcolor::NoColor, Chars, Config},
};
use serde::Serialize;
use thiserror::Error;

use crate::{lexer::lexer::LexerError, parser::ast::Position, parser::parser::ParserError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProcessingErrorKind {
    Semantic,
    UnsupportedFeature,
}

/// Semantic error raised while processing the C AST.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ProcessingError {
    pub message: String,
    pub kind: ProcessingErrorKind,
    pub position: Option<Position>,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ProcessingErrorKind::Semantic,
            position: None,
        }
    }

    pub fn unsupported(feature: impl Display) -> Self {
        Self {
            message: format!("Unsupported feature: {}", feature),
            kind: ProcessingErrorKind::UnsupportedFeature,
            position: None,
        }
    }

    pub fn not_found(name: &str) -> Self {
        Self::new(format!("Symbol {} not found in symbol table", name))
    }

    /// Attaches `position` unless a more precise one is already present.
    pub fn with_position(mut self, position: Position) -> Self {
        if self.position.is_none() {
            self.position = Some(position);
        }

        self
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind == ProcessingErrorKind::UnsupportedFeature
    }
}

pub type ProcResult<T> = Result<T, ProcessingError>;

/// Lowering-phase invariant violation, always fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("TRANSLATION ERROR\n{0}")]
pub struct TranslationError(pub String);

impl TranslationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type TResult<T> = Result<T, TranslationError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Warning {
    pub message: String,
    pub position: Position,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{0}")]
    Lexer(#[from] LexerError),

    #[error("{0}")]
    Parser(#[from] ParserError),

    #[error("{0}")]
    Processing(#[from] ProcessingError),

    #[error("{0}")]
    Translation(#[from] TranslationError),

    #[error("failed to serialize: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CompileError {
    fn position(&self) -> Option<Position> {
        match self {
            CompileError::Lexer(err) => Some(err.position()),
            CompileError::Parser(err) => Some(err.position()),
            CompileError::Processing(err) => err.position,
            _ => None,
        }
    }

    /// Formats the error the way it is shown to users, with a source excerpt
    /// when the error knows where it happened.
    pub fn render(&self, file_name: &str, source: &str) -> String {
        match self.position() {
            Some(position) => render_excerpt(
                file_name,
                source,
                Severity::Error,
                &self.to_string(),
                position,
            ),
            None => format!("Error: {}", self),
        }
    }
}

impl Warning {
    pub fn render(&self, file_name: &str, source: &str) -> String {
        render_excerpt(
            file_name,
            source,
            Severity::Warning,
            &self.message,
            self.position,
        )
    }
}

fn render_excerpt(
    file_name: &str,
    source: &str,
    severity: Severity,
    message: &str,
    position: Position,
) -> String {
    let file = SimpleFile::new(file_name, source);

    let start = (position.start.offset as usize).min(source.len());
    let end = (position.end.offset as usize).clamp(start, source.len());

    let diagnostic = Diagnostic::new(severity)
        .with_message(message)
        .with_labels(vec![Label::primary((), start..end)]);

    let config = Config {
        chars: Chars::ascii(),
        ..Config::default()
    };

    let mut writer = NoColor::new(Vec::new());

    match term::emit(&mut writer, &config, &file, &diagnostic) {
        Ok(()) => String::from_utf8_lossy(&writer.into_inner()).to_string(),
        // codespan refuses ranges that split a character, fall back to the plain message
        Err(_) => format!("Error: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Location;

    #[test]
    fn attaches_first_position_only() {
        let inner = Position {
            start: Location::new(2, 3, 10),
            end: Location::new(2, 4, 11),
        };
        let outer = Position {
            start: Location::new(1, 1, 0),
            end: Location::new(3, 1, 20),
        };

        let err = ProcessingError::new("oops")
            .with_position(inner)
            .with_position(outer);

        assert_eq!(err.position, Some(inner));
    }

    #[test]
    fn renders_source_line() {
        let source = "int main(void) {\n  return y;\n}\n";
        let err = CompileError::Processing(ProcessingError::new("Symbol y not found in symbol table").with_position(Position {
            start: Location::new(2, 10, 26),
            end: Location::new(2, 11, 27),
        }));

        let rendered = err.render("main.c", source);

        assert!(rendered.contains("Symbol y not found in symbol table"));
        assert!(rendered.contains("2 |   return y;"));
    }

    #[test]
    fn renders_generic_without_position() {
        let err = CompileError::Translation(TranslationError::new("bad"));

        assert_eq!(err.render("main.c", ""), "Error: TRANSLATION ERROR\nbad");
    }
}
