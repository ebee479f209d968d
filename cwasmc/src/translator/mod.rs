pub mod conversion;
pub mod expression;
pub mod memory;
pub mod statement;
pub mod translator;
pub mod wat_ast;
