pub mod ast;
pub mod declaration;
pub mod expression;
pub mod parser;
pub mod statement;
