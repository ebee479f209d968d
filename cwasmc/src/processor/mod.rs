pub mod ast;
pub mod constant;
pub mod declaration;
pub mod expression;
pub mod processor;
pub mod statement;
pub mod symbol_table;
