use serde::Serialize;

use crate::types::types::{DataType, FunctionType};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Location {
    pub line: u32,
    pub column: u32,
    pub offset: u32,
}

impl Location {
    pub fn new(line: u32, column: u32, offset: u32) -> Self {
        Self {
            line,
            column,
            offset,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Position {
    pub start: Location,
    pub end: Location,
}

impl Position {
    /// Span covering both positions
    pub fn to(self, other: Position) -> Position {
        Position {
            start: self.start,
            end: other.end,
        }
    }
}

/// Root of a translation unit
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Program {
    pub children: Vec<ExternalDeclaration>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ExternalDeclaration {
    Declaration(Declaration),
    Enum(EnumDeclaration),
    Tag(TagDeclaration),
    Function(FunctionDefinition),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StorageClass {
    Auto,
    Static,
    Extern,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Declaration {
    pub name: String,
    pub data_type: DataType,
    pub storage_class: StorageClass,
    pub initializer: Option<Initializer>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Initializer {
    Single(Expression),
    List {
        items: Vec<Initializer>,
        position: Position,
    },
}

impl Initializer {
    pub fn position(&self) -> Position {
        match self {
            Initializer::Single(expr) => expr.position,
            Initializer::List { position, .. } => *position,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EnumDeclaration {
    pub name: Option<String>,
    pub enumerators: Vec<Enumerator>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Enumerator {
    pub name: String,
    pub value: Option<Expression>,
    pub position: Position,
}

/// `struct name { ... };` with no declarators
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TagDeclaration {
    pub data_type: DataType,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub function_type: FunctionType,
    pub param_names: Vec<String>,
    pub storage_class: StorageClass,
    pub body: Block,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Block {
    pub items: Vec<BlockItem>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum BlockItem {
    Declaration(Declaration),
    Enum(EnumDeclaration),
    Tag(TagDeclaration),
    Statement(Statement),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum Statement {
    Block(Block),
    Expression(Expression),
    Empty(Position),
    If(IfStatement),
    While(WhileStatement),
    DoWhile(WhileStatement),
    For(ForStatement),
    Switch(SwitchStatement),
    Break(Position),
    Continue(Position),
    Return(ReturnStatement),
}

impl Statement {
    pub fn position(&self) -> Position {
        match self {
            Statement::Block(block) => block.position,
            Statement::Expression(expr) => expr.position,
            Statement::Empty(position)
            | Statement::Break(position)
            | Statement::Continue(position) => *position,
            Statement::If(stmt) => stmt.position,
            Statement::While(stmt) | Statement::DoWhile(stmt) => stmt.position,
            Statement::For(stmt) => stmt.position,
            Statement::Switch(stmt) => stmt.position,
            Statement::Return(stmt) => stmt.position,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IfStatement {
    pub condition: Expression,
    pub then_branch: Box<Statement>,
    pub else_branch: Option<Box<Statement>>,
    pub position: Position,
}

/// Shared by `while` and `do ... while`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WhileStatement {
    pub condition: Expression,
    pub body: Box<Statement>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ForClause {
    Declarations(Vec<Declaration>),
    Expression(Expression),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ForStatement {
    pub clause: Option<ForClause>,
    pub condition: Option<Expression>,
    pub update: Option<Expression>,
    pub body: Box<Statement>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SwitchCase {
    pub value: Expression,
    pub items: Vec<BlockItem>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SwitchStatement {
    pub expression: Expression,
    pub cases: Vec<SwitchCase>,
    pub default: Option<Vec<BlockItem>>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReturnStatement {
    pub value: Option<Expression>,
    pub position: Position,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub position: Position,
}

impl Expression {
    pub fn new(kind: ExpressionKind, position: Position) -> Self {
        Self { kind, position }
    }

    pub fn integer(value: u128, position: Position) -> Self {
        Self::new(
            ExpressionKind::IntegerConstant {
                value,
                suffix: None,
            },
            position,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum IntegerSuffix {
    Unsigned,
    Long,
    UnsignedLong,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ExpressionKind {
    IntegerConstant {
        value: u128,
        suffix: Option<IntegerSuffix>,
    },
    FloatConstant {
        value: f64,
        /// `f` suffix
        is_float: bool,
    },
    StringLiteral(Vec<u8>),
    Identifier(String),
    Binary {
        operator: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Assignment {
        target: Box<Expression>,
        value: Box<Expression>,
    },
    Conditional {
        condition: Box<Expression>,
        then_expr: Box<Expression>,
        else_expr: Box<Expression>,
    },
    Prefix {
        operator: PrefixOperator,
        operand: Box<Expression>,
    },
    Postfix {
        operator: PostfixOperator,
        operand: Box<Expression>,
    },
    AddressOf(Box<Expression>),
    Dereference(Box<Expression>),
    Call {
        callee: Box<Expression>,
        arguments: Vec<Expression>,
    },
    SizeOfExpression(Box<Expression>),
    SizeOfType(DataType),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    ShiftLeft,
    ShiftRight,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Equal,
    NotEqual,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Subtract => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Remainder => "%",
            BinaryOperator::ShiftLeft => "<<",
            BinaryOperator::ShiftRight => ">>",
            BinaryOperator::LessThan => "<",
            BinaryOperator::LessEqual => "<=",
            BinaryOperator::GreaterThan => ">",
            BinaryOperator::GreaterEqual => ">=",
            BinaryOperator::Equal => "==",
            BinaryOperator::NotEqual => "!=",
            BinaryOperator::BitwiseAnd => "&",
            BinaryOperator::BitwiseOr => "|",
            BinaryOperator::BitwiseXor => "^",
            BinaryOperator::LogicalAnd => "&&",
            BinaryOperator::LogicalOr => "||",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOperator::LessThan
                | BinaryOperator::LessEqual
                | BinaryOperator::GreaterThan
                | BinaryOperator::GreaterEqual
                | BinaryOperator::Equal
                | BinaryOperator::NotEqual
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOperator::LogicalAnd | BinaryOperator::LogicalOr)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PrefixOperator {
    Increment,
    Decrement,
    Plus,
    Minus,
    LogicalNot,
    BitwiseNot,
}

impl PrefixOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            PrefixOperator::Increment => "++",
            PrefixOperator::Decrement => "--",
            PrefixOperator::Plus => "+",
            PrefixOperator::Minus => "-",
            PrefixOperator::LogicalNot => "!",
            PrefixOperator::BitwiseNot => "~",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PostfixOperator {
    Increment,
    Decrement,
}
