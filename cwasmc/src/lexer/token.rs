use std::fmt::Display;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Token {
    Ident(String),
    /// Integer constant as written, including any suffix
    Int(String),
    /// Floating constant as written, including any suffix
    Float(String),
    /// Character constant, already unescaped
    Char(u8),
    String(Vec<u8>),

    Illegal,
    Eof,

    Assign,
    PlusAssign,
    MinusAssign,
    AsteriskAssign,
    ForwardSlashAssign,
    ModAssign,
    AmpersandAssign,
    PipeAssign,
    CaretAssign,
    ShiftLeftAssign,
    ShiftRightAssign,

    Plus,
    Minus,
    Asterisk,
    ForwardSlash,
    Mod,
    Increment,
    Decrement,
    Bang,
    Tilde,
    Ampersand,
    Pipe,
    Caret,
    And,
    Or,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Question,

    Comma,
    Semicolon,
    Colon,
    Lparen,
    Rparen,
    LSquirly,
    RSquirly,
    LBrack,
    RBrack,

    // type keywords
    Void,
    CharKw,
    Short,
    Int32,
    Long,
    Signed,
    Unsigned,
    FloatKw,
    Double,
    Enum,
    Struct,
    Union,
    Typedef,
    Static,
    Extern,
    Const,

    If,
    Else,
    While,
    Do,
    For,
    Switch,
    Case,
    Default,
    Break,
    Continue,
    Return,
    Sizeof,
}

impl Token {
    pub fn from_keyword(ident: &str) -> Option<Token> {
        Some(match ident {
            "void" => Token::Void,
            "char" => Token::CharKw,
            "short" => Token::Short,
            "int" => Token::Int32,
            "long" => Token::Long,
            "signed" => Token::Signed,
            "unsigned" => Token::Unsigned,
            "float" => Token::FloatKw,
            "double" => Token::Double,
            "enum" => Token::Enum,
            "struct" => Token::Struct,
            "union" => Token::Union,
            "typedef" => Token::Typedef,
            "static" => Token::Static,
            "extern" => Token::Extern,
            "const" => Token::Const,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "do" => Token::Do,
            "for" => Token::For,
            "switch" => Token::Switch,
            "case" => Token::Case,
            "default" => Token::Default,
            "break" => Token::Break,
            "continue" => Token::Continue,
            "return" => Token::Return,
            "sizeof" => Token::Sizeof,
            _ => return None,
        })
    }

    /// Tokens that can start a declaration
    pub fn starts_declaration(&self) -> bool {
        matches!(
            self,
            Token::Void
                | Token::CharKw
                | Token::Short
                | Token::Int32
                | Token::Long
                | Token::Signed
                | Token::Unsigned
                | Token::FloatKw
                | Token::Double
                | Token::Enum
                | Token::Struct
                | Token::Union
                | Token::Typedef
                | Token::Static
                | Token::Extern
                | Token::Const
        )
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Token::*;
        match self {
            Ident(str) => write!(f, "{}", str),
            Int(int) => write!(f, "{}", int),
            Float(float) => write!(f, "{}", float),
            Char(c) => write!(f, "'{}'", char::from(*c)),
            String(s) => write!(f, "\"{}\"", std::string::String::from_utf8_lossy(s)),

            Illegal => write!(f, "Illegal"),
            Eof => write!(f, "End of file"),

            Assign => write!(f, "="),
            PlusAssign => write!(f, "+="),
            MinusAssign => write!(f, "-="),
            AsteriskAssign => write!(f, "*="),
            ForwardSlashAssign => write!(f, "/="),
            ModAssign => write!(f, "%="),
            AmpersandAssign => write!(f, "&="),
            PipeAssign => write!(f, "|="),
            CaretAssign => write!(f, "^="),
            ShiftLeftAssign => write!(f, "<<="),
            ShiftRightAssign => write!(f, ">>="),

            Plus => write!(f, "+"),
            Minus => write!(f, "-"),
            Asterisk => write!(f, "*"),
            ForwardSlash => write!(f, "/"),
            Mod => write!(f, "%"),
            Increment => write!(f, "++"),
            Decrement => write!(f, "--"),
            Bang => write!(f, "!"),
            Tilde => write!(f, "~"),
            Ampersand => write!(f, "&"),
            Pipe => write!(f, "|"),
            Caret => write!(f, "^"),
            And => write!(f, "&&"),
            Or => write!(f, "||"),
            ShiftLeft => write!(f, "<<"),
            ShiftRight => write!(f, ">>"),
            Equal => write!(f, "=="),
            NotEqual => write!(f, "!="),
            LessThan => write!(f, "<"),
            LessEqual => write!(f, "<="),
            GreaterThan => write!(f, ">"),
            GreaterEqual => write!(f, ">="),
            Question => write!(f, "?"),

            Comma => write!(f, ","),
            Semicolon => write!(f, ";"),
            Colon => write!(f, ":"),
            Lparen => write!(f, "("),
            Rparen => write!(f, ")"),
            LSquirly => write!(f, "{}", '{'),
            RSquirly => write!(f, "{}", '}'),
            LBrack => write!(f, "["),
            RBrack => write!(f, "]"),

            Void => write!(f, "void"),
            CharKw => write!(f, "char"),
            Short => write!(f, "short"),
            Int32 => write!(f, "int"),
            Long => write!(f, "long"),
            Signed => write!(f, "signed"),
            Unsigned => write!(f, "unsigned"),
            FloatKw => write!(f, "float"),
            Double => write!(f, "double"),
            Enum => write!(f, "enum"),
            Struct => write!(f, "struct"),
            Union => write!(f, "union"),
            Typedef => write!(f, "typedef"),
            Static => write!(f, "static"),
            Extern => write!(f, "extern"),
            Const => write!(f, "const"),

            If => write!(f, "if"),
            Else => write!(f, "else"),
            While => write!(f, "while"),
            Do => write!(f, "do"),
            For => write!(f, "for"),
            Switch => write!(f, "switch"),
            Case => write!(f, "case"),
            Default => write!(f, "default"),
            Break => write!(f, "break"),
            Continue => write!(f, "continue"),
            Return => write!(f, "return"),
            Sizeof => write!(f, "sizeof"),
        }
    }
}
