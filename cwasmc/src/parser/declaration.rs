//! Declaration specifiers, declarators and initializers.
//!
//! A declarator is collected as a list of type operations that are applied
//! inside out to the base type, so `int *(*fp)(char)` and `int a[2][3]`
//! come out right without a separate abstract-declarator grammar.

use super::ast::{
    Block, Declaration, EnumDeclaration, Enumerator, ExternalDeclaration, Expression,
    FunctionDefinition, Initializer, Position, Program, StorageClass, TagDeclaration,
};
use super::parser::{PResult, Parse, Parser, ParserError, Precedence};
use crate::lexer::token::Token;
use crate::types::types::{DataType, FunctionType, PrimaryKind};

impl<'a> Parse<'a> for Program {
    fn parse(parser: &mut Parser<'a>, _precedence: Option<Precedence>) -> PResult<Self> {
        let start = parser.current_position();
        let mut children = vec![];

        while !parser.current_token_is(&Token::Eof) {
            if !starts_declaration(parser) {
                return Err(ParserError::unexpected(
                    &parser.current_token,
                    parser.current_position(),
                ));
            }

            match parse_declaration(parser, true)? {
                ParsedDeclaration::Function(function) => {
                    children.push(ExternalDeclaration::Function(function))
                }
                ParsedDeclaration::Declarations {
                    enum_declaration,
                    tag,
                    declarations,
                } => {
                    children.extend(enum_declaration.map(ExternalDeclaration::Enum));
                    children.extend(tag.map(ExternalDeclaration::Tag));
                    children.extend(declarations.into_iter().map(ExternalDeclaration::Declaration));
                }
            }

            parser.next_token()?;
        }

        Ok(Program {
            children,
            position: parser.span_from(start),
        })
    }
}

impl<'a> Parse<'a> for Initializer {
    fn parse(parser: &mut Parser<'a>, _precedence: Option<Precedence>) -> PResult<Self> {
        if !parser.current_token_is(&Token::LSquirly) {
            return Ok(Initializer::Single(Expression::parse(
                parser,
                Some(Precedence::Lowest),
            )?));
        }

        let start = parser.current_position();
        let mut items = vec![];

        loop {
            // also takes care of a trailing comma
            if parser.next_token_is(&Token::RSquirly) {
                parser.next_token()?;
                break;
            }

            parser.next_token()?;
            items.push(Initializer::parse(parser, None)?);

            if parser.next_token_is(&Token::Comma) {
                parser.next_token()?;
                continue;
            }

            parser.expect_peek(Token::RSquirly)?;
            break;
        }

        Ok(Initializer::List {
            items,
            position: parser.span_from(start),
        })
    }
}

/// Whether the current token opens a declaration. An identifier followed by
/// another identifier can only be a typedef name in declaration position.
pub(super) fn starts_declaration(parser: &Parser) -> bool {
    parser.current_token.starts_declaration()
        || (matches!(parser.current_token, Token::Ident(_))
            && matches!(parser.next_token, Token::Ident(_)))
}

pub(super) enum ParsedDeclaration {
    Function(FunctionDefinition),
    Declarations {
        enum_declaration: Option<EnumDeclaration>,
        tag: Option<TagDeclaration>,
        declarations: Vec<Declaration>,
    },
}

struct Specifiers {
    /// `None` for `void`
    data_type: Option<DataType>,
    storage_class: StorageClass,
    is_typedef: bool,
    enum_declaration: Option<EnumDeclaration>,
    /// struct or union that carried a body
    defines_tag: bool,
    position: Position,
}

#[derive(Default)]
struct SpecifierCounts {
    void: u8,
    char: u8,
    short: u8,
    int: u8,
    long: u8,
    signed: u8,
    unsigned: u8,
    float: u8,
    double: u8,
}

impl SpecifierCounts {
    fn total(&self) -> u8 {
        self.void
            + self.char
            + self.short
            + self.int
            + self.long
            + self.signed
            + self.unsigned
            + self.float
            + self.double
    }

    fn any(&self) -> bool {
        self.total() > 0
    }

    /// Whether anything other than `own` specifiers were seen
    fn any_besides(&self, own: u8) -> bool {
        self.total() > own
    }
}

enum DeclaratorOp {
    Pointer,
    Array(Option<Box<Expression>>),
    Function(Vec<Parameter>),
}

struct Parameter {
    name: Option<String>,
    data_type: DataType,
}

struct Declarator {
    name: Option<String>,
    ops: Vec<DeclaratorOp>,
    position: Position,
}

impl Declarator {
    /// Parameter names of the outermost function declarator
    fn parameter_names(&self) -> Option<Vec<Option<String>>> {
        match self.ops.last() {
            Some(DeclaratorOp::Function(params)) => {
                Some(params.iter().map(|param| param.name.clone()).collect())
            }
            _ => None,
        }
    }
}

/// Parses a full declaration starting at its first specifier and stops on
/// the closing `;` (or `}` of a function body).
pub(super) fn parse_declaration(
    parser: &mut Parser,
    allow_function: bool,
) -> PResult<ParsedDeclaration> {
    let specifiers = parse_specifiers(parser)?;
    let start = specifiers.position;

    if parser.next_token_is(&Token::Semicolon) {
        parser.next_token()?;

        let tag = match &specifiers.data_type {
            Some(data_type @ DataType::Struct(_)) if specifiers.defines_tag => {
                Some(TagDeclaration {
                    data_type: data_type.clone(),
                    position: parser.span_from(start),
                })
            }
            _ => None,
        };

        return Ok(ParsedDeclaration::Declarations {
            enum_declaration: specifiers.enum_declaration,
            tag,
            declarations: vec![],
        });
    }

    let mut declarations = vec![];

    loop {
        let declarator = parse_declarator(parser, false)?;
        let name = declarator.name.clone().ok_or_else(|| {
            ParserError::expected("identifier", &parser.next_token, parser.next_position())
        })?;
        let parameter_names = declarator.parameter_names();
        let data_type = apply_declarator(
            specifiers.data_type.clone(),
            declarator.ops,
            declarator.position,
        )?;

        let data_type = if specifiers.is_typedef {
            Some(DataType::Typedef(name.clone()))
        } else {
            data_type
        };

        let Some(data_type) = data_type else {
            return Err(ParserError::Unexpected {
                message: format!(
                    "variable or field '{}' declared void at line {}",
                    name, declarator.position.start.line
                ),
                position: declarator.position,
            });
        };

        if let DataType::Function(function_type) = &data_type {
            if allow_function && declarations.is_empty() && parser.next_token_is(&Token::LSquirly)
            {
                let param_names = parameter_names
                    .unwrap_or_default()
                    .into_iter()
                    .map(|name| {
                        name.ok_or_else(|| ParserError::Unexpected {
                            message: format!(
                                "parameter name omitted at line {}",
                                declarator.position.start.line
                            ),
                            position: declarator.position,
                        })
                    })
                    .collect::<PResult<Vec<_>>>()?;

                parser.next_token()?;
                let body = Block::parse(parser, None)?;

                return Ok(ParsedDeclaration::Function(FunctionDefinition {
                    name,
                    function_type: function_type.clone(),
                    param_names,
                    storage_class: specifiers.storage_class,
                    body,
                    position: parser.span_from(start),
                }));
            }
        }

        let initializer = if parser.next_token_is(&Token::Assign) {
            parser.next_token()?;
            parser.next_token()?;
            Some(Initializer::parse(parser, None)?)
        } else {
            None
        };

        declarations.push(Declaration {
            name,
            data_type,
            storage_class: specifiers.storage_class,
            initializer,
            position: parser.span_from(start),
        });

        if parser.next_token_is(&Token::Comma) {
            parser.next_token()?;
            continue;
        }

        parser.expect_peek(Token::Semicolon)?;
        break;
    }

    Ok(ParsedDeclaration::Declarations {
        enum_declaration: specifiers.enum_declaration,
        tag: None,
        declarations,
    })
}

/// Type name of `sizeof(type)`, starting at its first specifier
pub(super) fn parse_type_name(parser: &mut Parser) -> PResult<DataType> {
    let specifiers = parse_specifiers(parser)?;
    let declarator = parse_declarator(parser, true)?;

    if let Some(name) = &declarator.name {
        return Err(ParserError::unexpected(name, declarator.position));
    }

    apply_declarator(specifiers.data_type, declarator.ops, declarator.position)?.ok_or_else(
        || ParserError::Unexpected {
            message: format!(
                "invalid application of 'sizeof' to a void type at line {}",
                specifiers.position.start.line
            ),
            position: specifiers.position,
        },
    )
}

fn parse_specifiers(parser: &mut Parser) -> PResult<Specifiers> {
    let start = parser.current_position();
    let mut counts = SpecifierCounts::default();
    let mut other: Option<DataType> = None;
    let mut storage_class = None;
    let mut is_typedef = false;
    let mut enum_declaration = None;
    let mut defines_tag = false;

    loop {
        match parser.current_token.clone() {
            Token::Void => counts.void += 1,
            Token::CharKw => counts.char += 1,
            Token::Short => counts.short += 1,
            Token::Int32 => counts.int += 1,
            Token::Long => counts.long += 1,
            Token::Signed => counts.signed += 1,
            Token::Unsigned => counts.unsigned += 1,
            Token::FloatKw => counts.float += 1,
            Token::Double => counts.double += 1,
            Token::Const => {}
            Token::Typedef => is_typedef = true,
            Token::Static | Token::Extern => {
                if storage_class.is_some() {
                    return Err(ParserError::Unexpected {
                        message: format!(
                            "multiple storage classes in declaration specifiers at line {}",
                            parser.current_line()
                        ),
                        position: parser.current_position(),
                    });
                }

                storage_class = Some(if parser.current_token_is(&Token::Static) {
                    StorageClass::Static
                } else {
                    StorageClass::Extern
                });
            }
            Token::Enum => {
                enum_declaration = parse_enum(parser)?;
                other = Some(DataType::Primary(PrimaryKind::SignedInt));
            }
            Token::Struct | Token::Union => {
                let (name, has_body) = parse_tag(parser)?;
                defines_tag = has_body;
                other = Some(DataType::Struct(name));
            }
            Token::Ident(name) if other.is_none() && !counts.any() => {
                other = Some(DataType::Typedef(name));
            }
            tkn => return Err(ParserError::unexpected(tkn, parser.current_position())),
        }

        let continues = parser.next_token.starts_declaration()
            || (matches!(parser.next_token, Token::Ident(_)) && other.is_none() && !counts.any());

        if !continues {
            break;
        }

        parser.next_token()?;
    }

    let position = parser.span_from(start);

    Ok(Specifiers {
        data_type: resolve_type(&counts, other, position)?,
        storage_class: storage_class.unwrap_or(StorageClass::Auto),
        is_typedef,
        enum_declaration,
        defines_tag,
        position,
    })
}

fn resolve_type(
    counts: &SpecifierCounts,
    other: Option<DataType>,
    position: Position,
) -> PResult<Option<DataType>> {
    let error = |message: &str| ParserError::Unexpected {
        message: format!("{} at line {}", message, position.start.line),
        position,
    };
    let too_many = || error("two or more data types in declaration specifiers");

    if let Some(data_type) = other {
        if counts.any() {
            return Err(too_many());
        }

        return Ok(Some(data_type));
    }

    if counts.signed > 0 && counts.unsigned > 0 {
        return Err(error("both 'signed' and 'unsigned' in declaration specifiers"));
    }

    let unsigned = counts.unsigned > 0;
    let sign_specified = counts.signed + counts.unsigned > 0;
    let pick = |signed: PrimaryKind, unsigned_kind: PrimaryKind| {
        if unsigned {
            unsigned_kind
        } else {
            signed
        }
    };

    let kind = if counts.void > 0 {
        if counts.any_besides(counts.void) {
            return Err(too_many());
        }

        return Ok(None);
    } else if counts.float > 0 {
        if counts.any_besides(counts.float) {
            return Err(too_many());
        }

        PrimaryKind::Float
    } else if counts.double > 0 {
        // `long double` is treated as `double`
        if counts.any_besides(counts.double + counts.long) || counts.long > 1 {
            return Err(too_many());
        }

        PrimaryKind::Double
    } else if counts.char > 0 {
        if counts.short + counts.int + counts.long > 0 || counts.char > 1 {
            return Err(too_many());
        }

        pick(PrimaryKind::SignedChar, PrimaryKind::UnsignedChar)
    } else if counts.short > 0 {
        if counts.long > 0 || counts.short > 1 || counts.int > 1 {
            return Err(too_many());
        }

        pick(PrimaryKind::SignedShort, PrimaryKind::UnsignedShort)
    } else if counts.long > 0 {
        if counts.long > 2 {
            return Err(error("'long long long' is too long"));
        }

        if counts.int > 1 {
            return Err(too_many());
        }

        pick(PrimaryKind::SignedLong, PrimaryKind::UnsignedLong)
    } else if counts.int > 0 || sign_specified {
        if counts.int > 1 {
            return Err(too_many());
        }

        pick(PrimaryKind::SignedInt, PrimaryKind::UnsignedInt)
    } else {
        return Err(error("expected type specifier"));
    };

    Ok(Some(DataType::Primary(kind)))
}

/// `enum [name] [{ A, B = 2, ... }]`, current token on `enum`
fn parse_enum(parser: &mut Parser) -> PResult<Option<EnumDeclaration>> {
    let start = parser.current_position();

    let name = match &parser.next_token {
        Token::Ident(name) => {
            let name = name.clone();
            parser.next_token()?;
            Some(name)
        }
        _ => None,
    };

    if !parser.next_token_is(&Token::LSquirly) {
        if name.is_none() {
            return Err(ParserError::expected(
                "identifier or {",
                &parser.next_token,
                parser.next_position(),
            ));
        }

        return Ok(None);
    }

    parser.next_token()?;
    let mut enumerators = vec![];

    loop {
        if parser.next_token_is(&Token::RSquirly) {
            parser.next_token()?;
            break;
        }

        parser.next_token()?;
        let enumerator_start = parser.current_position();
        let Token::Ident(enumerator) = parser.current_token.clone() else {
            return Err(ParserError::expected(
                "identifier",
                &parser.current_token,
                parser.current_position(),
            ));
        };

        let value = if parser.next_token_is(&Token::Assign) {
            parser.next_token()?;
            parser.next_token()?;
            Some(Expression::parse(parser, Some(Precedence::Lowest))?)
        } else {
            None
        };

        enumerators.push(Enumerator {
            name: enumerator,
            value,
            position: parser.span_from(enumerator_start),
        });

        if parser.next_token_is(&Token::Comma) {
            parser.next_token()?;
            continue;
        }

        parser.expect_peek(Token::RSquirly)?;
        break;
    }

    Ok(Some(EnumDeclaration {
        name,
        enumerators,
        position: parser.span_from(start),
    }))
}

/// `struct`/`union` specifiers are only recognized; a body is skipped.
fn parse_tag(parser: &mut Parser) -> PResult<(String, bool)> {
    let name = match &parser.next_token {
        Token::Ident(name) => {
            let name = name.clone();
            parser.next_token()?;
            name
        }
        _ => "<anonymous>".to_string(),
    };

    if !parser.next_token_is(&Token::LSquirly) {
        return Ok((name, false));
    }

    parser.next_token()?;
    let mut depth = 1;

    while depth > 0 {
        parser.next_token()?;

        match parser.current_token {
            Token::LSquirly => depth += 1,
            Token::RSquirly => depth -= 1,
            Token::Eof => {
                return Err(ParserError::expected(
                    Token::RSquirly,
                    Token::Eof,
                    parser.current_position(),
                ))
            }
            _ => {}
        }
    }

    Ok((name, true))
}

/// Parses the declarator that follows the current token. On return the
/// current token is the declarator's last token, or unchanged when an
/// abstract declarator turned out empty.
fn parse_declarator(parser: &mut Parser, allow_abstract: bool) -> PResult<Declarator> {
    let mut position = parser.next_position();
    let mut pointers = 0;

    while parser.next_token_is(&Token::Asterisk) {
        parser.next_token()?;
        pointers += 1;

        while parser.next_token_is(&Token::Const) {
            parser.next_token()?;
        }
    }

    let (name, inner_ops) = match parser.next_token.clone() {
        Token::Ident(name) => {
            parser.next_token()?;
            position = parser.current_position();
            (Some(name), vec![])
        }
        Token::Lparen if parser.peek_after_next()? == Token::Asterisk => {
            parser.next_token()?;
            let inner = parse_declarator(parser, allow_abstract)?;
            parser.expect_peek(Token::Rparen)?;
            position = inner.position;
            (inner.name, inner.ops)
        }
        _ if allow_abstract => (None, vec![]),
        tkn => {
            return Err(ParserError::expected(
                "identifier",
                tkn,
                parser.next_position(),
            ))
        }
    };

    let mut suffixes = vec![];

    loop {
        if parser.next_token_is(&Token::LBrack) {
            parser.next_token()?;

            if parser.next_token_is(&Token::RBrack) {
                parser.next_token()?;
                suffixes.push(DeclaratorOp::Array(None));
            } else {
                parser.next_token()?;
                let count = Expression::parse(parser, Some(Precedence::Lowest))?;
                parser.expect_peek(Token::RBrack)?;
                suffixes.push(DeclaratorOp::Array(Some(Box::new(count))));
            }
        } else if parser.next_token_is(&Token::Lparen) {
            parser.next_token()?;
            suffixes.push(DeclaratorOp::Function(parse_parameters(parser)?));
        } else {
            break;
        }
    }

    let mut ops: Vec<DeclaratorOp> = (0..pointers).map(|_| DeclaratorOp::Pointer).collect();
    ops.extend(suffixes.into_iter().rev());
    ops.extend(inner_ops);

    Ok(Declarator {
        name,
        ops,
        position,
    })
}

/// Parameter list, current token on `(`
fn parse_parameters(parser: &mut Parser) -> PResult<Vec<Parameter>> {
    let mut params = vec![];

    if parser.next_token_is(&Token::Rparen) {
        parser.next_token()?;
        return Ok(params);
    }

    if parser.next_token_is(&Token::Void) && parser.peek_after_next()? == Token::Rparen {
        parser.next_token()?;
        parser.next_token()?;
        return Ok(params);
    }

    loop {
        parser.next_token()?;
        let specifiers = parse_specifiers(parser)?;
        let declarator = parse_declarator(parser, true)?;
        let position = specifiers.position.to(parser.current_position());

        let data_type = apply_declarator(specifiers.data_type, declarator.ops, position)?
            .ok_or_else(|| ParserError::Unexpected {
                message: format!(
                    "parameter has incomplete type 'void' at line {}",
                    position.start.line
                ),
                position,
            })?;

        params.push(Parameter {
            name: declarator.name,
            data_type: data_type.decayed(),
        });

        if parser.next_token_is(&Token::Comma) {
            parser.next_token()?;
            continue;
        }

        parser.expect_peek(Token::Rparen)?;
        break;
    }

    Ok(params)
}

fn apply_declarator(
    base: Option<DataType>,
    ops: Vec<DeclaratorOp>,
    position: Position,
) -> PResult<Option<DataType>> {
    let error = |message: &str| ParserError::Unexpected {
        message: format!("{} at line {}", message, position.start.line),
        position,
    };

    let mut data_type = base;

    for op in ops {
        data_type = Some(match op {
            DeclaratorOp::Pointer => DataType::Pointer(data_type.map(Box::new)),
            DeclaratorOp::Array(count) => match data_type {
                None => return Err(error("declaration of array of voids")),
                Some(DataType::Function(_)) => {
                    return Err(error("declaration of array of functions"))
                }
                Some(element) => DataType::Array {
                    element: Box::new(element),
                    count,
                },
            },
            DeclaratorOp::Function(params) => match data_type {
                Some(DataType::Array { .. }) => {
                    return Err(error("function cannot return array type"))
                }
                Some(DataType::Function(_)) => {
                    return Err(error("function cannot return function type"))
                }
                return_type => DataType::Function(FunctionType {
                    params: params.into_iter().map(|param| param.data_type).collect(),
                    return_type: return_type.map(Box::new),
                }),
            },
        });
    }

    Ok(data_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lexer::Lexer;
    use crate::parser::ast::{BlockItem, ExpressionKind, Statement};

    fn parse_program(source: &str) -> PResult<Program> {
        let mut lexer = Lexer::new(source.to_string());
        let mut parser = Parser::new(&mut lexer)?;
        Program::parse(&mut parser, None)
    }

    fn int() -> DataType {
        DataType::Primary(PrimaryKind::SignedInt)
    }

    fn declarations(source: &str) -> Vec<Declaration> {
        parse_program(source)
            .unwrap()
            .children
            .into_iter()
            .filter_map(|child| match child {
                ExternalDeclaration::Declaration(decl) => Some(decl),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn primary_specifiers() {
        let decls = declarations(
            "unsigned u; long int l; unsigned long long ull; char c; \
             unsigned char uc; short s; signed x; long double d; float f;",
        );
        let kinds: Vec<_> = decls.iter().map(|d| d.data_type.clone()).collect();

        assert_eq!(
            kinds,
            vec![
                DataType::Primary(PrimaryKind::UnsignedInt),
                DataType::Primary(PrimaryKind::SignedLong),
                DataType::Primary(PrimaryKind::UnsignedLong),
                DataType::Primary(PrimaryKind::SignedChar),
                DataType::Primary(PrimaryKind::UnsignedChar),
                DataType::Primary(PrimaryKind::SignedShort),
                DataType::Primary(PrimaryKind::SignedInt),
                DataType::Primary(PrimaryKind::Double),
                DataType::Primary(PrimaryKind::Float),
            ]
        );
    }

    #[test]
    fn conflicting_specifiers() {
        let err = parse_program("signed unsigned int x;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "both 'signed' and 'unsigned' in declaration specifiers at line 1"
        );

        let err = parse_program("int float x;").unwrap_err();
        assert_eq!(
            err.to_string(),
            "two or more data types in declaration specifiers at line 1"
        );
    }

    #[test]
    fn declarator_shapes() {
        let decls = declarations("int *a[3]; int (*fp)(int, char); int m[2][3]; void *v;");

        assert!(decls[0]
            .data_type
            .same_as(&DataType::array_of(DataType::pointer_to(int()), 3)));

        let function = DataType::Function(FunctionType {
            params: vec![int(), DataType::Primary(PrimaryKind::SignedChar)],
            return_type: Some(Box::new(int())),
        });
        assert!(decls[1].data_type.same_as(&DataType::pointer_to(function)));

        assert!(decls[2]
            .data_type
            .same_as(&DataType::array_of(DataType::array_of(int(), 3), 2)));

        assert!(decls[3].data_type.is_void_pointer());
    }

    #[test]
    fn declarator_lists_and_initializers() {
        let decls = declarations("int a = 1, b, c[] = {1, 2, {3},};");

        assert_eq!(decls.len(), 3);
        assert!(matches!(decls[0].initializer, Some(Initializer::Single(_))));
        assert!(decls[1].initializer.is_none());

        match &decls[2].initializer {
            Some(Initializer::List { items, .. }) => {
                assert_eq!(items.len(), 3);
                assert!(matches!(items[2], Initializer::List { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn function_definitions() {
        let program =
            parse_program("int add(int a, int b) { return a + b; } void f(void); int main() {}")
                .unwrap();

        match &program.children[0] {
            ExternalDeclaration::Function(function) => {
                assert_eq!(function.name, "add");
                assert_eq!(function.param_names, vec!["a", "b"]);
                assert_eq!(function.function_type.params.len(), 2);
                assert!(matches!(
                    function.body.items[0],
                    BlockItem::Statement(Statement::Return(_))
                ));
            }
            other => panic!("unexpected {:?}", other),
        }

        match &program.children[1] {
            ExternalDeclaration::Declaration(decl) => match &decl.data_type {
                DataType::Function(function_type) => {
                    assert!(function_type.params.is_empty());
                    assert!(function_type.return_type.is_none());
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            program.children[2],
            ExternalDeclaration::Function(_)
        ));
    }

    #[test]
    fn array_parameters_decay() {
        let program = parse_program("int sum(int xs[], int n) { return 0; }").unwrap();

        match &program.children[0] {
            ExternalDeclaration::Function(function) => {
                assert!(function.function_type.params[0].same_as(&DataType::pointer_to(int())));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn enums() {
        let program = parse_program("enum color { RED, GREEN = 5, BLUE, }; enum color c;").unwrap();

        match &program.children[0] {
            ExternalDeclaration::Enum(declaration) => {
                assert_eq!(declaration.name.as_deref(), Some("color"));
                assert_eq!(declaration.enumerators.len(), 3);
                assert!(matches!(
                    declaration.enumerators[1].value.as_ref().map(|v| &v.kind),
                    Some(ExpressionKind::IntegerConstant { value: 5, .. })
                ));
            }
            other => panic!("unexpected {:?}", other),
        }

        match &program.children[1] {
            ExternalDeclaration::Declaration(decl) => assert_eq!(decl.data_type, int()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn structs_and_typedefs_are_recognized() {
        let program =
            parse_program("struct point { int x; int y; }; typedef int myint; struct point p;")
                .unwrap();

        assert!(matches!(
            &program.children[0],
            ExternalDeclaration::Tag(TagDeclaration {
                data_type: DataType::Struct(name),
                ..
            }) if name == "point"
        ));

        let decls: Vec<_> = program
            .children
            .iter()
            .filter_map(|child| match child {
                ExternalDeclaration::Declaration(decl) => Some(decl.data_type.clone()),
                _ => None,
            })
            .collect();

        assert_eq!(
            decls,
            vec![
                DataType::Typedef("myint".into()),
                DataType::Struct("point".into())
            ]
        );
    }

    #[test]
    fn void_variable_is_rejected() {
        let err = parse_program("void x;").unwrap_err();
        assert_eq!(err.to_string(), "variable or field 'x' declared void at line 1");
    }

    #[test]
    fn missing_semicolon() {
        let err = parse_program("int x\nint y;").unwrap_err();
        assert_eq!(err.to_string(), "expected ; found int at line 2");
    }
}
