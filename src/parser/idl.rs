//! `.bridge` text format.
//!
//! ```text
//! schema ledger version 1 {
//!     record posting { account: string, amount: s64 }
//!     enum ledger-error { not-found(string), unbalanced }
//!     type account-id = string
//!
//!     add@0: func(a: s32, b: s32) -> s32
//!     open: func(path: string) -> ledger throws ledger-error
//!
//!     object ledger {
//!         constructor(name: string)
//!         balance: func(account: account-id) -> s64 throws ledger-error
//!     }
//! }
//! ```

use super::ParseError;
use crate::types::{Case, Constructor, Field, Function, ObjectDef, Param, Schema, Type, TypeDef};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(String),
    Symbol(char),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => name.clone(),
            Tok::Number(n) => n.clone(),
            Tok::Symbol(ch) => ch.to_string(),
            Tok::Eof => "end of input".to_string(),
        }
    }
}

/// Parse a schema from the text format.
pub fn parse_schema(src: &str) -> Result<Schema, ParseError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser::new(tokens);

    parser.expect_keyword("schema")?;
    let name = parser.expect_ident()?;
    if !parser.accept_ident("version") {
        return Err(ParseError::MissingVersion);
    }
    let version = parser.expect_number()?;
    let mut schema = Schema::new(name, version);

    parser.expect_symbol('{')?;
    parse_schema_body(&mut parser, &mut schema)?;
    parser.expect_symbol('}')?;
    parser.expect_eof()?;
    Ok(schema)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Tok {
        self.peek_n(0)
    }

    fn peek_n(&self, offset: usize) -> &Tok {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.tok)
            .unwrap_or(&Tok::Eof)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn next(&mut self) -> Tok {
        let tok = self.peek().clone();
        if !matches!(tok, Tok::Eof) {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, found: Tok, expected: &str) -> ParseError {
        match found {
            Tok::Eof => ParseError::UnexpectedEof(expected.to_string()),
            other => ParseError::UnexpectedToken {
                found: other.describe(),
                expected: expected.to_string(),
                // `next` already advanced past the offending token
                line: self
                    .tokens
                    .get(self.pos.saturating_sub(1))
                    .map(|t| t.line)
                    .unwrap_or(1),
            },
        }
    }

    fn expect_symbol(&mut self, expected: char) -> Result<(), ParseError> {
        match self.next() {
            Tok::Symbol(ch) if ch == expected => Ok(()),
            other => Err(self.unexpected(other, &format!("'{expected}'"))),
        }
    }

    fn accept_symbol(&mut self, expected: char) -> bool {
        if matches!(self.peek(), Tok::Symbol(ch) if *ch == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Tok::Ident(name) => Ok(name),
            other => Err(self.unexpected(other, "identifier")),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        match self.next() {
            Tok::Ident(name) if name == keyword => Ok(()),
            other => Err(self.unexpected(other, &format!("'{keyword}'"))),
        }
    }

    fn accept_ident(&mut self, expected: &str) -> bool {
        if matches!(self.peek(), Tok::Ident(name) if name == expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_number(&mut self) -> Result<u32, ParseError> {
        match self.next() {
            Tok::Number(n) => n.parse().map_err(|_| ParseError::InvalidNumber(n)),
            other => Err(self.unexpected(other, "number")),
        }
    }

    fn expect_eof(&mut self) -> Result<(), ParseError> {
        match self.next() {
            Tok::Eof => Ok(()),
            other => Err(self.unexpected(other, "end of input")),
        }
    }

    /// `@N` after a declaration name.
    fn parse_index(&mut self) -> Result<Option<u32>, ParseError> {
        if self.accept_symbol('@') {
            Ok(Some(self.expect_number()?))
        } else {
            Ok(None)
        }
    }

    /// True when the upcoming tokens read `name: func` or `name@N: func`.
    fn at_named_func(&self) -> bool {
        if !matches!(self.peek(), Tok::Ident(_)) {
            return false;
        }
        let colon = match self.peek_n(1) {
            Tok::Symbol('@') => 3,
            _ => 1,
        };
        matches!(self.peek_n(colon), Tok::Symbol(':'))
            && matches!(self.peek_n(colon + 1), Tok::Ident(kw) if kw == "func")
    }
}

fn parse_schema_body(parser: &mut Parser, schema: &mut Schema) -> Result<(), ParseError> {
    loop {
        if parser.accept_symbol(';') {
            continue;
        }
        if matches!(parser.peek(), Tok::Symbol('}') | Tok::Eof) {
            return Ok(());
        }

        if parser.at_named_func() {
            schema.add_function(parse_named_func(parser)?);
            continue;
        }

        let keyword = parser.expect_ident()?;
        match keyword.as_str() {
            "type" => schema.add_type(parse_alias(parser)?),
            "record" => schema.add_type(parse_record(parser)?),
            "enum" | "variant" => schema.add_type(parse_enum(parser)?),
            "object" => schema.add_object(parse_object(parser)?),
            "func" => schema.add_function(parse_func_keyword(parser)?),
            other => {
                return Err(ParseError::UnexpectedToken {
                    found: other.to_string(),
                    expected: "declaration".to_string(),
                    line: parser.line(),
                })
            }
        }
    }
}

fn parse_alias(parser: &mut Parser) -> Result<TypeDef, ParseError> {
    let name = parser.expect_ident()?;
    parser.expect_symbol('=')?;
    let ty = parse_type(parser)?;
    Ok(TypeDef::Alias { name, ty })
}

fn parse_record(parser: &mut Parser) -> Result<TypeDef, ParseError> {
    let name = parser.expect_ident()?;
    parser.expect_symbol('{')?;
    let mut fields = Vec::new();

    while !parser.accept_symbol('}') {
        let field_name = parser.expect_ident()?;
        parser.expect_symbol(':')?;
        let ty = parse_type(parser)?;
        fields.push(Field::new(field_name, ty));
        parser.accept_symbol(',');
    }

    Ok(TypeDef::Record { name, fields })
}

fn parse_enum(parser: &mut Parser) -> Result<TypeDef, ParseError> {
    let name = parser.expect_ident()?;
    parser.expect_symbol('{')?;
    let mut cases = Vec::new();

    while !parser.accept_symbol('}') {
        let case_name = parser.expect_ident()?;
        let payload = if parser.accept_symbol('(') {
            let ty = parse_type(parser)?;
            parser.expect_symbol(')')?;
            Some(ty)
        } else {
            None
        };
        cases.push(Case::new(case_name, payload));
        parser.accept_symbol(',');
    }

    Ok(TypeDef::Enum { name, cases })
}

fn parse_object(parser: &mut Parser) -> Result<ObjectDef, ParseError> {
    let mut object = ObjectDef::new(parser.expect_ident()?);
    object.index = parser.parse_index()?;
    parser.expect_symbol('{')?;

    loop {
        if parser.accept_symbol(';') {
            continue;
        }
        if parser.accept_symbol('}') {
            break;
        }
        if parser.at_named_func() {
            object.methods.push(parse_named_func(parser)?);
            continue;
        }
        if parser.accept_ident("constructor") {
            parser.expect_symbol('(')?;
            let params = parse_params(parser)?;
            parser.expect_symbol(')')?;
            let throws = parse_throws(parser)?;
            object.constructor = Some(Constructor { params, throws });
            continue;
        }
        if parser.accept_ident("func") {
            object.methods.push(parse_func_keyword(parser)?);
            continue;
        }
        let found = parser.next();
        return Err(parser.unexpected(found, "method or constructor"));
    }

    Ok(object)
}

/// `name[@N]: func(...)`
fn parse_named_func(parser: &mut Parser) -> Result<Function, ParseError> {
    let name = parser.expect_ident()?;
    let index = parser.parse_index()?;
    parser.expect_symbol(':')?;
    parser.expect_keyword("func")?;
    parse_signature(parser, name, index)
}

/// `func name[@N](...)`
fn parse_func_keyword(parser: &mut Parser) -> Result<Function, ParseError> {
    let name = parser.expect_ident()?;
    let index = parser.parse_index()?;
    parse_signature(parser, name, index)
}

fn parse_signature(
    parser: &mut Parser,
    name: String,
    index: Option<u32>,
) -> Result<Function, ParseError> {
    parser.expect_symbol('(')?;
    let params = parse_params(parser)?;
    parser.expect_symbol(')')?;

    let returns = if parser.accept_symbol('-') {
        parser.expect_symbol('>')?;
        if parser.accept_ident("_") {
            None
        } else {
            Some(parse_type(parser)?)
        }
    } else {
        None
    };
    let throws = parse_throws(parser)?;

    Ok(Function {
        name,
        index,
        params,
        returns,
        throws,
    })
}

fn parse_throws(parser: &mut Parser) -> Result<Option<String>, ParseError> {
    if parser.accept_ident("throws") {
        Ok(Some(parser.expect_ident()?))
    } else {
        Ok(None)
    }
}

fn parse_params(parser: &mut Parser) -> Result<Vec<Param>, ParseError> {
    let mut params = Vec::new();
    if matches!(parser.peek(), Tok::Symbol(')')) {
        return Ok(params);
    }

    loop {
        let name = parser.expect_ident()?;
        parser.expect_symbol(':')?;
        let ty = parse_type(parser)?;
        params.push(Param::new(name, ty));
        if matches!(parser.peek(), Tok::Symbol(')')) {
            break;
        }
        parser.expect_symbol(',')?;
        if matches!(parser.peek(), Tok::Symbol(')')) {
            break;
        }
    }

    Ok(params)
}

fn parse_type(parser: &mut Parser) -> Result<Type, ParseError> {
    let ident = parser.expect_ident()?;
    match ident.as_str() {
        "bool" => Ok(Type::Bool),
        "u8" => Ok(Type::U8),
        "u16" => Ok(Type::U16),
        "u32" => Ok(Type::U32),
        "u64" => Ok(Type::U64),
        "s8" => Ok(Type::S8),
        "s16" => Ok(Type::S16),
        "s32" => Ok(Type::S32),
        "s64" => Ok(Type::S64),
        "f32" => Ok(Type::F32),
        "f64" => Ok(Type::F64),
        "string" => Ok(Type::String),
        "bytes" => Ok(Type::Bytes),
        "option" => parse_single_param(parser, Type::option),
        "list" => parse_single_param(parser, Type::list),
        "box" => parse_single_param(parser, Type::boxed),
        "own" => {
            parser.expect_symbol('<')?;
            let name = parser.expect_ident()?;
            parser.expect_symbol('>')?;
            Ok(Type::Object(name))
        }
        "map" => {
            parser.expect_symbol('<')?;
            let key = parse_type(parser)?;
            parser.expect_symbol(',')?;
            let value = parse_type(parser)?;
            parser.expect_symbol('>')?;
            Ok(Type::map(key, value))
        }
        _ => Ok(Type::Named(ident)),
    }
}

fn parse_single_param<F>(parser: &mut Parser, wrap: F) -> Result<Type, ParseError>
where
    F: Fn(Type) -> Type,
{
    parser.expect_symbol('<')?;
    let inner = parse_type(parser)?;
    parser.expect_symbol('>')?;
    Ok(wrap(inner))
}

fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    let mut line = 1;

    while let Some(&ch) = chars.peek() {
        if ch == '\n' {
            line += 1;
            chars.next();
            continue;
        }
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch == '/' {
            chars.next();
            if matches!(chars.peek(), Some('/')) {
                for next in chars.by_ref() {
                    if next == '\n' {
                        line += 1;
                        break;
                    }
                }
                continue;
            }
            if matches!(chars.peek(), Some('*')) {
                chars.next();
                while let Some(next) = chars.next() {
                    if next == '\n' {
                        line += 1;
                    }
                    if next == '*' && matches!(chars.peek(), Some('/')) {
                        chars.next();
                        break;
                    }
                }
                continue;
            }
            return Err(ParseError::InvalidChar { ch: '/', line });
        }

        if ch.is_ascii_digit() {
            let mut number = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() {
                    number.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                tok: Tok::Number(number),
                line,
            });
            continue;
        }

        if is_ident_start(ch) {
            let mut ident = String::new();
            while let Some(&next) = chars.peek() {
                // `a->b`: a dash followed by '>' is an arrow, not part of the name
                if next == '-' {
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if matches!(lookahead.peek(), Some('>')) {
                        break;
                    }
                }
                if is_ident_continue(next) {
                    ident.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token {
                tok: Tok::Ident(ident),
                line,
            });
            continue;
        }

        if is_symbol(ch) {
            tokens.push(Token {
                tok: Tok::Symbol(ch),
                line,
            });
            chars.next();
            continue;
        }

        return Err(ParseError::InvalidChar { ch, line });
    }

    tokens.push(Token { tok: Tok::Eof, line });
    Ok(tokens)
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

fn is_symbol(ch: char) -> bool {
    matches!(
        ch,
        '{' | '}' | '(' | ')' | '<' | '>' | ':' | ',' | '=' | ';' | '-' | '@'
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_functions_and_indices() {
        let src = r#"
            schema math version 1 {
                add@4: func(a: s32, b: s32) -> s32
                func ping()
                reset: func() -> _
            }
        "#;

        let schema = parse_schema(src).expect("parse");
        assert_eq!(schema.name, "math");
        assert_eq!(schema.version, 1);
        assert_eq!(schema.functions.len(), 3);
        assert_eq!(schema.functions[0].index, Some(4));
        assert_eq!(schema.functions[0].returns, Some(Type::S32));
        assert_eq!(schema.functions[1].returns, None);
        assert_eq!(schema.functions[2].returns, None);
    }

    #[test]
    fn parse_types_and_objects() {
        let src = r#"
            schema ledger version 1 {
                // postings are signed: +debit, -credit
                record posting { account: string, amount: s64, }
                enum ledger-error { not-found(string), unbalanced }
                type account-id = string
                /* containers */
                record book { balances: map<string, s64>, memo: option<bytes>, next: option<box<book>> }

                object ledger@1 {
                    constructor(name: string) throws ledger-error
                    balance: func(account: account-id) -> s64 throws ledger-error
                    func snapshot() -> list<posting>
                }
                open: func(path: string) -> own<ledger> throws ledger-error
            }
        "#;

        let schema = parse_schema(src).expect("parse");
        assert_eq!(schema.types.len(), 4);
        assert_eq!(schema.objects.len(), 1);

        let ledger = &schema.objects[0];
        assert_eq!(ledger.index, Some(1));
        let ctor = ledger.constructor.as_ref().expect("constructor");
        assert_eq!(ctor.throws.as_deref(), Some("ledger-error"));
        assert_eq!(ledger.methods.len(), 2);
        assert_eq!(
            ledger.methods[1].returns,
            Some(Type::list(Type::named("posting")))
        );

        let open = schema.find_function("open").expect("open");
        assert_eq!(open.returns, Some(Type::object("ledger")));
        assert!(open.is_fallible());

        match schema.find_type("book") {
            Some(TypeDef::Record { fields, .. }) => {
                assert_eq!(fields[0].ty, Type::map(Type::String, Type::S64));
                assert_eq!(
                    fields[2].ty,
                    Type::option(Type::boxed(Type::named("book")))
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arrow_after_kebab_name() {
        let schema = parse_schema("schema s version 1 { f: func()->account-id }").expect("parse");
        assert_eq!(schema.functions[0].returns, Some(Type::named("account-id")));
    }

    #[test]
    fn missing_version_is_rejected() {
        let err = parse_schema("schema s { }").unwrap_err();
        assert!(matches!(err, ParseError::MissingVersion));
    }

    #[test]
    fn errors_carry_line_numbers() {
        let src = "schema s version 1 {\n  record r { a: s32 }\n  bogus thing\n}";
        match parse_schema(src).unwrap_err() {
            ParseError::UnexpectedToken { found, line, .. } => {
                assert_eq!(found, "bogus");
                assert_eq!(line, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unterminated_body_is_eof_error() {
        let err = parse_schema("schema s version 1 { add: func(a: s32").unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof(_)));
    }
}
