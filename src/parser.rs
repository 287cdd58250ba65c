use crate::ast::*;
use crate::lexer::{Lexeme, Lexer, Token};
use crate::types::SemanticType;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: unexpected token {found:?}, expected {expected}")]
    Unexpected {
        line: usize,
        found: Token,
        expected: &'static str,
    },
    #[error("line {line}: entity `{name}` is missing its closing brace")]
    UnterminatedEntity { line: usize, name: String },
    #[error("line {line}: duplicate entity `{name}`")]
    DuplicateEntity { line: usize, name: String },
    #[error("line {line}: duplicate field `{entity}.{field}`")]
    DuplicateField {
        line: usize,
        entity: String,
        field: String,
    },
}

impl ParseError {
    pub fn line(&self) -> usize {
        match self {
            Self::Unexpected { line, .. }
            | Self::UnterminatedEntity { line, .. }
            | Self::DuplicateEntity { line, .. }
            | Self::DuplicateField { line, .. } => *line,
        }
    }
}

/// Result of a parse: whatever could be read, plus one error per skipped
/// construct.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    pub schema: Schema,
    pub errors: Vec<ParseError>,
}

/// Forgiving parser for the schema DSL.
///
/// ```text
/// entity_decl   := NAME [ '[' meta_list ']' ] '{' field_decl* '}'
/// meta_list     := key ':' value (',' key ':' value)*
/// field_decl    := NAME TYPE ['pk']
/// relation_decl := NAME '.' NAME ('>' | '<') NAME '.' NAME
/// ```
///
/// The schema text is re-parsed on every edit, so a malformed line is
/// recorded and skipped rather than failing the whole parse.
pub struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
    errors: Vec<ParseError>,
}

static EOF: Token = Token::Eof;

impl Parser {
    pub fn new(input: &str) -> Self {
        Self {
            tokens: Lexer::new(input).tokenize(),
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map(|l| &l.token)
            .unwrap_or(&EOF)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|l| l.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn unexpected(&self, expected: &'static str) -> ParseError {
        ParseError::Unexpected {
            line: self.line(),
            found: self.peek().clone(),
            expected,
        }
    }

    fn expect_ident(&mut self, expected: &'static str) -> Result<String, ParseError> {
        if let Token::Ident(s) = self.peek() {
            let s = s.clone();
            self.advance();
            Ok(s)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn expect(&mut self, expected: Token, what: &'static str) -> Result<(), ParseError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn check_ident(&self, name: &str) -> bool {
        matches!(self.peek(), Token::Ident(s) if s.eq_ignore_ascii_case(name))
    }

    fn at_line_end(&self) -> bool {
        matches!(self.peek(), Token::Newline | Token::Eof)
    }

    fn skip_newlines(&mut self) {
        while *self.peek() == Token::Newline {
            self.advance();
        }
    }

    /// Skip to the end of the current line, leaving the newline in place.
    fn skip_line(&mut self) {
        while !self.at_line_end() {
            self.advance();
        }
    }

    pub fn parse(mut self) -> Parsed {
        let mut schema = Schema::default();

        loop {
            self.skip_newlines();
            if *self.peek() == Token::Eof {
                break;
            }

            if let Err(err) = self.parse_declaration(&mut schema) {
                log::debug!("skipping malformed declaration: {err}");
                self.errors.push(err);
                self.skip_line();
            }
        }

        Parsed {
            schema,
            errors: self.errors,
        }
    }

    fn parse_declaration(&mut self, schema: &mut Schema) -> Result<(), ParseError> {
        if !matches!(self.peek(), Token::Ident(_)) {
            return Err(self.unexpected("entity or relationship declaration"));
        }

        if *self.peek_at(1) == Token::Dot {
            let rel = self.parse_relationship()?;
            if !schema.relationships.contains(&rel) {
                schema.relationships.push(rel);
            }
            return Ok(());
        }

        let line = self.line();
        let entity = self.parse_entity()?;
        if schema.entity(&entity.name).is_some() {
            self.errors.push(ParseError::DuplicateEntity {
                line,
                name: entity.name,
            });
        } else {
            schema.entities.push(entity);
        }
        Ok(())
    }

    fn parse_relationship(&mut self) -> Result<Relationship, ParseError> {
        let left_entity = self.expect_ident("entity name")?;
        self.expect(Token::Dot, ".")?;
        let left_field = self.expect_ident("field name")?;

        let reversed = match self.peek() {
            Token::Gt => false,
            Token::Lt => true,
            _ => return Err(self.unexpected("`>` or `<`")),
        };
        self.advance();

        let right_entity = self.expect_ident("entity name")?;
        self.expect(Token::Dot, ".")?;
        let right_field = self.expect_ident("field name")?;

        if !self.at_line_end() {
            return Err(self.unexpected("end of line"));
        }

        let rel = if reversed {
            Relationship {
                source_entity: right_entity,
                source_field: right_field,
                target_entity: left_entity,
                target_field: left_field,
            }
        } else {
            Relationship {
                source_entity: left_entity,
                source_field: left_field,
                target_entity: right_entity,
                target_field: right_field,
            }
        };
        Ok(rel)
    }

    fn parse_entity(&mut self) -> Result<Entity, ParseError> {
        let name = self.expect_ident("entity name")?;

        let metadata = if *self.peek() == Token::LBracket {
            self.parse_metadata()?
        } else {
            Vec::new()
        };

        // The brace may sit on the next line; anything else there is left
        // for the caller so that line is parsed on its own.
        let mut ahead = 0;
        while *self.peek_at(ahead) == Token::Newline {
            ahead += 1;
        }
        if *self.peek_at(ahead) == Token::LBrace {
            self.skip_newlines();
        }
        self.expect(Token::LBrace, "`{`")?;

        let mut fields: Vec<Field> = Vec::new();
        loop {
            while matches!(self.peek(), Token::Newline | Token::Comma) {
                self.advance();
            }

            match self.peek() {
                Token::RBrace => {
                    self.advance();
                    break;
                }
                Token::Eof => {
                    self.errors.push(ParseError::UnterminatedEntity {
                        line: self.line(),
                        name: name.clone(),
                    });
                    break;
                }
                _ if self.looks_like_declaration() => {
                    // The user is typing the next declaration before closing
                    // this one; keep what we have.
                    self.errors.push(ParseError::UnterminatedEntity {
                        line: self.line(),
                        name: name.clone(),
                    });
                    break;
                }
                _ => {}
            }

            let line = self.line();
            match self.parse_field() {
                Ok(field) if fields.iter().any(|f| f.name == field.name) => {
                    self.errors.push(ParseError::DuplicateField {
                        line,
                        entity: name.clone(),
                        field: field.name,
                    });
                }
                Ok(field) => fields.push(field),
                Err(err) => {
                    log::debug!("skipping malformed field in `{name}`: {err}");
                    self.errors.push(err);
                    self.skip_field();
                }
            }
        }

        Ok(Entity {
            name,
            fields,
            metadata,
        })
    }

    /// `NAME {`, `NAME [` or `NAME .` at the start of a body line.
    fn looks_like_declaration(&self) -> bool {
        matches!(self.peek(), Token::Ident(_))
            && matches!(
                self.peek_at(1),
                Token::LBrace | Token::LBracket | Token::Dot
            )
    }

    fn skip_field(&mut self) {
        while !matches!(
            self.peek(),
            Token::Newline | Token::Comma | Token::RBrace | Token::Eof
        ) {
            self.advance();
        }
    }

    fn parse_metadata(&mut self) -> Result<Vec<(String, String)>, ParseError> {
        self.expect(Token::LBracket, "`[`")?;
        let mut metadata = Vec::new();

        loop {
            if *self.peek() == Token::RBracket {
                self.advance();
                break;
            }

            let key = self.expect_ident("metadata key")?;
            self.expect(Token::Colon, "`:`")?;

            let mut value = String::new();
            loop {
                match self.peek() {
                    Token::Comma | Token::RBracket => break,
                    Token::Newline | Token::Eof => return Err(self.unexpected("`]`")),
                    _ => value.push_str(&token_text(&self.advance())),
                }
            }
            metadata.push((key, value));

            if *self.peek() == Token::Comma {
                self.advance();
            }
        }

        Ok(metadata)
    }

    fn parse_field(&mut self) -> Result<Field, ParseError> {
        let name = self.expect_ident("field name")?;
        let raw_type = self.parse_type()?;

        let mut is_primary_key = false;
        // Words after the type are modifiers; only `pk` means anything here.
        while let Token::Ident(_) = self.peek() {
            if self.check_ident("pk") {
                is_primary_key = true;
            }
            self.advance();
        }

        if !matches!(
            self.peek(),
            Token::Newline | Token::Comma | Token::RBrace | Token::Eof
        ) {
            return Err(self.unexpected("end of field"));
        }

        Ok(Field {
            name,
            semantic_type: SemanticType::from_type_name(&raw_type),
            raw_type,
            is_primary_key,
        })
    }

    fn parse_type(&mut self) -> Result<String, ParseError> {
        let mut typ = self.expect_ident("field type")?;

        // decimal(10,2)
        if *self.peek() == Token::LParen {
            self.advance();
            typ.push('(');
            loop {
                match self.peek() {
                    Token::RParen => {
                        self.advance();
                        break;
                    }
                    Token::Newline | Token::Eof => return Err(self.unexpected("`)`")),
                    _ => typ.push_str(&token_text(&self.advance())),
                }
            }
            typ.push(')');
        }

        // string[]
        if *self.peek() == Token::LBracket && *self.peek_at(1) == Token::RBracket {
            self.advance();
            self.advance();
            typ.push_str("[]");
        }

        Ok(typ)
    }
}

fn token_text(token: &Token) -> String {
    match token {
        Token::Ident(s) | Token::Str(s) | Token::Num(s) => s.clone(),
        Token::LBrace => "{".into(),
        Token::RBrace => "}".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::LBracket => "[".into(),
        Token::RBracket => "]".into(),
        Token::Comma => ",".into(),
        Token::Colon => ":".into(),
        Token::Dot => ".".into(),
        Token::Gt => ">".into(),
        Token::Lt => "<".into(),
        Token::Other(c) => c.to_string(),
        Token::Newline | Token::Eof => String::new(),
    }
}

/// Parse schema text, dropping diagnostics.
pub fn parse_schema(input: &str) -> Schema {
    Parser::new(input).parse().schema
}
