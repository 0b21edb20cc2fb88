//! Recursive-descent parser for the blueprint grammar.

use camino::Utf8Path;

use super::lexer::{self, Lexed, Tok, Token};
use super::{FileParser, ModuleBlock, ParsedFile, Pos, PropertyMap, PropertyValue, ValueKind};
use crate::errors::Error;

/// Default [`FileParser`] implementation.
#[derive(Debug, Default)]
pub struct DraftParser;

impl FileParser for DraftParser {
    fn parse(&self, path: &Utf8Path, source: &str) -> (ParsedFile, Vec<Error>) {
        let lexed = lexer::lex(source);
        let mut parser = Parser::new(path, &lexed);
        let file = parser.parse_file();
        (file, parser.errors)
    }
}

struct Parser<'src, 'lex> {
    path: &'src Utf8Path,
    tokens: &'lex [Token<'src>],
    lex_error: Option<Pos>,
    eof: Pos,
    cursor: usize,
    errors: Vec<Error>,
}

impl<'src, 'lex> Parser<'src, 'lex> {
    fn new(path: &'src Utf8Path, lexed: &'lex Lexed<'src>) -> Self {
        Self {
            path,
            tokens: &lexed.tokens,
            lex_error: lexed.error,
            eof: lexed.eof,
            cursor: 0,
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> Option<&Token<'src>> {
        self.tokens.get(self.cursor)
    }

    fn bump(&mut self) -> Option<Token<'src>> {
        let token = self.tokens.get(self.cursor).copied();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    /// Describe the lookahead for an `expected X, found Y` diagnostic. At the
    /// end of the token stream a pending lexer error is surfaced instead.
    fn found(&self) -> (&'static str, Pos) {
        match self.peek() {
            Some(token) => (token.kind.describe(), token.pos),
            None => match self.lex_error {
                Some(pos) => ("invalid character", pos),
                None => ("EOF", self.eof),
            },
        }
    }

    fn error_expected(&mut self, expected: &str) {
        let (found, pos) = self.found();
        self.errors.push(Error::parse(
            pos.in_file(self.path),
            format!("expected {expected}, found {found}"),
        ));
    }

    fn expect(&mut self, kind: Tok) -> Option<Token<'src>> {
        if self.peek().is_some_and(|t| t.kind == kind) {
            self.bump()
        } else {
            self.error_expected(kind.describe());
            None
        }
    }

    /// Parse the whole file, stopping at the first syntax error.
    fn parse_file(&mut self) -> ParsedFile {
        let mut file = ParsedFile {
            path: self.path.to_owned(),
            ..ParsedFile::default()
        };
        loop {
            let Some(token) = self.peek().copied() else {
                if let Some(pos) = self.lex_error {
                    self.errors.push(Error::parse(
                        pos.in_file(self.path),
                        "invalid character".to_string(),
                    ));
                }
                break;
            };
            if token.kind != Tok::Ident {
                self.error_expected("Ident");
                break;
            }
            self.bump();
            match self.peek().map(|t| t.kind) {
                Some(Tok::Equals) => {
                    self.bump();
                    let Some(value) = self.parse_value() else { break };
                    self.record_assignment(&mut file, token.text, &value);
                }
                Some(Tok::LBrace) => {
                    self.bump();
                    let Some(properties) = self.parse_properties() else {
                        break;
                    };
                    file.modules.push(ModuleBlock {
                        type_name: token.text.to_owned(),
                        pos: token.pos,
                        properties,
                    });
                }
                _ => {
                    self.error_expected("\"=\" or \"{\"");
                    break;
                }
            }
            if !self.errors.is_empty() {
                break;
            }
        }
        file
    }

    /// Parse `ident: value` pairs up to the closing brace.
    fn parse_properties(&mut self) -> Option<PropertyMap> {
        let mut map = PropertyMap::new();
        loop {
            match self.peek().map(|t| t.kind) {
                Some(Tok::RBrace) => {
                    self.bump();
                    return Some(map);
                }
                Some(Tok::Ident) => {
                    let key = self.bump().expect("peeked ident");
                    self.expect(Tok::Colon)?;
                    let value = self.parse_value()?;
                    map.insert(key.text.to_owned(), value);
                    // A comma is required between properties but optional
                    // before the closing brace.
                    if self.peek().is_some_and(|t| t.kind == Tok::Comma) {
                        self.bump();
                    } else if !self.peek().is_some_and(|t| t.kind == Tok::RBrace) {
                        self.error_expected("\"}\"");
                        return None;
                    }
                }
                _ => {
                    self.error_expected("\"}\"");
                    return None;
                }
            }
        }
    }

    fn parse_value(&mut self) -> Option<PropertyValue> {
        let (_, pos) = self.found();
        let kind = match self.peek().map(|t| t.kind) {
            Some(Tok::Str) => {
                let token = self.bump().expect("peeked string");
                ValueKind::String(lexer::unquote(token.text))
            }
            Some(Tok::True) => {
                self.bump();
                ValueKind::Bool(true)
            }
            Some(Tok::False) => {
                self.bump();
                ValueKind::Bool(false)
            }
            Some(Tok::Int) => {
                let token = self.bump().expect("peeked int");
                match token.text.parse::<i64>() {
                    Ok(value) => ValueKind::Int(value),
                    Err(_) => {
                        self.errors.push(Error::parse(
                            token.pos.in_file(self.path),
                            format!("integer out of range: {}", token.text),
                        ));
                        return None;
                    }
                }
            }
            Some(Tok::LBracket) => {
                self.bump();
                let mut items = Vec::new();
                loop {
                    if self.peek().is_some_and(|t| t.kind == Tok::RBracket) {
                        self.bump();
                        break;
                    }
                    items.push(self.parse_value()?);
                    if self.peek().is_some_and(|t| t.kind == Tok::Comma) {
                        self.bump();
                    } else if !self.peek().is_some_and(|t| t.kind == Tok::RBracket) {
                        self.error_expected("\"]\"");
                        return None;
                    }
                }
                ValueKind::List(items)
            }
            Some(Tok::LBrace) => {
                self.bump();
                ValueKind::Map(self.parse_properties()?)
            }
            _ => {
                self.error_expected("a value");
                return None;
            }
        };
        Some(PropertyValue { pos, kind })
    }

    /// Top-level assignments: only `subdirs` and `build` are meaningful to
    /// the engine; both must be string lists. Other assignments are accepted
    /// and ignored.
    fn record_assignment(&mut self, file: &mut ParsedFile, name: &str, value: &PropertyValue) {
        if name != "subdirs" && name != "build" {
            return;
        }
        let Some(paths) = value.as_string_list() else {
            self.errors.push(Error::property(
                value.pos.in_file(self.path),
                format!("'{name}' must be a list of strings"),
            ));
            return;
        };
        if name == "subdirs" {
            file.subdirs.extend(paths);
        } else {
            file.build.extend(paths);
        }
    }
}
