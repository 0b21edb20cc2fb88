//! Lexer for blueprint files.
//!
//! Tokens are span-based; text is sliced from the source when a token's
//! payload is needed. Line/column positions are recovered from byte offsets
//! through a precomputed line index.

use logos::Logos;

use super::Pos;

/// Internal Logos token enum. Comments and whitespace are skipped.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*(?:[^*]|\*[^/])*\*/")]
pub(crate) enum Tok {
    #[token("{")]
    LBrace,

    #[token("}")]
    RBrace,

    #[token("[")]
    LBracket,

    #[token("]")]
    RBracket,

    #[token(":")]
    Colon,

    #[token("=")]
    Equals,

    #[token(",")]
    Comma,

    #[token("true")]
    True,

    #[token("false")]
    False,

    /// Double-quoted string with backslash escapes.
    #[regex(r#""(?:[^"\\\n]|\\.)*""#)]
    Str,

    #[regex("[A-Za-z_][A-Za-z0-9_]*")]
    Ident,

    #[regex("-?[0-9]+")]
    Int,
}

impl Tok {
    /// Human-readable token name used in `expected X, found Y` diagnostics.
    pub(crate) fn describe(self) -> &'static str {
        match self {
            Self::LBrace => "\"{\"",
            Self::RBrace => "\"}\"",
            Self::LBracket => "\"[\"",
            Self::RBracket => "\"]\"",
            Self::Colon => "\":\"",
            Self::Equals => "\"=\"",
            Self::Comma => "\",\"",
            Self::True | Self::False => "Bool",
            Self::Str => "String",
            Self::Ident => "Ident",
            Self::Int => "Int",
        }
    }
}

/// A lexed token with its source slice and position.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Token<'src> {
    pub kind: Tok,
    pub text: &'src str,
    pub pos: Pos,
}

/// Outcome of lexing one file.
pub(crate) struct Lexed<'src> {
    pub tokens: Vec<Token<'src>>,
    /// Position of the first unrecognised character, if any.
    pub error: Option<Pos>,
    /// Position just past the final token, used for EOF diagnostics.
    pub eof: Pos,
}

/// Maps byte offsets to 1-based line/column pairs.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            source
                .bytes()
                .enumerate()
                .filter_map(|(i, b)| (b == b'\n').then_some(i + 1)),
        );
        Self { starts }
    }

    fn pos(&self, offset: usize) -> Pos {
        let line = self.starts.partition_point(|&start| start <= offset);
        let col = offset - self.starts[line - 1] + 1;
        Pos {
            line: u32::try_from(line).unwrap_or(u32::MAX),
            col: u32::try_from(col).unwrap_or(u32::MAX),
        }
    }
}

/// Lex `source`, stopping at the first unrecognised character.
pub(crate) fn lex(source: &str) -> Lexed<'_> {
    let index = LineIndex::new(source);
    let mut tokens = Vec::new();
    let mut error = None;
    for (result, span) in Tok::lexer(source).spanned() {
        match result {
            Ok(kind) => tokens.push(Token {
                kind,
                text: &source[span.clone()],
                pos: index.pos(span.start),
            }),
            Err(()) => {
                error = Some(index.pos(span.start));
                break;
            }
        }
    }
    Lexed {
        tokens,
        error,
        eof: index.pos(source.len()),
    }
}

/// Decode the payload of a string token, resolving backslash escapes.
pub(crate) fn unquote(text: &str) -> String {
    let inner = &text[1..text.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => break,
        }
    }
    out
}
