use crate::lexer::{Lexer, Span, Token, TokenKind};
use crate::manifest::ParseError;
use crate::serialize::format_number;
use crate::value::{Object, Value};

/// Nesting limit for arrays and objects; manifests are shallow, so anything
/// deeper is treated as malformed input.
const MAX_DEPTH: usize = 128;

/// Parse the object literal whose opening brace sits at `start`.
///
/// Returns the object and the byte offset just past its closing brace.
/// Nothing after the closing brace is tokenized: the rest of the script is
/// not part of the grammar.
pub(crate) fn parse_object_literal(src: &str, start: usize) -> Result<(Object, usize), ParseError> {
    let mut lexer = Lexer::new(src, start);
    let first = lexer.next_token()?;
    let mut p = Parser {
        src,
        lexer,
        current: first,
        depth: 0,
        end: start,
    };
    if p.current.kind != TokenKind::LBrace {
        return Err(p.unexpected("'{'"));
    }
    let obj = p.parse_object()?;
    Ok((obj, p.end))
}

struct Parser<'a> {
    src: &'a str,
    lexer: Lexer<'a>,
    current: Token,
    depth: usize,
    end: usize,
}

impl Parser<'_> {
    fn bump(&mut self) -> Result<Token, ParseError> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn span(&self) -> Span {
        self.current.span
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::at(
            self.src,
            self.span().start,
            format!("expected {expected}, found {}", self.current.kind.describe()),
        )
    }

    fn consume(&mut self, kind: &TokenKind) -> Result<bool, ParseError> {
        if &self.current.kind == kind {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn open(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::at(
                self.src,
                self.span().start,
                format!("nesting deeper than {MAX_DEPTH} levels"),
            ));
        }
        self.bump()?;
        Ok(())
    }

    /// Step past a closing delimiter. The outermost brace is not followed by
    /// a lookahead read.
    fn close(&mut self) -> Result<(), ParseError> {
        self.depth -= 1;
        if self.depth == 0 {
            self.end = self.span().end;
            return Ok(());
        }
        self.bump()?;
        Ok(())
    }

    fn parse_object(&mut self) -> Result<Object, ParseError> {
        self.open()?;
        let mut obj = Object::new();
        while self.current.kind != TokenKind::RBrace {
            let key_start = self.span().start;
            let key = match self.bump()?.kind {
                TokenKind::Ident(name) | TokenKind::Str(name) => name,
                TokenKind::Number(n) => format_number(n),
                other => {
                    return Err(ParseError::at(
                        self.src,
                        key_start,
                        format!("expected property key, found {}", other.describe()),
                    ))
                }
            };
            if !self.consume(&TokenKind::Colon)? {
                return Err(self.unexpected("':'"));
            }
            let value = self.parse_value()?;
            obj.insert(key, value);

            if !self.consume(&TokenKind::Comma)? && self.current.kind != TokenKind::RBrace {
                return Err(self.unexpected("',' or '}'"));
            }
        }
        self.close()?;
        Ok(obj)
    }

    fn parse_array(&mut self) -> Result<Vec<Value>, ParseError> {
        self.open()?;
        let mut items = Vec::new();
        while self.current.kind != TokenKind::RBracket {
            items.push(self.parse_value()?);
            if !self.consume(&TokenKind::Comma)? && self.current.kind != TokenKind::RBracket {
                return Err(self.unexpected("',' or ']'"));
            }
        }
        self.close()?;
        Ok(items)
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        match self.current.kind {
            TokenKind::LBrace => Ok(Value::Object(self.parse_object()?)),
            TokenKind::LBracket => Ok(Value::Array(self.parse_array()?)),
            TokenKind::Str(_) | TokenKind::Number(_) | TokenKind::Ident(_) => {
                let start = self.span().start;
                match self.bump()?.kind {
                    TokenKind::Str(s) => Ok(Value::String(s)),
                    TokenKind::Number(n) => Ok(Value::Number(n)),
                    TokenKind::Ident(word) => match word.as_str() {
                        "true" => Ok(Value::Bool(true)),
                        "false" => Ok(Value::Bool(false)),
                        "null" => Ok(Value::Null),
                        other => Err(ParseError::at(
                            self.src,
                            start,
                            format!("unsupported value '{other}' (only literals are allowed)"),
                        )),
                    },
                    _ => unreachable!("matched literal token above"),
                }
            }
            _ => Err(self.unexpected("a value")),
        }
    }
}
