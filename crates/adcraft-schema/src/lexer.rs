use crate::manifest::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) start: usize,
    pub(crate) end: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub(crate) kind: TokenKind,
    pub(crate) span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Str(String),
    Number(f64),

    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,

    Eof,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Ident(s) => format!("identifier '{s}'"),
            TokenKind::Str(_) => "string literal".to_owned(),
            TokenKind::Number(n) => format!("number {n}"),
            TokenKind::LBrace => "'{'".to_owned(),
            TokenKind::RBrace => "'}'".to_owned(),
            TokenKind::LBracket => "'['".to_owned(),
            TokenKind::RBracket => "']'".to_owned(),
            TokenKind::Colon => "':'".to_owned(),
            TokenKind::Comma => "','".to_owned(),
            TokenKind::Eof => "end of input".to_owned(),
        }
    }
}

/// On-demand tokenizer over a manifest script.
///
/// Tokens are produced lazily from a starting offset because the object
/// literal is usually surrounded by script text that is not part of the
/// grammar (the assignment prefix, trailing statements).
pub(crate) struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(src: &'a str, start: usize) -> Self {
        Self { src, pos: start }
    }

    pub(crate) fn offset(&self) -> usize {
        self.pos
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_char_at(&self, ahead: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(ahead)
    }

    fn bump_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> ParseError {
        ParseError::at(self.src, offset, message)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() || c == '\u{feff}' => {
                    self.bump_char();
                }
                Some('/') if self.peek_char_at(1) == Some('/') => {
                    while let Some(c) = self.bump_char() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                Some('/') if self.peek_char_at(1) == Some('*') => {
                    let start = self.pos;
                    self.pos += 2;
                    match self.src[self.pos..].find("*/") {
                        Some(end) => self.pos += end + 2,
                        None => return Err(self.error(start, "unterminated block comment")),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    pub(crate) fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let start = self.pos;
        let Some(c) = self.peek_char() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span { start, end: start },
            });
        };

        let kind = match c {
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            ':' => self.single(TokenKind::Colon),
            ',' => self.single(TokenKind::Comma),
            '"' | '\'' => TokenKind::Str(self.lex_string(c)?),
            '-' | '+' | '.' | '0'..='9' => TokenKind::Number(self.lex_number()?),
            c if is_ident_start(c) => {
                while self.peek_char().is_some_and(is_ident_continue) {
                    self.bump_char();
                }
                TokenKind::Ident(self.src[start..self.pos].to_owned())
            }
            other => {
                return Err(self.error(start, format!("unexpected character '{other}'")));
            }
        };

        Ok(Token {
            kind,
            span: Span {
                start,
                end: self.pos,
            },
        })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.bump_char();
        kind
    }

    fn lex_number(&mut self) -> Result<f64, ParseError> {
        let start = self.pos;
        let negative = match self.peek_char() {
            Some('-') => {
                self.bump_char();
                true
            }
            Some('+') => {
                self.bump_char();
                false
            }
            _ => false,
        };

        // Hexadecimal: 0x[0-9a-fA-F]+
        if self.peek_char() == Some('0') && matches!(self.peek_char_at(1), Some('x' | 'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump_char();
            }
            let digits = &self.src[digits_start..self.pos];
            let v = u64::from_str_radix(digits, 16)
                .map_err(|_| self.error(start, "invalid hexadecimal number"))?;
            let v = v as f64;
            return Ok(if negative { -v } else { v });
        }

        let digits_start = self.pos;
        let mut saw_digit = false;
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.bump_char();
            saw_digit = true;
        }
        if self.peek_char() == Some('.') {
            self.bump_char();
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump_char();
                saw_digit = true;
            }
        }
        if !saw_digit {
            return Err(self.error(start, "invalid number (expected digits)"));
        }
        if matches!(self.peek_char(), Some('e' | 'E')) {
            let e_pos = self.pos;
            self.bump_char();
            if matches!(self.peek_char(), Some('+' | '-')) {
                self.bump_char();
            }
            let exp_start = self.pos;
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.bump_char();
            }
            if exp_start == self.pos {
                return Err(self.error(e_pos, "invalid number exponent (expected digits)"));
            }
        }

        let text = &self.src[digits_start..self.pos];
        let text = text.strip_suffix('.').unwrap_or(text);
        let v: f64 = text
            .parse()
            .map_err(|_| self.error(start, "invalid number"))?;
        Ok(if negative { -v } else { v })
    }

    fn lex_string(&mut self, quote: char) -> Result<String, ParseError> {
        let start = self.pos;
        self.bump_char();
        let mut out = String::new();
        loop {
            let Some(c) = self.bump_char() else {
                return Err(self.error(start, "unterminated string literal"));
            };
            match c {
                c if c == quote => return Ok(out),
                '\n' | '\r' => {
                    return Err(self.error(start, "unterminated string literal"));
                }
                '\\' => self.lex_escape(&mut out)?,
                c => out.push(c),
            }
        }
    }

    fn lex_escape(&mut self, out: &mut String) -> Result<(), ParseError> {
        let esc_pos = self.pos - 1;
        let Some(c) = self.bump_char() else {
            return Err(self.error(esc_pos, "unterminated escape sequence"));
        };
        match c {
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' if !self.peek_char().is_some_and(|c| c.is_ascii_digit()) => out.push('\0'),
            'x' => {
                let code = self.hex_digits(2, esc_pos)?;
                out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
            }
            'u' => {
                let unit = if self.peek_char() == Some('{') {
                    self.bump_char();
                    let digits_start = self.pos;
                    while self.peek_char().is_some_and(|c| c.is_ascii_hexdigit()) {
                        self.bump_char();
                    }
                    let code = u32::from_str_radix(&self.src[digits_start..self.pos], 16)
                        .map_err(|_| self.error(esc_pos, "invalid unicode escape"))?;
                    if self.bump_char() != Some('}') {
                        return Err(self.error(esc_pos, "invalid unicode escape"));
                    }
                    code
                } else {
                    self.hex_digits(4, esc_pos)?
                };
                self.push_code_unit(out, unit, esc_pos)?;
            }
            // Line continuation.
            '\n' => {}
            '\r' => {
                if self.peek_char() == Some('\n') {
                    self.bump_char();
                }
            }
            other => out.push(other),
        }
        Ok(())
    }

    fn push_code_unit(&mut self, out: &mut String, unit: u32, at: usize) -> Result<(), ParseError> {
        if (0xD800..0xDC00).contains(&unit) {
            // High surrogate: must be followed by a `\uDC00-\uDFFF` low surrogate.
            if self.src[self.pos..].starts_with("\\u") {
                let save = self.pos;
                self.pos += 2;
                let low = self.hex_digits(4, at)?;
                if (0xDC00..0xE000).contains(&low) {
                    let code = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                    out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    return Ok(());
                }
                self.pos = save;
            }
            out.push('\u{fffd}');
            return Ok(());
        }
        match char::from_u32(unit) {
            Some(c) => out.push(c),
            None => out.push('\u{fffd}'),
        }
        Ok(())
    }

    fn hex_digits(&mut self, count: usize, at: usize) -> Result<u32, ParseError> {
        let start = self.pos;
        for _ in 0..count {
            match self.peek_char() {
                Some(c) if c.is_ascii_hexdigit() => {
                    self.bump_char();
                }
                _ => return Err(self.error(at, "invalid hexadecimal escape")),
            }
        }
        u32::from_str_radix(&self.src[start..self.pos], 16)
            .map_err(|_| self.error(at, "invalid hexadecimal escape"))
    }
}

/// Copy of `src` with comments and quoted strings blanked to spaces, so a
/// pattern search only sees code. Byte offsets are unchanged; newlines are
/// kept. Unterminated comments and strings blank to the end.
pub(crate) fn mask_comments_and_strings(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = bytes.to_vec();
    let blank = |out: &mut Vec<u8>, from: usize, to: usize| {
        for b in &mut out[from..to] {
            if *b != b'\n' {
                *b = b' ';
            }
        }
    };
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        let end = match (bytes[i], bytes.get(i + 1)) {
            (b'/', Some(b'/')) => find_byte(bytes, i, b'\n').unwrap_or(bytes.len()),
            (b'/', Some(b'*')) => src[i + 2..].find("*/").map_or(bytes.len(), |e| i + 2 + e + 2),
            (quote @ (b'"' | b'\'' | b'`'), _) => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != quote {
                    j += if bytes[j] == b'\\' { 2 } else { 1 };
                }
                (j + 1).min(bytes.len())
            }
            _ => {
                i += 1;
                continue;
            }
        };
        blank(&mut out, start, end);
        i = end;
    }
    // Only ASCII bytes were written, so multi-byte sequences are either
    // intact or fully blanked.
    String::from_utf8(out).unwrap_or_else(|_| " ".repeat(src.len()))
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from..].iter().position(|&b| b == needle).map(|p| from + p)
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c == '$' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    is_ident_start(c) || c.is_alphanumeric()
}
