//! Lexer for agent scripts.
//!
//! Newlines are significant (statement separators); everything else is
//! conventional. The lexer never panics on bad input: unknown characters
//! and unterminated strings surface as [`LexError`] with a location.

use std::fmt;

/// A source location (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pos {
    /// Line number.
    pub line: u32,
    /// Column number.
    pub column: u32,
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Lexical error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    /// What went wrong.
    pub message: String,
    /// Where.
    pub pos: Pos,
}

/// Token kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Identifier or keyword.
    Ident(String),
    /// String literal (unescaped).
    Str(String),
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `{`
    LBrace,
    /// `}`
    RBrace,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `.`
    Dot,
    /// `=`
    Assign,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `!`
    Bang,
    /// Statement separator.
    Newline,
}

/// A token with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The token.
    pub tok: Tok,
    /// Where it starts.
    pub pos: Pos,
}

/// Tokenizes a script. Comments run from `#` to end of line.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut line: u32 = 1;
    let mut column: u32 = 1;

    macro_rules! push {
        ($tok:expr, $pos:expr) => {
            tokens.push(Token { tok: $tok, pos: $pos })
        };
    }

    while let Some(&c) = chars.peek() {
        let pos = Pos { line, column };
        match c {
            '\n' => {
                chars.next();
                // Collapse runs of newlines into one separator.
                if !matches!(tokens.last(), None | Some(Token { tok: Tok::Newline, .. })) {
                    push!(Tok::Newline, pos);
                }
                line += 1;
                column = 1;
            }
            ' ' | '\t' | '\r' => {
                chars.next();
                column += 1;
            }
            '#' => {
                while let Some(&c) = chars.peek() {
                    if c == '\n' {
                        break;
                    }
                    chars.next();
                    column += 1;
                }
            }
            '"' => {
                chars.next();
                column += 1;
                let mut value = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    column += 1;
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => {
                                value.push('\n');
                                column += 1;
                            }
                            Some('t') => {
                                value.push('\t');
                                column += 1;
                            }
                            Some(other) => {
                                value.push(other);
                                column += 1;
                            }
                            None => break,
                        },
                        '\n' => {
                            return Err(LexError {
                                message: "unterminated string".into(),
                                pos,
                            })
                        }
                        other => value.push(other),
                    }
                }
                if !closed {
                    return Err(LexError {
                        message: "unterminated string".into(),
                        pos,
                    });
                }
                push!(Tok::Str(value), pos);
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                let mut is_float = false;
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                    } else if c == '.' && !is_float {
                        // Lookahead: `1.foo` is member access on an int.
                        let mut ahead = chars.clone();
                        ahead.next();
                        if !ahead.peek().is_some_and(char::is_ascii_digit) {
                            break;
                        }
                        is_float = true;
                        text.push(c);
                    } else {
                        break;
                    }
                    chars.next();
                    column += 1;
                }
                let tok = if is_float {
                    text.parse::<f64>().map(Tok::Float).map_err(|_| ())
                } else {
                    text.parse::<i64>().map(Tok::Int).map_err(|_| ())
                };
                match tok {
                    Ok(tok) => push!(tok, pos),
                    Err(_) => {
                        return Err(LexError {
                            message: format!("bad number literal '{text}'"),
                            pos,
                        })
                    }
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        text.push(c);
                        chars.next();
                        column += 1;
                    } else {
                        break;
                    }
                }
                push!(Tok::Ident(text), pos);
            }
            _ => {
                chars.next();
                column += 1;
                let tok = match c {
                    '(' => Tok::LParen,
                    ')' => Tok::RParen,
                    '{' => Tok::LBrace,
                    '}' => Tok::RBrace,
                    '[' => Tok::LBracket,
                    ']' => Tok::RBracket,
                    ',' => Tok::Comma,
                    ':' => Tok::Colon,
                    '.' => Tok::Dot,
                    '+' => Tok::Plus,
                    '-' => Tok::Minus,
                    '=' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            column += 1;
                            Tok::Eq
                        } else {
                            Tok::Assign
                        }
                    }
                    '!' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            column += 1;
                            Tok::Ne
                        } else {
                            Tok::Bang
                        }
                    }
                    '<' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            column += 1;
                            Tok::Le
                        } else {
                            Tok::Lt
                        }
                    }
                    '>' => {
                        if chars.peek() == Some(&'=') {
                            chars.next();
                            column += 1;
                            Tok::Ge
                        } else {
                            Tok::Gt
                        }
                    }
                    other => {
                        return Err(LexError {
                            message: format!("unexpected character '{other}'"),
                            pos,
                        })
                    }
                };
                push!(tok, pos);
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_a_call_chain() {
        let tokens = tokenize(r#"let tab = browser.tab.open("https://example.com")"#).unwrap();
        let kinds: Vec<&Tok> = tokens.iter().map(|t| &t.tok).collect();
        assert!(matches!(kinds[0], Tok::Ident(k) if k == "let"));
        assert!(matches!(kinds[2], Tok::Assign));
        assert!(kinds.iter().any(|t| matches!(t, Tok::Str(s) if s == "https://example.com")));
    }

    #[test]
    fn collapses_newline_runs() {
        let tokens = tokenize("a\n\n\nb").unwrap();
        let newlines = tokens.iter().filter(|t| t.tok == Tok::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = tokenize("a # comment with \"quotes\"\nb").unwrap();
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("\"oops").unwrap_err();
        assert!(err.message.contains("unterminated"));
        assert_eq!(err.pos.line, 1);
    }

    #[test]
    fn numbers_and_members() {
        let tokens = tokenize("1.5 x.y 42").unwrap();
        assert!(matches!(tokens[0].tok, Tok::Float(f) if (f - 1.5).abs() < 1e-9));
        assert!(matches!(tokens[2].tok, Tok::Dot));
        assert!(matches!(tokens[4].tok, Tok::Int(42)));
    }

    #[test]
    fn positions_are_tracked() {
        let tokens = tokenize("a\n  b").unwrap();
        let b = tokens.last().unwrap();
        assert_eq!(b.pos.line, 2);
        assert_eq!(b.pos.column, 3);
    }
}
