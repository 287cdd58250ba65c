use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    Str(String),
    Num(String),

    LBrace,   // {
    RBrace,   // }
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    Comma,    // ,
    Colon,    // :
    Dot,      // .
    Gt,       // >
    Lt,       // <
    Newline,  // \n

    /// Any character the grammar has no use for. Kept so the parser can skip
    /// the rest of the line instead of aborting.
    Other(char),

    Eof,
}

/// A token together with the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub token: Token,
    pub line: usize,
}

/// Line-aware tokenizer for the schema DSL.
///
/// Tokenizing never fails: the input is live editor text, so unknown
/// characters become [`Token::Other`] and an unterminated string runs to the
/// end of its line.
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
        }
    }

    fn skip_blanks_and_comments(&mut self) {
        loop {
            match self.chars.peek() {
                Some('\n') => break,
                Some(c) if c.is_whitespace() => {
                    self.chars.next();
                }
                Some('/') => {
                    let mut ahead = self.chars.clone();
                    ahead.next();
                    if ahead.peek() != Some(&'/') {
                        break;
                    }
                    // Comment runs to end of line; the newline itself is kept.
                    while let Some(&c) = self.chars.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.chars.next();
                    }
                }
                _ => break,
            }
        }
    }

    fn read_ident(&mut self, first: char) -> String {
        let mut s = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        s
    }

    fn read_string(&mut self, quote: char) -> String {
        let mut s = String::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                '\n' => break,
                '\\' => {
                    self.chars.next();
                    match self.chars.next() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some(other) => s.push(other),
                        None => break,
                    }
                }
                c if c == quote => {
                    self.chars.next();
                    break;
                }
                c => {
                    s.push(c);
                    self.chars.next();
                }
            }
        }
        s
    }

    fn read_number(&mut self, first: char) -> String {
        let mut s = String::from(first);
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        s
    }

    pub fn next_lexeme(&mut self) -> Lexeme {
        self.skip_blanks_and_comments();

        let line = self.line;
        let c = match self.chars.next() {
            Some(c) => c,
            None => {
                return Lexeme {
                    token: Token::Eof,
                    line,
                };
            }
        };

        let token = match c {
            '\n' => {
                self.line += 1;
                Token::Newline
            }
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '.' => Token::Dot,
            '>' => Token::Gt,
            '<' => Token::Lt,
            '"' | '\'' => Token::Str(self.read_string(c)),
            c if c.is_ascii_digit() => Token::Num(self.read_number(c)),
            c if c.is_alphabetic() || c == '_' => Token::Ident(self.read_ident(c)),
            c => Token::Other(c),
        };

        Lexeme { token, line }
    }

    pub fn tokenize(mut self) -> Vec<Lexeme> {
        let mut lexemes = Vec::new();
        loop {
            let lexeme = self.next_lexeme();
            let done = lexeme.token == Token::Eof;
            lexemes.push(lexeme);
            if done {
                break;
            }
        }
        lexemes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token> {
        Lexer::new(input)
            .tokenize()
            .into_iter()
            .map(|l| l.token)
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            tokens("users { id int pk }"),
            vec![
                Token::Ident("users".into()),
                Token::LBrace,
                Token::Ident("id".into()),
                Token::Ident("int".into()),
                Token::Ident("pk".into()),
                Token::RBrace,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_keep_newline() {
        assert_eq!(
            tokens("// header\nusers { // inline\n}"),
            vec![
                Token::Newline,
                Token::Ident("users".into()),
                Token::LBrace,
                Token::Newline,
                Token::RBrace,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_relationship_tokens() {
        assert_eq!(
            tokens("a.b > c.d"),
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::Gt,
                Token::Ident("c".into()),
                Token::Dot,
                Token::Ident("d".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_line_numbers() {
        let lexemes = Lexer::new("a\n\nb").tokenize();
        let b = lexemes
            .iter()
            .find(|l| l.token == Token::Ident("b".into()))
            .unwrap();
        assert_eq!(b.line, 3);
    }

    #[test]
    fn test_unknown_chars_do_not_fail() {
        assert_eq!(
            tokens("a # ~"),
            vec![
                Token::Ident("a".into()),
                Token::Other('#'),
                Token::Other('~'),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string_stops_at_line_end() {
        assert_eq!(
            tokens("\"open\nnext"),
            vec![
                Token::Str("open".into()),
                Token::Newline,
                Token::Ident("next".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unicode_ident() {
        assert_eq!(tokens("ユーザー")[0], Token::Ident("ユーザー".into()));
    }
}
