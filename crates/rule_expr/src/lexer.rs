use std::iter::Peekable;
use std::str::CharIndices;

use crate::RuleError;
use crate::ast::CompareOp;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Identifier(String),
    Str(String),
    Number(f64),
    Compare { op: CompareOp, any: bool },
    And,
    Or,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, RuleError> {
    let mut lexer = Lexer {
        chars: input.char_indices().peekable(),
    };
    let mut tokens = Vec::new();
    while let Some(spanned) = lexer.next_token()? {
        tokens.push(spanned);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    chars: Peekable<CharIndices<'a>>,
}

impl Lexer<'_> {
    fn next_token(&mut self) -> Result<Option<Spanned>, RuleError> {
        self.skip_trivia();
        let Some((pos, ch)) = self.chars.next() else {
            return Ok(None);
        };

        let token = match ch {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '&' => {
                self.expect_char('&', pos)?;
                Token::And
            }
            '|' => {
                self.expect_char('|', pos)?;
                Token::Or
            }
            '"' | '\'' => Token::Str(self.read_string(ch, pos)?),
            '?' => {
                let Some((next_pos, next)) = self.chars.next() else {
                    return Err(RuleError::UnexpectedEnd);
                };
                let op = self.read_operator(next, next_pos)?;
                Token::Compare { op, any: true }
            }
            '=' | '!' | '>' | '<' | '~' => Token::Compare {
                op: self.read_operator(ch, pos)?,
                any: false,
            },
            c if c.is_ascii_digit() || c == '-' => Token::Number(self.read_number(c, pos)?),
            c if c.is_ascii_alphabetic() || c == '_' || c == '@' => {
                Token::Identifier(self.read_identifier(c))
            }
            other => return Err(RuleError::UnexpectedChar { pos, ch: other }),
        };

        Ok(Some(Spanned { token, pos }))
    }

    /// Whitespace and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

            let mut lookahead = self.chars.clone();
            match (lookahead.next(), lookahead.next()) {
                (Some((_, '/')), Some((_, '/'))) => {
                    while self.chars.next_if(|(_, c)| *c != '\n').is_some() {}
                }
                _ => return,
            }
        }
    }

    fn expect_char(&mut self, expected: char, pos: usize) -> Result<(), RuleError> {
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            Some((pos, c)) => Err(RuleError::UnexpectedChar { pos, ch: c }),
            None => Err(RuleError::UnexpectedChar {
                pos,
                ch: expected,
            }),
        }
    }

    fn read_operator(&mut self, first: char, pos: usize) -> Result<CompareOp, RuleError> {
        let followed_by_eq = self.chars.next_if(|(_, c)| *c == '=').is_some();
        let op = match (first, followed_by_eq) {
            ('=', false) => CompareOp::Eq,
            ('!', true) => CompareOp::Neq,
            ('!', false) => {
                if self.chars.next_if(|(_, c)| *c == '~').is_some() {
                    CompareOp::NotLike
                } else {
                    return Err(RuleError::UnexpectedChar { pos, ch: '!' });
                }
            }
            ('>', false) => CompareOp::Gt,
            ('>', true) => CompareOp::Gte,
            ('<', false) => CompareOp::Lt,
            ('<', true) => CompareOp::Lte,
            ('~', false) => CompareOp::Like,
            (other, _) => return Err(RuleError::UnexpectedChar { pos, ch: other }),
        };
        Ok(op)
    }

    fn read_string(&mut self, quote: char, start: usize) -> Result<String, RuleError> {
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\\')) => match self.chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => return Err(RuleError::UnterminatedString { pos: start }),
                },
                Some((_, c)) if c == quote => return Ok(out),
                Some((_, c)) => out.push(c),
                None => return Err(RuleError::UnterminatedString { pos: start }),
            }
        }
    }

    fn read_number(&mut self, first: char, pos: usize) -> Result<f64, RuleError> {
        let mut raw = String::from(first);
        while let Some((_, c)) = self.chars.next_if(|(_, c)| c.is_ascii_digit() || *c == '.') {
            raw.push(c);
        }
        raw.parse::<f64>()
            .map_err(|_| RuleError::InvalidNumber { pos, raw })
    }

    fn read_identifier(&mut self, first: char) -> String {
        let mut out = String::from(first);
        while let Some((_, c)) = self
            .chars
            .next_if(|(_, c)| c.is_ascii_alphanumeric() || matches!(*c, '_' | '.' | ':'))
        {
            out.push(c);
        }
        out
    }
}
