//! Quantity formulas for derived items.
//!
//! A formula is a small arithmetic expression over element dimensions:
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/') factor)*
//! factor := '-' factor | number | dimension | '(' expr ')'
//! ```
//!
//! Dimension identifiers accept snake_case and camelCase spellings
//! (`length_mm`, `lengthMm`). Formulas come from untrusted model output, so
//! length and nesting depth are capped.

use std::collections::BTreeSet;

use thiserror::Error;

use crate::models::{Dimension, Dimensions};

/// Maximum formula length in bytes.
pub const MAX_FORMULA_LEN: usize = 256;

/// Maximum parenthesis / unary nesting depth.
pub const MAX_FORMULA_DEPTH: usize = 16;

/// Errors from parsing a quantity formula.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("formula is empty")]
    Empty,
    #[error("formula exceeds 256 bytes")]
    TooLong,
    #[error("formula nested too deeply")]
    TooDeep,
    #[error("unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),
    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("unexpected token at {0}")]
    TrailingInput(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(Dimension),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Dim(Dimension),
    Neg(Box<Expr>),
    Binary(Box<Expr>, Token, Box<Expr>),
}

/// A parsed quantity formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
}

impl Formula {
    /// Parse a formula.
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        if source.len() > MAX_FORMULA_LEN {
            return Err(FormulaError::TooLong);
        }
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(FormulaError::Empty);
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        if parser.pos != tokens.len() {
            return Err(FormulaError::TrailingInput(parser.pos));
        }
        Ok(Self { expr })
    }

    /// Dimensions referenced by the formula.
    pub fn dimensions(&self) -> BTreeSet<Dimension> {
        let mut out = BTreeSet::new();
        collect_dimensions(&self.expr, &mut out);
        out
    }

    /// Evaluate against one element's dimensions.
    ///
    /// `None` when a referenced dimension is absent or the result is not finite.
    pub fn evaluate(&self, dimensions: &Dimensions) -> Option<f64> {
        eval(&self.expr, dimensions).filter(|v| v.is_finite())
    }
}

fn collect_dimensions(expr: &Expr, out: &mut BTreeSet<Dimension>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Dim(d) => {
            out.insert(*d);
        }
        Expr::Neg(inner) => collect_dimensions(inner, out),
        Expr::Binary(lhs, _, rhs) => {
            collect_dimensions(lhs, out);
            collect_dimensions(rhs, out);
        }
    }
}

fn eval(expr: &Expr, dims: &Dimensions) -> Option<f64> {
    match expr {
        Expr::Number(n) => Some(*n),
        Expr::Dim(d) => dims.get(*d),
        Expr::Neg(inner) => eval(inner, dims).map(|v| -v),
        Expr::Binary(lhs, op, rhs) => {
            let l = eval(lhs, dims)?;
            let r = eval(rhs, dims)?;
            match op {
                Token::Plus => Some(l + r),
                Token::Minus => Some(l - r),
                Token::Star => Some(l * r),
                Token::Slash if r == 0.0 => None,
                Token::Slash => Some(l / r),
                _ => None,
            }
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (pos, c) = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().map(|(_, c)| c).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| FormulaError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_')
                {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().map(|(_, c)| c).collect();
                let dim = Dimension::from_identifier(&ident)
                    .ok_or(FormulaError::UnknownIdentifier(ident))?;
                tokens.push(Token::Ident(dim));
            }
            other => return Err(FormulaError::UnexpectedChar(other, pos)),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn descend(&mut self) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_FORMULA_DEPTH {
            return Err(FormulaError::TooDeep);
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.factor()?;
        while let Some(op @ (Token::Star | Token::Slash)) = self.peek().cloned() {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(d)) => Ok(Expr::Dim(d)),
            Some(Token::Minus) => {
                self.descend()?;
                let inner = self.factor()?;
                self.depth -= 1;
                Ok(Expr::Neg(Box::new(inner)))
            }
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(_) => Err(FormulaError::TrailingInput(self.pos - 1)),
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            Some(_) => Err(FormulaError::TrailingInput(self.pos - 1)),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}
