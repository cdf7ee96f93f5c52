// Arithmetic expression evaluator used by the `calculate` tool.
//
// Accepts numeric literals, + - * /, unary sign and parentheses. Nothing
// else is recognised, so no input can reach anything but arithmetic.

use std::fmt;

/// Deepest parenthesis / unary nesting accepted before giving up
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("expression is empty")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("missing closing parenthesis for '(' at position {0}")]
    UnclosedParen(usize),

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {}", n),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    fn apply(self, a: f64, b: f64) -> Result<f64, EvalError> {
        match self {
            BinOp::Add => Ok(a + b),
            BinOp::Sub => Ok(a - b),
            BinOp::Mul => Ok(a * b),
            BinOp::Div if b == 0.0 => Err(EvalError::DivisionByZero),
            BinOp::Div => Ok(a / b),
        }
    }
}

/// Tokenize, parse and evaluate `input`
pub fn evaluate(input: &str) -> Result<f64, EvalError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(EvalError::Empty);
    }

    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expression(0)?;
    if let Some(&(token, pos)) = parser.peek() {
        return Err(EvalError::UnexpectedToken {
            found: token.to_string(),
            pos,
        });
    }

    if !value.is_finite() {
        return Err(EvalError::NonFinite);
    }
    Ok(value)
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        let token = match ch {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| EvalError::InvalidNumber(literal.clone()))?;
                tokens.push((Token::Number(value), start));
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(EvalError::UnexpectedChar { ch: other, pos: i }),
        };
        tokens.push((token, i));
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(Token, usize)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).copied();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // Operator chains are folded in place, so only parentheses and unary
    // signs add stack depth.
    //
    // expression := term (('+' | '-') term)*
    fn expression(&mut self, depth: usize) -> Result<f64, EvalError> {
        let mut lhs = self.term(depth)?;
        while let Some(&(token, _)) = self.peek() {
            let op = match token {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term(depth)?;
            lhs = op.apply(lhs, rhs)?;
        }
        Ok(lhs)
    }

    // term := factor (('*' | '/') factor)*
    fn term(&mut self, depth: usize) -> Result<f64, EvalError> {
        let mut lhs = self.factor(depth)?;
        while let Some(&(token, _)) = self.peek() {
            let op = match token {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.factor(depth)?;
            lhs = op.apply(lhs, rhs)?;
        }
        Ok(lhs)
    }

    // factor := ('+' | '-') factor | number | '(' expression ')'
    fn factor(&mut self, depth: usize) -> Result<f64, EvalError> {
        if depth > MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }

        match self.next() {
            Some((Token::Number(n), _)) => Ok(n),
            Some((Token::Plus, _)) => self.factor(depth + 1),
            Some((Token::Minus, _)) => Ok(-self.factor(depth + 1)?),
            Some((Token::LParen, open)) => {
                let inner = self.expression(depth + 1)?;
                match self.next() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((token, pos)) => Err(EvalError::UnexpectedToken {
                        found: token.to_string(),
                        pos,
                    }),
                    None => Err(EvalError::UnclosedParen(open)),
                }
            }
            Some((token, pos)) => Err(EvalError::UnexpectedToken {
                found: token.to_string(),
                pos,
            }),
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}

/// Render a number the way tool output shows it: integral values without a
/// fractional part, everything else with Rust's shortest round-trip form.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
