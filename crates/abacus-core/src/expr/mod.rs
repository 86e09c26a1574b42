//! Infix tokenizer, validator, and RPN machinery for arithmetic
//! expressions.
//!
//! Everything in this module is pure: tokenization and validation scan the
//! input once, the shunting-yard conversion discards parentheses, and the
//! local reducer exists for one-shot evaluation and as a test oracle. The
//! distributed path reduces the same RPN one step at a time through the
//! scheduler instead.

use std::fmt;
use std::str::FromStr;

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Errors produced by tokenization, validation, and reduction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("unmatched closing parenthesis")]
    UnmatchedClose,

    #[error("unmatched opening parenthesis")]
    UnmatchedOpen,

    #[error("operator {0:?} is missing an operand")]
    MissingOperand(char),

    #[error("expected an operator between operands")]
    AdjacentOperands,

    #[error("invalid numeric literal {0:?}")]
    BadLiteral(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NonFinite,

    #[error("malformed postfix sequence")]
    MalformedRpn,
}

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// One of the four binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    /// Shunting-yard precedence: `+ -` bind looser than `* /`. All four
    /// operators are left-associative.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Self::Add => '+',
            Self::Sub => '-',
            Self::Mul => '*',
            Self::Div => '/',
        }
    }

    pub fn from_symbol(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Add),
            '-' => Some(Self::Sub),
            '*' => Some(Self::Mul),
            '/' => Some(Self::Div),
            _ => None,
        }
    }

    /// Apply the operator to two doubles.
    ///
    /// Division by zero and non-finite results (overflow) are errors, never
    /// `±Inf`/`NaN`.
    pub fn apply(self, lhs: f64, rhs: f64) -> Result<f64, ExprError> {
        if self == Self::Div && rhs == 0.0 {
            return Err(ExprError::DivisionByZero);
        }

        let value = match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
        };

        if !value.is_finite() {
            return Err(ExprError::NonFinite);
        }
        Ok(value)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Op {
    type Err = OpParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next().and_then(Self::from_symbol), chars.next()) {
            (Some(op), None) => Ok(op),
            _ => Err(OpParseError(s.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`Op`] string.
#[derive(Debug, Clone)]
pub struct OpParseError(pub String);

impl fmt::Display for OpParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid operator: {:?}", self.0)
    }
}

impl std::error::Error for OpParseError {}

// Operators travel over the wire as their symbol ("+", "-", "*", "/").
impl Serialize for Op {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Op {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

/// A single expression token.
///
/// Numeric literals keep their string form so that user-entered precision
/// survives storage and transport untouched. After RPN conversion only
/// `Number` and `Op` remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Number(String),
    Op(Op),
    OpenParen,
    CloseParen,
}

impl Token {
    pub fn number(value: impl Into<String>) -> Self {
        Self::Number(value.into())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(raw) => f.write_str(raw),
            Self::Op(op) => write!(f, "{op}"),
            Self::OpenParen => f.write_str("("),
            Self::CloseParen => f.write_str(")"),
        }
    }
}

impl FromStr for Token {
    type Err = ExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "(" => Ok(Self::OpenParen),
            ")" => Ok(Self::CloseParen),
            _ => {
                if let Ok(op) = s.parse::<Op>() {
                    return Ok(Self::Op(op));
                }
                if s.is_empty() {
                    return Err(ExprError::BadLiteral(s.to_owned()));
                }
                Ok(Self::Number(s.to_owned()))
            }
        }
    }
}

/// Serialize tokens to their string forms for persistence.
pub fn to_strings(tokens: &[Token]) -> Vec<String> {
    tokens.iter().map(Token::to_string).collect()
}

/// Rebuild tokens from their persisted string forms.
pub fn from_strings(values: &[String]) -> Result<Vec<Token>, ExprError> {
    values.iter().map(|v| v.parse()).collect()
}

/// Parse a literal as an IEEE-754 double.
pub fn parse_literal(raw: &str) -> Result<f64, ExprError> {
    raw.parse::<f64>()
        .map_err(|_| ExprError::BadLiteral(raw.to_owned()))
}

// ---------------------------------------------------------------------------
// Tokenizer + validator
// ---------------------------------------------------------------------------

/// Tokenize and validate an infix expression.
///
/// The scan emits each operator and parenthesis as its own token and
/// accumulates every other run of characters into one literal. Validation
/// then rejects anything that would not convert to a well-formed postfix
/// sequence.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();

    for ch in input.chars() {
        match ch {
            '+' | '-' | '*' | '/' | '(' | ')' => {
                if !literal.is_empty() {
                    tokens.push(Token::Number(std::mem::take(&mut literal)));
                }
                let token = match ch {
                    '(' => Token::OpenParen,
                    ')' => Token::CloseParen,
                    _ => match Op::from_symbol(ch) {
                        Some(op) => Token::Op(op),
                        None => return Err(ExprError::BadLiteral(ch.to_string())),
                    },
                };
                tokens.push(token);
            }
            _ => literal.push(ch),
        }
    }
    if !literal.is_empty() {
        tokens.push(Token::Number(literal));
    }

    validate(&tokens)?;
    Ok(tokens)
}

/// Validate a tokenized infix sequence.
///
/// Runs an expectation machine over the tokens: at any point we either
/// expect an operand (a literal or an opening paren) or an operator (a
/// binary operator or a closing paren). Combined with paren-depth tracking
/// this guarantees the shunting-yard output is a well-formed postfix
/// sequence, which the scheduler's step-at-a-time reduction depends on.
fn validate(tokens: &[Token]) -> Result<(), ExprError> {
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }

    let mut depth = 0usize;
    let mut expect_operand = true;

    for token in tokens {
        match token {
            Token::Number(raw) => {
                if !expect_operand {
                    return Err(ExprError::AdjacentOperands);
                }
                if !raw.chars().all(|c| c.is_ascii_digit()) {
                    return Err(ExprError::BadLiteral(raw.clone()));
                }
                expect_operand = false;
            }
            Token::Op(op) => {
                if expect_operand {
                    return Err(ExprError::MissingOperand(op.symbol()));
                }
                expect_operand = true;
            }
            Token::OpenParen => {
                if !expect_operand {
                    return Err(ExprError::AdjacentOperands);
                }
                depth += 1;
            }
            Token::CloseParen => {
                if expect_operand {
                    return Err(ExprError::UnmatchedClose);
                }
                if depth == 0 {
                    return Err(ExprError::UnmatchedClose);
                }
                depth -= 1;
            }
        }
    }

    if depth > 0 {
        return Err(ExprError::UnmatchedOpen);
    }
    if expect_operand {
        // The sequence ended on an operator.
        let last = match tokens.last() {
            Some(Token::Op(op)) => op.symbol(),
            _ => '(',
        };
        return Err(ExprError::MissingOperand(last));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// RPN
// ---------------------------------------------------------------------------

/// Convert validated infix tokens to Reverse Polish Notation via the
/// shunting-yard algorithm. Parentheses are discarded; the output holds
/// only literals and operators.
pub fn to_rpn(tokens: &[Token]) -> Vec<Token> {
    let mut output = Vec::with_capacity(tokens.len());
    let mut stack: Vec<Token> = Vec::with_capacity(tokens.len());

    for token in tokens {
        match token {
            Token::Number(_) => output.push(token.clone()),
            Token::Op(op) => {
                while let Some(Token::Op(top)) = stack.last() {
                    if top.precedence() >= op.precedence() {
                        // Checked above: the top of the stack is an operator.
                        if let Some(popped) = stack.pop() {
                            output.push(popped);
                        }
                    } else {
                        break;
                    }
                }
                stack.push(Token::Op(*op));
            }
            Token::OpenParen => stack.push(Token::OpenParen),
            Token::CloseParen => {
                while let Some(top) = stack.pop() {
                    if top == Token::OpenParen {
                        break;
                    }
                    output.push(top);
                }
            }
        }
    }

    while let Some(top) = stack.pop() {
        if top != Token::OpenParen {
            output.push(top);
        }
    }

    output
}

/// Reduce an RPN sequence to a single value in one pass.
pub fn reduce(rpn: &[Token]) -> Result<f64, ExprError> {
    let mut stack: Vec<f64> = Vec::with_capacity(rpn.len());

    for token in rpn {
        match token {
            Token::Number(raw) => stack.push(parse_literal(raw)?),
            Token::Op(op) => {
                let rhs = stack.pop().ok_or(ExprError::MalformedRpn)?;
                let lhs = stack.pop().ok_or(ExprError::MalformedRpn)?;
                stack.push(op.apply(lhs, rhs)?);
            }
            _ => return Err(ExprError::MalformedRpn),
        }
    }

    match (stack.pop(), stack.is_empty()) {
        (Some(value), true) => Ok(value),
        _ => Err(ExprError::MalformedRpn),
    }
}

/// Tokenize, convert, and reduce an infix expression locally.
pub fn evaluate(input: &str) -> Result<f64, ExprError> {
    let tokens = tokenize(input)?;
    reduce(&to_rpn(&tokens))
}
