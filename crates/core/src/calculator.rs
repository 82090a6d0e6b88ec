//! Arithmetic over a closed grammar: numeric literals, unary `+`/`-`, and
//! binary `+ - * / **`. Input is parsed into an AST before anything is
//! evaluated. Names, calls and attribute access are rejected at parse time.

use thiserror::Error;

pub const MAX_EXPRESSION_LEN: usize = 256;
pub const MAX_DEPTH: usize = 32;
pub const MAX_NODES: usize = 128;
pub const MAX_EXPONENT: f64 = 1_000.0;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ExpressionError {
    #[error("expression is empty")]
    Empty,
    #[error("expression exceeds {max} characters")]
    TooLong { max: usize },
    #[error("expression is too deeply nested or too large")]
    TooComplex,
    #[error("names are not allowed: `{0}`")]
    Name(String),
    #[error("function calls are not allowed: `{0}`")]
    FunctionCall(String),
    #[error("attribute access is not allowed")]
    AttributeAccess,
    #[error("unsupported token `{0}`")]
    UnsupportedToken(String),
    #[error("invalid number literal `{0}`")]
    InvalidNumber(String),
    #[error("unexpected `{0}`")]
    Unexpected(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("division by zero")]
    DivisionByZero,
    #[error("exponent magnitude exceeds {MAX_EXPONENT}")]
    ExponentTooLarge,
    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Clone, Debug, PartialEq)]
enum Expr {
    Number(f64),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Power,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Number(value) => value.to_string(),
            Self::Plus => "+".into(),
            Self::Minus => "-".into(),
            Self::Star => "*".into(),
            Self::Slash => "/".into(),
            Self::Power => "**".into(),
            Self::LParen => "(".into(),
            Self::RParen => ")".into(),
        }
    }
}

pub fn evaluate(expression: &str) -> Result<f64, ExpressionError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Err(ExpressionError::Empty);
    }
    if expression.len() > MAX_EXPRESSION_LEN {
        return Err(ExpressionError::TooLong { max: MAX_EXPRESSION_LEN });
    }

    let tokens = tokenize(expression)?;
    if tokens.len() > MAX_NODES {
        return Err(ExpressionError::TooComplex);
    }

    let mut parser = Parser { tokens, position: 0, depth: 0 };
    let ast = parser.expression()?;
    if let Some(token) = parser.peek() {
        return Err(ExpressionError::Unexpected(token.describe()));
    }

    let value = eval(&ast)?;
    if !value.is_finite() {
        return Err(ExpressionError::NonFinite);
    }
    Ok(value)
}

/// Formats a result the way the `Calculate` tool reports it.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let ch = chars[index];
        match ch {
            _ if ch.is_whitespace() => index += 1,
            '0'..='9' | '.' => {
                let start = index;
                while index < chars.len() && (chars[index].is_ascii_digit() || chars[index] == '.')
                {
                    index += 1;
                }
                if index < chars.len() && matches!(chars[index], 'e' | 'E') {
                    let mut lookahead = index + 1;
                    if lookahead < chars.len() && matches!(chars[lookahead], '+' | '-') {
                        lookahead += 1;
                    }
                    if lookahead < chars.len() && chars[lookahead].is_ascii_digit() {
                        index = lookahead;
                        while index < chars.len() && chars[index].is_ascii_digit() {
                            index += 1;
                        }
                    }
                }
                let literal: String = chars[start..index].iter().collect();
                if index < chars.len() && (chars[index].is_alphabetic() || chars[index] == '_') {
                    return Err(ExpressionError::InvalidNumber(literal));
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Number(value));
            }
            '+' => {
                tokens.push(Token::Plus);
                index += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                index += 1;
            }
            '*' if chars.get(index + 1) == Some(&'*') => {
                tokens.push(Token::Power);
                index += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                index += 1;
            }
            '/' if chars.get(index + 1) == Some(&'/') => {
                return Err(ExpressionError::UnsupportedToken("//".into()));
            }
            '/' => {
                tokens.push(Token::Slash);
                index += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                index += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                if chars.get(index + 1) == Some(&'.') {
                    return Err(ExpressionError::AttributeAccess);
                }
                index += 1;
            }
            _ if ch.is_alphabetic() || ch == '_' => {
                let start = index;
                while index < chars.len() && (chars[index].is_alphanumeric() || chars[index] == '_')
                {
                    index += 1;
                }
                let name: String = chars[start..index].iter().collect();
                let mut next = index;
                while next < chars.len() && chars[next].is_whitespace() {
                    next += 1;
                }
                return Err(match chars.get(next) {
                    Some('(') => ExpressionError::FunctionCall(name),
                    Some('.') => ExpressionError::AttributeAccess,
                    _ => ExpressionError::Name(name),
                });
            }
            other => return Err(ExpressionError::UnsupportedToken(other.to_string())),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn descend(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooComplex);
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    // `**` binds tighter than a leading sign: -2 ** 2 == -4
    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = match self.peek() {
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Minus) => UnaryOp::Minus,
            _ => return self.power(),
        };
        self.advance();
        self.descend()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.primary()?;
        if self.peek() != Some(&Token::Power) {
            return Ok(base);
        }
        self.advance();
        self.descend()?;
        let exponent = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)))
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.expression()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(ExpressionError::Unexpected(other.describe())),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            Some(other) => Err(ExpressionError::Unexpected(other.describe())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

fn eval(expr: &Expr) -> Result<f64, ExpressionError> {
    let value = match expr {
        Expr::Number(value) => *value,
        Expr::Unary(UnaryOp::Plus, operand) => eval(operand)?,
        Expr::Unary(UnaryOp::Minus, operand) => -eval(operand)?,
        Expr::Binary(op, left, right) => {
            let left = eval(left)?;
            let right = eval(right)?;
            match op {
                BinaryOp::Add => left + right,
                BinaryOp::Sub => left - right,
                BinaryOp::Mul => left * right,
                BinaryOp::Div => {
                    if right == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    left / right
                }
                BinaryOp::Pow => {
                    if right.abs() > MAX_EXPONENT {
                        return Err(ExpressionError::ExponentTooLarge);
                    }
                    if left == 0.0 && right < 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    left.powf(right)
                }
            }
        }
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(ExpressionError::NonFinite)
    }
}

#[cfg(test)]
mod tests {
    use super::{evaluate, format_number, ExpressionError};

    fn approx(left: f64, right: f64) -> bool {
        (left - right).abs() < 1e-9
    }

    #[test]
    fn averages_three_prices() {
        let value = evaluate("(999.99+799.99+699.99)/3").expect("valid expression");
        assert!(approx(value, 833.323_333_333_333_3), "got {value}");
    }

    #[test]
    fn respects_precedence_and_associativity() {
        assert_eq!(evaluate("2 + 3 * 4"), Ok(14.0));
        assert_eq!(evaluate("(2 + 3) * 4"), Ok(20.0));
        assert_eq!(evaluate("10 - 4 - 3"), Ok(3.0));
        assert_eq!(evaluate("2 ** 3 ** 2"), Ok(512.0));
        assert_eq!(evaluate("-2 ** 2"), Ok(-4.0));
        assert_eq!(evaluate("2 ** -1"), Ok(0.5));
        assert_eq!(evaluate("--3"), Ok(3.0));
        assert_eq!(evaluate("1.5e3 / 3"), Ok(500.0));
    }

    #[test]
    fn rejects_code_constructs() {
        assert_eq!(
            evaluate("__import__('os')"),
            Err(ExpressionError::FunctionCall("__import__".into()))
        );
        assert_eq!(evaluate("os.system"), Err(ExpressionError::AttributeAccess));
        assert_eq!(evaluate("(1).real"), Err(ExpressionError::AttributeAccess));
        assert_eq!(evaluate("x + 1"), Err(ExpressionError::Name("x".into())));
        assert!(matches!(evaluate("'a' * 3"), Err(ExpressionError::UnsupportedToken(_))));
        assert!(matches!(evaluate("7 // 2"), Err(ExpressionError::UnsupportedToken(_))));
    }

    #[test]
    fn bounds_pathological_input() {
        assert_eq!(evaluate("10 ** 10000"), Err(ExpressionError::ExponentTooLarge));
        assert_eq!(evaluate("10 ** 400"), Err(ExpressionError::NonFinite));
        let nested = format!("{}1{}", "(".repeat(64), ")".repeat(64));
        assert_eq!(evaluate(&nested), Err(ExpressionError::TooComplex));
        let long = "1+".repeat(200) + "1";
        assert!(matches!(evaluate(&long), Err(ExpressionError::TooLong { .. })));
    }

    #[test]
    fn reports_arithmetic_and_syntax_errors() {
        assert_eq!(evaluate("1 / 0"), Err(ExpressionError::DivisionByZero));
        assert_eq!(evaluate(""), Err(ExpressionError::Empty));
        assert_eq!(evaluate("(1 + 2"), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(evaluate("1 2"), Err(ExpressionError::Unexpected("2".into())));
        assert!(matches!(evaluate("1.2.3"), Err(ExpressionError::InvalidNumber(_))));
    }

    #[test]
    fn formats_results() {
        assert_eq!(format_number(14.0), "14.0");
        assert_eq!(format_number(0.5), "0.5");
    }
}
