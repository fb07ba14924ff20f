use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use super::Tool;

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("expression is empty")]
    Empty,

    #[error("unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,

    #[error("expression is longer than {0} characters")]
    TooLong(usize),

    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

const MAX_EXPRESSION_LEN: usize = 4096;
const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Num(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Num(n) => format!("number {}", n),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Percent => "'%'".into(),
            Token::Caret => "'^'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // optional exponent: 1e3, 2.5E-4
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| EvalError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Num(value));
                continue;
            }
            '+' => tokens.push(Token::Plus),
            '-' => tokens.push(Token::Minus),
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '*' | '×' => tokens.push(Token::Star),
            '/' | '÷' => tokens.push(Token::Slash),
            '%' => tokens.push(Token::Percent),
            '^' => tokens.push(Token::Caret),
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            other => return Err(EvalError::UnexpectedChar(other, i)),
        }
        i += 1;
    }

    Ok(tokens)
}

/// Recursive-descent evaluator.
///
/// ```text
/// expr    := term (('+' | '-') term)*
/// term    := unary (('*' | '/' | '%') unary)*
/// unary   := ('+' | '-') unary | power
/// power   := primary (('^' | '**') unary)?
/// primary := number | '(' expr ')'
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<f64, EvalError> {
        let mut value = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == Token::Plus { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, EvalError> {
        let mut value = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::Percent)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                Token::Star => value * rhs,
                _ if rhs == 0.0 => return Err(EvalError::DivisionByZero),
                Token::Slash => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    /// Every sign and every parenthesis passes through here, so this bounds recursion.
    fn unary(&mut self) -> Result<f64, EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(EvalError::TooDeep(MAX_DEPTH));
        }
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, EvalError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.primary()?;
        if self.peek() == Some(Token::Caret) {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, EvalError> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    Some(other) => Err(EvalError::UnexpectedToken(other.describe())),
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            Some(other) => Err(EvalError::UnexpectedToken(other.describe())),
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}

/// Evaluate an arithmetic expression.
pub fn evaluate(expression: &str) -> Result<f64, EvalError> {
    if expression.chars().count() > MAX_EXPRESSION_LEN {
        return Err(EvalError::TooLong(MAX_EXPRESSION_LEN));
    }
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(EvalError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(extra) = parser.peek() {
        return Err(EvalError::UnexpectedToken(extra.describe()));
    }
    if !value.is_finite() {
        return Err(EvalError::NotFinite);
    }
    // normalize -0
    Ok(if value == 0.0 { 0.0 } else { value })
}

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Performs basic arithmetic operations. Use this tool to calculate mathematical expressions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The mathematical expression to evaluate (e.g., \"2 + 2\", \"10 * 5\")"
                }
            },
            "required": ["expression"]
        })
    }

    async fn invoke(&self, input: Value) -> String {
        let expression = match &input {
            Value::String(s) => s.as_str(),
            _ => match input.get("expression").and_then(Value::as_str) {
                Some(expression) => expression,
                None => return "Error calculating: missing 'expression'".to_string(),
            },
        };

        match evaluate(expression) {
            Ok(value) => format!("Result: {}", value),
            Err(e) => format!("Error calculating: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(evaluate("2 + 2"), Ok(4.0));
        assert_eq!(evaluate("2 + 3 * 4"), Ok(14.0));
        assert_eq!(evaluate("(2 + 3) * 4"), Ok(20.0));
        assert_eq!(evaluate("10 - 4 - 3"), Ok(3.0));
        assert_eq!(evaluate("2 ^ 3 ^ 2"), Ok(512.0));
        assert_eq!(evaluate("2 ** 10"), Ok(1024.0));
        assert_eq!(evaluate("17 % 5"), Ok(2.0));
    }

    #[test]
    fn test_unary_and_decimals() {
        assert_eq!(evaluate("-3 + 5"), Ok(2.0));
        assert_eq!(evaluate("-(2 + 3)"), Ok(-5.0));
        assert_eq!(evaluate("-2 ^ 2"), Ok(-4.0));
        assert_eq!(evaluate("1.5 * 2"), Ok(3.0));
        assert_eq!(evaluate("1e3 / 4"), Ok(250.0));
    }

    #[test]
    fn test_errors() {
        assert_eq!(evaluate(""), Err(EvalError::Empty));
        assert_eq!(evaluate("1 / 0"), Err(EvalError::DivisionByZero));
        assert_eq!(evaluate("(1 + 2"), Err(EvalError::UnexpectedEnd));
        assert!(matches!(evaluate("2 +* 3"), Err(EvalError::UnexpectedToken(_))));
        assert!(matches!(evaluate("process.exit()"), Err(EvalError::UnexpectedChar('p', 0))));
        assert!(matches!(evaluate("1.2.3"), Err(EvalError::InvalidNumber(_))));
        assert!(matches!(evaluate("2 3"), Err(EvalError::UnexpectedToken(_))));
    }

    #[test]
    fn test_nesting_is_bounded() {
        let parens = format!("{}1{}", "(".repeat(300), ")".repeat(300));
        assert_eq!(evaluate(&parens), Err(EvalError::TooDeep(MAX_DEPTH)));
        let signs = format!("{}1", "-".repeat(1000));
        assert_eq!(evaluate(&signs), Err(EvalError::TooDeep(MAX_DEPTH)));

        let shallow = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&shallow), Ok(1.0));
        assert_eq!(evaluate(&format!("{}1", "1 + ".repeat(500))), Ok(501.0));
    }

    #[tokio::test]
    async fn test_huge_expression_is_an_error_not_a_crash() {
        let tool = CalculatorTool;
        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        let out = tool.invoke(json!({"expression": deep})).await;
        assert!(out.starts_with("Error calculating:"), "{}", out);

        let signs = format!("{}1", "-".repeat(1_000_000));
        let out = tool.invoke(json!({"expression": signs})).await;
        assert!(out.starts_with("Error calculating:"), "{}", out);
    }

    #[tokio::test]
    async fn test_tool_output_format() {
        let tool = CalculatorTool;
        assert_eq!(tool.invoke(json!({"expression": "2 + 2"})).await, "Result: 4");
        assert_eq!(tool.invoke(json!({"expression": "7 / 2"})).await, "Result: 3.5");
        assert!(tool
            .invoke(json!({"expression": "2 +"}))
            .await
            .starts_with("Error calculating:"));
        assert!(tool.invoke(json!({})).await.starts_with("Error calculating:"));
    }
}
