//! Calculator tool: evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, `%`, `^` (right-associative), parentheses,
//! unary minus, and decimal numbers. Input is either a raw expression or a
//! JSON object `{"expression": "..."}`.

use async_trait::async_trait;
use std::iter::Peekable;
use std::str::CharIndices;
use stepwise_core::error::ToolError;
use stepwise_core::tool::{InvocationContext, Tool};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports + - * / % ^, parentheses, and decimal numbers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(
        &self,
        input: &str,
        _context: Option<&InvocationContext>,
    ) -> Result<String, ToolError> {
        let expression = expression_from_input(input)?;
        let value = evaluate(&expression).map_err(|e| ToolError::ExecutionFailed {
            tool_name: self.name().to_string(),
            reason: e.to_string(),
        })?;
        Ok(format_number(value))
    }
}

/// Accept `{"expression": "..."}`, a bare JSON string, or raw text.
fn expression_from_input(input: &str) -> Result<String, ToolError> {
    match serde_json::from_str::<serde_json::Value>(input) {
        Ok(serde_json::Value::Object(map)) => map
            .get("expression")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' field".into())),
        Ok(serde_json::Value::String(s)) => Ok(s),
        Ok(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Ok(input.to_string()),
    }
}

/// Drop the trailing `.0` on integral results.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("missing closing parenthesis")]
    UnclosedParen,

    #[error("division by zero")]
    DivisionByZero,

    #[error("result is not a finite number")]
    NotFinite,

    #[error("expression is nested more than {0} levels deep")]
    TooDeep(usize),
}

/// Limit on nested parentheses, unary minus, and `^` chains.
const MAX_DEPTH: usize = 256;

/// Evaluate an arithmetic expression.
pub fn evaluate(expr: &str) -> Result<f64, EvalError> {
    let mut eval = Evaluator {
        chars: expr.char_indices().peekable(),
        depth: 0,
    };
    let value = eval.sum()?;
    eval.skip_ws();
    if let Some((at, c)) = eval.chars.next() {
        return Err(EvalError::UnexpectedChar(c, at));
    }
    if !value.is_finite() {
        return Err(EvalError::NotFinite);
    }
    Ok(value)
}

struct Evaluator<'a> {
    chars: Peekable<CharIndices<'a>>,
    depth: usize,
}

impl Evaluator<'_> {
    fn skip_ws(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    /// Run `rule` one nesting level deeper.
    fn nested(
        &mut self,
        rule: impl FnOnce(&mut Self) -> Result<f64, EvalError>,
    ) -> Result<f64, EvalError> {
        if self.depth >= MAX_DEPTH {
            return Err(EvalError::TooDeep(MAX_DEPTH));
        }
        self.depth += 1;
        let value = rule(self);
        self.depth -= 1;
        value
    }

    fn eat(&mut self, want: char) -> bool {
        self.skip_ws();
        self.chars.next_if(|&(_, c)| c == want).is_some()
    }

    // sum = product (('+' | '-') product)*
    fn sum(&mut self) -> Result<f64, EvalError> {
        let mut acc = self.product()?;
        loop {
            if self.eat('+') {
                acc += self.product()?;
            } else if self.eat('-') {
                acc -= self.product()?;
            } else {
                return Ok(acc);
            }
        }
    }

    // product = power (('*' | '/' | '%') power)*
    fn product(&mut self) -> Result<f64, EvalError> {
        let mut acc = self.power()?;
        loop {
            if self.eat('*') {
                acc *= self.power()?;
            } else if self.eat('/') {
                let rhs = self.power()?;
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                acc /= rhs;
            } else if self.eat('%') {
                let rhs = self.power()?;
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                acc %= rhs;
            } else {
                return Ok(acc);
            }
        }
    }

    // power = unary ('^' power)?
    fn power(&mut self) -> Result<f64, EvalError> {
        let base = self.unary()?;
        if self.eat('^') {
            let exp = self.nested(Self::power)?;
            return Ok(base.powf(exp));
        }
        Ok(base)
    }

    // unary = '-' unary | atom
    fn unary(&mut self) -> Result<f64, EvalError> {
        if self.eat('-') {
            return Ok(-self.nested(Self::unary)?);
        }
        self.atom()
    }

    // atom = NUMBER | '(' sum ')'
    fn atom(&mut self) -> Result<f64, EvalError> {
        if self.eat('(') {
            let inner = self.nested(Self::sum)?;
            if !self.eat(')') {
                return Err(EvalError::UnclosedParen);
            }
            return Ok(inner);
        }

        self.skip_ws();
        let mut literal = String::new();
        while let Some((_, c)) = self.chars.next_if(|(_, c)| c.is_ascii_digit() || *c == '.') {
            literal.push(c);
        }
        if literal.is_empty() {
            return match self.chars.peek() {
                Some(&(at, c)) => Err(EvalError::UnexpectedChar(c, at)),
                None => Err(EvalError::UnexpectedEnd),
            };
        }
        literal
            .parse()
            .map_err(|_| EvalError::InvalidNumber(literal))
    }
}
