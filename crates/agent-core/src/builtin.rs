//! Built-in Tools
//!
//! Self-contained tools that need no external service.

use async_trait::async_trait;

use crate::error::{AgentError, Result};
use crate::tool::{Arguments, FieldKind, ParameterSchema, Tool, ToolSchema};

/// DateTime tool - returns current time
pub struct DateTimeTool;

#[async_trait]
impl Tool for DateTimeTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "datetime".into(),
            description: "Get the current date and time (UTC)".into(),
            parameters: vec![ParameterSchema::optional(
                "format",
                FieldKind::String,
                "Output format: 'iso', 'human', or 'unix' (default: human)",
            )],
        }
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<String> {
        let format = arguments
            .get("format")
            .and_then(|v| v.as_str())
            .unwrap_or("human");

        let now = chrono::Utc::now();

        Ok(match format {
            "iso" => now.to_rfc3339(),
            "unix" => now.timestamp().to_string(),
            _ => now.format("%A, %B %d, %Y at %H:%M:%S UTC").to_string(),
        })
    }
}

/// Calculator tool - evaluates mathematical expressions
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "calculate".into(),
            description: "Evaluate a mathematical expression with + - * / ^ and parentheses".into(),
            parameters: vec![ParameterSchema::required(
                "expression",
                FieldKind::String,
                "Mathematical expression to evaluate (e.g., '2 + 2', '10 * 5')",
            )],
        }
    }

    async fn invoke(&self, arguments: &Arguments) -> Result<String> {
        let expr = arguments
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgentError::ToolValidation("Missing expression".into()))?;

        evaluate_expression(expr)
            .map(|result| format!("{} = {}", expr, result))
            .map_err(|e| AgentError::tool_failed("calculate", e))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Open,
}

impl Op {
    fn binary(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Add),
            '-' => Some(Self::Sub),
            '*' => Some(Self::Mul),
            '/' => Some(Self::Div),
            '^' => Some(Self::Pow),
            _ => None,
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Neg => 3,
            Self::Pow => 4,
        }
    }

    fn right_associative(self) -> bool {
        matches!(self, Self::Pow | Self::Neg)
    }

    fn apply(self, values: &mut Vec<f64>) -> std::result::Result<(), String> {
        let missing = || "Missing operand".to_string();
        if self == Self::Neg {
            let value = values.pop().ok_or_else(missing)?;
            values.push(-value);
            return Ok(());
        }

        let right = values.pop().ok_or_else(missing)?;
        let left = values.pop().ok_or_else(missing)?;
        values.push(match self {
            Self::Add => left + right,
            Self::Sub => left - right,
            Self::Mul => left * right,
            Self::Div if right == 0.0 => return Err("Division by zero".into()),
            Self::Div => left / right,
            Self::Pow => left.powf(right),
            Self::Neg | Self::Open => return Err("Unbalanced parentheses".into()),
        });
        Ok(())
    }
}

/// Shunting-yard evaluation with explicit operator and value stacks
fn evaluate_expression(expr: &str) -> std::result::Result<f64, String> {
    let chars: Vec<char> = expr.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.is_empty() {
        return Err("Empty expression".into());
    }

    let mut values: Vec<f64> = Vec::new();
    let mut ops: Vec<Op> = Vec::new();
    let mut expect_operand = true;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if expect_operand {
            match c {
                '0'..='9' | '.' => {
                    let start = i;
                    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                        i += 1;
                    }
                    let number: String = chars[start..i].iter().collect();
                    values.push(number.parse().map_err(|e| format!("Parse error: {}", e))?);
                    expect_operand = false;
                    continue;
                }
                '(' => ops.push(Op::Open),
                '-' => ops.push(Op::Neg),
                '+' => {}
                _ => return Err(format!("Unexpected '{}'", c)),
            }
        } else if c == ')' {
            loop {
                match ops.pop() {
                    Some(Op::Open) => break,
                    Some(op) => op.apply(&mut values)?,
                    None => return Err("Unbalanced parentheses".into()),
                }
            }
        } else {
            let op = Op::binary(c).ok_or_else(|| format!("Unexpected '{}'", c))?;
            while let Some(&top) = ops.last() {
                let pops = top != Op::Open
                    && (top.precedence() > op.precedence()
                        || (top.precedence() == op.precedence() && !op.right_associative()));
                if !pops {
                    break;
                }
                ops.pop();
                top.apply(&mut values)?;
            }
            ops.push(op);
            expect_operand = true;
        }
        i += 1;
    }

    if expect_operand {
        return Err("Incomplete expression".into());
    }
    while let Some(op) = ops.pop() {
        if op == Op::Open {
            return Err("Unbalanced parentheses".into());
        }
        op.apply(&mut values)?;
    }

    match (values.pop(), values.is_empty()) {
        (Some(result), true) => Ok(result),
        _ => Err("Malformed expression".into()),
    }
}
