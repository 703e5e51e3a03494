//! Arithmetic toolset.
//!
//! Domain errors (dividing by zero, the square root of a negative number)
//! are answered in-band as error content so the calling model can read and
//! react to them; only an unknown tool name or undecodable operands are
//! protocol-level failures.

use serde_json::{json, Value};
use switchboard_mcp::types::{INVALID_PARAMS, METHOD_NOT_FOUND};
use switchboard_mcp::McpTool;

use crate::{CallReply, Toolset};

pub struct Calculator;

impl Toolset for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn tools(&self) -> Vec<McpTool> {
        vec![
            tool(
                "add",
                "Add two numbers together",
                &[("a", "First number"), ("b", "Second number")],
            ),
            tool(
                "subtract",
                "Subtract the second number from the first",
                &[("a", "Minuend"), ("b", "Subtrahend")],
            ),
            tool(
                "multiply",
                "Multiply two numbers together",
                &[("a", "First number"), ("b", "Second number")],
            ),
            tool(
                "divide",
                "Divide the first number by the second",
                &[("a", "Dividend"), ("b", "Divisor")],
            ),
            tool(
                "power",
                "Raise a number to a power",
                &[("base", "Base number"), ("exponent", "Exponent")],
            ),
            tool(
                "sqrt",
                "Square root of a number",
                &[("value", "Number to take the root of")],
            ),
            tool(
                "modulo",
                "Remainder of dividing the first number by the second",
                &[("a", "Dividend"), ("b", "Divisor")],
            ),
            tool(
                "abs",
                "Absolute value of a number",
                &[("value", "Number to take the absolute value of")],
            ),
        ]
    }

    fn call(&self, tool: &str, arguments: &Value) -> CallReply {
        match tool {
            "add" | "subtract" | "multiply" | "divide" | "modulo" => {
                let (a, b) = match operands(arguments, "a", "b") {
                    Ok(pair) => pair,
                    Err(reply) => return reply,
                };
                match tool {
                    "add" => CallReply::text(format!("{a} + {b} = {}", a + b)),
                    "subtract" => CallReply::text(format!("{a} - {b} = {}", a - b)),
                    "multiply" => CallReply::text(format!("{a} * {b} = {}", a * b)),
                    "divide" if b == 0.0 => {
                        CallReply::error(format!("cannot divide {a} by zero"))
                    }
                    "divide" => CallReply::text(format!("{a} / {b} = {}", a / b)),
                    "modulo" if b == 0.0 => {
                        CallReply::error(format!("cannot take {a} modulo zero"))
                    }
                    _ => CallReply::text(format!("{a} % {b} = {}", a % b)),
                }
            }
            "power" => match operands(arguments, "base", "exponent") {
                Ok((base, exponent)) => {
                    CallReply::text(format!("{base}^{exponent} = {}", base.powf(exponent)))
                }
                Err(reply) => reply,
            },
            "sqrt" => match number(arguments, "value") {
                Ok(value) if value < 0.0 => CallReply::error(format!(
                    "cannot take the square root of a negative number ({value})"
                )),
                Ok(value) => CallReply::text(format!("sqrt({value}) = {}", value.sqrt())),
                Err(reply) => reply,
            },
            "abs" => match number(arguments, "value") {
                Ok(value) => CallReply::text(format!("|{value}| = {}", value.abs())),
                Err(reply) => reply,
            },
            other => CallReply::failure(METHOD_NOT_FOUND, format!("Unknown tool: {other}")),
        }
    }
}

/// Missing operands read as zero; a present non-number is invalid.
fn number(arguments: &Value, key: &str) -> Result<f64, CallReply> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(0.0),
        Some(value) => value.as_f64().ok_or_else(|| {
            CallReply::failure(
                INVALID_PARAMS,
                format!("Invalid parameters: '{key}' must be a number"),
            )
        }),
    }
}

fn operands(arguments: &Value, first: &str, second: &str) -> Result<(f64, f64), CallReply> {
    Ok((number(arguments, first)?, number(arguments, second)?))
}

fn tool(name: &str, description: &str, fields: &[(&str, &str)]) -> McpTool {
    let mut properties = serde_json::Map::new();
    for (key, description) in fields {
        properties.insert(
            (*key).to_string(),
            json!({"type": "number", "description": description}),
        );
    }
    McpTool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({
            "type": "object",
            "properties": properties,
            "required": fields.iter().map(|(key, _)| *key).collect::<Vec<_>>(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertises_eight_tools() {
        let names: Vec<String> = Calculator.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec!["add", "subtract", "multiply", "divide", "power", "sqrt", "modulo", "abs"]
        );
    }

    #[test]
    fn adds_two_numbers() {
        let reply = Calculator.call("add", &json!({"a": 2, "b": 3}));
        assert_eq!(reply, CallReply::text("2 + 3 = 5"));
    }

    #[test]
    fn divide_by_zero_is_an_in_band_error() {
        let reply = Calculator.call("divide", &json!({"a": 5, "b": 0}));
        assert_eq!(reply, CallReply::error("cannot divide 5 by zero"));
    }

    #[test]
    fn negative_sqrt_is_an_in_band_error() {
        let reply = Calculator.call("sqrt", &json!({"value": -4}));
        match reply {
            CallReply::Reply { is_error: true, text } => {
                assert!(text.contains("square root"));
            }
            other => panic!("expected in-band error, got {other:?}"),
        }
    }

    #[test]
    fn missing_operands_default_to_zero() {
        let reply = Calculator.call("add", &json!({}));
        assert_eq!(reply, CallReply::text("0 + 0 = 0"));
    }

    #[test]
    fn non_numeric_operand_is_invalid_params() {
        let reply = Calculator.call("add", &json!({"a": "two", "b": 3}));
        match reply {
            CallReply::Failure { code, .. } => assert_eq!(code, INVALID_PARAMS),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_is_method_not_found() {
        let reply = Calculator.call("cosine", &json!({}));
        match reply {
            CallReply::Failure { code, .. } => assert_eq!(code, METHOD_NOT_FOUND),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn power_and_modulo_work() {
        assert_eq!(
            Calculator.call("power", &json!({"base": 2, "exponent": 10})),
            CallReply::text("2^10 = 1024")
        );
        assert_eq!(
            Calculator.call("modulo", &json!({"a": 7, "b": 3})),
            CallReply::text("7 % 3 = 1")
        );
    }
}
