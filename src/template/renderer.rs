//! Template renderer that executes template AST with a data context.
//!
//! Evaluates pre-compiled expressions against a JSON object.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use crate::helpers::{humanize, plural};
use crate::template::parser::{CompareOp, Expr, TemplateNode};

/// Render a template AST with the given data context.
pub fn render_nodes(nodes: &[TemplateNode], data: &Map<String, Value>) -> Result<String, String> {
    let mut output = String::new();
    render_into(&mut output, nodes, data)?;
    Ok(output)
}

fn render_into(
    output: &mut String,
    nodes: &[TemplateNode],
    data: &Map<String, Value>,
) -> Result<(), String> {
    for node in nodes {
        match node {
            TemplateNode::Literal(s) => output.push_str(s),
            TemplateNode::Output { expr, escaped } => {
                let value = evaluate_expr(expr, data)?;
                let s = value_to_string(&value);
                if *escaped {
                    output.push_str(&html_escape(&s));
                } else {
                    output.push_str(&s);
                }
            }
            TemplateNode::If {
                condition,
                body,
                else_body,
            } => {
                if is_truthy(&evaluate_expr(condition, data)?) {
                    render_into(output, body, data)?;
                } else if let Some(else_nodes) = else_body {
                    render_into(output, else_nodes, data)?;
                }
            }
            TemplateNode::For {
                var,
                iterable,
                body,
            } => match evaluate_expr(iterable, data)? {
                Value::Array(items) => {
                    let mut loop_data = data.clone();
                    for item in items {
                        loop_data.insert(var.clone(), item);
                        render_into(output, body, &loop_data)?;
                    }
                }
                Value::Object(entries) => {
                    // Iterating a mapping yields its keys
                    let mut loop_data = data.clone();
                    for key in entries.keys() {
                        loop_data.insert(var.clone(), Value::String(key.clone()));
                        render_into(output, body, &loop_data)?;
                    }
                }
                Value::Null => {}
                other => {
                    return Err(format!("Cannot iterate over {}", type_name(&other)));
                }
            },
        }
    }
    Ok(())
}

fn evaluate_expr(expr: &Expr, data: &Map<String, Value>) -> Result<Value, String> {
    match expr {
        Expr::StringLit(s) => Ok(Value::String(s.clone())),
        Expr::IntLit(n) => Ok(Value::from(*n)),
        Expr::FloatLit(n) => Ok(Value::from(*n)),
        Expr::BoolLit(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Var(name) => Ok(data.get(name).cloned().unwrap_or(Value::Null)),
        Expr::Field(base, field) => {
            let base = evaluate_expr(base, data)?;
            get_field(&base, field)
        }
        Expr::Index(base, key) => {
            let base = evaluate_expr(base, data)?;
            let key = evaluate_expr(key, data)?;
            Ok(index_value(&base, &key))
        }
        Expr::Compare(left, op, right) => {
            let left = evaluate_expr(left, data)?;
            let right = evaluate_expr(right, data)?;
            let result = match op {
                CompareOp::Eq => values_equal(&left, &right),
                CompareOp::Ne => !values_equal(&left, &right),
                CompareOp::Lt => compare_values(&left, &right)? == Ordering::Less,
                CompareOp::Le => compare_values(&left, &right)? != Ordering::Greater,
                CompareOp::Gt => compare_values(&left, &right)? == Ordering::Greater,
                CompareOp::Ge => compare_values(&left, &right)? != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        Expr::And(left, right) => {
            let left = evaluate_expr(left, data)?;
            if !is_truthy(&left) {
                return Ok(left);
            }
            evaluate_expr(right, data)
        }
        Expr::Or(left, right) => {
            let left = evaluate_expr(left, data)?;
            if is_truthy(&left) {
                return Ok(left);
            }
            evaluate_expr(right, data)
        }
        Expr::Not(inner) => Ok(Value::Bool(!is_truthy(&evaluate_expr(inner, data)?))),
        Expr::Call(name, args) => {
            let args = args
                .iter()
                .map(|arg| evaluate_expr(arg, data))
                .collect::<Result<Vec<_>, _>>()?;
            call_helper(name, &args)
        }
    }
}

/// Dispatch a helper call from a template.
fn call_helper(name: &str, args: &[Value]) -> Result<Value, String> {
    let arg = args.first().unwrap_or(&Value::Null);
    match name {
        "humanize" => Ok(Value::String(humanize(&value_to_string(arg)))),
        "plural" => {
            let count = match arg {
                Value::Array(items) => items.len() as i64,
                Value::Object(entries) => entries.len() as i64,
                Value::Number(n) => n.as_i64().unwrap_or(0),
                _ => 0,
            };
            Ok(Value::String(plural(count).to_string()))
        }
        "upper" => Ok(Value::String(value_to_string(arg).to_uppercase())),
        "lower" => Ok(Value::String(value_to_string(arg).to_lowercase())),
        "len" => {
            let len = match arg {
                Value::Array(items) => items.len(),
                Value::Object(entries) => entries.len(),
                Value::String(s) => s.chars().count(),
                _ => 0,
            };
            Ok(Value::from(len))
        }
        _ => Err(format!("Unknown helper '{}'", name)),
    }
}

/// Look up a field on a mapping. Missing keys and null bases read as null.
fn get_field(value: &Value, key: &str) -> Result<Value, String> {
    match value {
        Value::Object(entries) => Ok(entries.get(key).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        Value::Array(items) if key == "length" => Ok(Value::from(items.len())),
        other => Err(format!(
            "Cannot access '{}' on {}: expected object",
            key,
            type_name(other)
        )),
    }
}

/// Index into a value (array or object access)
fn index_value(base: &Value, key: &Value) -> Value {
    match (base, key) {
        (Value::Array(items), Value::Number(n)) => {
            let Some(idx) = n.as_i64() else {
                return Value::Null;
            };
            let idx = if idx < 0 { items.len() as i64 + idx } else { idx };
            usize::try_from(idx)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null)
        }
        (Value::Object(entries), Value::String(key)) => {
            entries.get(key).cloned().unwrap_or(Value::Null)
        }
        _ => Value::Null,
    }
}

/// Convert a Value to its string representation for output
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(items) => items
            .iter()
            .map(value_to_string)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Escape HTML special characters
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => result.push_str("&amp;"),
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '"' => result.push_str("&quot;"),
            '\'' => result.push_str("&#x27;"),
            _ => result.push(c),
        }
    }
    result
}

/// Check if a value is truthy
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(entries) => !entries.is_empty(),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Result<Ordering, String> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(format!("Cannot compare {} and {}", type_name(a), type_name(b))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parser::parse_template;
    use serde_json::json;

    fn render(source: &str, data: Value) -> Result<String, String> {
        let nodes = parse_template(source)?;
        let data = match data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        render_nodes(&nodes, &data)
    }

    #[test]
    fn test_escaped_and_raw_output() {
        let data = json!({"name": "<b>Bob</b>"});
        assert_eq!(
            render("<%= name %>|<%- name %>", data).unwrap(),
            "&lt;b&gt;Bob&lt;/b&gt;|<b>Bob</b>"
        );
    }

    #[test]
    fn test_nested_lookup_and_missing_keys() {
        let data = json!({"page": {"title": "Widgets", "headers": ["a", "b"]}});
        assert_eq!(
            render("<%= page.title %>:<%= page.headers[1] %>:<%= page.nope %>", data).unwrap(),
            "Widgets:b:"
        );
    }

    #[test]
    fn test_conditionals() {
        let source = "<% if user %>hi <%= user.name %><% elsif guest %>guest<% else %>anon<% end %>";
        assert_eq!(render(source, json!({"user": {"name": "ann"}})).unwrap(), "hi ann");
        assert_eq!(render(source, json!({"guest": true})).unwrap(), "guest");
        assert_eq!(render(source, json!({})).unwrap(), "anon");
    }

    #[test]
    fn test_for_loop_and_helpers() {
        let data = json!({"items": [{"n": "a"}, {"n": "b"}]});
        assert_eq!(
            render(
                "<% for item in items %><%= upper(item.n) %><% end %> <%= len(items) %> item<%= plural(items) %>",
                data
            )
            .unwrap(),
            "AB 2 items"
        );
    }

    #[test]
    fn test_comparisons() {
        let data = json!({"count": 3, "kind": "x"});
        assert_eq!(
            render("<% if count >= 3 && kind == 'x' %>yes<% end %>", data).unwrap(),
            "yes"
        );
    }

    #[test]
    fn test_unknown_helper_fails() {
        assert!(render("<%= explode(1) %>", json!({})).is_err());
    }
}
