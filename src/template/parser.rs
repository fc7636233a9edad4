//! ERB-style template parser.
//!
//! Parses templates with syntax like:
//! - `<%= expr %>` - HTML-escaped output
//! - `<%- expr %>` - Raw/unescaped output
//! - `<% code %>` - Control flow (if, elsif, else, for, end)

/// Pre-compiled expression for fast evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// String literal: "hello"
    StringLit(String),
    /// Integer literal: 42
    IntLit(i64),
    /// Float literal: 3.14
    FloatLit(f64),
    /// Boolean literal: true/false
    BoolLit(bool),
    /// Null literal
    Null,
    /// Simple variable lookup: name
    Var(String),
    /// Field access: expr.field
    Field(Box<Expr>, String),
    /// Index access: expr[key]
    Index(Box<Expr>, Box<Expr>),
    /// Comparison: expr op expr
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    /// Logical AND: expr && expr
    And(Box<Expr>, Box<Expr>),
    /// Logical OR: expr || expr
    Or(Box<Expr>, Box<Expr>),
    /// Logical NOT: !expr
    Not(Box<Expr>),
    /// Helper call: name(arg1, arg2, ...)
    Call(String, Vec<Expr>),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompareOp {
    Eq, // ==
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

/// A node in the template AST.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateNode {
    /// Raw HTML/text content
    Literal(String),
    /// Output expression: `<%= expr %>` (escaped) or `<%- expr %>` (raw)
    Output { expr: Expr, escaped: bool },
    /// If conditional block
    If {
        condition: Expr,
        body: Vec<TemplateNode>,
        else_body: Option<Vec<TemplateNode>>,
    },
    /// For loop block
    For {
        var: String,
        iterable: Expr,
        body: Vec<TemplateNode>,
    },
}

/// Token types during lexing
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(String),
    OutputEscaped(String), // <%= ... %>
    OutputRaw(String),     // <%- ... %>
    Code(String),          // <% ... %>
}

/// Parse an ERB-style template into an AST.
pub fn parse_template(source: &str) -> Result<Vec<TemplateNode>, String> {
    let tokens = tokenize(source)?;
    let mut pos = 0;
    let (nodes, terminator) = parse_block(&tokens, &mut pos)?;
    match terminator {
        None => Ok(nodes),
        Some(code) => Err(format!("Unexpected '{}' outside of block", code)),
    }
}

/// Tokenize the template source into a sequence of tokens.
fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    let mut current_literal = String::new();

    while let Some(c) = chars.next() {
        if c == '<' && chars.peek() == Some(&'%') {
            chars.next(); // consume '%'

            if !current_literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut current_literal)));
            }

            let is_output = chars.peek() == Some(&'=');
            let is_raw = chars.peek() == Some(&'-');
            if is_output || is_raw {
                chars.next();
            }

            let mut tag_content = String::new();
            loop {
                match chars.next() {
                    Some('%') if chars.peek() == Some(&'>') => {
                        chars.next(); // consume '>'
                        break;
                    }
                    Some(ch) => tag_content.push(ch),
                    None => return Err("Unclosed template tag".to_string()),
                }
            }

            let tag_content = tag_content.trim().to_string();
            if is_raw {
                tokens.push(Token::OutputRaw(tag_content));
            } else if is_output {
                tokens.push(Token::OutputEscaped(tag_content));
            } else {
                tokens.push(Token::Code(tag_content));
            }
        } else {
            current_literal.push(c);
        }
    }

    if !current_literal.is_empty() {
        tokens.push(Token::Literal(current_literal));
    }

    Ok(tokens)
}

/// Parse nodes until the end of input or a block terminator
/// (`end`, `else`, `elsif ...`), which is returned unconsumed-by-caller.
fn parse_block(tokens: &[Token], pos: &mut usize) -> Result<(Vec<TemplateNode>, Option<String>), String> {
    let mut nodes = Vec::new();

    while *pos < tokens.len() {
        let token = &tokens[*pos];
        *pos += 1;
        match token {
            Token::Literal(s) => nodes.push(TemplateNode::Literal(s.clone())),
            Token::OutputEscaped(expr) => nodes.push(TemplateNode::Output {
                expr: compile_expr(expr),
                escaped: true,
            }),
            Token::OutputRaw(expr) => nodes.push(TemplateNode::Output {
                expr: compile_expr(expr),
                escaped: false,
            }),
            Token::Code(code) => {
                let code = code.trim();
                if code == "end" || code == "else" || code.starts_with("elsif ") {
                    return Ok((nodes, Some(code.to_string())));
                } else if let Some(condition) = code.strip_prefix("if ") {
                    nodes.push(parse_if_block(tokens, pos, compile_expr(condition))?);
                } else if let Some(statement) = code.strip_prefix("for ") {
                    let (var, iterable) = parse_for_statement(statement)?;
                    let (body, terminator) = parse_block(tokens, pos)?;
                    match terminator.as_deref() {
                        Some("end") => nodes.push(TemplateNode::For {
                            var,
                            iterable,
                            body,
                        }),
                        Some(other) => return Err(format!("Unexpected '{}' in for block", other)),
                        None => return Err("Unclosed for block - missing 'end'".to_string()),
                    }
                }
                // Other code is ignored: templates have no side effects.
            }
        }
    }

    Ok((nodes, None))
}

/// Parse the remainder of an if block whose `if` token was just consumed.
fn parse_if_block(tokens: &[Token], pos: &mut usize, condition: Expr) -> Result<TemplateNode, String> {
    let (body, terminator) = parse_block(tokens, pos)?;
    let else_body = match terminator.as_deref() {
        Some("end") => None,
        Some("else") => {
            let (else_nodes, terminator) = parse_block(tokens, pos)?;
            if terminator.as_deref() != Some("end") {
                return Err("Unclosed if block - missing 'end'".to_string());
            }
            Some(else_nodes)
        }
        Some(code) if code.starts_with("elsif ") => {
            // elsif is a nested if in the else branch; it consumes the shared 'end'
            let nested = parse_if_block(tokens, pos, compile_expr(&code[6..]))?;
            Some(vec![nested])
        }
        _ => return Err("Unclosed if block - missing 'end'".to_string()),
    };

    Ok(TemplateNode::If {
        condition,
        body,
        else_body,
    })
}

/// Parse a for statement like "item in items" or "(item in items)"
fn parse_for_statement(s: &str) -> Result<(String, Expr), String> {
    let s = s
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .trim();

    if let Some(pos) = s.find(" in ") {
        let var = s[..pos].trim().to_string();
        let iterable_str = s[pos + 4..].trim();

        if var.is_empty() {
            return Err("Missing loop variable in for statement".to_string());
        }
        if iterable_str.is_empty() {
            return Err("Missing iterable in for statement".to_string());
        }

        Ok((var, compile_expr(iterable_str)))
    } else {
        Err(format!(
            "Invalid for statement: expected 'var in iterable', got '{}'",
            s
        ))
    }
}

/// Compile an expression string into a pre-compiled Expr AST.
pub fn compile_expr(expr: &str) -> Expr {
    let expr = expr.trim();

    if expr.len() >= 2
        && ((expr.starts_with('"') && expr.ends_with('"'))
            || (expr.starts_with('\'') && expr.ends_with('\'')))
    {
        return Expr::StringLit(expr[1..expr.len() - 1].to_string());
    }

    if let Ok(n) = expr.parse::<i64>() {
        return Expr::IntLit(n);
    }
    if let Ok(n) = expr.parse::<f64>() {
        return Expr::FloatLit(n);
    }

    match expr {
        "true" => return Expr::BoolLit(true),
        "false" => return Expr::BoolLit(false),
        "null" | "None" => return Expr::Null,
        _ => {}
    }

    // Logical operators bind looser than comparisons
    if let Some(pos) = find_top_level(expr, " || ") {
        let left = compile_expr(&expr[..pos]);
        let right = compile_expr(&expr[pos + 4..]);
        return Expr::Or(Box::new(left), Box::new(right));
    }
    if let Some(pos) = find_top_level(expr, " && ") {
        let left = compile_expr(&expr[..pos]);
        let right = compile_expr(&expr[pos + 4..]);
        return Expr::And(Box::new(left), Box::new(right));
    }

    for (op_str, op) in [
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        (">=", CompareOp::Ge),
        ("<=", CompareOp::Le),
        (">", CompareOp::Gt),
        ("<", CompareOp::Lt),
    ] {
        if let Some(pos) = find_top_level(expr, op_str) {
            let left = compile_expr(&expr[..pos]);
            let right = compile_expr(&expr[pos + op_str.len()..]);
            return Expr::Compare(Box::new(left), op, Box::new(right));
        }
    }

    if let Some(inner) = expr.strip_prefix('!') {
        return Expr::Not(Box::new(compile_expr(inner)));
    }

    // Helper calls like "humanize(post.created)"
    if let Some(paren_pos) = expr.find('(') {
        let name = &expr[..paren_pos];
        if !name.is_empty()
            && name.chars().all(|c| c.is_alphanumeric() || c == '_')
            && expr.ends_with(')')
        {
            let args_content = &expr[paren_pos + 1..expr.len() - 1];
            return Expr::Call(name.to_string(), parse_function_args(args_content));
        }
    }

    compile_access(expr)
}

/// Find an operator position outside of strings and brackets.
fn find_top_level(expr: &str, op: &str) -> Option<usize> {
    let bytes = expr.as_bytes();
    let op_bytes = op.as_bytes();
    let mut depth = 0i32;
    let mut in_string: Option<u8> = None;

    for i in 0..bytes.len() {
        let c = bytes[i];
        if let Some(quote) = in_string {
            if c == quote && (i == 0 || bytes[i - 1] != b'\\') {
                in_string = None;
            }
            continue;
        }
        match c {
            b'"' | b'\'' => in_string = Some(c),
            b'[' | b'(' => depth += 1,
            b']' | b')' => depth -= 1,
            _ => {
                if depth == 0 && bytes[i..].starts_with(op_bytes) {
                    return Some(i);
                }
            }
        }
    }
    None
}

/// Compile variable access like `user`, `user["name"]`, `user.name` or `items[0].title`.
fn compile_access(expr: &str) -> Expr {
    let bytes = expr.as_bytes();
    let head_end = bytes
        .iter()
        .position(|&c| c == b'.' || c == b'[')
        .unwrap_or(bytes.len());
    let mut current = Expr::Var(expr[..head_end].to_string());
    let mut i = head_end;

    while i < bytes.len() {
        match bytes[i] {
            b'.' => {
                let start = i + 1;
                let end = bytes[start..]
                    .iter()
                    .position(|&c| c == b'.' || c == b'[')
                    .map_or(bytes.len(), |p| start + p);
                current = Expr::Field(Box::new(current), expr[start..end].to_string());
                i = end;
            }
            b'[' => match find_closing_bracket(&expr[i..]) {
                Some(close) => {
                    let key = compile_expr(&expr[i + 1..i + close]);
                    current = Expr::Index(Box::new(current), Box::new(key));
                    i += close + 1;
                }
                None => return Expr::Var(expr.to_string()),
            },
            _ => return Expr::Var(expr.to_string()),
        }
    }

    current
}

/// Find the matching `]` for a string starting with `[`.
fn find_closing_bracket(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string: Option<char> = None;

    for (i, c) in s.char_indices() {
        if let Some(quote) = in_string {
            if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => in_string = Some(c),
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse function arguments separated by commas
fn parse_function_args(args_str: &str) -> Vec<Expr> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0;
    let mut in_string: Option<char> = None;

    for c in args_str.chars() {
        if let Some(quote) = in_string {
            if c == quote && !current.ends_with('\\') {
                in_string = None;
            }
            current.push(c);
            continue;
        }
        match c {
            '"' | '\'' => {
                in_string = Some(c);
                current.push(c);
            }
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                if !current.trim().is_empty() {
                    args.push(compile_expr(current.trim()));
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if !current.trim().is_empty() {
        args.push(compile_expr(current.trim()));
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tokenize_simple() {
        let tokens = tokenize("Hello <%= name %>!").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Literal("Hello ".to_string()),
                Token::OutputEscaped("name".to_string()),
                Token::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_unclosed_tag() {
        assert!(tokenize("<%= name").is_err());
    }

    #[test]
    fn test_compile_access_chain() {
        assert_eq!(
            compile_expr("page.headers[0]"),
            Expr::Index(
                Box::new(Expr::Field(
                    Box::new(Expr::Var("page".to_string())),
                    "headers".to_string()
                )),
                Box::new(Expr::IntLit(0))
            )
        );
    }

    #[test]
    fn test_compile_comparison_and_logic() {
        let expr = compile_expr("user != null && count > 1");
        assert!(matches!(expr, Expr::And(_, _)));
        assert_eq!(
            compile_expr("!error"),
            Expr::Not(Box::new(Expr::Var("error".to_string())))
        );
    }

    #[test]
    fn test_compile_call() {
        assert_eq!(
            compile_expr("plural(items)"),
            Expr::Call("plural".to_string(), vec![Expr::Var("items".to_string())])
        );
    }

    #[test]
    fn test_parse_if_elsif_else() {
        let nodes =
            parse_template("<% if a %>A<% elsif b %>B<% else %>C<% end %>").unwrap();
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            TemplateNode::If { else_body, .. } => {
                let else_body = else_body.as_ref().unwrap();
                assert!(matches!(
                    &else_body[0],
                    TemplateNode::If { else_body: Some(_), .. }
                ));
            }
            other => panic!("expected if, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_for() {
        let nodes = parse_template("<% for item in items %><%= item %><% end %>").unwrap();
        assert!(matches!(&nodes[0], TemplateNode::For { var, .. } if var == "item"));
    }

    #[test]
    fn test_unbalanced_blocks() {
        assert!(parse_template("<% if a %>A").is_err());
        assert!(parse_template("A<% end %>").is_err());
        assert!(parse_template("<% for x %><% end %>").is_err());
    }
}
