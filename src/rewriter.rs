//! # Expression Rewriter
//!
//! Transforms a DSL arithmetic/boolean expression into the form expected by
//! generated code: bare identifiers become `inputs["name"]` or
//! `outputs["name"]` lookups, `^` becomes a `pow(..)` call, and whitelisted
//! math function names are normalized to their canonical runtime spelling.
//!
//! The rewriter is total on lexically-recognizable input — anything it
//! cannot tokenize is a [`PulsarError::Expression`], but semantic validity of
//! the rewritten expression is the downstream toolchain's problem, not this
//! crate's.

use std::collections::HashSet;

use crate::error::{PulsarError, PulsarResult};

/// Functions preserved by the rewriter, normalized to lower-case canonical
/// spelling regardless of the case used in the DSL source. Case-insensitive
/// matching is an intended policy, not an accident of the lexer.
const WHITELISTED_FUNCTIONS: &[&str] =
    &["abs", "pow", "sqrt", "sin", "cos", "tan", "log", "exp", "floor", "ceil", "round"];

fn is_whitelisted_function(name: &str) -> bool {
    WHITELISTED_FUNCTIONS.contains(&name.to_lowercase().as_str())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Op(String),
    LParen,
    RParen,
    Comma,
}

/// Lex `expr` into tokens. Whitespace is significant only as a separator; it
/// is never preserved between tokens in the emitted output — the rewriter
/// re-joins tokens with single spaces, see [`rewrite`].
fn lex(expr: &str) -> PulsarResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == ',' {
            tokens.push(Token::Comma);
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Number(chars[start..i].iter().collect()));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/^<>=!".contains(c) {
            let start = i;
            i += 1;
            // two-character operators: <= >= == !=
            if i < chars.len() && chars[i] == '=' && matches!(c, '<' | '>' | '=' | '!') {
                i += 1;
            }
            tokens.push(Token::Op(chars[start..i].iter().collect()));
        } else {
            return Err(PulsarError::Expression {
                expr: expr.to_string(),
                message: format!("unrecognized character '{c}'"),
                location: None,
            });
        }
    }
    Ok(tokens)
}

/// Every bare identifier in `expr` that is not itself a whitelisted function
/// name (best-effort lexical scan used by the dependency analyzer).
pub fn lex_identifiers(expr: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = None;
    let bytes = expr.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        let is_ident_char = b.is_ascii_alphanumeric() || b == b'_';
        match (is_ident_char, start) {
            (true, None) if (b as char).is_alphabetic() || b == b'_' => start = Some(i),
            (false, Some(s)) => {
                let ident = &expr[s..i];
                if !is_whitelisted_function(ident) {
                    out.push(ident);
                }
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        let ident = &expr[s..];
        if !is_whitelisted_function(ident) {
            out.push(ident);
        }
    }
    out
}

/// Rewrites `expr` into generated-code form. `producer_index` is the set of
/// sensor names produced by some rule's `SetValue` action in the current
/// compilation unit; this is threaded in explicitly by the caller rather
/// than kept as process-global state.
pub fn rewrite(expr: &str, producer_index: &HashSet<String>) -> PulsarResult<String> {
    let tokens = lex(expr)?;
    let body = rewrite_tokens(&tokens, producer_index);
    Ok(if needs_wrapping(&tokens) { format!("({body})") } else { body })
}

/// A single pair of wrapping parentheses is added iff the expression
/// contains more than one token run, a function call, or mixed
/// arithmetic/comparison operators. A bare
/// already-parenthesized expression is left alone — the rewriter never adds
/// parens around a single existing `( ... )` group, and never strips
/// user-supplied parens either.
fn needs_wrapping(tokens: &[Token]) -> bool {
    if tokens.is_empty() {
        return false;
    }
    if matches!(tokens.first(), Some(Token::LParen)) && matches!(tokens.last(), Some(Token::RParen))
    {
        // A single already-parenthesized run still counts as "one token" for
        // this rule only when the parens span the whole expression and are
        // balanced at depth 1 throughout.
        if is_fully_parenthesized(tokens) {
            return false;
        }
    }

    let has_function_call = tokens.windows(2).any(|w| matches!((&w[0], &w[1]), (Token::Ident(n), Token::LParen) if is_whitelisted_function(n)));
    let has_arith = tokens.iter().any(|t| matches!(t, Token::Op(o) if matches!(o.as_str(), "+"|"-"|"*"|"/"|"^")));
    let has_cmp = tokens.iter().any(|t| matches!(t, Token::Op(o) if matches!(o.as_str(), "<"|">"|"<="|">="|"=="|"!=")));

    has_function_call || (has_arith && has_cmp) || tokens.len() > 1
}

fn is_fully_parenthesized(tokens: &[Token]) -> bool {
    let mut depth = 0i32;
    for (i, t) in tokens.iter().enumerate() {
        match t {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 && i != tokens.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

fn rewrite_tokens(tokens: &[Token], producer_index: &HashSet<String>) -> String {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        match &tokens[i] {
            Token::Op(op) if op == "^" => {
                // `A ^ B` -> `pow(A, B)` where A is whatever was already
                // emitted for the immediately preceding atom and B is the
                // immediately following atom (identifier, number, or a
                // parenthesized subexpression).
                let a = out.pop().unwrap_or_default();
                i += 1;
                let (b, consumed) = rewrite_atom(&tokens[i..], producer_index);
                i += consumed;
                out.push(format!("pow({a}, {b})"));
                continue;
            }
            Token::Ident(name) if is_whitelisted_function(name) => {
                // Attach a following `(` directly to the function name so
                // `sqrt(x)` doesn't come out as `sqrt (x)`.
                if matches!(tokens.get(i + 1), Some(Token::LParen)) {
                    out.push(format!("{}(", canonical_function_name(name)));
                    i += 1;
                } else {
                    out.push(canonical_function_name(name));
                }
            }
            Token::Ident(name) => {
                out.push(sensor_lookup(name, producer_index));
            }
            Token::Number(n) => out.push(n.clone()),
            Token::Op(op) => out.push(op.clone()),
            Token::LParen => out.push("(".to_string()),
            Token::RParen => out.push(")".to_string()),
            Token::Comma => out.push(",".to_string()),
        }
        i += 1;
    }
    join_tokens(&out)
}

/// Render the single atom starting at `tokens[0]`: an identifier, a number,
/// or a fully parenthesized subexpression. Returns the rendered text and how
/// many input tokens it consumed.
fn rewrite_atom(tokens: &[Token], producer_index: &HashSet<String>) -> (String, usize) {
    match tokens.first() {
        Some(Token::LParen) => {
            let mut depth = 0i32;
            let mut end = 0;
            for (i, t) in tokens.iter().enumerate() {
                match t {
                    Token::LParen => depth += 1,
                    Token::RParen => {
                        depth -= 1;
                        if depth == 0 {
                            end = i;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let inner = rewrite_tokens(&tokens[1..end], producer_index);
            (format!("({inner})"), end + 1)
        }
        Some(Token::Ident(name)) if is_whitelisted_function(name) => {
            // function call atom: name(args...)
            let mut depth = 0i32;
            let mut end = 1;
            for (i, t) in tokens.iter().enumerate().skip(1) {
                match t {
                    Token::LParen => depth += 1,
                    Token::RParen => {
                        depth -= 1;
                        if depth == 0 {
                            end = i;
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let rendered = rewrite_tokens(&tokens[..=end], producer_index);
            (rendered, end + 1)
        }
        Some(Token::Ident(name)) => (sensor_lookup(name, producer_index), 1),
        Some(Token::Number(n)) => (n.clone(), 1),
        _ => (String::new(), 1),
    }
}

fn canonical_function_name(name: &str) -> String {
    name.to_lowercase()
}

fn sensor_lookup(name: &str, producer_index: &HashSet<String>) -> String {
    if producer_index.contains(name) {
        format!("outputs[\"{name}\"]")
    } else {
        format!("inputs[\"{name}\"]")
    }
}

fn join_tokens(parts: &[String]) -> String {
    let mut out = String::new();
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            let prev_ends_open = parts[i - 1].ends_with('(');
            let cur_is_close_or_comma = matches!(p.as_str(), ")" | ",");
            if !prev_ends_open && !cur_is_close_or_comma {
                out.push(' ');
            }
        }
        out.push_str(p);
    }
    out
}
