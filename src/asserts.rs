//! Response assertion DSL.
//!
//! One assertion per non-blank, non-`#` line:
//!
//! ```text
//! status == 200
//! duration_ms < 500
//! header "Content-Type" contains "json"
//! header "X-Debug" not_exists
//! body starts_with "{"
//! gjson "user.id" == 42
//! gjson "items.0.name" matches /^sku-[0-9]+$/
//! ```
//!
//! A block is compiled once with [`AssertSet::parse`] (regexes included) and
//! evaluated per response with [`AssertSet::eval`]; evaluation
//! short-circuits at the first failing line and reports its 1-based line
//! number, text, and cause.

use std::time::Duration;

use regex::Regex;
use reqwest::header::HeaderMap;
use serde_json::Value;
use thiserror::Error;

/// Hard cap on buffered response bodies when assertions are enabled.
pub const MAX_BODY_SIZE: usize = 1 << 20;

/// The view of one response that assertions are evaluated against.
#[derive(Debug, Clone, Default)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub duration: Duration,
}

/// Assertion block that failed to compile. Surfaced before the run starts.
#[derive(Error, Debug)]
#[error("line {line}: {reason}")]
pub struct AssertParseError {
    pub line: usize,
    pub reason: String,
}

/// One failed assertion, reported with its source line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("assertion failed at line {line}: {text}: {reason}")]
pub struct AssertFailure {
    pub line: usize,
    pub text: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Matches,
}

impl Op {
    fn as_str(&self) -> &'static str {
        match self {
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Contains => "contains",
            Op::NotContains => "not_contains",
            Op::StartsWith => "starts_with",
            Op::EndsWith => "ends_with",
            Op::Matches => "matches",
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Op::Eq | Op::Ne | Op::Gt | Op::Ge | Op::Lt | Op::Le)
    }
}

// Longest-match-first so ">=" is not read as ">".
const OPERATORS: [(&str, Op); 11] = [
    ("==", Op::Eq),
    ("!=", Op::Ne),
    (">=", Op::Ge),
    ("<=", Op::Le),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("not_contains", Op::NotContains),
    ("contains", Op::Contains),
    ("starts_with", Op::StartsWith),
    ("ends_with", Op::EndsWith),
    ("matches", Op::Matches),
];

#[derive(Debug)]
enum Rhs {
    Number(f64),
    Str(String),
    Bool(bool),
    Regex(Regex),
}

#[derive(Debug)]
enum Target {
    Status,
    Body,
    DurationMs,
    Header(String),
    Json(String),
}

#[derive(Debug)]
enum Check {
    Compare { op: Op, rhs: Rhs },
    Exists,
    NotExists,
}

#[derive(Debug)]
struct Assertion {
    line: usize,
    text: String,
    target: Target,
    check: Check,
}

/// A compiled assertion block.
#[derive(Debug, Default)]
pub struct AssertSet {
    assertions: Vec<Assertion>,
}

impl AssertSet {
    /// Compiles a multi-line assertion block. Blank lines and `#` comments
    /// are skipped; any other malformed line is an error.
    pub fn parse(text: &str) -> Result<Self, AssertParseError> {
        let mut assertions = Vec::new();

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let assertion = parse_line(line_no, line).map_err(|reason| AssertParseError {
                line: line_no,
                reason,
            })?;
            assertions.push(assertion);
        }

        Ok(Self { assertions })
    }

    pub fn is_empty(&self) -> bool {
        self.assertions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assertions.len()
    }

    /// Evaluates every assertion against the snapshot, stopping at the
    /// first failure.
    pub fn eval(&self, resp: &ResponseSnapshot) -> Result<(), AssertFailure> {
        for assertion in &self.assertions {
            if let Err(reason) = eval_single(assertion, resp) {
                return Err(AssertFailure {
                    line: assertion.line,
                    text: assertion.text.clone(),
                    reason,
                });
            }
        }
        Ok(())
    }
}

fn parse_line(line_no: usize, line: &str) -> Result<Assertion, String> {
    let (target, rest) = parse_target(line)?;

    let word = rest.trim();
    let lower = word.to_lowercase();
    if lower == "exists" || lower == "not_exists" {
        if !matches!(target, Target::Header(_) | Target::Json(_)) {
            return Err(format!(
                "'{}' is only supported for header and gjson targets",
                lower
            ));
        }
        let check = if lower == "exists" {
            Check::Exists
        } else {
            Check::NotExists
        };
        return Ok(Assertion {
            line: line_no,
            text: line.to_string(),
            target,
            check,
        });
    }

    let (op, rhs_token) = split_operator(rest)?;
    let rhs = parse_rhs(rhs_token)?;

    // Reject combinations that could never pass at parse time instead of
    // failing every response at runtime.
    match (&rhs, op) {
        (Rhs::Regex(_), Op::Matches) => {}
        (Rhs::Regex(_), _) => {
            return Err(format!("operator '{}' not supported with regex", op.as_str()))
        }
        (_, Op::Matches) => return Err("'matches' requires a /regex/ right-hand side".to_string()),
        _ => {}
    }

    match &target {
        Target::Status | Target::DurationMs => {
            if !matches!(rhs, Rhs::Number(_)) {
                return Err(format!("invalid numeric value '{}'", rhs_token));
            }
            if !op.is_numeric() {
                return Err(format!(
                    "operator '{}' not supported for numeric comparison",
                    op.as_str()
                ));
            }
        }
        // Body, header, and gjson comparisons resolve their comparison kind
        // from the right-hand side at evaluation time.
        Target::Body | Target::Header(_) | Target::Json(_) => {}
    }

    Ok(Assertion {
        line: line_no,
        text: line.to_string(),
        target,
        check: Check::Compare { op, rhs },
    })
}

fn parse_target(line: &str) -> Result<(Target, &str), String> {
    if let Some(rest) = line.strip_prefix("status") {
        if rest.starts_with(char::is_whitespace) {
            return Ok((Target::Status, rest));
        }
    }
    if let Some(rest) = line.strip_prefix("duration_ms") {
        if rest.starts_with(char::is_whitespace) {
            return Ok((Target::DurationMs, rest));
        }
    }
    if let Some(rest) = line.strip_prefix("body") {
        if rest.starts_with(char::is_whitespace) {
            return Ok((Target::Body, rest));
        }
    }
    if let Some(rest) = line.strip_prefix("header") {
        if rest.starts_with(char::is_whitespace) {
            let (name, rest) = parse_quoted(rest.trim_start())
                .map_err(|e| format!("invalid header target: {}", e))?;
            return Ok((Target::Header(name), rest));
        }
    }
    if let Some(rest) = line.strip_prefix("gjson") {
        if rest.starts_with(char::is_whitespace) {
            let (path, rest) = parse_quoted(rest.trim_start())
                .map_err(|e| format!("invalid gjson target: {}", e))?;
            return Ok((Target::Json(path), rest));
        }
    }
    Err(format!("unsupported assert target in line: {}", line))
}

fn split_operator(expr: &str) -> Result<(Op, &str), String> {
    let expr = expr.trim();
    for (token, op) in OPERATORS {
        if let Some(rest) = expr.strip_prefix(token) {
            if rest.starts_with(char::is_whitespace) {
                return Ok((op, rest.trim()));
            }
        }
    }
    Err(format!("unsupported or missing operator in '{}'", expr))
}

fn parse_rhs(token: &str) -> Result<Rhs, String> {
    let token = token.trim();
    if token.is_empty() {
        return Err("missing right-hand side".to_string());
    }

    if token.len() >= 2 && token.starts_with('/') && token.ends_with('/') {
        let pattern = &token[1..token.len() - 1];
        let re = Regex::new(pattern).map_err(|_| format!("invalid regex '{}'", pattern))?;
        return Ok(Rhs::Regex(re));
    }

    if token == "true" {
        return Ok(Rhs::Bool(true));
    }
    if token == "false" {
        return Ok(Rhs::Bool(false));
    }

    if token.starts_with('"') {
        let (value, rest) = parse_quoted(token)?;
        if !rest.is_empty() {
            return Err(format!("unexpected trailing input '{}'", rest));
        }
        return Ok(Rhs::Str(value));
    }

    if let Ok(n) = token.parse::<f64>() {
        return Ok(Rhs::Number(n));
    }

    Ok(Rhs::Str(token.to_string()))
}

/// Parses a leading `"…"` with minimal JSON-style unquoting, returning the
/// value and the remaining (trimmed) input.
fn parse_quoted(s: &str) -> Result<(String, &str), String> {
    let s = s.trim_start();
    let Some(inner) = s.strip_prefix('"') else {
        return Err(format!("expected quoted string, got '{}'", s));
    };

    let mut value = String::new();
    let mut chars = inner.char_indices();
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => return Ok((value, inner[idx + 1..].trim_start())),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, 'r')) => value.push('\r'),
                Some((_, '"')) => value.push('"'),
                Some((_, '\\')) => value.push('\\'),
                Some((_, '/')) => value.push('/'),
                Some((_, other)) => return Err(format!("invalid escape '\\{}'", other)),
                None => return Err(format!("unterminated quoted string in '{}'", s)),
            },
            _ => value.push(ch),
        }
    }
    Err(format!("unterminated quoted string in '{}'", s))
}

fn eval_single(assertion: &Assertion, resp: &ResponseSnapshot) -> Result<(), String> {
    match (&assertion.target, &assertion.check) {
        (Target::Status, Check::Compare { op, rhs }) => {
            let Rhs::Number(expected) = rhs else {
                unreachable!("validated at parse time");
            };
            compare_numbers(f64::from(resp.status), *op, *expected)
        }

        (Target::DurationMs, Check::Compare { op, rhs }) => {
            let Rhs::Number(expected) = rhs else {
                unreachable!("validated at parse time");
            };
            compare_numbers(resp.duration.as_millis() as f64, *op, *expected)
        }

        (Target::Body, Check::Compare { op, rhs }) => {
            let body = String::from_utf8_lossy(&resp.body);
            compare_text(&body, *op, rhs)
        }

        (Target::Header(name), check) => {
            let value = resp
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty());

            match check {
                Check::Exists => match value {
                    Some(_) => Ok(()),
                    None => Err(format!("header '{}' does not exist", name)),
                },
                Check::NotExists => match value {
                    Some(_) => Err(format!("header '{}' exists", name)),
                    None => Ok(()),
                },
                Check::Compare { op, rhs } => compare_text(value.unwrap_or(""), *op, rhs),
            }
        }

        (Target::Json(path), check) => {
            let json: Value = serde_json::from_slice(&resp.body)
                .map_err(|e| format!("invalid JSON body: {}", e))?;
            let value = json_path(&json, path);

            match check {
                Check::Exists => match value {
                    Some(_) => Ok(()),
                    None => Err(format!("gjson path '{}' does not exist", path)),
                },
                Check::NotExists => match value {
                    Some(_) => Err(format!("gjson path '{}' exists", path)),
                    None => Ok(()),
                },
                Check::Compare { op, rhs } => {
                    let Some(value) = value else {
                        return Err(format!("gjson path '{}' does not exist", path));
                    };
                    match rhs {
                        Rhs::Number(expected) => {
                            compare_numbers(json_as_number(value), *op, *expected)
                        }
                        Rhs::Bool(expected) => compare_bools(json_as_bool(value), *op, *expected),
                        Rhs::Regex(re) => match_regex(&json_as_string(value), re),
                        Rhs::Str(expected) => {
                            compare_strings(&json_as_string(value), *op, expected)
                        }
                    }
                }
            }
        }

        // Parse rejects `exists`/`not_exists` for the remaining targets.
        _ => unreachable!("validated at parse time"),
    }
}

fn compare_text(actual: &str, op: Op, rhs: &Rhs) -> Result<(), String> {
    match rhs {
        Rhs::Regex(re) => match_regex(actual, re),
        Rhs::Number(n) => compare_strings(actual, op, &format_number(*n)),
        Rhs::Bool(b) => compare_strings(actual, op, if *b { "true" } else { "false" }),
        Rhs::Str(s) => compare_strings(actual, op, s),
    }
}

fn match_regex(actual: &str, re: &Regex) -> Result<(), String> {
    if re.is_match(actual) {
        Ok(())
    } else {
        Err(format!("regex '{}' does not match '{}'", re.as_str(), actual))
    }
}

fn compare_numbers(actual: f64, op: Op, expected: f64) -> Result<(), String> {
    let ok = match op {
        Op::Eq => actual == expected,
        Op::Ne => actual != expected,
        Op::Gt => actual > expected,
        Op::Ge => actual >= expected,
        Op::Lt => actual < expected,
        Op::Le => actual <= expected,
        _ => {
            return Err(format!(
                "operator '{}' not supported for numeric comparison",
                op.as_str()
            ))
        }
    };

    if ok {
        Ok(())
    } else {
        Err(format!(
            "actual={}, expected {} {}",
            format_number(actual),
            op.as_str(),
            format_number(expected)
        ))
    }
}

fn compare_bools(actual: bool, op: Op, expected: bool) -> Result<(), String> {
    let ok = match op {
        Op::Eq => actual == expected,
        Op::Ne => actual != expected,
        _ => {
            return Err(format!(
                "operator '{}' not supported for bool comparison",
                op.as_str()
            ))
        }
    };

    if ok {
        Ok(())
    } else {
        Err(format!(
            "actual={}, expected {} {}",
            actual,
            op.as_str(),
            expected
        ))
    }
}

fn compare_strings(actual: &str, op: Op, expected: &str) -> Result<(), String> {
    let ok = match op {
        Op::Eq => actual == expected,
        Op::Ne => actual != expected,
        Op::Contains => actual.contains(expected),
        Op::NotContains => !actual.contains(expected),
        Op::StartsWith => actual.starts_with(expected),
        Op::EndsWith => actual.ends_with(expected),
        _ => {
            return Err(format!(
                "operator '{}' not supported for string comparison",
                op.as_str()
            ))
        }
    };

    if ok {
        Ok(())
    } else {
        Err(format!(
            "actual='{}', expected {} '{}'",
            actual,
            op.as_str(),
            expected
        ))
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Resolves a dotted path against a JSON document. Numeric segments index
/// arrays; `a[0].b` is accepted as a spelling of `a.0.b`.
fn json_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let normalized = path.replace('[', ".").replace(']', "");
    let mut current = root;

    for segment in normalized.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

fn json_as_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        Value::Bool(true) => 1.0,
        _ => 0.0,
    }
}

fn json_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => s.eq_ignore_ascii_case("true") || s == "1",
        _ => false,
    }
}

fn json_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
