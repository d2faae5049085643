//! Line-oriented automation scripts.
//!
//! ```text
//! # comment
//! set ActiveSheet.Range("A1").Value = 42
//! get ActiveSheet.Range("A1").Value
//! call Workbooks.Add
//! call ActiveWorkbook.SaveAs("out.xlsx")
//! resolve ActiveSheet
//! clear
//! ```
//!
//! A `set` value or a `call` argument that is not a literal (`42`, `1.5`,
//! `"text"`, `True`) is taken as a bare string.

use std::fmt;

use anyhow::{bail, Result};
use duke_automation::path::parse_literal;
use duke_automation::DynamicValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Get { path: String },
    Set { path: String, value: DynamicValue },
    Call { path: String, args: Vec<DynamicValue> },
    Resolve { path: String },
    /// The server's context changed; drop volatile cache entries.
    Clear,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Get { path } => write!(f, "get {path}"),
            Step::Set { path, value } => write!(f, "set {path} = {value}"),
            Step::Call { path, args } if args.is_empty() => write!(f, "call {path}"),
            Step::Call { path, args } => {
                let args: Vec<String> = args.iter().map(ToString::to_string).collect();
                write!(f, "call {path} {}", args.join(" "))
            }
            Step::Resolve { path } => write!(f, "resolve {path}"),
            Step::Clear => f.write_str("clear"),
        }
    }
}

/// A literal if it parses as one, the trimmed text otherwise.
pub fn parse_value(text: &str) -> DynamicValue {
    let text = text.trim();
    parse_literal(text).unwrap_or_else(|_| DynamicValue::from_string(text))
}

/// Byte offset of the first `=` outside a string literal.
fn assignment(line: &str) -> Option<usize> {
    let mut quoted = false;
    for (i, ch) in line.char_indices() {
        match ch {
            '"' => quoted = !quoted,
            '=' if !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_line(line: &str) -> Result<Option<Step>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let need_path = |verb: &str| -> Result<String> {
        if rest.is_empty() {
            bail!("'{verb}' needs a member path");
        }
        Ok(rest.to_string())
    };

    let step = match verb.to_ascii_lowercase().as_str() {
        "get" => Step::Get {
            path: need_path(verb)?,
        },
        "resolve" => Step::Resolve {
            path: need_path(verb)?,
        },
        "call" => Step::Call {
            path: need_path(verb)?,
            args: Vec::new(),
        },
        "set" => {
            let Some(eq) = assignment(rest) else {
                bail!("expected 'set <path> = <value>'");
            };
            let path = rest[..eq].trim();
            if path.is_empty() {
                bail!("'set' needs a member path");
            }
            Step::Set {
                path: path.to_string(),
                value: parse_value(&rest[eq + 1..]),
            }
        }
        "clear" if rest.is_empty() => Step::Clear,
        other => bail!("unknown command '{other}'"),
    };
    Ok(Some(step))
}

/// Parse a whole script. Errors carry the 1-based line number.
pub fn parse(text: &str) -> Result<Vec<Step>> {
    let mut steps = Vec::new();
    for (number, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(step)) => steps.push(step),
            Ok(None) => {}
            Err(e) => bail!("line {}: {e}", number + 1),
        }
    }
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_script() {
        let script = r#"
            # setup
            set ActiveSheet.Range("A1").Formula = "=B1*2"
            SET Visible = True
            get ActiveSheet.Range("A1").Value
            call ActiveWorkbook.SaveAs("out.xlsx")
            resolve ActiveSheet
            clear
        "#;
        let steps = parse(script).unwrap();
        assert_eq!(
            steps,
            vec![
                Step::Set {
                    path: r#"ActiveSheet.Range("A1").Formula"#.into(),
                    value: DynamicValue::from_string("=B1*2"),
                },
                Step::Set {
                    path: "Visible".into(),
                    value: DynamicValue::Bool(true),
                },
                Step::Get {
                    path: r#"ActiveSheet.Range("A1").Value"#.into(),
                },
                Step::Call {
                    path: r#"ActiveWorkbook.SaveAs("out.xlsx")"#.into(),
                    args: vec![],
                },
                Step::Resolve {
                    path: "ActiveSheet".into(),
                },
                Step::Clear,
            ]
        );
    }

    #[test]
    fn test_values() {
        assert_eq!(parse_value(" 42 "), DynamicValue::Int(42));
        assert_eq!(parse_value("2.5"), DynamicValue::Double(2.5));
        assert_eq!(parse_value("false"), DynamicValue::Bool(false));
        assert_eq!(parse_value("Sheet 2"), DynamicValue::from_string("Sheet 2"));
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = parse("get Name\nfrobnicate X").unwrap_err();
        assert_eq!(err.to_string(), "line 2: unknown command 'frobnicate'");
        let err = parse("set Visible").unwrap_err();
        assert_eq!(
            err.to_string(),
            "line 1: expected 'set <path> = <value>'"
        );
        assert!(parse("get").is_err());
    }
}
