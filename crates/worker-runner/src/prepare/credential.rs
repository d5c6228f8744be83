//! Credential constant rewriting

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// `<indent><NAME>[: annotation] = <value>`
static ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)([A-Za-z_][A-Za-z0-9_]*)\s*(?::\s*[A-Za-z_][\w.\[\], ]*)?=\s*(\S.*)$")
        .expect("valid regex")
});

/// A plain string literal, optionally followed by a comment
static STRING_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^[rRuU]?(?:"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')\s*(?:#.*)?$"#)
        .expect("valid regex")
});

/// `os.getenv(`, `getenv(`, `os.environ.get(`, `os.environ[`
static ENV_LOOKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:(?:os\.)?getenv\s*\(|(?:os\.)?environ\s*(?:\.get\s*\(|\[))")
        .expect("valid regex")
});

/// What credential injection did to the entry file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CredentialInjection {
    /// Existing assignments were rewritten
    Replaced { lines: usize },
    /// A new assignment was added after the client library import
    Inserted { after_line: usize },
    /// Neither an assignment nor a client import exists; file left as is
    NotFound,
}

impl fmt::Display for CredentialInjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replaced { lines } => write!(f, "replaced {lines} credential assignment(s)"),
            Self::Inserted { after_line } => {
                write!(f, "inserted credential after line {after_line}")
            }
            Self::NotFound => f.write_str("no credential constant or client import found"),
        }
    }
}

/// Quote `value` as a double-quoted Python string literal
pub fn python_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\x{:02x}", c as u32 & 0xff)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn is_credential_value(value: &str) -> bool {
    STRING_LITERAL.is_match(value) || ENV_LOOKUP.is_match(value)
}

fn imports_client(line: &str, modules: &[String]) -> bool {
    let trimmed = line.trim_start();
    let rest = match trimmed
        .strip_prefix("import ")
        .or_else(|| trimmed.strip_prefix("from "))
    {
        Some(rest) => rest.trim_start(),
        None => return false,
    };
    modules.iter().any(|module| {
        rest.strip_prefix(module.as_str())
            .is_some_and(|after| after.is_empty() || after.starts_with([' ', '.', ',', '\t', '\r']))
    })
}

/// Point every credential constant in `lines` at `credential`.
///
/// `names` lists the accepted constant names; the first is used when a
/// new assignment has to be inserted after an import of one of
/// `client_modules`.
pub fn inject_credential(
    lines: &mut Vec<String>,
    credential: &str,
    names: &[String],
    client_modules: &[String],
) -> CredentialInjection {
    let literal = python_string_literal(credential);

    let mut replaced = 0;
    for line in lines.iter_mut() {
        let Some(caps) = ASSIGNMENT.captures(line) else {
            continue;
        };
        let name = &caps[2];
        if !names.iter().any(|n| n == name) || !is_credential_value(&caps[3]) {
            continue;
        }
        let rewritten = format!("{}{} = {}", &caps[1], name, literal);
        *line = rewritten;
        replaced += 1;
    }
    if replaced > 0 {
        return CredentialInjection::Replaced { lines: replaced };
    }

    let Some(name) = names.first() else {
        return CredentialInjection::NotFound;
    };
    match lines.iter().position(|line| imports_client(line, client_modules)) {
        Some(idx) => {
            let indent: String = lines[idx]
                .chars()
                .take_while(|c| c.is_whitespace())
                .collect();
            lines.insert(idx + 1, format!("{indent}{name} = {literal}"));
            CredentialInjection::Inserted { after_line: idx + 1 }
        }
        None => CredentialInjection::NotFound,
    }
}
