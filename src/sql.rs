use crate::core::db::Value;
use crate::core::{CrdError, Result};
use std::collections::BTreeMap;

/// Named statement parameters.
///
/// Keys are stored without the leading colon, so `":username"` and
/// `"username"` address the same placeholder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: BTreeMap<String, Value>,
}

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    /// Adds a binding, replacing any earlier value for the same name.
    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<Value>) {
        self.values.insert(normalize(name).to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(normalize(name))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name.as_ref(), value);
        }
        params
    }
}

fn normalize(name: &str) -> &str {
    name.strip_prefix(':').unwrap_or(name)
}

/// A statement rewritten to positional `?` placeholders with its values in
/// binding order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub values: Vec<Value>,
}

/// Rewrites `:name` placeholders to `?` and orders `params` to match.
///
/// Placeholders inside string literals, quoted identifiers and comments are
/// left alone, as are `::` casts. Comments follow MySQL rules: `#` and
/// `-- ` run to the end of the line, `/* */` may span lines. A name may appear more than once.
///
/// # Errors
///
/// Returns `CrdError::Parameter` when a placeholder has no value, when a
/// value has no placeholder, or when positional `?` markers are used.
pub fn bind_named(sql: &str, params: &Params) -> Result<BoundStatement> {
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut used = Vec::new();
    let mut chars = sql.char_indices().peekable();
    let mut prev: Option<char> = None;

    while let Some((idx, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(c);
                copy_quoted(c, &mut chars, &mut out);
            }
            // MySQL needs whitespace after `--`; `5--:x` is arithmetic
            '-' if sql[idx + 1..].starts_with('-')
                && sql[idx + 2..].chars().next().map_or(true, char::is_whitespace) =>
            {
                out.push(c);
                copy_line(&mut chars, &mut out);
            }
            '#' => {
                out.push(c);
                copy_line(&mut chars, &mut out);
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                out.push(c);
                let mut last = '\0';
                for (_, next) in chars.by_ref() {
                    out.push(next);
                    if last == '*' && next == '/' {
                        break;
                    }
                    last = next;
                }
            }
            '?' => {
                return Err(CrdError::Parameter(
                    "Positional '?' placeholders are not supported, use :name".to_string(),
                ));
            }
            ':' if prev != Some(':')
                && matches!(chars.peek(), Some((_, n)) if n.is_ascii_alphabetic() || *n == '_') =>
            {
                let start = idx + 1;
                let mut end = start;
                while let Some(&(i, n)) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        end = i + n.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let name = &sql[start..end];
                let value = params.get(name).ok_or_else(|| {
                    CrdError::Parameter(format!("No value bound for placeholder :{}", name))
                })?;
                values.push(value.clone());
                used.push(name);
                out.push('?');
                prev = None;
                continue;
            }
            _ => out.push(c),
        }
        prev = Some(c);
    }

    if let Some(unused) = params.names().find(|name| !used.contains(name)) {
        return Err(CrdError::Parameter(format!(
            "Parameter :{} does not appear in the statement",
            unused
        )));
    }

    Ok(BoundStatement { sql: out, values })
}

fn copy_line(chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>, out: &mut String) {
    for (_, next) in chars.by_ref() {
        out.push(next);
        if next == '\n' {
            break;
        }
    }
}

fn copy_quoted(
    quote: char,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    out: &mut String,
) {
    while let Some((_, c)) = chars.next() {
        out.push(c);
        if c == '\\' && quote != '`' {
            if let Some((_, escaped)) = chars.next() {
                out.push(escaped);
            }
            continue;
        }
        if c == quote {
            // doubled quote is an escaped quote
            if matches!(chars.peek(), Some((_, n)) if *n == quote) {
                if let Some((_, n)) = chars.next() {
                    out.push(n);
                }
                continue;
            }
            return;
        }
    }
}

/// True when the first token of `sql` is `SELECT`, ignoring case and leading
/// whitespace. This decides whether a statement yields rows.
pub fn is_select(sql: &str) -> bool {
    sql.trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .is_some_and(|token| token.eq_ignore_ascii_case("SELECT"))
}

/// Validates a table or column name for interpolation into SQL text.
///
/// Accepts `name` or `schema.name` built from ASCII letters, digits and
/// underscores, not starting with a digit.
pub fn validate_identifier(ident: &str) -> Result<()> {
    let parts: Vec<&str> = ident.split('.').collect();
    let valid_part = |part: &&str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };
    if parts.len() > 2 || !parts.iter().all(valid_part) {
        return Err(CrdError::Parameter(format!("Invalid identifier '{}'", ident)));
    }
    Ok(())
}

/// Quotes a validated identifier with `quote` on every dotted part.
pub fn quote_identifier(ident: &str, quote: char) -> Result<String> {
    validate_identifier(ident)?;
    Ok(ident
        .split('.')
        .map(|part| format!("{quote}{part}{quote}"))
        .collect::<Vec<_>>()
        .join("."))
}
