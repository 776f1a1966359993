//! Raw SQL fragments with positional parameters

use sea_query::{Value, Values};

/// SQL text using `$n` placeholders plus the values they refer to
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub values: Values,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            values: Values(Vec::new()),
        }
    }

    /// Append a value; the caller writes the matching `$n` into `sql`
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.values.0.push(value.into());
        self
    }

    /// Concatenate fragments with a space, renumbering each fragment's
    /// placeholders to follow the values of the fragments before it
    ///
    /// ```
    /// use berth::query::SqlStatement;
    ///
    /// let merged = SqlStatement::merge([
    ///     SqlStatement::new("select * from ship where name = $1").bind("Aurora"),
    ///     SqlStatement::new("and port_id = $1").bind(4i64),
    /// ]);
    /// assert_eq!(merged.sql, "select * from ship where name = $1 and port_id = $2");
    /// assert_eq!(merged.values.0.len(), 2);
    /// ```
    pub fn merge<I>(parts: I) -> Self
    where
        I: IntoIterator<Item = SqlStatement>,
    {
        let mut merged = SqlStatement::new(String::new());
        for part in parts {
            let offset = merged.values.0.len();
            if !merged.sql.is_empty() && !part.sql.is_empty() {
                merged.sql.push(' ');
            }
            merged.sql.push_str(&renumber(&part.sql, offset));
            merged.values.0.extend(part.values.0);
        }
        merged
    }

    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }
}

impl From<(String, Values)> for SqlStatement {
    fn from((sql, values): (String, Values)) -> Self {
        Self { sql, values }
    }
}

/// Shift every `$n` outside quoted text by `offset`
fn renumber(sql: &str, offset: usize) -> String {
    if offset == 0 {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + 8);
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                out.push(c);
            }
            (Some(_), c) => out.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                out.push(c);
            }
            (None, '$') if chars.peek().is_some_and(char::is_ascii_digit) => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                match digits.parse::<usize>() {
                    Ok(n) => out.push_str(&format!("${}", n + offset)),
                    Err(_) => {
                        out.push('$');
                        out.push_str(&digits);
                    }
                }
            }
            (None, c) => out.push(c),
        }
    }
    out
}
