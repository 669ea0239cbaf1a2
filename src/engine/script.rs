//! Parser for the subset of load script the in-memory engine executes:
//! labelled `LOAD * INLINE [ ... ];` statements.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("script error on line {line}: {message}")]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

/// A loaded field value. Numeric text keeps both representations.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub text: String,
    pub num: Option<f64>,
}

impl Value {
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim().to_string();
        let num = text.parse::<f64>().ok().filter(|value| value.is_finite());
        Self { text, num }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub fields: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|name| name == field)
    }
}

pub fn parse_script(script: &str) -> Result<Vec<Table>, ScriptError> {
    let mut tables = Vec::new();

    for (offset, statement) in split_statements(script) {
        if strip_comments(statement).trim().is_empty() {
            continue;
        }
        let line = line_at(script, offset);
        let default_name = format!("Table{}", tables.len() + 1);
        tables.push(parse_load(statement, line, default_name)?);
    }

    Ok(tables)
}

/// Splits on `;` outside of inline data brackets, yielding each statement
/// with its byte offset in the script.
fn split_statements(script: &str) -> Vec<(usize, &str)> {
    let mut statements = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;

    for (index, ch) in script.char_indices() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                statements.push((start, &script[start..index]));
                start = index + 1;
            }
            _ => {}
        }
    }
    if start < script.len() {
        statements.push((start, &script[start..]));
    }
    statements
}

fn strip_comments(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("//"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn line_at(script: &str, offset: usize) -> usize {
    script[..offset].matches('\n').count() + 1
}

fn parse_load(statement: &str, line: usize, default_name: String) -> Result<Table, ScriptError> {
    let error = |message: String| ScriptError { line, message };

    let open = statement
        .find('[')
        .ok_or_else(|| error("expected inline data block '['".into()))?;
    let close = statement
        .rfind(']')
        .filter(|close| *close > open)
        .ok_or_else(|| error("unterminated inline data block".into()))?;
    if !statement[close + 1..].trim().is_empty() {
        return Err(error(format!(
            "unexpected text after inline data: '{}'",
            statement[close + 1..].trim()
        )));
    }

    let head = strip_comments(&statement[..open]);
    let (name, load) = match head.split_once(':') {
        Some((label, rest)) => {
            let label = label.trim();
            if label.is_empty() || label.contains(char::is_whitespace) {
                return Err(error(format!("invalid table label '{label}'")));
            }
            (label.to_string(), rest)
        }
        None => (default_name, head.as_str()),
    };

    let keywords: Vec<String> = load
        .split_whitespace()
        .map(|word| word.to_ascii_uppercase())
        .collect();
    if keywords != ["LOAD", "*", "INLINE"] {
        return Err(error(format!(
            "unsupported statement '{}', expected LOAD * INLINE",
            load.trim()
        )));
    }

    let body_line = line + statement[..open].matches('\n').count();
    let mut records = statement[open + 1..close]
        .lines()
        .enumerate()
        .map(|(index, text)| (body_line + index, text.trim()))
        .filter(|(_, text)| !text.is_empty());

    let (header_line, header) = records
        .next()
        .ok_or_else(|| error("inline data has no header".into()))?;
    let fields = split_record(header);
    if fields.is_empty() || fields.iter().any(String::is_empty) {
        return Err(ScriptError {
            line: header_line,
            message: "inline header contains an empty field name".into(),
        });
    }

    let mut rows = Vec::new();
    for (row_line, text) in records {
        let cells = split_record(text);
        if cells.len() != fields.len() {
            return Err(ScriptError {
                line: row_line,
                message: format!(
                    "expected {} values, found {}",
                    fields.len(),
                    cells.len()
                ),
            });
        }
        rows.push(cells.iter().map(|cell| Value::parse(cell)).collect());
    }

    Ok(Table { name, fields, rows })
}

/// Comma-separated record; a single trailing comma is tolerated.
fn split_record(text: &str) -> Vec<String> {
    let text = text.strip_suffix(',').unwrap_or(text);
    text.split(',').map(|cell| cell.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::bar_chart::LOAD_SCRIPT;

    #[test]
    fn parses_the_bar_chart_script() {
        let tables = parse_script(LOAD_SCRIPT).unwrap();

        assert_eq!(tables.len(), 1);
        let stars = &tables[0];
        assert_eq!(stars.name, "Stars");
        assert_eq!(stars.fields, vec!["Rating", "Votes"]);
        assert_eq!(stars.rows.len(), 10);
        assert_eq!(stars.rows[0][0], Value::parse("10"));
        assert_eq!(stars.rows[3][1].num, Some(13785.0));
    }

    #[test]
    fn unlabelled_tables_get_generated_names() {
        let tables = parse_script("LOAD * INLINE [\nA\nx\ny\n];\n// trailing comment\n").unwrap();
        assert_eq!(tables[0].name, "Table1");
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[1][0].num, None);
    }

    #[test]
    fn ragged_rows_report_their_line() {
        let err = parse_script("T:\nLOAD * INLINE [\nA,B\n1,2\n3\n];").unwrap_err();
        assert_eq!(err.line, 5);
        assert!(err.message.contains("expected 2 values"));
    }

    #[test]
    fn rejects_other_statements() {
        let err = parse_script("T: SELECT * FROM x [a];").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("LOAD * INLINE"));
    }
}
