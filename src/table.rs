use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashSet;
use std::fmt;

use crate::error::TableError;

/// Tokens read as "no value" in text sources.
pub const MISSING_TOKENS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "#N/A"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"];

/// A single cell of a [`Dataset`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Missing,
    Int(i64),
    Float(f64),
    Bool(bool),
    Datetime(NaiveDateTime),
    Text(String),
}

impl Value {
    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// The kind a column would have if it held only this value.
    fn kind(&self) -> Option<ColumnKind> {
        match self {
            Value::Missing => None,
            Value::Int(_) => Some(ColumnKind::Integer),
            Value::Float(_) => Some(ColumnKind::Float),
            Value::Bool(_) => Some(ColumnKind::Boolean),
            Value::Datetime(_) => Some(ColumnKind::Datetime),
            Value::Text(_) => Some(ColumnKind::Text),
        }
    }

    /// Convert to JSON for the explorer. Missing values and non-finite
    /// floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Missing => serde_json::Value::Null,
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Datetime(_) => serde_json::Value::String(self.to_string()),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Missing => Ok(()),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Datetime(dt) => {
                if dt.time() == NaiveTime::MIN {
                    write!(f, "{}", dt.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f"))
                }
            }
            Value::Text(s) => f.write_str(s),
        }
    }
}

/// The inferred type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Datetime,
    Text,
    /// Every value in the column is missing.
    Empty,
}

impl ColumnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Datetime => "datetime",
            ColumnKind::Text => "text",
            ColumnKind::Empty => "empty",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnKind,
}

/// An ordered table of named, typed columns.
///
/// Every row holds exactly one value per column; this is checked on
/// construction so consumers can index rows without bounds surprises.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Dataset {
    /// Build a dataset from already-typed columns and rows.
    ///
    /// # Errors
    /// * `TableError::RaggedRow` if any row's width differs from the column count
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self, TableError> {
        let expected = columns.len();
        if let Some((row, values)) = rows.iter().enumerate().find(|(_, r)| r.len() != expected) {
            return Err(TableError::RaggedRow {
                row,
                expected,
                found: values.len(),
            });
        }
        Ok(Dataset { columns, rows })
    }

    /// Build a dataset from raw text cells, inferring each column's kind.
    ///
    /// Header names are normalized first (see [`normalize_headers`]).
    ///
    /// # Arguments
    /// * `headers` - Column names as they appear in the source
    /// * `rows` - Row-major text cells; each row must match the header width
    ///
    /// # Examples
    /// ```
    /// use tablewalk::table::{ColumnKind, Dataset};
    ///
    /// let ds = Dataset::from_text_rows(
    ///     vec!["city".into(), "pop".into()],
    ///     vec![vec!["Oslo".into(), "709037".into()]],
    /// )
    /// .unwrap();
    /// assert_eq!(ds.columns()[1].kind, ColumnKind::Integer);
    /// ```
    pub fn from_text_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, TableError> {
        let width = headers.len();
        check_widths(rows.iter().map(Vec::len), width)?;

        let mut by_column: Vec<Vec<String>> = vec![Vec::with_capacity(rows.len()); width];
        for row in rows {
            for (c, cell) in row.into_iter().enumerate() {
                by_column[c].push(cell);
            }
        }

        let typed = by_column.into_iter().map(infer_text_column).collect();
        Ok(assemble(normalize_headers(headers), typed))
    }

    /// Build a dataset from cells that already carry a type (spreadsheets),
    /// unifying mixed columns.
    pub fn from_cell_rows(headers: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, TableError> {
        let width = headers.len();
        check_widths(rows.iter().map(Vec::len), width)?;

        let mut by_column: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); width];
        for row in rows {
            for (c, cell) in row.into_iter().enumerate() {
                by_column[c].push(cell);
            }
        }

        let typed = by_column.into_iter().map(unify_column).collect();
        Ok(assemble(normalize_headers(headers), typed))
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn missing_count(&self) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.iter())
            .filter(|v| v.is_missing())
            .count()
    }
}

fn check_widths(widths: impl Iterator<Item = usize>, expected: usize) -> Result<(), TableError> {
    for (row, found) in widths.enumerate() {
        if found != expected {
            return Err(TableError::RaggedRow { row, expected, found });
        }
    }
    Ok(())
}

fn assemble(names: Vec<String>, typed: Vec<(ColumnKind, Vec<Value>)>) -> Dataset {
    let height = typed.first().map(|(_, v)| v.len()).unwrap_or(0);
    let mut rows: Vec<Vec<Value>> = (0..height).map(|_| Vec::with_capacity(names.len())).collect();
    let mut columns = Vec::with_capacity(names.len());

    for (name, (kind, values)) in names.into_iter().zip(typed) {
        columns.push(Column { name, kind });
        for (r, value) in values.into_iter().enumerate() {
            rows[r].push(value);
        }
    }

    Dataset { columns, rows }
}

/// Make column names usable as unique keys.
///
/// Blank names become `Unnamed: {index}`; repeated names get `.1`, `.2`, ...
/// suffixes, skipping any suffix that is already taken.
///
/// # Examples
/// ```
/// use tablewalk::table::normalize_headers;
///
/// let names = normalize_headers(vec!["a".into(), "".into(), "a".into()]);
/// assert_eq!(names, vec!["a", "Unnamed: 1", "a.1"]);
/// ```
pub fn normalize_headers(raw: Vec<String>) -> Vec<String> {
    let named: Vec<String> = raw
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                format!("Unnamed: {}", i)
            } else {
                trimmed.to_string()
            }
        })
        .collect();

    let mut taken: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(named.len());
    for name in named {
        if taken.insert(name.clone()) {
            out.push(name);
            continue;
        }
        let mut n = 1;
        let unique = loop {
            let candidate = format!("{}.{}", name, n);
            if !taken.contains(&candidate) {
                break candidate;
            }
            n += 1;
        };
        taken.insert(unique.clone());
        out.push(unique);
    }
    out
}

pub fn is_missing_token(s: &str) -> bool {
    MISSING_TOKENS.contains(&s.trim())
}

fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Parse an ISO-like date or datetime.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_time(NaiveTime::MIN));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Infer the narrowest kind that fits every non-missing cell and convert
/// the cells to it. Text columns keep their cells verbatim.
pub fn infer_text_column(cells: Vec<String>) -> (ColumnKind, Vec<Value>) {
    let present: Vec<&str> = cells
        .iter()
        .map(String::as_str)
        .filter(|s| !is_missing_token(s))
        .map(str::trim)
        .collect();

    let kind = if present.is_empty() {
        ColumnKind::Empty
    } else if present.iter().all(|s| s.parse::<i64>().is_ok()) {
        ColumnKind::Integer
    } else if present.iter().all(|s| s.parse::<f64>().is_ok()) {
        ColumnKind::Float
    } else if present.iter().all(|s| parse_bool(s).is_some()) {
        ColumnKind::Boolean
    } else if present.iter().all(|s| parse_datetime(s).is_some()) {
        ColumnKind::Datetime
    } else {
        ColumnKind::Text
    };

    let values = cells
        .into_iter()
        .map(|cell| {
            if is_missing_token(&cell) {
                return Value::Missing;
            }
            let t = cell.trim();
            // The kind check above guarantees each parse succeeds.
            match kind {
                ColumnKind::Integer => t.parse().map(Value::Int).unwrap_or(Value::Missing),
                ColumnKind::Float => t.parse().map(Value::Float).unwrap_or(Value::Missing),
                ColumnKind::Boolean => parse_bool(t).map(Value::Bool).unwrap_or(Value::Missing),
                ColumnKind::Datetime => parse_datetime(t).map(Value::Datetime).unwrap_or(Value::Missing),
                ColumnKind::Text => Value::Text(cell),
                ColumnKind::Empty => Value::Missing,
            }
        })
        .collect();

    (kind, values)
}

/// Settle a column of typed cells on a single kind: integers widen to
/// floats, and any other mix falls back to text.
pub fn unify_column(cells: Vec<Value>) -> (ColumnKind, Vec<Value>) {
    let kinds: HashSet<ColumnKind> = cells.iter().filter_map(Value::kind).collect();

    let kind = match kinds.len() {
        0 => ColumnKind::Empty,
        1 => *kinds.iter().next().unwrap_or(&ColumnKind::Text),
        2 if kinds.contains(&ColumnKind::Integer) && kinds.contains(&ColumnKind::Float) => {
            ColumnKind::Float
        }
        _ => ColumnKind::Text,
    };

    let values = cells
        .into_iter()
        .map(|cell| match (kind, cell) {
            (_, Value::Missing) => Value::Missing,
            (ColumnKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (ColumnKind::Text, Value::Text(s)) => Value::Text(s),
            (ColumnKind::Text, other) => Value::Text(other.to_string()),
            (_, other) => other,
        })
        .collect();

    (kind, values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn integer_column_with_missing_cells() {
        let (kind, values) = infer_text_column(strings(&["1", "", "3", "NA"]));
        assert_eq!(kind, ColumnKind::Integer);
        assert_eq!(values, vec![Value::Int(1), Value::Missing, Value::Int(3), Value::Missing]);
    }

    #[test]
    fn mixed_numbers_widen_to_float() {
        let (kind, values) = infer_text_column(strings(&["1", "2.5"]));
        assert_eq!(kind, ColumnKind::Float);
        assert_eq!(values, vec![Value::Float(1.0), Value::Float(2.5)]);
    }

    #[test]
    fn booleans_and_dates_are_recognized() {
        let (kind, _) = infer_text_column(strings(&["True", "false", "TRUE"]));
        assert_eq!(kind, ColumnKind::Boolean);

        let (kind, values) = infer_text_column(strings(&["2024-01-31", "2024-02-01 12:30:00"]));
        assert_eq!(kind, ColumnKind::Datetime);
        assert_eq!(values[0].to_string(), "2024-01-31");
        assert_eq!(values[1].to_string(), "2024-02-01 12:30:00");
    }

    #[test]
    fn text_keeps_cells_verbatim() {
        let (kind, values) = infer_text_column(strings(&[" x ", "12"]));
        assert_eq!(kind, ColumnKind::Text);
        assert_eq!(values[0], Value::Text(" x ".to_string()));
        assert_eq!(values[1], Value::Text("12".to_string()));
    }

    #[test]
    fn all_missing_column_is_empty() {
        let (kind, values) = infer_text_column(strings(&["", "NaN"]));
        assert_eq!(kind, ColumnKind::Empty);
        assert!(values.iter().all(Value::is_missing));
    }

    #[test]
    fn unify_widens_ints_and_falls_back_to_text() {
        let (kind, values) = unify_column(vec![Value::Int(2), Value::Float(0.5), Value::Missing]);
        assert_eq!(kind, ColumnKind::Float);
        assert_eq!(values, vec![Value::Float(2.0), Value::Float(0.5), Value::Missing]);

        let (kind, values) = unify_column(vec![Value::Int(2), Value::Text("two".into())]);
        assert_eq!(kind, ColumnKind::Text);
        assert_eq!(values[0], Value::Text("2".into()));
    }

    #[test]
    fn duplicate_and_blank_headers_are_renamed() {
        let names = normalize_headers(strings(&["a", "a", "", "a.1", "a"]));
        assert_eq!(names, vec!["a", "a.1", "Unnamed: 2", "a.1.1", "a.2"]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let err = Dataset::from_text_rows(strings(&["a", "b"]), vec![strings(&["1"])]).unwrap_err();
        assert_eq!(
            err,
            TableError::RaggedRow {
                row: 0,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn float_display_is_stable() {
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(1.25).to_string(), "1.25");
        assert_eq!(Value::Missing.to_string(), "");
    }
}
