use serde::{Deserialize, Serialize};

use crate::table::{ColumnKind, Dataset};

/// Default number of rows shown under the upload control.
pub const DEFAULT_ROW_CAP: usize = 1000;

/// How much of a dataset to show and how to show gaps.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewOptions {
    /// Maximum rows to show; `None` shows every row.
    pub row_cap: Option<usize>,
    /// Text shown in place of missing values; blank when unset.
    pub missing_placeholder: Option<String>,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            row_cap: Some(DEFAULT_ROW_CAP),
            missing_placeholder: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PreviewColumn {
    pub name: String,
    pub kind: &'static str,
}

/// A display-ready slice of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Preview {
    pub columns: Vec<PreviewColumn>,
    pub rows: Vec<Vec<String>>,
    pub total_rows: usize,
    pub shown_rows: usize,
    pub truncated: bool,
}

impl Preview {
    /// Render the first `min(height, row_cap)` rows of `dataset` as strings.
    ///
    /// # Examples
    /// ```
    /// use tablewalk::loader::load_csv;
    /// use tablewalk::preview::{Preview, PreviewOptions};
    ///
    /// let ds = load_csv(b"n\n1\n2\n3\n").unwrap();
    /// let options = PreviewOptions { row_cap: Some(2), missing_placeholder: None };
    /// let preview = Preview::build(&ds, &options);
    /// assert_eq!(preview.shown_rows, 2);
    /// assert!(preview.truncated);
    /// ```
    pub fn build(dataset: &Dataset, options: &PreviewOptions) -> Self {
        let total_rows = dataset.height();
        let shown_rows = options.row_cap.map_or(total_rows, |cap| cap.min(total_rows));
        let placeholder = options.missing_placeholder.as_deref().unwrap_or("");

        let columns = dataset
            .columns()
            .iter()
            .map(|c| PreviewColumn {
                name: c.name.clone(),
                kind: c.kind.as_str(),
            })
            .collect();

        let rows = dataset.rows()[..shown_rows]
            .iter()
            .map(|row| {
                row.iter()
                    .map(|v| {
                        if v.is_missing() {
                            placeholder.to_string()
                        } else {
                            v.to_string()
                        }
                    })
                    .collect()
            })
            .collect();

        Preview {
            columns,
            rows,
            total_rows,
            shown_rows,
            truncated: shown_rows < total_rows,
        }
    }

    /// Column indices holding numbers, for right-aligned rendering.
    pub fn numeric_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind == ColumnKind::Integer.as_str() || c.kind == ColumnKind::Float.as_str())
            .map(|(i, _)| i)
            .collect()
    }

    /// Plain-text rendering with padded columns, used by the `preview` binary.
    pub fn to_text(&self) -> String {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.name.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
        let numeric = self.numeric_columns();

        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<w$}", c.name, w = widths[i]))
            .collect();
        out.push_str(header.join("  ").trim_end());
        out.push('\n');

        for row in &self.rows {
            let line: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(i, cell)| {
                    if numeric.contains(&i) {
                        format!("{:>w$}", cell, w = widths[i])
                    } else {
                        format!("{:<w$}", cell, w = widths[i])
                    }
                })
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }

        if self.truncated {
            out.push_str(&format!("... {} of {} rows shown\n", self.shown_rows, self.total_rows));
        }
        out
    }
}
