//! Bridge to the interactive explorer widget.
//!
//! The widget itself (Graphic Walker) runs in the browser. This module only
//! describes a dataset the way the widget expects: a list of fields tagged
//! with semantic and analytic types, plus one JSON object per row.

use serde::{Deserialize, Serialize};

use crate::error::ExplorerError;
use crate::table::{ColumnKind, Dataset};

/// Anything that can turn a dataset into an explorer description.
pub trait Explorer: Send + Sync {
    fn prepare(&self, dataset: &Dataset) -> Result<ExplorerSpec, ExplorerError>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Quantitative,
    Nominal,
    Temporal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticType {
    Measure,
    Dimension,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplorerField {
    pub fid: String,
    pub name: String,
    pub semantic_type: SemanticType,
    pub analytic_type: AnalyticType,
}

impl ExplorerField {
    fn for_column(name: &str, kind: ColumnKind) -> Self {
        let semantic_type = match kind {
            ColumnKind::Integer | ColumnKind::Float => SemanticType::Quantitative,
            ColumnKind::Datetime => SemanticType::Temporal,
            ColumnKind::Boolean | ColumnKind::Text | ColumnKind::Empty => SemanticType::Nominal,
        };
        let analytic_type = if semantic_type == SemanticType::Quantitative {
            AnalyticType::Measure
        } else {
            AnalyticType::Dimension
        };
        Self {
            fid: name.to_string(),
            name: name.to_string(),
            semantic_type,
            analytic_type,
        }
    }
}

/// Everything the explorer page needs to mount the widget.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExplorerSpec {
    pub fields: Vec<ExplorerField>,
    pub data: Vec<serde_json::Map<String, serde_json::Value>>,
    pub theme: Theme,
}

impl ExplorerSpec {
    pub fn to_json(&self) -> Result<String, ExplorerError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// The Graphic Walker widget, as embedded by PyGWalker.
#[derive(Clone, Debug, Default)]
pub struct GraphicWalker {
    /// Refuse datasets taller than this; unlimited when `None`.
    pub row_limit: Option<usize>,
    pub theme: Theme,
}

impl GraphicWalker {
    pub fn new(row_limit: Option<usize>, theme: Theme) -> Self {
        Self { row_limit, theme }
    }
}

impl Explorer for GraphicWalker {
    fn prepare(&self, dataset: &Dataset) -> Result<ExplorerSpec, ExplorerError> {
        if dataset.width() == 0 {
            return Err(ExplorerError::NoColumns);
        }
        if let Some(limit) = self.row_limit {
            if dataset.height() > limit {
                return Err(ExplorerError::TooManyRows {
                    rows: dataset.height(),
                    limit,
                });
            }
        }

        let fields: Vec<ExplorerField> = dataset
            .columns()
            .iter()
            .map(|c| ExplorerField::for_column(&c.name, c.kind))
            .collect();

        let data = dataset
            .rows()
            .iter()
            .map(|row| {
                fields
                    .iter()
                    .zip(row)
                    .map(|(field, value)| (field.fid.clone(), value.to_json()))
                    .collect()
            })
            .collect();

        Ok(ExplorerSpec {
            fields,
            data,
            theme: self.theme,
        })
    }
}
