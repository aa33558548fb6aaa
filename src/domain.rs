use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::PlateError;

/// Literal every image name has to start with.
pub const WELL_PREFIX: &str = "Well";

/// Last supported row letter. Rows run A..=Y.
pub const LAST_ROW_LETTER: char = 'Y';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum DataType {
    Dataset,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Dataset => write!(f, "Dataset"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnNaming {
    Number,
    Letter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowNaming {
    Number,
    Letter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: u64,
    pub name: String,
}

impl ImageRef {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlateRef {
    pub id: u64,
    pub name: String,
}

/// Zero-based plate position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WellCoordinate {
    pub row: u32,
    pub column: u32,
}

impl fmt::Display for WellCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = char::from_u32('A' as u32 + self.row).unwrap_or('?');
        write!(f, "{letter}{}", self.column + 1)
    }
}

/// Well token parsed out of an image name, e.g. `B3` from `WellB3_t001.nd2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WellId {
    raw: String,
    row_letter: char,
    column_number: u32,
}

impl WellId {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn row_letter(&self) -> char {
        self.row_letter
    }

    pub fn column_number(&self) -> u32 {
        self.column_number
    }

    pub fn coordinate(&self) -> WellCoordinate {
        WellCoordinate {
            row: (self.row_letter as u32) - ('A' as u32),
            column: self.column_number - 1,
        }
    }
}

impl fmt::Display for WellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl FromStr for WellId {
    type Err = PlateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut chars = value.chars();
        let row_letter = chars
            .next()
            .ok_or_else(|| PlateError::InvalidWellId(value.to_string()))?;
        let digits = chars.as_str();
        if !row_letter.is_ascii_uppercase() {
            return Err(PlateError::InvalidWellId(value.to_string()));
        }
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(PlateError::InvalidWellId(value.to_string()));
        }
        if row_letter > LAST_ROW_LETTER {
            return Err(PlateError::RowOutOfRange(value.to_string()));
        }
        let column_number = digits
            .parse::<u32>()
            .map_err(|_| PlateError::InvalidWellId(value.to_string()))?;
        if column_number == 0 {
            return Err(PlateError::InvalidWellId(value.to_string()));
        }
        Ok(Self {
            raw: value.to_string(),
            row_letter,
            column_number,
        })
    }
}

/// The `Screen` parameter: an existing screen id, or the name for a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenSpec(String);

impl ScreenSpec {
    /// Empty text means "no screen".
    pub fn new(text: &str) -> Option<Self> {
        if text.is_empty() {
            None
        } else {
            Some(Self(text.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn screen_id(&self) -> Option<u64> {
        self.0.trim().parse().ok()
    }
}
