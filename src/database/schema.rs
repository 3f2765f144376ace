use std::fmt;

use crate::ingest::item::{Item, Scalar};

pub const ITEMS_TABLE: &str = "items";

/// Column holding the relative path of the small product image.
pub const IMAGE_COLUMN: &str = "imageUrlSmall";

/// Column read back as context for the vision model.
pub const DESCRIPTION_COLUMN: &str = "description";

pub const ANNOTATION_EN: &str = "IA_EN";
pub const ANNOTATION_FR: &str = "IA_FR";
pub const ANNOTATION_DE: &str = "IA_DE";

/// Fixed annotation columns appended after the inferred ones.
pub const ANNOTATION_COLUMNS: [&str; 3] = [ANNOTATION_EN, ANNOTATION_FR, ANNOTATION_DE];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    /// Booleans are stored as 0/1 and typed INTEGER, as are whole numbers
    /// too large for an i64.
    pub fn of(value: &Scalar) -> Self {
        match value {
            Scalar::Integer(_) | Scalar::Bool(_) => ColumnType::Integer,
            Scalar::Real(r) if r.fract() == 0.0 => ColumnType::Integer,
            Scalar::Real(_) => ColumnType::Real,
            Scalar::Text(_) | Scalar::Null => ColumnType::Text,
        }
    }

    pub fn as_sql(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: ColumnType,
}

/// Derives the column list from a sample record, in field order.
pub fn infer_columns(sample: &Item) -> Vec<Column> {
    sample
        .fields()
        .map(|(name, value)| Column {
            name: name.to_string(),
            kind: ColumnType::of(value),
        })
        .collect()
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn create_table_sql(columns: &[Column]) -> String {
    let mut definitions = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    definitions.extend(
        columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.kind)),
    );
    definitions.extend(ANNOTATION_COLUMNS.iter().map(|c| format!("{} TEXT", c)));

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        ITEMS_TABLE,
        definitions.join(",\n    ")
    )
}

/// Insert statement naming the inferred columns followed by the annotation columns.
pub fn insert_sql(columns: &[Column]) -> String {
    let names: Vec<String> = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .chain(ANNOTATION_COLUMNS.iter().map(|c| c.to_string()))
        .collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        ITEMS_TABLE,
        names.join(", "),
        placeholders.join(", ")
    )
}
