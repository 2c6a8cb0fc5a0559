//! Row-oriented tables with optional per-column equality indexes.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::storage::{Result, StorageError};

/// One table row: column name to cell value.
pub type Row = serde_json::Map<String, Value>;

/// An ordered sequence of rows with a stable column set.
///
/// Columns are the union of all row keys in first-seen order. Equality
/// lookups can be accelerated with [`IndexedTable::index_column`]; indexes
/// are kept current by [`IndexedTable::push_row`] and [`IndexedTable::append`].
#[derive(Debug, Clone, Default)]
pub struct IndexedTable {
    columns: Vec<String>,
    rows: Vec<Row>,
    indexes: HashMap<String, HashMap<String, Vec<usize>>>,
}

impl PartialEq for IndexedTable {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.rows == other.rows
    }
}

impl IndexedTable {
    /// Empty table with a fixed column set.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn from_rows(rows: impl IntoIterator<Item = Row>) -> Self {
        let mut table = Self::default();
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Parse a JSON array of objects.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self> {
        let rows: Vec<Row> = serde_json::from_slice(bytes)?;
        Ok(Self::from_rows(rows))
    }

    pub fn from_json_value(value: Value) -> Result<Self> {
        let rows: Vec<Row> = serde_json::from_value(value)?;
        Ok(Self::from_rows(rows))
    }

    /// JSON array with every column present in every row (absent cells as null).
    pub fn to_json(&self) -> Value {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let full: Row = self
                    .columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect();
                Value::Object(full)
            })
            .collect();
        Value::Array(rows)
    }

    /// Two-space indented JSON array.
    pub fn to_json_pretty(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(&self.to_json())?)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push_row(&mut self, row: Row) {
        for key in row.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        let position = self.rows.len();
        for (column, index) in &mut self.indexes {
            if let Some(text) = row.get(column).and_then(cell_text) {
                index.entry(text.into_owned()).or_default().push(position);
            }
        }
        self.rows.push(row);
    }

    /// Append all rows of `other`; the row count grows by `other.row_count()`.
    pub fn append(&mut self, other: &IndexedTable) {
        for column in &other.columns {
            if !self.columns.contains(column) {
                self.columns.push(column.clone());
            }
        }
        for row in &other.rows {
            self.push_row(row.clone());
        }
    }

    /// Copy of the first `count` rows.
    pub fn head(&self, count: usize) -> IndexedTable {
        Self {
            columns: self.columns.clone(),
            rows: self.rows.iter().take(count).cloned().collect(),
            indexes: HashMap::new(),
        }
    }

    /// Build an equality index over `column`.
    pub fn index_column(&mut self, column: &str) {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, row) in self.rows.iter().enumerate() {
            if let Some(text) = row.get(column).and_then(cell_text) {
                index.entry(text.into_owned()).or_default().push(position);
            }
        }
        self.indexes.insert(column.to_string(), index);
    }

    pub fn is_indexed(&self, column: &str) -> bool {
        self.indexes.contains_key(column)
    }

    /// New table holding the rows matching every selection.
    pub fn where_selects(&self, selects: &[Select]) -> IndexedTable {
        let candidates: Box<dyn Iterator<Item = usize> + '_> = match selects
            .iter()
            .find_map(|s| self.indexes.get(&s.column).map(|index| (s, index)))
        {
            Some((select, index)) => Box::new(
                index
                    .get(&select.value)
                    .map(|positions| positions.as_slice())
                    .unwrap_or_default()
                    .iter()
                    .copied(),
            ),
            None => Box::new(0..self.rows.len()),
        };

        let rows = candidates
            .map(|position| &self.rows[position])
            .filter(|row| selects.iter().all(|s| s.matches(row)))
            .cloned()
            .collect();
        Self {
            columns: self.columns.clone(),
            rows,
            indexes: HashMap::new(),
        }
    }
}

/// Textual form of a cell used for equality selection.
pub fn cell_text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s)),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        _ => None,
    }
}

/// One `key:value` equality selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Select {
    pub column: String,
    pub value: String,
}

impl Select {
    pub fn new(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column)
            .and_then(cell_text)
            .is_some_and(|text| text == self.value)
    }
}

impl FromStr for Select {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((column, value)) if !column.trim().is_empty() => {
                Ok(Self::new(column.trim(), value.trim()))
            }
            _ => Err(StorageError::InvalidSelect(s.to_string())),
        }
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.column, self.value)
    }
}

/// Parse selections given either as separate `key:value` strings or as a
/// single comma-joined string.
pub fn parse_selects<S: AsRef<str>>(selects: &[S]) -> Result<Vec<Select>> {
    let pieces: Vec<&str> = match selects {
        [single] if single.as_ref().contains(',') => single.as_ref().split(',').collect(),
        many => many.iter().map(AsRef::as_ref).collect(),
    };
    pieces
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn people() -> IndexedTable {
        IndexedTable::from_rows([
            row(json!({"name": "ada", "team": "core", "level": 3})),
            row(json!({"name": "bob", "team": "web", "level": 2})),
            row(json!({"name": "cy", "team": "core", "level": 2, "remote": true})),
        ])
    }

    #[test]
    fn columns_are_first_seen_union() {
        let table = people();
        assert_eq!(table.columns(), ["name", "team", "level", "remote"]);
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn to_json_fills_missing_cells_with_null() {
        let json = people().to_json();
        assert_eq!(json[0]["remote"], Value::Null);
        assert_eq!(json[2]["remote"], json!(true));
    }

    #[test]
    fn where_selects_is_a_conjunction() {
        let table = people();
        let hits = table.where_selects(&[Select::new("team", "core"), Select::new("level", "2")]);
        assert_eq!(hits.row_count(), 1);
        assert_eq!(hits.rows()[0]["name"], json!("cy"));
    }

    #[test]
    fn index_survives_append() {
        let mut table = people();
        table.index_column("team");
        table.append(&IndexedTable::from_rows([row(
            json!({"name": "dee", "team": "core", "level": 1}),
        )]));
        assert!(table.is_indexed("team"));
        let hits = table.where_selects(&[Select::new("team", "core")]);
        let names: Vec<_> = hits.rows().iter().map(|r| r["name"].clone()).collect();
        assert_eq!(names, vec![json!("ada"), json!("cy"), json!("dee")]);
    }

    #[test]
    fn parse_selects_accepts_comma_joined_string() {
        let parsed = parse_selects(&["team:core,level:2"]).unwrap();
        assert_eq!(
            parsed,
            vec![Select::new("team", "core"), Select::new("level", "2")]
        );
        let separate = parse_selects(&["team:core", "level:2"]).unwrap();
        assert_eq!(parsed, separate);
    }

    #[test]
    fn select_without_colon_is_rejected() {
        assert!(matches!(
            "nocolon".parse::<Select>(),
            Err(StorageError::InvalidSelect(_))
        ));
    }

    #[test]
    fn value_may_contain_colons() {
        let select: Select = "url:http://example.org".parse().unwrap();
        assert_eq!(select.value, "http://example.org");
    }

    #[test]
    fn head_truncates() {
        let table = people();
        assert_eq!(table.head(2).row_count(), 2);
        assert_eq!(table.head(10).row_count(), 3);
    }
}
