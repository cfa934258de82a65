use async_trait::async_trait;

use super::{DataObject, Record, Row};
use crate::error::ObjectError;
use crate::models::Representation;

/// In-memory list of rows
///
/// The object is not consumed by reading, its rows can be requested any
/// number of times.
#[derive(Debug, Clone, Default)]
pub struct RowListObject {
    fields: Vec<String>,
    rows: Vec<Row>,
}

impl RowListObject {
    pub fn new(fields: Vec<String>, rows: Vec<Row>) -> Self {
        Self { fields, rows }
    }

    /// Build from records, taking values in `fields` order (missing keys become null)
    pub fn from_records(fields: Vec<String>, records: Vec<Record>) -> Self {
        let rows = records
            .into_iter()
            .map(|mut record| {
                fields
                    .iter()
                    .map(|name| record.remove(name).unwrap_or(serde_json::Value::Null))
                    .collect()
            })
            .collect();
        Self { fields, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn data(&self) -> &[Row] {
        &self.rows
    }
}

#[async_trait]
impl DataObject for RowListObject {
    fn representations(&self) -> Vec<Representation> {
        vec![Representation::Rows, Representation::Records]
    }

    fn fields(&self) -> Vec<String> {
        self.fields.clone()
    }

    async fn rows(&self) -> Result<Vec<Row>, ObjectError> {
        Ok(self.rows.clone())
    }
}
