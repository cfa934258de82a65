use serde::Deserialize;
use std::collections::HashMap;

use crate::error::OperationError;

/// Field selection shared by the `rows` and `sql` field filter variants
///
/// `keep` selects fields (original order is preserved), `drop` removes
/// fields and `rename` maps old names to new ones. Unknown names are errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldFilter {
    #[serde(default)]
    pub keep: Option<Vec<String>>,
    #[serde(default)]
    pub drop: Option<Vec<String>>,
    #[serde(default)]
    pub rename: Option<HashMap<String, String>>,
}

/// A projected field: position in the source and output name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectedField {
    pub index: usize,
    pub source: String,
    pub name: String,
}

impl FieldFilter {
    /// Resolve the filter against `fields`
    pub fn project(&self, fields: &[String]) -> Result<Vec<ProjectedField>, OperationError> {
        let listed = self
            .keep
            .iter()
            .flatten()
            .chain(self.drop.iter().flatten())
            .chain(self.rename.iter().flat_map(|map| map.keys()));
        for name in listed {
            if !fields.contains(name) {
                return Err(OperationError::Field(format!("No such field '{}'", name)));
            }
        }

        let projected = fields
            .iter()
            .enumerate()
            .filter(|(_, name)| match &self.keep {
                Some(keep) => keep.contains(*name),
                None => true,
            })
            .filter(|(_, name)| match &self.drop {
                Some(drop) => !drop.contains(*name),
                None => true,
            })
            .map(|(index, name)| ProjectedField {
                index,
                source: name.clone(),
                name: self
                    .rename
                    .as_ref()
                    .and_then(|map| map.get(name))
                    .cloned()
                    .unwrap_or_else(|| name.clone()),
            })
            .collect();

        Ok(projected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        vec!["id".to_string(), "name".to_string(), "amount".to_string()]
    }

    #[test]
    fn test_keep_preserves_source_order() {
        let filter = FieldFilter {
            keep: Some(vec!["amount".to_string(), "id".to_string()]),
            ..Default::default()
        };
        let projected = filter.project(&fields()).unwrap();
        let names: Vec<_> = projected.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "amount"]);
        assert_eq!(projected[1].index, 2);
    }

    #[test]
    fn test_drop_and_rename() {
        let filter = FieldFilter {
            drop: Some(vec!["name".to_string()]),
            rename: Some(HashMap::from([("amount".to_string(), "total".to_string())])),
            ..Default::default()
        };
        let projected = filter.project(&fields()).unwrap();
        let names: Vec<_> = projected.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "total"]);
        assert_eq!(projected[1].source, "amount");
    }

    #[test]
    fn test_unknown_field() {
        let filter = FieldFilter {
            keep: Some(vec!["missing".to_string()]),
            ..Default::default()
        };
        let err = filter.project(&fields()).unwrap_err();
        assert!(matches!(err, OperationError::Field(_)));
    }
}
