// Data objects
//
// A data object is a handle over a dataset that reports which
// representations it currently supports. Dispatch only looks at
// `representations()`; variants then use the accessor for the
// representation their signature asked for.

pub mod fields;
pub mod rows;
pub mod sql;

pub use fields::FieldFilter;
pub use rows::RowListObject;
pub use sql::{SqlObject, SqlStatement, SqlStore};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::ObjectError;
use crate::models::Representation;

/// One row: values in field order
pub type Row = Vec<Value>;

/// One record: field name to value
pub type Record = Map<String, Value>;

/// Capability interface every data object implements
///
/// `representations()` must be side-effect free and cheap, it may be called
/// several times per dispatch.
#[async_trait]
pub trait DataObject: Send + Sync + fmt::Debug {
    /// Representations the object supports, most natural first
    fn representations(&self) -> Vec<Representation>;

    /// Field names in row order
    fn fields(&self) -> Vec<String>;

    fn supports(&self, representation: &Representation) -> bool {
        self.representations().contains(representation)
    }

    /// Rows of the object
    async fn rows(&self) -> Result<Vec<Row>, ObjectError> {
        Err(self.missing(&Representation::Rows))
    }

    /// Records of the object, built from rows by default
    async fn records(&self) -> Result<Vec<Record>, ObjectError> {
        let fields = self.fields();
        let rows = self.rows().await?;
        Ok(rows
            .into_iter()
            .map(|row| fields.iter().cloned().zip(row).collect())
            .collect())
    }

    /// Composable SQL statement of the object
    fn sql(&self) -> Result<SqlStatement, ObjectError> {
        Err(self.missing(&Representation::Sql))
    }

    /// Error for an accessor of a representation the object lacks
    fn missing(&self, requested: &Representation) -> ObjectError {
        ObjectError::Representation {
            requested: requested.to_string(),
            available: join_representations(&self.representations()),
        }
    }
}

/// Dispatch argument: a single object or a homogeneous list of objects
#[derive(Debug, Clone)]
pub enum Argument {
    Object(Arc<dyn DataObject>),
    List(Vec<Arc<dyn DataObject>>),
}

impl Argument {
    pub fn is_list(&self) -> bool {
        matches!(self, Argument::List(_))
    }

    /// A list supports a representation only if every element does.
    /// An empty list supports nothing.
    pub fn supports(&self, representation: &Representation) -> bool {
        match self {
            Argument::Object(obj) => obj.supports(representation),
            Argument::List(objects) => {
                !objects.is_empty() && objects.iter().all(|obj| obj.supports(representation))
            }
        }
    }

    /// Representations usable for this argument (list form is common ones)
    pub fn representations(&self) -> Vec<Representation> {
        match self {
            Argument::Object(obj) => obj.representations(),
            Argument::List(objects) => common_representations(objects),
        }
    }

    pub fn as_object(&self) -> Option<&Arc<dyn DataObject>> {
        match self {
            Argument::Object(obj) => Some(obj),
            Argument::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Arc<dyn DataObject>]> {
        match self {
            Argument::Object(_) => None,
            Argument::List(objects) => Some(objects),
        }
    }

    /// Human readable form used in dispatch diagnostics
    pub fn describe(&self) -> String {
        let reps = join_representations(&self.representations());
        match self {
            Argument::Object(_) => format!("[{}]", reps),
            Argument::List(_) => format!("[{}][]", reps),
        }
    }
}

impl From<Arc<dyn DataObject>> for Argument {
    fn from(obj: Arc<dyn DataObject>) -> Self {
        Argument::Object(obj)
    }
}

impl From<Vec<Arc<dyn DataObject>>> for Argument {
    fn from(objects: Vec<Arc<dyn DataObject>>) -> Self {
        Argument::List(objects)
    }
}

/// Representations shared by all `objects`, in the order of the first one
pub fn common_representations(objects: &[Arc<dyn DataObject>]) -> Vec<Representation> {
    let Some((first, rest)) = objects.split_first() else {
        return Vec::new();
    };

    let mut common = first.representations();
    for obj in rest {
        let theirs = obj.representations();
        common.retain(|rep| theirs.contains(rep));
    }
    common
}

/// Per-argument representation strings, list arguments suffixed with `[]`
pub fn argument_representations(args: &[Argument]) -> Vec<Vec<String>> {
    args.iter()
        .map(|arg| {
            let suffix = if arg.is_list() { "[]" } else { "" };
            arg.representations()
                .iter()
                .map(|rep| format!("{}{}", rep, suffix))
                .collect()
        })
        .collect()
}

fn join_representations(reps: &[Representation]) -> String {
    reps.iter()
        .map(|rep| rep.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
