// append: concatenate a list of objects with the same field count
//
// `sql[]` composes one UNION ALL statement when every object lives in the
// same store, otherwise it asks for the `rows[]` variant.

use async_trait::async_trait;
use std::sync::Arc;

use super::list_arg;
use crate::error::{OperationError, RegistrationError};
use crate::models::{OperationHandler, OperationOutput, Params, Signature, VariantOutcome};
use crate::objects::{Argument, DataObject, RowListObject, SqlObject, SqlStatement};
use crate::services::{OperationContext, RegistryBuilder};

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let rows = Signature::parse(&["rows[]"])?;
    builder.register(
        "append",
        Signature::parse(&["sql[]"])?,
        Arc::new(AppendSql { fallback: rows.clone() }),
    )?;
    builder.register("append", rows, Arc::new(AppendRows))?;
    Ok(())
}

/// Field names of the first object, after checking every object has as many
fn common_fields(objects: &[Arc<dyn DataObject>]) -> Result<Vec<String>, OperationError> {
    let fields = objects.first().map(|obj| obj.fields()).unwrap_or_default();
    for (position, obj) in objects.iter().enumerate().skip(1) {
        let count = obj.fields().len();
        if count != fields.len() {
            return Err(OperationError::Field(format!(
                "Cannot append object {} with {} fields to objects with {} fields",
                position,
                count,
                fields.len()
            )));
        }
    }
    Ok(fields)
}

/// Concatenates rows in list order
pub struct AppendRows;

#[async_trait]
impl OperationHandler for AppendRows {
    async fn call(
        &self,
        _ctx: &OperationContext,
        args: &[Argument],
        _params: &Params,
    ) -> VariantOutcome {
        append_rows(args).await.into()
    }
}

async fn append_rows(args: &[Argument]) -> Result<OperationOutput, OperationError> {
    let objects = list_arg(args, 0)?;
    let fields = common_fields(objects)?;

    let mut rows = Vec::new();
    for obj in objects {
        rows.extend(obj.rows().await?);
    }

    tracing::debug!("Appended {} objects into {} rows", objects.len(), rows.len());
    Ok(OperationOutput::object(RowListObject::new(fields, rows)))
}

/// Builds a UNION ALL statement over objects of one store
pub struct AppendSql {
    fallback: Signature,
}

#[async_trait]
impl OperationHandler for AppendSql {
    async fn call(
        &self,
        _ctx: &OperationContext,
        args: &[Argument],
        _params: &Params,
    ) -> VariantOutcome {
        match self.compose(args).await {
            Ok(outcome) => outcome,
            Err(err) => err.into(),
        }
    }
}

impl AppendSql {
    async fn compose(&self, args: &[Argument]) -> Result<VariantOutcome, OperationError> {
        let objects = list_arg(args, 0)?;
        common_fields(objects)?;

        let statements = objects
            .iter()
            .map(|obj| obj.sql())
            .collect::<Result<Vec<SqlStatement>, _>>()?;
        let store = statements
            .first()
            .map(|s| s.store.clone())
            .ok_or_else(|| OperationError::Argument("Nothing to append".to_string()))?;

        if !statements.iter().all(|s| store.can_compose(&s.store)) {
            return Ok(VariantOutcome::retry(
                vec![self.fallback.clone()],
                "objects live in different SQL stores",
            ));
        }

        let union = statements
            .iter()
            .map(|s| format!("SELECT * FROM ({})", s.statement))
            .collect::<Vec<_>>()
            .join(" UNION ALL ");

        let object = SqlObject::compose(store, union).await?;
        Ok(VariantOutcome::Success(OperationOutput::object(object)))
    }
}
