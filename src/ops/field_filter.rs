// field_filter(keep?, drop?, rename?): select, drop and rename fields
//
// The `sql` variant wraps the statement in a projection. A filter that
// leaves no fields cannot be written as SQL and is handed to `rows`.

use async_trait::async_trait;
use std::sync::Arc;

use super::object_arg;
use crate::error::{OperationError, RegistrationError};
use crate::models::{OperationHandler, OperationOutput, Params, Signature, VariantOutcome};
use crate::objects::{Argument, FieldFilter, RowListObject, SqlObject};
use crate::services::{OperationContext, RegistryBuilder};
use crate::validation::SqlValidator;

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let rows = Signature::parse(&["rows"])?;
    builder.register(
        "field_filter",
        Signature::parse(&["sql"])?,
        Arc::new(FieldFilterSql { fallback: rows.clone() }),
    )?;
    builder.register("field_filter", rows, Arc::new(FieldFilterRows))?;
    Ok(())
}

pub struct FieldFilterRows;

#[async_trait]
impl OperationHandler for FieldFilterRows {
    async fn call(
        &self,
        _ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome {
        filter_rows(args, params).await.into()
    }
}

async fn filter_rows(
    args: &[Argument],
    params: &Params,
) -> Result<OperationOutput, OperationError> {
    let filter: FieldFilter = params.decode()?;
    let object = object_arg(args, 0)?;
    let projected = filter.project(&object.fields())?;

    let rows = object
        .rows()
        .await?
        .into_iter()
        .map(|row| {
            projected
                .iter()
                .map(|field| row.get(field.index).cloned().unwrap_or_default())
                .collect()
        })
        .collect();

    let fields = projected.into_iter().map(|field| field.name).collect();
    Ok(OperationOutput::object(RowListObject::new(fields, rows)))
}

pub struct FieldFilterSql {
    fallback: Signature,
}

#[async_trait]
impl OperationHandler for FieldFilterSql {
    async fn call(
        &self,
        _ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome {
        match self.project(args, params).await {
            Ok(outcome) => outcome,
            Err(err) => err.into(),
        }
    }
}

impl FieldFilterSql {
    async fn project(
        &self,
        args: &[Argument],
        params: &Params,
    ) -> Result<VariantOutcome, OperationError> {
        let filter: FieldFilter = params.decode()?;
        let object = object_arg(args, 0)?;
        let projected = filter.project(&object.fields())?;

        if projected.is_empty() {
            return Ok(VariantOutcome::retry(
                vec![self.fallback.clone()],
                "empty projection has no SQL form",
            ));
        }

        let sql = object.sql()?;
        let columns = projected
            .iter()
            .map(|field| {
                let source = SqlValidator::quote_identifier(&field.source);
                if field.source == field.name {
                    source
                } else {
                    format!("{} AS {}", source, SqlValidator::quote_identifier(&field.name))
                }
            })
            .collect::<Vec<_>>()
            .join(", ");

        let statement = format!("SELECT {} FROM ({})", columns, sql.statement);
        let filtered = SqlObject::compose(sql.store, statement).await?;
        Ok(VariantOutcome::Success(OperationOutput::object(filtered)))
    }
}
