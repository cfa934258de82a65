use async_trait::async_trait;
use std::sync::Arc;

use super::object_arg;
use crate::error::{OperationError, RegistrationError};
use crate::models::{OperationHandler, OperationOutput, Params, Signature, VariantOutcome};
use crate::objects::{Argument, RowListObject, SqlObject};
use crate::services::{OperationContext, RegistryBuilder};
use crate::validation::SqlValidator;

/// `limit(count)`: keep the first `count` rows
pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    builder.register("limit", Signature::parse(&["sql"])?, Arc::new(LimitSql))?;
    builder.register("limit", Signature::parse(&["rows"])?, Arc::new(LimitRows))?;
    Ok(())
}

pub struct LimitRows;

#[async_trait]
impl OperationHandler for LimitRows {
    async fn call(
        &self,
        _ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome {
        limit_rows(args, params).await.into()
    }
}

async fn limit_rows(args: &[Argument], params: &Params) -> Result<OperationOutput, OperationError> {
    let count = params.require_u64("count")?;
    let object = object_arg(args, 0)?;

    let mut rows = object.rows().await?;
    rows.truncate(usize::try_from(count).unwrap_or(usize::MAX));
    Ok(OperationOutput::object(RowListObject::new(object.fields(), rows)))
}

pub struct LimitSql;

#[async_trait]
impl OperationHandler for LimitSql {
    async fn call(
        &self,
        _ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome {
        limit_sql(args, params).await.into()
    }
}

async fn limit_sql(args: &[Argument], params: &Params) -> Result<OperationOutput, OperationError> {
    let count = params.require_u64("count")?;
    let sql = object_arg(args, 0)?.sql()?;

    let statement = SqlValidator::apply_limit(&sql.statement, count)?;
    tracing::debug!("Limited SQL statement: {}", statement);
    Ok(OperationOutput::object(SqlObject::compose(sql.store, statement).await?))
}
