// Representation independent operations
//
// These accept any single object. The field shortcuts forward to
// `field_filter`, which picks the backend variant on its own.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::object_arg;
use crate::error::{OperationError, RegistrationError};
use crate::models::{
    OperationHandler, OperationOutput, Params, Signature, VariantDefinition, VariantOutcome,
};
use crate::objects::Argument;
use crate::services::{OperationContext, RegistryBuilder};

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let any = Signature::parse(&["*"])?;

    let shortcuts = [
        ("keep_fields", "fields", "keep"),
        ("drop_fields", "fields", "drop"),
        ("rename_fields", "mapping", "rename"),
    ];
    for (operation, param, filter_key) in shortcuts {
        let handler = Arc::new(FieldShortcut { param, filter_key });
        let definition = VariantDefinition::new(operation, any.clone(), handler).experimental();
        builder.register_variant(definition)?;
    }

    builder.register("debug_fields", any, Arc::new(DebugFields))?;
    Ok(())
}

/// Forwards one parameter to `field_filter` under another key
pub struct FieldShortcut {
    param: &'static str,
    filter_key: &'static str,
}

#[async_trait]
impl OperationHandler for FieldShortcut {
    async fn call(
        &self,
        ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome {
        let value = match params.get(self.param) {
            Some(value) => value.clone(),
            None => {
                let message = format!("Missing parameter '{}'", self.param);
                return OperationError::Argument(message).into();
            }
        };

        ctx.invoke_with("field_filter", args.to_vec(), Params::new().with(self.filter_key, value))
            .await
            .map_err(OperationError::from)
            .into()
    }
}

/// Logs the field list of an object and passes the object through
pub struct DebugFields;

#[async_trait]
impl OperationHandler for DebugFields {
    async fn call(
        &self,
        _ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome {
        debug_fields(args, params).into()
    }
}

fn debug_fields(args: &[Argument], params: &Params) -> Result<OperationOutput, OperationError> {
    let object = object_arg(args, 0)?;
    let label = params.get("label").and_then(Value::as_str).unwrap_or("fields");

    tracing::info!("{}: {}", label, object.fields().join(", "));
    Ok(OperationOutput::Object(object.clone()))
}
