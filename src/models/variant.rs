// Operation variants
//
// A variant is one implementation of a named operation, bound to the
// signature it requires. Its body reports one of three outcomes: a result,
// a retry signal asking the dispatcher to try other signatures, or a
// failure that ends the whole call.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

use super::signature::Signature;
use crate::error::OperationError;
use crate::objects::{Argument, DataObject};
use crate::services::OperationContext;

/// Result produced by a successful variant
#[derive(Debug, Clone)]
pub enum OperationOutput {
    Object(Arc<dyn DataObject>),
    Value(Value),
    Empty,
}

impl OperationOutput {
    pub fn object<T: DataObject + 'static>(object: T) -> Self {
        OperationOutput::Object(Arc::new(object))
    }

    pub fn into_object(self) -> Option<Arc<dyn DataObject>> {
        match self {
            OperationOutput::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            OperationOutput::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// Request from a variant to abandon itself and try other signatures
///
/// A variant must not have committed side effects when it signals a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySignal {
    /// Signatures the dispatcher may try next; matching variants are ranked
    /// again by specificity. Empty means any remaining candidate.
    pub preferred_signatures: Vec<Signature>,
    pub reason: String,
}

impl RetrySignal {
    pub fn new(preferred_signatures: Vec<Signature>, reason: impl Into<String>) -> Self {
        Self {
            preferred_signatures,
            reason: reason.into(),
        }
    }

    /// Retry with any other satisfiable variant
    pub fn any(reason: impl Into<String>) -> Self {
        Self::new(Vec::new(), reason)
    }
}

/// Tagged outcome of one variant attempt
#[derive(Debug)]
pub enum VariantOutcome {
    Success(OperationOutput),
    Retry(RetrySignal),
    Failure(OperationError),
}

impl VariantOutcome {
    pub fn retry(preferred_signatures: Vec<Signature>, reason: impl Into<String>) -> Self {
        VariantOutcome::Retry(RetrySignal::new(preferred_signatures, reason))
    }
}

impl From<Result<OperationOutput, OperationError>> for VariantOutcome {
    fn from(result: Result<OperationOutput, OperationError>) -> Self {
        match result {
            Ok(output) => VariantOutcome::Success(output),
            Err(err) => VariantOutcome::Failure(err),
        }
    }
}

impl From<OperationError> for VariantOutcome {
    fn from(err: OperationError) -> Self {
        VariantOutcome::Failure(err)
    }
}

/// Non-dispatch parameters of a call (scalar options)
#[derive(Debug, Clone, Default)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self(Map::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode all parameters into a typed struct
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, OperationError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    /// Required unsigned integer parameter
    pub fn require_u64(&self, key: &str) -> Result<u64, OperationError> {
        self.get(key)
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                OperationError::Argument(format!(
                    "Parameter '{}' must be a non-negative integer",
                    key
                ))
            })
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Body of an operation variant
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Run the variant. `ctx` allows nested operation calls.
    async fn call(
        &self,
        ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome;
}

/// Handler wrapping a synchronous closure
pub struct FnHandler<F>(F);

/// Wrap a synchronous closure as an operation handler
pub fn handler_fn<F>(f: F) -> Arc<dyn OperationHandler>
where
    F: Fn(&[Argument], &Params) -> VariantOutcome + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F> OperationHandler for FnHandler<F>
where
    F: Fn(&[Argument], &Params) -> VariantOutcome + Send + Sync,
{
    async fn call(
        &self,
        _ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome {
        (self.0)(args, params)
    }
}

/// Everything needed to register a variant
pub struct VariantDefinition {
    pub operation: String,
    pub signature: Signature,
    pub handler: Arc<dyn OperationHandler>,
    pub name: Option<String>,
    pub priority: i32,
    pub experimental: bool,
}

impl VariantDefinition {
    pub fn new(
        operation: impl Into<String>,
        signature: Signature,
        handler: Arc<dyn OperationHandler>,
    ) -> Self {
        Self {
            operation: operation.into(),
            signature,
            handler,
            name: None,
            priority: 0,
            experimental: false,
        }
    }

    /// Explicit variant name, unique within the operation
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Precedence among variants of equal specificity, higher first
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn experimental(mut self) -> Self {
        self.experimental = true;
        self
    }
}

/// Registered variant
pub struct OperationVariant {
    pub operation: String,
    pub signature: Signature,
    pub name: Option<String>,
    pub priority: i32,
    pub experimental: bool,
    /// Registration order, used for stable tie-breaks
    pub sequence: u64,
    handler: Arc<dyn OperationHandler>,
}

impl OperationVariant {
    pub(crate) fn from_definition(definition: VariantDefinition, sequence: u64) -> Self {
        Self {
            operation: definition.operation,
            signature: definition.signature,
            name: definition.name,
            priority: definition.priority,
            experimental: definition.experimental,
            sequence,
            handler: definition.handler,
        }
    }

    /// Copy with a new handler and options, keeping the registration position
    pub(crate) fn replaced_by(&self, definition: VariantDefinition) -> Self {
        Self::from_definition(definition, self.sequence)
    }

    /// Display label: explicit name or `operation(signature)`
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}({})", self.operation, self.signature),
        }
    }

    pub(crate) async fn call(
        &self,
        ctx: &OperationContext,
        args: &[Argument],
        params: &Params,
    ) -> VariantOutcome {
        self.handler.call(ctx, args, params).await
    }
}

impl fmt::Debug for OperationVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationVariant")
            .field("operation", &self.operation)
            .field("signature", &self.signature.to_string())
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .finish()
    }
}
