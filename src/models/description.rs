use serde::Serialize;

use super::signature::Signature;

/// Inspection view of one registered operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationDescription {
    pub name: String,
    /// Operand shape shared by all variants, e.g. `["*[]"]`
    pub prototype: Signature,
    pub variants: Vec<VariantDescription>,
}

/// Inspection view of one variant
#[derive(Debug, Clone, Serialize)]
pub struct VariantDescription {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub signature: Signature,
    pub specificity: u32,
    pub priority: i32,
    pub experimental: bool,
}
