// Default operation catalogue
//
// Variants are grouped by operation. Each module registers its variants
// through `register`, and `register_default_operations` installs all of them.

pub mod append;
pub mod field_filter;
pub mod generic;
pub mod limit;

use std::sync::Arc;

use crate::error::{OperationError, RegistrationError};
use crate::objects::{Argument, DataObject};
use crate::services::RegistryBuilder;

/// Register every operation shipped with the crate
pub fn register_default_operations(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    append::register(builder)?;
    limit::register(builder)?;
    field_filter::register(builder)?;
    generic::register(builder)?;
    Ok(())
}

/// Single object argument at `index`
pub(crate) fn object_arg(
    args: &[Argument],
    index: usize,
) -> Result<&Arc<dyn DataObject>, OperationError> {
    args.get(index)
        .and_then(Argument::as_object)
        .ok_or_else(|| {
            OperationError::Internal(format!("Argument {} is not a single object", index))
        })
}

/// List argument at `index`
pub(crate) fn list_arg(
    args: &[Argument],
    index: usize,
) -> Result<&[Arc<dyn DataObject>], OperationError> {
    args.get(index)
        .and_then(Argument::as_list)
        .ok_or_else(|| OperationError::Internal(format!("Argument {} is not a list", index)))
}
