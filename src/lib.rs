pub mod config;
pub mod error;
pub mod models;
pub mod objects;
pub mod ops;
pub mod services;
pub mod validation;

pub use error::*;
pub use models::*;
pub use objects::{Argument, DataObject, RowListObject, SqlObject, SqlStore};
pub use services::*;
pub use validation::*;
