pub mod description;
pub mod representation;
pub mod signature;
pub mod variant;

pub use description::*;
pub use representation::*;
pub use signature::*;
pub use variant::*;
