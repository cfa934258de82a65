pub mod dispatcher; // Operation context and retry loop
pub mod observer;
pub mod ranker;
pub mod registry;

pub use dispatcher::*;
pub use observer::*;
pub use ranker::*;
pub use registry::*;
