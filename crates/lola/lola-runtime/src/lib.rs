mod rollback;
mod runtime;

pub use rollback::RollbackRegistry;
pub use runtime::Runtime;
