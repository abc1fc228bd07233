pub mod revalidation_store;
pub mod validation_engine;

pub use revalidation_store::*;
pub use validation_engine::*;
