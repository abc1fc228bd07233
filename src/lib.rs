pub mod app;
pub mod engine;
pub mod shutdown;

pub use app::{load_inputs, Application};
pub use engine::{EnvelopeEngine, EnvelopeEngineFactory};
pub use shutdown::ShutdownManager;
