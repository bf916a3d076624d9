pub mod assertions;
pub mod engine;
pub mod mock;
pub mod scheduler;
pub mod types;


pub use assertions::evaluate;
pub use engine::*;
pub use mock::{MockCall, MockEngine, MockScript};
pub use scheduler::*;
pub use types::*;
