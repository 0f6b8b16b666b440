//! Task dispatch: the task matrix, backend wiring and the worker pool.

mod executor;
mod matrix;
mod services;

pub use executor::*;
pub use matrix::*;
pub use services::*;
