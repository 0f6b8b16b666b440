//! Backend clients: generation endpoints and the judging service.

mod generation;
mod judge;
mod jutge;
mod llm_client;
mod throttle;

pub use generation::*;
pub use judge::*;
pub use jutge::*;
pub use llm_client::*;
pub use throttle::*;
