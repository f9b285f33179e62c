//! REST surface for the command layer

pub mod handlers;
pub mod router;
pub mod state;
