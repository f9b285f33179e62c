//! API request handlers

mod events;
mod health;
mod members;
mod punishments;
mod violations;

pub use events::*;
pub use health::*;
pub use members::*;
pub use punishments::*;
pub use violations::*;
