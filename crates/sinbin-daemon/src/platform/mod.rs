//! Chat platform adapters
//!
//! The engine never talks to the platform directly; it goes through the
//! [`Platform`] trait so tests and development runs can use a simulated
//! community.

mod discord;
mod memory;
mod traits;

pub use discord::DiscordPlatform;
pub use memory::InMemoryPlatform;
pub use traits::Platform;
