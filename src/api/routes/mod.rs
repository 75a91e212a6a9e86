//! API route modules.

pub mod calls;
pub mod health;
pub mod recordings;
pub mod rooms;
pub mod token;
