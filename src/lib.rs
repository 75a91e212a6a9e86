pub mod api;
pub mod app;
pub mod audit;
pub mod calls;
pub mod chat;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod global;
pub mod recording;
pub mod state_sync;
pub mod token;
