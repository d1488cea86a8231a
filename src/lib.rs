pub mod adapter;
pub mod api;
pub mod chain;
pub mod codec;
pub mod config;
pub mod contract;
pub mod fallback;
pub mod host;
pub mod invoke;
pub mod notify;
pub mod preview;
pub mod registry;
