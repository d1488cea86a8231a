pub mod error;
pub mod handler_utils;
pub mod image_preview;
pub mod routes;
pub mod server;
pub mod ws;
