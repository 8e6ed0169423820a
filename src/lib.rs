pub mod color;
pub mod config;
pub mod dataset;
pub mod faces;
pub mod images;
pub mod pipeline;
pub mod record;
pub mod slug;
pub mod store;

/// Application name for XDG paths
pub const APP_NAME: &str = "artpipe";
