pub mod audio;
pub mod config;
pub mod error;
pub mod live;
pub mod profile;
pub mod viz;
