pub mod config;
pub mod record;
pub mod relay;
pub mod scanner;
pub mod sink;
pub mod switchbot;
