pub mod scanner;
pub mod switchbot;
