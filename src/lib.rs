pub mod config;
pub mod patterns;
pub mod archive;
pub mod scanner;
pub mod packer;
pub mod prompt;
pub mod github;
pub mod gemini;
pub mod readme;
pub mod history;
pub mod server;
