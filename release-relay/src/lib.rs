pub mod cli;
pub mod dispatcher;
pub mod github;
pub mod health;
pub mod load_config;
pub mod naming;
pub mod telegram;

pub use cli::{run, Cli, Commands};
