pub mod args;
pub mod commands;

pub use args::{Cli, Commands, OverrideArgs};
pub use commands::{run, Outcome};
