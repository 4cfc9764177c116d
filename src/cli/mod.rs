mod args;
pub mod repl;

pub use args::{Args, OutputFormat};
