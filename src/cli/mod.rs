// CLI module
// Command-line interface, argument parsing and command execution

mod args;
mod commands;

pub use args::{
    AllocateArgs, BatchArgs, CliArgs, Command, DocumentKind, ImportArgs, ModeArg, PreviewArgs,
    StatusFilter, UploadArgs,
};
pub use commands::run;

use clap::Parser;

/// Parse command-line arguments using clap
///
/// If parsing fails (invalid arguments, missing subcommand, or `--help`),
/// clap prints an error or the help text and exits the process.
pub fn parse_args() -> CliArgs {
    CliArgs::parse()
}
