//! `sdprompt` -- prompt to verified image artifacts.
//!
//! Configuration is read from flags, `SDPROMPT_*` environment variables
//! (optionally from a `.env` file) and a YAML file, in that precedence.
//!
//! | Exit code | Meaning                                  |
//! |-----------|------------------------------------------|
//! | 0         | every image stored                       |
//! | 1         | fatal error (config, spec, usage)        |
//! | 2         | no image stored, or verification failed  |
//! | 3         | some images stored                       |

mod args;
mod commands;
mod logging;
mod summary;

use clap::Parser;

use args::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Generate(args) => commands::generate(&cli.global, args).await,
        Command::Config(args) => commands::export_config(&cli.global, args),
        Command::Verify(args) => commands::verify(&cli.global, args).await,
    };

    let code = result.unwrap_or_else(|e| {
        tracing::error!(error = %e, "sdprompt failed");
        eprintln!("error: {e:#}");
        commands::EXIT_FATAL
    });
    std::process::exit(code);
}
