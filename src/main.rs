use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod config;
mod format;
mod pin;
mod predicate;
mod reference;
mod resolver;

use cli::args::{BackendArgs, FilterArgs, InputArgs};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the image references in a document that match the filters
    #[command(visible_alias = "f")]
    Find {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        input: InputArgs,
        /// Print fully qualified references (docker.io/library/nginx:latest)
        #[arg(long)]
        canonical: bool,
        /// Print JSON instead of one reference per line
        #[arg(long)]
        json: bool,
    },
    /// Exit with 0 if the document has a reference matching the filters, 1 otherwise
    Contains {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        input: InputArgs,
    },
    /// List every tag that currently points to the same image as a reference
    #[command(visible_alias = "ls")]
    List {
        /// Image reference (e.g. nginx:1.25)
        reference: String,
        #[command(flatten)]
        backend: BackendArgs,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Rewrite matching references to digest-pinned references
    Pin {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        backend: BackendArgs,
        #[command(flatten)]
        input: InputArgs,
        /// Form of the pinned reference (digest, name-digest, name-tag-digest)
        #[arg(long, default_value = "name-digest")]
        pin_format: String,
        /// Replace the tag with the most precise tag sharing the digest (e.g. 1 -> 1.25.3)
        #[arg(long)]
        precise_tag: bool,
        /// Fail on the first reference that cannot be resolved instead of leaving it unchanged
        #[arg(long)]
        fail_fast: bool,
        /// Rewrite the input file instead of printing to stdout
        #[arg(long, short = 'i')]
        in_place: bool,
    },
}

async fn run(command: &Commands) -> Result<u8> {
    let config = config::Config::load()?;
    let registry = format::FormatRegistry::builtin();

    match command {
        Commands::Find {
            filters,
            backend,
            input,
            canonical,
            json,
        } => {
            cli::find::find_references(
                &registry, &config, filters, backend, input, *canonical, *json,
            )
            .await
        }
        Commands::Contains {
            filters,
            backend,
            input,
        } => cli::find::contains_reference(&registry, &config, filters, backend, input).await,
        Commands::List {
            reference,
            backend,
            json,
        } => cli::list::list_tags(&config, reference, backend, *json).await,
        Commands::Pin {
            filters,
            backend,
            input,
            pin_format,
            precise_tag,
            fail_fast,
            in_place,
        } => {
            let flags = cli::pin::PinFlags {
                pin_format: pin_format.clone(),
                precise_tag: *precise_tag,
                fail_fast: *fail_fast,
                in_place: *in_place,
            };
            cli::pin::pin_references(&registry, &config, filters, backend, input, &flags).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(&cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(cli::exit::exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_pin() {
        let cli = Cli::try_parse_from([
            "refpin",
            "pin",
            "--unpinned",
            "--backend",
            "daemon",
            "--pin-format",
            "name-tag-digest",
            "--precise-tag",
            "-i",
            "Dockerfile",
        ])
        .unwrap();
        match cli.command {
            Commands::Pin {
                filters,
                backend,
                input,
                pin_format,
                precise_tag,
                fail_fast,
                in_place,
            } => {
                assert!(filters.unpinned);
                assert_eq!(backend.backend.as_deref(), Some("daemon"));
                assert_eq!(input.file, "Dockerfile");
                assert_eq!(pin_format, "name-tag-digest");
                assert!(precise_tag && in_place && !fail_fast);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_usage_error_exit_code() {
        let err = Cli::try_parse_from(["refpin", "find", "--bogus"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
