use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn try_main() -> anyhow::Result<()> {
    catalogify::logging::init().context("init logging")?;

    let cli = catalogify::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        catalogify::cli::Command::Convert(args) => {
            catalogify::convert::run(args).context("convert")?;
        }
        catalogify::cli::Command::Enrich(args) => {
            catalogify::enrich::run(args).context("enrich")?;
        }
        catalogify::cli::Command::CheckLinks(args) => {
            catalogify::links::run(args).context("check links")?;
        }
        catalogify::cli::Command::Run(args) => {
            catalogify::pipeline::run(args).context("run")?;
        }
    }

    Ok(())
}
