use crate::demo::{run_demo, run_sweep, DemoArgs, SweepArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use ses_billing::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "SES Billing",
    about = "Run the SES monthly billing service or drive its workflows from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// List contracts nearing their end date and terminate the ones that lapsed
    SweepContracts(SweepArgs),
    /// Walk one month through orders, batches, requests and payment on sample data
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::SweepContracts(args) => run_sweep(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["ses-billing-api"]).expect("parses");
        assert!(cli.command.is_none());
    }

    #[test]
    fn sweep_accepts_an_as_of_date() {
        let cli = Cli::try_parse_from([
            "ses-billing-api",
            "sweep-contracts",
            "--as-of",
            "2024-07-01",
            "--notice-days",
            "14",
        ])
        .expect("parses");
        match cli.command {
            Some(Command::SweepContracts(args)) => {
                let as_of = args.as_of.map(|date| date.to_string());
                assert_eq!(as_of.as_deref(), Some("2024-07-01"));
                assert_eq!(args.notice_days, Some(14));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn demo_rejects_invalid_months() {
        let parsed = Cli::try_parse_from(["ses-billing-api", "demo", "--year-month", "2024-13"]);
        assert!(parsed.is_err());
    }
}
