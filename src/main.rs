use clap::Parser;
use clap::error::ErrorKind;
use tracing_subscriber::EnvFilter;

use repo_relay::cli::{Cli, ExitCode, run};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::Success,
                _ => ExitCode::CommandLineError,
            };
            let _ = e.print();
            std::process::exit(code as i32);
        }
    };

    std::process::exit(run(cli) as i32);
}
