use gitlab_commits::cli::{self, Cli};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.execute().await {
        Ok(code) => code,
        Err(err) => {
            cli::report_fatal(&err);
            ExitCode::FAILURE
        }
    }
}
