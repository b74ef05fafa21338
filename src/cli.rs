use crate::collect::collect_report;
use crate::config::{RunRequest, ServiceConfig};
use crate::error::RunError;
use crate::model::RunStatus;
use crate::render::{self, Format};
use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gitlab-commits")]
#[command(about = "Collect every commit made on a GitLab instance within a time window")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one collection and write the report to a file
    Fetch {
        #[arg(long, help = "GitLab instance URL, e.g. https://gitlab.example.com")]
        url: String,

        #[arg(long = "admin-token", env = "GITLAB_TOKEN", hide_env_values = true, help = "Administrator personal access token")]
        admin_token: String,

        #[arg(long, short, default_value = "gitlab_commits.txt", help = "Output file (extension becomes .json for --format json)")]
        output: PathBuf,

        #[arg(long, default_value_t = 1, help = "Number of days to include, today counting as the first")]
        days: u32,

        #[arg(long, default_value = "txt", help = "Output format: txt or json")]
        format: String,

        #[arg(long, help = "Verbose logging")]
        debug: bool,

        #[arg(long, default_value_t = 0, help = "Concurrent projects (0 = 4 per core, at most 32)")]
        threads: usize,

        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration, help = "Timeout for each HTTP request")]
        timeout: Duration,

        #[arg(long = "max-retries", default_value_t = 5, help = "Attempts per request before giving up")]
        max_retries: u32,
    },
    /// Serve the collection over HTTP (API_HOST, API_PORT, GITLAB_HTTP_TIMEOUT)
    Serve {
        #[arg(long, help = "Verbose logging")]
        debug: bool,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn execute(self) -> Result<ExitCode> {
        match self.command {
            Commands::Fetch {
                url,
                admin_token,
                output,
                days,
                format,
                debug,
                threads,
                timeout,
                max_retries,
            } => {
                init_tracing(debug);
                let request = RunRequest {
                    gitlab_url: url,
                    admin_token,
                    days,
                    threads,
                    timeout,
                    max_retries,
                };
                fetch(request, &format, output, debug).await
            }
            Commands::Serve { debug } => {
                init_tracing(debug);
                let config = ServiceConfig::from_env()?;
                crate::server::serve(config).await?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

async fn fetch(request: RunRequest, format: &str, output: PathBuf, debug: bool) -> Result<ExitCode> {
    let outcome = async {
        let format: Format = format.parse()?;
        request.validate()?;
        let report = collect_report(&request, progress_bar(debug)).await?;
        let bytes = render::render(&report, format)?;
        let path = render::output_path(&output, format);
        std::fs::write(&path, bytes)?;
        Ok::<_, RunError>((report, path))
    }
    .await;

    match outcome {
        Ok((report, path)) => {
            render::print_summary(&report, &path);
            Ok(match report.metadata.status {
                RunStatus::Complete => ExitCode::SUCCESS,
                RunStatus::Partial => ExitCode::from(2),
            })
        }
        Err(err) => {
            eprintln!("{} {}", style("error:").red().bold(), err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn progress_bar(debug: bool) -> ProgressBar {
    // Debug logs and a live bar fight over the terminal.
    if debug {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} projects {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "gitlab_commits=debug,tower_http=debug"
    } else {
        "gitlab_commits=info,tower_http=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(debug)
        .try_init();
}

/// Exposed so `main` can report failures the same way `fetch` does.
pub fn report_fatal(err: &anyhow::Error) {
    eprintln!("{} {:#}", style("error:").red().bold(), err);
}
