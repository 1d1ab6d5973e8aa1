use crate::utils::{artifact_filename, format_bytes, format_duration};
use crate::{CaptureFormat, Config, JobEvent, JobOptions, ScreenshotService};
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "screenshot-queue")]
#[command(about = "Queue-backed web screenshot capture with a shared headless Chrome")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path (JSON)")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Maximum jobs executing at once")]
    pub max_concurrency: Option<usize>,

    #[arg(long, help = "Navigation timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Number of job records kept for status queries")]
    pub history_size: Option<usize>,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Serve Prometheus metrics on this port")]
    pub metrics_port: Option<u16>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Capture a single URL
    Single {
        #[arg(short, long, help = "URL to capture")]
        url: String,

        #[arg(short, long, help = "Output file path")]
        output: PathBuf,

        #[command(flatten)]
        capture: CaptureArgs,
    },

    /// Capture every URL listed in a file (one per line)
    Batch {
        #[arg(short, long, help = "Input file containing URLs")]
        input: PathBuf,

        #[arg(short, long, help = "Output directory for screenshots")]
        output: PathBuf,

        #[command(flatten)]
        capture: CaptureArgs,
    },

    /// Validate a configuration file
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct CaptureArgs {
    #[arg(long, help = "Output format (jpeg, png, webp)")]
    pub format: Option<CaptureFormat>,

    #[arg(long, help = "Quality for jpeg and webp (0-100)")]
    pub quality: Option<u8>,

    #[arg(long, help = "Capture only the viewport instead of the whole page")]
    pub viewport_only: bool,

    #[arg(long, help = "Per-job navigation timeout in seconds")]
    pub job_timeout: Option<u64>,
}

impl CaptureArgs {
    pub fn job_options(&self) -> JobOptions {
        JobOptions {
            format: self.format,
            quality: self.quality,
            full_page: self.viewport_only.then_some(false),
            timeout: self.job_timeout.map(Duration::from_secs),
        }
    }
}

impl Cli {
    /// Layer command-line overrides on top of a file or default config.
    pub async fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .await
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(max_concurrency) = self.max_concurrency {
            config.max_concurrency = max_concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = Duration::from_secs(timeout);
        }
        if let Some(history_size) = self.history_size {
            config.max_history_size = history_size;
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.chrome_path = Some(chrome_path.clone());
        }

        config.validate()?;
        info!(
            "Max concurrency: {}, timeout: {:?}, history: {}",
            config.max_concurrency, config.timeout, config.max_history_size
        );
        Ok(config)
    }
}

pub struct CliRunner {
    pub service: ScreenshotService,
}

impl CliRunner {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let service = ScreenshotService::with_chrome(config)?;
        Ok(Self { service })
    }

    pub async fn run(&self, command: Commands) -> anyhow::Result<()> {
        match command {
            Commands::Single {
                url,
                output,
                capture,
            } => self.run_single(&url, &output, &capture).await,
            Commands::Batch {
                input,
                output,
                capture,
            } => self.run_batch(&input, &output, &capture).await,
            Commands::Validate { config } => validate_config(&config).await,
        }
    }

    pub async fn run_single(
        &self,
        url: &str,
        output: &Path,
        capture: &CaptureArgs,
    ) -> anyhow::Result<()> {
        info!("Taking screenshot of: {}", url);
        let result = self.service.screenshot(url, capture.job_options()).await?;

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(output, result.artifact.as_slice()).await?;

        println!("Screenshot captured successfully:");
        println!("  URL: {}", result.url);
        println!("  Output: {}", output.display());
        println!("  Format: {:?}", result.format);
        println!("  Size: {}", format_bytes(result.artifact.len()));
        println!("  Duration: {}", format_duration(result.duration));
        Ok(())
    }

    /// Submit every URL up front and let the scheduler queue them.
    pub async fn run_batch(
        &self,
        input: &Path,
        output: &Path,
        capture: &CaptureArgs,
    ) -> anyhow::Result<()> {
        let urls = read_urls_from_file(input).await?;
        info!("Loaded {} URLs from {}", urls.len(), input.display());
        fs::create_dir_all(output).await?;

        let progress = self.spawn_progress_reporter();
        let options = capture.job_options();

        let mut tickets = Vec::with_capacity(urls.len());
        for url in &urls {
            match self.service.submit(url, options.clone()) {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => warn!("Skipping {}: {}", url, e),
            }
        }

        let (mut success_count, mut error_count) = (0usize, urls.len() - tickets.len());
        for ticket in tickets {
            match ticket.outcome.await {
                Ok(result) => {
                    let path = output.join(artifact_filename(result.job_id, &result.url, result.format));
                    fs::write(&path, result.artifact.as_slice()).await?;
                    info!("Saved screenshot: {}", path.display());
                    success_count += 1;
                }
                Err(e) => {
                    error_count += 1;
                    warn!("Job {} failed: {}", ticket.job_id, e);
                }
            }
        }
        progress.abort();

        let summary = serde_json::to_vec_pretty(&self.service.list_all())?;
        fs::write(output.join("summary.json"), summary).await?;

        info!(
            "Batch processing completed. Success: {}, Errors: {}",
            success_count, error_count
        );
        if success_count == 0 && error_count > 0 {
            bail!("every screenshot in the batch failed");
        }
        Ok(())
    }

    fn spawn_progress_reporter(&self) -> tokio::task::JoinHandle<()> {
        let mut events = self.service.subscribe();
        let service = self.service.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(JobEvent::Completed { .. }) | Ok(JobEvent::Failed { .. }) => {
                        let load = service.current_load();
                        println!(
                            "Progress: {} active, {} queued, {} submitted",
                            load.active_jobs, load.queue_length, load.total_processed
                        );
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Progress reporter skipped {} events", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

pub async fn validate_config(path: &Path) -> anyhow::Result<()> {
    println!("Validating configuration: {}", path.display());
    let config = Config::from_file(path).await?;

    println!("Configuration is valid:");
    println!("  Max concurrency: {}", config.max_concurrency);
    println!("  Timeout: {:?}", config.timeout);
    println!("  History size: {}", config.max_history_size);
    println!("  Default format: {:?}", config.default_format);
    Ok(())
}

pub async fn read_urls_from_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;

    Ok(parse_url_list(&content))
}

/// One URL per line; blank lines and `#` comments are skipped.
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub fn setup_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_url_list() {
        let urls = parse_url_list("https://a.example\n\n# comment\n  https://b.example  \n");
        assert_eq!(urls, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_capture_args_to_job_options() {
        let args = CaptureArgs {
            format: Some(CaptureFormat::Webp),
            quality: Some(70),
            viewport_only: true,
            job_timeout: Some(10),
        };
        let options = args.job_options();
        assert_eq!(options.format, Some(CaptureFormat::Webp));
        assert_eq!(options.full_page, Some(false));
        assert_eq!(options.timeout, Some(Duration::from_secs(10)));

        assert_eq!(CaptureArgs::default().job_options(), JobOptions::default());
    }

    #[test]
    fn test_cli_parses_batch() {
        let cli = Cli::try_parse_from([
            "screenshot-queue",
            "--max-concurrency",
            "4",
            "batch",
            "--input",
            "urls.txt",
            "--output",
            "out",
            "--format",
            "png",
        ])
        .unwrap();

        assert_eq!(cli.max_concurrency, Some(4));
        match cli.command {
            Commands::Batch { capture, .. } => assert_eq!(capture.format, Some(CaptureFormat::Png)),
            _ => panic!("expected batch command"),
        }
    }
}
