mod browser;
mod job;
mod page;
mod sanitize;
mod transport;
mod trim;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser};
use tokio::time::sleep;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use browser::Browser;
use job::{CaptureJob, RawOptions};
use page::Clip;

/// Web Screenshot Utility
#[derive(Parser, Debug)]
#[command(name = "webshot", version, about, disable_help_flag = true)]
struct Cli {
    /// URL (website) to screenshot.
    #[arg(short, long)]
    url: Option<String>,

    /// Batch file with one job's flags per line. Supersedes all other options.
    #[arg(short, long)]
    batch: Option<PathBuf>,

    /// Number of seconds to wait for the page to load.
    #[arg(short, long, default_value = job::DEFAULT_TIME)]
    time: String,

    /// Leftmost pixel.
    #[arg(short, long, default_value = job::DEFAULT_X)]
    x: String,

    /// Top pixel.
    #[arg(short, long, default_value = job::DEFAULT_Y)]
    y: String,

    /// Image width.
    #[arg(short, long, default_value = job::DEFAULT_WIDTH)]
    width: String,

    /// Image height.
    #[arg(short, long, default_value = job::DEFAULT_HEIGHT)]
    height: String,

    /// Absolute or relative path to save the screenshot
    /// (.png, .jpg, .jpeg or .webp).
    #[arg(short, long)]
    out: Option<String>,

    /// Auto-crop same-color borders.
    #[arg(short, long)]
    crop: bool,

    /// Credentials in username:password format.
    #[arg(short, long)]
    auth: Option<String>,

    /// Enable debug mode (verbose logging, visible browser window).
    #[arg(short, long)]
    debug: bool,

    /// Print help.
    #[arg(long, action = ArgAction::Help)]
    help: Option<bool>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.debug { "webshot=debug" } else { "webshot=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(cli).await {
        error!("screenshot run failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let jobs = match (&cli.batch, &cli.url) {
        (Some(path), _) => job::parse_batch_file(path)?,
        (None, Some(url)) => vec![CaptureJob::resolve(&RawOptions {
            url: url.clone(),
            time: cli.time.clone(),
            x: cli.x.clone(),
            y: cli.y.clone(),
            width: cli.width.clone(),
            height: cli.height.clone(),
            out: cli.out.clone(),
            crop: cli.crop,
            auth: cli.auth.clone(),
        })?],
        (None, None) => {
            Cli::command().print_help()?;
            return Ok(());
        }
    };

    if jobs.is_empty() {
        info!("no capture jobs resolved, nothing to do");
        return Ok(());
    }

    let browser = Browser::launch(!cli.debug).await?;
    info!("browser opened");

    let result = capture_all(&browser, &jobs).await;

    browser.close().await?;
    info!("browser closed");
    result?;

    info!("screenshot run completed");
    Ok(())
}

/// Runs every job in order over a single page. The first failure aborts
/// the remaining queue.
async fn capture_all(browser: &Browser, jobs: &[CaptureJob]) -> Result<()> {
    let page = browser.new_page().await?;
    info!("page created");

    page.set_viewport(1920, 1080).await?;
    debug!("viewport set");

    for job in jobs {
        if let Some(credentials) = &job.auth {
            page.authenticate(credentials).await?;
            debug!(username = %credentials.username, "credentials entered");
        }

        page.goto(&job.url).await?;
        info!(url = %job.url, "navigated");

        debug!(seconds = job.wait.as_secs_f64(), "waiting for page to settle");
        sleep(job.wait).await;

        let tmp = job.tmp_file();
        let out = job.out_file();
        let clip = Clip {
            x: job.x,
            y: job.y,
            width: job.width,
            height: job.height,
        };
        page.screenshot(clip, job.format, Path::new(&tmp)).await?;
        debug!(path = %tmp, "temp screenshot taken");

        if job.crop {
            trim::trim_uniform_borders(Path::new(&tmp), Path::new(&out), job.format)?;
            tokio::fs::remove_file(&tmp).await?;
            info!(path = %out, "image cropped and saved");
        } else {
            tokio::fs::rename(&tmp, &out).await?;
            info!(path = %out, "image saved");
        }
    }

    page.close().await?;
    info!("page closed");
    Ok(())
}
