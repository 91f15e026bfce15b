use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use page_vision::config::{self, SuiteConfig};
use page_vision::diff::{DiffSink, DisabledSink, HttpDiffConfig, HttpDiffSink, check_health};
use page_vision::driver::{MockFramebuffer, MockPage};
use page_vision::runner::{CaptureResult, CaptureRunner, FailOn, RunReport};
use page_vision::session::{Session, cleanup_old_sessions, list_sessions};

/// Page Vision - visual regression capture for web pages
#[derive(Parser, Debug)]
#[command(
    name = "page-vision",
    about = "Deterministic visual regression snapshots: plan, stabilize, capture, submit",
    after_help = "ENVIRONMENT VARIABLES:\n\
        PAGE_VISION_BASE_URL              Base URL under test (legacy: BASE_URL)\n\
        PAGE_VISION_DIFF_ENDPOINT         Diff service snapshot endpoint\n\
        PAGE_VISION_DIFF_TOKEN            Diff service token (submissions disabled without it)\n\
        PAGE_VISION_SESSION_DIR           Base directory for sessions\n\
        PAGE_VISION_MAX_RETRIES           Stability retries per unit\n\
        PAGE_VISION_BACKOFF_BASE_MS       Delay before the first retry\n\
        PAGE_VISION_BACKOFF_FACTOR        Multiplier for later retries\n\
        PAGE_VISION_VIEWPORTS             Default viewports (presets or WxH, comma-separated)\n\
        RUST_LOG                          Log filter (default: info)"
)]
struct Args {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Expand a suite into its snapshot plan without capturing anything
    Plan {
        /// Suite file (JSON)
        #[arg(short, long)]
        suite: PathBuf,

        /// Only routes carrying this tag (e.g. "smoke")
        #[arg(short, long)]
        tag: Option<String>,

        /// Output the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a suite against the scripted mock browser
    Run {
        /// Suite file (JSON)
        #[arg(short, long)]
        suite: PathBuf,

        /// Only routes carrying this tag (e.g. "smoke")
        #[arg(short, long)]
        tag: Option<String>,

        /// Which results fail the run (overrides the suite)
        #[arg(long, value_enum)]
        fail_on: Option<FailOn>,

        /// Directory for local artifacts (default: auto-generated in session dir)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep local artifacts after completion (default: cleanup unless --output is specified)
        #[arg(long, short = 'k')]
        keep: bool,

        /// Output the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether the diff service is reachable
    Health {
        /// Diff service endpoint
        #[arg(long, env = "PAGE_VISION_DIFF_ENDPOINT", default_value = config::DEFAULT_DIFF_ENDPOINT)]
        endpoint: String,

        /// Timeout in seconds
        #[arg(long, default_value = "5")]
        timeout: u64,
    },

    /// List local artifact sessions, optionally removing old ones
    Sessions {
        /// Remove sessions last modified more than this many hours ago
        #[arg(long)]
        cleanup_older_than: Option<u64>,
    },

    /// Create a mock framebuffer screenshot for testing
    Mock {
        /// Width in pixels
        #[arg(short = 'W', long, default_value = "800")]
        width: u32,

        /// Height in pixels
        #[arg(short = 'H', long, default_value = "600")]
        height: u32,

        /// Output file path
        #[arg(short, long, default_value = "./mock_screenshot.png")]
        output: PathBuf,

        /// Fill color as hex (e.g., "ff0000" for red)
        #[arg(short, long, default_value = "000000")]
        color: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Some(Commands::Plan { suite, tag, json }) => {
            let suite = SuiteConfig::load(&suite)?;
            let mut plan = suite.build_plan()?;
            if let Some(tag) = &tag {
                plan = plan.with_tag(tag);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                println!("Plan: {} units against {}", plan.len(), suite.base_url);
                for unit in &plan {
                    println!("  {:>3}  {}  {}", unit.index, unit.identifier, unit.route.url(&suite.base_url));
                }
            }
        }

        Some(Commands::Run {
            suite: suite_path,
            tag,
            fail_on,
            output,
            keep,
            json,
        }) => {
            let suite = SuiteConfig::load(&suite_path)?;
            let mut plan = suite.build_plan()?;
            if let Some(tag) = &tag {
                plan = plan.with_tag(tag);
            }
            let fail_on = fail_on.unwrap_or(suite.fail_on);

            // Session keeps artifacts the diff service did not take
            let session = match &output {
                Some(dir) => Session::in_dir(dir).keep(true),
                None => {
                    let name = suite_path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_string())
                        .unwrap_or_else(|| "run".to_string());
                    Session::with_name(&name).keep(keep)
                }
            }
            .with_base_url(suite.base_url.clone());
            session.init()?;
            let session = Arc::new(session);

            let diff_config = HttpDiffConfig::default();
            let sink: Arc<dyn DiffSink> = if diff_config.token.is_some() {
                Arc::new(HttpDiffSink::new(diff_config))
            } else {
                warn!("PAGE_VISION_DIFF_TOKEN not set - diff submissions disabled");
                Arc::new(DisabledSink)
            };

            let runner = CaptureRunner::new(suite.runner_options(), sink).with_fallback(Arc::clone(&session));
            let cancel = runner.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, cancelling run");
                    cancel.cancel();
                }
            });

            // The mock browser can establish any precondition the suite names
            let mut page = plan
                .iter()
                .flat_map(|unit| unit.route.preconditions.iter())
                .fold(MockPage::new(), |page, precondition| page.satisfies(precondition.clone()));
            let report = runner.run(&plan, &mut page).await;
            let report_path = session.write_report(&report)?;
            info!(path = %report_path.display(), "run report written");

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
                println!("\nSession: {}", session.dir.display());
            }

            if !report.passed(fail_on) {
                return Ok(ExitCode::FAILURE);
            }
        }

        Some(Commands::Health { endpoint, timeout }) => {
            if check_health(&endpoint, timeout).await? {
                println!("Diff service responding at {}", endpoint);
            } else {
                eprintln!("Diff service not responding at {}", endpoint);
                return Ok(ExitCode::FAILURE);
            }
        }

        Some(Commands::Sessions { cleanup_older_than }) => {
            let base = PathBuf::from(config::session_base_dir());
            if let Some(hours) = cleanup_older_than {
                let removed = cleanup_old_sessions(&base, Duration::from_secs(hours.saturating_mul(3600)))?;
                println!("Removed {} session(s) older than {}h", removed, hours);
            }

            let sessions = list_sessions(&base)?;
            println!("Sessions in {}: {}", base.display(), sessions.len());
            for dir in sessions {
                // Existing directories are opened kept, so dropping them deletes nothing
                let captures = Session::in_dir(&dir).list_captures()?.len();
                println!("  {}  ({} capture(s))", dir.display(), captures);
            }
        }

        Some(Commands::Mock {
            width,
            height,
            output,
            color,
        }) => {
            let color_bytes = parse_hex_color(&color)?;
            let mut fb = MockFramebuffer::with_color(width, height, color_bytes);

            // Draw some sample content
            fb.draw_text(10, 10, "Mock Framebuffer", [255, 255, 255], color_bytes);
            fb.draw_rect(10, 30, 100, 50, [128, 128, 128]);

            let artifact = fb.to_artifact()?;
            std::fs::write(&output, &artifact.image_data)?;

            println!("Created mock screenshot: {}", output.display());
            println!("  Size: {}x{}", artifact.width, artifact.height);
        }

        None => {
            println!("Page Vision - visual regression capture for web pages");
            println!();
            println!("Usage: page-vision <COMMAND>");
            println!();
            println!("Commands:");
            println!("  plan      Expand a suite into its snapshot plan");
            println!("  run       Capture a suite and submit it to the diff service");
            println!("  health    Check whether the diff service is reachable");
            println!("  sessions  List or clean up local artifact sessions");
            println!("  mock      Create a mock framebuffer screenshot for testing");
            println!();
            println!("Run with --help for more information.");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_report(report: &RunReport) {
    let summary = report.summary();
    println!(
        "Run completed: {} captured, {} degraded, {} failed, {} skipped (of {})",
        summary.captured, summary.degraded, summary.failed, summary.skipped, summary.planned
    );
    if report.cancelled {
        println!("  Run was cancelled before completion");
    }
    for unit in &report.units {
        let detail = match &unit.result {
            CaptureResult::Captured(artifact) => artifact
                .local_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            CaptureResult::Retryable { reason, .. } => reason.clone(),
            CaptureResult::Failed { reason } => reason.clone(),
        };
        println!("  [{:<8}] {}  {}", unit.result.label(), unit.identifier, detail);
    }
}

fn parse_hex_color(hex: &str) -> Result<[u8; 3], Box<dyn Error>> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err("Color must be 6 hex digits (e.g., 'ff0000')".into());
    }
    let r = u8::from_str_radix(&hex[0..2], 16)?;
    let g = u8::from_str_radix(&hex[2..4], 16)?;
    let b = u8::from_str_radix(&hex[4..6], 16)?;
    Ok([r, g, b])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_color() {
        assert_eq!(parse_hex_color("ff8000").unwrap(), [255, 128, 0]);
        assert_eq!(parse_hex_color("#0a0B0c").unwrap(), [10, 11, 12]);
        assert!(parse_hex_color("fff").is_err());
        assert!(parse_hex_color("gg0000").is_err());
    }

    #[test]
    fn test_parse_hex_color_rejects_non_ascii() {
        // Six bytes, but not six characters
        assert_eq!("a\u{e9}\u{e9}b".len(), 6);
        assert!(parse_hex_color("a\u{e9}\u{e9}b").is_err());
    }
}
