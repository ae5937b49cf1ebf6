//! CLI for reflectgen - style-reflecting image generation.

use clap::{Args, Parser, Subcommand, ValueEnum};
use reflectgen::{
    GenerationRequest, PollConfig, PollProgress, ReflectError, RunPodClient, Session, Vote,
    Workflow,
};
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Exit status after Ctrl-C, as a shell reports SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "reflectgen")]
#[command(about = "Generate an image from a prompt, reflected through a style image")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a prompt and style image, wait for the result
    Generate(GenerateArgs),

    /// Send a vote for an earlier prompt/style image pair
    Feedback(FeedbackArgs),
}

#[derive(Args)]
struct ClientArgs {
    /// RunPod API key (default: RUNPOD_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Serverless endpoint id (default: RUNPOD_ENDPOINT_ID)
    #[arg(long)]
    endpoint_id: Option<String>,

    /// API base URL (default: RUNPOD_BASE_URL or https://api.runpod.ai/v2)
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt
    prompt: String,

    /// Style reference image
    #[arg(short, long)]
    style: Option<PathBuf>,

    /// Output file path (default: reflectgen-<timestamp>.<ext>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Vote on the result without asking
    #[arg(long, value_enum)]
    vote: Option<VoteArg>,

    /// Never ask for a vote
    #[arg(long)]
    no_ask: bool,

    /// Milliseconds between status checks
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Give up after this many seconds (0 waits forever)
    #[arg(long, default_value_t = 600)]
    timeout_secs: u64,

    /// Give up after this many status checks
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Give up after this many failed status checks in a row
    #[arg(long, default_value_t = 5)]
    max_poll_errors: u32,

    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Args)]
struct FeedbackArgs {
    /// The vote
    #[arg(value_enum)]
    vote: VoteArg,

    /// Prompt of the rated submission
    #[arg(long)]
    prompt: String,

    /// Style image of the rated submission
    #[arg(short, long)]
    style: PathBuf,

    #[command(flatten)]
    client: ClientArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VoteArg {
    Up,
    Down,
}

impl From<VoteArg> for Vote {
    fn from(arg: VoteArg) -> Self {
        match arg {
            VoteArg::Up => Vote::Up,
            VoteArg::Down => Vote::Down,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let outcome = match cli.command {
        Commands::Generate(args) => generate(args, cli.json).await,
        Commands::Feedback(args) => feedback(args, cli.json).await,
    };

    if let Err(err) = outcome {
        eprintln!("Error: {err:#}");
        let code = match err.downcast_ref::<ReflectError>() {
            Some(ReflectError::Cancelled) => EXIT_INTERRUPTED,
            Some(e) if e.is_user_error() => {
                eprintln!("Run `reflectgen --help` for usage.");
                2
            }
            _ => 1,
        };
        std::process::exit(code);
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reflectgen=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_client(args: &ClientArgs) -> anyhow::Result<RunPodClient> {
    let mut builder = RunPodClient::builder();
    if let Some(key) = &args.api_key {
        builder = builder.api_key(key);
    }
    if let Some(id) = &args.endpoint_id {
        builder = builder.endpoint_id(id);
    }
    if let Some(url) = args
        .base_url
        .clone()
        .or_else(|| std::env::var("RUNPOD_BASE_URL").ok())
    {
        builder = builder.base_url(url);
    }
    Ok(builder.build()?)
}

fn poll_config(args: &GenerateArgs) -> PollConfig {
    let timeout = (args.timeout_secs > 0).then(|| Duration::from_secs(args.timeout_secs));
    PollConfig::default()
        .interval(Duration::from_millis(args.poll_interval_ms))
        .timeout(timeout)
        .max_attempts(args.max_attempts)
        .max_consecutive_errors(args.max_poll_errors)
}

/// Single-line "Generating..." indicator on stderr. Cleared on drop, so the
/// terminal is left clean however generation ends.
struct ProgressLine {
    enabled: bool,
}

impl ProgressLine {
    fn new(enabled: bool) -> Self {
        let line = Self { enabled };
        line.draw("Generating", 0);
        line
    }

    fn update(&self, progress: &PollProgress) {
        let label = match progress.consecutive_errors {
            0 => "Processing",
            _ => "Processing (retrying)",
        };
        self.draw(label, progress.dots());
    }

    fn draw(&self, label: &str, dots: usize) {
        if !self.enabled {
            return;
        }
        let mut err = std::io::stderr();
        let _ = write!(err, "\r\x1b[2K{label}{}", ".".repeat(dots));
        let _ = err.flush();
    }
}

impl Drop for ProgressLine {
    fn drop(&mut self) {
        if self.enabled {
            let mut err = std::io::stderr();
            let _ = write!(err, "\r\x1b[2K");
            let _ = err.flush();
        }
    }
}

async fn generate(args: GenerateArgs, json_output: bool) -> anyhow::Result<()> {
    let client = build_client(&args.client)?;
    let mut workflow = Workflow::new(client).with_poll_config(poll_config(&args));

    // Ctrl-C abandons the run at any stage, including submission.
    let result = {
        let progress = ProgressLine::new(!json_output && std::io::stderr().is_terminal());
        let run = workflow.generate(&args.prompt, args.style.as_deref(), |p| progress.update(p));
        tokio::select! {
            result = run => result?,
            _ = tokio::signal::ctrl_c() => return Err(ReflectError::Cancelled.into()),
        }
    };

    let format = result.image_format();
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(format.extension()));
    result.save(&output)?;

    if json_output {
        let summary = serde_json::json!({
            "success": true,
            "prompt": workflow.session().last_request().prompt,
            "final_prompt": result.final_prompt,
            "output": output.display().to_string(),
            "format": format.extension(),
            "mime_type": format.mime_type(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Original prompt: {}", workflow.session().last_request().prompt);
        println!("Final prompt:    {}", result.final_prompt);
        println!("Saved image:     {}", output.display());
    }

    let vote = match args.vote {
        Some(v) => Some(Vote::from(v)),
        None if !args.no_ask && !json_output && std::io::stdin().is_terminal() => {
            ask_vote().await?
        }
        None => None,
    };

    if let Some(vote) = vote {
        match workflow.send_feedback(vote).await {
            Ok(()) => {
                if !json_output {
                    println!("Thanks for your feedback!");
                }
            }
            // soft failure: the image is already saved
            Err(e) => eprintln!("Failed to send feedback: {e}"),
        }
    }

    Ok(())
}

async fn feedback(args: FeedbackArgs, json_output: bool) -> anyhow::Result<()> {
    let client = build_client(&args.client)?;
    let style = tokio::fs::read(&args.style).await?;
    let session = Session::with_last_request(GenerationRequest::new(args.prompt.trim(), &style));
    let workflow = Workflow::new(client).with_session(session);

    let vote = Vote::from(args.vote);
    workflow.send_feedback(vote).await?;

    if json_output {
        let summary = serde_json::json!({ "success": true, "vote": vote });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Thanks for your feedback!");
    }
    Ok(())
}

/// Asks for an optional vote. Ctrl-C at the prompt exits; the image is
/// already saved by then.
async fn ask_vote() -> anyhow::Result<Option<Vote>> {
    print!("Rate this result [u]p / [d]own / Enter to skip: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        read = stdin.read_line(&mut line) => {
            read?;
        }
        _ = tokio::signal::ctrl_c() => {
            println!();
            // a pending stdin read would hold up runtime shutdown
            std::process::exit(EXIT_INTERRUPTED);
        }
    }

    if line.trim().is_empty() {
        return Ok(None);
    }

    match line.parse::<Vote>() {
        Ok(vote) => Ok(Some(vote)),
        Err(e) => {
            eprintln!("{e}; skipping feedback");
            Ok(None)
        }
    }
}

fn default_output_path(extension: &str) -> PathBuf {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    Path::new(".").join(format!("reflectgen-{stamp}.{extension}"))
}
