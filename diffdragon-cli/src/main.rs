use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diffdragon_core::policy::{self, FileFilter, Policy};
use diffdragon_core::signature;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Diff Dragon: offline tooling for review policies and webhook payloads
#[derive(Parser, Debug)]
#[command(name = "diffdragon")]
#[command(about = "Offline tooling for Diff Dragon review policies", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective policy (a policy file merged over the defaults) as YAML
    Policy(PolicyArgs),
    /// Show whether each path would be reviewed under a policy
    Filter(FilterArgs),
    /// Print the X-Hub-Signature-256 value for a payload, for replaying deliveries
    Sign(SignArgs),
}

#[derive(Parser, Debug)]
struct PolicyArgs {
    /// Policy file; the built-in default policy when omitted
    path: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct FilterArgs {
    /// Policy file to evaluate against
    #[arg(long)]
    policy: PathBuf,

    /// Repository-relative paths to check
    #[arg(required = true, num_args = 1..)]
    paths: Vec<String>,
}

#[derive(Parser, Debug)]
struct SignArgs {
    /// Webhook secret shared with GitHub
    #[arg(long, env = "GITHUB_WEBHOOK_SECRET", hide_env_values = true)]
    secret: String,

    /// Payload file; reads stdin when omitted
    file: Option<PathBuf>,
}

fn load_policy(path: Option<&Path>) -> Result<Policy> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Failed to read policy file {}", path.display()))?;
            Ok(policy::parse(&raw))
        }
        None => Ok(Policy::default()),
    }
}

fn render_policy(policy: &Policy) -> Result<String> {
    serde_yaml::to_string(policy).context("Failed to serialize policy")
}

fn render_filter(policy: &Policy, paths: &[String]) -> String {
    let filter = FileFilter::new(policy);
    paths
        .iter()
        .map(|path| {
            let verdict = if filter.should_review(path) {
                "review"
            } else {
                "skip"
            };
            format!("{}\t{}", verdict, path)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn read_payload(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => {
            fs::read(path).with_context(|| format!("Failed to read payload {}", path.display()))
        }
        None => {
            let mut payload = Vec::new();
            std::io::stdin()
                .read_to_end(&mut payload)
                .context("Failed to read payload from stdin")?;
            Ok(payload)
        }
    }
}

fn main() -> Result<()> {
    // Policy warnings (bad globs, unparseable YAML) go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Policy(args) => {
            let policy = load_policy(args.path.as_deref())?;
            print!("{}", render_policy(&policy)?);
        }
        Commands::Filter(args) => {
            let policy = load_policy(Some(&args.policy))?;
            println!("{}", render_filter(&policy, &args.paths));
        }
        Commands::Sign(args) => {
            let payload = read_payload(args.file.as_deref())?;
            println!("{}", signature::sign(&payload, &args.secret));
        }
    }

    Ok(())
}
