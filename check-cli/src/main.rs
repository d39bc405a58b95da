use anyhow::{Context, Result};
use auth_check::{
    AuthorizationEngine, CheckRequest, EngineConfig, ExpandRequest, RelationTuple, SubjectSet,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{debug, info, Level};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Answers permission checks over a file of relation tuples
#[derive(Parser, Debug)]
#[command(name = "keto-check")]
#[command(about = "Relationship-based permission checks over a tuple file")]
struct Args {
    /// Engine configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "KETO_CHECK_CONFIG")]
    config: Option<PathBuf>,

    /// File with one relation tuple per line, `//` starts a comment
    #[arg(short, long)]
    tuples: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print results and logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a relation tuple holds, e.g. `default:doc#viewer@alice`
    Check {
        tuple: String,

        /// Maximum depth of the traversal
        #[arg(long)]
        max_depth: Option<u32>,

        /// Print the tree explaining a positive answer
        #[arg(long)]
        explain: bool,
    },
    /// Print every subject of a subject set, e.g. `default:doc#viewer`
    Expand {
        subject_set: String,

        /// Maximum depth of the traversal
        #[arg(long)]
        max_depth: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json)?;

    let config = EngineConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let engine = AuthorizationEngine::new(config)?;

    if let Some(path) = &args.tuples {
        let tuples = load_tuples(path)?;
        info!(count = tuples.len(), path = %path.display(), "loaded relation tuples");
        for tuple in tuples {
            engine.write_tuple(tuple);
        }
    }

    match args.command {
        Command::Check {
            tuple,
            max_depth,
            explain,
        } => {
            let tuple: RelationTuple = tuple.parse().context("invalid relation tuple")?;
            let response = engine
                .check_request(CheckRequest {
                    tuple,
                    max_depth,
                    explain,
                })
                .await?;

            if args.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!("{}", if response.allowed { "Allowed" } else { "Denied" });
                if let Some(tree) = response.tree {
                    println!("{}", tree);
                }
            }
        }
        Command::Expand {
            subject_set,
            max_depth,
        } => {
            let subject_set: SubjectSet = subject_set.parse().context("invalid subject set")?;
            let tree = engine
                .expand(ExpandRequest {
                    subject_set,
                    max_depth,
                })
                .await?;

            match (tree, args.json) {
                (Some(tree), true) => println!("{}", serde_json::to_string_pretty(&tree)?),
                (Some(tree), false) => println!("{}", tree),
                (None, _) => println!("Empty tree"),
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool, json: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::WARN };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("auth_check={},keto_check={}", level, level).into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(std::io::stderr)
                    .json(),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    Ok(())
}

fn load_tuples(path: &Path) -> Result<Vec<RelationTuple>> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_tuples(&input).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse_tuples(input: &str) -> Result<Vec<RelationTuple>> {
    let mut tuples = Vec::new();
    for (number, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let tuple = line
            .parse()
            .with_context(|| format!("line {}: {:?}", number + 1, line))?;
        debug!(%tuple, "parsed tuple");
        tuples.push(tuple);
    }
    Ok(tuples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tuples_skips_comments() {
        let tuples = parse_tuples(
            "// editors\n\
             default:doc#viewer@(default:editors#member)\n\
             \n\
             default:editors#member@alice\n",
        )
        .unwrap();

        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[1].to_string(), "default:editors#member@alice");
    }

    #[test]
    fn test_parse_tuples_reports_line() {
        let err = parse_tuples("default:doc#viewer@alice\nnot a tuple\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "keto-check",
            "--tuples",
            "tuples.txt",
            "check",
            "default:doc#viewer@alice",
            "--explain",
        ])
        .unwrap();

        assert_eq!(args.tuples, Some(PathBuf::from("tuples.txt")));
        assert!(matches!(args.command, Command::Check { explain: true, .. }));
    }
}
