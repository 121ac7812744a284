// ABOUTME: Command-line interface for the diceforge dice and macro engine.
// ABOUTME: Provides roll, simplify and macro commands with optional JSON output.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use diceforge::{Engine, EngineConfig, FastRng, MacroTiers, StatSheets};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "diceforge")]
#[command(about = "A dice expression and macro engine for tabletop chat games")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Character stats used by {subject::key} references (JSON)
    #[arg(long, global = true)]
    stats: Option<PathBuf>,

    /// Macro tiers used by macro calls (JSON)
    #[arg(long, global = true)]
    macros: Option<PathBuf>,

    /// Seed for reproducible rolls
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log engine passes to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll dice using the given expression
    Roll {
        /// Dice expression (e.g., "4d6dl1", "1d20+{pc::str} ac 15")
        expression: String,
    },
    /// Resolve stat blocks and simplify arithmetic without rolling
    Simplify {
        /// Text to simplify (e.g., "--5", "min(2,7,4)")
        expression: String,
    },
    /// Run a macro call
    Macro {
        /// Macro call with optional prefix and arguments (e.g., "2kh1#attack ac=15")
        call: String,

        /// Print the expanded lines instead of rolling them
        #[arg(long)]
        expand: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> diceforge::Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    let stats = match &cli.stats {
        Some(path) => StatSheets::load(path)?,
        None => StatSheets::default(),
    };
    let macros = match &cli.macros {
        Some(path) => MacroTiers::load(path)?,
        None => MacroTiers::default(),
    };
    tracing::debug!(
        ?config,
        characters = stats.characters.len(),
        "loaded engine inputs"
    );
    let engine = Engine::with_sources(config, stats, macros);
    let mut rng = cli.seed.map_or_else(FastRng::new, FastRng::with_seed);

    match cli.command {
        Commands::Roll { expression } => {
            let result = engine.roll(&expression, &mut rng)?;
            if cli.json {
                print_json(&result)?;
            } else {
                println!("{}", result.expression);
            }
        }
        Commands::Simplify { expression } => {
            let resolved = engine.resolve_text(&expression);
            if cli.json {
                print_json(&serde_json::json!({ "input": expression, "output": resolved }))?;
            } else {
                println!("{}", resolved);
            }
        }
        Commands::Macro { call, expand } => {
            if expand {
                let lines = engine.expand_macro(&call)?;
                if cli.json {
                    print_json(&lines)?;
                } else {
                    for line in lines {
                        println!("{}", line);
                    }
                }
            } else {
                let outputs = engine.run_macro(&call, &mut rng)?;
                if cli.json {
                    print_json(&outputs)?;
                } else {
                    for output in outputs {
                        println!("{}", output);
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_json(value: &impl Serialize) -> diceforge::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
