//! Formula evaluator
//!
//! Evaluates a single formula, or runs one configured system against stats
//! given on the command line.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use nexus_core::core::config::{EngineConfig, DEFAULT_LOG_FILTER};
use nexus_core::core::error::{NexusError, Result};
use nexus_core::core::types::EntityId;
use nexus_core::formula::{
    compile, EvalContext, FormulaCache, RandomSource, SeededRandom, ThreadRandom,
};
use nexus_core::pipeline::{BattleRequest, DamageTag, Invocation, Pipeline};
use nexus_core::profile::{EntityProfile, PermissiveValidator};
use tracing_subscriber::EnvFilter;

/// Nexus formula evaluator
#[derive(Parser, Debug)]
#[command(name = "nexus_eval")]
#[command(about = "Evaluate stat formulas and pipelines from the command line")]
struct Args {
    /// Random seed for deterministic `random()` results
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate one formula
    Eval {
        formula: String,

        /// Variable binding, `name=value` (repeatable)
        #[arg(long = "var", value_parser = parse_pair)]
        vars: Vec<(String, f64)>,

        /// Primary entity stat, `attr=value` (repeatable)
        #[arg(long = "stat", value_parser = parse_pair)]
        stats: Vec<(String, f64)>,
    },

    /// Run a status system or the battle pipeline from a config file
    Run {
        /// Path to the engine TOML config
        #[arg(long, short)]
        config: String,

        /// System name, or `battle`
        system: String,

        /// Primary entity stat, `attr=value` (repeatable)
        #[arg(long = "stat", value_parser = parse_pair)]
        stats: Vec<(String, f64)>,

        /// Secondary entity stat, `attr=value` (repeatable)
        #[arg(long = "target-stat", value_parser = parse_pair)]
        target_stats: Vec<(String, f64)>,

        /// Damage tag, `Category.value` (repeatable, battle only)
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Calculate mode override
        #[arg(long)]
        mode: Option<String>,
    },
}

fn parse_pair(raw: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", raw))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid number in '{}': {}", raw, e))?;
    Ok((name.trim().to_string(), value))
}

fn profile(name: &str, stats: &[(String, f64)]) -> EntityProfile {
    let profile = EntityProfile::new(EntityId::new(), name, Arc::new(PermissiveValidator));
    for (key, value) in stats {
        profile.set_stat(key, *value);
    }
    profile
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let random: Arc<dyn RandomSource> = match args.seed {
        Some(seed) => Arc::new(SeededRandom::new(seed)),
        None => Arc::new(ThreadRandom),
    };

    match args.command {
        Command::Eval { formula, vars, stats } => {
            let expr = compile(&formula)?;
            let primary = profile("cli", &stats);
            let mut ctx = EvalContext::solo(&primary).with_random(random.as_ref());
            for (name, value) in vars {
                ctx.bind(name, value);
            }
            let value = expr.evaluate(&ctx)?;
            if args.json {
                println!("{}", serde_json::json!({ "formula": formula, "value": value }));
            } else {
                println!("{}", value);
            }
        }
        Command::Run {
            config,
            system,
            stats,
            target_stats,
            tags,
            mode,
        } => {
            let config = EngineConfig::load_file(&config)?;
            let pipeline = Pipeline::with_random(Arc::new(FormulaCache::new()), random);
            let primary = profile("primary", &stats);
            let secondary = (!target_stats.is_empty()).then(|| profile("secondary", &target_stats));

            let outcome = if system.eq_ignore_ascii_case("battle") {
                let battle = config
                    .battle
                    .as_ref()
                    .ok_or_else(|| NexusError::Config("no [battle] section".into()))?;
                let mut request = BattleRequest::new();
                for raw in &tags {
                    match DamageTag::parse(raw) {
                        Some(tag) => request.tags.push(tag),
                        None => tracing::warn!("Ignoring malformed tag '{}'", raw),
                    }
                }
                request.mode = mode;
                nexus_core::pipeline::compute_damage(
                    &pipeline,
                    battle,
                    &primary,
                    secondary.as_ref(),
                    &request,
                )
            } else {
                let (name, spec) = config
                    .systems
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&system))
                    .ok_or_else(|| NexusError::Config(format!("unknown system '{}'", system)))?;
                let mut invocation = match &secondary {
                    Some(secondary) => Invocation::versus(&primary, secondary),
                    None => Invocation::solo(&primary),
                };
                if let Some(mode) = mode {
                    invocation = invocation.with_mode(mode);
                }
                pipeline.run(name, spec, &invocation)
            };

            if args.json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                for (name, value) in &outcome.outputs {
                    println!("{:<20} {}", name, value);
                }
                for write in &outcome.writes {
                    let note = if write.applied { "" } else { " (rejected)" };
                    println!("-> {} = {}{}", write.attribute, write.value, note);
                }
                println!("final: {}", outcome.final_value);
            }
        }
    }

    Ok(())
}
