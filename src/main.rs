//! Janggi-Zero: self-play game generation for Janggi.
//!
//! ## Usage
//!
//! - `janggi-zero selfplay` - Play episodes and write one JSON trajectory per line
//! - `janggi-zero moves [KEY]` - Show a position and its legal actions
//! - `janggi-zero demo` - Search the opening position (default)

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use janggi_zero::board::Formation;
use janggi_zero::codec::StateKey;
use janggi_zero::constants::{C_PUCT, EXPLORATION_STEP, MAX_STEP, N_SIMS, ROLLOUT_DEPTH};
use janggi_zero::env::{EnvConfig, Environment};
use janggi_zero::evaluator::{Evaluator, UniformEvaluator};
use janggi_zero::mcts::{Mcts, MctsConfig, visit_probs};
use janggi_zero::persistence::MemoryQualityStore;
use janggi_zero::playout::RolloutEvaluator;
use janggi_zero::selfplay::{SelfPlayConfig, self_play};

/// Janggi-Zero: MCTS self-play for Korean chess
#[derive(Parser)]
#[command(name = "janggi-zero")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Play self-play episodes and write their trajectories as JSON Lines
    Selfplay {
        /// Number of episodes
        #[arg(short = 'n', long, default_value_t = 1)]
        episodes: usize,

        /// Simulations per move
        #[arg(long, default_value_t = N_SIMS)]
        simulations: usize,

        #[arg(long, default_value_t = C_PUCT)]
        c_puct: f64,

        /// Step attempts per episode
        #[arg(long, default_value_t = MAX_STEP)]
        max_step: usize,

        /// Moves sampled with temperature 1 before playing greedily
        #[arg(long, default_value_t = EXPLORATION_STEP)]
        exploration_step: usize,

        /// Keep the played subtree between moves
        #[arg(long)]
        reuse_tree: bool,

        #[arg(long)]
        seed: Option<u64>,

        /// Blue's opening formation (random when omitted)
        #[arg(long, value_enum)]
        blue: Option<FormationArg>,

        /// Red's opening formation (random when omitted)
        #[arg(long, value_enum)]
        red: Option<FormationArg>,

        #[arg(long, value_enum, default_value_t = EvaluatorArg::Rollout)]
        evaluator: EvaluatorArg,

        /// Plies per rollout for the rollout evaluator
        #[arg(long, default_value_t = ROLLOUT_DEPTH)]
        rollout_depth: usize,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show a position and list its legal actions
    Moves {
        /// State key; the standard opening when omitted
        key: Option<String>,
    },
    /// Run a search on the opening and show the most visited moves
    Demo {
        #[arg(long, default_value_t = N_SIMS)]
        simulations: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormationArg {
    MaSangMaSang,
    MaSangSangMa,
    SangMaSangMa,
    SangMaMaSang,
}

impl From<FormationArg> for Formation {
    fn from(arg: FormationArg) -> Formation {
        match arg {
            FormationArg::MaSangMaSang => Formation::MaSangMaSang,
            FormationArg::MaSangSangMa => Formation::MaSangSangMa,
            FormationArg::SangMaSangMa => Formation::SangMaSangMa,
            FormationArg::SangMaMaSang => Formation::SangMaMaSang,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EvaluatorArg {
    /// Uniform priors, zero value
    Uniform,
    /// Capture-weighted priors, random playout value
    Rollout,
}

fn init_tracing(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Some(Commands::Selfplay {
            episodes,
            simulations,
            c_puct,
            max_step,
            exploration_step,
            reuse_tree,
            seed,
            blue,
            red,
            evaluator,
            rollout_depth,
            output,
        }) => {
            let mut env_config = EnvConfig {
                blue: blue.map(Formation::from),
                red: red.map(Formation::from),
                ..EnvConfig::default()
            };
            if let Some(seed) = seed {
                env_config = env_config.with_seed(seed);
            }
            let mut config = SelfPlayConfig::default()
                .with_mcts(
                    MctsConfig::default()
                        .with_simulations(simulations)
                        .with_c_puct(c_puct),
                )
                .with_max_step(max_step)
                .with_exploration_step(exploration_step)
                .with_tree_reuse(reuse_tree);
            config.seed = seed;

            let seed = seed.unwrap_or_else(|| fastrand::u64(..));
            let mut evaluator: Box<dyn Evaluator> = match evaluator {
                EvaluatorArg::Uniform => Box::new(UniformEvaluator::default()),
                EvaluatorArg::Rollout => {
                    Box::new(RolloutEvaluator::new(seed).with_depth(rollout_depth))
                }
            };
            let out: Box<dyn Write> = match &output {
                Some(path) => Box::new(
                    File::create(path)
                        .with_context(|| format!("failed to create {}", path.display()))?,
                ),
                None => Box::new(io::stdout().lock()),
            };
            run_selfplay(Environment::new(env_config), evaluator.as_mut(), config, episodes, out)
        }
        Some(Commands::Moves { key }) => run_moves(key.as_deref()),
        Some(Commands::Demo { simulations }) => run_demo(simulations),
        None => run_demo(N_SIMS),
    }
}

fn run_selfplay(
    mut env: Environment,
    evaluator: &mut dyn Evaluator,
    config: SelfPlayConfig,
    episodes: usize,
    out: Box<dyn Write>,
) -> Result<()> {
    let mut out = BufWriter::new(out);
    let mut quality = MemoryQualityStore::default();
    let mut written = 0;

    for episode in 0..episodes {
        let mut episode_config = config;
        episode_config.seed = config.seed.map(|s| s.wrapping_add(episode as u64));

        match self_play(&mut env, &mut *evaluator, &episode_config, &mut quality) {
            Ok(trajectory) => {
                info!(
                    episode,
                    steps = trajectory.info.steps,
                    winner = ?trajectory.info.winner,
                    end = ?trajectory.info.end,
                    "episode finished"
                );
                serde_json::to_writer(&mut out, &trajectory)
                    .context("failed to serialize trajectory")?;
                writeln!(out)?;
                written += 1;
            }
            Err(aborted) => {
                warn!(
                    episode,
                    steps = aborted.partial.info.steps,
                    error = %aborted.error,
                    "episode aborted"
                );
            }
        }
    }
    out.flush()?;

    info!(
        written,
        positions = env.cached_positions(),
        links = env.cached_links(),
        qualities = quality.len(),
        "self-play done"
    );
    Ok(())
}

fn run_moves(key: Option<&str>) -> Result<()> {
    let mut env = Environment::new(
        EnvConfig::default().with_formations(Formation::MaSangMaSang, Formation::MaSangMaSang),
    );
    let key = match key {
        Some(text) => text
            .parse::<StateKey>()
            .with_context(|| format!("invalid state key `{text}`"))?,
        None => env.current().clone(),
    };

    let entry = env.position(&key)?;
    println!("{} to move\n", key.to_move());
    println!("{}", entry.board);
    println!("{} legal actions:", entry.actions.len());
    for (i, action) in entry.actions.iter().enumerate() {
        println!("{i:3}  {action}  (policy {})", action.policy_index());
    }
    Ok(())
}

fn run_demo(simulations: usize) -> Result<()> {
    println!("Janggi-Zero: MCTS self-play engine\n");

    let mut env = Environment::new(
        EnvConfig::default()
            .with_formations(Formation::MaSangSangMa, Formation::SangMaMaSang)
            .with_seed(0),
    );
    let root = env.current().clone();
    println!("{}", root.board()?);
    println!("key: {root}\n");

    println!("Running {simulations} MCTS simulations...");
    let mut evaluator = RolloutEvaluator::new(0);
    let mut mcts = Mcts::new(root.clone(), MctsConfig::default().with_simulations(simulations));
    mcts.search(&mut env, &mut evaluator)?;

    let actions = env.get_legal_actions(&root)?.to_vec();
    let visits = mcts.visit_counts();
    let mut ranked: Vec<usize> = (0..visits.len()).collect();
    ranked.sort_by(|&a, &b| visits[b].cmp(&visits[a]));
    for &i in ranked.iter().take(5) {
        let child = &mcts.root().children[i];
        println!("{}  v={} q={:.3} p={:.3}", actions[i], child.v, child.q(), child.p);
    }

    let best = visit_probs(&visits, 0.0)
        .iter()
        .position(|&p| p > 0.0)
        .unwrap_or(0);
    if let Some(action) = actions.get(best) {
        println!("\nBest move: {action}");
    }
    println!("Root value: {:.3}", mcts.root_value());
    Ok(())
}
