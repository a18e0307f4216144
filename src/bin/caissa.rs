use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::RngCore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use caissa::agent::AgentKind;
use caissa::config::TrainingConfig;
use caissa::control::{LifecycleController, State};
use caissa::OptimizerKind;
use caissa::replay::EvictionStrategy;
use caissa::seed::SeedManager;

#[derive(Parser, Debug)]
#[command(
    name = "caissa",
    about = "Self-play reinforcement learning training engine for chess",
    version
)]
struct Cli {
    /// Verbose logging with full error chains.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a training run.
    Train(TrainArgs),

    /// Deterministic smoke run: fixed seed, few iterations, verdict on exit.
    Test(TestArgs),

    /// Seed utilities.
    Seed {
        #[command(subcommand)]
        command: SeedCommand,
    },

    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Args, Debug)]
struct TrainArgs {
    #[command(flatten)]
    config: ConfigFlags,

    /// Working directory for checkpoints and run artifacts.
    #[arg(long, default_value = "runs")]
    workdir: PathBuf,
}

#[derive(Args, Debug)]
struct TestArgs {
    /// Master seed for the smoke run.
    #[arg(long)]
    seed: u64,

    /// Iterations to run.
    #[arg(long, default_value_t = 2)]
    episodes: usize,

    /// Working directory for checkpoints and run artifacts.
    #[arg(long, default_value = "runs")]
    workdir: PathBuf,
}

#[derive(Subcommand, Debug)]
enum SeedCommand {
    /// Print a random 64-bit seed.
    Generate,

    /// Initialize the manager with a seed and print validation diagnostics.
    Validate {
        #[arg(long)]
        seed: u64,
    },

    /// Print master and component seeds.
    Info {
        #[arg(long)]
        seed: u64,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Parse flags, validate, and print a structured summary.
    Validate {
        #[command(flatten)]
        config: ConfigFlags,
    },

    /// Write a configuration file built from flags.
    Create {
        #[command(flatten)]
        config: ConfigFlags,

        #[arg(long, default_value = "caissa-config.json")]
        output: PathBuf,
    },

    /// Print the effective configuration as JSON.
    Show {
        #[command(flatten)]
        config: ConfigFlags,
    },
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OptimizerFlag {
    Sgd,
    Adam,
    Rmsprop,
}

impl From<OptimizerFlag> for OptimizerKind {
    fn from(flag: OptimizerFlag) -> Self {
        match flag {
            OptimizerFlag::Sgd => OptimizerKind::Sgd,
            OptimizerFlag::Adam => OptimizerKind::Adam,
            OptimizerFlag::Rmsprop => OptimizerKind::RmsProp,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum CleanupFlag {
    #[value(name = "OLDEST_FIRST")]
    OldestFirst,
    #[value(name = "LOWEST_QUALITY")]
    LowestQuality,
    #[value(name = "RANDOM")]
    Random,
}

impl From<CleanupFlag> for EvictionStrategy {
    fn from(flag: CleanupFlag) -> Self {
        match flag {
            CleanupFlag::OldestFirst => EvictionStrategy::OldestFirst,
            CleanupFlag::LowestQuality => EvictionStrategy::LowestQuality,
            CleanupFlag::Random => EvictionStrategy::Random,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum AgentFlag {
    Dqn,
    PolicyGradient,
    ActorCritic,
}

impl From<AgentFlag> for AgentKind {
    fn from(flag: AgentFlag) -> Self {
        match flag {
            AgentFlag::Dqn => AgentKind::Dqn,
            AgentFlag::PolicyGradient => AgentKind::PolicyGradient,
            AgentFlag::ActorCritic => AgentKind::ActorCritic,
        }
    }
}

/// The operator-facing parameter surface, mapped 1:1 onto
/// [`TrainingConfig`].
#[derive(Args, Debug)]
struct ConfigFlags {
    /// Master seed; omitted means a random run.
    #[arg(long)]
    seed: Option<u64>,

    /// Deterministic mode (fixed test seed when --seed is omitted).
    #[arg(long)]
    deterministic: bool,

    /// Training iterations.
    #[arg(long)]
    episodes: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Exploration rate in [0, 1].
    #[arg(long)]
    exploration_rate: Option<f64>,

    #[arg(long, value_enum)]
    optimizer: Option<OptimizerFlag>,

    #[arg(long, value_enum)]
    agent: Option<AgentFlag>,

    #[arg(long)]
    games_per_iteration: Option<usize>,

    /// Concurrent self-play games (1-8).
    #[arg(long)]
    parallel_games: Option<usize>,

    #[arg(long)]
    max_steps_per_game: Option<usize>,

    /// Penalty attributed to step-limited games, in [-1, 0].
    #[arg(long)]
    step_limit_penalty: Option<f64>,

    #[arg(long, overrides_with = "no_treat_step_limit_as_draw")]
    treat_step_limit_as_draw: bool,

    #[arg(long, overrides_with = "treat_step_limit_as_draw")]
    no_treat_step_limit_as_draw: bool,

    #[arg(long, value_enum)]
    experience_cleanup: Option<CleanupFlag>,

    #[arg(long)]
    checkpoint_interval: Option<usize>,

    #[arg(long)]
    name: Option<String>,

    #[arg(long)]
    description: Option<String>,
}

impl ConfigFlags {
    fn into_config(self) -> TrainingConfig {
        let mut config = TrainingConfig {
            seed: self.seed,
            deterministic_mode: self.deterministic,
            ..TrainingConfig::default()
        };
        if let Some(episodes) = self.episodes {
            config.episodes = episodes;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(learning_rate) = self.learning_rate {
            config.learning_rate = learning_rate;
        }
        if let Some(exploration_rate) = self.exploration_rate {
            config.exploration_rate = exploration_rate;
        }
        if let Some(optimizer) = self.optimizer {
            config.optimizer = optimizer.into();
        }
        if let Some(agent) = self.agent {
            config.agent_kind = agent.into();
        }
        if let Some(games) = self.games_per_iteration {
            config.games_per_iteration = games;
        }
        if let Some(parallel) = self.parallel_games {
            config.parallel_games = parallel;
        }
        if let Some(max_steps) = self.max_steps_per_game {
            config.max_steps_per_game = max_steps;
        }
        if let Some(penalty) = self.step_limit_penalty {
            config.step_limit_penalty = penalty;
        }
        if self.no_treat_step_limit_as_draw {
            config.treat_step_limit_as_draw_for_reporting = false;
        } else if self.treat_step_limit_as_draw {
            config.treat_step_limit_as_draw_for_reporting = true;
        }
        if let Some(cleanup) = self.experience_cleanup {
            config.experience_cleanup = cleanup.into();
        }
        if let Some(interval) = self.checkpoint_interval {
            config.checkpoint_interval = interval;
        }
        config.name = self.name;
        config.description = self.description;
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    match cli.command {
        Command::Train(args) => run_train(args),
        Command::Test(args) => run_test(args),
        Command::Seed { command } => run_seed(command),
        Command::Config { command } => run_config(command),
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run_train(args: TrainArgs) -> ExitCode {
    let config = args.config.into_config();
    if let Err(e) = config.validate() {
        eprintln!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }
    println!("{}", config.summary());

    let mut controller = LifecycleController::new(config, args.workdir);
    let started = controller.start(None);
    if !started.is_success() {
        eprintln!("{}", started.message());
        return ExitCode::FAILURE;
    }
    let result = controller.run_to_completion();
    match controller.state() {
        State::Completed => {
            if let Some(orchestrator) = controller.orchestrator() {
                let history = orchestrator.performance_history();
                println!(
                    "completed {} iterations; final performance {:.4}",
                    orchestrator.iteration(),
                    history.last().copied().unwrap_or(0.0)
                );
                if let Some(best) = orchestrator.checkpoints().best() {
                    println!(
                        "best checkpoint: v{} (performance {:.4})",
                        best.version, best.metadata.performance
                    );
                }
            }
            ExitCode::SUCCESS
        }
        state => {
            eprintln!("run ended in state {state}: {}", result.message());
            ExitCode::FAILURE
        }
    }
}

fn run_test(args: TestArgs) -> ExitCode {
    let config = TrainingConfig {
        seed: Some(args.seed),
        deterministic_mode: true,
        episodes: args.episodes,
        batch_size: 16,
        updates_per_iteration: 2,
        hidden_layers: vec![32],
        replay_batch_size: 8,
        games_per_iteration: 2,
        parallel_games: 2,
        max_steps_per_game: 40,
        max_steps_per_episode: 40,
        evaluation_games: 2,
        checkpoint_interval: 1,
        exploration_rate: 0.5,
        name: Some("smoke-test".to_string()),
        ..TrainingConfig::default()
    };

    let mut controller = LifecycleController::new(config, args.workdir);
    if !controller.start(None).is_success() {
        eprintln!("smoke run failed to initialize");
        return ExitCode::FAILURE;
    }
    controller.run_to_completion();
    if controller.state() != State::Completed {
        eprintln!("smoke run did not complete (state {})", controller.state());
        return ExitCode::FAILURE;
    }
    let Some(orchestrator) = controller.orchestrator() else {
        eprintln!("smoke run lost its orchestrator");
        return ExitCode::FAILURE;
    };
    let final_performance = orchestrator
        .performance_history()
        .last()
        .copied()
        .unwrap_or(f64::NAN);
    // Terminal rewards are ±1 and draws 0; anything outside that band means
    // the reward plumbing is broken.
    let in_class = final_performance.is_finite() && final_performance.abs() <= 1.0;
    println!(
        "smoke run: {} iterations, final performance {:.4} ({})",
        orchestrator.iteration(),
        final_performance,
        if in_class { "ok" } else { "out of class" }
    );
    if in_class {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_seed(command: SeedCommand) -> ExitCode {
    match command {
        SeedCommand::Generate => {
            println!("{}", rand::rng().next_u64());
            ExitCode::SUCCESS
        }
        SeedCommand::Validate { seed } => {
            let manager = SeedManager::new();
            if let Err(e) = manager.set_master(seed) {
                eprintln!("seed validation failed: {e}");
                return ExitCode::FAILURE;
            }
            let twin = SeedManager::new();
            twin.set_master(seed).ok();
            let identical = manager.component_seeds().ok() == twin.component_seeds().ok();
            println!("master seed:         {seed}");
            println!("derived streams:     {}", manager.component_seeds().map(|s| s.len()).unwrap_or(0));
            println!("re-derivation check: {}", if identical { "ok" } else { "FAILED" });
            if identical {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        SeedCommand::Info { seed } => {
            let manager = SeedManager::new();
            if let Err(e) = manager.set_master(seed) {
                eprintln!("{e}");
                return ExitCode::FAILURE;
            }
            println!("master seed: {seed}");
            match manager.component_seeds() {
                Ok(seeds) => {
                    for (name, value) in seeds {
                        println!("  {name:<16} {value}");
                    }
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn run_config(command: ConfigCommand) -> ExitCode {
    match command {
        ConfigCommand::Validate { config } => {
            let config = config.into_config();
            match config.validate() {
                Ok(()) => {
                    println!("configuration is valid");
                    println!("{}", config.summary());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("invalid configuration: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        ConfigCommand::Create { config, output } => {
            let config = config.into_config();
            if let Err(e) = config.validate() {
                eprintln!("invalid configuration: {e}");
                return ExitCode::FAILURE;
            }
            match serde_json::to_string_pretty(&config) {
                Ok(json) => {
                    if let Err(e) = std::fs::write(&output, json) {
                        eprintln!("failed to write {}: {e}", output.display());
                        return ExitCode::FAILURE;
                    }
                    info!(path = %output.display(), "configuration written");
                    println!("wrote {}", output.display());
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("failed to serialize configuration: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        ConfigCommand::Show { config } => {
            let config = config.into_config();
            match serde_json::to_string_pretty(&config) {
                Ok(json) => {
                    println!("{json}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("failed to serialize configuration: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
