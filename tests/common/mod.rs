use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use caissa::TrainingConfig;

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique scratch directory per test invocation.
pub fn workdir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "caissa-it-{tag}-{}-{}",
        std::process::id(),
        DIR_COUNTER.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Small deterministic configuration that keeps integration runs fast.
pub fn smoke_config(seed: u64, episodes: usize) -> TrainingConfig {
    TrainingConfig {
        seed: Some(seed),
        deterministic_mode: true,
        episodes,
        batch_size: 16,
        updates_per_iteration: 2,
        hidden_layers: vec![16],
        replay_batch_size: 8,
        games_per_iteration: 2,
        parallel_games: 2,
        max_steps_per_game: 25,
        max_steps_per_episode: 25,
        evaluation_games: 2,
        checkpoint_interval: 1,
        exploration_rate: 0.5,
        ..TrainingConfig::default()
    }
}
