//! Retention law: after cleanup the surviving set is exactly
//! `{best} ∪ last N ∪ {v : v % M == 0}`, and the best pointer survives
//! arbitrary deletions by re-election.

mod common;

use caissa::agent::{Agent, AgentKind, make_agent};
use caissa::checkpoint::{CheckpointManager, CheckpointMetadata, RetentionPolicy};
use caissa::seed::SeedManager;
use caissa::{NetworkConfig, TrainingConfig};

use common::workdir;

fn small_agent() -> Box<dyn Agent> {
    let seeds = SeedManager::new();
    seeds.set_master(3).unwrap();
    make_agent(
        AgentKind::Dqn,
        NetworkConfig {
            input_size: 4,
            hidden_layers: vec![6],
            output_size: 4,
            ..NetworkConfig::default()
        },
        4,
        0.0,
        &seeds,
    )
    .unwrap()
}

fn store_with_ten_versions(tag: &str) -> (CheckpointManager, std::path::PathBuf) {
    let dir = workdir(tag);
    let mut manager = CheckpointManager::new(&dir, 100).unwrap();
    let agent = small_agent();
    // Versions 1..=10 with performances 0.1..=1.0.
    for version in 1..=10u64 {
        let metadata = CheckpointMetadata {
            cycle: version,
            performance: version as f64 / 10.0,
            description: format!("cycle {version}"),
            ..CheckpointMetadata::default()
        };
        manager.create(agent.as_ref(), version, metadata).unwrap();
    }
    (manager, dir)
}

#[test]
fn retention_policy_keeps_exact_union() {
    let (mut manager, dir) = store_with_ten_versions("law");
    assert_eq!(manager.best().unwrap().version, 10);

    manager.cleanup_by_retention(RetentionPolicy {
        keep_best: true,
        keep_last: 2,
        keep_every: 3,
    });

    let survivors: Vec<u64> = manager.list().iter().map(|r| r.version).collect();
    // best = {10}, last 2 = {9, 10}, every 3rd = {3, 6, 9}.
    assert_eq!(survivors, vec![3, 6, 9, 10]);

    // Artifacts of deleted versions are gone from disk too.
    let remaining_files = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_name()
                .to_string_lossy()
                .starts_with("checkpoint_v1_")
        })
        .count();
    assert_eq!(remaining_files, 0);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn best_pointer_re_elects_under_deletion() {
    let (mut manager, dir) = store_with_ten_versions("reelect");
    assert_eq!(manager.best().unwrap().version, 10);
    assert!(manager.delete(10));
    assert_eq!(manager.best().unwrap().version, 9);
    assert!(manager.delete(9));
    assert_eq!(manager.best().unwrap().version, 8);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn checkpoint_carries_seed_and_training_configuration() {
    let dir = workdir("payload");
    let mut manager = CheckpointManager::new(&dir, 10).unwrap();
    let agent = small_agent();

    let seeds = SeedManager::new();
    seeds.set_master(99).unwrap();
    let metadata = CheckpointMetadata {
        cycle: 4,
        performance: 0.6,
        description: "with payloads".to_string(),
        seed_configuration: Some(seeds.serialize().unwrap()),
        training_configuration: Some(
            serde_json::to_value(TrainingConfig::default()).unwrap(),
        ),
        ..CheckpointMetadata::default()
    };
    let record = manager.create(agent.as_ref(), 0, metadata).unwrap();

    let body = std::fs::read_to_string(&record.path).unwrap();
    let envelope: serde_json::Value = serde_json::from_str(&body).unwrap();
    let stored = &envelope["metadata"];
    assert_eq!(stored["cycle"], 4);
    assert_eq!(stored["seed_configuration"]["master_seed"], 99);
    assert!(stored["training_configuration"]["batch_size"].is_u64());
    std::fs::remove_dir_all(&dir).ok();
}
