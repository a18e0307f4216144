use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::error::{CaissaResult, CheckpointError, IoError};
use crate::seed::SeedConfig;

/// Metadata attached to every checkpoint record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CheckpointMetadata {
    pub cycle: u64,
    pub performance: f64,
    pub description: String,
    pub is_best: bool,
    pub seed_configuration: Option<SeedConfig>,
    pub training_configuration: Option<serde_json::Value>,
    #[serde(default)]
    pub additional_info: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, Default)]
pub enum ValidationStatus {
    Valid,
    Invalid,
    Skipped,
    #[default]
    Pending,
}

/// One versioned checkpoint known to the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u64,
    pub path: PathBuf,
    /// Portable network-weights-only artifact.
    pub model_path: PathBuf,
    pub metadata: CheckpointMetadata,
    pub creation_time: DateTime<Utc>,
    pub file_size: u64,
    pub validation_status: ValidationStatus,
    pub checksum: Option<String>,
}

/// Result of loading a checkpoint into an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadResult {
    /// Restored from the model-only artifact.
    ModelOnly,
    /// Restored from the primary artifact.
    Full,
}

/// Retention policy for [`CheckpointManager::cleanup_by_retention`]. The
/// surviving set is exactly `{best (if kept)} ∪ last N ∪ {v : v % every == 0}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub keep_best: bool,
    pub keep_last: usize,
    /// Keep every N-th version; zero disables the rule.
    pub keep_every: usize,
}

/// Verdict of [`CheckpointManager::compare`].
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub delta: f64,
    pub delta_pct: f64,
    pub better_version: u64,
    pub recommendation: Recommendation,
}

/// Fixed six-bucket scale over the relative performance delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Recommendation {
    #[strum(to_string = "strong regression; roll back to the older version")]
    StrongRegression,
    #[strum(to_string = "regression; prefer the older version")]
    Regression,
    #[strum(to_string = "comparable; either version is fine")]
    Comparable,
    #[strum(to_string = "slight improvement; keep the newer version")]
    SlightImprovement,
    #[strum(to_string = "improvement; keep the newer version")]
    Improvement,
    #[strum(to_string = "strong improvement; promote the newer version")]
    StrongImprovement,
}

impl Recommendation {
    /// Buckets delimited at -5, -1, 1, 5, and 10 percent.
    fn from_delta_pct(delta_pct: f64) -> Self {
        match delta_pct {
            d if d < -5.0 => Recommendation::StrongRegression,
            d if d < -1.0 => Recommendation::Regression,
            d if d <= 1.0 => Recommendation::Comparable,
            d if d <= 5.0 => Recommendation::SlightImprovement,
            d if d <= 10.0 => Recommendation::Improvement,
            _ => Recommendation::StrongImprovement,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub total: usize,
    pub best_version: Option<u64>,
    pub best_performance: Option<f64>,
    pub total_file_size: u64,
    pub versions: Vec<u64>,
}

/// Envelope written to the primary artifact.
#[derive(Serialize, Deserialize)]
struct CheckpointEnvelope {
    version: u64,
    metadata: CheckpointMetadata,
    creation_time: DateTime<Utc>,
    agent: serde_json::Value,
}

/// Versioned checkpoint store with best tracking and retention cleanup.
///
/// `create` failures are fatal to the current iteration; `load` failures are
/// recoverable and leave the caller free to try another version.
pub struct CheckpointManager {
    dir: PathBuf,
    records: BTreeMap<u64, CheckpointRecord>,
    best_version: Option<u64>,
    max_versions: usize,
    compress: bool,
    validate_on_create: bool,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, max_versions: usize) -> CaissaResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(IoError::from)?;
        Ok(Self {
            dir,
            records: BTreeMap::new(),
            best_version: None,
            max_versions: max_versions.max(1),
            compress: false,
            validate_on_create: true,
        })
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate_on_create = validate;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Persists the agent state under `version`.
    ///
    /// Writes the primary envelope artifact plus a sibling model-only
    /// artifact, computes the validation status, updates the best pointer,
    /// and enforces `max_versions` by deleting the lowest-performing records.
    pub fn create(
        &mut self,
        agent: &dyn Agent,
        version: u64,
        mut metadata: CheckpointMetadata,
    ) -> CaissaResult<CheckpointRecord> {
        if self.records.contains_key(&version) {
            return Err(CheckpointError::CreateFailed(format!(
                "version {version} already exists"
            ))
            .into());
        }
        let creation_time = Utc::now();
        let timestamp = creation_time.format("%Y%m%d%H%M%S");
        let extension = if self.compress { "json.gz" } else { "json" };
        let stem = format!("checkpoint_v{}_c{}_{}", version, metadata.cycle, timestamp);
        let path = self.dir.join(format!("{stem}.{extension}"));
        let model_path = self.dir.join(format!("{stem}_qnet.json"));

        // Serialize the agent through a scratch file so the envelope can embed
        // the exact payload `Agent::save` produces.
        let scratch = self.dir.join(format!(".scratch_v{version}.json"));
        agent
            .save(&scratch)
            .map_err(|e| CheckpointError::CreateFailed(e.to_string()))?;
        let agent_payload: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(&scratch).map_err(IoError::from)?,
        )
        .map_err(IoError::from)?;
        fs::remove_file(&scratch).map_err(IoError::from)?;

        let is_strictly_best = self
            .best_record()
            .map(|best| metadata.performance > best.metadata.performance)
            .unwrap_or(true);
        metadata.is_best = metadata.is_best || is_strictly_best;

        let envelope = CheckpointEnvelope {
            version,
            metadata: metadata.clone(),
            creation_time,
            agent: agent_payload,
        };
        let body = serde_json::to_vec(&envelope).map_err(IoError::from)?;
        write_artifact(&path, &body, self.compress)?;

        let model_body =
            serde_json::to_vec(&agent.export_network()?).map_err(IoError::from)?;
        fs::write(&model_path, &model_body).map_err(IoError::from)?;

        let file_size = fs::metadata(&path).map_err(IoError::from)?.len();
        let checksum = Some(blake3::hash(&body).to_hex().to_string());
        let validation_status = if self.validate_on_create {
            self.validate_artifact(&path)
        } else {
            ValidationStatus::Skipped
        };

        let record = CheckpointRecord {
            version,
            path,
            model_path,
            metadata,
            creation_time,
            file_size,
            validation_status,
            checksum,
        };
        info!(
            version,
            performance = record.metadata.performance,
            is_best = record.metadata.is_best,
            "checkpoint created"
        );

        if record.metadata.is_best {
            self.best_version = Some(version);
        }
        self.records.insert(version, record.clone());
        self.cleanup_auto()?;
        Ok(record)
    }

    /// Restores `record` into `agent`, preferring the portable model-only
    /// artifact and falling back to the primary envelope.
    pub fn load(&self, record: &CheckpointRecord, agent: &mut dyn Agent) -> CaissaResult<LoadResult> {
        if self.validate_on_create
            && record.validation_status == ValidationStatus::Invalid
        {
            return Err(CheckpointError::Invalid(format!(
                "version {} failed validation",
                record.version
            ))
            .into());
        }
        if record.model_path.exists() {
            let body = fs::read_to_string(&record.model_path).map_err(IoError::from)?;
            let value: serde_json::Value =
                serde_json::from_str(&body).map_err(IoError::from)?;
            agent.import_network(value)?;
            return Ok(LoadResult::ModelOnly);
        }
        warn!(
            version = record.version,
            "model-only artifact missing; falling back to primary"
        );
        let envelope = self.read_envelope(&record.path)?;
        let scratch = self.dir.join(format!(".scratch_load_v{}.json", record.version));
        fs::write(
            &scratch,
            serde_json::to_vec(&envelope.agent).map_err(IoError::from)?,
        )
        .map_err(IoError::from)?;
        let result = agent.load(&scratch);
        fs::remove_file(&scratch).ok();
        result.map_err(|e| CheckpointError::LoadFailed(e.to_string()))?;
        Ok(LoadResult::Full)
    }

    pub fn best(&self) -> Option<&CheckpointRecord> {
        self.best_record()
    }

    pub fn get(&self, version: u64) -> Option<&CheckpointRecord> {
        self.records.get(&version)
    }

    /// All records sorted by version.
    pub fn list(&self) -> Vec<&CheckpointRecord> {
        self.records.values().collect()
    }

    pub fn compare(&self, v1: u64, v2: u64) -> CaissaResult<Comparison> {
        let a = self
            .records
            .get(&v1)
            .ok_or(CheckpointError::VersionNotFound(v1))?;
        let b = self
            .records
            .get(&v2)
            .ok_or(CheckpointError::VersionNotFound(v2))?;
        let delta = b.metadata.performance - a.metadata.performance;
        let delta_pct = if a.metadata.performance.abs() > f64::EPSILON {
            delta / a.metadata.performance.abs() * 100.0
        } else if delta.abs() > f64::EPSILON {
            delta.signum() * 100.0
        } else {
            0.0
        };
        let better_version = if delta >= 0.0 { v2 } else { v1 };
        Ok(Comparison {
            delta,
            delta_pct,
            better_version,
            recommendation: Recommendation::from_delta_pct(delta_pct),
        })
    }

    /// Removes a version and its artifacts. Deleting the best re-elects by
    /// scanning the remaining records.
    pub fn delete(&mut self, version: u64) -> bool {
        let Some(record) = self.records.remove(&version) else {
            return false;
        };
        fs::remove_file(&record.path).ok();
        fs::remove_file(&record.model_path).ok();
        if self.best_version == Some(version) {
            self.elect_best();
        }
        true
    }

    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            total: self.records.len(),
            best_version: self.best_version,
            best_performance: self.best_record().map(|r| r.metadata.performance),
            total_file_size: self.records.values().map(|r| r.file_size).sum(),
            versions: self.records.keys().copied().collect(),
        }
    }

    /// Enforces `max_versions` by deleting the lowest-performance records
    /// first.
    pub fn cleanup_auto(&mut self) -> CaissaResult<()> {
        while self.records.len() > self.max_versions {
            let victim = self
                .records
                .values()
                .min_by(|a, b| {
                    ordered_float::OrderedFloat(a.metadata.performance)
                        .cmp(&ordered_float::OrderedFloat(b.metadata.performance))
                })
                .map(|r| r.version);
            match victim {
                Some(version) => {
                    info!(version, "retention limit reached; deleting checkpoint");
                    self.delete(version);
                }
                None => break,
            }
        }
        Ok(())
    }

    /// Keeps the union of `{best}`, the last N versions, and every N-th
    /// version; deletes everything else.
    pub fn cleanup_by_retention(&mut self, policy: RetentionPolicy) -> Vec<u64> {
        let mut keep: Vec<u64> = Vec::new();
        if policy.keep_best {
            keep.extend(self.best_version);
        }
        let versions: Vec<u64> = self.records.keys().copied().collect();
        keep.extend(versions.iter().rev().take(policy.keep_last));
        if policy.keep_every > 0 {
            keep.extend(
                versions
                    .iter()
                    .filter(|v| *v % policy.keep_every as u64 == 0),
            );
        }
        let doomed: Vec<u64> = versions
            .into_iter()
            .filter(|v| !keep.contains(v))
            .collect();
        for version in &doomed {
            self.delete(*version);
        }
        doomed
    }

    // ============================================================================
    // Internals
    // ============================================================================

    fn best_record(&self) -> Option<&CheckpointRecord> {
        self.best_version.and_then(|v| self.records.get(&v))
    }

    fn elect_best(&mut self) {
        self.best_version = self
            .records
            .values()
            .max_by(|a, b| {
                ordered_float::OrderedFloat(a.metadata.performance)
                    .cmp(&ordered_float::OrderedFloat(b.metadata.performance))
            })
            .map(|r| r.version);
    }

    fn validate_artifact(&self, path: &Path) -> ValidationStatus {
        match self.read_envelope(path) {
            Ok(_) => ValidationStatus::Valid,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "checkpoint failed validation");
                ValidationStatus::Invalid
            }
        }
    }

    fn read_envelope(&self, path: &Path) -> CaissaResult<CheckpointEnvelope> {
        let body = read_artifact(path)?;
        serde_json::from_slice(&body).map_err(|e| IoError::from(e).into())
    }
}

fn write_artifact(path: &Path, body: &[u8], compress: bool) -> CaissaResult<()> {
    if compress {
        let file = fs::File::create(path).map_err(IoError::from)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(body).map_err(IoError::from)?;
        encoder.finish().map_err(IoError::from)?;
    } else {
        fs::write(path, body).map_err(IoError::from)?;
    }
    Ok(())
}

fn read_artifact(path: &Path) -> CaissaResult<Vec<u8>> {
    if !path.exists() {
        return Err(CheckpointError::ArtifactMissing(path.display().to_string()).into());
    }
    let raw = fs::read(path).map_err(IoError::from)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut body = Vec::new();
        decoder.read_to_end(&mut body).map_err(IoError::from)?;
        Ok(body)
    } else {
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentKind, make_agent};
    use crate::nn::NetworkConfig;
    use crate::seed::SeedManager;

    // ============================================================================================
    // Helper Functions
    // ============================================================================================

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "caissa-ckpt-{tag}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0)
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn test_agent() -> Box<dyn Agent> {
        let seeds = SeedManager::new();
        seeds.set_master(1).unwrap();
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

    fn meta(cycle: u64, performance: f64) -> CheckpointMetadata {
        CheckpointMetadata {
            cycle,
            performance,
            description: format!("cycle {cycle}"),
            ..CheckpointMetadata::default()
        }
    }

    fn manager_with_versions(tag: &str, performances: &[f64]) -> (CheckpointManager, PathBuf) {
        let dir = temp_dir(tag);
        let mut manager = CheckpointManager::new(&dir, 100).unwrap();
        let agent = test_agent();
        for (i, &perf) in performances.iter().enumerate() {
            manager
                .create(agent.as_ref(), (i + 1) as u64, meta(i as u64, perf))
                .unwrap();
        }
        (manager, dir)
    }

    // ============================================================================================
    // Create / load
    // ============================================================================================

    #[test]
    fn create_writes_both_artifacts() {
        let dir = temp_dir("create");
        let mut manager = CheckpointManager::new(&dir, 10).unwrap();
        let agent = test_agent();
        let record = manager.create(agent.as_ref(), 0, meta(0, 0.5)).unwrap();
        assert!(record.path.exists());
        assert!(record.model_path.exists());
        assert!(record.file_size > 0);
        assert_eq!(record.validation_status, ValidationStatus::Valid);
        let name = record.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("checkpoint_v0_c0_"));
        assert!(name.ends_with(".json"));
        assert!(
            record
                .model_path
                .to_string_lossy()
                .ends_with("_qnet.json")
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn duplicate_version_is_rejected() {
        let dir = temp_dir("dup");
        let mut manager = CheckpointManager::new(&dir, 10).unwrap();
        let agent = test_agent();
        manager.create(agent.as_ref(), 1, meta(0, 0.1)).unwrap();
        assert!(manager.create(agent.as_ref(), 1, meta(0, 0.2)).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_round_trips_q_values() {
        let dir = temp_dir("load");
        let mut manager = CheckpointManager::new(&dir, 10).unwrap();
        let agent = test_agent();
        let record = manager.create(agent.as_ref(), 0, meta(0, 0.5)).unwrap();

        let mut other = test_agent();
        let result = manager.load(&record, other.as_mut()).unwrap();
        assert_eq!(result, LoadResult::ModelOnly);
        let probe = [0.2, 0.4, 0.6, 0.8];
        assert_eq!(
            agent.get_q_values(&probe, &[0, 1, 2, 3]).unwrap(),
            other.get_q_values(&probe, &[0, 1, 2, 3]).unwrap()
        );
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_falls_back_to_primary() {
        let dir = temp_dir("fallback");
        let mut manager = CheckpointManager::new(&dir, 10).unwrap();
        let agent = test_agent();
        let record = manager.create(agent.as_ref(), 0, meta(0, 0.5)).unwrap();
        fs::remove_file(&record.model_path).unwrap();

        let mut other = test_agent();
        let result = manager.load(&record, other.as_mut()).unwrap();
        assert_eq!(result, LoadResult::Full);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn compressed_artifacts_round_trip() {
        let dir = temp_dir("gzip");
        let mut manager = CheckpointManager::new(&dir, 10)
            .unwrap()
            .with_compression(true);
        let agent = test_agent();
        let record = manager.create(agent.as_ref(), 0, meta(0, 0.5)).unwrap();
        assert!(record.path.to_string_lossy().ends_with(".json.gz"));
        assert_eq!(record.validation_status, ValidationStatus::Valid);
        fs::remove_file(&record.model_path).unwrap();
        let mut other = test_agent();
        assert_eq!(
            manager.load(&record, other.as_mut()).unwrap(),
            LoadResult::Full
        );
        fs::remove_dir_all(&dir).ok();
    }

    // ============================================================================================
    // Best tracking
    // ============================================================================================

    #[test]
    fn best_tracks_strict_maximum() {
        let (manager, dir) = manager_with_versions("best", &[0.3, 0.9, 0.5]);
        assert_eq!(manager.best().unwrap().version, 2);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn deleting_best_re_elects() {
        let (mut manager, dir) = manager_with_versions("reelect", &[0.3, 0.9, 0.5]);
        assert!(manager.delete(2));
        assert_eq!(manager.best().unwrap().version, 3);
        assert!(!manager.delete(2));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn deleting_all_clears_best() {
        let (mut manager, dir) = manager_with_versions("clear", &[0.3]);
        manager.delete(1);
        assert!(manager.best().is_none());
        assert_eq!(manager.summary().total, 0);
        fs::remove_dir_all(&dir).ok();
    }

    // ============================================================================================
    // Retention
    // ============================================================================================

    #[test]
    fn max_versions_deletes_lowest_performance() {
        let dir = temp_dir("maxv");
        let mut manager = CheckpointManager::new(&dir, 3).unwrap();
        let agent = test_agent();
        for (version, perf) in [(1, 0.5), (2, 0.1), (3, 0.9), (4, 0.7)] {
            manager
                .create(agent.as_ref(), version, meta(0, perf))
                .unwrap();
        }
        let versions: Vec<u64> = manager.list().iter().map(|r| r.version).collect();
        assert_eq!(versions, vec![1, 3, 4], "lowest performance (v2) evicted");
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn retention_keeps_union() {
        let (mut manager, dir) =
            manager_with_versions("union", &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]);
        manager.cleanup_by_retention(RetentionPolicy {
            keep_best: true,
            keep_last: 2,
            keep_every: 3,
        });
        let versions: Vec<u64> = manager.list().iter().map(|r| r.version).collect();
        // best = 10, last 2 = {9, 10}, every 3rd = {3, 6, 9}.
        assert_eq!(versions, vec![3, 6, 9, 10]);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn retention_without_best() {
        let (mut manager, dir) = manager_with_versions("nobest", &[0.9, 0.1, 0.2, 0.3, 0.4]);
        manager.cleanup_by_retention(RetentionPolicy {
            keep_best: false,
            keep_last: 1,
            keep_every: 2,
        });
        let versions: Vec<u64> = manager.list().iter().map(|r| r.version).collect();
        // last = {5}, every 2nd = {2, 4}; best (v1) is not protected.
        assert_eq!(versions, vec![2, 4, 5]);
        fs::remove_dir_all(&dir).ok();
    }

    // ============================================================================================
    // Comparison
    // ============================================================================================

    #[test]
    fn comparison_buckets() {
        let (manager, dir) = manager_with_versions("cmp", &[1.0, 1.08]);
        let comparison = manager.compare(1, 2).unwrap();
        assert!((comparison.delta - 0.08).abs() < 1e-12);
        assert!((comparison.delta_pct - 8.0).abs() < 1e-9);
        assert_eq!(comparison.better_version, 2);
        assert_eq!(comparison.recommendation, Recommendation::Improvement);

        let reverse = manager.compare(2, 1).unwrap();
        assert_eq!(reverse.better_version, 2);
        // -0.08 / 1.08 is a -7.4% relative move.
        assert_eq!(reverse.recommendation, Recommendation::StrongRegression);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn comparison_scale_is_total() {
        for (pct, expected) in [
            (-20.0, Recommendation::StrongRegression),
            (-3.0, Recommendation::Regression),
            (0.0, Recommendation::Comparable),
            (3.0, Recommendation::SlightImprovement),
            (8.0, Recommendation::Improvement),
            (25.0, Recommendation::StrongImprovement),
        ] {
            assert_eq!(Recommendation::from_delta_pct(pct), expected, "pct {pct}");
        }
    }

    #[test]
    fn comparing_unknown_version_errors() {
        let (manager, dir) = manager_with_versions("cmperr", &[0.5]);
        assert!(manager.compare(1, 99).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn summary_aggregates() {
        let (manager, dir) = manager_with_versions("summary", &[0.2, 0.8]);
        let summary = manager.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.best_version, Some(2));
        assert_eq!(summary.versions, vec![1, 2]);
        assert!(summary.total_file_size > 0);
        fs::remove_dir_all(&dir).ok();
    }
}
