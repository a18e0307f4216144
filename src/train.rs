pub mod evaluation;
pub mod orchestrator;
pub mod opponent;
pub mod pipeline;

pub use evaluation::{EvaluationReport, evaluate_snapshots};
pub use opponent::{OpponentManager, OpponentStrategy};
pub use orchestrator::{IterationReport, RunReport, TrainingOrchestrator};
pub use pipeline::{TrainingPhaseReport, TrainingPipeline};
