use thiserror::Error;

pub type CaissaResult<T> = Result<T, CaissaError>;

#[derive(Debug, Error)]
pub enum CaissaError {
    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Chess(#[from] ChessError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Control(#[from] ControlError),

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors occurring within agent logic or policy updates.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("No valid actions supplied to agent")]
    EmptyValidActions,

    #[error("State size mismatch: expected {expected}, got {got}")]
    StateSizeMismatch { expected: usize, got: usize },

    #[error("Policy update failed: {0}")]
    UpdateFailed(String),

    #[error("Invalid input to agent: {0}")]
    InvalidInput(String),
}

/// Errors raised by the chess rules collaborator.
#[derive(Debug, Error)]
pub enum ChessError {
    #[error("Illegal move: {0}")]
    IllegalMove(String),

    #[error("Invalid FEN string: '{fen}': {msg}")]
    InvalidFen { fen: String, msg: String },

    #[error("Invalid square index: {0}")]
    InvalidSquare(usize),
}

/// Errors related to checkpoint creation, loading, and validation.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint version {0} not found")]
    VersionNotFound(u64),

    #[error("Checkpoint failed validation: {0}")]
    Invalid(String),

    #[error("Failed to create checkpoint: {0}")]
    CreateFailed(String),

    #[error("Failed to load checkpoint: {0}")]
    LoadFailed(String),

    #[error("Checkpoint artifact missing at '{0}'")]
    ArtifactMissing(String),
}

/// Errors produced by configuration parsing and validation. These are
/// returned synchronously from `validate`/`adjust` and never reach the
/// training loop.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown configuration parameter: '{0}'")]
    UnknownParameter(String),

    #[error("Value out of range for '{parameter}': {msg}")]
    OutOfRange { parameter: String, msg: String },

    #[error("Invalid value type for '{parameter}': expected {expected}")]
    InvalidType { parameter: String, expected: String },

    #[error("Unsupported enum value for '{parameter}': '{value}'")]
    UnsupportedEnum { parameter: String, value: String },

    #[error("Failed to parse enum: {0}")]
    ParseEnum(#[from] strum::ParseError),
}

/// Errors raised by the lifecycle controller.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Illegal session transition: {from} -> {requested}")]
    IllegalTransition { from: String, requested: String },

    #[error("No active session")]
    NoSession,

    #[error("No snapshot available to resume from")]
    MissingSnapshot,

    #[error("Rollback stack is empty")]
    NothingToRollBack,

    #[error("Session initialization failed: {0}")]
    InitFailed(String),
}

/// Errors related to the gym environment configuration and step loop.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Action index {action} out of range (action space size {size})")]
    ActionOutOfRange { action: usize, size: usize },

    #[error("Step called on terminal environment")]
    SteppedTerminal,

    #[error("Invalid environment configuration: {0}")]
    InvalidConfig(String),
}

/// Errors related to file I/O and serialization.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("IO operation failed")]
    Io(#[from] std::io::Error),

    #[error("Serialization failed")]
    Json(#[from] serde_json::Error),

    #[error("File system error: {0}")]
    FileSystem(String),
}

/// Errors raised by the replay buffer.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Replay buffer capacity must be positive")]
    ZeroCapacity,

    #[error("Priority update index {index} out of bounds (size {size})")]
    PriorityIndexOutOfBounds { index: usize, size: usize },

    #[error("Mismatched priority update lengths: {indices} indices, {priorities} priorities")]
    MismatchedPriorityLengths { indices: usize, priorities: usize },
}

/// Errors raised by the seed manager.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("Seed manager is not initialized; call set_master or set_random first")]
    NotInitialized,

    #[error("Seed manager lock poisoned")]
    Poisoned,
}

/// Errors related to internal invariants and bugs.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}
