//! Utility types for trait definitions.
use std::fmt;
use std::time::Duration;

/// Type to handle FMM related errors
#[derive(Debug)]
pub enum FmmError {
    /// Failure to run some business logic
    Failed(String),

    /// A translation operator could not be assembled, e.g. the kernel is
    /// singular at a required sample point. Fatal to initialisation.
    OperatorBuild(String),

    /// A requested operator key is outside the symmetry table for its
    /// interaction category. Indicates a programming defect, fatal.
    ConfigurationMismatch(String),

    /// A node's stored coefficient vector disagrees with the configured
    /// truncation order. Recoverable per node, never aborts a pass.
    DimensionMismatch {
        /// Arena index of the offending node
        node: usize,
        /// Expected coefficient count
        expected: usize,
        /// Found coefficient count
        found: usize,
    },

    /// The requested execution backend cannot run; callers fall back to the
    /// reference path transparently.
    BackendUnavailable(String),

    /// I/O failure
    Io(std::io::Error),
}

impl std::fmt::Display for FmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FmmError::Failed(e) => write!(f, "Failed: {}", e),
            FmmError::OperatorBuild(e) => write!(f, "Operator build failed: {}", e),
            FmmError::ConfigurationMismatch(e) => {
                write!(f, "Configuration mismatch: {}", e)
            }
            FmmError::DimensionMismatch {
                node,
                expected,
                found,
            } => write!(
                f,
                "Dimension mismatch at node {}: expected {} coefficients, found {}",
                node, expected, found
            ),
            FmmError::BackendUnavailable(e) => write!(f, "Backend unavailable: {}", e),
            FmmError::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for FmmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FmmError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FmmError {
    fn from(e: std::io::Error) -> Self {
        FmmError::Io(e)
    }
}

/// The four interaction categories served by the translation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InteractionCategory {
    /// Direct interactions between adjacent leaves (U list), self included.
    NearField,
    /// Same-level well-separated interactions (V list), multipole to local.
    SameLevel,
    /// Finer well-separated sources contributing to a coarser leaf target
    /// (W list), multipole to direct output.
    Upward,
    /// Coarser leaf sources contributing to a finer target's local expansion
    /// (X list).
    Downward,
}

/// Execution path selector for the Execute half of each interaction executor.
/// Setup output is backend-agnostic; both paths agree to within floating
/// point reassociation tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionBackend {
    /// Per-pair matrix-vector application.
    Reference,
    /// Gather sources per configuration group and apply one batched matrix
    /// product per group.
    #[default]
    Batched,
}

/// Operators applied during an FMM evaluation, used to label timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmmOperatorType {
    /// Multipole initialisation over source leaves
    InitMultipole,
    /// Child to parent multipole translation at a child level
    M2M(u32),
    /// Near-field (U list) interactions at a leaf level
    NearField(u32),
    /// Same-level well-separated (V list) interactions at a level
    SameLevel(u32),
    /// Well-separated upward (W list) interactions at a leaf level
    Upward(u32),
    /// Well-separated downward (X list) interactions at a level
    Downward(u32),
    /// Parent to child local translation at a child level
    L2L(u32),
    /// Local expansion to output coefficients over target leaves
    LeafOutput,
}

/// Wall-clock time taken by a single operator application.
#[derive(Debug, Clone, Copy)]
pub struct FmmOperatorTime {
    /// Operator label
    pub operator: FmmOperatorType,
    /// Elapsed time
    pub time: Duration,
}

impl FmmOperatorTime {
    /// Construct from an operator label and a measured duration.
    pub fn from_duration(operator: FmmOperatorType, time: Duration) -> Self {
        Self { operator, time }
    }
}
