use serde::{Deserialize, Serialize};
use std::fmt;

/// Bulk operation lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Created at intake, nothing processed yet
    #[default]
    Pending,
    /// An execution path is working through the records
    Processing,
    /// Processing finished with at least one success (or nothing failed)
    Completed,
    /// Processing finished with zero successes and at least one failure
    Failed,
    /// Cancelled by the caller before finishing
    Cancelled,
}

impl OperationStatus {
    pub const NON_TERMINAL: [OperationStatus; 2] = [Self::Pending, Self::Processing];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if this is an active state (records are being processed)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Processing)
    }

    /// Final status shared by the inline and chunked execution paths.
    pub fn from_outcome(successful: u64, failed: u64) -> Self {
        if successful == 0 && failed > 0 {
            Self::Failed
        } else {
            Self::Completed
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OperationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid operation status: {s}")),
        }
    }
}

/// Per-record processing detail states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetailStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

impl DetailStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for DetailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DetailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid processing detail status: {s}")),
        }
    }
}
