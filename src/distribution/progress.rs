use super::types::SourceKind;
use std::fmt;

/// Stage a single source attempt has reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
   Downloading,
   Verifying,
   Extracting,
   Completed,
   Failed { reason: String },
}

impl TransferStatus {
   pub fn as_str(&self) -> &'static str {
      match self {
         TransferStatus::Downloading => "downloading",
         TransferStatus::Verifying => "verifying",
         TransferStatus::Extracting => "extracting",
         TransferStatus::Completed => "completed",
         TransferStatus::Failed { .. } => "failed",
      }
   }

   pub fn failure_reason(&self) -> Option<&str> {
      match self {
         TransferStatus::Failed { reason } => Some(reason),
         _ => None,
      }
   }
}

impl fmt::Display for TransferStatus {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      match self {
         TransferStatus::Failed { reason } => write!(f, "failed: {}", reason),
         other => f.write_str(other.as_str()),
      }
   }
}

/// Progress of one source of one distributed item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferProgress {
   /// `{name}_{version}` for addons, the package name for dependency packages.
   pub item: String,
   pub source: SourceKind,
   pub status: TransferStatus,
}

/// Receives every stage change while items are distributed.
pub trait ProgressListener: Send + Sync {
   fn on_progress(&self, progress: &TransferProgress);
}

impl<F> ProgressListener for F
where
   F: Fn(&TransferProgress) + Send + Sync,
{
   fn on_progress(&self, progress: &TransferProgress) {
      self(progress)
   }
}
