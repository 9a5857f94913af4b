use crate::distribution::types::InstallationOutcome;
use std::{collections::BTreeMap, io, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DistributionError {
   #[error("Malformed server payload: {0}")]
   MalformedPayload(String),
   #[error("Downloader '{0}' not implemented")]
   UnknownDownloaderKind(String),
   #[error("Source unavailable: {0}")]
   SourceUnavailable(String),
   #[error("{path:?} doesn't match expected {algorithm} hash (expected {expected}, got {actual})")]
   IntegrityMismatch {
      path: PathBuf,
      algorithm: String,
      expected: String,
      actual: String,
   },
   #[error("Archive {path:?} could not be extracted: {reason}")]
   ArchiveCorrupt { path: PathBuf, reason: String },
   #[error("Unsupported archive format: {0:?}")]
   UnsupportedArchive(PathBuf),
   #[error("{0} has no checksum to verify against")]
   MissingChecksum(String),
   #[error("Unable to distribute {item}: every source failed, last error: {reason}")]
   AllSourcesExhausted { item: String, reason: String },
   #[error("{0} doesn't have any sources to download from")]
   MissingSources(String),
   #[error("Unable to update some addons: {}", format_outcomes(.outcomes, .reasons))]
   DistributionIncomplete {
      outcomes: BTreeMap<String, InstallationOutcome>,
      /// Last failure reported by the sources of each item, when any.
      reasons: BTreeMap<String, String>,
   },
   #[error("Server does not define a production dependency package")]
   NoDependencyPackage,
   #[error("Server URL is not configured (set AYON_SERVER_URL)")]
   MissingServerUrl,
   #[error("Config error: {0}")]
   Config(String),
   #[error("Network error: {0}")]
   Network(#[from] reqwest::Error),
   #[error("I/O error: {0}")]
   Io(#[from] io::Error),
   #[error("Serialization error: {0}")]
   Serde(#[from] serde_json::Error),
   #[error("Invalid URL: {0}")]
   Url(#[from] url::ParseError),
}

impl DistributionError {
   /// Failures scoped to a single source attempt. The orchestrator falls
   /// through to the next declared source for these and propagates the rest.
   pub fn is_source_level(&self) -> bool {
      matches!(
         self,
         Self::SourceUnavailable(_)
            | Self::IntegrityMismatch { .. }
            | Self::ArchiveCorrupt { .. }
            | Self::UnsupportedArchive(_)
            | Self::MissingChecksum(_)
            | Self::Network(_)
            | Self::Io(_)
      )
   }
}

fn format_outcomes(
   outcomes: &BTreeMap<String, InstallationOutcome>,
   reasons: &BTreeMap<String, String>,
) -> String {
   outcomes
      .iter()
      .map(|(name, outcome)| match reasons.get(name) {
         Some(reason) => format!("{name}: {outcome} ({reason})"),
         None => format!("{name}: {outcome}"),
      })
      .collect::<Vec<_>>()
      .join(", ")
}

pub type Result<T> = std::result::Result<T, DistributionError>;
