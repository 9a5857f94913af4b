use super::types::AddonSource;
use crate::{
   errors::Result,
   utils::{read_json_or_default, write_json_atomic},
};
use serde::{Deserialize, Serialize};
use std::{
   collections::BTreeMap,
   path::{Path, PathBuf},
};

pub const ADDONS_METADATA_FILE: &str = "addons.json";
pub const DEPENDENCY_METADATA_FILE: &str = "dependency.json";

/// Which source delivered an item and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRecord {
   pub source: AddonSource,
   pub file_hash: Option<String>,
   pub distributed_dt: String,
}

impl DistributionRecord {
   pub fn now(source: AddonSource, file_hash: Option<String>) -> Self {
      Self {
         source,
         file_hash,
         distributed_dt: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
      }
   }
}

/// `{addon_name: {version: record}}`
pub type AddonsMetadata = BTreeMap<String, BTreeMap<String, DistributionRecord>>;
/// `{package_name: record}`
pub type DependencyMetadata = BTreeMap<String, DistributionRecord>;

pub fn addons_metadata_path(addons_root: &Path) -> PathBuf {
   addons_root.join(ADDONS_METADATA_FILE)
}

pub fn dependency_metadata_path(dependencies_root: &Path) -> PathBuf {
   dependencies_root.join(DEPENDENCY_METADATA_FILE)
}

pub fn read_addons_metadata(addons_root: &Path) -> Result<AddonsMetadata> {
   read_json_or_default(&addons_metadata_path(addons_root))
}

pub fn record_addon(
   addons_root: &Path,
   name: &str,
   version: &str,
   record: DistributionRecord,
) -> Result<()> {
   let mut metadata = read_addons_metadata(addons_root)?;
   metadata
      .entry(name.to_string())
      .or_default()
      .insert(version.to_string(), record);
   write_json_atomic(&addons_metadata_path(addons_root), &metadata)
}

pub fn read_dependency_metadata(dependencies_root: &Path) -> Result<DependencyMetadata> {
   read_json_or_default(&dependency_metadata_path(dependencies_root))
}

pub fn record_dependency_package(
   dependencies_root: &Path,
   name: &str,
   record: DistributionRecord,
) -> Result<()> {
   let mut metadata = read_dependency_metadata(dependencies_root)?;
   metadata.insert(name.to_string(), record);
   write_json_atomic(&dependency_metadata_path(dependencies_root), &metadata)
}
