use crate::errors::{DistributionError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{collections::BTreeMap, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
   Filesystem,
   Http,
   Server,
}

impl SourceKind {
   pub fn as_str(self) -> &'static str {
      match self {
         SourceKind::Filesystem => "filesystem",
         SourceKind::Http => "http",
         SourceKind::Server => "server",
      }
   }

   pub fn from_tag(tag: &str) -> Option<Self> {
      match tag {
         "filesystem" => Some(Self::Filesystem),
         "http" => Some(Self::Http),
         "server" => Some(Self::Server),
         _ => None,
      }
   }
}

impl fmt::Display for SourceKind {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Name the server uses for the running operating system.
pub fn current_platform_name() -> &'static str {
   match std::env::consts::OS {
      "windows" => "windows",
      "macos" => "darwin",
      _ => "linux",
   }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformPaths {
   #[serde(default)]
   pub windows: Option<String>,
   #[serde(default)]
   pub linux: Option<String>,
   #[serde(default)]
   pub darwin: Option<String>,
}

impl PlatformPaths {
   pub fn for_platform(&self, platform: &str) -> Option<&str> {
      match platform {
         "windows" => self.windows.as_deref(),
         "darwin" => self.darwin.as_deref(),
         "linux" => self.linux.as_deref(),
         _ => None,
      }
   }

   pub fn for_current_platform(&self) -> Option<&str> {
      self.for_platform(current_platform_name())
   }
}

/// One declared way to obtain the bytes of an addon or dependency package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AddonSource {
   #[serde(rename = "filesystem")]
   Filesystem {
      #[serde(default)]
      path: PlatformPaths,
   },
   #[serde(rename = "http")]
   Web {
      url: String,
      #[serde(default, skip_serializing_if = "Option::is_none")]
      filename: Option<String>,
      #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
      headers: BTreeMap<String, String>,
   },
   #[serde(rename = "server")]
   ServerResource { filename: String },
}

impl AddonSource {
   pub fn kind(&self) -> SourceKind {
      match self {
         AddonSource::Filesystem { .. } => SourceKind::Filesystem,
         AddonSource::Web { .. } => SourceKind::Http,
         AddonSource::ServerResource { .. } => SourceKind::Server,
      }
   }

   pub fn web(url: impl Into<String>) -> Self {
      AddonSource::Web {
         url: url.into(),
         filename: None,
         headers: BTreeMap::new(),
      }
   }
}

/// An addon at its production version, as announced by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonDescriptor {
   pub name: String,
   pub version: String,
   pub title: Option<String>,
   pub description: Option<String>,
   pub license: Option<String>,
   pub authors: Vec<String>,
   pub sources: Vec<AddonSource>,
   pub unknown_sources: Vec<Value>,
   pub hash: Option<String>,
}

impl AddonDescriptor {
   /// Local identifier, also the name of the install directory.
   pub fn identifier(&self) -> String {
      format!("{}_{}", self.name, self.version)
   }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyPackageDescriptor {
   pub name: String,
   pub platform: String,
   pub checksum: Option<String>,
   pub sources: Vec<AddonSource>,
   pub unknown_sources: Vec<Value>,
   pub addon_list: Vec<String>,
   pub python_modules: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallationOutcome {
   #[serde(rename = "exists")]
   Exists,
   #[serde(rename = "updated")]
   Updated,
   #[serde(rename = "failed_no_download_source")]
   FailedMissingSource,
   #[serde(rename = "failed")]
   Failed,
}

impl InstallationOutcome {
   pub fn as_str(self) -> &'static str {
      match self {
         InstallationOutcome::Exists => "exists",
         InstallationOutcome::Updated => "updated",
         InstallationOutcome::FailedMissingSource => "failed_no_download_source",
         InstallationOutcome::Failed => "failed",
      }
   }
}

impl fmt::Display for InstallationOutcome {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.write_str(self.as_str())
   }
}

/// Parse one entry of the server's addon list.
///
/// Returns `Ok(None)` when the addon has no production version. A production
/// version that is missing from `versions` is a malformed payload.
pub fn parse_addon(payload: &Value) -> Result<Option<AddonDescriptor>> {
   let Some(version) = production_version(payload.get("productionVersion")) else {
      return Ok(None);
   };

   let name = payload
      .get("name")
      .and_then(Value::as_str)
      .ok_or_else(|| DistributionError::MalformedPayload("addon entry without 'name'".into()))?
      .to_string();

   let version_info = payload
      .get("versions")
      .and_then(|versions| versions.get(&version))
      .ok_or_else(|| {
         DistributionError::MalformedPayload(format!(
            "addon '{}' has no entry for production version '{}'",
            name, version
         ))
      })?;

   let label = format!("{}_{}", name, version);
   let (sources, unknown_sources) = classify_sources(&label, version_info.get("clientSourceInfo"));

   // Metadata sits at the addon level; older servers put it on the version.
   let field = |key: &str| {
      string_field(payload, key).or_else(|| string_field(version_info, key))
   };

   let authors = payload
      .get("authors")
      .or_else(|| version_info.get("authors"))
      .and_then(Value::as_array)
      .map(|authors| {
         authors
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
      })
      .unwrap_or_default();

   Ok(Some(AddonDescriptor {
      title: field("title"),
      description: field("description"),
      license: field("license"),
      hash: field("hash"),
      authors,
      name,
      version,
      sources,
      unknown_sources,
   }))
}

/// Parse one entry of the server's dependency package list.
pub fn parse_dependency_package(payload: &Value) -> Option<DependencyPackageDescriptor> {
   let name = string_field(payload, "name").filter(|name| !name.is_empty())?;
   let (sources, unknown_sources) = classify_sources(&name, payload.get("sources"));

   let addon_list = payload
      .get("supportedAddons")
      .and_then(Value::as_object)
      .map(|addons| {
         addons
            .iter()
            .map(|(addon_name, version)| match version {
               Value::String(version) => format!("{}_{}", addon_name, version),
               other => format!("{}_{}", addon_name, other),
            })
            .collect()
      })
      .unwrap_or_default();

   let python_modules = payload
      .get("pythonModules")
      .and_then(Value::as_object)
      .map(|modules| modules.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
      .unwrap_or_default();

   Some(DependencyPackageDescriptor {
      platform: string_field(payload, "platform")
         .unwrap_or_else(|| current_platform_name().to_string()),
      checksum: string_field(payload, "checksum"),
      name,
      sources,
      unknown_sources,
      addon_list,
      python_modules,
   })
}

fn production_version(value: Option<&Value>) -> Option<String> {
   match value? {
      Value::String(version) if !version.is_empty() => Some(version.clone()),
      Value::Number(version) => Some(version.to_string()),
      _ => None,
   }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
   payload.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Split raw source entries into recognized variants and quarantined ones.
pub(crate) fn classify_sources(label: &str, raw: Option<&Value>) -> (Vec<AddonSource>, Vec<Value>) {
   let mut sources = Vec::new();
   let mut unknown = Vec::new();

   let Some(entries) = raw.and_then(Value::as_array) else {
      return (sources, unknown);
   };

   for entry in entries {
      let tag = entry.get("type").and_then(Value::as_str).unwrap_or_default();
      if SourceKind::from_tag(tag).is_none() {
         log::warn!("{}: unknown source type '{}', skipping", label, tag);
         unknown.push(entry.clone());
         continue;
      }

      match serde_json::from_value::<AddonSource>(entry.clone()) {
         Ok(source) => sources.push(source),
         Err(e) => {
            log::warn!("{}: invalid '{}' source ({}), skipping", label, tag, e);
            unknown.push(entry.clone());
         }
      }
   }

   (sources, unknown)
}
