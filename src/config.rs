use crate::errors::{DistributionError, Result};
use serde::{Deserialize, Serialize};
use std::{
   fs,
   path::{Path, PathBuf},
   time::Duration,
};
use url::Url;

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_API_KEY_ENV: &str = "AYON_API_KEY";

const APP_DIR: &str = "openpype";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
   pub server_url: Option<Url>,
   pub addons_dir: Option<PathBuf>,
   pub dependencies_dir: Option<PathBuf>,
   /// Longest silence tolerated between reads. Slow transfers that keep
   /// delivering bytes are never cut off.
   pub http_timeout_secs: u64,
   pub connect_timeout_secs: u64,
   /// Addons published without sources do not fail a distribution pass.
   pub allow_missing_source: bool,
   pub api_key_env: String,
}

impl Default for DistributionConfig {
   fn default() -> Self {
      Self {
         server_url: None,
         addons_dir: None,
         dependencies_dir: None,
         http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
         connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
         allow_missing_source: true,
         api_key_env: DEFAULT_API_KEY_ENV.to_string(),
      }
   }
}

impl DistributionConfig {
   pub fn from_toml_str(raw: &str) -> Result<Self> {
      toml::from_str(raw).map_err(|e| DistributionError::Config(e.to_string()))
   }

   /// Read the TOML file when given, then apply environment overrides.
   pub fn load(path: Option<&Path>) -> Result<Self> {
      let mut config = match path {
         Some(path) => {
            let raw = fs::read_to_string(path).map_err(|e| {
               DistributionError::Config(format!("Failed to read {:?}: {}", path, e))
            })?;
            Self::from_toml_str(&raw)?
         }
         None => Self::default(),
      };
      config.apply_overrides(|key| std::env::var(key).ok())?;
      Ok(config)
   }

   /// Environment wins over the file. `lookup` is `std::env::var` outside tests.
   pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
   where
      F: Fn(&str) -> Option<String>,
   {
      let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

      if let Some(url) = non_empty("AYON_SERVER_URL").or_else(|| non_empty("OPENPYPE_SERVER_URL")) {
         self.server_url = Some(Url::parse(url.trim())?);
      }
      if let Some(dir) = non_empty("AYON_ADDONS_DIR") {
         self.addons_dir = Some(PathBuf::from(dir));
      }
      if let Some(dir) = non_empty("AYON_DEPENDENCIES_DIR") {
         self.dependencies_dir = Some(PathBuf::from(dir));
      }
      Ok(())
   }

   pub fn http_client(&self) -> Result<reqwest::Client> {
      Ok(reqwest::Client::builder()
         .read_timeout(Duration::from_secs(self.http_timeout_secs))
         .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
         .build()?)
   }

   pub fn addons_dir(&self) -> Result<PathBuf> {
      match &self.addons_dir {
         Some(dir) => ensure_dir(dir.clone()),
         None => local_dir("addons"),
      }
   }

   pub fn dependencies_dir(&self) -> Result<PathBuf> {
      match &self.dependencies_dir {
         Some(dir) => ensure_dir(dir.clone()),
         None => local_dir("dependency_packages"),
      }
   }
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
   fs::create_dir_all(&dir)
      .map_err(|e| DistributionError::Config(format!("Cannot create {:?}: {}", dir, e)))?;
   Ok(dir)
}

/// `{data_local_dir}/openpype/{subdir}`, created if missing.
pub fn local_dir(subdir: &str) -> Result<PathBuf> {
   let data_dir = dirs::data_local_dir()
      .ok_or_else(|| DistributionError::Config("Failed to get local data directory".into()))?;
   ensure_dir(data_dir.join(APP_DIR).join(subdir))
}
