//! Last-used server bookkeeping and bearer token lookup.

use crate::{
   distribution::client::normalize_server_url,
   errors::{DistributionError, Result},
   utils::{read_json_or_default, write_json_atomic},
};
use serde::{Deserialize, Serialize};
use std::{
   collections::HashMap,
   path::PathBuf,
};

pub const SERVERS_FILE: &str = "used_servers.json";

/// Source of bearer tokens, keyed by normalized server base URL.
pub trait CredentialStore: Send + Sync {
   fn load_token(&self, url: &str) -> Option<String>;
}

/// Reads the token from an environment variable, whatever the server.
pub struct EnvCredentialStore {
   var: String,
}

impl EnvCredentialStore {
   pub fn new(var: impl Into<String>) -> Self {
      Self { var: var.into() }
   }
}

impl CredentialStore for EnvCredentialStore {
   fn load_token(&self, _url: &str) -> Option<String> {
      std::env::var(&self.var)
         .ok()
         .map(|token| token.trim().to_string())
         .filter(|token| !token.is_empty())
   }
}

#[derive(Debug, Default, Clone)]
pub struct StaticCredentialStore {
   tokens: HashMap<String, String>,
}

impl StaticCredentialStore {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn with_token(mut self, url: &str, token: impl Into<String>) -> Self {
      self.tokens.insert(normalize_server_url(url), token.into());
      self
   }
}

impl CredentialStore for StaticCredentialStore {
   fn load_token(&self, url: &str) -> Option<String> {
      self.tokens.get(&normalize_server_url(url)).cloned()
   }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ServersFile {
   #[serde(default)]
   last_server: Option<String>,
   #[serde(default)]
   urls: Vec<String>,
}

/// Persists the servers this machine connected to, most recent first.
#[derive(Debug, Clone)]
pub struct ServerInfoStore {
   path: PathBuf,
}

impl ServerInfoStore {
   pub fn new(path: PathBuf) -> Self {
      Self { path }
   }

   /// `{data_local_dir}/openpype/used_servers.json`
   pub fn default_location() -> Result<Self> {
      let data_dir = dirs::data_local_dir()
         .ok_or_else(|| DistributionError::Config("Failed to get local data directory".into()))?;
      Ok(Self::new(data_dir.join("openpype").join(SERVERS_FILE)))
   }

   pub fn get_last_server_url(&self) -> Result<Option<String>> {
      Ok(read_json_or_default::<ServersFile>(&self.path)?.last_server)
   }

   pub fn set_last_server_url(&self, url: &str) -> Result<()> {
      let url = normalize_server_url(url);
      let mut servers: ServersFile = read_json_or_default(&self.path)?;
      servers.urls.retain(|known| known != &url);
      servers.urls.insert(0, url.clone());
      servers.last_server = Some(url);
      write_json_atomic(&self.path, &servers)
   }

   pub fn known_servers(&self) -> Result<Vec<String>> {
      Ok(read_json_or_default::<ServersFile>(&self.path)?.urls)
   }
}
