//! Server endpoints for addon and dependency package discovery.

use super::types::{
   AddonDescriptor, AddonSource, DependencyPackageDescriptor, parse_addon,
   parse_dependency_package,
};
use crate::errors::{DistributionError, Result};
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use url::Url;

pub const ADDONS_ENDPOINT: &str = "api/addons?details=1";
pub const DEPENDENCIES_ENDPOINT: &str = "api/dependencies";

/// Base URL without a trailing slash, the form used as the credential key.
pub fn normalize_server_url(url: &str) -> String {
   url.trim().trim_end_matches('/').to_string()
}

fn join(base: &Url, path: &str) -> Result<Url> {
   Ok(Url::parse(&format!(
      "{}/{}",
      normalize_server_url(base.as_str()),
      path
   ))?)
}

pub fn addon_private_file_url(base: &Url, name: &str, version: &str, filename: &str) -> Result<Url> {
   join(
      base,
      &format!("api/addons/{}/{}/private/{}", name, version, filename),
   )
}

/// `{scheme}://{netloc}/api/dependencies/{package}/{platform}`
pub fn dependency_package_url(base: &Url, package_name: &str, platform: &str) -> Result<Url> {
   Ok(Url::parse(&format!(
      "{}/api/dependencies/{}/{}",
      base.origin().ascii_serialization(),
      package_name,
      platform
   ))?)
}

/// Rewrite an `http` source that points at the server's own private addon
/// files into a `server` source, so it is fetched with authentication.
pub fn try_convert_to_server_source(
   base: &Url,
   addon: &AddonDescriptor,
   source: &AddonSource,
) -> AddonSource {
   let AddonSource::Web { url, .. } = source else {
      return source.clone();
   };

   let mut candidates = vec![url.clone()];
   if url.contains("https://") {
      candidates.push(url.replace("https://", "http://"));
   } else if url.contains("http://") {
      candidates.push(url.replace("http://", "https://"));
   }

   let prefix = format!(
      "{}/addons/{}/{}/private/",
      normalize_server_url(base.as_str()),
      addon.name,
      addon.version
   );

   candidates
      .iter()
      .find_map(|candidate| candidate.strip_prefix(&prefix))
      .filter(|filename| !filename.is_empty())
      .map(|filename| AddonSource::ServerResource {
         filename: filename.to_string(),
      })
      .unwrap_or_else(|| source.clone())
}

async fn get_json(http: &reqwest::Client, endpoint: &Url, token: Option<&str>) -> Result<Value> {
   let mut request = http.get(endpoint.clone());
   if let Some(token) = token {
      request = request.header(AUTHORIZATION, format!("Bearer {}", token));
   }

   let response = request.send().await?;
   let status = response.status();
   if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(DistributionError::SourceUnavailable(format!(
         "GET {} returned HTTP {}: {}",
         endpoint, status, body
      )));
   }

   Ok(response.json::<Value>().await?)
}

/// Addons with a production version. Entries without one are skipped.
pub async fn list_addons(
   http: &reqwest::Client,
   endpoint: &Url,
   token: Option<&str>,
) -> Result<Vec<AddonDescriptor>> {
   let payload = get_json(http, endpoint, token).await?;
   let entries = payload
      .get("addons")
      .and_then(Value::as_array)
      .ok_or_else(|| DistributionError::MalformedPayload("response has no 'addons' list".into()))?;

   let mut addons = Vec::new();
   for entry in entries {
      match parse_addon(entry)? {
         Some(addon) => addons.push(addon),
         None => log::debug!(
            "Skipping addon {} without production version",
            entry.get("name").and_then(Value::as_str).unwrap_or("<unnamed>")
         ),
      }
   }

   log::info!("Server lists {} active addons", addons.len());
   Ok(addons)
}

/// The package named by `productionPackage`, if any.
pub async fn get_active_dependency_package(
   http: &reqwest::Client,
   endpoint: &Url,
   token: Option<&str>,
) -> Result<Option<DependencyPackageDescriptor>> {
   let payload = get_json(http, endpoint, token).await?;

   let Some(production) = payload.get("productionPackage").and_then(Value::as_str) else {
      return Ok(None);
   };

   let packages = payload
      .get("packages")
      .and_then(Value::as_array)
      .ok_or_else(|| DistributionError::MalformedPayload("response has no 'packages' list".into()))?;

   Ok(packages
      .iter()
      .filter_map(parse_dependency_package)
      .find(|package| package.name == production))
}

/// Configured HTTP client bound to one server.
#[derive(Debug, Clone)]
pub struct ServerClient {
   http: reqwest::Client,
   base_url: Url,
   token: Option<String>,
}

impl ServerClient {
   pub fn new(http: reqwest::Client, base_url: Url, token: Option<String>) -> Self {
      Self {
         http,
         base_url,
         token,
      }
   }

   pub fn base_url(&self) -> &Url {
      &self.base_url
   }

   pub fn token(&self) -> Option<&str> {
      self.token.as_deref()
   }

   pub fn addons_endpoint(&self) -> Result<Url> {
      join(&self.base_url, ADDONS_ENDPOINT)
   }

   pub fn dependencies_endpoint(&self) -> Result<Url> {
      join(&self.base_url, DEPENDENCIES_ENDPOINT)
   }

   pub async fn list_addons(&self) -> Result<Vec<AddonDescriptor>> {
      list_addons(&self.http, &self.addons_endpoint()?, self.token()).await
   }

   pub async fn active_dependency_package(&self) -> Result<Option<DependencyPackageDescriptor>> {
      get_active_dependency_package(&self.http, &self.dependencies_endpoint()?, self.token()).await
   }
}
