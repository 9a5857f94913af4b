use super::{
   archive::has_supported_extension,
   client::{addon_private_file_url, dependency_package_url},
   types::{AddonSource, SourceKind, current_platform_name},
};
use crate::errors::{DistributionError, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::{
   collections::HashMap,
   fs::{self, File},
   io::{BufWriter, Write},
   path::{Path, PathBuf},
};
use url::Url;

pub const HTTP_CHUNK_SIZE: usize = 100_000;
pub const SERVER_CHUNK_SIZE: usize = 8192;

/// What is being downloaded; the server downloader needs it to build URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
   Addon {
      name: String,
      version: String,
   },
   DependencyPackage {
      name: String,
      platform: String,
      endpoint: Option<Url>,
   },
}

/// Per-item context shared by every source of that item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
   pub target: DownloadTarget,
   pub token: Option<String>,
}

/// A local archive ready for verification.
///
/// `owned` is false when the downloader points at a file it did not create
/// (filesystem sources); such files are extracted but never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArchive {
   pub path: PathBuf,
   pub owned: bool,
}

#[async_trait]
pub trait Downloader: Send + Sync {
   /// Make the archive for `source` available locally, downloading into
   /// `destination_dir` when it is not already on disk.
   async fn fetch(
      &self,
      source: &AddonSource,
      destination_dir: &Path,
      request: &DownloadRequest,
   ) -> Result<FetchedArchive>;
}

/// Downloaders keyed by source kind, built once and passed to the orchestrator.
#[derive(Default)]
pub struct DownloaderRegistry {
   downloaders: HashMap<SourceKind, Box<dyn Downloader>>,
}

impl DownloaderRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   /// Filesystem, HTTP and server downloaders sharing one HTTP client.
   pub fn with_defaults(http: reqwest::Client, server_url: Option<Url>) -> Self {
      let mut registry = Self::new();
      registry.register(SourceKind::Filesystem, FilesystemDownloader::default());
      registry.register(SourceKind::Http, HttpDownloader::new(http.clone()));
      registry.register(SourceKind::Server, ServerDownloader::new(http, server_url));
      registry
   }

   /// Replace the downloader used for `kind`.
   pub fn register(&mut self, kind: SourceKind, downloader: impl Downloader + 'static) {
      self.downloaders.insert(kind, Box::new(downloader));
   }

   /// Missing kinds are a deployment error, not a source failure.
   pub fn get(&self, kind: SourceKind) -> Result<&dyn Downloader> {
      self
         .downloaders
         .get(&kind)
         .map(|downloader| &**downloader)
         .ok_or_else(|| DistributionError::UnknownDownloaderKind(kind.to_string()))
   }
}

fn wrong_source(expected: SourceKind, source: &AddonSource) -> DistributionError {
   DistributionError::Config(format!(
      "{} downloader received a '{}' source",
      expected,
      source.kind()
   ))
}

/// Append `.zip` unless the name already ends with a supported archive extension.
pub fn archive_file_name(name: &str) -> String {
   if has_supported_extension(name) {
      name.to_string()
   } else {
      format!("{}.zip", name)
   }
}

/// Last path component of a URL path or a filename.
fn basename(value: &str) -> &str {
   value
      .trim_end_matches('/')
      .rsplit(['/', '\\'])
      .next()
      .unwrap_or_default()
}

fn dir_name(path: &Path) -> String {
   path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| "download".to_string())
}

/// Output name for an HTTP source: explicit filename, else the URL's last path
/// segment, else the destination directory's own name.
fn http_file_name(url: &str, filename: Option<&str>, destination_dir: &Path) -> String {
   if let Some(filename) = filename.filter(|name| !name.is_empty()) {
      return archive_file_name(basename(filename));
   }

   let from_url = Url::parse(url)
      .ok()
      .and_then(|parsed| {
         parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
      })
      .filter(|segment| !segment.is_empty());

   archive_file_name(&from_url.unwrap_or_else(|| dir_name(destination_dir)))
}

/// Write the response body to `path` chunk by chunk. Returns the byte count.
async fn stream_to_file(response: reqwest::Response, path: &Path, chunk_size: usize) -> Result<u64> {
   let status = response.status();
   if !status.is_success() {
      return Err(DistributionError::SourceUnavailable(format!(
         "GET {} returned HTTP {}",
         response.url(),
         status
      )));
   }

   // Stream the body, never holding a whole archive in memory
   let mut writer = BufWriter::with_capacity(chunk_size, File::create(path)?);
   let mut stream = response.bytes_stream();
   let mut written = 0u64;
   while let Some(chunk) = stream.next().await {
      let chunk = chunk?;
      writer.write_all(&chunk)?;
      written += chunk.len() as u64;
   }
   writer.flush()?;

   Ok(written)
}

/// Uses archives already reachable on a mounted filesystem.
pub struct FilesystemDownloader {
   platform: String,
}

impl Default for FilesystemDownloader {
   fn default() -> Self {
      Self::for_platform(current_platform_name())
   }
}

impl FilesystemDownloader {
   pub fn for_platform(platform: &str) -> Self {
      Self {
         platform: platform.to_string(),
      }
   }
}

#[async_trait]
impl Downloader for FilesystemDownloader {
   async fn fetch(
      &self,
      source: &AddonSource,
      _destination_dir: &Path,
      _request: &DownloadRequest,
   ) -> Result<FetchedArchive> {
      let AddonSource::Filesystem { path } = source else {
         return Err(wrong_source(SourceKind::Filesystem, source));
      };

      let local = path.for_platform(&self.platform).ok_or_else(|| {
         DistributionError::SourceUnavailable(format!("no path defined for {}", self.platform))
      })?;
      let local = PathBuf::from(local);
      if !local.exists() {
         return Err(DistributionError::SourceUnavailable(format!(
            "{:?} is not accessible",
            local
         )));
      }

      Ok(FetchedArchive {
         path: local,
         owned: false,
      })
   }
}

/// Plain HTTP(S) downloads with optional extra headers.
pub struct HttpDownloader {
   client: reqwest::Client,
}

impl HttpDownloader {
   pub fn new(client: reqwest::Client) -> Self {
      Self { client }
   }
}

#[async_trait]
impl Downloader for HttpDownloader {
   async fn fetch(
      &self,
      source: &AddonSource,
      destination_dir: &Path,
      _request: &DownloadRequest,
   ) -> Result<FetchedArchive> {
      let AddonSource::Web {
         url,
         filename,
         headers,
      } = source
      else {
         return Err(wrong_source(SourceKind::Http, source));
      };

      fs::create_dir_all(destination_dir)?;
      let path = destination_dir.join(http_file_name(url, filename.as_deref(), destination_dir));
      log::debug!("Downloading {} to {:?}", url, path);

      // Add source-specific headers
      let mut request = self.client.get(url.as_str());
      for (key, value) in headers {
         request = request.header(key.as_str(), value.as_str());
      }

      let response = request.send().await?;
      let written = stream_to_file(response, &path, HTTP_CHUNK_SIZE).await?;
      log::info!("Downloaded {} bytes from {}", written, url);

      Ok(FetchedArchive { path, owned: true })
   }
}

/// Fetches private addon files and dependency packages from the server itself.
pub struct ServerDownloader {
   client: reqwest::Client,
   server_url: Option<Url>,
}

impl ServerDownloader {
   pub fn new(client: reqwest::Client, server_url: Option<Url>) -> Self {
      Self { client, server_url }
   }

   /// Private addon file URL, or the package endpoint for dependency packages.
   fn resource_url(&self, base: &Url, filename: &str, target: &DownloadTarget) -> Result<Url> {
      match target {
         DownloadTarget::Addon { name, version } => {
            addon_private_file_url(base, name, version, filename)
         }
         DownloadTarget::DependencyPackage {
            name,
            platform,
            endpoint,
         } => match endpoint {
            Some(endpoint) => Ok(endpoint.clone()),
            None => dependency_package_url(base, name, platform),
         },
      }
   }
}

#[async_trait]
impl Downloader for ServerDownloader {
   async fn fetch(
      &self,
      source: &AddonSource,
      destination_dir: &Path,
      request: &DownloadRequest,
   ) -> Result<FetchedArchive> {
      let AddonSource::ServerResource { filename } = source else {
         return Err(wrong_source(SourceKind::Server, source));
      };
      let base = self
         .server_url
         .as_ref()
         .ok_or(DistributionError::MissingServerUrl)?;

      // Resolve the server URL for this item
      let url = self.resource_url(base, filename, &request.target)?;
      fs::create_dir_all(destination_dir)?;
      let path = destination_dir.join(archive_file_name(basename(filename)));
      log::debug!("Downloading {} to {:?}", url, path);

      let mut builder = self
         .client
         .get(url.clone())
         .header(CONTENT_TYPE, "application/octet-stream");
      // Authenticate
      match &request.token {
         Some(token) => builder = builder.header(AUTHORIZATION, format!("Bearer {}", token)),
         None => log::warn!("No token available for {}, request is unauthenticated", url),
      }

      let response = builder.send().await?;
      let written = stream_to_file(response, &path, SERVER_CHUNK_SIZE).await?;
      log::info!("Downloaded {} bytes from {}", written, url);

      Ok(FetchedArchive { path, owned: true })
   }
}
