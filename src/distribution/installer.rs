use super::{
   archive::{extract, unpack_and_discard},
   client::{ServerClient, dependency_package_url, normalize_server_url, try_convert_to_server_source},
   downloaders::{DownloadRequest, DownloadTarget, DownloaderRegistry},
   integrity::{HashAlgorithm, verify_hash},
   metadata::{DistributionRecord, record_addon, record_dependency_package},
   progress::{ProgressListener, TransferProgress, TransferStatus},
   types::{AddonDescriptor, AddonSource, InstallationOutcome},
};
use crate::{
   credentials::CredentialStore,
   errors::{DistributionError, Result},
};
use std::{
   collections::BTreeMap,
   fs,
   path::{Path, PathBuf},
   sync::Mutex,
};
use url::Url;

/// Server location and bearer token handed to downloaders.
#[derive(Debug, Clone, Default)]
pub struct AuthData {
   pub server_url: Option<Url>,
   pub token: Option<String>,
}

/// Which outcomes a full distribution pass tolerates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceptancePolicy {
   /// Addons published without any distributable source do not fail the pass.
   pub allow_missing_source: bool,
}

impl Default for AcceptancePolicy {
   fn default() -> Self {
      Self {
         allow_missing_source: true,
      }
   }
}

impl AcceptancePolicy {
   pub fn accepts(&self, outcome: InstallationOutcome) -> bool {
      match outcome {
         InstallationOutcome::Updated | InstallationOutcome::Exists => true,
         InstallationOutcome::FailedMissingSource => self.allow_missing_source,
         InstallationOutcome::Failed => false,
      }
   }
}

/// One addon or dependency package on its way to `target_dir`.
struct DistributionItem<'a> {
   label: String,
   target_dir: PathBuf,
   sources: Vec<AddonSource>,
   expected_hash: Option<&'a str>,
   algorithm: HashAlgorithm,
   request: DownloadRequest,
}

impl DistributionItem<'_> {
   fn report(&self, progress: &dyn ProgressListener, source: &AddonSource, status: TransferStatus) {
      progress.on_progress(&TransferProgress {
         item: self.label.clone(),
         source: source.kind(),
         status,
      });
   }
}

/// How the sources of one item fared.
struct SourcesReport {
   used_source: Option<AddonSource>,
   last_failure: Option<String>,
}

/// Forwards events and keeps the last failure reason of every item.
struct FailureReasons<'a> {
   inner: &'a dyn ProgressListener,
   reasons: Mutex<BTreeMap<String, String>>,
}

impl<'a> FailureReasons<'a> {
   fn new(inner: &'a dyn ProgressListener) -> Self {
      Self {
         inner,
         reasons: Mutex::new(BTreeMap::new()),
      }
   }

   fn into_reasons(self) -> BTreeMap<String, String> {
      self
         .reasons
         .into_inner()
         .unwrap_or_else(|poisoned| poisoned.into_inner())
   }
}

impl ProgressListener for FailureReasons<'_> {
   fn on_progress(&self, progress: &TransferProgress) {
      if let Some(reason) = progress.status.failure_reason()
         && let Ok(mut reasons) = self.reasons.lock()
      {
         reasons.insert(progress.item.clone(), reason.to_string());
      }
      self.inner.on_progress(progress);
   }
}

/// Remove a half-populated target directory.
fn remove_partial(dir: &Path) {
   if dir.is_dir() {
      log::debug!("Cleaning {:?}", dir);
      if let Err(e) = fs::remove_dir_all(dir) {
         log::warn!("Failed to clean {:?}: {}", dir, e);
      }
   }
}

/// Download, verify and unpack one source into the item's directory.
async fn attempt_source(
   item: &DistributionItem<'_>,
   source: &AddonSource,
   registry: &DownloaderRegistry,
   progress: &dyn ProgressListener,
) -> Result<()> {
   let downloader = registry.get(source.kind())?;

   // Download
   item.report(progress, source, TransferStatus::Downloading);
   fs::create_dir_all(&item.target_dir)?;
   let fetched = downloader
      .fetch(source, &item.target_dir, &item.request)
      .await?;

   // Verify checksum
   let expected = item
      .expected_hash
      .ok_or_else(|| DistributionError::MissingChecksum(item.label.clone()))?;
   item.report(progress, source, TransferStatus::Verifying);
   verify_hash(&fetched.path, expected, item.algorithm)?;

   // Extract, keeping archives we did not download
   item.report(progress, source, TransferStatus::Extracting);
   if fetched.owned {
      unpack_and_discard(&fetched.path, &item.target_dir)
   } else {
      extract(&fetched.path, &item.target_dir)
   }
}

/// Try each source in declared order until one downloads, verifies and
/// unpacks. The target directory never survives a failed attempt.
async fn distribute_from_sources(
   item: &DistributionItem<'_>,
   registry: &DownloaderRegistry,
   progress: &dyn ProgressListener,
) -> Result<SourcesReport> {
   let mut last_failure = None;

   for source in &item.sources {
      match attempt_source(item, source, registry, progress).await {
         Ok(()) => {
            log::info!("{}: distributed from {} source", item.label, source.kind());
            item.report(progress, source, TransferStatus::Completed);
            return Ok(SourcesReport {
               used_source: Some(source.clone()),
               last_failure,
            });
         }
         Err(e) if e.is_source_level() => {
            log::warn!("{}: {} source failed: {}", item.label, source.kind(), e);
            let reason = e.to_string();
            item.report(
               progress,
               source,
               TransferStatus::Failed {
                  reason: reason.clone(),
               },
            );
            last_failure = Some(reason);
            remove_partial(&item.target_dir);
         }
         Err(e) => {
            item.report(
               progress,
               source,
               TransferStatus::Failed {
                  reason: e.to_string(),
               },
            );
            remove_partial(&item.target_dir);
            return Err(e);
         }
      }
   }

   Ok(SourcesReport {
      used_source: None,
      last_failure,
   })
}

/// Bring every addon in `descriptors` to `{destination_root}/{name}_{version}`.
///
/// Per-item failures end up in the returned map and their reasons are sent to
/// `progress`; only deployment errors (unregistered downloader, missing
/// server URL) are returned as `Err`.
pub async fn reconcile_addons(
   descriptors: &[AddonDescriptor],
   destination_root: &Path,
   registry: &DownloaderRegistry,
   auth: &AuthData,
   progress: &dyn ProgressListener,
) -> Result<BTreeMap<String, InstallationOutcome>> {
   let mut outcomes = BTreeMap::new();

   for addon in descriptors {
      let identifier = addon.identifier();
      let target_dir = destination_root.join(&identifier);
      log::debug!("Checking {} in {:?}", identifier, target_dir);

      if target_dir.is_dir() {
         log::debug!("Addon version folder {:?} already exists", target_dir);
         outcomes.insert(identifier, InstallationOutcome::Exists);
         continue;
      }

      if addon.sources.is_empty() {
         log::warn!("{}: no sources to download from", identifier);
         outcomes.insert(identifier, InstallationOutcome::FailedMissingSource);
         continue;
      }

      // Files hosted by the server itself need the authenticated downloader
      let sources = match &auth.server_url {
         Some(base) => addon
            .sources
            .iter()
            .map(|source| try_convert_to_server_source(base, addon, source))
            .collect(),
         None => addon.sources.clone(),
      };

      let item = DistributionItem {
         label: identifier.clone(),
         target_dir,
         sources,
         expected_hash: addon.hash.as_deref(),
         algorithm: HashAlgorithm::Sha256,
         request: DownloadRequest {
            target: DownloadTarget::Addon {
               name: addon.name.clone(),
               version: addon.version.clone(),
            },
            token: auth.token.clone(),
         },
      };

      let report = distribute_from_sources(&item, registry, progress).await?;
      let outcome = match report.used_source {
         Some(source) => {
            let record = DistributionRecord::now(source, addon.hash.clone());
            if let Err(e) = record_addon(destination_root, &addon.name, &addon.version, record) {
               log::warn!("{}: failed to record distribution metadata: {}", identifier, e);
            }
            InstallationOutcome::Updated
         }
         None => {
            log::error!(
               "{}: failed to distribute from any source, last error: {}",
               identifier,
               report.last_failure.as_deref().unwrap_or("none")
            );
            InstallationOutcome::Failed
         }
      };
      outcomes.insert(identifier, outcome);
   }

   Ok(outcomes)
}

/// Token from the credential store for this server, else the client's own.
fn resolve_token(client: &ServerClient, credentials: &dyn CredentialStore) -> Option<String> {
   credentials
      .load_token(&normalize_server_url(client.base_url().as_str()))
      .or_else(|| client.token().map(str::to_string))
}

/// Distribute every active addon and fail unless all outcomes are acceptable.
///
/// The error names each rejected addon with the last reason its sources gave.
pub async fn enforce_all_updated(
   client: &ServerClient,
   destination_root: &Path,
   registry: &DownloaderRegistry,
   credentials: &dyn CredentialStore,
   policy: AcceptancePolicy,
   progress: &dyn ProgressListener,
) -> Result<BTreeMap<String, InstallationOutcome>> {
   let addons = client.list_addons().await?;
   fs::create_dir_all(destination_root)?;

   let auth = AuthData {
      server_url: Some(client.base_url().clone()),
      token: resolve_token(client, credentials),
   };
   let tracker = FailureReasons::new(progress);
   let outcomes = reconcile_addons(&addons, destination_root, registry, &auth, &tracker).await?;
   let mut reasons = tracker.into_reasons();

   let failed: BTreeMap<_, _> = outcomes
      .iter()
      .filter(|(_, outcome)| !policy.accepts(**outcome))
      .map(|(name, outcome)| (name.clone(), *outcome))
      .collect();

   if !failed.is_empty() {
      reasons.retain(|name, _| failed.contains_key(name));
      return Err(DistributionError::DistributionIncomplete {
         outcomes: failed,
         reasons,
      });
   }

   Ok(outcomes)
}

/// Make sure the production dependency package is unpacked under `local_root`.
/// Returns the package directory.
pub async fn ensure_dependency_package(
   client: &ServerClient,
   local_root: &Path,
   registry: &DownloaderRegistry,
   credentials: &dyn CredentialStore,
   progress: &dyn ProgressListener,
) -> Result<PathBuf> {
   let package = client
      .active_dependency_package()
      .await?
      .ok_or(DistributionError::NoDependencyPackage)?;

   let target_dir = local_root.join(&package.name);
   log::debug!("Checking {} in {:?}", package.name, local_root);

   if target_dir.is_dir() {
      log::debug!("Dependency package folder {:?} already exists", target_dir);
      return Ok(target_dir);
   }

   if package.sources.is_empty() {
      return Err(DistributionError::MissingSources(package.name));
   }

   let token = resolve_token(client, credentials);
   let endpoint = dependency_package_url(client.base_url(), &package.name, &package.platform)?;

   let item = DistributionItem {
      label: package.name.clone(),
      target_dir: target_dir.clone(),
      sources: package.sources.clone(),
      expected_hash: package.checksum.as_deref(),
      algorithm: HashAlgorithm::Md5,
      request: DownloadRequest {
         target: DownloadTarget::DependencyPackage {
            name: package.name.clone(),
            platform: package.platform.clone(),
            endpoint: Some(endpoint),
         },
         token,
      },
   };

   let report = distribute_from_sources(&item, registry, progress).await?;
   match report.used_source {
      Some(source) => {
         let record = DistributionRecord::now(source, package.checksum.clone());
         if let Err(e) = record_dependency_package(local_root, &package.name, record) {
            log::warn!("{}: failed to record distribution metadata: {}", package.name, e);
         }
         Ok(target_dir)
      }
      None => {
         remove_partial(&target_dir);
         Err(DistributionError::AllSourcesExhausted {
            item: package.name,
            reason: report.last_failure.unwrap_or_default(),
         })
      }
   }
}

/// Addon directories present on disk, in descriptor order.
pub fn installed_paths(descriptors: &[AddonDescriptor], destination_root: &Path) -> Vec<PathBuf> {
   descriptors
      .iter()
      .map(|addon| destination_root.join(addon.identifier()))
      .filter(|path| path.is_dir())
      .collect()
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{
      credentials::StaticCredentialStore,
      distribution::{
         archive::tests::zip_bytes,
         downloaders::FilesystemDownloader,
         integrity::compute_hash,
         metadata::read_addons_metadata,
         types::{PlatformPaths, SourceKind},
      },
   };
   use httpmock::prelude::*;
   use serde_json::json;
   use sha2::{Digest, Sha256};
   use tempfile::tempdir;

   fn ignore(_: &TransferProgress) {}

   fn sha256_hex(bytes: &[u8]) -> String {
      format!("{:x}", Sha256::digest(bytes))
   }

   fn addon(name: &str, version: &str, sources: Vec<AddonSource>, hash: Option<String>) -> AddonDescriptor {
      AddonDescriptor {
         name: name.into(),
         version: version.into(),
         title: None,
         description: None,
         license: None,
         authors: Vec::new(),
         sources,
         unknown_sources: Vec::new(),
         hash,
      }
   }

   fn registry() -> DownloaderRegistry {
      let mut registry = DownloaderRegistry::with_defaults(reqwest::Client::new(), None);
      registry.register(SourceKind::Filesystem, FilesystemDownloader::for_platform("linux"));
      registry
   }

   #[tokio::test]
   async fn reconcile_downloads_then_reports_exists() {
      let archive = zip_bytes(&[("slack/__init__.py", "VERSION = '1.0.0'")]);
      let server = MockServer::start();
      let mock = server.mock(|when, then| {
         when.method(GET).path("/slack.zip");
         then.status(200).body(archive.clone());
      });

      let temp = tempdir().unwrap();
      let addons = vec![addon(
         "slack",
         "1.0.0",
         vec![AddonSource::web(server.url("/slack.zip"))],
         Some(sha256_hex(&archive)),
      )];

      let first = reconcile_addons(&addons, temp.path(), &registry(), &AuthData::default(), &ignore)
         .await
         .unwrap();
      assert_eq!(first["slack_1.0.0"], InstallationOutcome::Updated);

      let installed = temp.path().join("slack_1.0.0");
      assert!(installed.join("slack/__init__.py").is_file());
      assert!(!installed.join("slack.zip").exists());

      let second = reconcile_addons(&addons, temp.path(), &registry(), &AuthData::default(), &ignore)
         .await
         .unwrap();
      assert_eq!(second["slack_1.0.0"], InstallationOutcome::Exists);
      mock.assert_calls(1);

      assert_eq!(installed_paths(&addons, temp.path()), vec![installed]);
   }

   #[tokio::test]
   async fn reconcile_falls_back_to_next_source() {
      let archive = zip_bytes(&[("ftrack/api.py", "pass")]);
      let server = MockServer::start();
      let broken = server.mock(|when, then| {
         when.method(GET).path("/mirror/ftrack.zip");
         then.status(200).body("truncated");
      });
      let good = server.mock(|when, then| {
         when.method(GET).path("/ftrack.zip");
         then.status(200).body(archive.clone());
      });

      let temp = tempdir().unwrap();
      let addons = vec![addon(
         "ftrack",
         "2.1.0",
         vec![
            AddonSource::web(server.url("/mirror/ftrack.zip")),
            AddonSource::web(server.url("/ftrack.zip")),
         ],
         Some(sha256_hex(&archive)),
      )];

      let outcomes = reconcile_addons(&addons, temp.path(), &registry(), &AuthData::default(), &ignore)
         .await
         .unwrap();

      assert_eq!(outcomes["ftrack_2.1.0"], InstallationOutcome::Updated);
      broken.assert_calls(1);
      good.assert_calls(1);
      let installed = temp.path().join("ftrack_2.1.0");
      assert!(installed.join("ftrack/api.py").is_file());
      assert!(!installed.join("ftrack.zip").exists());
   }

   #[tokio::test]
   async fn each_source_reports_its_stages() {
      let archive = zip_bytes(&[("ftrack/api.py", "pass")]);
      let server = MockServer::start();
      server.mock(|when, then| {
         when.method(GET).path("/mirror/ftrack.zip");
         then.status(503);
      });
      server.mock(|when, then| {
         when.method(GET).path("/ftrack.zip");
         then.status(200).body(archive.clone());
      });

      let temp = tempdir().unwrap();
      let addons = vec![addon(
         "ftrack",
         "2.1.0",
         vec![
            AddonSource::web(server.url("/mirror/ftrack.zip")),
            AddonSource::web(server.url("/ftrack.zip")),
         ],
         Some(sha256_hex(&archive)),
      )];

      let events = Mutex::new(Vec::new());
      let record = |progress: &TransferProgress| events.lock().unwrap().push(progress.clone());
      reconcile_addons(&addons, temp.path(), &registry(), &AuthData::default(), &record)
         .await
         .unwrap();

      let events = events.into_inner().unwrap();
      assert!(events.iter().all(|event| event.item == "ftrack_2.1.0"));
      let stages: Vec<_> = events.iter().map(|event| event.status.as_str()).collect();
      assert_eq!(
         stages,
         vec!["downloading", "failed", "downloading", "verifying", "extracting", "completed"]
      );
      let reason = events[1].status.failure_reason().unwrap();
      assert!(reason.contains("503"), "{reason}");
   }

   #[tokio::test]
   async fn rejected_addons_carry_their_failure_reason() {
      let archive = zip_bytes(&[("kitsu/api.py", "pass")]);
      let server = MockServer::start();
      server.mock(|when, then| {
         when.method(GET).path("/api/addons").query_param("details", "1");
         then.status(200).json_body(json!({
            "addons": [{
               "name": "kitsu",
               "productionVersion": "0.3.0",
               "versions": {"0.3.0": {
                  "hash": "0".repeat(64),
                  "clientSourceInfo": [{"type": "http", "url": server.url("/kitsu.zip")}]
               }}
            }]
         }));
      });
      server.mock(|when, then| {
         when.method(GET).path("/kitsu.zip");
         then.status(200).body(archive.clone());
      });

      let temp = tempdir().unwrap();
      let client = ServerClient::new(
         reqwest::Client::new(),
         Url::parse(&server.base_url()).unwrap(),
         None,
      );
      let err = enforce_all_updated(
         &client,
         temp.path(),
         &registry(),
         &StaticCredentialStore::new(),
         AcceptancePolicy::default(),
         &ignore,
      )
      .await
      .unwrap_err();

      match &err {
         DistributionError::DistributionIncomplete { outcomes, reasons } => {
            assert_eq!(outcomes["kitsu_0.3.0"], InstallationOutcome::Failed);
            assert!(reasons["kitsu_0.3.0"].contains("expected sha256 hash"));
         }
         other => panic!("unexpected error: {other}"),
      }
      assert!(err.to_string().contains("kitsu_0.3.0: failed ("));
   }

   #[tokio::test]
   async fn hash_mismatch_fails_without_unpacking() {
      let archive = zip_bytes(&[("kitsu/api.py", "pass")]);
      let server = MockServer::start();
      server.mock(|when, then| {
         when.method(GET).path("/kitsu.zip");
         then.status(200).body(archive.clone());
      });

      let temp = tempdir().unwrap();
      let addons = vec![addon(
         "kitsu",
         "0.3.0",
         vec![AddonSource::web(server.url("/kitsu.zip"))],
         Some("0".repeat(64)),
      )];

      let outcomes = reconcile_addons(&addons, temp.path(), &registry(), &AuthData::default(), &ignore)
         .await
         .unwrap();

      assert_eq!(outcomes["kitsu_0.3.0"], InstallationOutcome::Failed);
      assert!(!temp.path().join("kitsu_0.3.0").exists());
   }

   #[tokio::test]
   async fn missing_checksum_fails_the_source() {
      let temp = tempdir().unwrap();
      let archive_path = temp.path().join("shared.zip");
      fs::write(&archive_path, zip_bytes(&[("a.py", "pass")])).unwrap();

      let source = AddonSource::Filesystem {
         path: PlatformPaths {
            linux: Some(archive_path.to_string_lossy().into_owned()),
            ..Default::default()
         },
      };
      let root = temp.path().join("addons");
      let addons = vec![addon("clockify", "1.0.0", vec![source], None)];

      let outcomes = reconcile_addons(&addons, &root, &registry(), &AuthData::default(), &ignore)
         .await
         .unwrap();
      assert_eq!(outcomes["clockify_1.0.0"], InstallationOutcome::Failed);
   }

   #[tokio::test]
   async fn addon_without_sources_is_distinguished() {
      let temp = tempdir().unwrap();
      let addons = vec![addon("example", "0.1.0", Vec::new(), None)];

      let outcomes = reconcile_addons(&addons, temp.path(), &registry(), &AuthData::default(), &ignore)
         .await
         .unwrap();
      assert_eq!(outcomes["example_0.1.0"], InstallationOutcome::FailedMissingSource);
   }

   #[tokio::test]
   async fn filesystem_archive_is_extracted_and_kept() {
      let temp = tempdir().unwrap();
      let bytes = zip_bytes(&[("deadline/plugin.py", "pass")]);
      let archive_path = temp.path().join("deadline.zip");
      fs::write(&archive_path, &bytes).unwrap();

      let source = AddonSource::Filesystem {
         path: PlatformPaths {
            linux: Some(archive_path.to_string_lossy().into_owned()),
            ..Default::default()
         },
      };
      let root = temp.path().join("addons");
      let addons = vec![addon("deadline", "1.2.0", vec![source.clone()], Some(sha256_hex(&bytes)))];

      let outcomes = reconcile_addons(&addons, &root, &registry(), &AuthData::default(), &ignore)
         .await
         .unwrap();

      assert_eq!(outcomes["deadline_1.2.0"], InstallationOutcome::Updated);
      assert!(archive_path.exists());
      assert!(root.join("deadline_1.2.0/deadline/plugin.py").is_file());

      let metadata = read_addons_metadata(&root).unwrap();
      assert_eq!(metadata["deadline"]["1.2.0"].source, source);
   }

   #[tokio::test]
   async fn unregistered_downloader_propagates() {
      let temp = tempdir().unwrap();
      let addons = vec![addon(
         "slack",
         "1.0.0",
         vec![AddonSource::web("https://example/slack.zip")],
         Some("00".into()),
      )];

      let err = reconcile_addons(
         &addons,
         temp.path(),
         &DownloaderRegistry::new(),
         &AuthData::default(),
         &ignore,
      )
      .await
      .unwrap_err();
      assert!(matches!(err, DistributionError::UnknownDownloaderKind(_)));
      assert!(!temp.path().join("slack_1.0.0").exists());
   }

   #[tokio::test]
   async fn private_server_url_is_fetched_with_token() {
      let archive = zip_bytes(&[("perforce/api.py", "pass")]);
      let server = MockServer::start();
      let private = server.mock(|when, then| {
         when.method(GET)
            .path("/api/addons/perforce/1.0.0/private/perforce.zip")
            .header("authorization", "Bearer tok");
         then.status(200).body(archive.clone());
      });

      let base = Url::parse(&server.base_url()).unwrap();
      let temp = tempdir().unwrap();
      let addons = vec![addon(
         "perforce",
         "1.0.0",
         vec![AddonSource::web(server.url("/addons/perforce/1.0.0/private/perforce.zip"))],
         Some(sha256_hex(&archive)),
      )];
      let registry = DownloaderRegistry::with_defaults(reqwest::Client::new(), Some(base.clone()));
      let auth = AuthData {
         server_url: Some(base),
         token: Some("tok".into()),
      };

      let outcomes = reconcile_addons(&addons, temp.path(), &registry, &auth, &ignore).await.unwrap();
      assert_eq!(outcomes["perforce_1.0.0"], InstallationOutcome::Updated);
      private.assert();
   }

   #[test]
   fn policy_controls_missing_source_tolerance() {
      let lenient = AcceptancePolicy::default();
      let strict = AcceptancePolicy {
         allow_missing_source: false,
      };
      assert!(lenient.accepts(InstallationOutcome::FailedMissingSource));
      assert!(!strict.accepts(InstallationOutcome::FailedMissingSource));
      assert!(!lenient.accepts(InstallationOutcome::Failed));
      assert!(strict.accepts(InstallationOutcome::Exists));
   }

   #[tokio::test]
   async fn dependency_package_is_installed_once() {
      let temp = tempdir().unwrap();
      let bytes = zip_bytes(&[("site-packages/six.py", "six")]);
      let fixture = temp.path().join("fixture.zip");
      fs::write(&fixture, &bytes).unwrap();
      let checksum = compute_hash(&fixture, HashAlgorithm::Md5).unwrap();

      let server = MockServer::start();
      let listing = server.mock(|when, then| {
         when.method(GET).path("/api/dependencies");
         then.status(200).json_body(json!({
            "productionPackage": "deps-1",
            "packages": [{
               "name": "deps-1",
               "platform": "linux",
               "checksum": checksum,
               "sources": [{"type": "server", "filename": "deps-1.zip"}]
            }]
         }));
      });
      let download = server.mock(|when, then| {
         when.method(GET)
            .path("/api/dependencies/deps-1/linux")
            .header("authorization", "Bearer tok");
         then.status(200).body(bytes.clone());
      });

      let base = Url::parse(&server.base_url()).unwrap();
      let client = ServerClient::new(reqwest::Client::new(), base.clone(), None);
      let registry = DownloaderRegistry::with_defaults(reqwest::Client::new(), Some(base));
      let credentials = StaticCredentialStore::new().with_token(&server.base_url(), "tok");
      let root = temp.path().join("dependency_packages");

      let installed = ensure_dependency_package(&client, &root, &registry, &credentials, &ignore)
         .await
         .unwrap();
      assert_eq!(installed, root.join("deps-1"));
      assert!(installed.join("site-packages/six.py").is_file());
      assert!(!installed.join("deps-1.zip").exists());

      ensure_dependency_package(&client, &root, &registry, &credentials, &ignore)
         .await
         .unwrap();
      listing.assert_calls(2);
      download.assert_calls(1);
   }

   #[tokio::test]
   async fn dependency_package_failure_cleans_up() {
      let server = MockServer::start();
      server.mock(|when, then| {
         when.method(GET).path("/api/dependencies");
         then.status(200).json_body(json!({
            "productionPackage": "deps-1",
            "packages": [{
               "name": "deps-1",
               "platform": "linux",
               "checksum": "ffff",
               "sources": [{"type": "server", "filename": "deps-1.zip"}]
            }]
         }));
      });
      server.mock(|when, then| {
         when.method(GET).path("/api/dependencies/deps-1/linux");
         then.status(503);
      });

      let temp = tempdir().unwrap();
      let base = Url::parse(&server.base_url()).unwrap();
      let client = ServerClient::new(reqwest::Client::new(), base.clone(), None);
      let registry = DownloaderRegistry::with_defaults(reqwest::Client::new(), Some(base));

      let err = ensure_dependency_package(
         &client,
         temp.path(),
         &registry,
         &StaticCredentialStore::new(),
         &ignore,
      )
      .await
      .unwrap_err();
      match &err {
         DistributionError::AllSourcesExhausted { item, reason } => {
            assert_eq!(item, "deps-1");
            assert!(reason.contains("503"), "{reason}");
         }
         other => panic!("unexpected error: {other}"),
      }
      assert!(!temp.path().join("deps-1").exists());
   }

   #[tokio::test]
   async fn missing_dependency_package_is_an_error() {
      let server = MockServer::start();
      server.mock(|when, then| {
         when.method(GET).path("/api/dependencies");
         then.status(200).json_body(json!({"productionPackage": null, "packages": []}));
      });

      let temp = tempdir().unwrap();
      let client = ServerClient::new(
         reqwest::Client::new(),
         Url::parse(&server.base_url()).unwrap(),
         None,
      );
      let err = ensure_dependency_package(
         &client,
         temp.path(),
         &registry(),
         &StaticCredentialStore::new(),
         &ignore,
      )
      .await
      .unwrap_err();
      assert!(matches!(err, DistributionError::NoDependencyPackage));
   }
}
