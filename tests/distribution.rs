use ayon_distribution::{
   DistributionError,
   credentials::StaticCredentialStore,
   distribution::{
      AcceptancePolicy, DownloaderRegistry, InstallationOutcome, ServerClient, TransferProgress,
      enforce_all_updated,
      metadata::read_addons_metadata,
   },
};
use httpmock::prelude::*;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::{Cursor, Write};
use tempfile::tempdir;
use url::Url;

fn zip_archive(entries: &[(&str, &str)]) -> Vec<u8> {
   let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
   for (name, content) in entries {
      writer
         .start_file(*name, zip::write::FileOptions::default())
         .unwrap();
      writer.write_all(content.as_bytes()).unwrap();
   }
   writer.finish().unwrap().into_inner()
}

fn quiet(_: &TransferProgress) {}

fn client_for(server: &MockServer) -> (ServerClient, DownloaderRegistry) {
   let http = reqwest::Client::new();
   let base = Url::parse(&server.base_url()).unwrap();
   (
      ServerClient::new(http.clone(), base.clone(), None),
      DownloaderRegistry::with_defaults(http, Some(base)),
   )
}

#[tokio::test]
async fn slack_is_installed_once_from_the_server() {
   let archive = zip_archive(&[("slack/__init__.py", "__version__ = '1.0.0'")]);
   let hash = format!("{:x}", Sha256::digest(&archive));

   let server = MockServer::start();
   server.mock(|when, then| {
      when.method(GET).path("/api/addons").query_param("details", "1");
      then.status(200).json_body(json!({
         "addons": [{
            "name": "slack",
            "title": "Slack",
            "productionVersion": "1.0.0",
            "versions": {
               "1.0.0": {
                  "hash": hash,
                  "clientSourceInfo": [
                     {"type": "server", "filename": "slack_1.0.0.zip"}
                  ]
               }
            }
         }]
      }));
   });
   let download = server.mock(|when, then| {
      when
         .method(GET)
         .path("/api/addons/slack/1.0.0/private/slack_1.0.0.zip")
         .header("Authorization", "Bearer studio-key");
      then.status(200).body(archive.clone());
   });

   let temp = tempdir().unwrap();
   let (client, registry) = client_for(&server);
   let credentials = StaticCredentialStore::new().with_token(&server.base_url(), "studio-key");

   let first = enforce_all_updated(
      &client,
      temp.path(),
      &registry,
      &credentials,
      AcceptancePolicy::default(),
      &quiet,
   )
   .await
   .unwrap();
   assert_eq!(first["slack_1.0.0"], InstallationOutcome::Updated);

   let installed = temp.path().join("slack_1.0.0");
   assert!(installed.join("slack/__init__.py").is_file());
   assert!(!installed.join("slack_1.0.0.zip").exists());

   let metadata = read_addons_metadata(temp.path()).unwrap();
   assert_eq!(
      metadata["slack"]["1.0.0"].file_hash.as_deref(),
      Some(hash.as_str())
   );

   let second = enforce_all_updated(
      &client,
      temp.path(),
      &registry,
      &credentials,
      AcceptancePolicy::default(),
      &quiet,
   )
   .await
   .unwrap();
   assert_eq!(second["slack_1.0.0"], InstallationOutcome::Exists);
   download.assert_calls(1);
}

#[tokio::test]
async fn failed_addon_is_reported_alone() {
   let good = zip_archive(&[("ftrack/api.py", "pass")]);
   let server = MockServer::start();
   server.mock(|when, then| {
      when.method(GET).path("/api/addons").query_param("details", "1");
      then.status(200).json_body(json!({
         "addons": [
            {
               "name": "ftrack",
               "productionVersion": "2.1.0",
               "versions": {"2.1.0": {
                  "hash": format!("{:x}", Sha256::digest(&good)),
                  "clientSourceInfo": [{"type": "http", "url": server.url("/ftrack.zip")}]
               }}
            },
            {
               "name": "kitsu",
               "productionVersion": "0.3.0",
               "versions": {"0.3.0": {
                  "hash": "0".repeat(64),
                  "clientSourceInfo": [{"type": "http", "url": server.url("/kitsu.zip")}]
               }}
            },
            {
               "name": "example",
               "productionVersion": "0.1.0",
               "versions": {"0.1.0": {}}
            }
         ]
      }));
   });
   server.mock(|when, then| {
      when.method(GET).path("/ftrack.zip");
      then.status(200).body(good.clone());
   });
   server.mock(|when, then| {
      when.method(GET).path("/kitsu.zip");
      then.status(200).body(zip_archive(&[("kitsu/api.py", "pass")]));
   });

   let temp = tempdir().unwrap();
   let (client, registry) = client_for(&server);

   let err = enforce_all_updated(
      &client,
      temp.path(),
      &registry,
      &StaticCredentialStore::new(),
      AcceptancePolicy::default(),
      &quiet,
   )
   .await
   .unwrap_err();

   match &err {
      DistributionError::DistributionIncomplete { outcomes, reasons } => {
         assert_eq!(outcomes.len(), 1);
         assert_eq!(outcomes["kitsu_0.3.0"], InstallationOutcome::Failed);
         assert!(reasons["kitsu_0.3.0"].contains("doesn't match"));
      }
      other => panic!("unexpected error: {other}"),
   }
   assert!(err.to_string().contains("kitsu_0.3.0"));
   assert!(temp.path().join("ftrack_2.1.0/ftrack/api.py").is_file());
   assert!(!temp.path().join("kitsu_0.3.0").exists());
}
