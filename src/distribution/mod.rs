pub mod archive;
pub mod client;
pub mod downloaders;
pub mod installer;
pub mod integrity;
pub mod metadata;
pub mod progress;
pub mod types;

pub use client::ServerClient;
pub use downloaders::{DownloadRequest, DownloadTarget, Downloader, DownloaderRegistry, FetchedArchive};
pub use installer::{
   AcceptancePolicy, AuthData, enforce_all_updated, ensure_dependency_package, installed_paths,
   reconcile_addons,
};
pub use integrity::HashAlgorithm;
pub use progress::{ProgressListener, TransferProgress, TransferStatus};
pub use types::{
   AddonDescriptor, AddonSource, DependencyPackageDescriptor, InstallationOutcome, SourceKind,
};
