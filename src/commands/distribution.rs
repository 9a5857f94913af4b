use crate::{
   config::DistributionConfig,
   credentials::{CredentialStore, EnvCredentialStore, ServerInfoStore},
   distribution::{
      AcceptancePolicy, DownloaderRegistry, InstallationOutcome, ServerClient, TransferProgress,
      TransferStatus,
      client::normalize_server_url,
      enforce_all_updated, ensure_dependency_package, installed_paths,
      metadata::{DependencyMetadata, read_dependency_metadata},
   },
   errors::DistributionError,
};
use anyhow::{Context, Result};
use colored::Colorize;
use std::{collections::BTreeMap, path::PathBuf};
use url::Url;

/// Everything a distribution command needs, resolved once from config.
pub struct CommandContext {
   pub config: DistributionConfig,
   pub client: ServerClient,
   pub registry: DownloaderRegistry,
   pub credentials: EnvCredentialStore,
   pub servers: Option<ServerInfoStore>,
}

impl CommandContext {
   pub fn new(config: DistributionConfig, servers: Option<ServerInfoStore>) -> Result<Self> {
      let server_url = match &config.server_url {
         Some(url) => url.clone(),
         None => {
            let last = match &servers {
               Some(store) => store
                  .get_last_server_url()
                  .context("Failed to read used servers")?,
               None => None,
            };
            let last = last.ok_or(DistributionError::MissingServerUrl)?;
            log::info!("Using last server {}", last);
            Url::parse(&last).with_context(|| format!("Invalid stored server URL {}", last))?
         }
      };

      let http = config.http_client().context("Failed to build HTTP client")?;
      let credentials = EnvCredentialStore::new(config.api_key_env.clone());
      let token = credentials.load_token(&normalize_server_url(server_url.as_str()));

      Ok(Self {
         client: ServerClient::new(http.clone(), server_url.clone(), token),
         registry: DownloaderRegistry::with_defaults(http, Some(server_url)),
         credentials,
         servers,
         config,
      })
   }

   fn remember_server(&self) {
      if let Some(store) = &self.servers
         && let Err(e) = store.set_last_server_url(self.client.base_url().as_str())
      {
         log::warn!("Failed to store last server URL: {}", e);
      }
   }
}

fn outcome_label(outcome: InstallationOutcome) -> colored::ColoredString {
   match outcome {
      InstallationOutcome::Updated => outcome.as_str().green(),
      InstallationOutcome::Exists => outcome.as_str().dimmed(),
      InstallationOutcome::FailedMissingSource => outcome.as_str().yellow(),
      InstallationOutcome::Failed => outcome.as_str().red().bold(),
   }
}

/// One line per item; `reasons` adds why an item failed.
pub fn print_outcomes(
   outcomes: &BTreeMap<String, InstallationOutcome>,
   reasons: &BTreeMap<String, String>,
) {
   for (identifier, outcome) in outcomes {
      match reasons.get(identifier) {
         Some(reason) => println!(
            "  {:<40} {} {}",
            identifier,
            outcome_label(*outcome),
            reason.dimmed()
         ),
         None => println!("  {:<40} {}", identifier, outcome_label(*outcome)),
      }
   }
}

/// Source failures are shown as they happen, other stages only in verbose logs.
fn print_progress(progress: &TransferProgress) {
   match &progress.status {
      TransferStatus::Failed { reason } => println!(
         "  {} {} source failed: {}",
         progress.item,
         progress.source,
         reason.yellow()
      ),
      status => log::debug!("{}: {} source {}", progress.item, progress.source, status),
   }
}

pub async fn sync_addons(ctx: &CommandContext) -> Result<BTreeMap<String, InstallationOutcome>> {
   let addons_dir = ctx.config.addons_dir()?;
   log::info!("Distributing addons into {:?}", addons_dir);

   let policy = AcceptancePolicy {
      allow_missing_source: ctx.config.allow_missing_source,
   };
   let result = enforce_all_updated(
      &ctx.client,
      &addons_dir,
      &ctx.registry,
      &ctx.credentials,
      policy,
      &print_progress,
   )
   .await;

   match result {
      Ok(outcomes) => {
         println!("{}", "Addons".bold());
         print_outcomes(&outcomes, &BTreeMap::new());
         ctx.remember_server();
         Ok(outcomes)
      }
      Err(DistributionError::DistributionIncomplete { outcomes, reasons }) => {
         println!("{}", "Addons failing distribution".bold());
         print_outcomes(&outcomes, &reasons);
         Err(DistributionError::DistributionIncomplete { outcomes, reasons }.into())
      }
      Err(e) => Err(e).context("Addon distribution failed"),
   }
}

pub async fn sync_dependencies(ctx: &CommandContext) -> Result<PathBuf> {
   let dependencies_dir = ctx.config.dependencies_dir()?;
   log::info!("Distributing dependency package into {:?}", dependencies_dir);

   let installed = ensure_dependency_package(
      &ctx.client,
      &dependencies_dir,
      &ctx.registry,
      &ctx.credentials,
      &print_progress,
   )
   .await
   .context("Dependency package distribution failed")?;

   println!(
      "{} {}",
      "Dependency package".bold(),
      installed.display().to_string().green()
   );
   ctx.remember_server();
   Ok(installed)
}

/// Local state of the server's production addons and installed packages.
#[derive(Debug)]
pub struct DistributionStatus {
   pub installed: Vec<PathBuf>,
   pub missing: Vec<String>,
   pub dependency_packages: DependencyMetadata,
}

pub async fn show_status(ctx: &CommandContext) -> Result<DistributionStatus> {
   let addons_dir = ctx.config.addons_dir()?;
   let dependencies_dir = ctx.config.dependencies_dir()?;

   let addons = ctx
      .client
      .list_addons()
      .await
      .context("Failed to list addons")?;
   let installed = installed_paths(&addons, &addons_dir);
   let missing: Vec<String> = addons
      .iter()
      .map(|addon| addon.identifier())
      .filter(|identifier| !installed.contains(&addons_dir.join(identifier)))
      .collect();
   let dependency_packages = read_dependency_metadata(&dependencies_dir)?;

   println!("{}", "Installed addons".bold());
   for path in &installed {
      println!("  {}", path.display().to_string().green());
   }
   if !missing.is_empty() {
      println!("{}", "Missing addons".bold());
      for identifier in &missing {
         println!("  {}", identifier.yellow());
      }
   }
   println!("{}", "Dependency packages".bold());
   for (name, record) in &dependency_packages {
      println!(
         "  {:<40} {} ({})",
         name,
         record.distributed_dt,
         record.source.kind()
      );
   }

   Ok(DistributionStatus {
      installed,
      missing,
      dependency_packages,
   })
}
