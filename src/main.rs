use ayon_distribution::{
   commands::{CommandContext, show_status, sync_addons, sync_dependencies},
   config::DistributionConfig,
   credentials::ServerInfoStore,
   logger,
};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::{path::PathBuf, process::ExitCode};
use url::Url;

#[derive(Parser)]
#[command(name = "ayon-distribute", version, about = "Distribute AYON addons and dependency packages")]
struct Cli {
   /// TOML configuration file
   #[arg(long, global = true)]
   config: Option<PathBuf>,

   #[arg(long, global = true)]
   server_url: Option<Url>,

   #[arg(long, global = true)]
   addons_dir: Option<PathBuf>,

   #[arg(long, global = true)]
   dependencies_dir: Option<PathBuf>,

   #[arg(short, long, global = true)]
   verbose: bool,

   #[command(subcommand)]
   command: Command,
}

#[derive(Subcommand)]
enum Command {
   /// Install every production addon that is missing locally
   Addons,
   /// Install the active dependency package for this platform
   Dependencies,
   /// Dependency package first, then addons
   All,
   /// Show which production addons and dependency packages are installed
   Status,
}

impl Cli {
   fn resolve_config(&self) -> anyhow::Result<DistributionConfig> {
      let mut config = DistributionConfig::load(self.config.as_deref())?;
      if let Some(url) = &self.server_url {
         config.server_url = Some(url.clone());
      }
      if let Some(dir) = &self.addons_dir {
         config.addons_dir = Some(dir.clone());
      }
      if let Some(dir) = &self.dependencies_dir {
         config.dependencies_dir = Some(dir.clone());
      }
      Ok(config)
   }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
   let config = cli.resolve_config()?;
   let servers = match ServerInfoStore::default_location() {
      Ok(store) => Some(store),
      Err(e) => {
         log::warn!("Used servers will not be remembered: {}", e);
         None
      }
   };
   let ctx = CommandContext::new(config, servers)?;

   match cli.command {
      Command::Addons => {
         sync_addons(&ctx).await?;
      }
      Command::Dependencies => {
         sync_dependencies(&ctx).await?;
      }
      Command::All => {
         sync_dependencies(&ctx).await?;
         sync_addons(&ctx).await?;
      }
      Command::Status => {
         show_status(&ctx).await?;
      }
   }
   Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
   let cli = Cli::parse();
   logger::init(if cli.verbose {
      log::LevelFilter::Debug
   } else {
      log::LevelFilter::Info
   });

   match run(cli).await {
      Ok(()) => ExitCode::SUCCESS,
      Err(e) => {
         eprintln!("{} {:#}", "error:".red().bold(), e);
         ExitCode::FAILURE
      }
   }
}
