use std::path::PathBuf;

use clap::{Parser, Subcommand};
use database::{
    DatabaseConfig, EnrichmentStore, LegacyMigrator, LegacySource, SharedStore, SqliteLegacyStore,
};
use engine::SyncConfig;
use types::AccountId;

#[derive(Parser, Debug)]
struct Params {
    /// Shared store location. Falls back to MATCH_STORE_DATABASE_URL, then the config file.
    #[arg(short, long)]
    database: Option<String>,

    /// YAML sync configuration.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consolidate per-account legacy stores into the shared store.
    Migrate {
        /// ACCOUNT=PATH, repeatable. Accounts are migrated in the order given.
        #[arg(long = "legacy", value_parser = parse_legacy, required = true)]
        legacy: Vec<(AccountId, PathBuf)>,
    },
    /// Look for orphaned rows and print store statistics.
    Check,
    /// List an account's enrichment rows still waiting to be computed.
    Pending {
        #[arg(long)]
        account: String,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

fn parse_legacy(arg: &str) -> Result<(AccountId, PathBuf), String> {
    match arg.split_once('=') {
        Some((account, path)) if !account.is_empty() && !path.is_empty() => {
            Ok((AccountId::from(account), PathBuf::from(path)))
        }
        _ => Err(format!("expected ACCOUNT=PATH, got {arg:?}")),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Params::parse();
    log::info!("args: {args:?}");

    let sync_config = match &args.config {
        Some(path) => SyncConfig::from_yaml_file(path)?,
        None => SyncConfig::default(),
    };
    let db_config = DatabaseConfig::from_cli_or_env_or_yaml(
        args.database.clone(),
        sync_config.database_url.clone(),
    );
    let store = SharedStore::open(&db_config).await?;

    let result = run(&store, args.command).await;
    store.close().await;
    result
}

async fn run(store: &SharedStore, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Migrate { legacy } => {
            let mut sources: Vec<Box<dyn LegacySource>> = Vec::with_capacity(legacy.len());
            for (account, path) in legacy {
                log::info!("opening legacy store for {account} at {}", path.display());
                sources.push(Box::new(SqliteLegacyStore::open(account, &path)?));
            }
            let report = LegacyMigrator::new(store.clone()).migrate(&sources).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Check => {
            let orphans = store.orphans().await?;
            let stats = store.stats().await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "orphans": orphans,
                    "stats": stats,
                }))?
            );
            if !orphans.is_clean() {
                return Err(format!("{} orphaned rows found", orphans.total()).into());
            }
        }
        Command::Pending { account, limit } => {
            let enrichment = EnrichmentStore::for_account(AccountId::from(account));
            let pending = enrichment.pending(store.pool(), limit).await?;
            log::info!("{} pending enrichment rows for {}", pending.len(), enrichment.account());
            println!("{}", serde_json::to_string_pretty(&pending)?);
        }
    }
    Ok(())
}
