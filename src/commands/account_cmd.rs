//! CLI commands for managing CalDAV/CardDAV accounts.

use clap::{Args, Subcommand};
use sqlx::SqlitePool;
use uuid::Uuid;

use amity::config::Config;
use amity::db::DavAccountRepository;
use amity::models::DavAccount;
use amity::sync::dav::DavClient;

/// Manage DAV sync accounts
#[derive(Args)]
pub struct AccountCommand {
    #[command(subcommand)]
    command: AccountSubcommand,
}

#[derive(Subcommand)]
enum AccountSubcommand {
    /// Add a new DAV account
    Add {
        /// Display name for the account
        name: String,

        /// Server base URL
        server_url: String,

        /// Username
        #[arg(long)]
        username: String,

        /// Password or app token
        #[arg(long)]
        password: String,

        /// CardDAV addressbook path (discovered via `test` if omitted)
        #[arg(long)]
        carddav_path: Option<String>,

        /// CalDAV calendar path (discovered via `test` if omitted)
        #[arg(long)]
        caldav_path: Option<String>,

        /// Sync interval in minutes
        #[arg(long, default_value_t = 15)]
        interval: i64,
    },

    /// List configured accounts
    List,

    /// Remove an account
    Remove {
        /// Account ID
        id: Uuid,
    },

    /// Probe the server and store discovered collection paths
    Test {
        /// Account ID
        id: Uuid,
    },
}

impl AccountCommand {
    pub async fn run(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let repo = DavAccountRepository::new(pool.clone());

        match &self.command {
            AccountSubcommand::Add {
                name,
                server_url,
                username,
                password,
                carddav_path,
                caldav_path,
                interval,
            } => {
                let mut account =
                    DavAccount::new(config.vault_id, name, server_url, username, password);
                account.carddav_path = carddav_path.clone();
                account.caldav_path = caldav_path.clone();
                account.sync_interval_minutes = *interval;
                let created = repo.create(&account).await?;
                println!("Added account {} ({})", created.name, created.id);
                if created.carddav_path.is_none() && created.caldav_path.is_none() {
                    println!("No collection paths set; run `amity account test {}`", created.id);
                }
            }

            AccountSubcommand::List => {
                let accounts = repo.list_by_vault(config.vault_id).await?;
                if accounts.is_empty() {
                    println!("No DAV accounts configured.");
                    return Ok(());
                }
                for account in accounts {
                    let status = account
                        .last_sync_status
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "never synced".to_string());
                    println!(
                        "{}  {}  {}  [{}]",
                        account.id, account.name, account.server_url, status
                    );
                }
            }

            AccountSubcommand::Remove { id } => {
                repo.soft_delete(*id).await?;
                println!("Removed account {}", id);
            }

            AccountSubcommand::Test { id } => {
                let account = repo
                    .get_by_id(*id)
                    .await?
                    .ok_or_else(|| format!("No account with id {}", id))?;
                let client =
                    DavClient::new(&account.server_url, &account.username, &account.credential)?;
                let collections = client.discover().await?;

                match &collections.carddav_path {
                    Some(path) => println!("Addressbook: {}", path),
                    None => println!("Addressbook: not found"),
                }
                match &collections.caldav_path {
                    Some(path) => println!("Calendar:    {}", path),
                    None => println!("Calendar:    not found"),
                }

                let carddav = account
                    .carddav_path
                    .clone()
                    .or(collections.carddav_path.clone());
                let caldav = account.caldav_path.clone().or(collections.caldav_path.clone());
                repo.update_collections(account.id, carddav.as_deref(), caldav.as_deref())
                    .await?;
                println!("Collection paths saved.");
            }
        }

        Ok(())
    }
}
