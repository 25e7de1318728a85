//! CLI commands for running syncs and inspecting their status.

use clap::{Args, Subcommand};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use amity::config::Config;
use amity::db::{DavAccountRepository, GitConfigRepository, MappingRepository};
use amity::sync::{LocalLock, Scheduler};

/// Run synchronization now, or show its status
#[derive(Args)]
pub struct SyncCommand {
    /// Sync only this DAV account
    #[arg(long)]
    account: Option<Uuid>,

    /// Sync only the git repository
    #[arg(long)]
    git: bool,

    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Show sync status for every account
    Status,
}

impl SyncCommand {
    pub async fn run(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            Some(SyncSubcommand::Status) => self.status(pool, config).await,
            None => self.sync(pool, config).await,
        }
    }

    async fn sync(&self, pool: &SqlitePool, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let scheduler = Scheduler::new(
            pool.clone(),
            Arc::new(LocalLock::new()),
            config.git_work_dir.clone(),
        );
        let accounts = DavAccountRepository::new(pool.clone());
        let configs = GitConfigRepository::new(pool.clone());

        if let Some(account_id) = self.account {
            println!("Syncing account {}...", account_id);
            scheduler.run_dav_account(account_id).await;
        } else if !self.git {
            for account in accounts.list_by_vault(config.vault_id).await? {
                println!("Syncing account {} ({})...", account.name, account.id);
                scheduler.run_dav_account(account.id).await;
            }
        }

        if self.account.is_none() {
            if let Some(git_config) = configs.get_for_vault(config.vault_id).await? {
                println!("Syncing git repository {}...", git_config.repo_url);
                scheduler.run_git_config(git_config.id).await;
            } else if self.git {
                println!("No git sync configured.");
            }
        }

        self.status(pool, config).await
    }

    async fn status(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let accounts = DavAccountRepository::new(pool.clone());
        let configs = GitConfigRepository::new(pool.clone());
        let mappings = MappingRepository::new(pool.clone());

        println!();
        println!("Sync Status");
        println!("===========");

        for account in accounts.list_by_vault(config.vault_id).await? {
            println!();
            println!("DAV {} ({})", account.name, account.id);
            print_status_line(
                account.last_sync_status.map(|s| s.to_string()),
                account.last_synced_at.map(|t| t.to_rfc3339()),
                account.last_sync_error.as_deref(),
            );
            let counts = mappings.counts_by_kind(account.id).await?;
            print_counts(&counts);
        }

        if let Some(git_config) = configs.get_for_vault(config.vault_id).await? {
            println!();
            println!("Git {}", git_config.repo_url);
            print_status_line(
                git_config.last_sync_status.map(|s| s.to_string()),
                git_config.last_synced_at.map(|t| t.to_rfc3339()),
                git_config.last_sync_error.as_deref(),
            );
            let counts = mappings.counts_by_kind(git_config.id).await?;
            print_counts(&counts);
        }

        Ok(())
    }
}

fn print_status_line(status: Option<String>, synced_at: Option<String>, error: Option<&str>) {
    println!(
        "  status: {}  last synced: {}",
        status.unwrap_or_else(|| "never".to_string()),
        synced_at.unwrap_or_else(|| "-".to_string()),
    );
    if let Some(error) = error {
        println!("  error:  {}", error);
    }
}

fn print_counts(counts: &std::collections::HashMap<String, i64>) {
    if counts.is_empty() {
        println!("  mappings: none");
        return;
    }
    let mut entries: Vec<_> = counts.iter().collect();
    entries.sort();
    let line: Vec<String> = entries
        .iter()
        .map(|(kind, count)| format!("{} {}", count, kind))
        .collect();
    println!("  mappings: {}", line.join(", "));
}
