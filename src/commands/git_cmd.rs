//! CLI commands for the git markdown sync configuration.

use clap::{Args, Subcommand};
use sqlx::SqlitePool;
use std::path::PathBuf;

use amity::config::Config;
use amity::db::GitConfigRepository;
use amity::models::{GitAuthType, GitConfig};

/// Manage the vault's git markdown sync
#[derive(Args)]
pub struct GitCommand {
    #[command(subcommand)]
    command: GitSubcommand,
}

#[derive(Subcommand)]
enum GitSubcommand {
    /// Configure the git repository (one per vault)
    Set {
        /// Repository URL (ssh or https)
        repo_url: String,

        /// Branch to sync
        #[arg(long, default_value = "main")]
        branch: String,

        /// Subfolder holding the contact files
        #[arg(long, default_value = "")]
        subfolder: String,

        /// Personal access token (for https remotes)
        #[arg(long, conflicts_with = "ssh_key_file")]
        token: Option<String>,

        /// Path to an SSH private key (for ssh remotes)
        #[arg(long)]
        ssh_key_file: Option<PathBuf>,

        /// Sync interval in minutes
        #[arg(long, default_value_t = 60)]
        interval: i64,
    },

    /// Show the current configuration
    Show,

    /// Remove the configuration
    Remove,
}

impl GitCommand {
    pub async fn run(
        &self,
        pool: &SqlitePool,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let repo = GitConfigRepository::new(pool.clone());

        match &self.command {
            GitSubcommand::Set {
                repo_url,
                branch,
                subfolder,
                token,
                ssh_key_file,
                interval,
            } => {
                let (auth_type, credential) = match (token, ssh_key_file) {
                    (Some(token), None) => (GitAuthType::Token, token.clone()),
                    (None, Some(path)) => (GitAuthType::SshKey, std::fs::read_to_string(path)?),
                    _ => return Err("Provide exactly one of --token or --ssh-key-file".into()),
                };

                if let Some(existing) = repo.get_for_vault(config.vault_id).await? {
                    repo.soft_delete(existing.id).await?;
                }

                let mut git_config =
                    GitConfig::new(config.vault_id, repo_url, auth_type, credential)
                        .with_branch(branch.clone())
                        .with_subfolder(subfolder.clone());
                git_config.sync_interval_minutes = *interval;
                let created = repo.create(&git_config).await?;
                println!("Git sync configured: {} ({})", created.repo_url, created.id);
            }

            GitSubcommand::Show => {
                match repo.get_for_vault(config.vault_id).await? {
                    Some(git_config) => {
                        println!("Repository: {}", git_config.repo_url);
                        println!("Branch:     {}", git_config.branch);
                        if !git_config.subfolder.is_empty() {
                            println!("Subfolder:  {}", git_config.subfolder);
                        }
                        println!("Auth:       {}", git_config.auth_type.as_str());
                        println!("Interval:   {} minutes", git_config.sync_interval_minutes);
                        match git_config.last_sync_status {
                            Some(status) => println!("Status:     {}", status),
                            None => println!("Status:     never synced"),
                        }
                        if let Some(error) = &git_config.last_sync_error {
                            println!("Last error: {}", error);
                        }
                    }
                    None => println!("No git sync configured."),
                }
            }

            GitSubcommand::Remove => {
                match repo.get_for_vault(config.vault_id).await? {
                    Some(git_config) => {
                        repo.soft_delete(git_config.id).await?;
                        println!("Removed git sync configuration.");
                    }
                    None => println!("No git sync configured."),
                }
            }
        }

        Ok(())
    }
}
