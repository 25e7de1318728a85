mod account_cmd;
mod git_cmd;
mod sync_cmd;

pub use account_cmd::AccountCommand;
pub use git_cmd::GitCommand;
pub use sync_cmd::SyncCommand;
