use clap::{Parser, Subcommand};
use sqlx::{Pool, Postgres};
use tracing::info;

use crate::db::models::Tier;
use crate::db::user_repository::{PgUserStore, UserStore};

/// Statement analysis backend
#[derive(Parser)]
#[command(name = "statement-analyzer")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a user with the quota of the given billing tier
    SeedUser {
        #[arg(long)]
        id: String,

        #[arg(long)]
        email: String,

        #[arg(long, value_enum, default_value = "free")]
        tier: Tier,

        /// Extra analyses on top of the tier limit
        #[arg(long, default_value_t = 0)]
        bonus: i32,
    },
}

/// Run an admin subcommand. Returns true when one was handled and the
/// process should exit instead of starting the server.
pub async fn run(cli: Cli, pool: Pool<Postgres>) -> Result<bool, sqlx::Error> {
    match cli.command {
        None => Ok(false),
        Some(Command::SeedUser {
            id,
            email,
            tier,
            bonus,
        }) => {
            let users = PgUserStore::new(pool);
            let user = users
                .create(&id, &email, tier.as_str(), tier.analysis_limit(), bonus)
                .await?;
            info!(
                "Created user {} ({}) on {} tier: limit={} bonus={}",
                user.id, user.email, user.tier, user.quota_limit, user.quota_bonus
            );
            Ok(true)
        }
    }
}
