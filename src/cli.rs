use crate::pass::PassOptions;
use crate::policy::PolicyOptions;
use clap::{ArgAction, Args, Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("XRAY_GUARD_GIT_SHA"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "xray-guard")]
#[command(about = "Enforces account lifecycle policy from the Xray access log")]
#[command(version = VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub policy: PolicyArgs,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Refresh per-account usage from the access log and print it as JSON
    Usage {
        /// Discard the saved cursor and records and replay the whole log
        #[arg(long)]
        rebuild: bool,

        /// Only print this account
        #[arg(long)]
        user: Option<String>,
    },
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct PolicyArgs {
    /// Dry run: log what would change without writing the config
    #[arg(long)]
    pub print: bool,

    /// Minutes between passes; zero or less runs a single pass
    #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
    pub delay: i64,

    /// Reactivate accounts once they are no longer flagged
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub reactive: bool,

    /// Window, in minutes, for counting distinct client IPs
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(1..))]
    pub range: u32,

    /// Deactivate accounts whose billing period has ended
    #[arg(long = "disableexpired", default_value_t = true, action = ArgAction::Set)]
    pub disable_expired: bool,

    /// Billing period for accounts without expireDays
    #[arg(long = "expiredays", default_value_t = crate::policy::DEFAULT_EXPIRE_DAYS)]
    pub expire_days: u32,
}

impl PolicyArgs {
    pub fn pass_options(&self) -> PassOptions {
        PassOptions {
            dry_run: self.print,
            policy: PolicyOptions {
                reactive: self.reactive,
                disable_expired: self.disable_expired,
                default_expire_days: self.expire_days,
                range_minutes: self.range,
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/cli_tests.rs"]
mod tests;
