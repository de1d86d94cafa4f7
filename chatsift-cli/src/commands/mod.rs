pub mod analyze;
pub mod classify;
pub mod config;
pub mod watch;

use chatsift_core::{Category, CategoryFilter};
use clap::ValueEnum;

pub use analyze::cmd_analyze;
pub use classify::cmd_classify;
pub use config::{handle_config_command, ConfigCommand};
pub use watch::cmd_watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FilterArg {
    All,
    Question,
    Note,
}

impl From<FilterArg> for CategoryFilter {
    fn from(arg: FilterArg) -> Self {
        match arg {
            FilterArg::All => CategoryFilter::All,
            FilterArg::Question => CategoryFilter::Only(Category::Question),
            FilterArg::Note => CategoryFilter::Only(Category::Note),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}
