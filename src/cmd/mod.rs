//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `backlog` | `Backlog`        |
//! | `job`     | `Job`            |
//! | `config`  | `Config`         |

pub mod backlog;
pub mod config;
pub mod job;

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use remedy::config::Config;
use remedy::store::FsStore;

pub use backlog::cmd_backlog;
pub use config::cmd_config;
pub use job::cmd_job;

/// Resolve configuration and open the store it points at.
fn open_store(project_dir: &Path, verbose: bool) -> Result<(Config, Arc<FsStore>)> {
    let config = Config::new(project_dir.to_path_buf(), verbose)?;
    let store = Arc::new(FsStore::new(&config.store_dir()));
    Ok((config, store))
}
