//! etcd-restore library
//!
//! Loads an etcd snapshot into a throwaway multi-node kind cluster and
//! checks that the cluster comes back up on the restored data.

pub mod config;
pub mod error;
pub mod etcd;
pub mod kind;
pub mod kubectl;
pub mod poll;
pub mod restore;
pub mod retry;
pub mod runner;

pub use error::{Error, ErrorCategory, Result};

use clap::Parser;

use crate::config::{RestoreArgs, RestoreConfig};
use crate::restore::Restorer;

/// Restore an etcd snapshot into an ephemeral kind cluster
#[derive(Parser, Debug)]
#[command(name = "etcd-restore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub args: RestoreArgs,
}

impl Cli {
    /// Validate the arguments and run the restore
    pub async fn run(self) -> Result<()> {
        let config = RestoreConfig::from_args(self.args)?;
        Restorer::new(config).run().await
    }
}
