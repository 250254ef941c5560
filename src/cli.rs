//! Command-line surface: which port to bind, which settings key to
//! serve, which execution model to run under.

use crate::server::ExecutionModel;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dispatchd", about = "A small configurable HTTP front-end server")]
pub struct Cli {
    /// TCP port to listen on.
    #[arg(long)]
    pub port: u16,

    /// Which settings-file key's handler list to serve.
    #[arg(long)]
    pub settings: String,

    /// Execution model to run the accept loop under.
    #[arg(long, default_value = "worker-pool")]
    pub model: String,

    /// Path to the settings JSON file.
    #[arg(long, default_value = "settings.json")]
    pub settings_file: PathBuf,
}

impl Cli {
    pub fn execution_model(&self) -> Result<ExecutionModel, String> {
        self.model.parse()
    }
}
