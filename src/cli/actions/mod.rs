pub mod server;

use anyhow::Result;

use crate::cli::globals::ServerOptions;

/// What the CLI decided to do.
#[derive(Debug)]
pub enum Action {
    Server(Box<ServerOptions>),
}

impl Action {
    /// Run the action to completion.
    ///
    /// # Errors
    /// Returns an error if the server fails to start or dies.
    pub async fn execute(self) -> Result<()> {
        match self {
            Self::Server(options) => server::run(*options).await,
        }
    }
}
