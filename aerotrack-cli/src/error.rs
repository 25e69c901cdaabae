//! CLI error handling with user-facing messages and exit codes.

use std::fmt;
use std::process;

use aerotrack::config::ConfigError;
use aerotrack::service::ServiceError;

/// Top-level CLI failures. Anything reaching here aborts the process
/// with a non-zero exit code.
#[derive(Debug)]
pub enum CliError {
    Config(ConfigError),
    Service(ServiceError),
}

impl CliError {
    /// Print the error (and any actionable hint) and exit non-zero.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Service(ServiceError::Bind { .. }) => {
                eprintln!();
                eprintln!("Another process may already be listening on that address.");
                eprintln!("Change http_addr in the config file or pass --http-addr.");
            }
            CliError::Config(_) => {
                eprintln!();
                eprintln!("Check the config file syntax, or pass --config with another path.");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(e) => write!(f, "{}", e),
            CliError::Service(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Service(e) => Some(e),
        }
    }
}
