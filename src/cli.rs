//! Command-line interface for habibot.

use clap::Parser;

/// Persistent client for an Elko virtual-world server.
#[derive(Debug, Parser)]
#[command(name = "habibot", version, about)]
pub struct Cli {
    /// Host name or address of the Elko server.
    #[arg(long, short = 'H', default_value = "127.0.0.1", env = "ELKO_HOST")]
    pub host: String,

    /// Port number for the Elko server.
    #[arg(long, short, default_value_t = 1337, env = "ELKO_PORT")]
    pub port: u16,

    /// Context to enter after connecting.
    #[arg(long, short)]
    pub context: Option<String>,

    /// Do not reconnect when the server drops the connection.
    #[arg(long)]
    pub no_reconnect: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}
