use std::path::PathBuf;

use clap::Parser;

/// A demo point-value store server: binds a TCP listener and wires each
/// connection to a [`pvs_session::Session`] over a newline-delimited JSON
/// protocol. Transport binding is explicitly a thin, narrow collaborator
/// here -- the interesting logic lives in `pvs-store`/`pvs-session`.
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about)]
pub struct Args {
    /// Host interface to bind to.
    #[clap(long, default_value = "127.0.0.1")]
    pub interface: std::net::IpAddr,

    /// Port to listen on.
    #[clap(long, default_value = "7420")]
    pub port: u16,

    /// SQLite database file. Defaults to an in-memory backend when absent.
    #[clap(long)]
    pub db_path: Option<PathBuf>,

    /// TOML configuration file. Reloaded on `SIGHUP`.
    #[clap(long)]
    pub config: Option<PathBuf>,
}
