//! Tracer process options

use clap::Parser;

/// Trace recorder: watches a live cluster and serves trace exports
#[derive(Clone, Debug, Parser)]
#[command(name = "tracer", version, about)]
pub struct Options {
    /// Path to the tracked-objects YAML config
    #[arg(short, long)]
    pub config_file: String,

    /// Port for the export / health / metrics API
    #[arg(long, default_value_t = 7777)]
    pub server_port: u16,

    /// Where to write a full export of the store on shutdown (optional)
    #[arg(long)]
    pub final_export_path: Option<String>,
}
