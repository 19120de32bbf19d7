//! Driver process options
//!
//! Everything here arrives from the controlling job spec: the simulation
//! identity, where the trace lives, and how fast to play it.

use clap::Parser;

/// Simulation driver: replays a recorded trace inside an isolated cluster
#[derive(Clone, Debug, Parser)]
#[command(name = "driver", version, about)]
pub struct Options {
    /// Simulation identity; stamped onto every simulated object
    #[arg(long)]
    pub sim_name: String,

    /// Name of the simulation root object owning everything this run creates
    #[arg(long)]
    pub root_name: String,

    /// Prefix for the virtual namespaces replayed objects land in
    #[arg(long, default_value = "virt")]
    pub virtual_ns_prefix: String,

    /// Port the admission webhook listens on
    #[arg(long, default_value_t = 8443)]
    pub admission_port: u16,

    /// TLS certificate for the admission webhook
    #[arg(long)]
    pub cert_path: String,

    /// TLS private key for the admission webhook
    #[arg(long)]
    pub key_path: String,

    /// Trace location: file://, s3://, gs://, or azure://
    #[arg(long)]
    pub trace_path: String,

    /// Trace-time over wall-time playback ratio
    #[arg(long, default_value_t = 1.0)]
    pub speed_factor: f64,

    /// Wall-clock seconds to hold the simulated state after the last event
    #[arg(long)]
    pub duration_seconds: Option<u64>,

    /// Number of passes over the timeline
    #[arg(long, default_value_t = 1)]
    pub repetitions: u32,
}
