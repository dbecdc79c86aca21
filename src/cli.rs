use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{self, Config};
use crate::engine::EngineCommand;
use crate::types::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "scanjob")]
#[command(version, about = "Run and track network scan jobs through an external scan engine")]
pub struct Cli {
    /// Scan engine executable
    #[arg(long, env = "SCANJOB_ENGINE", default_value = config::DEFAULT_ENGINE_PROGRAM, global = true)]
    pub engine: String,

    /// Argument placed before the scan arguments (repeatable), e.g. an interpreter script
    #[arg(long = "engine-arg", global = true)]
    pub engine_args: Vec<String>,

    /// Number of finished jobs kept in history
    #[arg(long, env = "SCANJOB_HISTORY", default_value_t = crate::history::DEFAULT_MAX_HISTORY_ENTRIES, global = true)]
    pub history: usize,

    /// Default engine timeout in seconds
    #[arg(long, env = "SCANJOB_TIMEOUT", default_value_t = config::DEFAULT_TIMEOUT_SECS, global = true)]
    pub default_timeout: u64,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Write logs to this file instead of the default location
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan one or more targets (hosts, IPs or CIDR ranges)
    Scan {
        #[arg(required = true)]
        targets: Vec<String>,

        /// Port specification, e.g. 22,80,8000-8100
        #[arg(short, long)]
        ports: Option<String>,

        /// Engine timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Enable extended service detection
        #[arg(short = 'A', long)]
        detection: bool,

        /// Result encoding requested from the engine (json or text)
        #[arg(short, long, value_parser = parse_format)]
        output: Option<OutputFormat>,
    },

    /// Sweep a network with a reduced port set
    Discover {
        /// Network address or CIDR; a bare address is widened to its /24
        network: String,

        /// Use the top-100 ports instead of the quick set
        #[arg(long)]
        full: bool,
    },

    /// Print the port risk rules
    Rules,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse::<OutputFormat>().map_err(|e| e.to_string())
}

impl Cli {
    pub fn config(&self) -> Config {
        let mut engine = EngineCommand::new(self.engine.clone());
        for arg in &self.engine_args {
            engine = engine.with_leading_arg(arg.clone());
        }
        Config::default()
            .with_engine(engine)
            .with_history_capacity(self.history)
            .with_default_timeout(self.default_timeout)
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
