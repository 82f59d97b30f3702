use std::path::PathBuf;

use clap::{Args, Subcommand};
use plugrpc_rpc::Codec;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod query;
pub mod run;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the demo plugin on a Unix socket.
    Serve(ServeArgs),
    /// Act as the core: run the plugin's provisioner against a local directory.
    Run(RunArgs),
    /// Act as the core: configure and execute the plugin's data source.
    Query(QueryArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Run(args) => run::run(args, format),
        Command::Query(args) => query::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Session settings shared by every subcommand that opens a session.
#[derive(Args, Debug, Clone, Copy)]
pub struct SessionArgs {
    /// Use the compact binary codec. Both ends must agree.
    #[arg(long, env = "PLUGRPC_COMPACT")]
    pub compact: bool,
}

impl SessionArgs {
    pub fn codec(self) -> Codec {
        Codec::from_flag(self.compact)
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    #[command(flatten)]
    pub session: SessionArgs,
    /// Exit after serving N sessions.
    #[arg(long)]
    pub sessions: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    #[command(flatten)]
    pub session: SessionArgs,
    /// Directory standing in for the machine being provisioned.
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub workdir: PathBuf,
    /// Shell command for the provisioner to run (repeatable).
    #[arg(long = "inline", value_name = "CMD", required = true)]
    pub inline: Vec<String>,
    /// File for the provisioner to upload first, as PATH=CONTENTS (repeatable).
    #[arg(long = "upload", value_name = "PATH=CONTENTS")]
    pub uploads: Vec<String>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Socket path to connect to.
    pub path: PathBuf,
    #[command(flatten)]
    pub session: SessionArgs,
    /// Prefix for every output key.
    #[arg(long)]
    pub prefix: Option<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
