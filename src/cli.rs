//! Command-line interface definitions for the `sysup` binary.
//!
//! This module isolates the clap parser structures so the build script can
//! reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level command parsed from the process arguments.
#[derive(Debug, Parser)]
#[command(
    name = "sysup",
    about = "Provision a single cloud instance and run its configuration steps",
    arg_required_else_help = true
)]
pub enum Cli {
    /// Create the instance if absent, wait for it, and run its steps.
    Up(SystemArg),
    /// Terminate the running instance.
    Destroy(SystemArg),
    /// Open an interactive shell on the running instance.
    Ssh(SystemArg),
    /// Print the running instance identifier.
    Report(SystemArg),
    /// Capture a machine image of the running instance.
    #[command(name = "save_ami")]
    SaveAmi(SystemArg),
}

/// Positional system argument shared by every subcommand.
#[derive(Debug, Args)]
pub struct SystemArg {
    /// Name of the system document, resolved as `<documents-dir>/<NAME>.yaml`.
    pub name: String,
}
