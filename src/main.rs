//! Binary entry point for the `sysup` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use sysup::{
    AppConfig, BringUpOutcome, Document, DocumentError, Ec2Error, Ec2Provider,
    LifecycleController, LifecycleError, Ssh2Transport, SshInvocation,
};

mod cli;

use cli::{Cli, SystemArg};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError<Ec2Error>),
    #[error("failed to run ssh client: {0}")]
    Exec(String),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Up(args) => run_up(&args).await,
        Cli::Destroy(args) => run_destroy(&args).await,
        Cli::Ssh(args) => run_ssh(&args).await,
        Cli::Report(args) => run_report(&args).await,
        Cli::SaveAmi(args) => run_save_ami(&args).await,
    }
}

async fn controller_for(
    args: &SystemArg,
) -> Result<LifecycleController<Ec2Provider, Ssh2Transport>, CliError> {
    let config =
        AppConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;

    let document = Document::load(&config.document_path(&args.name))?;
    let provider = Ec2Provider::new(&document.region).await;
    Ok(LifecycleController::new(
        provider,
        Ssh2Transport::new(),
        document,
        config.ssh_port,
    ))
}

async fn run_up(args: &SystemArg) -> Result<i32, CliError> {
    let mut controller = controller_for(args).await?;
    let mut stdout = io::stdout();
    match controller.bring_up(&mut stdout).await? {
        BringUpOutcome::AlreadyRunning { instance_id } => {
            writeln!(stdout, "{instance_id} already running").ok();
        }
        BringUpOutcome::Provisioned { instance_id } => {
            writeln!(stdout, "{instance_id} provisioned").ok();
        }
    }
    Ok(0)
}

async fn run_destroy(args: &SystemArg) -> Result<i32, CliError> {
    let controller = controller_for(args).await?;
    let instance_id = controller.destroy().await?;
    writeln!(io::stdout(), "terminated {instance_id}").ok();
    Ok(0)
}

async fn run_report(args: &SystemArg) -> Result<i32, CliError> {
    let controller = controller_for(args).await?;
    let instance_id = controller.report().await?;
    writeln!(io::stdout(), "{instance_id}").ok();
    Ok(0)
}

async fn run_save_ami(args: &SystemArg) -> Result<i32, CliError> {
    let controller = controller_for(args).await?;
    match controller.save_image().await? {
        Some(image_id) => {
            writeln!(io::stdout(), "{image_id}").ok();
        }
        None => {
            writeln!(io::stdout(), "nothing running, no image captured").ok();
        }
    }
    Ok(0)
}

async fn run_ssh(args: &SystemArg) -> Result<i32, CliError> {
    let controller = controller_for(args).await?;
    let invocation = controller.ssh_invocation().await?;
    exec_ssh(invocation)
}

#[cfg(unix)]
fn exec_ssh(invocation: SshInvocation) -> Result<i32, CliError> {
    use std::os::unix::process::CommandExt;

    // exec only returns on failure; on success the ssh client replaces this
    // process image entirely.
    let err = invocation.into_command().exec();
    Err(CliError::Exec(err.to_string()))
}

#[cfg(not(unix))]
fn exec_ssh(invocation: SshInvocation) -> Result<i32, CliError> {
    let status = invocation
        .into_command()
        .status()
        .map_err(|err| CliError::Exec(err.to_string()))?;
    Ok(status.code().unwrap_or(1))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_error_renders_not_running_diagnostic() {
        let mut buf = Vec::new();
        let err = CliError::Lifecycle(LifecycleError::NotRunning {
            name: String::from("myname"),
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(
            rendered.contains("\"myname\" is NOT running"),
            "rendered: {rendered}"
        );
    }

    #[test]
    fn write_error_renders_document_diagnostics() {
        let mut buf = Vec::new();
        let err = CliError::Document(DocumentError::MissingEnvVar {
            name: String::from("TOKEN"),
        });
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(rendered.contains("TOKEN"), "rendered: {rendered}");
    }
}
