//! kmod-installer CLI - install kernel modules onto the host from a container

mod cli;
mod commands;
mod logging;
mod runner;

use clap::Parser;
use cli::{Cli, Commands};
use kmod_installer::{NamespaceTarget, NsenterExecutor};
use log::info;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    logging::init_logger(cli.verbose);
    info!(
        "{} version {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let target = NamespaceTarget::resolve(
        cli.namespace.nsenter_args.as_deref(),
        cli.namespace.nsenter_args_sep.as_deref(),
    );
    let executor = NsenterExecutor::new(target);

    match cli.command.unwrap_or(Commands::Install) {
        Commands::Install => runner::run_install(&cli.install, executor),
        Commands::Exec {
            timeout,
            daemon,
            duration,
            program,
            args,
        } => {
            if daemon {
                runner::run_exec_daemon(&executor, program, args, duration)
            } else {
                runner::run_exec(&executor, program, args, timeout)
            }
        }
        Commands::Check => {
            commands::check_requirements(&cli.install);
            ExitCode::SUCCESS
        }
    }
}
