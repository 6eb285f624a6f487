use console::style;
use kmod_installer::{
    CancelToken, CommandSpec, Executor, InstallOutcome, InstallerBuilder, NsenterExecutor,
};
use log::{debug, error, info, warn};
use std::io::{BufRead, BufReader, Read};
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use crate::cli::InstallArgs;

/// Run the installation. Only failing to set up the installer (host
/// identity, configuration) is an error exit; step failures are logged and
/// the process falls through.
pub fn run_install(args: &InstallArgs, executor: NsenterExecutor) -> ExitCode {
    debug!("Using nsenter arguments: {:?}", executor.target().args);

    let installer = match InstallerBuilder::new()
        .source_root(&args.source_root)
        .modules_root(&args.modules_root)
        .module_subdir(&args.module_subdir)
        .autoload_path(&args.autoload_path)
        .activation(args.activation.into())
        .resolve_dependencies(!args.no_depmod)
        .skip_errors(args.skip_errors)
        .build(executor)
    {
        Ok(installer) => installer,
        Err(e) => {
            error!("Failed to create installer: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let report = installer.run();

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Failed to serialize installation report: {}", e),
        }
    }

    match report.outcome {
        InstallOutcome::Installed => {
            info!("kernel mods installed on host");
            if args.block {
                info!("blocking after install");
                loop {
                    thread::park();
                }
            }
        }
        InstallOutcome::NoSuitableBuild => {
            warn!("No suitable kernel mods for {}", installer.host().kernel);
        }
        InstallOutcome::Aborted { step } => {
            warn!("Installation stopped at {:?}", step);
        }
    }

    ExitCode::SUCCESS
}

/// Run one program on the host and print its classified outcome
pub fn run_exec<E: Executor>(
    executor: &E,
    program: String,
    args: Vec<String>,
    timeout: u64,
) -> ExitCode {
    let spec = CommandSpec::new(program).args(args).timeout(timeout);
    info!("Executing on host: {} {:?}", spec.program, spec.args);

    let outcome = executor.run_command(&spec);

    if !outcome.stdout.is_empty() {
        println!("{}", outcome.stdout);
    }
    if !outcome.stderr.is_empty() {
        eprintln!("{}", outcome.stderr);
    }

    let code = outcome.exit.code();
    let code_styled = if outcome.is_success() {
        style(code).green().bold()
    } else {
        style(code).red().bold()
    };
    println!(
        "{}={} | {}={:?}",
        style("exit_code").dim(),
        code_styled,
        style("class").dim(),
        outcome.exit
    );
    if let Some(err) = &outcome.error {
        error!("{}", err);
    }

    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Run one program on the host as a daemon, streaming its output until
/// `duration` elapses or, when unset, until the daemon closes its output
pub fn run_exec_daemon<E: Executor>(
    executor: &E,
    program: String,
    args: Vec<String>,
    duration: Option<u64>,
) -> ExitCode {
    let spec = CommandSpec::new(program).args(args);
    info!("Starting daemon on host: {} {:?}", spec.program, spec.args);

    let cancel = CancelToken::new();
    let mut handle = executor.run_daemon(&spec, &cancel);

    let mut readers: Vec<_> = [handle.stdout.clone(), handle.stderr.clone()]
        .into_iter()
        .flatten()
        .enumerate()
        .map(|(i, pipe)| thread::spawn(move || forward_lines(pipe, i == 1)))
        .collect();

    match duration {
        Some(secs) => {
            cancel.wait_timeout(Duration::from_secs(secs));
        }
        // Without a deadline the daemon lives until it closes its own output.
        None => {
            for reader in readers.drain(..) {
                let _ = reader.join();
            }
        }
    }
    cancel.cancel();
    handle.join();

    for reader in readers {
        let _ = reader.join();
    }

    let errors = handle.drain_errors();
    for err in &errors {
        error!("{}", err);
    }
    if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn forward_lines<R: Read>(pipe: R, is_stderr: bool) {
    for line in BufReader::new(pipe).lines() {
        match line {
            Ok(line) if is_stderr => eprintln!("{}", line),
            Ok(line) => println!("{}", line),
            Err(_) => break,
        }
    }
}
