//! Installation orchestration
//!
//! Runs the install sequence one step at a time, never backtracking:
//!
//! ```text
//! Discover -> Copy -> ResolveDependencies -> Activate -> PersistAutoload
//! ```
//!
//! Discover and Copy failures end the run, as does a PersistAutoload failure.
//! ResolveDependencies and Activate failures end it too unless `skip_errors`
//! is set, in which case they are logged and the run continues.

use std::path::{Path, PathBuf};

use log::{error, info, warn};
use serde::Serialize;

use crate::errors::{ExecError, InstallerError, Result};
use crate::execution::{CommandSpec, Executor, ExitClass};
use crate::host::HostIdentity;
use crate::storage;

pub const DEFAULT_SOURCE_ROOT: &str = "/kernel-mods/drbd";
pub const DEFAULT_MODULES_ROOT: &str = "/lib/modules";
pub const DEFAULT_MODULE_SUBDIR: &str = "extra/drbd90";
pub const DEFAULT_AUTOLOAD_PATH: &str = "/etc/sysconfig/modules/drbd.modules";

pub const DEPMOD_COMMAND: &str = "depmod";
pub const INSMOD_COMMAND: &str = "insmod";
pub const MODPROBE_COMMAND: &str = "modprobe";
pub const DEPMOD_TIMEOUT_SECS: u64 = 300;

/// Boot-time loader written to [`DEFAULT_AUTOLOAD_PATH`]
pub const AUTOLOADER_SCRIPT: &str = r#"#!/bin/sh
/sbin/modinfo drbd > /dev/null 2>&1
if [ $? -eq 0 ]; then
    /sbin/modprobe drbd
fi

/sbin/modinfo drbd_transport_tcp > /dev/null 2>&1
if [ $? -eq 0 ]; then
    /sbin/modprobe drbd_transport_tcp
fi"#;

const ALREADY_LOADED_MARKERS: [&str; 3] = ["File exists", "already exists", "already loaded"];

/// Whether a loader diagnostic means the module is already in the kernel
pub fn is_already_loaded(diagnostic: &str) -> bool {
    ALREADY_LOADED_MARKERS
        .iter()
        .any(|marker| diagnostic.contains(marker))
}

/// How modules are loaded during activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// `insmod <file>` for every copied file
    #[default]
    Insmod,
    /// `modprobe <name>` through the dependency index
    Modprobe,
}

/// Installer configuration
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Root of the module builds shipped in the image
    pub source_root: PathBuf,
    /// Host module tree, usually `/lib/modules`
    pub modules_root: PathBuf,
    /// Directory under `{modules_root}/{kernel}` receiving the modules
    pub module_subdir: String,
    /// Boot-time autoloader script
    pub autoload_path: PathBuf,
    pub activation: ActivationMode,
    /// Run `depmod` before activation
    pub resolve_dependencies: bool,
    /// Continue past dependency resolution and activation failures
    pub skip_errors: bool,
    pub depmod_timeout_secs: u64,
    /// Per-module load deadline, 0 selects the runner default
    pub load_timeout_secs: u64,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            source_root: PathBuf::from(DEFAULT_SOURCE_ROOT),
            modules_root: PathBuf::from(DEFAULT_MODULES_ROOT),
            module_subdir: DEFAULT_MODULE_SUBDIR.to_string(),
            autoload_path: PathBuf::from(DEFAULT_AUTOLOAD_PATH),
            activation: ActivationMode::default(),
            resolve_dependencies: true,
            skip_errors: false,
            depmod_timeout_secs: DEPMOD_TIMEOUT_SECS,
            load_timeout_secs: 0,
        }
    }
}

impl InstallerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.module_subdir.is_empty() {
            return Err(InstallerError::InvalidConfig(
                "Module subdirectory cannot be empty".to_string(),
            ));
        }

        if Path::new(&self.module_subdir).is_absolute() {
            return Err(InstallerError::InvalidConfig(format!(
                "Module subdirectory must be relative: {}",
                self.module_subdir
            )));
        }

        if self.autoload_path.file_name().is_none() {
            return Err(InstallerError::InvalidConfig(format!(
                "Autoload path must name a file: {}",
                self.autoload_path.display()
            )));
        }

        Ok(())
    }
}

/// Builder pattern for installer creation
#[derive(Debug, Default)]
pub struct InstallerBuilder {
    config: InstallerConfig,
    host: Option<HostIdentity>,
}

impl InstallerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source_root(mut self, path: impl AsRef<Path>) -> Self {
        self.config.source_root = path.as_ref().to_path_buf();
        self
    }

    pub fn modules_root(mut self, path: impl AsRef<Path>) -> Self {
        self.config.modules_root = path.as_ref().to_path_buf();
        self
    }

    pub fn module_subdir(mut self, subdir: &str) -> Self {
        self.config.module_subdir = subdir.to_string();
        self
    }

    pub fn autoload_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.autoload_path = path.as_ref().to_path_buf();
        self
    }

    pub fn activation(mut self, mode: ActivationMode) -> Self {
        self.config.activation = mode;
        self
    }

    pub fn resolve_dependencies(mut self, enabled: bool) -> Self {
        self.config.resolve_dependencies = enabled;
        self
    }

    pub fn skip_errors(mut self, enabled: bool) -> Self {
        self.config.skip_errors = enabled;
        self
    }

    pub fn depmod_timeout(mut self, secs: u64) -> Self {
        self.config.depmod_timeout_secs = secs;
        self
    }

    pub fn load_timeout(mut self, secs: u64) -> Self {
        self.config.load_timeout_secs = secs;
        self
    }

    /// Use a known host instead of detecting the running one
    pub fn host(mut self, host: HostIdentity) -> Self {
        self.host = Some(host);
        self
    }

    /// Build installer, detecting the host if none was given
    pub fn build<E: Executor>(self, executor: E) -> Result<Installer<E>> {
        self.config.validate()?;
        let host = match self.host {
            Some(host) => host,
            None => HostIdentity::detect()?,
        };
        Ok(Installer::new(self.config, host, executor))
    }
}

/// One step of the install sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallStep {
    Discover,
    Copy,
    ResolveDependencies,
    Activate,
    PersistAutoload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Step disabled by configuration
    Skipped,
    /// Step failed but `skip_errors` let the run continue
    Tolerated,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step: InstallStep,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum InstallOutcome {
    /// Every step ran
    Installed,
    /// No module build for this host ships in the image
    NoSuitableBuild,
    /// A step failed and the run stopped there
    Aborted { step: InstallStep },
}

/// What happened during one [`Installer::run`]
#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    pub host: HostIdentity,
    pub steps: Vec<StepRecord>,
    pub outcome: InstallOutcome,
}

impl InstallReport {
    fn new(host: HostIdentity) -> Self {
        Self {
            host,
            steps: Vec::new(),
            outcome: InstallOutcome::Installed,
        }
    }

    fn record(&mut self, step: InstallStep, status: StepStatus, detail: Option<String>) {
        self.steps.push(StepRecord {
            step,
            status,
            detail,
        });
    }

    fn abort(mut self, step: InstallStep, err: &InstallerError) -> Self {
        self.record(step, StepStatus::Failed, Some(err.to_string()));
        self.outcome = InstallOutcome::Aborted { step };
        self
    }

    /// Status of `step`, if it ran
    pub fn status(&self, step: InstallStep) -> Option<StepStatus> {
        self.steps.iter().find(|r| r.step == step).map(|r| r.status)
    }

    pub fn ran(&self, step: InstallStep) -> bool {
        self.status(step).is_some()
    }
}

/// How a single module fared during activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLoad {
    Loaded(String),
    AlreadyLoaded(String),
    Failed(String),
}

/// Installs module builds for one host through an [`Executor`]
pub struct Installer<E> {
    config: InstallerConfig,
    host: HostIdentity,
    executor: E,
    source_dir: PathBuf,
    destination_dir: PathBuf,
}

impl<E: Executor> Installer<E> {
    pub fn new(config: InstallerConfig, host: HostIdentity, executor: E) -> Self {
        let source_dir = host.source_dir(&config.source_root);
        let destination_dir = host.destination_dir(&config.modules_root, &config.module_subdir);

        info!("host OS: {}", host.os);
        info!("host CPU arch: {}", host.arch);
        info!("host kernel: {}", host.kernel);
        info!("host kernel version: {}", host.kernel_version);
        info!("host kernel release: {}", host.kernel_release);
        info!("host kernel mods host path: {}", destination_dir.display());

        Self {
            config,
            host,
            executor,
            source_dir,
            destination_dir,
        }
    }

    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    pub fn host(&self) -> &HostIdentity {
        &self.host
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Run the whole sequence
    pub fn run(&self) -> InstallReport {
        let mut report = InstallReport::new(self.host.clone());

        info!("start finding suitable kernel mods");
        if !self.has_suitable_build() {
            error!(
                "No suitable kernel mods at {}",
                self.source_dir.display()
            );
            report.record(
                InstallStep::Discover,
                StepStatus::Failed,
                Some(format!("{} not found", self.source_dir.display())),
            );
            report.outcome = InstallOutcome::NoSuitableBuild;
            return report;
        }
        report.record(InstallStep::Discover, StepStatus::Succeeded, None);

        info!("start copying kernel mods to host");
        match self.copy_to_host() {
            Ok(copied) => report.record(
                InstallStep::Copy,
                StepStatus::Succeeded,
                Some(format!("{} files", copied.len())),
            ),
            Err(e) => {
                error!("Failed to copy kernel mods to host: {}", e);
                return report.abort(InstallStep::Copy, &e);
            }
        }

        if self.config.resolve_dependencies {
            info!("start generating module dependencies on host");
            match self.resolve_dependencies() {
                Ok(()) => report.record(InstallStep::ResolveDependencies, StepStatus::Succeeded, None),
                Err(e) if self.config.skip_errors => {
                    warn!("Failed to generate module dependencies, continuing: {}", e);
                    report.record(
                        InstallStep::ResolveDependencies,
                        StepStatus::Tolerated,
                        Some(e.to_string()),
                    );
                }
                Err(e) => {
                    error!("Failed to generate module dependencies: {}", e);
                    return report.abort(InstallStep::ResolveDependencies, &e);
                }
            }
        } else {
            report.record(InstallStep::ResolveDependencies, StepStatus::Skipped, None);
        }

        info!("start installing kernel mods on host");
        match self.activate() {
            Ok(loads) => report.record(
                InstallStep::Activate,
                StepStatus::Succeeded,
                Some(format!("{} modules", loads.len())),
            ),
            Err(e) if self.config.skip_errors => {
                warn!("Failed to install kernel mods, continuing: {}", e);
                report.record(InstallStep::Activate, StepStatus::Tolerated, Some(e.to_string()));
            }
            Err(e) => {
                error!("Failed to install kernel mods on host: {}", e);
                return report.abort(InstallStep::Activate, &e);
            }
        }

        info!("start ensuring kernel mods reload when host restarted");
        match self.ensure_autoload() {
            Ok(created) => report.record(
                InstallStep::PersistAutoload,
                StepStatus::Succeeded,
                Some(if created { "created" } else { "already present" }.to_string()),
            ),
            Err(e) => {
                error!("Failed to ensure kernel mods auto load when host restarted: {}", e);
                return report.abort(InstallStep::PersistAutoload, &e);
            }
        }

        report
    }

    /// Whether a module build for this host ships in the image
    pub fn has_suitable_build(&self) -> bool {
        self.source_dir.is_dir()
    }

    /// Copy the matching build into the host's module tree
    pub fn copy_to_host(&self) -> Result<Vec<PathBuf>> {
        let copied = storage::copy_dir_files(&self.source_dir, &self.destination_dir)?;
        info!(
            "Copied {} files to {}",
            copied.len(),
            self.destination_dir.display()
        );
        Ok(copied)
    }

    /// Regenerate the host's module dependency index
    pub fn resolve_dependencies(&self) -> Result<()> {
        let spec = CommandSpec::new(DEPMOD_COMMAND).timeout(self.config.depmod_timeout_secs);
        self.executor.run_command(&spec).into_result()?;
        Ok(())
    }

    /// Load every module in the destination directory.
    ///
    /// A module the loader reports as already present counts as loaded.
    pub fn activate(&self) -> Result<Vec<ModuleLoad>> {
        let mut loads = Vec::new();
        let mut first_error = None;

        for file in storage::list_files(&self.destination_dir)? {
            let name = module_name(&file);
            let spec = match self.config.activation {
                ActivationMode::Insmod => {
                    CommandSpec::new(INSMOD_COMMAND).arg(file.display().to_string())
                }
                ActivationMode::Modprobe => CommandSpec::new(MODPROBE_COMMAND).arg(name.clone()),
            }
            .timeout(self.config.load_timeout_secs);

            let outcome = self.executor.run_command(&spec);
            if outcome.is_success() {
                info!("{} has been successfully installed on host", name);
                loads.push(ModuleLoad::Loaded(name));
                continue;
            }

            let diagnostic = outcome.diagnostic();
            let nonzero_exit = matches!(outcome.exit, ExitClass::NonZeroExit(_));
            if nonzero_exit && is_already_loaded(&diagnostic) {
                info!("{} is already installed on host, skipping", name);
                loads.push(ModuleLoad::AlreadyLoaded(name));
                continue;
            }

            let err = InstallerError::Exec(outcome.error.unwrap_or_else(|| {
                ExecError::NonZeroExit {
                    program: spec.program.clone(),
                    code: outcome.exit.code(),
                    stderr: outcome.stderr.clone(),
                }
            }));
            if !self.config.skip_errors {
                return Err(err);
            }
            warn!("Failed to install {} on host, continuing: {}", name, diagnostic);
            loads.push(ModuleLoad::Failed(name));
            if first_error.is_none() {
                first_error = Some(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(loads),
        }
    }

    /// Create the boot-time autoloader unless one already exists.
    ///
    /// Returns `true` when the script was written.
    pub fn ensure_autoload(&self) -> Result<bool> {
        let created = storage::ensure_file(&self.config.autoload_path, AUTOLOADER_SCRIPT)?;
        if created {
            info!("Created autoloader {}", self.config.autoload_path.display());
        } else {
            info!(
                "Autoloader {} already present, leaving it untouched",
                self.config.autoload_path.display()
            );
        }
        Ok(created)
    }
}

/// File name without its extension
fn module_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{CancelToken, CommandOutcome, DaemonHandle};
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Replays scripted outcomes, succeeding once the script runs out
    #[derive(Default)]
    struct ScriptedExecutor {
        outcomes: Mutex<VecDeque<CommandOutcome>>,
        seen: Mutex<Vec<CommandSpec>>,
    }

    impl ScriptedExecutor {
        fn with(outcomes: Vec<CommandOutcome>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                seen: Mutex::default(),
            }
        }

        fn programs(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.program.clone())
                .collect()
        }
    }

    impl Executor for ScriptedExecutor {
        fn run_command(&self, spec: &CommandSpec) -> CommandOutcome {
            self.seen.lock().unwrap().push(spec.clone());
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| CommandOutcome::success(String::new(), String::new()))
        }

        fn run_daemon(&self, spec: &CommandSpec, _cancel: &CancelToken) -> DaemonHandle {
            DaemonHandle::failed(ExecError::Pipe {
                program: spec.program.clone(),
                stream: "STDOUT",
            })
        }
    }

    fn failure(program: &str, code: i32, stderr: &str) -> CommandOutcome {
        CommandOutcome {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit: ExitClass::NonZeroExit(code),
            error: Some(ExecError::NonZeroExit {
                program: program.to_string(),
                code,
                stderr: stderr.to_string(),
            }),
        }
    }

    fn host() -> HostIdentity {
        HostIdentity::from_release("linux", "amd64", "3.10.0-1160.el7.x86_64").unwrap()
    }

    fn installer(tmp: &TempDir, executor: ScriptedExecutor) -> Installer<ScriptedExecutor> {
        InstallerBuilder::new()
            .source_root(tmp.path().join("kernel-mods"))
            .modules_root(tmp.path().join("lib/modules"))
            .autoload_path(tmp.path().join("etc/sysconfig/modules/drbd.modules"))
            .host(host())
            .build(executor)
            .unwrap()
    }

    fn stage_build(installer: &Installer<ScriptedExecutor>, files: &[&str]) {
        fs::create_dir_all(installer.source_dir()).unwrap();
        for file in files {
            fs::write(installer.source_dir().join(file), file.as_bytes()).unwrap();
        }
    }

    #[test]
    fn test_config_default() {
        let config = InstallerConfig::default();
        assert_eq!(config.source_root, PathBuf::from("/kernel-mods/drbd"));
        assert_eq!(config.module_subdir, "extra/drbd90");
        assert_eq!(config.activation, ActivationMode::Insmod);
        assert!(config.resolve_dependencies);
        assert!(!config.skip_errors);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_subdir() {
        let empty = InstallerBuilder::new().module_subdir("").host(host());
        assert!(empty.build(ScriptedExecutor::default()).is_err());

        let absolute = InstallerBuilder::new().module_subdir("/extra").host(host());
        assert!(absolute.build(ScriptedExecutor::default()).is_err());
    }

    #[test]
    fn test_already_loaded_predicate() {
        assert!(is_already_loaded(
            "insmod: ERROR: could not insert module drbd.ko: File exists"
        ));
        assert!(is_already_loaded("Module drbd already exists"));
        assert!(!is_already_loaded("insmod: ERROR: could not insert module drbd.ko: Invalid module format"));
    }

    #[test]
    fn test_module_name_strips_extension() {
        assert_eq!(module_name(Path::new("/x/drbd_transport_tcp.ko")), "drbd_transport_tcp");
        assert_eq!(module_name(Path::new("/x/drbd.ko.xz")), "drbd.ko");
    }

    #[test]
    fn test_missing_build_runs_nothing() {
        let tmp = tempdir().unwrap();
        let installer = installer(&tmp, ScriptedExecutor::default());

        let report = installer.run();

        assert_eq!(report.outcome, InstallOutcome::NoSuitableBuild);
        assert!(!report.ran(InstallStep::Copy));
        assert!(!report.ran(InstallStep::Activate));
        assert!(installer.executor.programs().is_empty());
        assert!(!installer.destination_dir().exists());
        assert!(!installer.config().autoload_path.exists());
    }

    #[test]
    fn test_run_insmods_each_module_in_order() {
        let tmp = tempdir().unwrap();
        let installer = installer(&tmp, ScriptedExecutor::default());
        stage_build(&installer, &["drbd_transport_tcp.ko", "drbd.ko"]);

        let report = installer.run();

        assert_eq!(report.outcome, InstallOutcome::Installed);
        let seen = installer.executor.seen.lock().unwrap().clone();
        assert_eq!(seen[0].program, "depmod");
        assert_eq!(seen[0].timeout_secs, DEPMOD_TIMEOUT_SECS);
        assert_eq!(seen[1].program, "insmod");
        assert!(seen[1].args[0].ends_with("/drbd.ko"));
        assert!(seen[2].args[0].ends_with("/drbd_transport_tcp.ko"));
    }

    #[test]
    fn test_modprobe_mode_loads_by_name() {
        let tmp = tempdir().unwrap();
        let executor = ScriptedExecutor::default();
        let installer = InstallerBuilder::new()
            .source_root(tmp.path().join("kernel-mods"))
            .modules_root(tmp.path().join("lib/modules"))
            .autoload_path(tmp.path().join("drbd.modules"))
            .activation(ActivationMode::Modprobe)
            .resolve_dependencies(false)
            .host(host())
            .build(executor)
            .unwrap();
        stage_build(&installer, &["drbd.ko"]);

        let report = installer.run();

        assert_eq!(report.status(InstallStep::ResolveDependencies), Some(StepStatus::Skipped));
        let seen = installer.executor.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].program, "modprobe");
        assert_eq!(seen[0].args, vec!["drbd"]);
    }

    #[test]
    fn test_activate_treats_already_loaded_as_success() {
        let tmp = tempdir().unwrap();
        let executor = ScriptedExecutor::with(vec![failure(
            "insmod",
            1,
            "insmod: ERROR: could not insert module drbd.ko: File exists",
        )]);
        let installer = installer(&tmp, executor);
        stage_build(&installer, &["drbd.ko"]);
        installer.copy_to_host().unwrap();

        let loads = installer.activate().unwrap();
        assert_eq!(loads, vec![ModuleLoad::AlreadyLoaded("drbd".to_string())]);
    }

    #[test]
    fn test_already_loaded_text_only_counts_for_nonzero_exit() {
        let tmp = tempdir().unwrap();
        let executor = ScriptedExecutor::with(vec![CommandOutcome {
            stdout: String::new(),
            stderr: "drbd: File exists".to_string(),
            exit: ExitClass::Timeout,
            error: Some(ExecError::Timeout {
                program: "insmod".to_string(),
                args: vec!["drbd.ko".to_string()],
                seconds: 30,
            }),
        }]);
        let installer = installer(&tmp, executor);
        stage_build(&installer, &["drbd.ko"]);
        installer.copy_to_host().unwrap();

        let err = installer.activate().unwrap_err();
        assert!(matches!(err, InstallerError::Exec(ExecError::Timeout { .. })));
    }

    #[test]
    fn test_failure_without_error_is_reported_as_exec() {
        let tmp = tempdir().unwrap();
        let executor = ScriptedExecutor::with(vec![CommandOutcome {
            stdout: String::new(),
            stderr: "Invalid module format".to_string(),
            exit: ExitClass::NonZeroExit(2),
            error: None,
        }]);
        let installer = installer(&tmp, executor);
        stage_build(&installer, &["drbd.ko"]);
        installer.copy_to_host().unwrap();

        match installer.activate().unwrap_err() {
            InstallerError::Exec(ExecError::NonZeroExit { program, code, .. }) => {
                assert_eq!(program, "insmod");
                assert_eq!(code, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_activate_aborts_on_first_failure() {
        let tmp = tempdir().unwrap();
        let executor = ScriptedExecutor::with(vec![failure("insmod", 1, "Invalid module format")]);
        let installer = installer(&tmp, executor);
        stage_build(&installer, &["drbd.ko", "drbd_transport_tcp.ko"]);
        installer.copy_to_host().unwrap();

        assert!(installer.activate().is_err());
        assert_eq!(installer.executor.programs().len(), 1);
    }

    #[test]
    fn test_activate_with_skip_errors_tries_every_module() {
        let tmp = tempdir().unwrap();
        let executor = ScriptedExecutor::with(vec![failure("insmod", 1, "Invalid module format")]);
        let installer = InstallerBuilder::new()
            .source_root(tmp.path().join("kernel-mods"))
            .modules_root(tmp.path().join("lib/modules"))
            .skip_errors(true)
            .host(host())
            .build(executor)
            .unwrap();
        stage_build(&installer, &["drbd.ko", "drbd_transport_tcp.ko"]);
        installer.copy_to_host().unwrap();

        assert!(installer.activate().is_err());
        assert_eq!(installer.executor.programs().len(), 2);
    }

    #[test]
    fn test_timeout_during_depmod_aborts() {
        let tmp = tempdir().unwrap();
        let executor = ScriptedExecutor::with(vec![CommandOutcome {
            stdout: String::new(),
            stderr: String::new(),
            exit: ExitClass::Timeout,
            error: Some(ExecError::Timeout {
                program: "nsenter".to_string(),
                args: vec!["depmod".to_string()],
                seconds: 300,
            }),
        }]);
        let installer = installer(&tmp, executor);
        stage_build(&installer, &["drbd.ko"]);

        let report = installer.run();

        assert_eq!(
            report.outcome,
            InstallOutcome::Aborted {
                step: InstallStep::ResolveDependencies
            }
        );
        assert!(!report.ran(InstallStep::Activate));
    }

    #[test]
    fn test_persist_failure_is_terminal() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, b"").unwrap();
        let installer = InstallerBuilder::new()
            .source_root(tmp.path().join("kernel-mods"))
            .modules_root(tmp.path().join("lib/modules"))
            .autoload_path(blocker.join("drbd.modules"))
            .skip_errors(true)
            .host(host())
            .build(ScriptedExecutor::default())
            .unwrap();
        stage_build(&installer, &["drbd.ko"]);

        let report = installer.run();

        assert_eq!(
            report.outcome,
            InstallOutcome::Aborted {
                step: InstallStep::PersistAutoload
            }
        );
        assert_eq!(report.status(InstallStep::PersistAutoload), Some(StepStatus::Failed));
    }

    #[test]
    fn test_report_serializes() {
        let tmp = tempdir().unwrap();
        let installer = installer(&tmp, ScriptedExecutor::default());

        let json = serde_json::to_value(installer.run()).unwrap();
        assert_eq!(json["outcome"]["result"], "no_suitable_build");
        assert_eq!(json["host"]["kernel_release"], "1160");
        assert_eq!(json["steps"][0]["step"], "discover");
    }
}
