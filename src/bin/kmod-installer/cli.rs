use clap::{Args, Parser, Subcommand, ValueEnum};
use kmod_installer::controller::{
    DEFAULT_AUTOLOAD_PATH, DEFAULT_MODULES_ROOT, DEFAULT_MODULE_SUBDIR, DEFAULT_SOURCE_ROOT,
};
use kmod_installer::ActivationMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kmod-installer")]
#[command(version, about = "Install kernel modules onto the host from a privileged container", long_about = None)]
#[command(after_help = "EXAMPLES:
    # Install the DRBD build matching the host kernel
    kmod-installer
    kmod-installer install --skip-errors --activation modprobe

    # Run a command on the host
    kmod-installer exec -- lsmod
    kmod-installer exec --daemon --duration 10 -- dmesg -w

    # Check requirements
    kmod-installer check
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub install: InstallArgs,

    #[command(flatten)]
    pub namespace: NamespaceArgs,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the module build matching the host kernel (default)
    Install,

    /// Run a program inside the host's namespaces
    Exec {
        /// Timeout in seconds (0 = default)
        #[arg(short, long, value_name = "SECONDS", default_value_t = 0)]
        timeout: u64,

        /// Run as a daemon and stream its output
        #[arg(short, long)]
        daemon: bool,

        /// Cancel the daemon after this many seconds (runs until killed if unset)
        #[arg(long, value_name = "SECONDS", requires = "daemon")]
        duration: Option<u64>,

        /// Program to run
        program: String,

        /// Program arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Check installer requirements
    Check,
}

#[derive(Args)]
pub struct InstallArgs {
    /// Continue when dependency resolution or module loading fails
    #[arg(long, global = true)]
    pub skip_errors: bool,

    /// Do not run depmod before loading modules
    #[arg(long, global = true)]
    pub no_depmod: bool,

    /// How modules are loaded
    #[arg(long, value_enum, default_value_t = Activation::Insmod, global = true)]
    pub activation: Activation,

    /// Directory holding the module builds shipped in the image
    #[arg(long, value_name = "PATH", default_value = DEFAULT_SOURCE_ROOT, global = true)]
    pub source_root: PathBuf,

    /// Host module tree
    #[arg(long, value_name = "PATH", default_value = DEFAULT_MODULES_ROOT, global = true)]
    pub modules_root: PathBuf,

    /// Subdirectory of the kernel's module tree receiving the modules
    #[arg(long, value_name = "DIR", default_value = DEFAULT_MODULE_SUBDIR, global = true)]
    pub module_subdir: String,

    /// Boot-time autoloader script
    #[arg(long, value_name = "PATH", default_value = DEFAULT_AUTOLOAD_PATH, global = true)]
    pub autoload_path: PathBuf,

    /// Print the installation report as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Block after a successful install
    #[arg(long = "block", alias = "block-the-pod", global = true)]
    pub block: bool,
}

#[derive(Args)]
pub struct NamespaceArgs {
    /// nsenter arguments replacing the default PID 1 namespaces
    #[arg(long, env = "CMD_NSENTER_RUN_ARGS", value_name = "ARGS", global = true)]
    pub nsenter_args: Option<String>,

    /// Separator splitting --nsenter-args into several arguments
    #[arg(long, env = "CMD_NSENTER_ARGS_SEP", value_name = "SEP", global = true)]
    pub nsenter_args_sep: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum Activation {
    /// Load each copied file with insmod
    Insmod,
    /// Load each module by name with modprobe
    Modprobe,
}

impl From<Activation> for ActivationMode {
    fn from(value: Activation) -> Self {
        match value {
            Activation::Insmod => ActivationMode::Insmod,
            Activation::Modprobe => ActivationMode::Modprobe,
        }
    }
}
