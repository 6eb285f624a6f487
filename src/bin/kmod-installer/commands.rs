use kmod_installer::controller::{DEPMOD_COMMAND, INSMOD_COMMAND, MODPROBE_COMMAND};
use kmod_installer::isolation::NSENTER_COMMAND;
use kmod_installer::{utils, HostIdentity};
use log::info;

use crate::cli::InstallArgs;

pub fn check_requirements(args: &InstallArgs) {
    info!("Checking installer requirements");
    println!("Checking installer requirements...\n");

    if utils::is_root() {
        println!("[✓] Running as root");
    } else {
        println!("[✗] NOT running as root (required)");
    }

    for program in [NSENTER_COMMAND, DEPMOD_COMMAND, INSMOD_COMMAND, MODPROBE_COMMAND] {
        match utils::find_program(program) {
            Some(path) => println!("[✓] {} found at {}", program, path.display()),
            None => println!("[✗] {} NOT found on PATH", program),
        }
    }

    println!("\nHost info:");
    match HostIdentity::detect() {
        Ok(host) => {
            println!("  OS:             {}", host.os);
            println!("  Arch:           {}", host.arch);
            println!("  Kernel:         {}", host.kernel);
            println!("  Kernel version: {}", host.kernel_version);
            println!("  Kernel release: {}", host.kernel_release);
            let source = host.source_dir(&args.source_root);
            let marker = if source.is_dir() { "✓" } else { "✗" };
            println!("  [{}] Module build: {}", marker, source.display());
            println!(
                "  Destination:    {}",
                host.destination_dir(&args.modules_root, &args.module_subdir)
                    .display()
            );
        }
        Err(e) => println!("  [✗] {}", e),
    }
    println!("  UID: {}", utils::get_uid());
}
