//! ccrun - Minimal Container Runtime CLI
//!
//! ## Usage
//!
//! ```sh
//! ccrun run [--hostname NAME] [--rootfs PATH] [--pidns] [--mntns] [--userns]
//!           [--mem MB] [--cpu PCT] [--workdir DIR] [--env K=V]... -- <cmd> [args...]
//! ccrun pull [--out DIR] <image[:tag]>
//! ```
//!
//! Exit codes: 0 on success, the child's exit code when the command runs,
//! 1 on launcher/setup failure, 2 on usage errors.
//!
//! The sentinel subcommand is internal: it is only ever invoked by the
//! launcher's self re-exec and is deliberately absent from the help text.

use ccrun::constants::{CHILD_SENTINEL, DEFAULT_OUT_DIR};
use ccrun::{Error, ImageRef, LaunchConfig, RegistryClient, exec, launcher};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    // Diagnostics to stderr; stdout belongs to the user command.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
        process::exit(2);
    }

    match args[1].as_str() {
        "run" => cmd_run(&args[2..]),
        "pull" => cmd_pull(&args[2..]),
        sentinel if sentinel == CHILD_SENTINEL => cmd_child(&args[2..]),
        "help" | "--help" | "-h" => {
            usage();
            process::exit(0);
        }
        "version" | "--version" | "-V" => {
            println!("ccrun {}", env!("CARGO_PKG_VERSION"));
            process::exit(0);
        }
        unknown => {
            eprintln!("ccrun: unknown command '{}'", unknown);
            usage();
            process::exit(2);
        }
    }
}

fn usage() {
    eprintln!(
        "Usage:\n  \
         ccrun run [--hostname NAME] [--rootfs PATH] [--pidns] [--mntns] [--userns] \
         [--mem MB] [--cpu PCT] [--workdir DIR] [--env K=V]... -- <cmd> [args...]\n  \
         ccrun pull [--out DIR] <image[:tag]>"
    );
}

fn usage_error(message: &str) -> ! {
    eprintln!("ccrun: {}", message);
    usage();
    process::exit(2);
}

// =============================================================================
// run
// =============================================================================

fn cmd_run(args: &[String]) -> ! {
    let mut cfg = LaunchConfig::default();
    let mut rest: Vec<String> = Vec::new();
    let mut i = 0;

    let value = |args: &[String], i: usize, flag: &str| -> String {
        match args.get(i + 1) {
            Some(v) => v.clone(),
            None => usage_error(&format!("{} requires a value", flag)),
        }
    };

    while i < args.len() {
        match args[i].as_str() {
            "--hostname" => {
                cfg.hostname = value(args, i, "--hostname");
                i += 2;
            }
            "--rootfs" => {
                cfg.rootfs = value(args, i, "--rootfs");
                i += 2;
            }
            "--pidns" => {
                cfg.use_pid = true;
                i += 1;
            }
            "--mntns" => {
                cfg.use_mnt = true;
                i += 1;
            }
            "--userns" => {
                cfg.use_user = true;
                i += 1;
            }
            "--mem" => {
                let mb: i64 = match value(args, i, "--mem").parse() {
                    Ok(mb) => mb,
                    Err(_) => usage_error("--mem expects a number of megabytes"),
                };
                cfg.mem_bytes = mb * 1024 * 1024;
                i += 2;
            }
            "--cpu" => {
                cfg.cpu_percent = match value(args, i, "--cpu").parse() {
                    Ok(pct) => pct,
                    Err(_) => usage_error("--cpu expects a percentage"),
                };
                i += 2;
            }
            "--workdir" => {
                cfg.workdir = value(args, i, "--workdir");
                i += 2;
            }
            "--env" => {
                let pair = value(args, i, "--env");
                if !pair.contains('=') {
                    usage_error("--env expects KEY=VAL");
                }
                cfg.env.push(pair);
                i += 2;
            }
            "--" => {
                rest = args[i + 1..].to_vec();
                break;
            }
            other if !other.starts_with('-') => {
                rest = args[i..].to_vec();
                break;
            }
            other => usage_error(&format!("run: unknown flag '{}'", other)),
        }
    }

    if rest.is_empty() {
        usage_error("run: no command provided");
    }
    cfg.use_uts = !cfg.hostname.is_empty();

    let command = rest.remove(0);

    // Fast path: with nothing to isolate, behave as a transparent shell.
    if cfg.is_empty() {
        match exec::exec_passthrough(&command, &rest, &[]) {
            Ok(code) => process::exit(code),
            Err(e) => {
                eprintln!("ccrun: {}", e);
                process::exit(1);
            }
        }
    }

    match launcher::spawn_child(&cfg, &command, &rest) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("ccrun: {}", e);
            process::exit(1);
        }
    }
}

// =============================================================================
// pull
// =============================================================================

fn cmd_pull(args: &[String]) -> ! {
    let mut out_dir = PathBuf::from(DEFAULT_OUT_DIR);
    let mut image: Option<String> = None;
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--out" => {
                match args.get(i + 1) {
                    Some(dir) => out_dir = PathBuf::from(dir),
                    None => usage_error("--out requires a directory"),
                }
                i += 2;
            }
            other if other.starts_with('-') => usage_error(&format!("pull: unknown flag '{}'", other)),
            positional => {
                if image.is_some() {
                    usage_error("pull: expected exactly one image reference");
                }
                image = Some(positional.to_string());
                i += 1;
            }
        }
    }

    let Some(image) = image else {
        usage_error("pull: missing image reference");
    };

    let reference = match ImageRef::parse(&image) {
        Ok(reference) => reference,
        Err(e) => {
            eprintln!("ccrun: {}", e);
            process::exit(2);
        }
    };

    let dest = out_dir.join(&reference.repository).join(&reference.tag);

    let result = RegistryClient::new().and_then(|mut client| client.pull(&reference, &dest));
    match result {
        Ok(()) => {
            println!("Pulled {} to {}", reference, dest.display());
            process::exit(0);
        }
        Err(e) => {
            eprintln!("ccrun: {}", e);
            process::exit(1);
        }
    }
}

// =============================================================================
// sentinel (child phase)
// =============================================================================

fn cmd_child(args: &[String]) -> ! {
    let (cfg, command, command_args) = match LaunchConfig::parse_sentinel_args(args) {
        Ok(parsed) => parsed,
        Err(Error::Usage(message)) => {
            eprintln!("ccrun: {}", message);
            process::exit(2);
        }
        Err(e) => {
            eprintln!("ccrun: {}", e);
            process::exit(1);
        }
    };

    match launcher::child_main(&cfg, &command, &command_args) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("ccrun: {}", e);
            process::exit(1);
        }
    }
}
