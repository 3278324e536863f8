//! Vesper server executable — the CLI surface described in spec §6.
//!
//! ```text
//! vesper-server                 start with defaults, warn about it
//! vesper-server -v|--version    print version, exit 0
//! vesper-server --help          print usage, exit 1
//! vesper-server <path>          start from the directive file at <path>
//! vesper-server -                read the directive file from stdin
//! vesper-server <a> <b> ...     usage error, exit 1
//! ```
//!
//! This is deliberately hand-rolled argv matching rather than `clap`:
//! the contract above (bare `--help` exits 1, not 0; anything other than
//! exactly zero or one positional argument is a hard error) doesn't match
//! a conventional CLI's conventions, and bending a derive-based parser to
//! it would be more code than just reading `std::env::args()`.

use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use vesper::{Server, ServerConfig};
use vesper_config::LogDestination;

const USAGE: &str = "Usage: vesper-server [/path/to/vesper.conf] [-]\n\
                      Or if no config file is specified, Vesper will start with\n\
                      an empty configuration using all the default settings.";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [] => run(ServerConfig::default(), true),
        [flag] if flag == "-v" || flag == "--version" => {
            println!("Vesper server v{}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        [flag] if flag == "--help" => {
            eprintln!("{USAGE}");
            ExitCode::FAILURE
        }
        [path] => {
            let config = match ServerConfig::load_file(&PathBuf::from(path)) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Bad directives in config file '{path}': {e}");
                    return ExitCode::FAILURE;
                }
            };
            run(config, false)
        }
        _ => {
            eprintln!("{USAGE}");
            ExitCode::FAILURE
        }
    }
}

/// `init_config -> init_server -> run_loop -> shutdown` (spec §9).
fn run(config: ServerConfig, used_defaults: bool) -> ExitCode {
    init_logging(&config);

    if used_defaults {
        tracing::warn!("no config file specified, using the default configuration");
    }
    if config.daemonize {
        tracing::warn!(
            "daemonize yes was requested but is not supported by this build \
             (fork-based daemonization needs unsafe code, which this workspace denies); \
             continuing in the foreground"
        );
    }

    let pidfile = config.pidfile.clone();
    if let Some(path) = &pidfile {
        if let Err(e) = std::fs::write(path, format!("{}\n", std::process::id())) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write pidfile");
        }
    }

    let exit = init_and_run(config);

    if let Some(path) = &pidfile {
        let _ = std::fs::remove_file(path);
    }

    exit
}

fn init_and_run(config: ServerConfig) -> ExitCode {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "starting vesper server");

    let mut server = match Server::bind(config) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(error = %e, "fatal error binding server");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.load_dataset() {
        tracing::error!(error = %e, "fatal error loading dataset");
        return ExitCode::FAILURE;
    }

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal error in event loop");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(config: &ServerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.loglevel.tracing_filter()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match &config.logfile {
        LogDestination::Stdout => {
            builder.init();
        }
        LogDestination::File(path) => {
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    builder.with_ansi(false).with_writer(std::sync::Mutex::new(file)).init();
                }
                Err(e) => {
                    builder.init();
                    tracing::warn!(path = %path.display(), error = %e, "failed to open logfile, logging to stdout");
                }
            }
        }
    }
}
