use clap::Parser;
use tasker::cli::commands::Cli;
use tasker::cli::handlers;
use tasker::io::config_io;
use tasker::logging;

fn main() {
    let cli = Cli::parse();

    let dir = config_io::config_dir(cli.config_dir.as_deref());
    let logger = match logging::init_logging(&dir, cli.log_level.as_deref()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("warning: logging disabled: {}", e);
            None
        }
    };

    let result = handlers::dispatch(cli);
    if let Err(e) = &result {
        log::info!("command failed: {}", e);
    }
    // process::exit skips destructors, so flush buffered log records first
    if let Some(handle) = &logger {
        handle.flush();
    }
    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
