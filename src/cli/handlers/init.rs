use std::path::Path;

use crate::cli::commands::InitArgs;
use crate::io::config_io;

pub fn cmd_init(dir: &Path, args: InitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let data_file = match args.data_file {
        Some(p) if p.is_relative() => Some(std::env::current_dir()?.join(p)),
        other => other,
    };
    let config = config_io::init_config(dir, data_file, args.force)?;
    println!("Wrote {}", config_io::config_path(dir).display());
    println!("Tasks will be kept in {}", config.data_file_path(dir).display());
    Ok(())
}
