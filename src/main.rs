use clap::Parser;
use log::{error, info};

use cvat2dataset::{Args, Pipeline};

fn main() {
    // Initialize the logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match args.to_pipeline_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Building {} dataset from task exports in {}",
        config.export_format,
        config.save_path.display()
    );

    match Pipeline::new(config).run() {
        Ok(summary) => info!(
            "Dataset written to {} ({} items)",
            summary.output_dir.display(),
            summary.export.items_exported
        ),
        Err(e) => {
            error!("Failed to build dataset: {}", e);
            std::process::exit(1);
        }
    }
}
