use std::path::PathBuf;

use clap::Parser;

use crate::{
    cli::styles,
    config::{DEFAULT_OUTPUT_IMAGES_FORMAT, DEFAULT_RETRIES, DEFAULT_WORKER_COUNT},
};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// regsync is a tool for synchronizing container images between OCI registries
#[derive(Debug, Parser)]
#[command(name = "regsync", author, version, styles=styles::styles())]
pub struct RegsyncArgs {
    /// Auth file path, paired with --images
    #[arg(long)]
    pub auth: Option<PathBuf>,

    /// Images file path, paired with --auth
    #[arg(long)]
    pub images: Option<PathBuf>,

    /// Legacy combined config file path (use --auth and --images instead)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log file path (stderr when not given)
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Number of sync workers
    #[arg(short = 'p', long, default_value_t = DEFAULT_WORKER_COUNT)]
    pub proc: usize,

    /// Times to retry failed tasks
    #[arg(short = 'r', long, default_value_t = DEFAULT_RETRIES)]
    pub retries: usize,

    /// OS list to filter multi-arch images, format os[:version]
    #[arg(long = "os")]
    pub os_filter: Vec<String>,

    /// Architecture list to filter multi-arch images, format arch[:variant]
    #[arg(long = "arch")]
    pub arch_filter: Vec<String>,

    /// Force update manifests even when the destination already has them
    #[arg(long)]
    pub force: bool,

    /// Default destination registry for images entries with an empty
    /// destination (also DEFAULT_REGISTRY environment variable)
    #[arg(long)]
    pub registry: Option<String>,

    /// Write successfully synchronized images to this file
    #[arg(long)]
    pub output_success_images: Option<PathBuf>,

    /// Success images output format, json or yaml
    #[arg(long, default_value = DEFAULT_OUTPUT_IMAGES_FORMAT)]
    pub output_images_format: String,
}
