use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use driftfs_backend::{MemoryBackend, ObjectStorage, S3Backend, S3Options};
use driftfs_fuse::{MountConfig, ObjectFs};
use driftfs_logging::LogConfig;

/// driftfs mount daemon
#[derive(Parser, Debug)]
#[command(name = "driftfs-mount", version, about)]
struct Args {
    /// Directory to mount on
    #[arg(short, long)]
    mountpoint: String,

    /// Object-store flavor (s3 or memory)
    #[arg(long, default_value = "s3")]
    backend: String,

    /// Bucket of the object store
    #[arg(long, default_value = "")]
    bucket: String,

    /// Region of the object store
    #[arg(long, default_value = "")]
    region: String,

    /// Endpoint URL of the object store
    #[arg(long, default_value = "")]
    endpoint: String,

    /// Access key of the object store
    #[arg(long = "ak", default_value = "")]
    access_key: String,

    /// Secret key of the object store
    #[arg(long = "sk", default_value = "")]
    secret_key: String,

    /// Split file data into chunk objects plus a manifest
    #[arg(long)]
    chunk: bool,

    /// Cut chunks at fixed boundaries (content-defined when disabled)
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    fixed: bool,

    /// Compression codec for stored data (snappy/lz4/zstd)
    #[arg(long, default_value = "")]
    compress: String,

    /// Directory for log files (console only when omitted)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    fn mount_config(&self) -> MountConfig {
        MountConfig {
            mountpoint: self.mountpoint.clone(),
            backend: self.backend.clone(),
            bucket: self.bucket.clone(),
            region: self.region.clone(),
            endpoint: self.endpoint.clone(),
            access_key: self.access_key.clone(),
            secret_key: self.secret_key.clone(),
            chunk: self.chunk,
            fixed: self.fixed,
            compress: self.compress.clone(),
        }
    }
}

fn build_backend(config: &MountConfig) -> Arc<dyn ObjectStorage> {
    match config.backend.as_str() {
        "memory" => Arc::new(MemoryBackend::new()),
        _ => Arc::new(S3Backend::new(&S3Options {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
        })),
    }
}

/// Wait for a shutdown signal (CTRL+C or SIGTERM).
async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = ctrl_c => { info!("received CTRL+C"); }
        _ = sigterm.recv() => { info!("received SIGTERM"); }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_config = LogConfig {
        log_dir: args.log_dir.clone(),
        ..Default::default()
    };
    let _log_guard = driftfs_logging::init_logging(&log_config);

    let config = args.mount_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    let backend = build_backend(&config);
    backend
        .create()
        .await
        .map_err(|e| anyhow::anyhow!("prepare bucket: {}", e))?;

    let fs = ObjectFs::new(backend, config.data_path_options());
    info!(
        mountpoint = %config.mountpoint,
        root = %fs.root_ino(),
        "driftfs ready; attach a FUSE session to serve the mountpoint"
    );

    wait_for_shutdown_signal().await;
    info!("driftfs shutting down");
    Ok(())
}
