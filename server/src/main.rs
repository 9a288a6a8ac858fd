use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tide::listener::Listener;

mod fs;
mod test_runner;

/// Start a data plane moving files within the local file system.
#[derive(Clone, Debug, Parser)]
struct Options {
    /// The port where the signaling API should be served.
    #[clap(short, long, env = "DATAPLANE_PORT", default_value = "8080")]
    port: u16,

    /// Directory holding provided datasets and destinations prepared for consumers.
    #[clap(
        short,
        long,
        env = "DATAPLANE_STORAGE_DIR",
        value_name = "DIR",
        default_value = "/var/lib/dataplane"
    )]
    storage: PathBuf,

    /// Milliseconds between two writes of a streaming transfer.
    #[clap(long, env = "DATAPLANE_STREAM_INTERVAL", default_value = "100")]
    stream_interval: u64,

    /// URL of a control plane to register with once the signaling API is up.
    #[clap(long, env = "DATAPLANE_CONTROL_PLANE_URL")]
    control_plane: Option<String>,

    #[clap(flatten)]
    dataplane: dataplane::Options,
}

impl Options {
    async fn serve(&self) -> anyhow::Result<()> {
        let dataplane = fs::dataplane(
            self.dataplane.builder(),
            self.storage.clone(),
            Duration::from_millis(self.stream_interval),
        );
        tracing::info!(
            id = dataplane.id(),
            port = self.port,
            storage = %self.storage.display(),
            "starting dataplane"
        );

        let mut listener = dataplane
            .controller()
            .bind(format!("0.0.0.0:{}", self.port))
            .await?;
        if let Some(control_plane) = &self.control_plane {
            dataplane.register_on(control_plane).await?;
        }
        listener.accept().await?;
        Ok(())
    }
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    dataplane::init_logging();
    Options::parse().serve().await
}
