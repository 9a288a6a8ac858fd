//! Command-line and environment configuration of a data plane.

use crate::sdk::{Builder, Dataplane};
use clap::Args;
use std::time::Duration;

/// Data plane options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// Unique identifier of the data plane [default: a random UUID].
    #[clap(long, env = "DATAPLANE_ID")]
    pub id: Option<String>,

    /// Human-readable name announced to the control plane.
    #[clap(long, env = "DATAPLANE_NAME")]
    pub name: Option<String>,

    /// Description announced to the control plane.
    #[clap(long, env = "DATAPLANE_DESCRIPTION")]
    pub description: Option<String>,

    /// Public URL of the signaling API, announced to the control plane.
    #[clap(long, env = "DATAPLANE_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Supported transfer types, like `HttpData-PUSH`.
    #[clap(
        long = "transfer-type",
        env = "DATAPLANE_TRANSFER_TYPES",
        value_delimiter = ','
    )]
    pub transfer_types: Vec<String>,

    /// Labels announced to the control plane.
    #[clap(long = "label", env = "DATAPLANE_LABELS", value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Seconds to wait for the control plane to answer a notification.
    #[clap(long, env = "DATAPLANE_CONTROL_PLANE_TIMEOUT", default_value = "30")]
    pub control_plane_timeout: u64,
}

impl Options {
    /// A [`Builder`] preconfigured with these options.
    ///
    /// Hooks and storage still need to be configured on the result.
    pub fn builder(&self) -> Builder {
        let mut builder = Dataplane::builder()
            .timeout(Duration::from_secs(self.control_plane_timeout));
        if let Some(id) = &self.id {
            builder = builder.id(id);
        }
        if let Some(name) = &self.name {
            builder = builder.name(name);
        }
        if let Some(description) = &self.description {
            builder = builder.description(description);
        }
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint);
        }
        for transfer_type in &self.transfer_types {
            builder = builder.transfer_type(transfer_type);
        }
        for label in &self.labels {
            builder = builder.label(label);
        }
        builder
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[clap(flatten)]
        dataplane: Options,
    }

    #[test]
    fn test_builder_from_args() {
        let cli = Cli::parse_from([
            "dataplane",
            "--id",
            "dp-1",
            "--name",
            "files",
            "--transfer-type",
            "FileSystem-PUSH,FileSystemAsync-PUSH",
            "--label",
            "local",
        ]);
        assert_eq!(cli.dataplane.control_plane_timeout, 30);

        let registration = cli.dataplane.builder().build().registration();
        assert_eq!(registration.dataplane_id, "dp-1");
        assert_eq!(registration.name.as_deref(), Some("files"));
        assert_eq!(registration.description, None);
        assert_eq!(
            registration.transfer_types.into_iter().collect::<Vec<_>>(),
            ["FileSystem-PUSH", "FileSystemAsync-PUSH"]
        );
        assert_eq!(registration.labels.len(), 1);
    }
}
