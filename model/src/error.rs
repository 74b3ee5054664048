use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type for stack files and manifest rendering.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to read stack file '{}': {}", path.display(), source))]
    File {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("'{}' is not a valid {} name: must be a lowercase RFC 1123 label", name, what))]
    InvalidName { what: String, name: String },

    #[snafu(display("No ports configured for suite '{}' and it has no default allocation", suite))]
    MissingPorts { suite: String },

    #[snafu(display(
        "Host port {} is allocated to both '{}' and '{}'",
        port,
        first,
        second
    ))]
    PortConflict {
        port: u16,
        first: String,
        second: String,
    },

    #[snafu(display("Unable to {}: {}", action, source))]
    SerdeYaml {
        action: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("Workload '{}' is declared more than once", name))]
    DuplicateWorkload { name: String },
}
