use snafu::Snafu;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// The error type for the harness.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Unable to start '{}': {}", command, source))]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display(
        "'{}' failed with exit code {}\n\nstdout:\n{}\n\nstderr:\n{}",
        command,
        code,
        stdout,
        stderr
    ))]
    CommandFailed {
        command: String,
        code: i32,
        stdout: String,
        stderr: String,
    },

    #[snafu(display("Unable to write stdin of '{}': {}", command, source))]
    StdinWrite {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("Timed out waiting for {} after {} attempts", what, attempts))]
    Timeout { what: String, attempts: u32 },

    #[snafu(display("A poll needs at least one attempt"))]
    InvalidPoll,

    #[snafu(display("Error parsing TESTENV_ settings: {}", source))]
    Settings { source: envy::Error },

    #[snafu(display("Unable to {}: {}", action, source))]
    Io {
        action: String,
        source: std::io::Error,
    },

    #[snafu(display("Non utf-8 path '{}'", path.display()))]
    NonUtf8Path { path: PathBuf },

    #[snafu(display("{}", source))]
    Model { source: testenv_model::Error },

    #[snafu(display("Unable to parse {}: {}", what, source))]
    JsonParse {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to serialize {}: {}", what, source))]
    JsonSerialize {
        what: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to build http client: {}", source))]
    HttpClient { source: reqwest::Error },

    #[snafu(display("Request to '{}' failed: {}", url, source))]
    Http { url: String, source: reqwest::Error },

    #[snafu(display("Migration file '{}' does not start with a numeric version", path.display()))]
    MigrationName { path: PathBuf },

    #[snafu(display(
        "Migrations '{}' and '{}' share version {}",
        first.display(),
        second.display(),
        version
    ))]
    DuplicateMigration {
        version: u64,
        first: PathBuf,
        second: PathBuf,
    },

    #[snafu(display("Unable to apply migration '{}': {}", name, source))]
    ApplyMigration {
        name: String,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("'{}' requires '{}' in the stack", service, needs))]
    MissingDependency { service: String, needs: String },

    #[snafu(display("No pod matches '{}' in namespace '{}'", selector, namespace))]
    NoPod { namespace: String, selector: String },

    #[snafu(display("Unable to {} coverage archive: {}", action, source))]
    Archive {
        action: String,
        source: std::io::Error,
    },
}

impl From<testenv_model::Error> for Error {
    fn from(source: testenv_model::Error) -> Self {
        Error::Model { source }
    }
}
