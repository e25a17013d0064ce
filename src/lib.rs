use thiserror::Error;

pub mod certmanager;
pub mod controller;
pub mod reconciling;
pub mod resources;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kube Error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// The parent spec is structurally invalid. Retrying does not help until the user changes it.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The object changed in the store between reading and writing it.
    #[error("conflict while writing {kind} \"{name}\"")]
    Conflict { kind: String, name: String },

    #[error("object is missing key: {0}")]
    MissingObjectKey(&'static str),

    #[error("RootShard \"{namespace}/{name}\" referenced by FrontProxy does not exist")]
    RootShardMissing { namespace: String, name: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Whether re-running the pass later can succeed without a spec change.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Configuration(_) | Error::YamlError(_))
    }
}
