use thiserror::Error;

/// Error type threaded through every reconciler and supporting component:
/// a single `thiserror` enum used as the `kube::runtime::Controller`'s
/// error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("finalizer error: {0}")]
    Finalizer(#[from] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("invalid user input: {0}")]
    UserInput(String),

    #[error("illegal state transition: {0}")]
    IllegalTransition(String),

    #[error("Storm control-plane error: {0}")]
    Storm(#[from] crate::storm::StormError),

    #[error("JAR acquisition failed: {0}")]
    Jar(String),

    #[error("failed to parse timestamp: {0}")]
    Chrono(#[from] chrono::ParseError),

    #[error("failed to convert duration: {0}")]
    Duration(#[from] chrono::OutOfRangeError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML serialization error: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
