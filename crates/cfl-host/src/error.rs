use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{0} channel closed")]
    ChannelClosed(&'static str),
    #[error("invalid configuration: {0}")]
    Config(String),
}
