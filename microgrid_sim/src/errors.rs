//thiserror-based error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}
