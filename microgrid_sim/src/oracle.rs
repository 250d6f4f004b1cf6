// src/oracle.rs — external measurement/actuation oracle
//
// The physical-system model lives outside the simulation and answers a
// newline-delimited request/reply protocol: `GET_POWER` returns a decimal
// load value, `SET_DER_OUTPUT <magnitude>` returns an ack string whose
// content is ignored. The controller only ever sees the capability trait.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{self, Duration};

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("oracle I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("oracle request timed out")]
    Timeout,
    #[error("unparsable oracle reply {0:?}")]
    BadReply(String),
    #[error("oracle closed the connection")]
    Disconnected,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait PowerOracle: Send + Sync {
    /// Measured load, in MW.
    async fn get_power(&self) -> Result<f64, OracleError>;
    /// Push the new DER setpoint magnitude to the physical model.
    async fn set_der_output(&self, magnitude: f64) -> Result<(), OracleError>;
}

pub struct RemoteOracle {
    addr: String,
    timeout: Duration,
}

impl RemoteOracle {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// One request, one reply line, bounded by the configured timeout.
    async fn round_trip(&self, request: &str) -> Result<String, OracleError> {
        let io = async {
            let stream = TcpStream::connect(&self.addr).await?;
            let (read_half, mut write_half) = stream.into_split();
            write_half.write_all(request.as_bytes()).await?;
            write_half.write_all(b"\n").await?;

            let mut reader = BufReader::new(read_half);
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(OracleError::Disconnected);
            }
            Ok(line.trim().to_string())
        };
        time::timeout(self.timeout, io)
            .await
            .map_err(|_| OracleError::Timeout)?
    }
}

#[async_trait]
impl PowerOracle for RemoteOracle {
    async fn get_power(&self) -> Result<f64, OracleError> {
        let reply = self.round_trip("GET_POWER").await?;
        reply
            .parse::<f64>()
            .map_err(|_| OracleError::BadReply(reply))
    }

    async fn set_der_output(&self, magnitude: f64) -> Result<(), OracleError> {
        // ack content is unspecified; only its arrival matters
        let _ = self
            .round_trip(&format!("SET_DER_OUTPUT {magnitude}"))
            .await?;
        Ok(())
    }
}

// ================================ Tests =====================================
