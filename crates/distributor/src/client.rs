//! Analyzer HTTP client abstraction.
//!
//! The [`AnalyzerClient`] trait abstracts the two calls the engine makes against an
//! analyzer backend, allowing production code to use [`HttpAnalyzerClient`] while
//! unit tests use `MockAnalyzerClient`.
//!
//! # Wire contract
//!
//! ```text
//! probe   : GET  {endpoint}/health                  -> 2xx = healthy
//! deliver : POST {endpoint}/logs  (JSON LogPacket)  -> 2xx = delivered
//!           X-Packet-ID: <packet id>
//!           X-Emitter-ID: <emitter id>
//! ```
//!
//! Timeouts are not applied here. Callers wrap each call in
//! `tokio::time::timeout` so the per-analyzer probe timeout and the engine's
//! delivery timeout stay independent of the client.

use std::future::Future;

use logrelay_core::types::LogPacket;
use reqwest::StatusCode;

use crate::error::{DistributorError, TransportError};

/// Header carrying the packet id on delivery.
pub const PACKET_ID_HEADER: &str = "X-Packet-ID";

/// Header carrying the emitter id on delivery.
pub const EMITTER_ID_HEADER: &str = "X-Emitter-ID";

/// Analyzer backend operations.
///
/// The trait is `Send + Sync + 'static` so one client can be shared by the
/// processing loop, every in-flight delivery task and the health monitor.
pub trait AnalyzerClient: Send + Sync + 'static {
    /// Probes the analyzer's liveness endpoint.
    ///
    /// # Errors
    ///
    /// - `TransportError::Status`: non-2xx response
    /// - `TransportError::Unreachable` / `Timeout`: the endpoint could not be reached
    fn probe(&self, endpoint: &str) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Delivers one packet to the analyzer.
    ///
    /// # Errors
    ///
    /// Same classification as [`AnalyzerClient::probe`].
    fn deliver(
        &self,
        endpoint: &str,
        packet: &LogPacket,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Production client backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpAnalyzerClient {
    http: reqwest::Client,
}

impl HttpAnalyzerClient {
    /// Builds a client with a logrelay user agent.
    ///
    /// # Errors
    ///
    /// Returns `DistributorError::Http` if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, DistributorError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("logrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

impl AnalyzerClient for HttpAnalyzerClient {
    async fn probe(&self, endpoint: &str) -> Result<(), TransportError> {
        let response = self.http.get(format!("{endpoint}/health")).send().await?;
        check_status(response.status())
    }

    async fn deliver(&self, endpoint: &str, packet: &LogPacket) -> Result<(), TransportError> {
        let response = self
            .http
            .post(format!("{endpoint}/logs"))
            .header(PACKET_ID_HEADER, packet.id())
            .header(EMITTER_ID_HEADER, packet.emitter_id())
            .json(packet)
            .send()
            .await?;
        check_status(response.status())
    }
}

fn check_status(status: StatusCode) -> Result<(), TransportError> {
    if status.is_success() {
        Ok(())
    } else {
        Err(TransportError::Status(status.as_u16()))
    }
}

#[cfg(test)]
pub(crate) use mock::{DeliveryRecord, MockAnalyzerClient};
