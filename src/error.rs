//! Crate-wide error type.
//!
//! Mirrors the `nyx-core::error` shape used across this workspace: a small
//! `thiserror` enum with one variant per domain failure plus a blanket `Io`
//! conversion, and a `Result` alias so call sites don't spell out `Error`.

use thiserror::Error;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("resolve failed: {0}")]
    ResolveFailed(String),

    #[error("no interface carries local address {0}")]
    NoSuitableInterface(std::net::IpAddr),

    #[error("capture open failed: {0}")]
    CaptureOpenFailed(String),

    #[error("filter install failed: {0}")]
    FilterInstallFailed(String),

    #[error("kernel socket failed: {0}")]
    KernelSocketFailed(String),

    #[error("ttl neutralization failed: {0}")]
    TtlNeutralizationFailed(String),

    #[error("inject failed: {0}")]
    InjectFailed(String),

    #[error("endpoint closed")]
    Closed,

    #[error("not implemented")]
    NotImplemented,
}

impl Error {
    pub fn resolve_failed(msg: impl Into<String>) -> Self {
        Self::ResolveFailed(msg.into())
    }
    pub fn capture_open_failed(msg: impl Into<String>) -> Self {
        Self::CaptureOpenFailed(msg.into())
    }
    pub fn filter_install_failed(msg: impl Into<String>) -> Self {
        Self::FilterInstallFailed(msg.into())
    }
    pub fn kernel_socket_failed(msg: impl Into<String>) -> Self {
        Self::KernelSocketFailed(msg.into())
    }
    pub fn ttl_neutralization_failed(msg: impl Into<String>) -> Self {
        Self::TtlNeutralizationFailed(msg.into())
    }
    pub fn inject_failed(msg: impl Into<String>) -> Self {
        Self::InjectFailed(msg.into())
    }
}
