use thiserror::Error;

use crate::reqrep::frame::FrameKind;

/// Failures that the request / reply layer reports to its immediate caller.
///
/// All of these except [ReqrepError::Inactive] are programming errors in the calling protocol.
///  Transport level problems never show up here, they degrade to timeouts.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ReqrepError {
    #[error("a request handler is already bound to protocol tag {0:?}")]
    AlreadyBound(String),
    #[error("the handler is not bound to protocol tag {0:?}")]
    NotBound(String),
    #[error("{0:?} is not a request kind")]
    InvalidKind(FrameKind),
    #[error("protocol tag has {len} bytes, the maximum is {max}")]
    TagTooLong { len: usize, max: usize },
    /// The node is not currently attached to the overlay. This is an expected condition during
    ///  churn rather than a bug.
    #[error("the node is not attached to the overlay")]
    Inactive,
}

impl ReqrepError {
    pub fn is_contract_violation(&self) -> bool {
        !matches!(self, ReqrepError::Inactive)
    }
}
