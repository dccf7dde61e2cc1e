//! Errors of the client API

use wayrt_backend::client::{InvalidId, WaylandError};

/// A request was refused locally, before anything was sent to the server
///
/// Each variant mirrors the protocol error the compositor would have raised, which
/// would have killed the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// The object, or an object given as argument, is no longer alive
    #[error(transparent)]
    InvalidId(#[from] InvalidId),

    /// An argument has a value outside of what the protocol allows
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The request does not exist in the version the object was bound with
    #[error("{request} requires version {since}, the object has version {version}")]
    UnsupportedVersion {
        /// Name of the request
        request: &'static str,
        /// Version that introduced the request
        since: u32,
        /// Version of the object
        version: u32,
    },

    /// The surfaces given for a sub-surface operation are not valid
    #[error("bad surface for a sub-surface operation")]
    BadSurface,

    /// The surface already has another role
    #[error("the surface already has another role")]
    Role,

    /// The data source cannot be used for this request
    #[error("the data source does not accept this request")]
    InvalidSource,

    /// An action mask contains bits outside of the known actions
    #[error("the action mask contains invalid values")]
    InvalidActionMask,

    /// The preferred action is not a single action of the mask, or not allowed by the source
    #[error("invalid drag-and-drop action")]
    InvalidAction,

    /// Finish was called before an action and a mime type were negotiated
    #[error("finish request was called untimely")]
    InvalidFinish,

    /// The offer is finished and only accepts destruction
    #[error("the offer does not accept this request")]
    InvalidOffer,
}

/// Errors of a blocking wait on a [`SyncToken`](crate::SyncToken)
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// The wait was attempted from an event callback of the same connection
    ///
    /// The callback that would release it can only run after the current one returns.
    #[error("cannot wait on the connection from inside an event callback")]
    WouldDeadlock,

    /// The deadline passed before the server answered
    #[error("the server did not answer in time")]
    Timeout,

    /// The connection died before the server answered
    #[error("connection error: {0}")]
    Connection(#[from] WaylandError),
}
