//! Request execution for the NeuroSync backend.
//!
//! This module provides the `RequestDispatcher` that every feature module
//! calls, the `Transport` seam it sends through, and the
//! `ResponseClassifier` that folds every outcome into a closed set of
//! `ApiError` kinds.
//!
//! Authenticated requests carry `Authorization: Bearer <access token>`.

pub mod classifier;
pub mod dispatcher;
pub mod error;
pub mod transport;

pub use reqwest::Method;

pub use classifier::{ClassifiedResult, ResponseClassifier};
pub use dispatcher::{is_idempotent, ExecuteOptions, PendingRequest, RequestDispatcher};
pub use error::{ApiError, ErrorKind, FieldErrors, RetryPolicy};
pub use transport::{
    RawResponse, ReqwestTransport, RequestBody, Transport, TransportError, TransportErrorKind,
    TransportRequest,
};
