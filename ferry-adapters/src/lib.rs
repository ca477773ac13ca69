//! Ferry Stage Client Adapters
//!
//! Thin, stateless interfaces to the four external collaborators of a
//! promotion run:
//! - [`TrainingService`]: submit a tuning job and read its status
//! - [`ArtifactRegistry`]: copy a model artifact across scopes
//! - [`DeploymentService`]: provision and release serving endpoints
//! - [`InferenceService`]: issue a single inference call
//!
//! Every trait ships with an HTTP/JSON implementation. All failures are
//! translated into [`AdapterError`], whose [`ErrorKind`] is the taxonomy the
//! orchestrator reasons about.
//!
//! Create verbs take an idempotency token and send it as the
//! `Idempotency-Key` header, so calling them twice with the same token never
//! creates a second resource on backends that honor it.

pub mod deployment;
pub mod error;
mod http;
pub mod inference;
pub mod registry;
pub mod training;

pub use deployment::{DeployState, DeployStatus, DeploymentService, HttpDeploymentService};
pub use error::{AdapterError, BackendError, Result};
pub use ferry_core::domain::error::ErrorKind;
pub use http::HttpTransport;
pub use inference::{HttpInferenceService, InferenceResponse, InferenceService};
pub use registry::{
    ArtifactInfo, ArtifactRegistry, CopyArtifactRequest, CopyOutcome, HttpArtifactRegistry,
};
pub use training::{HttpTrainingService, JobState, JobStatus, TrainingService, TuningJobRequest};
