// SPDX-License-Identifier: MIT

//! Services module - GCP collaborators and token verification.

pub mod audience;
pub mod environment;
pub mod metadata;
pub mod resource_manager;
pub mod verifier;

pub use audience::{resolve_audience_validator, AudienceValidator, InvalidAudience};
pub use environment::GcpEnvironment;
pub use metadata::MetadataClient;
pub use resource_manager::{ProjectInfo, ResourceManagerClient};
pub use verifier::{IapPrincipal, IapVerifier, VerifyError};
