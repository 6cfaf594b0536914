//! Fee sponsorship: the sponsor-side coordinator and the client's view of it

pub mod client;
pub mod coordinator;
pub mod rate_limit;
pub mod validation;
pub mod wire;

pub use client::{HttpSponsorClient, SponsorClient, SponsorError};
pub use coordinator::FeeSponsorCoordinator;
pub use rate_limit::SponsorRateLimiter;
pub use validation::SponsorPolicy;
pub use wire::{
    CosignError, CosignErrorCode, SignedPayload, SigningEnvelope, SigningRequest, SigningResponse,
};
