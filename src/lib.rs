//! Trading decision core.
//!
//! A cycle gathers analytical opinions concurrently, weighs them in a
//! consensus vote the risk module can veto, and passes any resulting order
//! through a rule-based constitution before it reaches the venue.

pub mod audit;
pub mod config;
pub mod constitution;
pub mod deliberation;
pub mod execution;
pub mod logging;
pub mod modules;
pub mod orchestrator;
pub mod profile;
pub mod signals;
pub mod voter;
