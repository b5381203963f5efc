//! Distributed key generation module.
//!
//! Rabin-style DKG: every participant deals Pedersen-committed shares of a
//! fresh polynomial, verifiers approve or complain, complaints are answered
//! with justifications, certified dealers reveal Feldman commitments, and the
//! qualified dealers' contributions are summed into a [`DistKeyShare`].
//!
//! [`DistKeyShare`]: crate::types::DistKeyShare

mod engine;
mod messages;
mod session;

pub use engine::{CertificationUpdate, DealerFault, DealerStatus, Generator};
pub use messages::{
    Deal, Justification, Ready, Response, ResponseStatus, SecretCommits,
};
pub use session::{Session, SessionState};
