//! # tPRE Core
//!
//! Core protocol library for threshold proxy re-encryption over secp256k1.
//!
//! This crate provides the building blocks for a network of nodes that
//! jointly hold a key no single node ever sees:
//! - Distributed Key Generation (Rabin-style DKG with Pedersen commitments)
//! - Threshold proxy re-encryption of stored secrets toward a reader key
//! - DLEQ proofs that make every re-encrypted share publicly verifiable
//!
//! ## Protocol Overview
//!
//! A session of `n` participants deals shares of fresh polynomials, certifies
//! honest dealers through a response/justification round, and sums the
//! qualified contributions into a [`DistKeyShare`]. Secrets are encrypted
//! against the distributed public key; a threshold of nodes can later
//! re-encrypt them toward a reader without reconstructing the private key
//! anywhere.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tpre_core::{dkg::Session, transport::MemoryHub};
//!
//! // Generate this node's share of the distributed key
//! let session = Session::new(config, key)?;
//! let share = session.run(transport).await?;
//!
//! // Serve a reader's re-encryption request
//! let reencrypted = reencrypt::handle_request(&request, &envelope, &share, &mut rng)?;
//! ```

pub mod dkg;
pub mod error;
pub mod group;
pub mod reencrypt;
pub mod transport;
pub mod types;
pub mod wire;

pub use error::{Error, Result};
pub use types::{DistKeyShare, NodeKey, ParticipantIndex, PriShare, SessionConfig, SessionId};

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default threshold for a 3-node setup
pub const DEFAULT_THRESHOLD: u32 = 2;

/// Default number of participants
pub const DEFAULT_PARTICIPANTS: u32 = 3;
