//! sh_session: the Shroud secure-messaging core.
//!
//! Components, leaves first:
//! - `pin_guard`:       PIN verification with exponential lockout
//! - `identity_keys`:   long-term keypair, PIN-encrypted at rest, backups
//! - `asymmetric`:      sealed boxes to a long-term key
//! - `session_ratchet`: ephemeral key exchange and the indexed ratchet
//! - `verifier`:        security codes and QR payloads
//! - `contacts`:        trust-on-first-use memory of peer keys
//!
//! `channel::SecureChannel` ties them to a directory and a transport.
//! Every component takes its `SecureKeyStore` (and where relevant a
//! `Clock`) at construction; nothing reaches for process-wide state.

pub mod asymmetric;
pub mod channel;
pub mod clock;
pub mod config;
pub mod contacts;
pub mod error;
pub mod identity_keys;
mod kdf_task;
pub mod logging;
pub mod pin_guard;
pub mod session_ratchet;
pub mod verifier;

pub use channel::{Delivery, Received, SecureChannel};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ShroudConfig;
pub use error::{CoreError, CoreResult};
pub use pin_guard::PinGuard;
pub use session_ratchet::{SessionPhase, SessionRatchet};
