//! Connection validation handshake.
//!
//! Immediately after accepting a socket the server writes a random 64-bit
//! challenge. The client answers with [`scramble`] of that value and the
//! server compares it with the response it precomputed when the connection
//! was created. A mismatch closes the socket.
//!
//! **This is obfuscation, not authentication.** The transform is fixed and
//! public; it only keeps stray port scanners and mismatched clients from
//! reaching the framing layer. Both ends must use the same constants.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Mutex;
use tracing::debug;

/// Size of the challenge and of the response on the wire.
pub const HANDSHAKE_SIZE: usize = 8;

const SCRAMBLE_KEY_IN: u64 = 0xDEAD_BEEF_C0DE_CAFE;
const SCRAMBLE_KEY_OUT: u64 = 0xC0DE_FACE_1234_5678;

/// Fixed bit transform answering a challenge: XOR, nibble swap, XOR.
#[inline]
pub fn scramble(input: u64) -> u64 {
    let mixed = input ^ SCRAMBLE_KEY_IN;
    let swapped = ((mixed & 0xF0F0_F0F0_F0F0_F0F0) >> 4) | ((mixed & 0x0F0F_0F0F_0F0F_0F0F) << 4);
    swapped ^ SCRAMBLE_KEY_OUT
}

/// Server-side challenge values for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Challenge {
    /// Value written to the client.
    pub out: u64,
    /// Response the client must send back.
    pub expected: u64,
}

impl Challenge {
    pub fn new(out: u64) -> Self {
        Self {
            out,
            expected: scramble(out),
        }
    }

    pub fn accepts(&self, response: u64) -> bool {
        response == self.expected
    }
}

/// Source of challenge values, shared by all connections of one server.
///
/// Seed it for reproducible tests; otherwise it draws from OS entropy.
pub struct ChallengeGenerator {
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl ChallengeGenerator {
    pub fn from_entropy() -> Self {
        Self::from_rng(StdRng::from_os_rng())
    }

    pub fn from_seed(seed: u64) -> Self {
        debug!(seed, "Using seeded handshake challenge generator");
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    pub fn from_rng<R: RngCore + Send + 'static>(rng: R) -> Self {
        Self {
            rng: Mutex::new(Box::new(rng)),
        }
    }

    /// Seeded when `seed` is set, entropy otherwise.
    pub fn from_config(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::from_seed(seed),
            None => Self::from_entropy(),
        }
    }

    pub fn next_challenge(&self) -> Challenge {
        let out = self
            .rng
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .next_u64();
        Challenge::new(out)
    }
}

impl std::fmt::Debug for ChallengeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeGenerator").finish_non_exhaustive()
    }
}
