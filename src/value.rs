//! Lock value generation.
//!
//! Values are the ownership token stored at each resource key. They must be
//! unpredictable and globally unique with overwhelming probability, so they
//! are drawn from the operating system's CSPRNG rather than any counter or
//! timestamp.

use rand::RngCore;

/// Minimum entropy required by the spec, in bytes (160 bits).
const VALUE_BYTES: usize = 20;

/// Generate a fresh lock value: 20 bytes (160 bits) from the OS CSPRNG,
/// textually encoded as lowercase hex.
pub fn generate() -> String {
    let mut buf = [0u8; VALUE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
