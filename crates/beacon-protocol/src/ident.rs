//! Client and room identifier generation
//!
//! Identifiers are random 128-bit values in the canonical 36-character
//! hyphenated hex form (version nibble 4, variant in 8..b). Uniqueness is
//! statistical; there is no collision recovery anywhere in the server.

use uuid::Uuid;

/// Length of an identifier in its canonical form
pub const ID_LEN: usize = 36;

/// Generate a fresh identifier
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
