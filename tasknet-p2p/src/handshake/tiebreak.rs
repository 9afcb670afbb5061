//! Which side of a connection opens the control stream.
//!
//! Both sides compute the product of the last eight bytes of each public
//! key; the side with the strictly larger product initiates. Equal products
//! fall back to comparing the full keys, so exactly one side of any pair of
//! distinct keys initiates.

use std::cmp::Ordering;

use tasknet_core::PublicKey;

/// Number of trailing key bytes that feed the product.
const TAIL_BYTES: usize = 8;

/// Product of the last eight bytes of a key.
///
/// 255^8 fits in a `u64`, so the product never overflows.
pub fn key_tail_product(key: &[u8; 32]) -> u64 {
    key[32 - TAIL_BYTES..]
        .iter()
        .fold(1u64, |acc, &b| acc * u64::from(b))
}

/// Whether the local node should open the control stream to `remote`.
pub fn should_initiate_stream(local: &PublicKey, remote: &PublicKey) -> bool {
    initiates(local.as_bytes(), remote.as_bytes())
}

fn initiates(local: &[u8; 32], remote: &[u8; 32]) -> bool {
    match key_tail_product(local).cmp(&key_tail_product(remote)) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => local > remote,
    }
}
