//! This module contains utilities that are useful for testing code based on the request / reply
//!  layer. They are used for testing the layer itself, but they are also exported for
//!  application testing, which is why they are part of the crate's regular (non-#[cfg(test)])
//!  code.

pub mod handler;
pub mod network;
pub mod overlay;

use crate::overlay::address::Address;

/// convenience method for unit test code: create an [Address] based on a number, the same number
///  generating the same address and different numbers different addresses
pub fn test_address_from_number(number: u64) -> Address {
    Address::from_u64(number)
}
