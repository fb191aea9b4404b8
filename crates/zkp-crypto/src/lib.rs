#![forbid(unsafe_code)]

pub mod prime;
pub mod fiat_shamir;
pub mod pairing;

#[cfg(test)]
mod proptests;
