//! Wallet management and address encoding
//!
//! Key pairs, base-58 check addresses and the on-disk wallet collection.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{convert_address, hash_pub_key, validate_address, Wallet, ADDRESS_CHECK_SUM_LEN};
pub use wallets::{wallet_file_name, Wallets};
