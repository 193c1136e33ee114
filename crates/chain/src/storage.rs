//! Storage key derivation for FRAME storage items

use parity_scale_codec::Encode;
use sp_crypto_hashing::{blake2_128, twox_128};

/// `twox128(pallet) ++ twox128(item)`
pub fn storage_prefix(pallet: &str, item: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(&twox_128(pallet.as_bytes()));
    key.extend_from_slice(&twox_128(item.as_bytes()));
    key
}

/// Key of a `StorageValue`
pub fn storage_value_key(pallet: &str, item: &str) -> Vec<u8> {
    storage_prefix(pallet, item)
}

/// Key of a `StorageMap` entry hashed with `Blake2_128Concat`
pub fn storage_map_key<K: Encode>(pallet: &str, item: &str, map_key: &K) -> Vec<u8> {
    let encoded = map_key.encode();
    let mut key = storage_prefix(pallet, item);
    key.reserve(16 + encoded.len());
    key.extend_from_slice(&blake2_128(&encoded));
    key.extend_from_slice(&encoded);
    key
}
