//! Deterministic derivation of outcome token ids from a condition id.
//!
//! Mirrors the Conditional Tokens Framework on-chain construction: the
//! collection id is a compressed alt_bn128 point hashed from the condition
//! id and the outcome index set, and the position id hashes the collateral
//! address with the collection id. With USDC collateral this reproduces the
//! token ids the exchange contracts emit, so markets missing from the
//! catalog can still be linked.

use alloy::primitives::{keccak256, Address, B256, U256};

use crate::constants::USDC_ADDRESS;

/// alt_bn128 base field prime.
const FIELD_P: U256 = U256::from_limbs([
    0x3c208c16d87cfd47,
    0x97816a916871ca8d,
    0xb85045b68181585d,
    0x30644e72e131a029,
]);

/// (FIELD_P + 1) / 4, the square-root exponent for p ≡ 3 (mod 4).
const SQRT_EXP: U256 = U256::from_limbs([
    0x4f082305b61f3f52,
    0x65e05aa45a1c72a3,
    0x6e14116da0605617,
    0x0c19139cb84c680a,
]);

/// Curve constant b in y² = x³ + 3.
const CURVE_B: U256 = U256::from_limbs([3, 0, 0, 0]);

/// Bit 254 flags an odd y coordinate in the compressed encoding.
const ODD_Y_BIT: U256 = U256::from_limbs([0, 0, 0, 0x4000000000000000]);

/// Collection id for one outcome index set of a condition.
pub fn collection_id(condition_id: B256, index_set: u64) -> B256 {
    let mut packed = [0u8; 64];
    packed[..32].copy_from_slice(condition_id.as_slice());
    packed[32..].copy_from_slice(&U256::from(index_set).to_be_bytes::<32>());
    let seed = U256::from_be_bytes::<32>(keccak256(packed).0);

    // The hash's top bit records the parity of y; the low 254 bits seed x.
    let want_odd = seed.bit(255);
    let mut x = seed.reduce_mod(FIELD_P);
    let one = U256::from(1u64);
    let mut y;
    loop {
        x = x.add_mod(one, FIELD_P);
        let yy = x
            .mul_mod(x, FIELD_P)
            .mul_mod(x, FIELD_P)
            .add_mod(CURVE_B, FIELD_P);
        y = yy.pow_mod(SQRT_EXP, FIELD_P);
        if y.mul_mod(y, FIELD_P) == yy {
            break;
        }
    }
    if want_odd != y.bit(0) {
        y = FIELD_P - y;
    }
    let compressed = if y.bit(0) { x | ODD_Y_BIT } else { x };
    B256::from(compressed)
}

/// Position id (ERC-1155 token id) for a collateral and collection.
pub fn position_id(collateral: Address, collection: B256) -> U256 {
    let mut packed = [0u8; 52];
    packed[..20].copy_from_slice(collateral.as_slice());
    packed[20..].copy_from_slice(collection.as_slice());
    U256::from_be_bytes::<32>(keccak256(packed).0)
}

/// (YES, NO) token ids for a binary market, index sets 1 and 2.
pub fn derive_token_ids(condition_id: B256) -> (U256, U256) {
    let yes = position_id(USDC_ADDRESS, collection_id(condition_id, 1));
    let no = position_id(USDC_ADDRESS, collection_id(condition_id, 2));
    (yes, no)
}
