//! OrderFilled log decoding and side/price inference.
//!
//! Event layout:
//!   topics[0] = keccak256("OrderFilled(bytes32,address,address,...)")
//!   topics[1] = orderHash
//!   topics[2] = maker (left-padded address)
//!   topics[3] = taker (left-padded address)
//!   data      = makerAssetId, takerAssetId, makerAmount, takerAmount, fee
//!               as five abi-encoded uint256 words
//!
//! Asset id 0 is the collateral (USDC) leg. The maker paying collateral is
//! a BUY of the taker's outcome token; the maker paying tokens is a SELL.

use std::cmp::Ordering;

use alloy::primitives::{Address, B256, U256};
use thiserror::Error;

use crate::chain::RawLog;
use crate::constants::ORDER_FILLED_TOPIC;

/// Number of abi words in the event payload.
const DATA_WORDS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

/// A normalized fill. Quantities are exact decimal strings; the price is
/// USDC per token rounded half-even to six places.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub tx_hash: String,
    pub log_index: u64,
    pub block_number: u64,
    pub exchange: String,
    pub order_hash: String,
    pub maker: String,
    pub taker: String,
    pub maker_asset_id: String,
    pub taker_asset_id: String,
    pub maker_amount: String,
    pub taker_amount: String,
    pub fee: String,
    pub price: String,
    pub token_id: String,
    pub side: Side,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected at least 4 topics, got {have}")]
    MissingTopics { have: usize },
    #[error("topic0 {topic0} is not the OrderFilled signature")]
    SignatureMismatch { topic0: B256 },
    #[error("event payload truncated: {len} bytes, need 160")]
    TruncatedData { len: usize },
    #[error("neither asset leg is the collateral asset")]
    NoCollateralLeg,
    #[error("both asset legs claim the collateral asset")]
    AmbiguousCollateral,
    #[error("token leg has zero quantity")]
    ZeroDenominator,
}

pub fn decode_order_filled(log: &RawLog) -> Result<Trade, DecodeError> {
    if log.topics.len() < 4 {
        return Err(DecodeError::MissingTopics {
            have: log.topics.len(),
        });
    }
    if log.topics[0] != ORDER_FILLED_TOPIC {
        return Err(DecodeError::SignatureMismatch {
            topic0: log.topics[0],
        });
    }
    if log.data.len() < DATA_WORDS * 32 {
        return Err(DecodeError::TruncatedData {
            len: log.data.len(),
        });
    }

    let order_hash = log.topics[1];
    let maker = Address::from_slice(&log.topics[2].0[12..]);
    let taker = Address::from_slice(&log.topics[3].0[12..]);

    let maker_asset_id = word(&log.data, 0);
    let taker_asset_id = word(&log.data, 1);
    let maker_amount = word(&log.data, 2);
    let taker_amount = word(&log.data, 3);
    let fee = word(&log.data, 4);

    let (side, token_id, price) = match (maker_asset_id.is_zero(), taker_asset_id.is_zero()) {
        (true, true) => return Err(DecodeError::AmbiguousCollateral),
        (false, false) => return Err(DecodeError::NoCollateralLeg),
        (true, false) => {
            let price =
                format_price(maker_amount, taker_amount).ok_or(DecodeError::ZeroDenominator)?;
            (Side::Buy, taker_asset_id, price)
        }
        (false, true) => {
            let price =
                format_price(taker_amount, maker_amount).ok_or(DecodeError::ZeroDenominator)?;
            (Side::Sell, maker_asset_id, price)
        }
    };

    Ok(Trade {
        tx_hash: log.tx_hash.to_string(),
        log_index: log.log_index,
        block_number: log.block_number,
        exchange: log.address.to_string(),
        order_hash: order_hash.to_string(),
        maker: maker.to_string(),
        taker: taker.to_string(),
        maker_asset_id: maker_asset_id.to_string(),
        taker_asset_id: taker_asset_id.to_string(),
        maker_amount: maker_amount.to_string(),
        taker_amount: taker_amount.to_string(),
        fee: fee.to_string(),
        price,
        token_id: token_id.to_string(),
        side,
    })
}

fn word(data: &[u8], index: usize) -> U256 {
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&data[index * 32..index * 32 + 32]);
    U256::from_be_bytes(buf)
}

/// Render collateral/token as a six-place decimal string.
///
/// Collateral has six decimals and the price keeps six places, so the
/// scale factors cancel and the scaled price is round(collateral / token)
/// over the raw integer amounts. Rounding is half to even, matching the
/// usual decimal semantics. Returns None on a zero token quantity.
fn format_price(collateral_amount: U256, token_amount: U256) -> Option<String> {
    if token_amount.is_zero() {
        return None;
    }
    let (quotient, remainder) = collateral_amount.div_rem(token_amount);
    let complement = token_amount - remainder;
    let scaled = match remainder.cmp(&complement) {
        Ordering::Less => quotient,
        Ordering::Greater => quotient.checked_add(U256::from(1u64))?,
        Ordering::Equal => {
            if quotient.bit(0) {
                quotient.checked_add(U256::from(1u64))?
            } else {
                quotient
            }
        }
    };

    let digits = scaled.to_string();
    if digits.len() <= 6 {
        Some(format!("0.{digits:0>6}"))
    } else {
        let (int_part, frac_part) = digits.split_at(digits.len() - 6);
        Some(format!("{int_part}.{frac_part}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CTF_EXCHANGE;

    fn fill_log(
        maker_asset_id: U256,
        taker_asset_id: U256,
        maker_amount: U256,
        taker_amount: U256,
    ) -> RawLog {
        let mut data = Vec::with_capacity(DATA_WORDS * 32);
        for value in [
            maker_asset_id,
            taker_asset_id,
            maker_amount,
            taker_amount,
            U256::from(100u64),
        ] {
            data.extend_from_slice(&value.to_be_bytes::<32>());
        }
        RawLog {
            address: CTF_EXCHANGE,
            topics: vec![
                ORDER_FILLED_TOPIC,
                B256::with_last_byte(0x11),
                B256::with_last_byte(0x22),
                B256::with_last_byte(0x33),
            ],
            data,
            tx_hash: B256::with_last_byte(0xab),
            log_index: 7,
            block_number: 1234,
        }
    }

    #[test]
    fn decodes_a_buy_fill() {
        let token = U256::from(999_000u64);
        let log = fill_log(
            U256::ZERO,
            token,
            U256::from(1_500_000u64),
            U256::from(2u64),
        );
        let trade = decode_order_filled(&log).unwrap();
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.token_id, token.to_string());
        assert_eq!(trade.price, "0.750000");
        assert_eq!(trade.maker_amount, "1500000");
        assert_eq!(trade.taker_amount, "2");
        assert_eq!(trade.fee, "100");
        assert_eq!(trade.log_index, 7);
        assert_eq!(trade.block_number, 1234);
        assert!(trade.tx_hash.starts_with("0x"));
        assert!(trade.maker.starts_with("0x"));
    }

    #[test]
    fn decodes_a_sell_fill() {
        let token = U256::from(424_242u64);
        let log = fill_log(
            token,
            U256::ZERO,
            U256::from(2u64),
            U256::from(1_300_000u64),
        );
        let trade = decode_order_filled(&log).unwrap();
        assert_eq!(trade.side, Side::Sell);
        assert_eq!(trade.token_id, token.to_string());
        assert_eq!(trade.price, "0.650000");
    }

    #[test]
    fn rejects_missing_topics() {
        let mut log = fill_log(
            U256::ZERO,
            U256::from(1u64),
            U256::from(1u64),
            U256::from(1u64),
        );
        log.topics.truncate(3);
        assert_eq!(
            decode_order_filled(&log),
            Err(DecodeError::MissingTopics { have: 3 })
        );
    }

    #[test]
    fn rejects_foreign_signature() {
        let mut log = fill_log(
            U256::ZERO,
            U256::from(1u64),
            U256::from(1u64),
            U256::from(1u64),
        );
        log.topics[0] = B256::with_last_byte(0x01);
        assert!(matches!(
            decode_order_filled(&log),
            Err(DecodeError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut log = fill_log(
            U256::ZERO,
            U256::from(1u64),
            U256::from(1u64),
            U256::from(1u64),
        );
        log.data.truncate(159);
        assert_eq!(
            decode_order_filled(&log),
            Err(DecodeError::TruncatedData { len: 159 })
        );
    }

    #[test]
    fn rejects_two_token_legs() {
        let log = fill_log(
            U256::from(5u64),
            U256::from(6u64),
            U256::from(1u64),
            U256::from(1u64),
        );
        assert_eq!(decode_order_filled(&log), Err(DecodeError::NoCollateralLeg));
    }

    #[test]
    fn rejects_two_collateral_legs() {
        let log = fill_log(U256::ZERO, U256::ZERO, U256::from(1u64), U256::from(1u64));
        assert_eq!(
            decode_order_filled(&log),
            Err(DecodeError::AmbiguousCollateral)
        );
    }

    #[test]
    fn rejects_zero_token_quantity() {
        let log = fill_log(
            U256::ZERO,
            U256::from(1u64),
            U256::from(1_000_000u64),
            U256::ZERO,
        );
        assert_eq!(decode_order_filled(&log), Err(DecodeError::ZeroDenominator));
        let log = fill_log(
            U256::from(1u64),
            U256::ZERO,
            U256::ZERO,
            U256::from(1_000_000u64),
        );
        assert_eq!(decode_order_filled(&log), Err(DecodeError::ZeroDenominator));
    }

    #[test]
    fn price_rounds_half_to_even() {
        let cases = [
            (1_000_000u64, 3u64, "0.333333"),
            (2_000_000, 3, "0.666667"),
            (1, 3, "0.000000"),
            // exact ties round to the even quotient
            (1, 2, "0.000000"),
            (3, 2, "0.000002"),
            (500_000, 1, "0.500000"),
            (2_000_000, 1, "2.000000"),
        ];
        for (collateral, token, expected) in cases {
            assert_eq!(
                format_price(U256::from(collateral), U256::from(token)).as_deref(),
                Some(expected),
                "collateral={collateral} token={token}"
            );
        }
    }

    #[test]
    fn amounts_survive_the_full_u256_range() {
        let log = fill_log(U256::ZERO, U256::from(1u64), U256::MAX, U256::from(1u64));
        let trade = decode_order_filled(&log).unwrap();
        assert_eq!(trade.maker_amount, U256::MAX.to_string());
        // 2^256 - 1 scaled down by the collateral's six decimals
        assert_eq!(
            trade.price,
            "115792089237316195423570985008687907853269984665640564039457584007913129.639935"
        );
    }
}
