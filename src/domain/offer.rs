//! Maker offers as broadcast via `!reloffer` / `!absoffer`.

use crate::domain::bond::BondProof;
use crate::foundation::{CoinjoinError, Nick, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scale for relative fees: ten decimal places, enough to express any fee
/// string makers broadcast without floating point in money paths.
const REL_FEE_SCALE: u64 = 10_000_000_000;

/// A relative coinjoin fee in `[0, 1)`, stored as a scaled integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelFee(u64);

impl RelFee {
    pub fn from_scaled(scaled: u64) -> Result<Self> {
        if scaled >= REL_FEE_SCALE {
            return Err(CoinjoinError::ParseError(format!("relative fee must be < 1, got {scaled}/{REL_FEE_SCALE}")));
        }
        Ok(Self(scaled))
    }

    pub fn apply(&self, amount: u64) -> u64 {
        ((u128::from(amount) * u128::from(self.0)) / u128::from(REL_FEE_SCALE)) as u64
    }
}

impl FromStr for RelFee {
    type Err = CoinjoinError;

    fn from_str(s: &str) -> Result<Self> {
        let (int_part, frac_part) = s.split_once('.').unwrap_or((s, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(CoinjoinError::ParseError("empty relative fee".into()));
        }
        let int_val: u64 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| CoinjoinError::ParseError(format!("bad relative fee: {s}")))?
        };
        if int_val > 0 {
            return Err(CoinjoinError::ParseError(format!("relative fee must be < 1: {s}")));
        }
        let mut scaled: u64 = 0;
        let digits = 10usize;
        let mut frac = frac_part.to_string();
        if frac.len() > digits {
            frac.truncate(digits);
        }
        if !frac.is_empty() {
            if !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(CoinjoinError::ParseError(format!("bad relative fee: {s}")));
            }
            let pad = digits - frac.len();
            scaled = frac.parse::<u64>().map_err(|_| CoinjoinError::ParseError(format!("bad relative fee: {s}")))?;
            scaled *= 10u64.pow(pad as u32);
        }
        Self::from_scaled(scaled)
    }
}

impl fmt::Display for RelFee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frac = format!("{:010}", self.0);
        let trimmed = frac.trim_end_matches('0');
        if trimmed.is_empty() {
            write!(f, "0")
        } else {
            write!(f, "0.{trimmed}")
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferKind {
    Relative,
    Absolute,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CjFee {
    Relative(RelFee),
    Absolute(u64),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Offer {
    pub maker: Nick,
    pub order_id: u64,
    pub kind: OfferKind,
    pub min_size: u64,
    pub max_size: u64,
    /// Satoshi the maker contributes toward the mining fee.
    pub txfee_contribution: u64,
    pub cjfee: CjFee,
    pub bond: Option<BondProof>,
    /// Local receipt time, for stale purging and newest-wins replacement.
    pub received_at: u64,
}

impl Offer {
    /// The fee owed to the maker for a given coinjoin amount.
    pub fn real_cjfee(&self, amount: u64) -> u64 {
        match self.cjfee {
            CjFee::Relative(rel) => rel.apply(amount),
            CjFee::Absolute(sats) => sats,
        }
    }

    /// Net cost to the taker: maker fee minus the maker's txfee
    /// contribution. Can be negative for promotional offers.
    pub fn effective_fee(&self, amount: u64) -> i128 {
        i128::from(self.real_cjfee(amount)) - i128::from(self.txfee_contribution)
    }

    pub fn brackets(&self, amount: u64) -> bool {
        self.min_size <= amount && amount <= self.max_size
    }

    /// Offer announcement arguments: `<oid> <minsize> <maxsize> <txfee> <cjfee>`.
    /// The kind travels in the command name, not the arguments.
    pub fn to_wire_args(&self) -> String {
        let fee = match self.cjfee {
            CjFee::Relative(rel) => rel.to_string(),
            CjFee::Absolute(sats) => sats.to_string(),
        };
        format!("{} {} {} {} {}", self.order_id, self.min_size, self.max_size, self.txfee_contribution, fee)
    }

    pub fn parse_wire_args(maker: Nick, kind: OfferKind, args: &str, received_at: u64) -> Result<Self> {
        let parts: Vec<&str> = args.split(' ').collect();
        if parts.len() != 5 {
            return Err(CoinjoinError::MalformedCommand(format!("offer has {} fields, expected 5", parts.len())));
        }
        let parse_u64 = |field: &str, value: &str| -> Result<u64> {
            value.parse().map_err(|_| CoinjoinError::MalformedCommand(format!("offer {field}: {value}")))
        };
        let order_id = parse_u64("oid", parts[0])?;
        let min_size = parse_u64("minsize", parts[1])?;
        let max_size = parse_u64("maxsize", parts[2])?;
        let txfee_contribution = parse_u64("txfee", parts[3])?;
        if min_size > max_size {
            return Err(CoinjoinError::MalformedCommand(format!("offer minsize {min_size} > maxsize {max_size}")));
        }
        let cjfee = match kind {
            OfferKind::Relative => CjFee::Relative(parts[4].parse()?),
            OfferKind::Absolute => CjFee::Absolute(parse_u64("cjfee", parts[4])?),
        };
        Ok(Self { maker, order_id, kind, min_size, max_size, txfee_contribution, cjfee, bond: None, received_at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel_offer(fee: &str) -> Offer {
        Offer::parse_wire_args(Nick::new("J5maker1OOOOOOOO"), OfferKind::Relative, &format!("0 100000 1000000000 200 {fee}"), 0)
            .expect("offer")
    }

    #[test]
    fn relative_fee_parse_and_apply() {
        let fee: RelFee = "0.0002".parse().unwrap();
        assert_eq!(fee.apply(1_000_000), 200);
        assert_eq!(fee.to_string(), "0.0002");

        let fee: RelFee = "0".parse().unwrap();
        assert_eq!(fee.apply(1_000_000), 0);

        assert!("1.0".parse::<RelFee>().is_err());
        assert!("0.00x2".parse::<RelFee>().is_err());
        assert!("".parse::<RelFee>().is_err());
    }

    #[test]
    fn wire_roundtrip() {
        let offer = rel_offer("0.00025");
        let again = Offer::parse_wire_args(offer.maker.clone(), OfferKind::Relative, &offer.to_wire_args(), 0).unwrap();
        assert_eq!(offer, again);
    }

    #[test]
    fn absolute_offer_fee() {
        let offer = Offer::parse_wire_args(Nick::new("J5maker2OOOOOOOO"), OfferKind::Absolute, "3 1000 5000000 0 750", 0)
            .expect("offer");
        assert_eq!(offer.real_cjfee(1_000_000), 750);
        assert_eq!(offer.effective_fee(1_000_000), 750);
    }

    #[test]
    fn effective_fee_subtracts_contribution() {
        let offer = rel_offer("0.0002");
        // 1M * 0.0002 = 200, minus 200 contribution = 0
        assert_eq!(offer.effective_fee(1_000_000), 0);
        assert_eq!(offer.effective_fee(10_000_000), 2000 - 200);
    }

    #[test]
    fn bracket_check() {
        let offer = rel_offer("0.0002");
        assert!(offer.brackets(100_000));
        assert!(offer.brackets(1_000_000_000));
        assert!(!offer.brackets(99_999));
        assert!(!offer.brackets(1_000_000_001));
    }

    #[test]
    fn malformed_offers_rejected() {
        let maker = Nick::new("J5maker3OOOOOOOO");
        assert!(Offer::parse_wire_args(maker.clone(), OfferKind::Relative, "1 2 3 4", 0).is_err());
        assert!(Offer::parse_wire_args(maker.clone(), OfferKind::Relative, "x 2 3 4 0.1", 0).is_err());
        // minsize above maxsize
        assert!(Offer::parse_wire_args(maker, OfferKind::Absolute, "1 500 100 0 10", 0).is_err());
    }
}
