//! `NUMERIC`/`DECIMAL` handling: typmod decoding (Type Mapper, spec.md §4.2)
//! and binary wire reconstruction (Wire Codec, spec.md §4.5).

use bigdecimal::BigDecimal;
use byteorder::{BigEndian, ReadBytesExt};
use num_bigint::BigInt;

use crate::error::{BridgeError, BridgeResult};

/// Decodes a `numeric` typmod into `(width, scale)`.
///
/// `typmod == -1` means "no explicit precision/scale"; callers map that case
/// to `TargetType::F64` directly and never call this function for it.
pub fn decode_typmod(typmod: i32) -> (u16, i16) {
    let raw = (typmod - 4) as i64;
    let width = ((raw >> 16) & 0xFFFF) as u16;
    let scale = (((raw & 0x7FF) ^ 1024) - 1024) as i16;
    (width, scale)
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Decodes the binary `numeric` wire format into a [`BigDecimal`].
///
/// Layout: `(u16 ndigits, i16 weight, u16 sign, u16 dscale)` followed by
/// `ndigits` base-10000 digit groups. NaN/+-Inf are rejected, matching
/// `UnsupportedType` in spec.md §7.
pub fn decode_numeric(mut buf: &[u8], column: &str) -> BridgeResult<BigDecimal> {
    let ndigits = buf
        .read_u16::<BigEndian>()
        .map_err(|e| BridgeError::protocol(format!("truncated numeric header: {e}")))?;
    let weight = buf
        .read_i16::<BigEndian>()
        .map_err(|e| BridgeError::protocol(format!("truncated numeric header: {e}")))?;
    let sign = buf
        .read_u16::<BigEndian>()
        .map_err(|e| BridgeError::protocol(format!("truncated numeric header: {e}")))?;
    let dscale = buf
        .read_u16::<BigEndian>()
        .map_err(|e| BridgeError::protocol(format!("truncated numeric header: {e}")))?;

    match sign {
        NUMERIC_POS | NUMERIC_NEG => {}
        NUMERIC_NAN => {
            return Err(BridgeError::unsupported(column, "numeric NaN is not representable"))
        }
        NUMERIC_PINF => {
            return Err(BridgeError::unsupported(
                column,
                "numeric +Infinity is not representable",
            ))
        }
        NUMERIC_NINF => {
            return Err(BridgeError::unsupported(
                column,
                "numeric -Infinity is not representable",
            ))
        }
        other => {
            return Err(BridgeError::protocol(format!("invalid numeric sign word {other:#06x}")))
        }
    }

    let mut digits = Vec::with_capacity(ndigits as usize);
    for _ in 0..ndigits {
        let digit = buf
            .read_u16::<BigEndian>()
            .map_err(|e| BridgeError::protocol(format!("truncated numeric digits: {e}")))?;
        digits.push(digit);
    }

    // Each base-10000 digit group is 4 decimal digits. Concatenating all
    // groups into one big integer and then shifting the decimal point by
    // `(ndigits - weight - 1) * 4` places reproduces the value exactly,
    // regardless of how the groups split across the integral/fractional
    // boundary.
    let mut value = BigInt::from(0u32);
    for digit in &digits {
        value = value * BigInt::from(10_000u32) + BigInt::from(*digit);
    }
    if sign == NUMERIC_NEG {
        value = -value;
    }

    let implied_scale = (ndigits as i64 - weight as i64 - 1) * 4;
    let unscaled = BigDecimal::new(value, implied_scale);
    Ok(unscaled.with_scale(dscale as i64))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use byteorder::WriteBytesExt;

    use super::*;

    fn encode_pg_numeric(value: &BigDecimal, dscale: u16) -> Vec<u8> {
        // Minimal encoder used only by tests, mirroring Postgres's own
        // numeric_send: split the (sign, digits) decimal representation into
        // base-10000 groups.
        let (bigint, scale) = value.as_bigint_and_exponent();
        let negative = bigint.sign() == num_bigint::Sign::Minus;
        let digits10 = bigint.to_string().trim_start_matches('-').to_string();
        // Pad so the decimal point lands on a 4-digit boundary measured from
        // the right.
        let pad_right = ((4 - (scale % 4)) % 4) as usize;
        let mut padded = digits10.clone();
        for _ in 0..pad_right {
            padded.push('0');
        }
        let pad_left = (4 - (padded.len() % 4)) % 4;
        let mut full = "0".repeat(pad_left);
        full.push_str(&padded);

        let groups: Vec<u16> = full
            .as_bytes()
            .chunks(4)
            .map(|c| std::str::from_utf8(c).unwrap().parse().unwrap())
            .collect();
        let ndigits = groups.len() as i32;
        let scale_groups = ((scale as i64 + pad_right as i64) / 4) as i32;
        let weight = ndigits - scale_groups - 1;

        let mut out = Vec::new();
        out.write_u16::<BigEndian>(groups.len() as u16).unwrap();
        out.write_i16::<BigEndian>(weight as i16).unwrap();
        out.write_u16::<BigEndian>(if negative { NUMERIC_NEG } else { NUMERIC_POS })
            .unwrap();
        out.write_u16::<BigEndian>(dscale).unwrap();
        for g in groups {
            out.write_u16::<BigEndian>(g).unwrap();
        }
        out
    }

    #[test]
    fn typmod_roundtrip() {
        // numeric(10,2): width=10, scale=2 -> typmod = ((10<<16)|2) + 4
        let typmod = ((10i32) << 16 | 2) + 4;
        assert_eq!(decode_typmod(typmod), (10, 2));
    }

    #[test]
    fn decodes_simple_values() {
        for (s, scale) in [("0", 2u16), ("1.23", 2), ("-999.99", 2)] {
            let d = BigDecimal::from_str(s).unwrap();
            let encoded = encode_pg_numeric(&d, scale);
            let decoded = decode_numeric(&encoded, "d").unwrap();
            assert_eq!(decoded, d.with_scale(scale as i64), "mismatch decoding {s}");
        }
    }

    #[test]
    fn rejects_nan_and_infinity() {
        let mut nan = Vec::new();
        nan.write_u16::<BigEndian>(0).unwrap();
        nan.write_i16::<BigEndian>(0).unwrap();
        nan.write_u16::<BigEndian>(NUMERIC_NAN).unwrap();
        nan.write_u16::<BigEndian>(0).unwrap();
        assert!(decode_numeric(&nan, "d").is_err());
    }
}
