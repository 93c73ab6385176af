// Host integer types, keys and inclusive key ranges

/// A fixed-width integer type of the target language.
///
/// Used both for the alphabet (the type of a raw input key) and, on the code
/// generator side, for the element type of every emitted data array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IntType {
    pub signed: bool,
    pub bits: u8,
}

impl IntType {
    pub const I8: IntType = IntType { signed: true, bits: 8 };
    pub const U8: IntType = IntType { signed: false, bits: 8 };
    pub const I16: IntType = IntType { signed: true, bits: 16 };
    pub const U16: IntType = IntType { signed: false, bits: 16 };
    pub const I32: IntType = IntType { signed: true, bits: 32 };
    pub const U32: IntType = IntType { signed: false, bits: 32 };
    pub const I64: IntType = IntType { signed: true, bits: 64 };
    pub const U64: IntType = IntType { signed: false, bits: 64 };

    /// The standard widths from narrowest to widest, signed before unsigned
    /// within a width. Type selection walks this order and takes the first fit.
    pub const STANDARD: [IntType; 8] = [
        Self::I8,
        Self::U8,
        Self::I16,
        Self::U16,
        Self::I32,
        Self::U32,
        Self::I64,
        Self::U64,
    ];

    /// Smallest representable value.
    pub const fn min_value(self) -> i128 {
        if self.signed {
            -(1i128 << (self.bits - 1))
        } else {
            0
        }
    }

    /// Largest representable value.
    pub const fn max_value(self) -> i128 {
        if self.signed {
            (1i128 << (self.bits - 1)) - 1
        } else {
            (1i128 << self.bits) - 1
        }
    }

    /// Number of distinct values, i.e. the alphabet size when this is the key type.
    pub const fn size(self) -> i128 {
        1i128 << self.bits
    }

    /// Whether every value in `low..=high` is representable.
    pub const fn holds(self, low: i128, high: i128) -> bool {
        self.min_value() <= low && high <= self.max_value()
    }
}

const _: () = assert!(IntType::U64.max_value() == u64::MAX as i128);
const _: () = assert!(IntType::I8.min_value() == -128);

/// Inclusive range of keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeyRange {
    pub low: i64,
    pub high: i64,
}

impl KeyRange {
    pub const fn new(low: i64, high: i64) -> Self {
        Self { low, high }
    }

    pub const fn single(key: i64) -> Self {
        Self { low: key, high: key }
    }

    pub const fn contains(&self, key: i64) -> bool {
        self.low <= key && key <= self.high
    }

    /// Number of keys in the range.
    pub const fn span(&self) -> i128 {
        self.high as i128 - self.low as i128 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_bounds() {
        assert_eq!(IntType::U8.max_value(), 255);
        assert_eq!(IntType::I16.min_value(), -32768);
        assert_eq!(IntType::U32.max_value(), u32::MAX as i128);
        assert_eq!(IntType::I64.min_value(), i64::MIN as i128);
    }

    #[test]
    fn holds_checks_both_ends() {
        assert!(IntType::U8.holds(0, 255));
        assert!(!IntType::U8.holds(-1, 10));
        assert!(!IntType::I8.holds(0, 128));
        assert!(IntType::I8.holds(-128, 127));
    }

    #[test]
    fn standard_order_is_narrowest_first() {
        let widths: Vec<u8> = IntType::STANDARD.iter().map(|t| t.bits).collect();
        assert_eq!(widths, [8, 8, 16, 16, 32, 32, 64, 64]);
        assert!(IntType::STANDARD[0].signed);
    }

    #[test]
    fn range_span_and_contains() {
        let r = KeyRange::new(b'a' as i64, b'z' as i64);
        assert_eq!(r.span(), 26);
        assert!(r.contains(b'm' as i64));
        assert!(!r.contains(b'A' as i64));
        assert_eq!(KeyRange::single(7).span(), 1);
        assert_eq!(KeyRange::new(i64::MIN, i64::MAX).span(), 1i128 << 64);
    }
}
