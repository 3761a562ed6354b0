use super::SymbolEncoder;
use crate::predicate::{condition::Literal, Predicate, FALSE_CONDITION};
use bitvec::prelude::*;

pub(super) const LITERAL_NONE: u8 = 0;
pub(super) const LITERAL_INT: u8 = 1;
pub(super) const LITERAL_FLOAT: u8 = 2;
pub(super) const LITERAL_FUNCTION: u8 = 3;

/// A growing byte buffer with LEB128-encoded integers.
#[derive(Debug, Default)]
pub struct OutputBlock {
    bytes: Vec<u8>,
}
impl OutputBlock {
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }
    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_le_bytes());
    }
    pub fn write_f64(&mut self, value: f64) {
        self.bytes.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    /// Unsigned LEB128.
    pub fn write_uhwi(&mut self, value: impl Into<u64>) {
        let mut value = value.into();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            if value == 0 {
                self.bytes.push(byte);
                return;
            }
            self.bytes.push(byte | 0x80);
        }
    }
    pub fn write_usize(&mut self, value: usize) {
        self.write_uhwi(value as u64);
    }
    /// Signed LEB128.
    pub fn write_hwi(&mut self, value: impl Into<i128>) {
        let mut value = value.into();
        loop {
            let byte = (value & 0x7f) as u8;
            value >>= 7;
            let sign_bit = byte & 0x40 != 0;
            if (value == 0 && !sign_bit) || (value == -1 && sign_bit) {
                self.bytes.push(byte);
                return;
            }
            self.bytes.push(byte | 0x80);
        }
    }

    /// Packs up to eight flags into a single byte, the first one in the
    /// lowest bit.
    pub fn write_flags(&mut self, flags: &[bool]) {
        assert!(flags.len() <= 8, "Too many flags to pack into a byte.");
        let mut bits = BitArray::<[u8; 1], Lsb0>::new([0]);
        for (index, flag) in flags.iter().enumerate() {
            bits.set(index, *flag);
        }
        self.write_u8(bits.into_inner()[0]);
    }

    /// `true` is written without clauses, `false` as its single clause
    /// testing the always-false condition.
    pub fn write_predicate(&mut self, predicate: &Predicate) {
        if predicate.is_true() {
            self.write_usize(0);
        } else if predicate.is_false() {
            self.write_usize(1);
            self.write_u32(1 << FALSE_CONDITION);
        } else {
            let clauses = predicate.clauses();
            self.write_usize(clauses.len());
            for clause in clauses {
                self.write_u32(*clause);
            }
        }
    }

    pub fn write_literal(&mut self, literal: Option<&Literal>, encoder: &mut SymbolEncoder) {
        match literal {
            None => self.write_u8(LITERAL_NONE),
            Some(Literal::Int { value, bits }) => {
                self.write_u8(LITERAL_INT);
                self.write_hwi(*value);
                self.write_uhwi(*bits);
            }
            Some(Literal::Float { raw, bits }) => {
                self.write_u8(LITERAL_FLOAT);
                self.write_f64(f64::from_bits(*raw));
                self.write_uhwi(*bits);
            }
            Some(Literal::Function(node)) => {
                self.write_u8(LITERAL_FUNCTION);
                self.write_usize(encoder.encode(*node));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::OutputBlock;
    use crate::predicate::Predicate;

    fn bytes(write: impl FnOnce(&mut OutputBlock)) -> Vec<u8> {
        let mut block = OutputBlock::default();
        write(&mut block);
        block.into_bytes()
    }

    #[test]
    fn integers_use_leb128() {
        assert_eq!(bytes(|it| it.write_uhwi(0u64)), [0x00]);
        assert_eq!(bytes(|it| it.write_uhwi(127u64)), [0x7f]);
        assert_eq!(bytes(|it| it.write_uhwi(624_485u64)), [0xe5, 0x8e, 0x26]);
        assert_eq!(bytes(|it| it.write_hwi(-1)), [0x7f]);
        assert_eq!(bytes(|it| it.write_hwi(63)), [0x3f]);
        assert_eq!(bytes(|it| it.write_hwi(64)), [0xc0, 0x00]);
        assert_eq!(bytes(|it| it.write_hwi(-123_456)), [0xc0, 0xbb, 0x78]);
    }

    #[test]
    fn flags_start_at_the_lowest_bit() {
        assert_eq!(bytes(|it| it.write_flags(&[true, false, true])), [0b101]);
    }

    #[test]
    fn predicate_sentinels() {
        assert_eq!(bytes(|it| it.write_predicate(&Predicate::TRUE)), [0]);
        assert_eq!(
            bytes(|it| it.write_predicate(&Predicate::FALSE)),
            [1, 1, 0, 0, 0],
        );
        assert_eq!(
            bytes(|it| it.write_predicate(&Predicate::not_inlined())),
            [1, 2, 0, 0, 0],
        );
    }
}
