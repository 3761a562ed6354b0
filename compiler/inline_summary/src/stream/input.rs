use super::{
    error::StreamError,
    output::{LITERAL_FLOAT, LITERAL_FUNCTION, LITERAL_INT, LITERAL_NONE},
    SymbolEncoder,
};
use crate::{
    call_graph::NodeId,
    predicate::{condition::Literal, Clause, Predicate, MAX_CLAUSES},
};
use bitvec::prelude::*;

pub type Result<T> = std::result::Result<T, StreamError>;

/// A cursor over a summary section. Reads never go past the end of the data.
#[derive(Debug)]
pub struct InputBlock<'a> {
    data: &'a [u8],
    position: usize,
}
impl<'a> InputBlock<'a> {
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    #[must_use]
    pub const fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    fn read_bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.position + N;
        let bytes = self
            .data
            .get(self.position..end)
            .ok_or(StreamError::UnexpectedEnd)?;
        self.position = end;
        let mut result = [0; N];
        result.copy_from_slice(bytes);
        Ok(result)
    }
    pub fn read_u8(&mut self) -> Result<u8> {
        let [byte] = self.read_bytes()?;
        Ok(byte)
    }
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes()?))
    }
    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(u64::from_le_bytes(self.read_bytes()?)))
    }

    pub fn read_uhwi(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift >= u64::BITS {
                return Err(StreamError::Overflow);
            }
            result |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
    }
    pub fn read_usize(&mut self) -> Result<usize> {
        usize::try_from(self.read_uhwi()?).map_err(|_| StreamError::Overflow)
    }
    pub fn read_u32_leb(&mut self) -> Result<u32> {
        u32::try_from(self.read_uhwi()?).map_err(|_| StreamError::Overflow)
    }
    /// A count of at most `max` items.
    pub fn read_count(&mut self, max: usize) -> Result<usize> {
        let count = self.read_usize()?;
        if count > max {
            return Err(StreamError::Overflow);
        }
        Ok(count)
    }

    pub fn read_hwi(&mut self) -> Result<i128> {
        let mut result = 0i128;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            if shift >= i128::BITS {
                return Err(StreamError::Overflow);
            }
            result |= i128::from(byte & 0x7f) << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < i128::BITS && byte & 0x40 != 0 {
                    result |= -1 << shift;
                }
                return Ok(result);
            }
        }
    }
    pub fn read_i32(&mut self) -> Result<i32> {
        i32::try_from(self.read_hwi()?).map_err(|_| StreamError::Overflow)
    }
    pub fn read_i64(&mut self) -> Result<i64> {
        i64::try_from(self.read_hwi()?).map_err(|_| StreamError::Overflow)
    }

    pub fn read_flags(&mut self) -> Result<BitArray<[u8; 1], Lsb0>> {
        Ok(BitArray::new([self.read_u8()?]))
    }

    pub fn read_predicate(&mut self) -> Result<Predicate> {
        let count = self.read_count(MAX_CLAUSES)?;
        if count == 0 {
            return Ok(Predicate::TRUE);
        }
        let clauses = (0..count)
            .map(|_| self.read_u32())
            .collect::<Result<Vec<Clause>>>()?;
        Ok(Predicate::from_clauses(clauses))
    }

    pub fn read_literal(&mut self, encoder: &SymbolEncoder) -> Result<Option<Literal>> {
        let literal = match self.read_u8()? {
            LITERAL_NONE => return Ok(None),
            LITERAL_INT => {
                let value = self.read_hwi()?;
                let bits = self.read_u32_leb()?;
                Literal::Int { value, bits }
            }
            LITERAL_FLOAT => {
                let raw = self.read_f64()?.to_bits();
                let bits = self.read_u32_leb()?;
                Literal::Float { raw, bits }
            }
            LITERAL_FUNCTION => Literal::Function(self.read_node(encoder)?),
            tag => return Err(StreamError::InvalidLiteralTag(tag)),
        };
        Ok(Some(literal))
    }

    pub fn read_node(&mut self, encoder: &SymbolEncoder) -> Result<NodeId> {
        let index = self.read_uhwi()?;
        usize::try_from(index)
            .ok()
            .and_then(|index| encoder.node(index))
            .ok_or(StreamError::UnknownNode(index))
    }
}

#[cfg(test)]
mod test {
    use super::InputBlock;
    use crate::{
        predicate::Predicate,
        stream::{error::StreamError, output::OutputBlock},
    };
    use proptest::prelude::*;

    #[test]
    fn reads_stop_at_the_end() {
        let mut input = InputBlock::new(&[0x80, 0x80]);
        assert_eq!(input.read_uhwi(), Err(StreamError::UnexpectedEnd));
        let mut input = InputBlock::new(&[1, 2, 3]);
        assert_eq!(input.read_u32(), Err(StreamError::UnexpectedEnd));
    }

    #[test]
    fn oversized_values_are_rejected() {
        let mut input = InputBlock::new(&[0xff; 11]);
        assert_eq!(input.read_uhwi(), Err(StreamError::Overflow));
        let mut input = InputBlock::new(&[0x80, 0x80, 0x80, 0x80, 0x10]);
        assert_eq!(input.read_i32(), Err(StreamError::Overflow));
        let mut input = InputBlock::new(&[9]);
        assert_eq!(input.read_predicate(), Err(StreamError::Overflow));
    }

    #[test]
    fn false_reads_back_as_false() {
        let mut input = InputBlock::new(&[1, 1, 0, 0, 0]);
        assert_eq!(input.read_predicate(), Ok(Predicate::FALSE));
    }

    proptest! {
        #[test]
        fn signed_integers_survive(value: i128) {
            let mut output = OutputBlock::default();
            output.write_hwi(value);
            let bytes = output.into_bytes();
            let mut input = InputBlock::new(&bytes);
            prop_assert_eq!(input.read_hwi(), Ok(value));
            prop_assert!(!input.has_more_data());
        }

        #[test]
        fn unsigned_integers_survive(value: u64) {
            let mut output = OutputBlock::default();
            output.write_uhwi(value);
            let bytes = output.into_bytes();
            let mut input = InputBlock::new(&bytes);
            prop_assert_eq!(input.read_uhwi(), Ok(value));
        }
    }
}
