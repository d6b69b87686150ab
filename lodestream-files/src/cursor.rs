use byteorder::{ByteOrder, LittleEndian};

use crate::ParserError;

/// Sequential reader over a flat byte buffer. All multi-byte reads are
/// little-endian; reads past the end fail with `UnexpectedEndOfData` instead
/// of returning garbage.
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Absolute positioning, used by the effect codec to jump to the pass
    /// table denoted in the header.
    pub fn seek(&mut self, pos: usize) -> Result<(), ParserError> {
        if pos > self.data.len() {
            return Err(ParserError::UnexpectedEndOfData { offset: pos });
        }
        self.pos = pos;
        Ok(())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8], ParserError> {
        if self.pos + count > self.data.len() {
            return Err(ParserError::UnexpectedEndOfData { offset: self.pos });
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>, ParserError> {
        self.take(count).map(|slice| slice.to_vec())
    }

    pub fn read_u8(&mut self) -> Result<u8, ParserError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ParserError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, ParserError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_i8(&mut self) -> Result<i8, ParserError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, ParserError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, ParserError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_f32(&mut self) -> Result<f32, ParserError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    /// IEEE-754 binary16, widened to f32. Zero exponent with zero mantissa
    /// is ±0.0, zero exponent with a mantissa is subnormal, exponent 31 is
    /// ±infinity (or NaN with a mantissa).
    pub fn read_f16(&mut self) -> Result<f32, ParserError> {
        let bits = self.read_u16()?;
        let sign = if bits & 0x8000 != 0 { -1.0f32 } else { 1.0f32 };
        let exponent = ((bits >> 10) & 0x1f) as i32;
        let mantissa = (bits & 0x3ff) as f32;

        Ok(match exponent {
            0 => {
                if mantissa == 0.0 {
                    sign * 0.0
                } else {
                    sign * (mantissa / 1024.0) * 2.0f32.powi(-14)
                }
            }
            31 => {
                if mantissa == 0.0 {
                    sign * f32::INFINITY
                } else {
                    f32::NAN
                }
            }
            _ => sign * (1.0 + mantissa / 1024.0) * 2.0f32.powi(exponent - 15),
        })
    }

    /// 1-byte length prefix followed by that many bytes.
    pub fn read_string(&mut self) -> Result<String, ParserError> {
        let length = self.read_u8()? as usize;
        Ok(String::from_utf8(self.take(length)?.to_vec())?)
    }
}
