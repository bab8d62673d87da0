//! Cursor over Kafka protocol primitives.
//!
//! All integers are big-endian. Strings carry an `int16` length prefix and
//! byte arrays an `int32` prefix; `-1` marks a null value.

use bytes::Buf;

use crate::error::{DecodeError, Result};

pub(crate) struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(DecodeError::Truncated { needed, remaining });
        }
        Ok(())
    }

    pub(crate) fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2)?;
        Ok(self.buf.get_i16())
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub(crate) fn read_string(&mut self) -> Result<String> {
        match self.read_nullable_string()? {
            Some(s) => Ok(s),
            None => Err(DecodeError::InvalidLength {
                field: "string",
                length: -1,
            }),
        }
    }

    pub(crate) fn read_nullable_string(&mut self) -> Result<Option<String>> {
        let length = self.read_i16()?;
        match self.take(i32::from(length), "string")? {
            Some(raw) => String::from_utf8(raw.to_vec())
                .map(Some)
                .map_err(|_| DecodeError::InvalidUtf8),
            None => Ok(None),
        }
    }

    /// Advances past a nullable string without allocating.
    pub(crate) fn skip_string(&mut self) -> Result<()> {
        let length = self.read_i16()?;
        self.take(i32::from(length), "string").map(|_| ())
    }

    pub(crate) fn read_bytes(&mut self) -> Result<Option<Vec<u8>>> {
        let length = self.read_i32()?;
        Ok(self.take(length, "bytes")?.map(<[u8]>::to_vec))
    }

    /// Element count of an array; a null array counts as empty.
    pub(crate) fn read_array_len(&mut self) -> Result<usize> {
        let length = self.read_i32()?;
        match length {
            -1 => Ok(0),
            n if n < 0 => Err(DecodeError::InvalidLength {
                field: "array",
                length: n,
            }),
            n => Ok(n as usize),
        }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn take(&mut self, length: i32, field: &'static str) -> Result<Option<&'a [u8]>> {
        if length == -1 {
            return Ok(None);
        }
        if length < 0 {
            return Err(DecodeError::InvalidLength { field, length });
        }
        let length = length as usize;
        self.ensure(length)?;
        let buf: &'a [u8] = self.buf;
        let (head, tail) = buf.split_at(length);
        self.buf = tail;
        Ok(Some(head))
    }
}
