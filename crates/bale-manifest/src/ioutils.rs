//! Internal wire-format helpers
//!
//! All multi-byte primitives are little-endian. Strings are UTF-8 with a
//! `u16` byte-length prefix; arrays carry an `i32` element-count prefix.

use std::io::{Error, ErrorKind, Read, Write};

/// Generic trait for reading wire primitives from a buffer.
pub trait ReadWire {
    /// Error type which can be returned on read failures.
    type Error;

    /// Read a `u8` from the buffer.
    fn read_u8(&mut self) -> Result<u8, Self::Error>;

    /// Read a `bool` encoded as a single byte.
    fn read_bool(&mut self) -> Result<bool, Self::Error>;

    /// Read a little-endian `u16` from the buffer.
    fn read_u16le(&mut self) -> Result<u16, Self::Error>;

    /// Read a little-endian `i32` from the buffer.
    fn read_i32le(&mut self) -> Result<i32, Self::Error>;

    /// Read a little-endian `u32` from the buffer.
    fn read_u32le(&mut self) -> Result<u32, Self::Error>;

    /// Read a little-endian `u64` from the buffer.
    fn read_u64le(&mut self) -> Result<u64, Self::Error>;

    /// Read a length-prefixed UTF-8 string.
    fn read_utf8(&mut self) -> Result<String, Self::Error>;

    /// Read a count-prefixed array of UTF-8 strings.
    fn read_utf8_array(&mut self) -> Result<Vec<String>, Self::Error>;

    /// Read a count-prefixed array of little-endian `i32` values.
    fn read_i32_array(&mut self) -> Result<Vec<i32>, Self::Error>;
}

impl<T: Read> ReadWire for T {
    type Error = Error;

    fn read_u8(&mut self) -> Result<u8, Self::Error> {
        let mut b = [0; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_bool(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read_u8()? != 0)
    }

    fn read_u16le(&mut self) -> Result<u16, Self::Error> {
        let mut b = [0; size_of::<u16>()];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_i32le(&mut self) -> Result<i32, Self::Error> {
        let mut b = [0; size_of::<i32>()];
        self.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    fn read_u32le(&mut self) -> Result<u32, Self::Error> {
        let mut b = [0; size_of::<u32>()];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_u64le(&mut self) -> Result<u64, Self::Error> {
        let mut b = [0; size_of::<u64>()];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn read_utf8(&mut self) -> Result<String, Self::Error> {
        let len = self.read_u16le()? as usize;
        let mut bytes = vec![0; len];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes)
            .map_err(|e| Error::new(ErrorKind::InvalidData, format!("invalid UTF-8 string: {e}")))
    }

    fn read_utf8_array(&mut self) -> Result<Vec<String>, Self::Error> {
        let count = read_array_count(self)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_utf8()?);
        }
        Ok(values)
    }

    fn read_i32_array(&mut self) -> Result<Vec<i32>, Self::Error> {
        let count = read_array_count(self)?;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.read_i32le()?);
        }
        Ok(values)
    }
}

/// Generic trait for writing wire primitives to a buffer.
pub trait WriteWire {
    /// Error type which can be returned on write failures.
    type Error;

    /// Write a `u8` to the buffer.
    fn write_u8(&mut self, value: u8) -> Result<(), Self::Error>;

    /// Write a `bool` as a single byte.
    fn write_bool(&mut self, value: bool) -> Result<(), Self::Error>;

    /// Write a little-endian `u16` to the buffer.
    fn write_u16le(&mut self, value: u16) -> Result<(), Self::Error>;

    /// Write a little-endian `i32` to the buffer.
    fn write_i32le(&mut self, value: i32) -> Result<(), Self::Error>;

    /// Write a little-endian `u32` to the buffer.
    fn write_u32le(&mut self, value: u32) -> Result<(), Self::Error>;

    /// Write a little-endian `u64` to the buffer.
    fn write_u64le(&mut self, value: u64) -> Result<(), Self::Error>;

    /// Write a length-prefixed UTF-8 string.
    fn write_utf8(&mut self, value: &str) -> Result<(), Self::Error>;

    /// Write a count-prefixed array of UTF-8 strings.
    fn write_utf8_array(&mut self, values: &[String]) -> Result<(), Self::Error>;

    /// Write a count-prefixed array of little-endian `i32` values.
    fn write_i32_array(&mut self, values: &[i32]) -> Result<(), Self::Error>;
}

impl<T: Write> WriteWire for T {
    type Error = Error;

    fn write_u8(&mut self, value: u8) -> Result<(), Self::Error> {
        self.write_all(&[value])
    }

    fn write_bool(&mut self, value: bool) -> Result<(), Self::Error> {
        self.write_u8(u8::from(value))
    }

    fn write_u16le(&mut self, value: u16) -> Result<(), Self::Error> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_i32le(&mut self, value: i32) -> Result<(), Self::Error> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u32le(&mut self, value: u32) -> Result<(), Self::Error> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_u64le(&mut self, value: u64) -> Result<(), Self::Error> {
        self.write_all(&value.to_le_bytes())
    }

    fn write_utf8(&mut self, value: &str) -> Result<(), Self::Error> {
        let len = u16::try_from(value.len()).map_err(|_| {
            Error::new(
                ErrorKind::InvalidInput,
                format!("string too long for wire format: {} bytes", value.len()),
            )
        })?;
        self.write_u16le(len)?;
        self.write_all(value.as_bytes())
    }

    fn write_utf8_array(&mut self, values: &[String]) -> Result<(), Self::Error> {
        self.write_i32le(array_count(values.len())?)?;
        for value in values {
            self.write_utf8(value)?;
        }
        Ok(())
    }

    fn write_i32_array(&mut self, values: &[i32]) -> Result<(), Self::Error> {
        self.write_i32le(array_count(values.len())?)?;
        for value in values {
            self.write_i32le(*value)?;
        }
        Ok(())
    }
}

fn read_array_count<R: Read + ?Sized>(reader: &mut R) -> Result<usize, Error> {
    let count = reader.read_i32le()?;
    usize::try_from(count).map_err(|_| {
        Error::new(
            ErrorKind::InvalidData,
            format!("negative array count: {count}"),
        )
    })
}

fn array_count(len: usize) -> Result<i32, Error> {
    i32::try_from(len).map_err(|_| {
        Error::new(
            ErrorKind::InvalidInput,
            format!("array too long for wire format: {len} elements"),
        )
    })
}
