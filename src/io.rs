//! Cursor extensions used by the wire codec.
//!
//! All parsing works over a single `Cursor` spanning the whole message so
//! that compression pointers can be resolved against absolute offsets.

use crate::errors::Error;
use crate::name;
use crate::types::{Class, Type};
use byteorder::{ReadBytesExt, BE};
use num_traits::FromPrimitive;
use std::io::{Cursor, Seek, SeekFrom};

/// Most indirections a single name may take through compression pointers.
const MAX_INDIRECTIONS: usize = 50;

pub(crate) fn clamp<T: PartialOrd>(v: T, min: T, max: T) -> T {
    assert!(min < max);

    if v < min {
        min
    } else if v > max {
        max
    } else {
        v
    }
}

pub(crate) trait SeekExt {
    /// Returns the number of bytes remaining to be consumed. Used as a way
    /// to check for malformed input.
    fn remaining(&mut self) -> usize;
}

impl<'a> SeekExt for Cursor<&'a [u8]> {
    fn remaining(&mut self) -> usize {
        let pos = self.position() as usize;
        self.get_ref().len().saturating_sub(pos)
    }
}

/// Extensions to [`Cursor`] adding the DNS specific field types.
pub(crate) trait DnsReadExt {
    /// Reads a (possibly compressed) domain name, returning it in
    /// presentation form.
    ///
    /// Pointers may only target earlier offsets, chains must strictly
    /// descend, and at most 50 indirections are followed. `hostname`
    /// additionally restricts the alphabet to `[A-Za-z0-9._/*-]`.
    fn read_name(&mut self, hostname: bool) -> Result<String, Error>;

    /// Reads a DNS Type. Unknown values are returned as `Err(raw)` so the
    /// caller can preserve them.
    fn read_type(&mut self) -> Result<Result<Type, u16>, Error>;

    /// Reads a DNS Class.
    fn read_class(&mut self) -> Result<Class, Error>;

    fn read_u8_or(&mut self, err: Error) -> Result<u8, Error>;
    fn read_u16_or(&mut self, err: Error) -> Result<u16, Error>;
    fn read_u32_or(&mut self, err: Error) -> Result<u32, Error>;

    /// Reads exactly `len` bytes.
    fn take(&mut self, len: usize) -> Result<Vec<u8>, Error>;
}

impl<'a> DnsReadExt for Cursor<&'a [u8]> {
    fn read_name(&mut self, hostname: bool) -> Result<String, Error> {
        let mut out = String::new();
        let mut encoded_len = 0usize;
        let mut indirections = 0usize;

        // First byte of the name segment currently being read. Every
        // pointer must target an offset strictly below this, so chains
        // strictly descend and cannot loop.
        let mut seg_start = self.position();

        // Where to resume once the name (and any pointer chain) ends.
        let mut resume_at = None;

        loop {
            let len = self.read_u8_or(Error::BadResp)?;

            match len & 0xC0 {
                // Plain label.
                0x00 => {
                    if len == 0 {
                        if out.is_empty() {
                            out.push('.'); // Root domain
                        }
                        break;
                    }

                    encoded_len += len as usize + 1;
                    if encoded_len + 1 > name::MAX_NAME_LEN {
                        return Err(Error::BadName);
                    }

                    let label = self.take(len as usize)?;
                    if !out.is_empty() {
                        out.push('.');
                    }
                    name::push_escaped(&mut out, &label);
                }

                // Compression pointer: 14 bits of offset.
                0xC0 => {
                    let b2 = self.read_u8_or(Error::BadResp)? as u64;
                    let ptr = ((len as u64 & !0xC0) << 8) | b2;

                    // Forward, self and cyclic pointers are malicious.
                    if ptr >= seg_start {
                        return Err(Error::BadName);
                    }

                    indirections += 1;
                    if indirections > MAX_INDIRECTIONS {
                        return Err(Error::BadName);
                    }

                    if resume_at.is_none() {
                        resume_at = Some(self.position());
                    }

                    self.seek(SeekFrom::Start(ptr)).map_err(|_| Error::BadResp)?;
                    seg_start = ptr;
                }

                // 0x40 and 0x80 prefixes are unassigned.
                _ => return Err(Error::BadName),
            }
        }

        if let Some(pos) = resume_at {
            self.seek(SeekFrom::Start(pos)).map_err(|_| Error::BadResp)?;
        }

        if hostname && !name::is_hostname(&out) {
            return Err(Error::BadName);
        }

        Ok(out)
    }

    fn read_type(&mut self) -> Result<Result<Type, u16>, Error> {
        let raw = self.read_u16_or(Error::BadResp)?;
        Ok(FromPrimitive::from_u16(raw).ok_or(raw))
    }

    fn read_class(&mut self) -> Result<Class, Error> {
        let raw = self.read_u16_or(Error::BadResp)?;
        FromPrimitive::from_u16(raw).ok_or(Error::BadResp)
    }

    fn read_u8_or(&mut self, err: Error) -> Result<u8, Error> {
        self.read_u8().map_err(|_| err)
    }

    fn read_u16_or(&mut self, err: Error) -> Result<u16, Error> {
        self.read_u16::<BE>().map_err(|_| err)
    }

    fn read_u32_or(&mut self, err: Error) -> Result<u32, Error> {
        self.read_u32::<BE>().map_err(|_| err)
    }

    fn take(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        let pos = self.position() as usize;
        let buf = self.get_ref();
        match buf.get(pos..pos + len) {
            Some(bytes) => {
                let out = bytes.to_vec();
                self.set_position((pos + len) as u64);
                Ok(out)
            }
            None => Err(Error::BadResp),
        }
    }
}
