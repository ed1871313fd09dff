use glam::{DVec3, Vec3};

use crate::error::ProtocolError;

/// Upper bound on any length-prefixed string.
pub const MAX_STRING_LEN: usize = 1 << 20;

/// Cursor over one inbound transport buffer.
///
/// Reads never block and never suspend: a read that cannot be satisfied from
/// the bytes at hand is an error.
#[derive(Debug)]
pub struct BufferIn<'a> {
    data: &'a [u8],
    read_index: usize,
}

impl<'a> BufferIn<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            read_index: 0,
        }
    }

    pub fn read_index(&self) -> usize {
        self.read_index
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_index
    }

    pub fn end_of_stream(&self) -> bool {
        self.read_index >= self.data.len()
    }

    /// Move the cursor forward to `index`. Never moves backward.
    pub fn skip_to(&mut self, index: usize) -> Result<(), ProtocolError> {
        if index > self.data.len() {
            return Err(ProtocolError::Truncated {
                offset: self.read_index,
                needed: index - self.read_index,
                available: self.data.len(),
            });
        }
        self.read_index = self.read_index.max(index);
        Ok(())
    }

    /// Borrow `len` bytes starting at the cursor as a separate reader and
    /// advance past them.
    pub fn sub_buffer(&mut self, len: usize) -> Result<BufferIn<'a>, ProtocolError> {
        let bytes = self.take(len)?;
        Ok(BufferIn::new(bytes))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .read_index
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(ProtocolError::Truncated {
                offset: self.read_index,
                needed: n,
                available: self.data.len(),
            })?;
        let bytes = &self.data[self.read_index..end];
        self.read_index = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32, ProtocolError> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_vec3f(&mut self) -> Result<Vec3, ProtocolError> {
        Ok(Vec3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vec3d(&mut self) -> Result<DVec3, ProtocolError> {
        Ok(DVec3::new(self.read_f64()?, self.read_f64()?, self.read_f64()?))
    }

    /// `u32` byte count followed by that many bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// `u32` byte length followed by UTF-8.
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u32()? as usize;
        if len > MAX_STRING_LEN {
            return Err(ProtocolError::StringTooLong {
                len,
                max: MAX_STRING_LEN,
            });
        }
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }
}

/// Growable outbound byte buffer with message-length patching.
#[derive(Debug, Default, Clone)]
pub struct BufferOut {
    data: Vec<u8>,
    message_start: Option<usize>,
}

impl BufferOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Write a `(type, 0)` header and remember where it starts.
    pub fn begin_message(&mut self, msg_type: u32) {
        self.message_start = Some(self.data.len());
        self.write_u32(msg_type);
        self.write_u32(0);
    }

    /// Patch the length field of the message opened by [`begin_message`]
    /// with its total size, header included.
    ///
    /// [`begin_message`]: BufferOut::begin_message
    pub fn finish_message(&mut self) {
        if let Some(start) = self.message_start.take() {
            let len = (self.data.len() - start) as u32;
            self.data[start + 4..start + 8].copy_from_slice(&len.to_le_bytes());
        }
    }

    /// Patch a `u32` previously written at `offset`.
    pub fn patch_u32(&mut self, offset: usize, v: u32) {
        self.data[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_vec3f(&mut self, v: Vec3) {
        self.write_f32(v.x);
        self.write_f32(v.y);
        self.write_f32(v.z);
    }

    pub fn write_vec3d(&mut self, v: DVec3) {
        self.write_f64(v.x);
        self.write_f64(v.y);
        self.write_f64(v.z);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.data.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_little_endian() {
        let bytes = [0x01, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff];
        let mut buf = BufferIn::new(&bytes);
        assert_eq!(buf.read_u32().unwrap(), 1);
        assert_eq!(buf.read_i32().unwrap(), -1);
        assert!(buf.end_of_stream());
    }

    #[test]
    fn read_past_end_is_truncated() {
        let bytes = [0u8; 3];
        let mut buf = BufferIn::new(&bytes);
        let err = buf.read_u32().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Truncated {
                needed: 4,
                available: 3,
                ..
            }
        ));
        // Failed reads leave the cursor alone.
        assert_eq!(buf.read_index(), 0);
    }

    #[test]
    fn string_with_bad_utf8_is_rejected() {
        let mut out = BufferOut::new();
        out.write_bytes(&[0xff, 0xfe]);
        let bytes = out.into_bytes();
        let mut buf = BufferIn::new(&bytes);
        assert!(matches!(
            buf.read_string(),
            Err(ProtocolError::InvalidUtf8(_))
        ));
    }

    #[test]
    fn oversized_string_length_is_rejected_before_reading() {
        let mut out = BufferOut::new();
        out.write_u32((MAX_STRING_LEN + 1) as u32);
        let bytes = out.into_bytes();
        let mut buf = BufferIn::new(&bytes);
        assert!(matches!(
            buf.read_string(),
            Err(ProtocolError::StringTooLong { .. })
        ));
    }

    #[test]
    fn finish_message_patches_total_length() {
        let mut out = BufferOut::new();
        out.write_u32(99); // unrelated prefix
        out.begin_message(2000);
        out.write_string("hi");
        out.finish_message();

        let bytes = out.into_bytes();
        let mut buf = BufferIn::new(&bytes);
        assert_eq!(buf.read_u32().unwrap(), 99);
        assert_eq!(buf.read_u32().unwrap(), 2000);
        // 8 header + 4 length + 2 chars
        assert_eq!(buf.read_u32().unwrap(), 14);
    }

    #[test]
    fn skip_to_never_moves_backward() {
        let bytes = [0u8; 16];
        let mut buf = BufferIn::new(&bytes);
        buf.skip_to(8).unwrap();
        buf.skip_to(4).unwrap();
        assert_eq!(buf.read_index(), 8);
        assert!(buf.skip_to(17).is_err());
    }

    #[test]
    fn sub_buffer_is_bounded() {
        let bytes = [1u8, 0, 0, 0, 2, 0, 0, 0];
        let mut buf = BufferIn::new(&bytes);
        let mut sub = buf.sub_buffer(4).unwrap();
        assert_eq!(sub.read_u32().unwrap(), 1);
        assert!(sub.read_u32().is_err());
        assert_eq!(buf.read_u32().unwrap(), 2);
    }
}
