use bytes::{Buf, BufMut, Bytes, TryGetError};

/// Mask for the 31 bit unsigned integers on the wire (the top bit is reserved)
pub const U31_MASK: u32 = 0x7fff_ffff;
/// Mask for the 63 bit unsigned integers on the wire (the top bit is reserved)
pub const U63_MASK: u64 = 0x7fff_ffff_ffff_ffff;
pub const U24_MAX: usize = 0xff_ffff;

macro_rules! get_masked_impl {
    ($try_getter: ident, $ty:ty, $getter: ident, $mask: expr) => {
        fn $try_getter(&mut self) -> Result<$ty, TryGetError> {
            Ok(self.$getter()? & $mask)
        }
    }
}

/// Checked reads for the irregular integer widths of the wire format. Fixed width reads use
///  `bytes`' own `try_get_*` methods.
pub trait BufExt: Buf {
    fn try_get_u24(&mut self) -> Result<u32, TryGetError> {
        Ok(self.try_get_uint(3)? as u32)
    }

    get_masked_impl!(try_get_u31, u32, try_get_u32, U31_MASK);
    get_masked_impl!(try_get_u63, u64, try_get_u64, U63_MASK);

    fn try_get_bytes(&mut self, len: usize) -> Result<Bytes, TryGetError> {
        if self.remaining() < len {
            return Err(TryGetError {
                requested: len,
                available: self.remaining(),
            });
        }
        Ok(self.copy_to_bytes(len))
    }
}

pub trait BufMutExt: BufMut {
    fn put_u24(&mut self, v: u32) {
        debug_assert!(v as usize <= U24_MAX);
        self.put_uint(v as u64, 3);
    }

    fn put_u31(&mut self, v: u32) {
        self.put_u32(v & U31_MASK);
    }

    fn put_u63(&mut self, v: u64) {
        self.put_u64(v & U63_MASK);
    }
}

impl <T: Buf> BufExt for T {
}

impl <T: BufMut> BufMutExt for T {
}


#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::*;

    #[rstest]
    #[case::zero(0)]
    #[case::small(17)]
    #[case::max(0xff_ffff)]
    fn test_u24(#[case] value: u32) {
        let mut buf = BytesMut::new();
        buf.put_u24(value);
        assert_eq!(buf.len(), 3);

        let mut b: &[u8] = &buf;
        assert_eq!(b.try_get_u24().unwrap(), value);
        assert!(b.is_empty());
    }

    #[test]
    fn test_u31_ignores_reserved_bit() {
        let mut b: &[u8] = &[0x80, 0, 0, 5];
        assert_eq!(b.try_get_u31().unwrap(), 5);
    }

    #[test]
    fn test_u63_ignores_reserved_bit() {
        let mut buf = BytesMut::new();
        buf.put_u64(0x8000_0000_0000_0007);
        let mut b: &[u8] = &buf;
        assert_eq!(b.try_get_u63().unwrap(), 7);
    }

    #[test]
    fn test_put_u31_clears_reserved_bit() {
        let mut buf = BytesMut::new();
        buf.put_u31(u32::MAX);
        assert_eq!(&buf[..], &[0x7f, 0xff, 0xff, 0xff]);
    }

    #[rstest]
    #[case::u24(2, 3)]
    #[case::u31(3, 4)]
    fn test_underflow(#[case] available: usize, #[case] requested: usize) {
        let data = vec![0u8; available];
        let mut b: &[u8] = &data;
        let result = if requested == 3 { b.try_get_u24() } else { b.try_get_u31() };
        let err = result.unwrap_err();
        assert_eq!(err.requested, requested);
        assert_eq!(err.available, available);
    }

    #[test]
    fn test_try_get_bytes() {
        let mut b = Bytes::from_static(b"abcdef");
        assert_eq!(b.try_get_bytes(4).unwrap(), Bytes::from_static(b"abcd"));
        assert!(b.try_get_bytes(3).is_err());
        assert_eq!(b.remaining(), 2);
    }
}
