use anyhow::anyhow;

macro_rules! checked_get_impl {
    ($checked_getter: ident, $ty:ty, $getter: ident) => {
        fn $checked_getter(&mut self) -> anyhow::Result<$ty> {
            if self.remaining() < size_of::<$ty>() {
                return Err(anyhow!("buffer underflow"));
            }
            Ok(self.$getter())
        }
    }
}

/// Bounds-checked reads for the fixed-layout D-STAR records. All multi-byte integers on these wires
///  are little endian.
pub trait BufExt: bytes::Buf {
    checked_get_impl!(checked_u8, u8, get_u8);
    checked_get_impl!(checked_u16_le, u16, get_u16_le);
    checked_get_impl!(checked_u32_le, u32, get_u32_le);

    fn checked_array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        if self.remaining() < N {
            return Err(anyhow!("buffer underflow"));
        }
        let mut result = [0u8; N];
        self.copy_to_slice(&mut result);
        Ok(result)
    }
}

impl <T: bytes::Buf> BufExt for T {
}
