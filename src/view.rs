//! Bounds-checked access to untrusted bytes.
//!
//! Every read goes through [`ByteView::get`], which refuses any range that
//! does not lie entirely inside the view. Offsets come straight out of the
//! file, so the arithmetic is checked as well.

/// Byte order of a Mach-O image relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Native,
    Swapped,
}

impl ByteOrder {
    pub fn u32(self, bytes: [u8; 4]) -> u32 {
        let value = u32::from_ne_bytes(bytes);
        match self {
            ByteOrder::Native => value,
            ByteOrder::Swapped => value.swap_bytes(),
        }
    }

    pub fn u64(self, bytes: [u8; 8]) -> u64 {
        let value = u64::from_ne_bytes(bytes);
        match self {
            ByteOrder::Native => value,
            ByteOrder::Swapped => value.swap_bytes(),
        }
    }

    /// Whether data in this order is stored little-endian.
    pub fn is_little_endian(self) -> bool {
        cfg!(target_endian = "little") == (self == ByteOrder::Native)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteView<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Returns `len` bytes starting at `offset`, or `None` if any of them
    /// fall outside the view.
    pub fn get(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        let end = offset.checked_add(len)?;
        self.bytes.get(offset..end)
    }

    pub fn subview(&self, offset: usize, len: usize) -> Option<ByteView<'a>> {
        self.get(offset, len).map(ByteView::new)
    }

    /// Everything from `offset` to the end of the view.
    pub fn tail(&self, offset: usize) -> Option<ByteView<'a>> {
        self.bytes.get(offset..).map(ByteView::new)
    }

    pub fn array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        self.get(offset, N)?.try_into().ok()
    }

    pub fn read_u32(&self, offset: usize, order: ByteOrder) -> Option<u32> {
        self.array(offset).map(|b| order.u32(b))
    }

    pub fn read_u64(&self, offset: usize, order: ByteOrder) -> Option<u64> {
        self.array(offset).map(|b| order.u64(b))
    }

    /// Reads a NUL-terminated string starting at `offset`. A string with no
    /// terminator runs to the end of the view.
    pub fn cstr(&self, offset: usize) -> Option<&'a [u8]> {
        let rest = self.bytes.get(offset..)?;
        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
        Some(&rest[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_rejects_out_of_range() {
        let view = ByteView::new(&[1, 2, 3, 4]);
        assert_eq!(view.get(0, 4), Some(&[1, 2, 3, 4][..]));
        assert_eq!(view.get(2, 3), None);
        assert_eq!(view.get(4, 0), Some(&[][..]));
        assert_eq!(view.get(5, 0), None);
        assert_eq!(view.get(usize::MAX, 2), None);
    }

    #[test]
    fn swapped_order_reverses_bytes() {
        let bytes = 0x1122_3344u32.to_ne_bytes();
        assert_eq!(ByteOrder::Native.u32(bytes), 0x1122_3344);
        assert_eq!(ByteOrder::Swapped.u32(bytes), 0x4433_2211);

        let view = ByteView::new(&[0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0]);
        let order = if cfg!(target_endian = "little") {
            ByteOrder::Native
        } else {
            ByteOrder::Swapped
        };
        assert!(order.is_little_endian());
        assert_eq!(view.read_u64(4, order), Some(1));
        assert_eq!(view.read_u64(5, order), None);
    }

    #[test]
    fn cstr_stops_at_nul_or_end() {
        let view = ByteView::new(b"abc\0def");
        assert_eq!(view.cstr(0), Some(&b"abc"[..]));
        assert_eq!(view.cstr(4), Some(&b"def"[..]));
        assert_eq!(view.cstr(7), Some(&b""[..]));
        assert_eq!(view.cstr(8), None);
    }
}
