//! Decoding of `pagemap` entries and `page_idle/bitmap` words.
//!
//! pagemap: one little-endian u64 per virtual page.
//!   bit 63     page present in RAM
//!   bits 0-54  page frame number (only meaningful when present)
//!
//! page_idle/bitmap: one bit per PFN, packed in little-endian u64 words. A
//! set bit means the frame is idle; the kernel clears it on access. Writes
//! only act on set bits: a zero bit leaves its frame untouched.
//!
//! kpageflags: one u64 of `KPF_*` flags per PFN.

/// Size of one pagemap entry in bytes.
pub const PAGEMAP_ENTRY_SIZE: usize = 8;

/// Size of one idle bitmap word in bytes. Reads and writes must be
/// aligned to this.
pub const BITMAP_WORD_SIZE: u64 = 8;

/// Mask selecting the PFN bits of a pagemap entry.
pub const PFN_MASK: u64 = (1 << 55) - 1;

const PRESENT_BIT: u32 = 63;

/// `KPF_DIRTY` in `/proc/kpageflags`.
const KPF_DIRTY_BIT: u32 = 4;

/// Tests bit `n` (0 = least significant) of `word`.
#[inline]
pub fn is_bit_set(word: u64, n: u32) -> bool {
    n < u64::BITS && (word >> n) & 1 == 1
}

/// PFN of a pagemap entry.
#[inline]
pub fn pfn_of(entry: u64) -> u64 {
    entry & PFN_MASK
}

/// True if the page behind a pagemap entry is resident.
#[inline]
pub fn is_resident(entry: u64) -> bool {
    is_bit_set(entry, PRESENT_BIT)
}

/// Decodes the `i`-th entry of a raw pagemap buffer.
///
/// Returns `None` past the last complete entry.
#[inline]
pub fn entry_at(buf: &[u8], i: usize) -> Option<u64> {
    let start = i.checked_mul(PAGEMAP_ENTRY_SIZE)?;
    let bytes = buf.get(start..start + PAGEMAP_ENTRY_SIZE)?;
    let mut raw = [0u8; PAGEMAP_ENTRY_SIZE];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

/// Iterates over the complete entries of a raw pagemap buffer.
pub fn entries(buf: &[u8]) -> impl Iterator<Item = u64> + '_ {
    buf.chunks_exact(PAGEMAP_ENTRY_SIZE).map(|chunk| {
        let mut raw = [0u8; PAGEMAP_ENTRY_SIZE];
        raw.copy_from_slice(chunk);
        u64::from_le_bytes(raw)
    })
}

/// True if `pfn` was accessed since it was last marked idle.
///
/// Frames beyond the end of `bitmap` are reported inactive.
#[inline]
pub fn is_active(pfn: u64, bitmap: &[u8]) -> bool {
    let Ok(byte) = usize::try_from(pfn / 8) else {
        return false;
    };
    match bitmap.get(byte) {
        Some(&b) => (b >> (pfn % 8)) & 1 == 0,
        None => false,
    }
}

/// True if a `/proc/kpageflags` entry has the dirty flag set.
#[inline]
pub fn is_dirty(flags: u64) -> bool {
    is_bit_set(flags, KPF_DIRTY_BIT)
}

/// Byte offset of the bitmap word holding `pfn`.
#[inline]
pub fn bitmap_word_offset(pfn: u64) -> u64 {
    (pfn / 64) * BITMAP_WORD_SIZE
}

/// Bit of `pfn` within its bitmap word.
#[inline]
pub fn bitmap_word_mask(pfn: u64) -> u64 {
    1 << (pfn % 64)
}
