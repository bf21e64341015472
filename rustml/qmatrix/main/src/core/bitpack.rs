/// Bit-level packing of integer codes into `u32` words.
///
/// Packed buffers are row-major with `stride` words per packed row. Inside a
/// column, a run of `b`-bit codes is a little-endian bitstream starting at
/// bit 0 of `qrow`; a code may straddle two consecutive packed rows.
use crate::api::types::{NIBBLES_PER_WORD, NIBBLE_BITS, WORD_BITS};

/// Packed rows needed for `rows` codes of `bits` bits.
#[inline]
pub fn qrows_for(rows: usize, bits: u8) -> usize {
    (rows * bits as usize + WORD_BITS - 1) / WORD_BITS
}

/// Words needed for `count` 4-bit codes.
#[inline]
pub fn nibble_words(count: usize) -> usize {
    (count + NIBBLES_PER_WORD - 1) / NIBBLES_PER_WORD
}

/// Read the code at bit offset `bit_pos` of the stream starting at `qrow`, column `col`.
#[inline]
pub fn read_code(words: &[u32], stride: usize, qrow: usize, bit_pos: usize, bits: u8, col: usize) -> u32 {
    let word_row = qrow + bit_pos / WORD_BITS;
    let shift = bit_pos % WORD_BITS;
    let mask = (1u32 << bits) - 1;
    let lo = words[word_row * stride + col] >> shift;
    if shift + bits as usize > WORD_BITS {
        let hi = words[(word_row + 1) * stride + col] << (WORD_BITS - shift);
        (lo | hi) & mask
    } else {
        lo & mask
    }
}

/// Write `code` at bit offset `bit_pos`. Target bits must be zero.
#[inline]
pub fn write_code(words: &mut [u32], stride: usize, qrow: usize, bit_pos: usize, bits: u8, col: usize, code: u32) {
    let code = code & ((1u32 << bits) - 1);
    let word_row = qrow + bit_pos / WORD_BITS;
    let shift = bit_pos % WORD_BITS;
    words[word_row * stride + col] |= code << shift;
    if shift + bits as usize > WORD_BITS {
        words[(word_row + 1) * stride + col] |= code >> (WORD_BITS - shift);
    }
}

/// Read the `idx`-th 4-bit code of row `row` in a nibble table.
#[inline]
pub fn read_nibble(words: &[u32], words_per_row: usize, row: usize, idx: usize) -> u32 {
    let word = words[row * words_per_row + idx / NIBBLES_PER_WORD];
    (word >> ((idx % NIBBLES_PER_WORD) * NIBBLE_BITS)) & 0xF
}

#[inline]
pub fn write_nibble(words: &mut [u32], words_per_row: usize, row: usize, idx: usize, code: u32) {
    let shift = (idx % NIBBLES_PER_WORD) * NIBBLE_BITS;
    let word = &mut words[row * words_per_row + idx / NIBBLES_PER_WORD];
    *word = (*word & !(0xF << shift)) | ((code & 0xF) << shift);
}
