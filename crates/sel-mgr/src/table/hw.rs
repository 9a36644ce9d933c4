//! Selector RAM word image.
//!
//! Layout of one word as written to shadow memory:
//!
//! | Bytes    | Field                                                  |
//! |----------|--------------------------------------------------------|
//! | `[0,2)`  | entries per word, u16 LE                               |
//! | `[2,4)`  | usage, u16 LE                                          |
//! | `[4,6)`  | hardware value (fair: active count, resilient: highest active + 1) |
//! | `6`      | flags, bit 0 = duplicated layout                       |
//! | `7`      | reserved                                               |
//! | `[8,..)` | active bitmap, slot `i` at bit `i % 8` of byte `i / 8` |

use crate::config::SelectionMode;
use crate::packing::WordData;
use pipe_sel_types::{SelError, SelResult};

const HEADER_LEN: usize = 8;
const FLAG_DUPLICATED: u8 = 0x1;

/// Decoded form of one word image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordImage {
    pub entries_per_word: u32,
    pub usage: u32,
    pub hw_value: u32,
    pub duplicated: bool,
    /// One flag per slot, `entries_per_word` long.
    pub active: Vec<bool>,
}

pub fn image_len(word_width: u32) -> usize {
    HEADER_LEN + word_width.div_ceil(8) as usize
}

/// Image of a word no group holds. Decoding it fails.
pub fn blank_word(word_width: u32) -> Vec<u8> {
    vec![0u8; image_len(word_width)]
}

pub fn encode_word(word: &WordData, duplicated: bool, mode: SelectionMode, word_width: u32) -> Vec<u8> {
    let mut data = vec![0u8; image_len(word_width)];
    data[0..2].copy_from_slice(&(word.capacity() as u16).to_le_bytes());
    data[2..4].copy_from_slice(&(word.usage as u16).to_le_bytes());
    data[4..6].copy_from_slice(&(word.hw_value(mode) as u16).to_le_bytes());
    if duplicated {
        data[6] |= FLAG_DUPLICATED;
    }
    for (i, active) in word.active.iter().enumerate() {
        if *active {
            data[HEADER_LEN + i / 8] |= 1 << (i % 8);
        }
    }
    data
}

pub fn decode_word(data: &[u8], mode: SelectionMode, word_width: u32) -> SelResult<WordImage> {
    if data.len() < image_len(word_width) {
        return Err(SelError::unexpected(format!(
            "word image of {} bytes, expected {}",
            data.len(),
            image_len(word_width)
        )));
    }
    let field = |at: usize| u16::from_le_bytes([data[at], data[at + 1]]) as u32;
    let entries_per_word = field(0);
    let usage = field(2);
    let hw_value = field(4);
    if entries_per_word == 0 || entries_per_word > word_width || usage > entries_per_word {
        return Err(SelError::unexpected(format!(
            "corrupt word header: {} entries, usage {}",
            entries_per_word, usage
        )));
    }
    let active: Vec<bool> = (0..entries_per_word as usize)
        .map(|i| data[HEADER_LEN + i / 8] & (1 << (i % 8)) != 0)
        .collect();
    if let Some(stray) = active.iter().skip(usage as usize).position(|a| *a) {
        return Err(SelError::unexpected(format!(
            "active bit {} beyond usage {}",
            usage as usize + stray,
            usage
        )));
    }
    let expected = match mode {
        SelectionMode::Fair => active.iter().filter(|a| **a).count() as u32,
        SelectionMode::Resilient => active.iter().rposition(|a| *a).map_or(0, |p| p as u32 + 1),
    };
    if hw_value != expected {
        return Err(SelError::unexpected(format!(
            "word value {} disagrees with active bitmap ({})",
            hw_value, expected
        )));
    }
    Ok(WordImage {
        entries_per_word,
        usage,
        hw_value,
        duplicated: data[6] & FLAG_DUPLICATED != 0,
        active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipe_sel_types::MemberHandle;
    use pretty_assertions::assert_eq;

    fn word() -> WordData {
        let mut w = WordData::new(12);
        for s in 0..10 {
            w.slots[s] = Some(MemberHandle::from_raw_unchecked(s as u32 + 1));
        }
        w.usage = 10;
        w.active[0] = true;
        w.active[9] = true;
        w
    }

    #[test]
    fn test_encode_layout() {
        let data = encode_word(&word(), true, SelectionMode::Resilient, 120);
        assert_eq!(data.len(), 8 + 15);
        assert_eq!(&data[0..8], &[12, 0, 10, 0, 10, 0, 1, 0]);
        assert_eq!(data[8], 0x01);
        assert_eq!(data[9], 0x02);
    }

    #[test]
    fn test_decode_encoded() {
        let data = encode_word(&word(), false, SelectionMode::Fair, 120);
        let image = decode_word(&data, SelectionMode::Fair, 120).unwrap();
        assert_eq!(image.entries_per_word, 12);
        assert_eq!(image.usage, 10);
        assert_eq!(image.hw_value, 2);
        assert!(!image.duplicated);
        assert_eq!(image.active, word().active);
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let mut data = encode_word(&word(), false, SelectionMode::Fair, 120);
        data[4] = 7;
        assert!(decode_word(&data, SelectionMode::Fair, 120).is_err());

        let mut data = encode_word(&word(), false, SelectionMode::Fair, 120);
        data[9] |= 0x08; // slot 11, past usage
        assert!(decode_word(&data, SelectionMode::Fair, 120).is_err());

        assert!(decode_word(&[0u8; 4], SelectionMode::Fair, 120).is_err());
    }

    #[test]
    fn test_blank_word_does_not_decode() {
        let blank = blank_word(120);
        assert_eq!(blank.len(), image_len(120));
        let err = decode_word(&blank, SelectionMode::Resilient, 120).unwrap_err();
        assert!(err.to_string().contains("corrupt word header"));
    }
}
