//! Fixed scrambling network applied to hash sub-fields.
//!
//! Two substitution layers built from 4-bit and 3-bit S-boxes, each followed
//! by a bit swizzle. Every stage is a bijection on `width` bits.

const SBOX4: [u8; 16] = [
    0xC, 0x5, 0x6, 0xB, 0x9, 0x0, 0xA, 0xD, 0x3, 0xE, 0xF, 0x8, 0x4, 0x7, 0x1, 0x2,
];
const SBOX3: [u8; 8] = [3, 6, 0, 5, 7, 1, 2, 4];

const SWIZZLE_FIRST: u32 = 11;
const SWIZZLE_SECOND: u32 = 13;

/// Widths the hardware scrambles.
pub const SCRAMBLE_WIDTHS: [u32; 3] = [14, 15, 18];

fn mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Number of 3-bit boxes so the rest splits into 4-bit boxes.
fn sbox3_count(width: u32) -> u32 {
    (0..4).find(|t| width >= 3 * t && (width - 3 * t) % 4 == 0).unwrap_or(0)
}

fn substitute(value: u32, width: u32) -> u32 {
    let threes = sbox3_count(width);
    let fours = (width - 3 * threes) / 4;
    let mut out = 0;
    let mut shift = 0;
    for _ in 0..fours {
        let nibble = (value >> shift) & 0xF;
        out |= (SBOX4[nibble as usize] as u32) << shift;
        shift += 4;
    }
    for _ in 0..threes {
        let triple = (value >> shift) & 0x7;
        out |= (SBOX3[triple as usize] as u32) << shift;
        shift += 3;
    }
    out
}

fn swizzle(value: u32, width: u32, mult: u32) -> u32 {
    (0..width)
        .filter(|i| value & (1 << i) != 0)
        .fold(0, |acc, i| acc | 1 << ((i * mult) % width))
}

/// Scrambles the low `width` bits of `value`.
pub fn scramble(value: u32, width: u32) -> u32 {
    let v = value & mask(width);
    let v = substitute(v, width);
    let v = swizzle(v, width, SWIZZLE_FIRST);
    let v = substitute(v, width);
    swizzle(v, width, SWIZZLE_SECOND)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sboxes_are_permutations() {
        let mut seen4 = [false; 16];
        SBOX4.iter().for_each(|v| seen4[*v as usize] = true);
        assert!(seen4.iter().all(|s| *s));
        let mut seen3 = [false; 8];
        SBOX3.iter().for_each(|v| seen3[*v as usize] = true);
        assert!(seen3.iter().all(|s| *s));
    }

    #[test]
    fn test_box_split_covers_width() {
        for width in SCRAMBLE_WIDTHS {
            let threes = sbox3_count(width);
            assert_eq!((width - 3 * threes) % 4, 0, "width {}", width);
        }
    }

    #[test]
    fn test_scramble_is_bijective() {
        for width in SCRAMBLE_WIDTHS {
            let size = 1usize << width;
            let mut seen = vec![false; size];
            for v in 0..size as u32 {
                let s = scramble(v, width);
                assert!(s < size as u32, "width {} value {} out of range", width, v);
                assert!(!seen[s as usize], "width {} collision at {}", width, v);
                seen[s as usize] = true;
            }
        }
    }

    #[test]
    fn test_scramble_is_not_identity() {
        for width in SCRAMBLE_WIDTHS {
            let moved = (0..256u32).filter(|v| scramble(*v, width) != *v).count();
            assert!(moved > 200, "width {} moved {}", width, moved);
        }
    }

    #[test]
    fn test_scramble_ignores_high_bits() {
        assert_eq!(scramble(0x1_0005, 14), scramble(0x5, 14));
    }
}
