//! Internet checksum (RFC 1071) and the incremental update of RFC 1624.
//!
//! Both IPv4 headers and ICMP messages carry this checksum. The incremental
//! form lets a caller patch a checksum after rewriting a fixed-width field
//! without rescanning the whole region.

/// One's-complement sum of `data` as big-endian 16-bit words, unfolded.
///
/// An odd trailing byte is padded with a zero low byte.
pub fn sum_words(data: &[u8]) -> u64 {
    let mut sum: u64 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u64::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u64::from(*last) << 8;
    }
    sum
}

/// Fold carries back into the low 16 bits until none remain.
#[inline]
pub fn fold(mut sum: u64) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Checksum over `data`. The checksum field inside `data` must be zeroed.
pub fn compute(data: &[u8]) -> u16 {
    !fold(sum_words(data))
}

/// True when `data`, checksum field included, sums to zero.
pub fn verify(data: &[u8]) -> bool {
    compute(data) == 0
}

/// Patch `old_checksum` after the 16-bit word `old_value` became `new_value`.
///
/// Uses `HC' = ~(~HC + ~m + m')`, which never produces the `0xFFFF`
/// negative-zero artifact of the older `HC - ~m - m'` form.
pub fn incremental_update(old_checksum: u16, old_value: u16, new_value: u16) -> u16 {
    let sum = u64::from(!old_checksum) + u64::from(!old_value) + u64::from(new_value);
    !fold(sum)
}

/// Apply [`incremental_update`] for every word that differs between two
/// equally sized regions.
pub fn incremental_update_slice(old_checksum: u16, old: &[u8], new: &[u8]) -> u16 {
    debug_assert_eq!(old.len(), new.len());
    old.chunks(2)
        .zip(new.chunks(2))
        .fold(old_checksum, |checksum, (before, after)| {
            let before = word(before);
            let after = word(after);
            if before == after {
                checksum
            } else {
                incremental_update(checksum, before, after)
            }
        })
}

fn word(bytes: &[u8]) -> u16 {
    match bytes {
        [hi, lo] => u16::from_be_bytes([*hi, *lo]),
        [hi] => u16::from(*hi) << 8,
        _ => 0,
    }
}
