// XOR masking of frame payloads (RFC 6455 Section 5.3).

/// Masks or unmasks `buf` in place. The operation is its own inverse.
///
/// `offset` is the position of `buf[0]` within the whole payload, so a payload
/// can be unmasked piecewise.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4], offset: usize) {
    let mut key = mask;
    key.rotate_left(offset & 3);

    let key_word = u32::from_ne_bytes(key);
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ key_word;
        chunk.copy_from_slice(&word.to_ne_bytes());
    }
    apply_mask_fallback(chunks.into_remainder(), key);
}

#[inline(always)]
fn apply_mask_fallback(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_bytewise() {
        let mask = [0x6d, 0xb6, 0xb2, 0x80];
        for len in 0..40 {
            let data: Vec<u8> = (0..len as u8).collect();

            let mut fast = data.clone();
            apply_mask(&mut fast, mask, 0);

            let mut slow = data.clone();
            apply_mask_fallback(&mut slow, mask);

            assert_eq!(fast, slow, "len {len}");
        }
    }

    #[test]
    fn test_offset_continues_key() {
        let mask = [1, 2, 3, 4];
        let data: Vec<u8> = (0..23).collect();

        let mut whole = data.clone();
        apply_mask(&mut whole, mask, 0);

        let mut split = data;
        let (head, tail) = split.split_at_mut(7);
        apply_mask(head, mask, 0);
        apply_mask(tail, mask, 7);

        assert_eq!(whole, split);
    }

    #[test]
    fn test_involution() {
        let mask = [0xde, 0xad, 0xbe, 0xef];
        let original = b"Hello, masked world".to_vec();
        let mut buf = original.clone();
        apply_mask(&mut buf, mask, 0);
        assert_ne!(buf, original);
        apply_mask(&mut buf, mask, 0);
        assert_eq!(buf, original);
    }
}
