//! Scalar reference arithmetic for the blend.
//!
//! This is the oracle the generated kernel is tested against, and what the
//! CLI falls back to for comparison runs. Per channel it computes
//! `saturate(round(d * (255 - src_alpha) / 255) + s)`, with the division by
//! 255 done the same fixed-point way the kernel does it:
//! `(x + 0x80) * 0x101 >> 16`, exact for every x in `0..=255*255`.

/// Blend one RGBA source pixel over one destination pixel.
pub fn blend_pixel(dst: [u8; 4], src: [u8; 4]) -> [u8; 4] {
    let weight = 255 - u32::from(src[3]);
    let mut out = [0u8; 4];
    for channel in 0..4 {
        let scaled = u32::from(dst[channel]) * weight;
        let attenuated = ((scaled + 0x80) * 0x101) >> 16;
        out[channel] = (attenuated + u32::from(src[channel])).min(255) as u8;
    }
    out
}

/// Blend `src` over `dst` in place, pixel by pixel.
///
/// Both slices must be the same length and a multiple of 4 bytes.
pub fn blend_in_place(dst: &mut [u8], src: &[u8]) {
    assert_eq!(dst.len(), src.len(), "buffer lengths must match");
    assert_eq!(dst.len() % 4, 0, "buffers must hold whole pixels");
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let blended = blend_pixel([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]]);
        d.copy_from_slice(&blended);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_source_replaces_destination() {
        // alpha 255 leaves no destination contribution
        let out = blend_pixel([10, 20, 30, 40], [1, 2, 3, 255]);
        assert_eq!(out, [1, 2, 3, 255]);
    }

    #[test]
    fn test_transparent_source_keeps_destination() {
        let out = blend_pixel([10, 20, 30, 40], [0, 0, 0, 0]);
        assert_eq!(out, [10, 20, 30, 40]);
    }

    #[test]
    fn test_narrowing_saturates() {
        // zero source alpha keeps the full destination, and the source
        // channels are added on top: 200 + 200 must clamp, not wrap
        let out = blend_pixel([200, 0, 0, 0], [200, 0, 0, 0]);
        assert_eq!(out[0], 255);
    }

    #[test]
    fn test_fixed_point_divide_matches_rounding() {
        for x in 0u32..=255 * 255 {
            let approx = ((x + 0x80) * 0x101) >> 16;
            let exact = (x + 127) / 255; // round-half-up of x/255
            assert_eq!(approx, exact, "x = {x}");
        }
    }

    #[test]
    fn test_in_place_matches_pixelwise() {
        let src = [1u8, 2, 3, 100, 200, 150, 100, 30];
        let mut dst = [9u8, 8, 7, 6, 5, 4, 3, 2];
        let expected = [
            blend_pixel([9, 8, 7, 6], [1, 2, 3, 100]),
            blend_pixel([5, 4, 3, 2], [200, 150, 100, 30]),
        ];
        blend_in_place(&mut dst, &src);
        assert_eq!(&dst[..4], &expected[0]);
        assert_eq!(&dst[4..], &expected[1]);
    }
}
