use anyhow::Result;
use image_hasher::{HashAlg, HasherConfig, ImageHash};

/// Perceptual hash of an encoded frame, base64 encoded.
pub fn compute_phash(image_bytes: &[u8]) -> Result<String> {
    let img = image::load_from_memory(image_bytes)?;
    let hasher = HasherConfig::new()
        .hash_alg(HashAlg::DoubleGradient)
        .hash_size(8, 8)
        .to_hasher();

    Ok(hasher.hash_image(&img).to_base64())
}

/// Bit distance between two hashes; `u32::MAX` if either is malformed.
pub fn compute_hamming_distance(lhs: &str, rhs: &str) -> u32 {
    let Ok(h1) = ImageHash::<Vec<u8>>::from_base64(lhs) else {
        return u32::MAX;
    };
    let Ok(h2) = ImageHash::<Vec<u8>>::from_base64(rhs) else {
        return u32::MAX;
    };
    h1.dist(&h2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::normalize::tests::encode_png;
    use image::{Rgb, RgbImage};

    /// Brightness ramp along one axis.
    fn ramp(horizontal: bool) -> Vec<u8> {
        encode_png(RgbImage::from_fn(64, 64, |x, y| {
            let v = (if horizontal { x } else { y } * 4) as u8;
            Rgb([v, v, v])
        }))
    }

    #[test]
    fn identical_frames_have_zero_distance() {
        let a = compute_phash(&ramp(true)).unwrap();
        let b = compute_phash(&ramp(true)).unwrap();
        assert_eq!(compute_hamming_distance(&a, &b), 0);
    }

    #[test]
    fn different_frames_are_far_apart() {
        let a = compute_phash(&ramp(true)).unwrap();
        let b = compute_phash(&ramp(false)).unwrap();
        assert!(compute_hamming_distance(&a, &b) >= 8);
    }

    #[test]
    fn malformed_hash_is_maximally_distant() {
        let a = compute_phash(&ramp(true)).unwrap();
        assert_eq!(compute_hamming_distance(&a, "%%%"), u32::MAX);
    }
}
