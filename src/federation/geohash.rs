//! Geohash → (latitude, longitude) decoding.
//!
//! Returns the centre of the encoded cell. Any character outside the base32
//! geohash alphabet fails the whole decode.

const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Decode a geohash into the centre point of its cell.
pub fn decode(hash: &str) -> Option<(f64, f64)> {
    if hash.is_empty() {
        return None;
    }

    let (mut lat_lo, mut lat_hi) = (-90.0_f64, 90.0_f64);
    let (mut lon_lo, mut lon_hi) = (-180.0_f64, 180.0_f64);
    let mut even = true;

    for c in hash.bytes() {
        let c = c.to_ascii_lowercase();
        let idx = BASE32.iter().position(|b| *b == c)?;
        for bit in (0..5).rev() {
            let on = (idx >> bit) & 1 == 1;
            if even {
                let mid = (lon_lo + lon_hi) / 2.0;
                if on { lon_lo = mid } else { lon_hi = mid }
            } else {
                let mid = (lat_lo + lat_hi) / 2.0;
                if on { lat_lo = mid } else { lat_hi = mid }
            }
            even = !even;
        }
    }

    Some(((lat_lo + lat_hi) / 2.0, (lon_lo + lon_hi) / 2.0))
}
