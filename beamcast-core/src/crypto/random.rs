use super::{CryptoError, Result};

/// Fill a fresh buffer with cryptographically strong random bytes.
pub fn rand_bytes(len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf).map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(buf)
}

/// Generate a random decimal-digit string, e.g. a 4-digit pairing PIN.
pub fn rand_digits(len: usize) -> Result<String> {
    // Rejection sampling keeps the digits uniform.
    let mut out = String::with_capacity(len);
    while out.len() < len {
        let chunk = rand_bytes(len)?;
        for b in chunk {
            if b < 250 {
                out.push(char::from(b'0' + b % 10));
                if out.len() == len {
                    break;
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rand_bytes_length_and_variation() {
        let a = rand_bytes(16).unwrap();
        let b = rand_bytes(16).unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_rand_digits_all_decimal() {
        let pin = rand_digits(4).unwrap();
        assert_eq!(pin.len(), 4);
        assert!(pin.chars().all(|c| c.is_ascii_digit()));
    }
}
