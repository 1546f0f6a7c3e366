use super::{DecodeError, TransferDecoder};

/// Maps each octet to its 6-bit value, or 64 for `=`, 65 for whitespace
/// and 255 for anything else.
static BASE64_MAP: [u8; 256] = build_map();

const PAD: u8 = 64;
const WS: u8 = 65;
const BAD: u8 = 255;

const fn build_map() -> [u8; 256] {
    let mut map = [BAD; 256];
    let mut i = 0;
    while i < 26 {
        map[b'A' as usize + i] = i as u8;
        map[b'a' as usize + i] = 26 + i as u8;
        i += 1;
    }
    let mut d = 0;
    while d < 10 {
        map[b'0' as usize + d] = 52 + d as u8;
        d += 1;
    }
    map[b'+' as usize] = 62;
    map[b'/' as usize] = 63;
    map[b'=' as usize] = PAD;
    map[b' ' as usize] = WS;
    map[b'\t' as usize] = WS;
    map[b'\r' as usize] = WS;
    map[b'\n' as usize] = WS;
    map
}

/// Streaming base64 decoder. Line breaks and other whitespace are
/// transparent; the 24-bit quantum is carried across `decode` calls.
#[derive(Debug, Default)]
pub struct Base64Decoder {
    quantum: u32,
    chars: u8,
    padded: bool,
}

impl Base64Decoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferDecoder for Base64Decoder {
    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), DecodeError> {
        for &ch in input {
            let val = BASE64_MAP[ch as usize];
            match val {
                0..=63 => {
                    if self.padded {
                        return Err(DecodeError::base64());
                    }
                    self.quantum = (self.quantum << 6) | val as u32;
                    self.chars += 1;
                    if self.chars == 4 {
                        out.extend_from_slice(&[
                            (self.quantum >> 16) as u8,
                            (self.quantum >> 8) as u8,
                            self.quantum as u8,
                        ]);
                        self.quantum = 0;
                        self.chars = 0;
                    }
                }
                PAD => match self.chars {
                    2 => {
                        out.push((self.quantum >> 4) as u8);
                        self.quantum = 0;
                        self.chars = 0;
                        self.padded = true;
                    }
                    3 => {
                        out.extend_from_slice(&[
                            (self.quantum >> 10) as u8,
                            (self.quantum >> 2) as u8,
                        ]);
                        self.quantum = 0;
                        self.chars = 0;
                        self.padded = true;
                    }
                    // Tolerate the tail of `==` padding.
                    0 if self.padded => (),
                    _ => return Err(DecodeError::base64()),
                },
                WS => (),
                _ => return Err(DecodeError::base64()),
            }
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), DecodeError> {
        // An unpadded tail of 2 or 3 chars still carries whole octets; a
        // single dangling char cannot.
        match self.chars {
            0 => Ok(()),
            2 => {
                out.push((self.quantum >> 4) as u8);
                self.chars = 0;
                Ok(())
            }
            3 => {
                out.extend_from_slice(&[(self.quantum >> 10) as u8, (self.quantum >> 2) as u8]);
                self.chars = 0;
                Ok(())
            }
            _ => Err(DecodeError::base64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(chunks: &[&[u8]]) -> Result<Vec<u8>, DecodeError> {
        let mut decoder = Base64Decoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            decoder.decode(chunk, &mut out)?;
        }
        decoder.finish(&mut out)?;
        Ok(out)
    }

    #[test]
    fn decodes_simple_payload() {
        assert_eq!(decode_all(&[b"SGVsbG8gV29ybGQ="]).unwrap(), b"Hello World");
    }

    #[test]
    fn tolerates_line_breaks_and_split_reads() {
        assert_eq!(
            decode_all(&[b"SGVs", b"bG8g\r\n", b"V2", b"9ybGQ="]).unwrap(),
            b"Hello World"
        );
        assert_eq!(decode_all(&[b"S", b"G", b"V", b"s"]).unwrap(), b"Hel");
    }

    #[test]
    fn rejects_garbage_and_dangling_char() {
        assert!(decode_all(&[b"SGV%bG8="]).is_err());
        assert!(decode_all(&[b"SGVsb"]).is_err());
        assert!(decode_all(&[b"=SGVs"]).is_err());
    }

    #[test]
    fn unpadded_tail_is_accepted() {
        assert_eq!(decode_all(&[b"SGVsbG8"]).unwrap(), b"Hello");
    }

    #[test]
    fn agrees_with_reference_engine() {
        use base64::Engine;
        let engine = base64::engine::general_purpose::STANDARD;
        for payload in [&b""[..], b"a", b"ab", b"abc", b"\x00\xff\x10three full quanta.."] {
            let encoded = engine.encode(payload);
            assert_eq!(decode_all(&[encoded.as_bytes()]).unwrap(), payload);
        }
    }
}
