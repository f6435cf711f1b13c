//! Authenticode signature (Security Directory) and the trailing overlay.

use crate::pe::section::Section;
use crate::util::read_u32;

#[derive(Debug, Clone, Copy)]
pub struct SignPart {
    pub hdr_offset: usize,
    pub data_offset: usize,
    pub data_size: u32,
}

/// Mirrors `get_sign`. Returns `None` when the Security Directory slot is
/// empty (the common case, not an error).
pub fn read_sign(data: &[u8], hdr_offset: usize, eof: usize) -> Option<SignPart> {
    let sign_offset = read_u32(data, hdr_offset)? as usize;
    let sign_size = read_u32(data, hdr_offset + 4)?;
    if sign_offset > 0 && sign_offset < eof && sign_size > 0 && (sign_size as usize) < eof {
        Some(SignPart {
            hdr_offset,
            data_offset: sign_offset,
            data_size: sign_size,
        })
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OverlayPart {
    pub data_offset: usize,
    pub data_size: usize,
}

/// Mirrors `get_overlay`: everything past the last section's raw region, or
/// past the signature blob when one is present.
pub fn read_overlay(sign: Option<&SignPart>, data_len: usize, sections: &[Section]) -> Option<OverlayPart> {
    let last_offset = match sign {
        Some(s) => s.data_offset + s.data_size as usize,
        None => sections
            .iter()
            .map(|s| s.raddr as usize + s.rsize as usize)
            .max()
            .unwrap_or(0),
    };
    let size = data_len.saturating_sub(last_offset);
    if size > 0 {
        Some(OverlayPart {
            data_offset: last_offset,
            data_size: size,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_signature_slot() {
        let mut data = vec![0u8; 0x200];
        data[0x10..0x14].copy_from_slice(&0x100u32.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&0x50u32.to_le_bytes());
        let sign = read_sign(&data, 0x10, 0x200).unwrap();
        assert_eq!(sign.data_offset, 0x100);
        assert_eq!(sign.data_size, 0x50);
    }

    #[test]
    fn overlay_after_signature() {
        let sign = SignPart {
            hdr_offset: 0,
            data_offset: 0x100,
            data_size: 0x50,
        };
        let overlay = read_overlay(Some(&sign), 0x200, &[]).unwrap();
        assert_eq!(overlay.data_offset, 0x150);
        assert_eq!(overlay.data_size, 0xb0);
    }
}
