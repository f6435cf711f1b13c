//! Sign Engine: transplants the Authenticode Security Directory blob,
//! re-aligning the trailing overlay when the donor's blob is a different
//! size. Mirrors `set_sign`.

use crate::pe::sign::SignPart;

/// Splices `donor_sign_bytes` in place of the acceptor's signature blob,
/// starting at `end_of_data` (the running cursor handed down from the
/// Resource Engine, or the acceptor's own signature offset if no resources
/// were touched this run). Returns the rewritten buffer and, when the size
/// changed, the new `(offset, size)` pair for the Security Directory entry.
pub fn transplant(
    sample_data: &mut Vec<u8>,
    acceptor_sign: &SignPart,
    mut end_of_data: usize,
    donor_data: &[u8],
    donor_sign: &SignPart,
) -> Option<(u32, u32)> {
    if end_of_data < acceptor_sign.data_offset {
        end_of_data = acceptor_sign.data_offset;
    }

    let mut directory_update = None;
    if acceptor_sign.data_size != donor_sign.data_size {
        let mut overlay_size = sample_data.len() - (end_of_data + acceptor_sign.data_size as usize);
        let pad = overlay_size % 8;
        if pad > 0 {
            sample_data.extend(std::iter::repeat(0u8).take(8 - pad));
            overlay_size = sample_data.len() - (end_of_data + acceptor_sign.data_size as usize);
        }
        directory_update = Some((end_of_data as u32, donor_sign.data_size + overlay_size as u32));
    }

    let donor_bytes = donor_data[donor_sign.data_offset..donor_sign.data_offset + donor_sign.data_size as usize].to_vec();
    let tail = sample_data[end_of_data + acceptor_sign.data_size as usize..].to_vec();
    sample_data.truncate(end_of_data);
    sample_data.extend_from_slice(&donor_bytes);
    sample_data.extend_from_slice(&tail);

    directory_update
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_overlay_padding_and_rewrites_directory() {
        let mut sample = vec![0u8; 0x100];
        sample[0x50..0x50 + 5].copy_from_slice(&[1, 2, 3, 4, 5]);
        let acceptor_sign = SignPart {
            hdr_offset: 0x10,
            data_offset: 0x50,
            data_size: 5,
        };
        let donor_data = {
            let mut d = vec![0u8; 0x100];
            d[0x60..0x60 + 9].copy_from_slice(&[9u8; 9]);
            d
        };
        let donor_sign = SignPart {
            hdr_offset: 0x10,
            data_offset: 0x60,
            data_size: 9,
        };
        let update = transplant(&mut sample, &acceptor_sign, 0x50, &donor_data, &donor_sign);
        assert!(update.is_some());
        let (offset, size) = update.unwrap();
        assert_eq!(offset, 0x50);
        assert!(size >= 9);
        assert_eq!(&sample[0x50..0x50 + 9], &[9u8; 9][..]);
    }
}
