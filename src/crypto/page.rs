use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};

use super::keys::PageKey;
use crate::{
    config::{IV_SIZE, PageLayout},
    error::{Error, Result},
};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// Decrypt one raw page into `out`.
///
/// Layout of a raw page:
/// ```text
/// [ salt (page 0 only) | AES-256-CBC ciphertext | reserve .. IV ]
/// ```
///
/// The IV is taken from the page's own reserve region and the reserve is
/// copied through unchanged after the payload. Page 0 is served according
/// to [`Page0Placement`](crate::config::Page0Placement): either shifted to
/// offset 0 with a zero tail, or in place with the salt span zeroed.
pub fn decrypt_page(
    raw: &[u8],
    out: &mut [u8],
    key: &PageKey,
    layout: &PageLayout,
    page_index: u64,
) -> Result<()> {
    check_page_len(raw.len(), out.len(), layout, page_index)?;

    let first = page_index == 0;
    let start = layout.cipher_start(first);
    let end = start + layout.cipher_len(first);
    let dst = layout.plain_start(first);
    let dst_end = dst + (end - start);
    let reserve_end = dst_end + layout.reserve_size;
    let iv = &raw[layout.iv_range()];

    let cipher = Aes256CbcDec::new_from_slices(key.as_bytes(), iv).map_err(|e| Error::Cipher {
        page: page_index,
        reason: e.to_string(),
    })?;
    cipher
        .decrypt_padded_b2b_mut::<NoPadding>(&raw[start..end], &mut out[dst..dst_end])
        .map_err(|e| Error::Cipher {
            page: page_index,
            reason: e.to_string(),
        })?;

    out[dst_end..reserve_end].copy_from_slice(&raw[end..]);
    out[reserve_end..].fill(0);
    out[..dst].fill(0);
    Ok(())
}

/// Encrypt one served-form page into `out`, embedding `iv` in the reserve.
///
/// Inverse of [`decrypt_page`]: `plain` is laid out the way the shim serves
/// it, and the span `decrypt_page` zero-fills on page 0 supplies the salt.
/// The shim itself never writes; this exists to build fixtures and for
/// tooling that produces files in the same format.
pub fn encrypt_page(
    plain: &[u8],
    out: &mut [u8],
    key: &PageKey,
    iv: &[u8; IV_SIZE],
    layout: &PageLayout,
    page_index: u64,
) -> Result<()> {
    check_page_len(plain.len(), out.len(), layout, page_index)?;

    let first = page_index == 0;
    let start = layout.cipher_start(first);
    let end = start + layout.cipher_len(first);
    let dst = layout.plain_start(first);
    let dst_end = dst + (end - start);
    let reserve_end = dst_end + layout.reserve_size;

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), iv).map_err(|e| Error::Cipher {
        page: page_index,
        reason: e.to_string(),
    })?;
    cipher
        .encrypt_padded_b2b_mut::<NoPadding>(&plain[dst..dst_end], &mut out[start..end])
        .map_err(|e| Error::Cipher {
            page: page_index,
            reason: e.to_string(),
        })?;

    let salt = if dst > 0 { &plain[..dst] } else { &plain[reserve_end..] };
    out[..start].copy_from_slice(salt);
    out[end..].copy_from_slice(&plain[dst_end..reserve_end]);
    out[layout.iv_range()].copy_from_slice(iv);
    Ok(())
}

fn check_page_len(input: usize, output: usize, layout: &PageLayout, page: u64) -> Result<()> {
    if input != layout.page_size || output != layout.page_size {
        return Err(Error::Cipher {
            page,
            reason: format!(
                "buffer sizes {input}/{output} do not match page size {}",
                layout.page_size
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IvPosition, Page0Placement};

    fn key(seed: u8) -> PageKey {
        PageKey::from_bytes([seed; 32])
    }

    fn plain_page(layout: &PageLayout, fill: u8) -> Vec<u8> {
        let mut page = vec![fill; layout.page_size];
        let reserve_start = layout.page_size - layout.reserve_size;
        page[reserve_start..].fill(0x5A);
        page
    }

    #[test]
    fn decrypts_inner_page() {
        let layout = PageLayout::default();
        let plain = plain_page(&layout, 0xAB);
        let iv = [7u8; 16];
        let mut raw = vec![0u8; layout.page_size];
        encrypt_page(&plain, &mut raw, &key(1), &iv, &layout, 3).unwrap();
        assert_ne!(&raw[..100], &plain[..100]);

        let mut out = vec![0u8; layout.page_size];
        decrypt_page(&raw, &mut out, &key(1), &layout, 3).unwrap();
        assert_eq!(&out[..4016], &plain[..4016]);
        // Reserve is copied through, IV included.
        assert_eq!(&out[4016..], &raw[4016..]);
        assert_eq!(&out[4080..], &iv);
    }

    #[test]
    fn first_page_is_shifted_over_the_salt() {
        let layout = PageLayout::default();
        let mut plain = plain_page(&layout, 0x11);
        plain[..16].copy_from_slice(b"SQLite format 3\0");
        plain[4080..].copy_from_slice(b"0123456789abcdef");
        let iv = [3u8; 16];
        let mut raw = vec![0u8; layout.page_size];
        encrypt_page(&plain, &mut raw, &key(2), &iv, &layout, 0).unwrap();
        assert_eq!(&raw[..16], b"0123456789abcdef");
        assert_eq!(&raw[4016..4080], &plain[4000..4064]);

        let mut out = vec![0xFFu8; layout.page_size];
        decrypt_page(&raw, &mut out, &key(2), &layout, 0).unwrap();
        assert_eq!(&out[..4000], &plain[..4000]);
        assert_eq!(&out[4000..4080], &raw[4016..]);
        assert_eq!(&out[4064..4080], &iv);
        assert_eq!(&out[4080..], &[0u8; 16]);
    }

    #[test]
    fn first_page_in_place_zeroes_salt() {
        let layout = PageLayout {
            page0: Page0Placement::InPlace,
            ..PageLayout::default()
        };
        let mut plain = plain_page(&layout, 0x11);
        plain[..16].copy_from_slice(b"0123456789abcdef");
        let mut raw = vec![0u8; layout.page_size];
        encrypt_page(&plain, &mut raw, &key(2), &[3u8; 16], &layout, 0).unwrap();
        assert_eq!(&raw[..16], b"0123456789abcdef");

        let mut out = vec![0xFFu8; layout.page_size];
        decrypt_page(&raw, &mut out, &key(2), &layout, 0).unwrap();
        assert_eq!(&out[..16], &[0u8; 16]);
        assert_eq!(&out[16..4016], &plain[16..4016]);
        assert_eq!(&out[4016..], &raw[4016..]);
    }

    #[test]
    fn iv_comes_from_the_page_itself() {
        let layout = PageLayout::default();
        let plain = plain_page(&layout, 0x42);
        let mut a = vec![0u8; layout.page_size];
        let mut b = vec![0u8; layout.page_size];
        encrypt_page(&plain, &mut a, &key(9), &[1u8; 16], &layout, 1).unwrap();
        encrypt_page(&plain, &mut b, &key(9), &[2u8; 16], &layout, 1).unwrap();
        assert_ne!(&a[..4016], &b[..4016]);

        let mut out_a = vec![0u8; layout.page_size];
        let mut out_b = vec![0u8; layout.page_size];
        decrypt_page(&a, &mut out_a, &key(9), &layout, 1).unwrap();
        decrypt_page(&b, &mut out_b, &key(9), &layout, 1).unwrap();
        assert_eq!(&out_a[..4016], &out_b[..4016]);
    }

    #[test]
    fn reserve_head_layout_round_trips() {
        let layout = PageLayout {
            iv_position: IvPosition::ReserveHead,
            ..PageLayout::default()
        };
        let plain = plain_page(&layout, 0x33);
        let mut raw = vec![0u8; layout.page_size];
        encrypt_page(&plain, &mut raw, &key(4), &[8u8; 16], &layout, 2).unwrap();
        assert_eq!(&raw[4016..4032], &[8u8; 16]);

        let mut out = vec![0u8; layout.page_size];
        decrypt_page(&raw, &mut out, &key(4), &layout, 2).unwrap();
        assert_eq!(&out[..4016], &plain[..4016]);
    }

    #[test]
    fn wrong_key_yields_different_plaintext() {
        let layout = PageLayout::default();
        let plain = plain_page(&layout, 0x77);
        let mut raw = vec![0u8; layout.page_size];
        encrypt_page(&plain, &mut raw, &key(5), &[0u8; 16], &layout, 1).unwrap();

        let mut out = vec![0u8; layout.page_size];
        decrypt_page(&raw, &mut out, &key(6), &layout, 1).unwrap();
        assert_ne!(&out[..4016], &plain[..4016]);
    }

    #[test]
    fn misaligned_span_is_a_cipher_error() {
        let layout = PageLayout {
            reserve_size: 81,
            ..PageLayout::default()
        };
        let raw = vec![0u8; layout.page_size];
        let mut out = vec![0u8; layout.page_size];
        let err = decrypt_page(&raw, &mut out, &key(1), &layout, 1).unwrap_err();
        assert!(matches!(err, Error::Cipher { page: 1, .. }));
    }

    #[test]
    fn wrong_buffer_size_is_a_cipher_error() {
        let layout = PageLayout::default();
        let raw = vec![0u8; 1024];
        let mut out = vec![0u8; layout.page_size];
        assert!(decrypt_page(&raw, &mut out, &key(1), &layout, 0).is_err());
    }
}
