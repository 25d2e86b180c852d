//! Bankswitch-scheme auto-detection: a pure function of the image bytes.
//!
//! The tree keys on size first, then disambiguates with instruction-byte
//! signatures (6502 little-endian, so an absolute access to $1FF9 appears as
//! `8D F9 1F`).  The detector reports every scheme it can recognize, even
//! ones the engine does not instantiate, so the ROM loader can name the
//! scheme it is missing instead of booting garbage.

/// Count occurrences of `signature` in `image`, up to `min_hits`.
fn search_for_bytes(image: &[u8], signature: &[u8], min_hits: u32) -> bool {
    let mut count = 0;
    let mut i = 0;
    while i + signature.len() <= image.len() {
        if image[i..].starts_with(signature) {
            count += 1;
            if count >= min_hits {
                return true;
            }
            // Skip past this signature window entirely.
            i += signature.len();
        }
        i += 1;
    }
    false
}

/// Superchip carts mirror their RAM ports into the first 256 bytes of every
/// 4K bank, so those bytes are never meaningful ROM data.
fn is_probably_sc(image: &[u8]) -> bool {
    image.chunks(4096).all(|bank| {
        let first = bank[0];
        bank.iter().take(256).all(|&b| b == first)
    })
}

fn is_probably_4ksc(image: &[u8]) -> bool {
    let first = image[0];
    if !image.iter().take(256).all(|&b| b == first) {
        return false;
    }
    let n = image.len();
    image[n - 6] == b'S' && image[n - 5] == b'C'
}

fn is_probably_arm(image: &[u8]) -> bool {
    // ARM loader patterns in the first 1K.
    let head = &image[..image.len().min(1024)];
    search_for_bytes(head, &[0xA0, 0xC1, 0x1F, 0xE0], 1)
        || search_for_bytes(head, &[0x00, 0x80, 0x02, 0xE0], 1)
}

fn is_probably_0840(image: &[u8]) -> bool {
    for sig in [
        [0xAD, 0x00, 0x08], // LDA $0800
        [0xAD, 0x40, 0x08], // LDA $0840
        [0x2C, 0x00, 0x08], // BIT $0800
    ] {
        if search_for_bytes(image, &sig, 2) {
            return true;
        }
    }
    for sig in [
        [0x0C, 0x00, 0x08, 0x4C], // NOP $0800; JMP
        [0x0C, 0xFF, 0x0F, 0x4C], // NOP $0FFF; JMP
    ] {
        if search_for_bytes(image, &sig, 2) {
            return true;
        }
    }
    false
}

fn is_probably_3e(image: &[u8]) -> bool {
    // STA $3E; LDA #$00
    search_for_bytes(image, &[0x85, 0x3E, 0xA9, 0x00], 1)
}

fn is_probably_3f(image: &[u8]) -> bool {
    // STA $3F, at least twice since there are at least two banks.
    search_for_bytes(image, &[0x85, 0x3F], 2)
}

fn is_probably_4a50(image: &[u8]) -> bool {
    let n = image.len();
    // $4A50 stored at the NMI vector in the last page.
    if image[n - 6] == 0x50 && image[n - 5] == 0x4A {
        return true;
    }
    // Program starting at $1Fxx with NOP $6Exx / NOP $6Fxx.
    if n >= 0x10000 {
        let hi = image[0xFFFD] as usize;
        let lo = image[0xFFFC] as usize;
        if (hi & 0x1F) == 0x1F
            && image[hi * 256 + lo] == 0x0C
            && (image[hi * 256 + lo + 2] & 0xFE) == 0x6E
        {
            return true;
        }
    }
    false
}

fn is_probably_cty(_image: &[u8]) -> bool {
    // No known signature distinguishes CTY from the other 32K schemes; an
    // explicit type string is required.
    false
}

fn is_probably_cv(image: &[u8]) -> bool {
    // RAM access at $F3FF / $F400.
    search_for_bytes(image, &[0x9D, 0xFF, 0xF3], 1) || search_for_bytes(image, &[0x99, 0x00, 0xF4], 1)
}

fn is_probably_dpc_plus(image: &[u8]) -> bool {
    search_for_bytes(image, b"DPC+", 2)
}

fn is_probably_e0(image: &[u8]) -> bool {
    for sig in [
        [0x8D, 0xE0, 0x1F], // STA $1FE0
        [0x8D, 0xE0, 0x5F], // STA $5FE0
        [0x8D, 0xE9, 0xFF], // STA $FFE9
        [0x0C, 0xE0, 0x1F], // NOP $1FE0
        [0xAD, 0xE0, 0x1F], // LDA $1FE0
        [0xAD, 0xE9, 0xFF], // LDA $FFE9
        [0xAD, 0xED, 0xFF], // LDA $FFED
        [0xAD, 0xF3, 0xBF], // LDA $BFF3
    ] {
        if search_for_bytes(image, &sig, 1) {
            return true;
        }
    }
    false
}

fn is_probably_e7(image: &[u8]) -> bool {
    for sig in [
        [0xAD, 0xE2, 0xFF], // LDA $FFE2
        [0xAD, 0xE5, 0xFF], // LDA $FFE5
        [0xAD, 0xE5, 0x1F], // LDA $1FE5
        [0xAD, 0xE7, 0x1F], // LDA $1FE7
        [0x0C, 0xE7, 0x1F], // NOP $1FE7
        [0x8D, 0xE7, 0xFF], // STA $FFE7
        [0x8D, 0xE7, 0x1F], // STA $1FE7
    ] {
        if search_for_bytes(image, &sig, 1) {
            return true;
        }
    }
    false
}

fn is_probably_ef(image: &[u8]) -> Option<&'static str> {
    // Newer EF carts self-identify at the end of the image.
    let tail = &image[image.len() - 8..];
    if search_for_bytes(tail, b"EFEF", 1) {
        return Some("EF");
    }
    if search_for_bytes(tail, b"EFSC", 1) {
        return Some("EFSC");
    }
    let mut is_ef = false;
    for sig in [
        [0x0C, 0xE0, 0xFF], // NOP $FFE0
        [0xAD, 0xE0, 0xFF], // LDA $FFE0
        [0x0C, 0xE0, 0x1F], // NOP $1FE0
        [0xAD, 0xE0, 0x1F], // LDA $1FE0
    ] {
        if search_for_bytes(image, &sig, 1) {
            is_ef = true;
            break;
        }
    }
    if is_ef {
        Some(if is_probably_sc(image) { "EFSC" } else { "EF" })
    } else {
        None
    }
}

fn is_probably_bf(image: &[u8]) -> Option<&'static str> {
    let tail = &image[image.len() - 8..];
    if search_for_bytes(tail, b"BFBF", 1) {
        Some("BF")
    } else if search_for_bytes(tail, b"BFSC", 1) {
        Some("BFSC")
    } else {
        None
    }
}

fn is_probably_df(image: &[u8]) -> Option<&'static str> {
    let tail = &image[image.len() - 8..];
    if search_for_bytes(tail, b"DFDF", 1) {
        Some("DF")
    } else if search_for_bytes(tail, b"DFSC", 1) {
        Some("DFSC")
    } else {
        None
    }
}

fn is_probably_fa2(image: &[u8]) -> bool {
    // The 32K version carries all zeros in the 29K-32K area.
    image[29 * 1024..32 * 1024].iter().all(|&b| b == 0)
}

fn is_probably_fe(image: &[u8]) -> bool {
    for sig in [
        [0x20, 0x00, 0xD0, 0xC6, 0xC5], // JSR $D000; DEC $C5
        [0x20, 0xC3, 0xF8, 0xA5, 0x82], // JSR $F8C3; LDA $82
        [0xD0, 0xFB, 0x20, 0x73, 0xFE], // BNE $FB; JSR $FE73
        [0x20, 0x00, 0xF0, 0x84, 0xD6], // JSR $F000; STY $D6
    ] {
        if search_for_bytes(image, &sig, 1) {
            return true;
        }
    }
    false
}

fn is_probably_sb(image: &[u8]) -> bool {
    search_for_bytes(image, &[0xBD, 0x00, 0x08], 1) // LDA $0800,x
        || search_for_bytes(image, &[0xAD, 0x00, 0x08], 1) // LDA $0800
}

fn is_probably_ua(image: &[u8]) -> bool {
    for sig in [
        [0x8D, 0x40, 0x02], // STA $240
        [0xAD, 0x40, 0x02], // LDA $240
        [0xBD, 0x1F, 0x02], // LDA $21F,X
    ] {
        if search_for_bytes(image, &sig, 1) {
            return true;
        }
    }
    false
}

fn is_probably_x07(image: &[u8]) -> bool {
    for sig in [
        [0xAD, 0x0D, 0x08], // LDA $080D
        [0xAD, 0x1D, 0x08], // LDA $081D
        [0xAD, 0x2D, 0x08], // LDA $082D
        [0x0C, 0x0D, 0x08], // NOP $080D
        [0x0C, 0x1D, 0x08], // NOP $081D
        [0x0C, 0x2D, 0x08], // NOP $082D
    ] {
        if search_for_bytes(image, &sig, 1) {
            return true;
        }
    }
    false
}

/// Best-guess bankswitch scheme for an image.
pub fn autodetect(image: &[u8]) -> &'static str {
    let size = image.len();

    if size % 8448 == 0 || size == 6144 {
        "AR"
    } else if size < 2048 {
        // Sub-2K images.
        "2K"
    } else if size == 2048 || (size == 4096 && image[..2048] == image[2048..]) {
        if is_probably_cv(image) {
            "CV"
        } else {
            "2K"
        }
    } else if size == 4096 {
        if is_probably_cv(image) {
            "CV"
        } else if is_probably_4ksc(image) {
            "4KSC"
        } else {
            "4K"
        }
    } else if size == 8 * 1024 {
        // First check for *potential* F8 (STA $1FF9 twice).
        let f8 = search_for_bytes(image, &[0x8D, 0xF9, 0x1F], 2);
        if is_probably_sc(image) {
            "F8SC"
        } else if image[..4096] == image[4096..] {
            "4K"
        } else if is_probably_e0(image) {
            "E0"
        } else if is_probably_3e(image) {
            "3E"
        } else if is_probably_3f(image) {
            "3F"
        } else if is_probably_ua(image) {
            "UA"
        } else if is_probably_fe(image) && !f8 {
            "FE"
        } else if is_probably_0840(image) {
            "0840"
        } else {
            "F8"
        }
    } else if (10240..=10496).contains(&size) {
        // ~10K images are Pitfall II.
        "DPC"
    } else if size == 12 * 1024 {
        "FA"
    } else if size == 16 * 1024 {
        if is_probably_sc(image) {
            "F6SC"
        } else if is_probably_e7(image) {
            "E7"
        } else if is_probably_3e(image) {
            "3E"
        } else {
            "F6"
        }
    } else if size == 24 * 1024 || size == 28 * 1024 {
        "FA2"
    } else if size == 29 * 1024 {
        if is_probably_arm(image) {
            "FA2"
        } else {
            "DPC+"
        }
    } else if size == 32 * 1024 {
        if is_probably_sc(image) {
            "F4SC"
        } else if is_probably_3e(image) {
            "3E"
        } else if is_probably_3f(image) {
            "3F"
        } else if is_probably_dpc_plus(image) {
            "DPC+"
        } else if is_probably_cty(image) {
            "CTY"
        } else if is_probably_fa2(image) {
            "FA2"
        } else {
            "F4"
        }
    } else if size == 64 * 1024 {
        if is_probably_3e(image) {
            "3E"
        } else if is_probably_3f(image) {
            "3F"
        } else if is_probably_4a50(image) {
            "4A50"
        } else if let Some(tag) = is_probably_ef(image) {
            tag
        } else if is_probably_x07(image) {
            "X07"
        } else {
            "F0"
        }
    } else if size == 128 * 1024 {
        if is_probably_3e(image) {
            "3E"
        } else if let Some(tag) = is_probably_df(image) {
            tag
        } else if is_probably_3f(image) {
            "3F"
        } else if is_probably_4a50(image) {
            "4A50"
        } else if is_probably_sb(image) {
            "SB"
        } else {
            "MC"
        }
    } else if size == 256 * 1024 {
        if is_probably_3e(image) {
            "3E"
        } else if let Some(tag) = is_probably_bf(image) {
            tag
        } else if is_probably_3f(image) {
            "3F"
        } else {
            "SB"
        }
    } else if is_probably_3e(image) {
        "3E"
    } else if is_probably_3f(image) {
        "3F"
    } else {
        // The most common layout wins when nothing else matches.
        "4K"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_map_to_default_schemes() {
        let mut rom8k = vec![0u8; 8192];
        rom8k[300] = 0xA9; // keep halves and RAM heuristics quiet
        rom8k[4096] = 0x60;
        assert_eq!(autodetect(&rom8k), "F8");

        let mut rom16k = vec![0u8; 16384];
        rom16k[100] = 0xA9;
        assert_eq!(autodetect(&rom16k), "F6");

        let mut rom32k = vec![0u8; 32768];
        rom32k[100] = 0xA9;
        rom32k[30 * 1024] = 0x01; // not the all-zero FA2 tail
        assert_eq!(autodetect(&rom32k), "F4");

        assert_eq!(autodetect(&vec![0u8; 12288]), "FA");
        assert_eq!(autodetect(&vec![0u8; 10240]), "DPC");
        assert_eq!(autodetect(&vec![0u8; 10495]), "DPC");
    }

    #[test]
    fn supercharger_sizes() {
        assert_eq!(autodetect(&vec![0u8; 8448]), "AR");
        assert_eq!(autodetect(&vec![0u8; 3 * 8448]), "AR");
        assert_eq!(autodetect(&vec![0u8; 6144]), "AR");
    }

    #[test]
    fn mirrored_4k_detects_as_2k() {
        let mut rom = vec![0u8; 4096];
        rom[10] = 0x33;
        rom[2048 + 10] = 0x33;
        assert_eq!(autodetect(&rom), "2K");
        rom[2048 + 10] = 0x44;
        rom[0] = 0xA9; // first 256 bytes no longer uniform
        assert_eq!(autodetect(&rom), "4K");
    }

    #[test]
    fn superchip_ram_pattern_selects_sc_variants() {
        // First 256 bytes of each 4K bank identical.
        let mut rom = vec![0u8; 8192];
        rom[1000] = 1;
        rom[5000] = 2;
        assert_eq!(autodetect(&rom), "F8SC");

        let mut rom = vec![0u8; 32768];
        for bank in 0..8 {
            rom[bank * 4096 + 2000] = bank as u8 + 1;
        }
        assert_eq!(autodetect(&rom), "F4SC");
    }

    #[test]
    fn signature_3e_beats_size_default() {
        let mut rom = vec![0u8; 8192];
        rom[4096] = 0x60;
        rom[256] = 0x85;
        rom[257] = 0x3E;
        rom[258] = 0xA9;
        rom[259] = 0x00;
        assert_eq!(autodetect(&rom), "3E");
    }

    #[test]
    fn signature_3f_needs_two_hits() {
        let mut rom = vec![0u8; 8192];
        rom[4096] = 0x60;
        rom[256] = 0x85;
        rom[257] = 0x3F;
        assert_eq!(autodetect(&rom), "F8");
        rom[512] = 0x85;
        rom[513] = 0x3F;
        assert_eq!(autodetect(&rom), "3F");
    }

    #[test]
    fn signature_e0_on_8k() {
        let mut rom = vec![0u8; 8192];
        rom[4096] = 0x60;
        rom[700] = 0x8D;
        rom[701] = 0xE0;
        rom[702] = 0x1F;
        assert_eq!(autodetect(&rom), "E0");
    }

    #[test]
    fn fe_signature_loses_to_explicit_f8_stores() {
        let mut rom = vec![0u8; 8192];
        rom[4096] = 0x60;
        // JSR $D000; DEC $C5
        rom[100..105].copy_from_slice(&[0x20, 0x00, 0xD0, 0xC6, 0xC5]);
        assert_eq!(autodetect(&rom), "FE");
        // Two STA $1FF9 occurrences veto FE.
        rom[200..203].copy_from_slice(&[0x8D, 0xF9, 0x1F]);
        rom[300..303].copy_from_slice(&[0x8D, 0xF9, 0x1F]);
        assert_eq!(autodetect(&rom), "F8");
    }

    #[test]
    fn self_identifying_tags_at_image_end() {
        let mut rom = vec![0u8; 65536];
        rom[100] = 0xA9;
        let n = rom.len();
        rom[n - 8..n - 4].copy_from_slice(b"EFEF");
        assert_eq!(autodetect(&rom), "EF");
        rom[n - 8..n - 4].copy_from_slice(b"EFSC");
        assert_eq!(autodetect(&rom), "EFSC");

        let mut rom = vec![0u8; 131072];
        rom[100] = 0xA9;
        let n = rom.len();
        rom[n - 8..n - 4].copy_from_slice(b"DFSC");
        assert_eq!(autodetect(&rom), "DFSC");

        let mut rom = vec![0u8; 262144];
        rom[100] = 0xA9;
        let n = rom.len();
        rom[n - 8..n - 4].copy_from_slice(b"BFBF");
        assert_eq!(autodetect(&rom), "BF");
    }

    #[test]
    fn x07_and_sb_signatures() {
        let mut rom = vec![0u8; 65536];
        rom[100] = 0xA9;
        rom[500..503].copy_from_slice(&[0xAD, 0x0D, 0x08]);
        assert_eq!(autodetect(&rom), "X07");

        let mut rom = vec![0u8; 131072];
        rom[100] = 0xA9;
        rom[500..503].copy_from_slice(&[0xAD, 0x00, 0x08]);
        assert_eq!(autodetect(&rom), "SB");
    }

    #[test]
    fn ua_signature_on_8k() {
        let mut rom = vec![0u8; 8192];
        rom[4096] = 0x60;
        rom[800..803].copy_from_slice(&[0x8D, 0x40, 0x02]);
        assert_eq!(autodetect(&rom), "UA");
    }

    #[test]
    fn detection_is_pure() {
        let mut rom = vec![0u8; 8192];
        rom[4096] = 0x60;
        let a = autodetect(&rom);
        let b = autodetect(&rom);
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_size_falls_back_to_4k() {
        assert_eq!(autodetect(&vec![0u8; 5000]), "4K");
    }
}
