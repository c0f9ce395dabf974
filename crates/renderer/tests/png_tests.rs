//! Tests for PNG encoding of ARGB images.
//!
//! The encoded streams are parsed back chunk by chunk so pixel data can be
//! compared against the source image.

use flate2::read::ZlibDecoder;
use renderer::png::encode_argb;
use std::io::Read;
use test_utils::{create_argb_gradient, create_argb_palette_image};

// ============================================================================
// Helper functions
// ============================================================================

struct Chunk {
    kind: [u8; 4],
    data: Vec<u8>,
}

fn read_chunks(png: &[u8]) -> Vec<Chunk> {
    assert_eq!(&png[0..8], &[137, 80, 78, 71, 13, 10, 26, 10]);
    let mut chunks = Vec::new();
    let mut pos = 8;
    while pos < png.len() {
        let len = u32::from_be_bytes([png[pos], png[pos + 1], png[pos + 2], png[pos + 3]]) as usize;
        let mut kind = [0u8; 4];
        kind.copy_from_slice(&png[pos + 4..pos + 8]);
        let data = png[pos + 8..pos + 8 + len].to_vec();

        let crc = u32::from_be_bytes([
            png[pos + 8 + len],
            png[pos + 9 + len],
            png[pos + 10 + len],
            png[pos + 11 + len],
        ]);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&kind);
        hasher.update(&data);
        assert_eq!(hasher.finalize(), crc, "bad CRC in {:?}", std::str::from_utf8(&kind));

        chunks.push(Chunk { kind, data });
        pos += 12 + len;
    }
    chunks
}

fn chunk<'a>(chunks: &'a [Chunk], kind: &[u8; 4]) -> Option<&'a Chunk> {
    chunks.iter().find(|c| &c.kind == kind)
}

/// Decode an encoded image back into ARGB words.
fn decode(png: &[u8]) -> (usize, usize, Vec<u32>) {
    let chunks = read_chunks(png);
    let ihdr = &chunk(&chunks, b"IHDR").unwrap().data;
    let width = u32::from_be_bytes([ihdr[0], ihdr[1], ihdr[2], ihdr[3]]) as usize;
    let height = u32::from_be_bytes([ihdr[4], ihdr[5], ihdr[6], ihdr[7]]) as usize;
    let color_type = ihdr[9];

    let mut raw = Vec::new();
    ZlibDecoder::new(&chunk(&chunks, b"IDAT").unwrap().data[..])
        .read_to_end(&mut raw)
        .unwrap();

    let mut image = Vec::with_capacity(width * height);
    match color_type {
        3 => {
            let plte = &chunk(&chunks, b"PLTE").unwrap().data;
            let trns = chunk(&chunks, b"tRNS").map(|c| c.data.clone());
            for row in raw.chunks_exact(width + 1) {
                assert_eq!(row[0], 0);
                for &idx in &row[1..] {
                    let i = idx as usize;
                    let a = trns.as_ref().map_or(255, |t| t.get(i).copied().unwrap_or(255)) as u32;
                    let (r, g, b) = (plte[i * 3] as u32, plte[i * 3 + 1] as u32, plte[i * 3 + 2] as u32);
                    image.push((a << 24) | (r << 16) | (g << 8) | b);
                }
            }
        }
        6 => {
            for row in raw.chunks_exact(width * 4 + 1) {
                assert_eq!(row[0], 0);
                for px in row[1..].chunks_exact(4) {
                    let [r, g, b, a] = [px[0] as u32, px[1] as u32, px[2] as u32, px[3] as u32];
                    image.push((a << 24) | (r << 16) | (g << 8) | b);
                }
            }
        }
        other => panic!("unexpected colour type {}", other),
    }
    (width, height, image)
}

fn color_type(png: &[u8]) -> u8 {
    png[25]
}

// ============================================================================
// Format selection
// ============================================================================

#[test]
fn test_palette_image_is_indexed() {
    let image = create_argb_palette_image(128, 96);
    let png = encode_argb(&image, 128, 96, 1).unwrap();
    assert_eq!(color_type(&png), 3);

    let chunks = read_chunks(&png);
    let plte = chunk(&chunks, b"PLTE").unwrap();
    assert!(plte.data.len() <= 20 * 3);
    assert!(chunk(&chunks, b"tRNS").is_none(), "opaque images need no tRNS");
}

#[test]
fn test_gradient_image_is_rgba() {
    let image = create_argb_gradient(256, 64);
    let png = encode_argb(&image, 256, 64, 1).unwrap();
    assert_eq!(color_type(&png), 6);
}

#[test]
fn test_exactly_256_colors_is_indexed() {
    let image: Vec<u32> = (0..256u32).map(|i| 0xFF00_0000 | i).collect();
    let png = encode_argb(&image, 16, 16, 1).unwrap();
    assert_eq!(color_type(&png), 3);

    let image: Vec<u32> = (0..257u32).map(|i| 0xFF00_0000 | i).collect();
    let png = encode_argb(&image, 257, 1, 1).unwrap();
    assert_eq!(color_type(&png), 6);
}

// ============================================================================
// Pixel fidelity
// ============================================================================

#[test]
fn test_indexed_roundtrip_preserves_pixels() {
    let image = create_argb_palette_image(100, 80);
    let (w, h, decoded) = decode(&encode_argb(&image, 100, 80, 6).unwrap());
    assert_eq!((w, h), (100, 80));
    assert_eq!(decoded, image);
}

#[test]
fn test_rgba_roundtrip_preserves_pixels() {
    let image = create_argb_gradient(300, 40);
    let (_, _, decoded) = decode(&encode_argb(&image, 300, 40, 9).unwrap());
    assert_eq!(decoded, image);
}

#[test]
fn test_translucent_pixels_keep_alpha() {
    let mut image = vec![0x0000_0000u32; 64 * 64];
    for (i, px) in image.iter_mut().enumerate() {
        if i % 3 == 0 {
            *px = 0x80FF_0000;
        }
    }
    let png = encode_argb(&image, 64, 64, 1).unwrap();
    let chunks = read_chunks(&png);
    assert!(chunk(&chunks, b"tRNS").is_some());

    let (_, _, decoded) = decode(&png);
    assert_eq!(decoded, image);
}

#[test]
fn test_compression_levels_decode_identically() {
    let image = create_argb_palette_image(64, 64);
    let fast = encode_argb(&image, 64, 64, 0).unwrap();
    let best = encode_argb(&image, 64, 64, 9).unwrap();
    let clamped = encode_argb(&image, 64, 64, 42).unwrap();

    assert!(best.len() <= fast.len());
    assert_eq!(decode(&fast).2, decode(&best).2);
    assert_eq!(best, clamped);
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_rejects_bad_dimensions() {
    assert!(encode_argb(&[0xFFFF_FFFF; 10], 3, 3, 1).is_err());
    assert!(encode_argb(&[], 0, 10, 1).is_err());
}
