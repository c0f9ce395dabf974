//! PNG encoding for ARGB images.
//!
//! Supports two encoding modes:
//! - **Indexed PNG (color type 3)**: Used when image has ≤256 unique colors.
//!   Produces smaller files and encodes faster.
//! - **RGBA PNG (color type 6)**: Fallback for images with >256 colors.
//!
//! Pixels are `0xAARRGGBB` words in row-major top-down order, the layout
//! produced by the raster painters.

use map_common::{RenderError, RenderResult};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::io::Write;

/// Maximum colors for indexed PNG (PNG8)
const MAX_PALETTE_SIZE: usize = 256;

/// Minimum pixels to benefit from parallel palette extraction
const PARALLEL_THRESHOLD: usize = 4096; // 64x64 or larger

const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

/// Encode an ARGB image, choosing indexed colour when the palette fits.
///
/// `compression` is the zlib level 0-9; larger values are clamped.
pub fn encode_argb(image: &[u32], width: usize, height: usize, compression: u32) -> RenderResult<Vec<u8>> {
    if width == 0 || height == 0 {
        return Err(RenderError::data("Cannot encode an empty image")
            .with_param("width", width)
            .with_param("height", height));
    }
    if image.len() != width * height {
        return Err(RenderError::data("Image size does not match its dimensions")
            .with_param("pixels", image.len())
            .with_param("width", width)
            .with_param("height", height));
    }
    let level = flate2::Compression::new(compression.min(9));

    let palette = if image.len() >= PARALLEL_THRESHOLD {
        extract_palette_parallel(image)
    } else {
        extract_palette_sequential(image)
    };

    let png = match palette {
        Some((palette, indices)) => create_png_indexed(width, height, &palette, &indices, level),
        None => create_png_rgba(image, width, height, level),
    }
    .map_err(|e| RenderError::internal("PNG compression failed").with_param("reason", e))?;

    tracing::trace!(width, height, bytes = png.len(), "encoded PNG");
    Ok(png)
}

/// Sequential palette extraction for small images.
fn extract_palette_sequential(image: &[u32]) -> Option<(Vec<u32>, Vec<u8>)> {
    let mut color_to_index: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette: Vec<u32> = Vec::with_capacity(MAX_PALETTE_SIZE);
    let mut indices: Vec<u8> = Vec::with_capacity(image.len());

    for &color in image {
        let index = match color_to_index.get(&color) {
            Some(&idx) => idx,
            None => {
                if palette.len() >= MAX_PALETTE_SIZE {
                    return None;
                }
                let idx = palette.len() as u8;
                palette.push(color);
                color_to_index.insert(color, idx);
                idx
            }
        };
        indices.push(index);
    }

    Some((palette, indices))
}

/// Parallel palette extraction for larger images.
///
/// Unique colours are first collected per chunk in scan order, then merged
/// chunk by chunk, and finally every pixel is mapped to its palette index in
/// parallel. The palette comes out in first-seen order, the same as the
/// sequential scan.
fn extract_palette_parallel(image: &[u32]) -> Option<(Vec<u32>, Vec<u8>)> {
    let chunk_size = (image.len() / rayon::current_num_threads()).max(256);

    let chunk_colors: Vec<Vec<u32>> = image
        .par_chunks(chunk_size)
        .map(|chunk| {
            let mut seen: HashSet<u32> = HashSet::with_capacity(MAX_PALETTE_SIZE);
            let mut ordered = Vec::with_capacity(MAX_PALETTE_SIZE);
            for &color in chunk {
                if seen.insert(color) {
                    ordered.push(color);
                    if ordered.len() > MAX_PALETTE_SIZE {
                        break;
                    }
                }
            }
            ordered
        })
        .collect();

    let mut global: HashMap<u32, u8> = HashMap::with_capacity(MAX_PALETTE_SIZE);
    let mut palette: Vec<u32> = Vec::with_capacity(MAX_PALETTE_SIZE);
    for color in chunk_colors.into_iter().flatten() {
        if !global.contains_key(&color) {
            if palette.len() >= MAX_PALETTE_SIZE {
                return None;
            }
            global.insert(color, palette.len() as u8);
            palette.push(color);
        }
    }

    let indices: Vec<u8> = image
        .par_iter()
        .map(|c| global.get(c).copied().unwrap_or(0))
        .collect();

    Some((palette, indices))
}

fn argb_channels(c: u32) -> (u8, u8, u8, u8) {
    ((c >> 24) as u8, (c >> 16) as u8, (c >> 8) as u8, c as u8)
}

fn write_header(png: &mut Vec<u8>, width: usize, height: usize, color_type: u8) {
    png.extend_from_slice(&SIGNATURE);
    let mut ihdr = Vec::with_capacity(13);
    ihdr.extend_from_slice(&(width as u32).to_be_bytes());
    ihdr.extend_from_slice(&(height as u32).to_be_bytes());
    ihdr.push(8); // bit depth
    ihdr.push(color_type);
    ihdr.push(0); // compression method
    ihdr.push(0); // filter method
    ihdr.push(0); // interlace method
    write_chunk(png, b"IHDR", &ihdr);
}

/// Indexed PNG (color type 3) with a tRNS chunk when any colour is translucent.
fn create_png_indexed(
    width: usize,
    height: usize,
    palette: &[u32],
    indices: &[u8],
    level: flate2::Compression,
) -> std::io::Result<Vec<u8>> {
    let mut png = Vec::new();
    write_header(&mut png, width, height, 3);

    let mut plte = Vec::with_capacity(palette.len() * 3);
    for &c in palette {
        let (_, r, g, b) = argb_channels(c);
        plte.extend_from_slice(&[r, g, b]);
    }
    write_chunk(&mut png, b"PLTE", &plte);

    if palette.iter().any(|&c| argb_channels(c).0 < 255) {
        let trns: Vec<u8> = palette.iter().map(|&c| argb_channels(c).0).collect();
        write_chunk(&mut png, b"tRNS", &trns);
    }

    let mut raw = Vec::with_capacity(height * (1 + width));
    for row in indices.chunks_exact(width) {
        raw.push(0); // filter type: none
        raw.extend_from_slice(row);
    }
    write_chunk(&mut png, b"IDAT", &deflate(&raw, level)?);
    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

/// Full colour PNG (color type 6).
fn create_png_rgba(
    image: &[u32],
    width: usize,
    height: usize,
    level: flate2::Compression,
) -> std::io::Result<Vec<u8>> {
    let mut png = Vec::new();
    write_header(&mut png, width, height, 6);

    let mut raw = Vec::with_capacity(height * (1 + width * 4));
    for row in image.chunks_exact(width) {
        raw.push(0);
        for &c in row {
            let (a, r, g, b) = argb_channels(c);
            raw.extend_from_slice(&[r, g, b, a]);
        }
    }
    write_chunk(&mut png, b"IDAT", &deflate(&raw, level)?);
    write_chunk(&mut png, b"IEND", &[]);
    Ok(png)
}

fn deflate(raw: &[u8], level: flate2::Compression) -> std::io::Result<Vec<u8>> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), level);
    encoder.write_all(raw)?;
    encoder.finish()
}

fn write_chunk(png: &mut Vec<u8>, chunk_type: &[u8; 4], data: &[u8]) {
    png.extend_from_slice(&(data.len() as u32).to_be_bytes());
    png.extend_from_slice(chunk_type);
    png.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(chunk_type);
    hasher.update(data);
    png.extend_from_slice(&hasher.finalize().to_be_bytes());
}
