//! Quantization codecs: FP32 (lossless), INT8 (symmetric), INT4 (asymmetric).
//!
//! Each codec packs one flattened tensor. Scales are stored as little-endian
//! `f32`, and the same rounded scale is used on both sides so encode and
//! decode stay consistent. Degenerate tensors (all zero, or zero range) map
//! to exact values on decode, never NaN.

use super::{Quant, WeightsError};

fn push_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn read_f32(bytes: &[u8]) -> f32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    f32::from_le_bytes(buf)
}

/// Packs a flattened tensor under the chosen codec.
pub(crate) fn quantize(weights: &[f64], quant: Quant) -> Vec<u8> {
    match quant {
        Quant::Fp32 => {
            let mut out = Vec::with_capacity(4 * weights.len());
            for &w in weights {
                push_f32(&mut out, w as f32);
            }
            out
        }
        Quant::Int8 => {
            let max_abs = weights.iter().fold(0.0f64, |acc, &w| acc.max(w.abs()));
            let scale = (max_abs / 127.0) as f32;
            let s = f64::from(scale);
            let mut out = Vec::with_capacity(4 + weights.len());
            push_f32(&mut out, scale);
            for &w in weights {
                let q = if s == 0.0 {
                    0
                } else {
                    (w / s).round().clamp(-128.0, 127.0) as i8
                };
                out.push(q as u8);
            }
            out
        }
        Quant::Int4 => {
            let min = weights.iter().copied().fold(f64::INFINITY, f64::min) as f32;
            let max = weights.iter().copied().fold(f64::NEG_INFINITY, f64::max) as f32;
            let range = f64::from(max) - f64::from(min);
            let code = |w: f64| -> u8 {
                if range == 0.0 {
                    0
                } else {
                    (((w - f64::from(min)) / range) * 15.0)
                        .round()
                        .clamp(0.0, 15.0) as u8
                }
            };
            let mut out = Vec::with_capacity(8 + weights.len().div_ceil(2));
            push_f32(&mut out, min);
            push_f32(&mut out, max);
            for pair in weights.chunks(2) {
                let hi = code(pair[0]);
                // Odd tails are padded with the minimum (code 0).
                let lo = if pair.len() == 2 { code(pair[1]) } else { 0 };
                out.push((hi << 4) | lo);
            }
            out
        }
    }
}

/// Unpacks `expected` weights from a codec blob.
pub(crate) fn dequantize(
    blob: &[u8],
    expected: usize,
    quant: Quant,
) -> Result<Vec<f64>, WeightsError> {
    match quant {
        Quant::Fp32 => {
            if blob.len() < 4 * expected {
                return Err(WeightsError::Truncated);
            }
            Ok(blob
                .chunks_exact(4)
                .take(expected)
                .map(|c| f64::from(read_f32(c)))
                .collect())
        }
        Quant::Int8 => {
            if blob.len() < 4 + expected {
                return Err(WeightsError::Truncated);
            }
            let scale = f64::from(read_f32(blob));
            Ok(blob[4..4 + expected]
                .iter()
                .map(|&b| f64::from(b as i8) * scale)
                .collect())
        }
        Quant::Int4 => {
            if blob.len() < 8 + expected.div_ceil(2) {
                return Err(WeightsError::Truncated);
            }
            let min = f64::from(read_f32(blob));
            let max = f64::from(read_f32(&blob[4..]));
            let range = max - min;
            let mut out = Vec::with_capacity(expected + 1);
            for &byte in &blob[8..8 + expected.div_ceil(2)] {
                let hi = (byte >> 4) & 0x0f;
                let lo = byte & 0x0f;
                out.push(min + f64::from(hi) / 15.0 * range);
                out.push(min + f64::from(lo) / 15.0 * range);
            }
            out.truncate(expected);
            Ok(out)
        }
    }
}
