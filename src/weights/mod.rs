//! Persisted weight format: the `GPT1` binary layout with selectable
//! quantization.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic    b"GPT1"
//! version  u8 (currently 2)
//! meta_len u32, then the settings JSON
//! quant    u8 (0 = FP32, 1 = INT8, 2 = INT4)
//! count    u32 (number of named tensors)
//! index    per tensor: name_len u16 + name, dims u8, dim u32 × dims,
//!          data_len u32
//! blob     concatenated packed tensor data, in index order
//! ```
//!
//! [`load`] verifies the magic, version, and quantization byte up front and
//! rebuilds the [`StateDict`] against the embedded [`Settings`], failing
//! loudly on any inconsistency.

mod codec;
mod error;

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::model::{Matrix, Settings, StateDict};

pub use error::WeightsError;

const MAGIC: &[u8; 4] = b"GPT1";
const VERSION: u8 = 2;

/// Quantization kinds for persisted weights.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quant {
    /// Raw little-endian `f32`, 4 bytes per weight (lossless at f32).
    Fp32,
    /// Per-tensor symmetric scale, one signed byte per weight.
    Int8,
    /// Per-tensor min/max, two 4-bit codes per byte.
    Int4,
}

impl Quant {
    /// The byte written into the file header.
    #[must_use]
    pub fn byte(self) -> u8 {
        match self {
            Quant::Fp32 => 0,
            Quant::Int8 => 1,
            Quant::Int4 => 2,
        }
    }

    /// Decodes a header byte; `None` for unknown codecs.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Quant::Fp32),
            1 => Some(Quant::Int8),
            2 => Some(Quant::Int4),
            _ => None,
        }
    }
}

impl FromStr for Quant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fp32" => Ok(Quant::Fp32),
            "int8" => Ok(Quant::Int8),
            "int4" => Ok(Quant::Int4),
            other => Err(format!("unknown quantization {other:?} (expected fp32, int8 or int4)")),
        }
    }
}

impl fmt::Display for Quant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Quant::Fp32 => "fp32",
            Quant::Int8 => "int8",
            Quant::Int4 => "int4",
        })
    }
}

/// Saves the parameters and their settings under the chosen quantization.
///
/// # Errors
///
/// [`WeightsError::Io`] on write failure, [`WeightsError::BadSettings`] if
/// the settings fail to serialize.
pub fn save(
    path: impl AsRef<Path>,
    settings: &Settings,
    params: &StateDict,
    quant: Quant,
) -> Result<(), WeightsError> {
    let meta = serde_json::to_vec(settings).map_err(WeightsError::BadSettings)?;

    let mut header = Vec::new();
    header.extend_from_slice(MAGIC);
    header.push(VERSION);
    header.extend_from_slice(&(meta.len() as u32).to_le_bytes());
    header.extend_from_slice(&meta);
    header.push(quant.byte());

    let tensors = params.tensors();
    header.extend_from_slice(&(tensors.len() as u32).to_le_bytes());

    let mut blob = Vec::new();
    for (name, m) in &tensors {
        let rows = m.len();
        let cols = m.first().map_or(0, Vec::len);
        let flat: Vec<f64> = m.iter().flatten().copied().collect();
        let packed = codec::quantize(&flat, quant);

        header.extend_from_slice(&(name.len() as u16).to_le_bytes());
        header.extend_from_slice(name.as_bytes());
        header.push(2);
        header.extend_from_slice(&(rows as u32).to_le_bytes());
        header.extend_from_slice(&(cols as u32).to_le_bytes());
        header.extend_from_slice(&(packed.len() as u32).to_le_bytes());
        blob.extend_from_slice(&packed);
    }

    header.extend_from_slice(&blob);
    fs::write(path, header)?;
    Ok(())
}

/// Loads settings and parameters from a weight file.
///
/// # Errors
///
/// [`WeightsError::NotFound`] when the file is missing; the format errors
/// documented on [`WeightsError`] when the content is inconsistent.
pub fn load(path: impl AsRef<Path>) -> Result<(Settings, StateDict), WeightsError> {
    let bytes = match fs::read(path.as_ref()) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(WeightsError::NotFound(path.as_ref().to_path_buf()))
        }
        Err(e) => return Err(WeightsError::Io(e)),
    };
    let mut r = Reader::new(&bytes);

    let magic = r.take(4)?;
    if magic != MAGIC.as_slice() {
        let mut m = [0u8; 4];
        m.copy_from_slice(magic);
        return Err(WeightsError::BadMagic(m));
    }
    let version = r.u8()?;
    if version != VERSION {
        return Err(WeightsError::UnsupportedVersion(version));
    }
    let meta_len = r.u32()? as usize;
    let settings: Settings =
        serde_json::from_slice(r.take(meta_len)?).map_err(WeightsError::BadSettings)?;
    let quant_byte = r.u8()?;
    let quant = Quant::from_byte(quant_byte).ok_or(WeightsError::UnknownQuant(quant_byte))?;
    let count = r.u32()? as usize;

    let mut index = Vec::with_capacity(count);
    for _ in 0..count {
        let name_len = r.u16()? as usize;
        let name = String::from_utf8_lossy(r.take(name_len)?).into_owned();
        let dims_count = r.u8()? as usize;
        let mut dims = Vec::with_capacity(dims_count);
        for _ in 0..dims_count {
            dims.push(r.u32()? as usize);
        }
        let data_len = r.u32()? as usize;
        index.push((name, dims, data_len));
    }

    let mut tensors: HashMap<String, (Vec<usize>, Vec<f64>)> = HashMap::new();
    for (name, dims, data_len) in index {
        let packed = r.take(data_len)?;
        let expected: usize = dims.iter().product();
        let flat = codec::dequantize(packed, expected, quant)?;
        tensors.insert(name, (dims, flat));
    }

    let params = assemble(&settings, &mut tensors)?;
    Ok((settings, params))
}

/// Byte-slice cursor used by [`load`].
struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, off: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WeightsError> {
        if self.off + n > self.buf.len() {
            return Err(WeightsError::Truncated);
        }
        let s = &self.buf[self.off..self.off + n];
        self.off += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, WeightsError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WeightsError> {
        let mut b = [0u8; 2];
        b.copy_from_slice(self.take(2)?);
        Ok(u16::from_le_bytes(b))
    }

    fn u32(&mut self) -> Result<u32, WeightsError> {
        let mut b = [0u8; 4];
        b.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(b))
    }
}

fn take_tensor(
    tensors: &mut HashMap<String, (Vec<usize>, Vec<f64>)>,
    name: &str,
    rows: usize,
    cols: usize,
) -> Result<Matrix, WeightsError> {
    let (dims, flat) = tensors
        .remove(name)
        .ok_or_else(|| WeightsError::MissingTensor(name.to_string()))?;
    if dims != [rows, cols] {
        return Err(WeightsError::ShapeMismatch {
            name: name.to_string(),
            expected: vec![rows, cols],
            found: dims,
        });
    }
    Ok(flat.chunks(cols).map(<[f64]>::to_vec).collect())
}

fn assemble(
    settings: &Settings,
    tensors: &mut HashMap<String, (Vec<usize>, Vec<f64>)>,
) -> Result<StateDict, WeightsError> {
    let e = settings.n_embed;
    let wte = take_tensor(tensors, "wte", settings.vocab_size, e)?;
    let wpe = take_tensor(tensors, "wpe", settings.block_size, e)?;
    let lm_head = take_tensor(tensors, "lm_head", settings.vocab_size, e)?;
    let mut layers = Vec::with_capacity(settings.n_layer);
    for i in 0..settings.n_layer {
        layers.push(crate::model::LayerWeights {
            attn_wq: take_tensor(tensors, &format!("layer{i}.attn_wq"), e, e)?,
            attn_wk: take_tensor(tensors, &format!("layer{i}.attn_wk"), e, e)?,
            attn_wv: take_tensor(tensors, &format!("layer{i}.attn_wv"), e, e)?,
            attn_wo: take_tensor(tensors, &format!("layer{i}.attn_wo"), e, e)?,
            mlp_fc1: take_tensor(tensors, &format!("layer{i}.mlp_fc1"), 4 * e, e)?,
            mlp_fc2: take_tensor(tensors, &format!("layer{i}.mlp_fc2"), e, 4 * e)?,
        });
    }
    Ok(StateDict {
        wte,
        wpe,
        lm_head,
        layers,
    })
}

#[cfg(test)]
mod tests {
    use super::codec;
    use super::*;
    use std::path::PathBuf;

    fn settings() -> Settings {
        Settings {
            n_embed: 4,
            n_head: 2,
            n_layer: 1,
            block_size: 3,
            vocab_size: 3,
            dataset: "unit".to_string(),
        }
    }

    /// Fills every tensor with distinct f32-representable values.
    fn representable_params(s: &Settings) -> StateDict {
        let mut sd = StateDict::zeros(s);
        let mut k = 0u32;
        for (_, m) in sd.tensors_mut() {
            for row in m.iter_mut() {
                for v in row.iter_mut() {
                    *v = f64::from(k as f32 * 0.125 - 4.0);
                    k += 1;
                }
            }
        }
        sd
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(name)
    }

    fn max_error(a: &StateDict, b: &StateDict) -> f64 {
        a.tensors()
            .iter()
            .zip(b.tensors().iter())
            .flat_map(|((_, ma), (_, mb))| {
                ma.iter()
                    .zip(mb.iter())
                    .flat_map(|(ra, rb)| ra.iter().zip(rb.iter()).map(|(x, y)| (x - y).abs()))
            })
            .fold(0.0, f64::max)
    }

    #[test]
    fn fp32_round_trip_is_exact() {
        let s = settings();
        let params = representable_params(&s);
        let path = temp_path("picogpt_weights_fp32.bin");
        save(&path, &s, &params, Quant::Fp32).unwrap();
        let (loaded_settings, loaded) = load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(loaded_settings, s);
        assert_eq!(max_error(&params, &loaded), 0.0);
    }

    #[test]
    fn int8_round_trip_within_half_scale_per_tensor() {
        let s = settings();
        let params = representable_params(&s);
        let path = temp_path("picogpt_weights_int8.bin");
        save(&path, &s, &params, Quant::Int8).unwrap();
        let (_, loaded) = load(&path).unwrap();
        let _ = fs::remove_file(&path);
        for ((_, ma), (_, mb)) in params.tensors().iter().zip(loaded.tensors().iter()) {
            let max_abs = ma
                .iter()
                .flatten()
                .fold(0.0f64, |acc, &w| acc.max(w.abs()));
            let bound = max_abs / 127.0 / 2.0 + 1e-6;
            for (ra, rb) in ma.iter().zip(mb.iter()) {
                for (x, y) in ra.iter().zip(rb.iter()) {
                    assert!((x - y).abs() <= bound, "{x} vs {y}, bound {bound}");
                }
            }
        }
    }

    #[test]
    fn int4_round_trip_within_a_fifteenth_of_range() {
        let s = settings();
        let params = representable_params(&s);
        let path = temp_path("picogpt_weights_int4.bin");
        save(&path, &s, &params, Quant::Int4).unwrap();
        let (_, loaded) = load(&path).unwrap();
        let _ = fs::remove_file(&path);
        for ((_, ma), (_, mb)) in params.tensors().iter().zip(loaded.tensors().iter()) {
            let lo = ma.iter().flatten().copied().fold(f64::INFINITY, f64::min);
            let hi = ma
                .iter()
                .flatten()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            let bound = (hi - lo) / 15.0 + 1e-6;
            for (ra, rb) in ma.iter().zip(mb.iter()) {
                for (x, y) in ra.iter().zip(rb.iter()) {
                    assert!((x - y).abs() <= bound, "{x} vs {y}, bound {bound}");
                }
            }
        }
    }

    #[test]
    fn all_zero_int8_tensor_loads_as_exact_zeros() {
        // Scale degenerates to 0; decode must give 0.0, never NaN.
        let packed = codec::quantize(&[0.0, 0.0, 0.0, 0.0], Quant::Int8);
        let back = codec::dequantize(&packed, 4, Quant::Int8).unwrap();
        assert_eq!(back, [0.0, 0.0, 0.0, 0.0]);

        let s = settings();
        let params = StateDict::zeros(&s);
        let path = temp_path("picogpt_weights_zero_int8.bin");
        save(&path, &s, &params, Quant::Int8).unwrap();
        let (_, loaded) = load(&path).unwrap();
        let _ = fs::remove_file(&path);
        for (_, m) in loaded.tensors() {
            for row in m {
                assert!(row.iter().all(|v| *v == 0.0 && !v.is_nan()));
            }
        }
    }

    #[test]
    fn int4_constant_tensor_decodes_exactly() {
        let packed = codec::quantize(&[0.5; 6], Quant::Int4);
        let back = codec::dequantize(&packed, 6, Quant::Int4).unwrap();
        assert!(back.iter().all(|v| (*v - 0.5).abs() < 1e-7));
    }

    #[test]
    fn int4_odd_length_pads_and_truncates() {
        let weights = [1.0, -1.0, 0.25, 0.75, -0.5];
        let packed = codec::quantize(&weights, Quant::Int4);
        assert_eq!(packed.len(), 8 + 3);
        let back = codec::dequantize(&packed, 5, Quant::Int4).unwrap();
        assert_eq!(back.len(), 5);
        let bound = 2.0 / 15.0 + 1e-6;
        for (x, y) in weights.iter().zip(&back) {
            assert!((x - y).abs() <= bound);
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let result = load("/nonexistent/picogpt_no_such.bin");
        assert!(matches!(result, Err(WeightsError::NotFound(_))));
    }

    #[test]
    fn bad_magic_is_a_format_error() {
        let path = temp_path("picogpt_weights_badmagic.bin");
        fs::write(&path, b"NOPE.....").unwrap();
        let result = load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(WeightsError::BadMagic(_))));
    }

    #[test]
    fn unknown_quantization_byte_is_an_explicit_error() {
        let s = settings();
        let meta = serde_json::to_vec(&s).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        bytes.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&meta);
        bytes.push(9);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let path = temp_path("picogpt_weights_unknown_quant.bin");
        fs::write(&path, &bytes).unwrap();
        let result = load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(WeightsError::UnknownQuant(9))));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let path = temp_path("picogpt_weights_badversion.bin");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(1);
        fs::write(&path, &bytes).unwrap();
        let result = load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(WeightsError::UnsupportedVersion(1))));
    }

    #[test]
    fn empty_index_is_missing_tensor() {
        let s = settings();
        let meta = serde_json::to_vec(&s).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION);
        bytes.extend_from_slice(&(meta.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&meta);
        bytes.push(Quant::Fp32.byte());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let path = temp_path("picogpt_weights_noindex.bin");
        fs::write(&path, &bytes).unwrap();
        let result = load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(WeightsError::MissingTensor(n)) if n == "wte"));
    }

    #[test]
    fn truncated_file_is_detected() {
        let s = settings();
        let params = representable_params(&s);
        let path = temp_path("picogpt_weights_truncated.bin");
        save(&path, &s, &params, Quant::Fp32).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 10);
        fs::write(&path, &bytes).unwrap();
        let result = load(&path);
        let _ = fs::remove_file(&path);
        assert!(matches!(result, Err(WeightsError::Truncated)));
    }

    #[test]
    fn quant_parses_from_str_case_insensitively() {
        assert_eq!("FP32".parse::<Quant>().unwrap(), Quant::Fp32);
        assert_eq!("int8".parse::<Quant>().unwrap(), Quant::Int8);
        assert_eq!("Int4".parse::<Quant>().unwrap(), Quant::Int4);
        assert!("int2".parse::<Quant>().is_err());
    }

    #[test]
    fn quant_bytes_round_trip() {
        for q in [Quant::Fp32, Quant::Int8, Quant::Int4] {
            assert_eq!(Quant::from_byte(q.byte()), Some(q));
        }
        assert_eq!(Quant::from_byte(7), None);
    }
}
