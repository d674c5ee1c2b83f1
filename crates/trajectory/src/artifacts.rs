//! NumPy `.npy` artifacts written next to the trajectory file.
//!
//! Arrays are stored in format version 1.0, little-endian `f32`, C order.
//! The header is padded with spaces so the data starts on a 64-byte
//! boundary.

use anyhow::{bail, Context};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MAGIC: &[u8] = b"\x93NUMPY";
const ALIGN: usize = 64;

fn shape_literal(shape: &[usize]) -> String {
    match shape {
        [] => "()".to_string(),
        [n] => format!("({n},)"),
        dims => {
            let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
            format!("({})", parts.join(", "))
        }
    }
}

/// Encode an `f32` array with the given shape as `.npy` bytes.
pub fn encode_npy(shape: &[usize], data: &[f32]) -> anyhow::Result<Vec<u8>> {
    let expected: usize = shape.iter().product();
    if expected != data.len() {
        bail!("shape {shape:?} holds {expected} values, got {}", data.len());
    }

    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': {}, }}",
        shape_literal(shape)
    );
    // magic (6) + version (2) + header length (2) + header + '\n'
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (ALIGN - unpadded % ALIGN) % ALIGN;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    let header_len =
        u16::try_from(header.len()).context("npy header exceeds format 1.0 limit")?;

    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + data.len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for v in data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Ok(out)
}

/// Decode `.npy` bytes written by [`encode_npy`] into `(shape, data)`.
///
/// Only the subset this module writes is accepted: format 1.0, `'<f4'`,
/// C order, with the shape tuple as the last header key. Files written by
/// NumPy with other dtypes, versions or key orders are rejected rather than
/// misread.
pub fn decode_npy(bytes: &[u8]) -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        bail!("not an npy file");
    }
    if bytes[6] != 1 {
        bail!("unsupported npy version {}.{}", bytes[6], bytes[7]);
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let body_start = 10 + header_len;
    if bytes.len() < body_start {
        bail!("truncated npy header");
    }
    let header = std::str::from_utf8(&bytes[10..body_start]).context("npy header is not UTF-8")?;
    if !header.contains("'descr': '<f4'") || header.contains("'fortran_order': True") {
        bail!("only little-endian f32 C-order arrays are supported: {header}");
    }

    let shape_start = header
        .find("'shape': (")
        .map(|i| i + "'shape': (".len())
        .context("npy header has no shape")?;
    let shape_end = header[shape_start..]
        .find(')')
        .map(|i| shape_start + i)
        .context("npy shape is not terminated")?;
    let shape = header[shape_start..shape_end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().with_context(|| format!("bad npy dim '{s}'")))
        .collect::<anyhow::Result<Vec<usize>>>()?;

    let body = &bytes[body_start..];
    let expected: usize = shape.iter().product();
    if body.len() != expected * 4 {
        bail!("npy body has {} bytes, expected {}", body.len(), expected * 4);
    }
    let data = body
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok((shape, data))
}

/// Writes named `.npy` arrays into a run's logging directory.
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Create the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create logging dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write an array with an explicit shape as `<name>.npy`.
    pub fn save(&self, name: &str, shape: &[usize], data: &[f32]) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(format!("{name}.npy"));
        let bytes = encode_npy(shape, data)?;
        let mut file = fs::File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        file.write_all(&bytes)?;
        tracing::debug!(path = %path.display(), ?shape, "Wrote npy artifact");
        Ok(path)
    }

    /// Write a 0-d array holding a single value.
    pub fn save_scalar(&self, name: &str, value: f32) -> anyhow::Result<PathBuf> {
        self.save(name, &[], &[value])
    }

    /// Write a 1-D vector.
    pub fn save_vector(&self, name: &str, values: &[f32]) -> anyhow::Result<PathBuf> {
        self.save(name, &[values.len()], values)
    }

    /// Write a batch of designs with per-example shape `input_shape`, giving an
    /// array of shape `[rows.len(), input_shape...]`.
    pub fn save_designs(
        &self,
        name: &str,
        rows: &[Vec<f32>],
        input_shape: &[usize],
    ) -> anyhow::Result<PathBuf> {
        let mut shape = Vec::with_capacity(input_shape.len() + 1);
        shape.push(rows.len());
        shape.extend_from_slice(input_shape);
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        self.save(name, &shape, &flat)
    }

    /// Read back an artifact written by this writer.
    pub fn load(&self, name: &str) -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
        let path = self.dir.join(format!("{name}.npy"));
        let bytes = fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        decode_npy(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_header_is_aligned() {
        for shape in [vec![], vec![3], vec![2, 5], vec![4, 8, 4]] {
            let n: usize = shape.iter().product();
            let bytes = encode_npy(&shape, &vec![0.0; n]).unwrap();
            let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
            assert_eq!((10 + header_len) % 64, 0);
            assert_eq!(bytes[10 + header_len - 1], b'\n');
        }
    }

    #[test]
    fn test_shape_literals() {
        assert_eq!(shape_literal(&[]), "()");
        assert_eq!(shape_literal(&[7]), "(7,)");
        assert_eq!(shape_literal(&[2, 3]), "(2, 3)");
    }

    #[test]
    fn test_mismatched_length_fails() {
        assert!(encode_npy(&[2, 2], &[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_npy(b"hello world").is_err());
    }

    #[test]
    fn test_decode_rejects_foreign_headers() {
        let bytes = encode_npy(&[2], &[1.0, 2.0]).unwrap();

        let mut big_endian = bytes.clone();
        let at = big_endian.windows(5).position(|w| w == b"'<f4'").unwrap();
        big_endian[at + 1] = b'>';
        assert!(decode_npy(&big_endian).is_err());

        let mut version_two = bytes;
        version_two[6] = 2;
        assert!(decode_npy(&version_two).is_err());
    }

    #[test]
    fn test_scalar_is_zero_dimensional() {
        let tmp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(tmp.path()).unwrap();
        writer.save_scalar("score", 2.5).unwrap();
        let (shape, data) = writer.load("score").unwrap();
        assert!(shape.is_empty());
        assert_eq!(data, vec![2.5]);
    }

    #[test]
    fn test_writer_saves_designs() {
        let tmp = TempDir::new().unwrap();
        let writer = ArtifactWriter::new(tmp.path().join("run")).unwrap();
        let rows = vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]];
        writer.save_designs("solution", &rows, &[2, 2]).unwrap();
        writer.save_vector("scores", &[0.5, -1.5]).unwrap();

        let (shape, data) = writer.load("solution").unwrap();
        assert_eq!(shape, vec![2, 2, 2]);
        assert_eq!(data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let (shape, data) = writer.load("scores").unwrap();
        assert_eq!(shape, vec![2]);
        assert_eq!(data, vec![0.5, -1.5]);
    }
}
