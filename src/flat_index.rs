use std::{io::Write, path::Path};

use rayon::prelude::*;

use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"DDFI";
const FORMAT_VERSION: u32 = 1;

/// Fixed part of the header: magic, version, dimension, count, id length.
const FIXED_HEADER_SIZE: usize = 4 + 4 + 4 + 8 + 4;

/// One search result: the row position and its squared L2 distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

/// Exact nearest-neighbor index over squared Euclidean distance.
///
/// Rows are stored contiguously; search scores every row, so results are
/// exact. Sized for a few thousand verses.
///
/// Binary format:
/// - 4 bytes: magic `DDFI`
/// - 4 bytes: format version (u32 LE)
/// - 4 bytes: dimension D (u32 LE)
/// - 8 bytes: row count N (u64 LE)
/// - 4 bytes: model id length L (u32 LE), then L bytes of UTF-8
/// - N * D * 4 bytes: f32 values in row-major order
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::IndexMismatch(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Return the `k` rows closest to `query`, nearest first. Ties keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(Error::IndexMismatch(format!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dimension
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .data
            .par_chunks_exact(self.dimension)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position,
                distance: squared_l2(query, row),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        scored.truncate(k);
        Ok(scored)
    }

    pub fn to_bytes(&self, model_id: &str) -> Vec<u8> {
        let id = model_id.as_bytes();
        let mut out = Vec::with_capacity(
            FIXED_HEADER_SIZE + id.len() + std::mem::size_of_val(&self.data[..]),
        );
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        out.extend_from_slice(&(id.len() as u32).to_le_bytes());
        out.extend_from_slice(id);
        out.extend_from_slice(bytemuck::cast_slice(&self.data));
        out
    }

    /// Parse bytes written by [`FlatIndex::to_bytes`], returning the index
    /// and the model id it was built with.
    pub fn from_bytes(bytes: &[u8]) -> Result<(Self, String)> {
        let corrupt =
            |what: &str| Error::IndexMismatch(format!("index file {what}"));

        if bytes.len() < FIXED_HEADER_SIZE || &bytes[0..4] != MAGIC {
            return Err(corrupt("has no valid header"));
        }

        let version = read_u32(bytes, 4);
        if version != FORMAT_VERSION {
            return Err(corrupt(&format!("has unsupported version {version}")));
        }

        let dimension = read_u32(bytes, 8) as usize;
        let count = read_u64(bytes, 12) as usize;
        let id_len = read_u32(bytes, 20) as usize;

        let data_start = FIXED_HEADER_SIZE + id_len;
        let id_bytes = bytes
            .get(FIXED_HEADER_SIZE..data_start)
            .ok_or_else(|| corrupt("is truncated"))?;
        let model_id = String::from_utf8(id_bytes.to_vec())
            .map_err(|_| corrupt("has a non UTF-8 model id"))?;

        let payload = &bytes[data_start..];
        let values = count
            .checked_mul(dimension)
            .ok_or_else(|| corrupt("has an impossible row count"))?;
        let expected = values * std::mem::size_of::<f32>();
        if payload.len() != expected {
            return Err(corrupt(&format!(
                "holds {} bytes of vectors, header promises {expected}",
                payload.len()
            )));
        }

        let mut data = vec![0f32; values];
        bytemuck::cast_slice_mut::<f32, u8>(&mut data).copy_from_slice(payload);

        Ok((Self { dimension, data }, model_id))
    }

    pub fn write(&self, path: &Path, model_id: &str) -> Result<()> {
        write_atomic(path, &self.to_bytes(model_id))
    }

    pub fn read(path: &Path) -> Result<(Self, String)> {
        Self::from_bytes(&std::fs::read(path)?)
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Write through a sibling temp file and rename, so readers never observe
/// a half-written artifact.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(rows: &[[f32; 2]]) -> FlatIndex {
        let mut index = FlatIndex::new(2);
        for row in rows {
            index.add(row).unwrap();
        }
        index
    }

    #[test]
    fn search_is_exact_and_sorted() {
        let index = index_of(&[[0.0, 0.0], [3.0, 4.0], [1.0, 0.0], [0.0, 2.0]]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();

        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, [0, 2, 3]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].distance, 1.0);
        // Squared, not plain, Euclidean distance.
        assert_eq!(hits[2].distance, 4.0);
    }

    #[test]
    fn search_k_larger_than_index() {
        let index = index_of(&[[1.0, 1.0], [2.0, 2.0]]);
        assert_eq!(index.search(&[0.0, 0.0], 50).unwrap().len(), 2);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = index_of(&[[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, [0, 1, 2]);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let mut index = FlatIndex::new(3);
        assert!(index.add(&[1.0, 2.0]).is_err());
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn empty_index_returns_nothing() {
        let index = FlatIndex::new(4);
        assert!(index.is_empty());
        assert!(index.search(&[0.0; 4], 5).unwrap().is_empty());
    }

    #[test]
    fn file_roundtrip_keeps_model_id() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.bin");
        let index = index_of(&[[0.5, -1.5], [2.0, 8.0]]);

        index.write(&path, "sentence-transformers/all-MiniLM-L6-v2").unwrap();
        let (loaded, model_id) = FlatIndex::read(&path).unwrap();

        assert_eq!(loaded, index);
        assert_eq!(model_id, "sentence-transformers/all-MiniLM-L6-v2");
        assert_eq!(loaded.vector(1), Some(&[2.0f32, 8.0][..]));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let index = index_of(&[[1.0, 2.0], [3.0, 4.0]]);
        let mut bytes = index.to_bytes("m");
        bytes.truncate(bytes.len() - 4);

        assert!(matches!(
            FlatIndex::from_bytes(&bytes),
            Err(Error::IndexMismatch(_))
        ));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(FlatIndex::from_bytes(b"not an index at all, no").is_err());
        assert!(FlatIndex::from_bytes(b"").is_err());
    }
}
