use std::fs::File;

use memmap2::{Mmap, MmapOptions};

use crate::Result;

/// Read-only view over the first `len` bytes of a chunk file.
///
/// Zero-length views skip the mapping entirely since empty maps are rejected
/// on some platforms.
pub struct MmapFile {
    map: Option<Mmap>,
    len: usize,
}

impl MmapFile {
    pub fn map(file: &File, len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self { map: None, len: 0 });
        }
        // The mapped prefix is immutable: writers only append past it and
        // dropped files stay readable through the open handle.
        let map = unsafe { MmapOptions::new().len(len).map(file)? };
        Ok(Self {
            map: Some(map),
            len,
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.map {
            Some(map) => &map[..self.len],
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn maps_committed_prefix_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"committed-and-more").unwrap();

        let file = File::open(&path).unwrap();
        let view = MmapFile::map(&file, 9).unwrap();
        assert_eq!(view.as_slice(), b"committed");
        assert_eq!(view.len(), 9);
    }

    #[test]
    fn empty_view_does_not_map() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();
        let file = File::open(&path).unwrap();
        let view = MmapFile::map(&file, 0).unwrap();
        assert!(view.is_empty());
        assert!(view.as_slice().is_empty());
    }
}
