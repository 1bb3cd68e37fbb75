//! Index buffers.
use crate::descriptor::IndexWidth;
use easyerr::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index width tag {f0} is not 0, 1, 2 or 3")]
    MalformedWidth(u8),
    #[error("index range is empty")]
    EmptyRange,
    #[error("index buffer has {len} bytes but {needed} are needed")]
    TooShort { len: usize, needed: usize },
}

impl TryFrom<u8> for IndexWidth {
    type Error = IndexError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::U8,
            2 => Self::U16,
            3 => Self::U32,
            _ => return Err(IndexError::MalformedWidth(value)),
        })
    }
}

/// Inclusive range of vertex indices referenced by a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBounds {
    pub lower: u32,
    pub upper: u32,
}

impl IndexBounds {
    /// Number of vertices in the range. Zero if `lower > upper`.
    pub fn len(&self) -> usize {
        (self.upper as usize + 1).saturating_sub(self.lower as usize)
    }

    /// Whether the range holds no vertex, which is only the case if `lower > upper`.
    pub fn is_empty(&self) -> bool {
        self.lower > self.upper
    }
}

/// Reads little-endian indices of a given width.
#[derive(Debug, Clone, Copy)]
pub struct IndexReader<'a> {
    width: IndexWidth,
    indices: &'a [u8],
}

impl<'a> IndexReader<'a> {
    pub fn new(width: IndexWidth, indices: &'a [u8]) -> Self {
        Self { width, indices }
    }

    /// Number of whole indices in the buffer. `None` for implicit indices.
    pub fn len(&self) -> Option<usize> {
        match self.width {
            IndexWidth::None => None,
            width => Some(self.indices.len() / width.size()),
        }
    }

    /// Returns the index at logical position `i`.
    ///
    /// # Panics
    /// Panics if `i` is out of bounds of the buffer.
    #[inline]
    pub fn convert(&self, i: usize) -> u32 {
        let bytes = self.indices;
        match self.width {
            IndexWidth::None => i as u32,
            IndexWidth::U8 => bytes[i] as u32,
            IndexWidth::U16 => u16::from_le_bytes([bytes[2 * i], bytes[2 * i + 1]]) as u32,
            IndexWidth::U32 => {
                let start = 4 * i;
                u32::from_le_bytes([
                    bytes[start],
                    bytes[start + 1],
                    bytes[start + 2],
                    bytes[start + 3],
                ])
            }
        }
    }
}

/// Scans the first `count` indices and returns the smallest and largest of them.
pub fn compute_bounds(
    indices: &[u8],
    count: usize,
    width: IndexWidth,
) -> Result<IndexBounds, IndexError> {
    if count == 0 {
        return Err(IndexError::EmptyRange);
    }

    if width == IndexWidth::None {
        return Ok(IndexBounds {
            lower: 0,
            upper: (count - 1) as u32,
        });
    }

    let needed = count * width.size();
    if indices.len() < needed {
        return Err(IndexError::TooShort {
            len: indices.len(),
            needed,
        });
    }

    let reader = IndexReader::new(width, indices);
    let (lower, upper) = (0..count)
        .map(|i| reader.convert(i))
        .fold((u32::MAX, 0), |(lo, hi), index| (lo.min(index), hi.max(index)));

    Ok(IndexBounds { lower, upper })
}

#[cfg(test)]
mod test {
    use super::*;

    fn u16_bytes(values: &[u16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn bounds_u16() {
        let bytes = u16_bytes(&[5, 2, 9, 2]);
        let bounds = compute_bounds(&bytes, 4, IndexWidth::U16).unwrap();
        assert_eq!(bounds, IndexBounds { lower: 2, upper: 9 });
        assert_eq!(bounds.len(), 8);
    }

    #[test]
    fn bounds_only_scan_count() {
        let bytes = [7u8, 3, 200];
        let bounds = compute_bounds(&bytes, 2, IndexWidth::U8).unwrap();
        assert_eq!(bounds, IndexBounds { lower: 3, upper: 7 });
    }

    #[test]
    fn implicit_indices() {
        let bounds = compute_bounds(&[], 6, IndexWidth::None).unwrap();
        assert_eq!(bounds, IndexBounds { lower: 0, upper: 5 });

        let reader = IndexReader::new(IndexWidth::None, &[]);
        assert_eq!(reader.convert(42), 42);
        assert_eq!(reader.len(), None);
    }

    #[test]
    fn u32_little_endian() {
        let bytes = [0x78, 0x56, 0x34, 0x12, 1, 0, 0, 0];
        let reader = IndexReader::new(IndexWidth::U32, &bytes);
        assert_eq!(reader.convert(0), 0x1234_5678);
        assert_eq!(reader.convert(1), 1);
        assert_eq!(reader.len(), Some(2));
    }

    #[test]
    fn inverted_bounds_are_empty() {
        let bounds = IndexBounds { lower: 9, upper: 2 };
        assert!(bounds.is_empty());
        assert_eq!(bounds.len(), 0);

        let bounds = IndexBounds {
            lower: 0,
            upper: u32::MAX,
        };
        assert!(!bounds.is_empty());
        assert_eq!(bounds.len(), 1 << 32);
    }

    #[test]
    fn errors() {
        assert!(matches!(
            compute_bounds(&[1, 2], 0, IndexWidth::U8),
            Err(IndexError::EmptyRange)
        ));
        assert!(matches!(
            compute_bounds(&[1, 2, 3], 2, IndexWidth::U16),
            Err(IndexError::TooShort { len: 3, needed: 4 })
        ));
        assert!(matches!(
            IndexWidth::try_from(4),
            Err(IndexError::MalformedWidth(4))
        ));
        assert_eq!(IndexWidth::try_from(2).unwrap(), IndexWidth::U16);
    }
}
