use crate::Error;
use std::ops::RangeInclusive;

/// Offset/length pairs of the signed parts of a PDF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteRange(pub Vec<usize>);

impl ByteRange {
    /// Space separated values, right padded to exactly `fixed_width` chars.
    pub fn to_list(&self, fixed_width: usize) -> Result<String, Error> {
        let list_string = self
            .0
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<String>>()
            .join(" ");
        if fixed_width < list_string.len() {
            Err(Error::from(format!(
                "ByteRange `fixed_width` is to small. Current: `{}`, Expected at least: `{}`",
                fixed_width,
                list_string.len()
            )))
        } else {
            Ok(format!(
                "{}{}",
                list_string,
                " ".repeat(fixed_width - list_string.len())
            ))
        }
    }

    pub fn get_range(&self, range_pair_index: usize) -> Result<RangeInclusive<usize>, Error> {
        let index = range_pair_index * 2;
        match (self.0.get(index), self.0.get(index + 1)) {
            (Some(&start), Some(&len)) if len > 0 => Ok(start..=start + len - 1),
            _ => Err(Error::from(format!(
                "ByteRange has no non-empty pair at index {}",
                range_pair_index
            ))),
        }
    }

    /// Total number of bytes covered by all pairs.
    pub fn get_capacity_inclusive(&self) -> usize {
        self.0.chunks(2).filter_map(|pair| pair.get(1)).sum()
    }
}
