//! Byte shuffle: gathers byte `k` of every element together so that
//! a following compressor sees long runs. Client data: `[element_size]`,
//! filled in by `set_local`.

use h5core_format::filter_pipeline::FILTER_SHUFFLE;

use crate::{Filter, FilterContext, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct ShuffleFilter;

fn element_size(params: &[u32]) -> usize {
    params.first().copied().unwrap_or(1) as usize
}

impl Filter for ShuffleFilter {
    fn id(&self) -> u16 {
        FILTER_SHUFFLE
    }

    fn name(&self) -> &'static str {
        "shuffle"
    }

    fn set_local(&self, ctx: &FilterContext<'_>, params: &mut Vec<u32>) -> Result<()> {
        params.clear();
        params.push(ctx.datatype.size());
        Ok(())
    }

    fn encode(&self, params: &[u32], data: Vec<u8>) -> Result<Vec<u8>> {
        let size = element_size(params);
        let n = if size > 1 { data.len() / size } else { 0 };
        if n <= 1 {
            return Ok(data);
        }
        let mut out = vec![0u8; data.len()];
        for (i, elem) in data.chunks_exact(size).enumerate() {
            for (b, &byte) in elem.iter().enumerate() {
                out[b * n + i] = byte;
            }
        }
        // leftover bytes past the last whole element stay in place
        out[n * size..].copy_from_slice(&data[n * size..]);
        Ok(out)
    }

    fn decode(&self, params: &[u32], data: Vec<u8>) -> Result<Vec<u8>> {
        let size = element_size(params);
        let n = if size > 1 { data.len() / size } else { 0 };
        if n <= 1 {
            return Ok(data);
        }
        let mut out = vec![0u8; data.len()];
        for (i, elem) in out.chunks_exact_mut(size).enumerate() {
            for (b, byte) in elem.iter_mut().enumerate() {
                *byte = data[b * n + i];
            }
        }
        out[n * size..].copy_from_slice(&data[n * size..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_bytes_by_position() {
        let data = vec![1, 2, 3, 4, 5, 6, 7, 8, 9];
        let out = ShuffleFilter.encode(&[4], data.clone()).unwrap();
        assert_eq!(out, vec![1, 5, 2, 6, 3, 7, 4, 8, 9]);
        assert_eq!(ShuffleFilter.decode(&[4], out).unwrap(), data);
    }

    #[test]
    fn single_byte_elements_untouched() {
        let data = vec![9, 8, 7];
        assert_eq!(ShuffleFilter.encode(&[1], data.clone()).unwrap(), data);
    }
}
