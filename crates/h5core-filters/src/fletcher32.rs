//! Fletcher-32 checksum appended to each chunk and verified on read.

use h5core_format::filter_pipeline::FILTER_FLETCHER32;

use crate::error::FilterError;
use crate::{Filter, Result};

/// Fletcher-32 over big-endian 16-bit words, reducing every 360 words.
pub fn checksum(data: &[u8]) -> u32 {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    for block in data.chunks(720) {
        for word in block.chunks(2) {
            let hi = (word[0] as u32) << 8;
            let lo = word.get(1).copied().unwrap_or(0) as u32;
            sum1 = sum1.wrapping_add(hi | lo);
            sum2 = sum2.wrapping_add(sum1);
        }
        sum1 = (sum1 & 0xffff) + (sum1 >> 16);
        sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    }
    sum1 = (sum1 & 0xffff) + (sum1 >> 16);
    sum2 = (sum2 & 0xffff) + (sum2 >> 16);
    (sum2 << 16) | sum1
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Fletcher32Filter;

impl Filter for Fletcher32Filter {
    fn id(&self) -> u16 {
        FILTER_FLETCHER32
    }

    fn name(&self) -> &'static str {
        "fletcher32"
    }

    fn encode(&self, _params: &[u32], mut data: Vec<u8>) -> Result<Vec<u8>> {
        let sum = checksum(&data);
        data.extend_from_slice(&sum.to_le_bytes());
        Ok(data)
    }

    fn decode(&self, _params: &[u32], mut data: Vec<u8>) -> Result<Vec<u8>> {
        if data.len() < 4 {
            return Err(FilterError::failed(self, "chunk shorter than its checksum"));
        }
        let body = data.len() - 4;
        let mut stored = [0u8; 4];
        stored.copy_from_slice(&data[body..]);
        let stored = u32::from_le_bytes(stored);
        let computed = checksum(&data[..body]);
        // files written by some older libraries store the halves swapped
        let swapped = computed.rotate_left(16);
        if stored != computed && stored != swapped {
            return Err(FilterError::failed(
                self,
                format!("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"),
            ));
        }
        data.truncate(body);
        Ok(data)
    }
}
