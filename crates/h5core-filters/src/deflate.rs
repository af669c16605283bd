//! zlib compression via `flate2`. Client data: `[level]`, default 6.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use h5core_format::filter_pipeline::FILTER_DEFLATE;

use crate::error::FilterError;
use crate::{Filter, FilterContext, Result};

const DEFAULT_LEVEL: u32 = 6;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateFilter;

impl Filter for DeflateFilter {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn name(&self) -> &'static str {
        "deflate"
    }

    fn set_local(&self, _ctx: &FilterContext<'_>, params: &mut Vec<u32>) -> Result<()> {
        match params.first() {
            None => params.push(DEFAULT_LEVEL),
            Some(&level) if level > 9 => {
                return Err(FilterError::failed(self, format!("invalid level {level}")))
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn encode(&self, params: &[u32], data: Vec<u8>) -> Result<Vec<u8>> {
        let level = params.first().copied().unwrap_or(DEFAULT_LEVEL).min(9);
        let mut encoder = ZlibEncoder::new(
            Vec::with_capacity(data.len() / 2 + 16),
            Compression::new(level),
        );
        encoder
            .write_all(&data)
            .map_err(|e| FilterError::failed(self, e))?;
        encoder.finish().map_err(|e| FilterError::failed(self, e))
    }

    fn decode(&self, _params: &[u32], data: Vec<u8>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 2);
        ZlibDecoder::new(data.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| FilterError::failed(self, e))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compresses_repetitive_data() {
        let f = DeflateFilter;
        let data = vec![42u8; 4096];
        let packed = f.encode(&[9], data.clone()).unwrap();
        assert!(packed.len() < 100);
        assert_eq!(f.decode(&[9], packed).unwrap(), data);
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = DeflateFilter.decode(&[], vec![1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, FilterError::Failed { id: FILTER_DEFLATE, .. }));
    }
}
