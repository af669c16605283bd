//! Pass-through filter. Useful for exercising the pipeline and masks
//! without changing chunk bytes.

use crate::{Filter, Result};

pub const FILTER_IDENTITY: u16 = 256;

#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityFilter;

impl Filter for IdentityFilter {
    fn id(&self) -> u16 {
        FILTER_IDENTITY
    }

    fn name(&self) -> &'static str {
        "identity"
    }

    fn encode(&self, _params: &[u32], data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(data)
    }

    fn decode(&self, _params: &[u32], data: Vec<u8>) -> Result<Vec<u8>> {
        Ok(data)
    }
}
