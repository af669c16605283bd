//! Chunk filter pipeline.
//!
//! A pipeline is an ordered list of reversible byte transforms applied to
//! each chunk on its way to disk and undone in reverse order on the way
//! back. Every stored chunk carries a filter mask: bit `i` set means
//! filter `i` of the pipeline was not applied to that chunk.
//!
//! Filters are looked up by id in a [`FilterRegistry`]. The registry
//! returned by [`FilterRegistry::with_builtins`] holds identity, deflate,
//! shuffle and fletcher32.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use h5core_format::datatype::Datatype;

pub mod deflate;
pub mod error;
pub mod fletcher32;
pub mod identity;
pub mod pipeline;
pub mod shuffle;

pub use deflate::DeflateFilter;
pub use error::{FilterError, Result};
pub use fletcher32::Fletcher32Filter;
pub use identity::{IdentityFilter, FILTER_IDENTITY};
pub use pipeline::{prepare, run_forward, run_reverse};
pub use shuffle::ShuffleFilter;

/// What a filter may inspect when deciding whether and how to apply.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub datatype: &'a Datatype,
    pub chunk_dims: &'a [u32],
}

pub trait Filter: Send + Sync {
    fn id(&self) -> u16;

    fn name(&self) -> &'static str;

    /// Whether the filter can work with this datatype and chunk shape.
    fn can_apply(&self, _ctx: &FilterContext<'_>) -> Result<bool> {
        Ok(true)
    }

    /// Adjust the stored client data for this dataset. Runs once, at
    /// dataset creation.
    fn set_local(&self, _ctx: &FilterContext<'_>, _params: &mut Vec<u32>) -> Result<()> {
        Ok(())
    }

    fn encode(&self, params: &[u32], data: Vec<u8>) -> Result<Vec<u8>>;

    fn decode(&self, params: &[u32], data: Vec<u8>) -> Result<Vec<u8>>;
}

/// Filters known to the library, by id.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: BTreeMap<u16, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// A registry holding only the identity filter.
    pub fn new() -> FilterRegistry {
        let mut r = FilterRegistry::default();
        r.register(Arc::new(IdentityFilter));
        r
    }

    pub fn with_builtins() -> FilterRegistry {
        let mut r = FilterRegistry::new();
        r.register(Arc::new(DeflateFilter));
        r.register(Arc::new(ShuffleFilter));
        r.register(Arc::new(Fletcher32Filter));
        r
    }

    /// Add or replace a filter.
    pub fn register(&mut self, filter: Arc<dyn Filter>) {
        self.filters.insert(filter.id(), filter);
    }

    pub fn get(&self, id: u16) -> Option<&Arc<dyn Filter>> {
        self.filters.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.filters.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.filters.keys().copied()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.filters.iter().map(|(id, flt)| (id, flt.name())))
            .finish()
    }
}
