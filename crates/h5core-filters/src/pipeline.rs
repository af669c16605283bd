//! Running a stored pipeline over chunk bytes.

use h5core_format::filter_pipeline::{FilterPipelineMessage, FILTER_RESERVED_MAX, MAX_FILTERS};
use tracing::{debug, trace, warn};

use crate::error::{FilterError, Result};
use crate::{FilterContext, FilterRegistry};

/// Resolve a pipeline for a new dataset.
///
/// Each registered filter is asked whether it can apply and then given the
/// chance to rewrite its client data. An unregistered filter is an error
/// unless it is optional, in which case it is kept and skipped at I/O time.
pub fn prepare(
    registry: &FilterRegistry,
    pipeline: &FilterPipelineMessage,
    ctx: &FilterContext<'_>,
) -> Result<FilterPipelineMessage> {
    if pipeline.filters.len() > MAX_FILTERS {
        return Err(FilterError::TooManyFilters(pipeline.filters.len()));
    }
    let mut out = pipeline.clone();
    for desc in &mut out.filters {
        let Some(filter) = registry.get(desc.id) else {
            if desc.is_optional() {
                debug!(id = desc.id, "optional filter not registered, keeping it");
                continue;
            }
            return Err(FilterError::NotFound { id: desc.id });
        };
        if !filter.can_apply(ctx)? {
            return Err(FilterError::CannotApply {
                id: desc.id,
                name: filter.name(),
            });
        }
        filter.set_local(ctx, &mut desc.client_data)?;
        if desc.id > FILTER_RESERVED_MAX && desc.name.is_none() {
            desc.name = Some(filter.name().to_string());
        }
    }
    Ok(out)
}

/// Apply the pipeline to raw chunk bytes.
///
/// Filters whose bit is already set in `mask` are skipped. Returns the
/// encoded bytes and the mask to store with the chunk: an optional filter
/// that fails (or is not registered) is skipped and its bit set.
pub fn run_forward(
    registry: &FilterRegistry,
    pipeline: &FilterPipelineMessage,
    mut mask: u32,
    mut data: Vec<u8>,
) -> Result<(Vec<u8>, u32)> {
    for (i, desc) in pipeline.filters.iter().enumerate() {
        let bit = 1u32 << i;
        if mask & bit != 0 {
            continue;
        }
        let Some(filter) = registry.get(desc.id) else {
            if desc.is_optional() {
                mask |= bit;
                continue;
            }
            return Err(FilterError::NotFound { id: desc.id });
        };
        if desc.is_optional() {
            match filter.encode(&desc.client_data, data.clone()) {
                Ok(out) => data = out,
                Err(e) => {
                    warn!(filter = filter.name(), error = %e, "optional filter failed, skipping");
                    mask |= bit;
                }
            }
        } else {
            data = filter.encode(&desc.client_data, data)?;
        }
    }
    trace!(len = data.len(), mask, "pipeline forward");
    Ok((data, mask))
}

/// Undo the pipeline in reverse order, skipping filters set in `mask`.
pub fn run_reverse(
    registry: &FilterRegistry,
    pipeline: &FilterPipelineMessage,
    mask: u32,
    mut data: Vec<u8>,
) -> Result<Vec<u8>> {
    for (i, desc) in pipeline.filters.iter().enumerate().rev() {
        if mask & (1u32 << i) != 0 {
            continue;
        }
        let filter = registry
            .get(desc.id)
            .ok_or(FilterError::NotFound { id: desc.id })?;
        data = filter.decode(&desc.client_data, data)?;
    }
    trace!(len = data.len(), mask, "pipeline reverse");
    Ok(data)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use h5core_format::datatype::{Datatype, Endian};
    use h5core_format::filter_pipeline::{
        FilterDescription, FILTER_DEFLATE, FILTER_FLAG_OPTIONAL, FILTER_SHUFFLE,
    };

    use super::*;
    use crate::{Filter, FILTER_IDENTITY};

    fn desc(id: u16, flags: u16) -> FilterDescription {
        FilterDescription {
            id,
            name: None,
            flags,
            client_data: Vec::new(),
        }
    }

    /// Refuses to encode anything; can only apply to 8-byte types.
    struct Picky;

    impl Filter for Picky {
        fn id(&self) -> u16 {
            300
        }
        fn name(&self) -> &'static str {
            "picky"
        }
        fn can_apply(&self, ctx: &FilterContext<'_>) -> Result<bool> {
            Ok(ctx.datatype.size() == 8)
        }
        fn encode(&self, _: &[u32], _: Vec<u8>) -> Result<Vec<u8>> {
            Err(FilterError::failed(self, "refused"))
        }
        fn decode(&self, _: &[u32], data: Vec<u8>) -> Result<Vec<u8>> {
            Ok(data)
        }
    }

    fn registry() -> FilterRegistry {
        let mut r = FilterRegistry::with_builtins();
        r.register(Arc::new(Picky));
        r
    }

    #[test]
    fn prepare_runs_set_local_and_names_private_filters() {
        let dtype = Datatype::integer(4, true, Endian::Little);
        let ctx = FilterContext {
            datatype: &dtype,
            chunk_dims: &[10],
        };
        let pipeline = FilterPipelineMessage {
            filters: vec![desc(FILTER_SHUFFLE, 0), desc(FILTER_IDENTITY, 0)],
        };
        let out = prepare(&registry(), &pipeline, &ctx).unwrap();
        assert_eq!(out.filters[0].client_data, vec![4]);
        assert_eq!(out.filters[1].name.as_deref(), Some("identity"));
    }

    #[test]
    fn prepare_rejects_unknown_and_inapplicable() {
        let dtype = Datatype::integer(4, true, Endian::Little);
        let ctx = FilterContext {
            datatype: &dtype,
            chunk_dims: &[10],
        };
        let unknown = FilterPipelineMessage {
            filters: vec![desc(999, 0)],
        };
        assert!(matches!(
            prepare(&registry(), &unknown, &ctx),
            Err(FilterError::NotFound { id: 999 })
        ));
        let optional_unknown = FilterPipelineMessage {
            filters: vec![desc(999, FILTER_FLAG_OPTIONAL)],
        };
        assert!(prepare(&registry(), &optional_unknown, &ctx).is_ok());

        let picky = FilterPipelineMessage {
            filters: vec![desc(300, 0)],
        };
        assert!(matches!(
            prepare(&registry(), &picky, &ctx),
            Err(FilterError::CannotApply { id: 300, .. })
        ));
    }

    #[test]
    fn optional_failure_sets_mask_bit() {
        let pipeline = FilterPipelineMessage {
            filters: vec![desc(FILTER_DEFLATE, 0), desc(300, FILTER_FLAG_OPTIONAL)],
        };
        let data = vec![5u8; 256];
        let (encoded, mask) = run_forward(&registry(), &pipeline, 0, data.clone()).unwrap();
        assert_eq!(mask, 0b10);
        assert_eq!(
            run_reverse(&registry(), &pipeline, mask, encoded).unwrap(),
            data
        );
    }

    #[test]
    fn mandatory_failure_aborts() {
        let pipeline = FilterPipelineMessage {
            filters: vec![desc(300, 0)],
        };
        assert!(matches!(
            run_forward(&registry(), &pipeline, 0, vec![1, 2, 3]),
            Err(FilterError::Failed { id: 300, .. })
        ));
    }

    #[test]
    fn preset_mask_stores_raw() {
        let pipeline = FilterPipelineMessage {
            filters: vec![desc(FILTER_DEFLATE, 0), desc(FILTER_IDENTITY, 0)],
        };
        let full = pipeline.all_filters_mask();
        let data = vec![7u8; 64];
        let (stored, mask) = run_forward(&registry(), &pipeline, full, data.clone()).unwrap();
        assert_eq!(stored, data);
        assert_eq!(mask, full);
        assert_eq!(run_reverse(&registry(), &pipeline, mask, stored).unwrap(), data);
    }
}
