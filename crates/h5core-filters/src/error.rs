pub type Result<T, E = FilterError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("filter {id} is not registered")]
    NotFound { id: u16 },

    #[error("filter {name} ({id}) cannot be applied to this dataset")]
    CannotApply { id: u16, name: &'static str },

    #[error("filter {name} ({id}) failed: {reason}")]
    Failed {
        id: u16,
        name: &'static str,
        reason: String,
    },

    #[error("pipeline has {0} filters, more than the mask can describe")]
    TooManyFilters(usize),
}

impl FilterError {
    pub(crate) fn failed(filter: &dyn crate::Filter, reason: impl ToString) -> FilterError {
        FilterError::Failed {
            id: filter.id(),
            name: filter.name(),
            reason: reason.to_string(),
        }
    }
}
