//! Read model trait for query-side views.

/// A read model providing query access to denormalized data.
pub trait ReadModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of entries, or zero while a writer holds the model.
    fn count(&self) -> usize;
}
