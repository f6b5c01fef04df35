use crate::errors::IndexError;
use crate::source::{CollectScope, ItemStream, MergePolicy, SourceAdapter, SourceStage};
use crate::types::{RawFieldMap, SourceId};

/// Adds the same fields to every discovered item.
#[derive(Clone, Debug)]
pub struct ConstantSource {
    id: SourceId,
    fields: RawFieldMap,
    merge_policy: MergePolicy,
}

impl ConstantSource {
    /// Create a constant source.
    pub fn new(id: impl Into<SourceId>, fields: RawFieldMap) -> Self {
        Self {
            id: id.into(),
            fields,
            merge_policy: MergePolicy::Override,
        }
    }

    /// Override the merge policy.
    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }
}

impl SourceAdapter for ConstantSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    fn stage(&self) -> SourceStage {
        SourceStage::Derived
    }

    fn collect(&self, _scope: &CollectScope) -> Result<ItemStream<'_>, IndexError> {
        Ok(Box::new(std::iter::empty()))
    }

    fn derive(&self, _item_id: &str, _merged: &RawFieldMap) -> Result<RawFieldMap, IndexError> {
        Ok(self.fields.clone())
    }
}
