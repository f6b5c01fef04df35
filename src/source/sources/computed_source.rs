use std::fmt;
use std::sync::Arc;

use crate::errors::IndexError;
use crate::source::{CollectScope, ItemStream, MergePolicy, SourceAdapter, SourceStage};
use crate::types::{RawFieldMap, SourceId};

/// Pure function of an item id and the fields merged so far.
pub type ComputeFn =
    Arc<dyn Fn(&str, &RawFieldMap) -> Result<RawFieldMap, String> + Send + Sync + 'static>;

/// Adds fields computed per item after every primary source ran.
#[derive(Clone)]
pub struct ComputedSource {
    id: SourceId,
    compute: ComputeFn,
    merge_policy: MergePolicy,
}

impl fmt::Debug for ComputedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedSource")
            .field("id", &self.id)
            .field("merge_policy", &self.merge_policy)
            .finish_non_exhaustive()
    }
}

impl ComputedSource {
    /// Create a computed source.
    pub fn new<F>(id: impl Into<SourceId>, compute: F) -> Self
    where
        F: Fn(&str, &RawFieldMap) -> Result<RawFieldMap, String> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            compute: Arc::new(compute),
            merge_policy: MergePolicy::Override,
        }
    }

    /// Override the merge policy.
    pub fn with_merge_policy(mut self, merge_policy: MergePolicy) -> Self {
        self.merge_policy = merge_policy;
        self
    }
}

impl SourceAdapter for ComputedSource {
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

    fn derive(&self, item_id: &str, merged: &RawFieldMap) -> Result<RawFieldMap, IndexError> {
        (self.compute)(item_id, merged).map_err(|reason| IndexError::SourceRead {
            source_id: self.id.clone(),
            item_id: Some(item_id.to_string()),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::RawValue;

    #[test]
    fn computes_from_id_and_merged_fields() {
        let source = ComputedSource::new("computed", |item_id, merged| {
            let title = merged
                .get("title")
                .and_then(RawValue::as_text)
                .ok_or_else(|| "no title".to_string())?;
            let mut fields = RawFieldMap::new();
            fields.insert("label".into(), RawValue::text(format!("{item_id}: {title}")));
            Ok(fields)
        });

        let mut merged = RawFieldMap::new();
        merged.insert("title".into(), RawValue::from("Es fuhr"));
        let derived = source.derive("7", &merged).unwrap();
        assert_eq!(derived["label"], RawValue::from("7: Es fuhr"));

        let err = source.derive("8", &RawFieldMap::new()).unwrap_err();
        assert!(matches!(err, IndexError::SourceRead { item_id: Some(ref id), .. } if id == "8"));
    }
}
