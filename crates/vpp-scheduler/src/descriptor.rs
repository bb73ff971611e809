//! The descriptor contract and its type-erased form used by the scheduler.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DescriptorError;
use crate::kv::{
    downcast_value, AnyMetadata, AnyValue, Dependency, KeyValuePair, ProtoValue, RetrieveSource,
    RetrievedItem,
};
use crate::metadata::MetadataIndex;

/// Behavior contract for one kind of configuration item.
///
/// Only `name`, `key_prefix`, `create` and `delete` are mandatory. Every other
/// capability has a default: no validation, no in-place update (changes are
/// realized as Delete+Create), structural equality, no dependencies, no
/// derived values, not retrievable and no published metadata.
#[async_trait]
pub trait Descriptor: Send + Sync + 'static {
    /// Model type of the values this descriptor manages.
    type Value: ProtoValue + Clone + PartialEq;
    /// Runtime state attached to a configured value.
    type Metadata: Clone + fmt::Debug + Send + Sync + 'static;

    fn name(&self) -> &str;

    /// Common prefix of every key this descriptor claims.
    fn key_prefix(&self) -> &str;

    /// Key selector. Defaults to a prefix match.
    fn is_key_valid(&self, key: &str) -> bool {
        key.starts_with(self.key_prefix())
    }

    /// Name under which the item is published in the metadata index.
    fn key_label(&self, key: &str) -> String {
        key.strip_prefix(self.key_prefix()).unwrap_or(key).to_string()
    }

    fn value_type_name(&self) -> &str {
        std::any::type_name::<Self::Value>()
    }

    fn validate(&self, _key: &str, _value: &Self::Value) -> Result<(), DescriptorError> {
        Ok(())
    }

    async fn create(&self, key: &str, value: &Self::Value)
        -> Result<Self::Metadata, DescriptorError>;

    async fn delete(
        &self,
        key: &str,
        value: &Self::Value,
        metadata: Option<&Self::Metadata>,
    ) -> Result<(), DescriptorError>;

    /// Whether `update` is implemented.
    fn supports_update(&self) -> bool {
        false
    }

    async fn update(
        &self,
        _key: &str,
        _old: &Self::Value,
        _new: &Self::Value,
        _old_metadata: Option<&Self::Metadata>,
    ) -> Result<Self::Metadata, DescriptorError> {
        Err(DescriptorError::unsupported(self.name(), "update"))
    }

    /// Returns true when the change must be applied as Delete+Create.
    fn update_with_recreate(
        &self,
        _key: &str,
        _old: &Self::Value,
        _new: &Self::Value,
        _metadata: Option<&Self::Metadata>,
    ) -> bool {
        !self.supports_update()
    }

    /// Value comparator ignoring fields the dataplane does not report back.
    fn equivalent(&self, _key: &str, old: &Self::Value, new: &Self::Value) -> bool {
        old == new
    }

    fn is_retriable_failure(&self, err: &DescriptorError) -> bool {
        err.is_retriable()
    }

    fn dependencies(&self, _key: &str, _value: &Self::Value) -> Vec<Dependency> {
        Vec::new()
    }

    fn derived_values(&self, _key: &str, _value: &Self::Value) -> Vec<KeyValuePair> {
        Vec::new()
    }

    fn retrieve_source(&self) -> RetrieveSource {
        RetrieveSource::Unsupported
    }

    /// Names of descriptors whose retrieve must complete before this one.
    fn retrieve_dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Dumps every live item of this kind.
    ///
    /// `correlate` holds the desired values (with known metadata) so that
    /// rediscovered items can be matched to their northbound counterparts.
    async fn retrieve(
        &self,
        _correlate: &[RetrievedItem<Self::Value, Self::Metadata>],
    ) -> Result<Vec<RetrievedItem<Self::Value, Self::Metadata>>, DescriptorError> {
        Ok(Vec::new())
    }

    /// Index the scheduler keeps up to date with this descriptor's metadata.
    fn metadata_index(&self) -> Option<Arc<MetadataIndex<Self::Metadata>>> {
        None
    }
}

/// Retrieved item with erased value and metadata.
pub type AnyItem = RetrievedItem<AnyValue, AnyMetadata>;

/// Object-safe form of [`Descriptor`] the scheduler dispatches through.
#[async_trait]
pub trait KvDescriptor: Send + Sync {
    fn name(&self) -> &str;
    fn key_prefix(&self) -> &str;
    fn is_key_valid(&self, key: &str) -> bool;
    fn value_type_name(&self) -> &str;
    fn validate(&self, key: &str, value: &AnyValue) -> Result<(), DescriptorError>;
    async fn create(&self, key: &str, value: &AnyValue) -> Result<AnyMetadata, DescriptorError>;
    async fn update(
        &self,
        key: &str,
        old: &AnyValue,
        new: &AnyValue,
        metadata: Option<&AnyMetadata>,
    ) -> Result<AnyMetadata, DescriptorError>;
    async fn delete(
        &self,
        key: &str,
        value: &AnyValue,
        metadata: Option<&AnyMetadata>,
    ) -> Result<(), DescriptorError>;
    fn update_with_recreate(
        &self,
        key: &str,
        old: &AnyValue,
        new: &AnyValue,
        metadata: Option<&AnyMetadata>,
    ) -> bool;
    fn equivalent(&self, key: &str, old: &AnyValue, new: &AnyValue) -> bool;
    fn is_retriable_failure(&self, err: &DescriptorError) -> bool;
    fn dependencies(&self, key: &str, value: &AnyValue) -> Vec<Dependency>;
    fn derived_values(&self, key: &str, value: &AnyValue) -> Vec<KeyValuePair>;
    fn retrieve_source(&self) -> RetrieveSource;
    fn retrieve_dependencies(&self) -> Vec<String>;
    async fn retrieve(&self, correlate: Vec<AnyItem>) -> Result<Vec<AnyItem>, DescriptorError>;
    fn index_put(&self, key: &str, metadata: &AnyMetadata);
    fn index_remove(&self, key: &str);
}

/// Bridges a typed [`Descriptor`] to [`KvDescriptor`].
///
/// Values reach a descriptor only through keys its selector claimed, so the
/// downcasts below fail only on programming errors; they surface as
/// `DescriptorError::ValueType` rather than panics.
pub(crate) struct DescriptorAdapter<D: Descriptor> {
    inner: D,
    index: Option<Arc<MetadataIndex<D::Metadata>>>,
}

impl<D: Descriptor> DescriptorAdapter<D> {
    pub(crate) fn new(inner: D) -> Self {
        let index = inner.metadata_index();
        Self { inner, index }
    }

    fn value<'a>(&self, key: &str, value: &'a AnyValue) -> Result<&'a D::Value, DescriptorError> {
        downcast_value::<D::Value>(value.as_ref()).ok_or_else(|| DescriptorError::ValueType {
            key: key.to_string(),
            expected: self.inner.value_type_name().to_string(),
        })
    }

    fn metadata<'a>(metadata: Option<&'a AnyMetadata>) -> Option<&'a D::Metadata> {
        metadata.and_then(|m| m.downcast_ref::<D::Metadata>())
    }
}

#[async_trait]
impl<D: Descriptor> KvDescriptor for DescriptorAdapter<D> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn key_prefix(&self) -> &str {
        self.inner.key_prefix()
    }

    fn is_key_valid(&self, key: &str) -> bool {
        self.inner.is_key_valid(key)
    }

    fn value_type_name(&self) -> &str {
        self.inner.value_type_name()
    }

    fn validate(&self, key: &str, value: &AnyValue) -> Result<(), DescriptorError> {
        let value = self.value(key, value)?;
        self.inner.validate(key, value)
    }

    async fn create(&self, key: &str, value: &AnyValue) -> Result<AnyMetadata, DescriptorError> {
        let value = self.value(key, value)?;
        let metadata = self.inner.create(key, value).await?;
        Ok(Arc::new(metadata) as AnyMetadata)
    }

    async fn update(
        &self,
        key: &str,
        old: &AnyValue,
        new: &AnyValue,
        metadata: Option<&AnyMetadata>,
    ) -> Result<AnyMetadata, DescriptorError> {
        let old = self.value(key, old)?;
        let new = self.value(key, new)?;
        let metadata = self
            .inner
            .update(key, old, new, Self::metadata(metadata))
            .await?;
        Ok(Arc::new(metadata) as AnyMetadata)
    }

    async fn delete(
        &self,
        key: &str,
        value: &AnyValue,
        metadata: Option<&AnyMetadata>,
    ) -> Result<(), DescriptorError> {
        let value = self.value(key, value)?;
        self.inner.delete(key, value, Self::metadata(metadata)).await
    }

    fn update_with_recreate(
        &self,
        key: &str,
        old: &AnyValue,
        new: &AnyValue,
        metadata: Option<&AnyMetadata>,
    ) -> bool {
        match (self.value(key, old), self.value(key, new)) {
            (Ok(old), Ok(new)) => {
                !self.inner.supports_update()
                    || self
                        .inner
                        .update_with_recreate(key, old, new, Self::metadata(metadata))
            }
            _ => true,
        }
    }

    fn equivalent(&self, key: &str, old: &AnyValue, new: &AnyValue) -> bool {
        match (self.value(key, old), self.value(key, new)) {
            (Ok(old), Ok(new)) => self.inner.equivalent(key, old, new),
            _ => false,
        }
    }

    fn is_retriable_failure(&self, err: &DescriptorError) -> bool {
        self.inner.is_retriable_failure(err)
    }

    fn dependencies(&self, key: &str, value: &AnyValue) -> Vec<Dependency> {
        self.value(key, value)
            .map(|v| self.inner.dependencies(key, v))
            .unwrap_or_default()
    }

    fn derived_values(&self, key: &str, value: &AnyValue) -> Vec<KeyValuePair> {
        self.value(key, value)
            .map(|v| self.inner.derived_values(key, v))
            .unwrap_or_default()
    }

    fn retrieve_source(&self) -> RetrieveSource {
        self.inner.retrieve_source()
    }

    fn retrieve_dependencies(&self) -> Vec<String> {
        self.inner.retrieve_dependencies()
    }

    async fn retrieve(&self, correlate: Vec<AnyItem>) -> Result<Vec<AnyItem>, DescriptorError> {
        let correlate: Vec<RetrievedItem<D::Value, D::Metadata>> = correlate
            .into_iter()
            .filter_map(|item| {
                let value = downcast_value::<D::Value>(item.value.as_ref())?.clone();
                Some(RetrievedItem {
                    metadata: Self::metadata(item.metadata.as_ref()).cloned(),
                    key: item.key,
                    value,
                    origin: item.origin,
                })
            })
            .collect();

        let items = self.inner.retrieve(&correlate).await?;
        Ok(items
            .into_iter()
            .map(|item| {
                let value: AnyValue = Arc::new(item.value);
                RetrievedItem {
                    key: item.key,
                    value,
                    metadata: item.metadata.map(|m| Arc::new(m) as AnyMetadata),
                    origin: item.origin,
                }
            })
            .collect())
    }

    fn index_put(&self, key: &str, metadata: &AnyMetadata) {
        if let (Some(index), Some(metadata)) =
            (&self.index, metadata.downcast_ref::<D::Metadata>())
        {
            index.put(self.inner.key_label(key), metadata.clone());
        }
    }

    fn index_remove(&self, key: &str) {
        if let Some(index) = &self.index {
            index.remove(&self.inner.key_label(key));
        }
    }
}

impl fmt::Debug for dyn KvDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvDescriptor")
            .field("name", &self.name())
            .field("key_prefix", &self.key_prefix())
            .finish()
    }
}
