use super::types::{SeriesDescriptor, SignalType};
use crate::storage::{SeriesFilter, StoreError, TimeSeriesStore};
use std::sync::Arc;

/// Resolves which raw series exist for a site.
pub struct SignalCatalog {
    store: Arc<dyn TimeSeriesStore>,
}

impl SignalCatalog {
    pub fn new(store: Arc<dyn TimeSeriesStore>) -> Self {
        Self { store }
    }

    /// All series tagged with `site` and one of `signal_types`, sorted by external id.
    ///
    /// A site without matching series yields an empty list.
    pub async fn discover(
        &self,
        site: &str,
        signal_types: &[SignalType],
    ) -> Result<Vec<SeriesDescriptor>, StoreError> {
        let mut found = Vec::new();
        for signal_type in signal_types {
            let filter = SeriesFilter::new()
                .with_metadata("site", site)
                .with_metadata("type", signal_type.as_str());
            let series = self.store.list_series(&filter).await?;
            tracing::debug!(site, signal_type = %signal_type, count = series.len(), "Discovered series");
            found.extend(
                series
                    .into_iter()
                    .map(|info| SeriesDescriptor::new(info.external_id, site, *signal_type)),
            );
        }

        found.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        found.dedup_by(|a, b| a.external_id == b.external_id);
        Ok(found)
    }

    /// Discover the four raw input signal types.
    pub async fn discover_raw(&self, site: &str) -> Result<Vec<SeriesDescriptor>, StoreError> {
        self.discover(site, &SignalType::RAW).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DuckDbStore, NewSeries};
    use std::collections::BTreeMap;

    fn raw_series(external_id: &str, site: &str, typ: &str) -> NewSeries {
        let mut metadata = BTreeMap::new();
        metadata.insert("site".to_string(), site.to_string());
        metadata.insert("type".to_string(), typ.to_string());
        NewSeries {
            external_id: external_id.to_string(),
            name: external_id.to_string(),
            data_set_id: None,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_discover_raw_signals_for_site() {
        let store = DuckDbStore::in_memory().unwrap();
        store.init_schema().await.unwrap();
        store
            .create_series(&[
                raw_series("e1:count", "Oslo", "count"),
                raw_series("e1:status", "Oslo", "status"),
                raw_series("e1:oee", "Oslo", "oee"),
                raw_series("e2:count", "London", "count"),
            ])
            .await
            .unwrap();

        let catalog = SignalCatalog::new(Arc::new(store));
        let found = catalog.discover_raw("Oslo").await.unwrap();

        assert_eq!(
            found,
            vec![
                SeriesDescriptor::new("e1:count", "Oslo", SignalType::Count),
                SeriesDescriptor::new("e1:status", "Oslo", SignalType::Status),
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_site_is_empty_not_error() {
        let store = DuckDbStore::in_memory().unwrap();
        store.init_schema().await.unwrap();
        let catalog = SignalCatalog::new(Arc::new(store));

        assert!(catalog.discover_raw("Atlantis").await.unwrap().is_empty());
    }
}
