use crate::signal::types::{equipment_id_of, MetricBatch};
use crate::storage::{DatapointBatch, NewSeries, SeriesFilter, StoreError, TimeSeriesStore};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Human-readable series name: split on `:` and `_`, title-case every segment
/// after the first, join with spaces.
pub fn display_name(external_id: &str) -> String {
    external_id
        .split([':', '_'])
        .enumerate()
        .map(|(i, segment)| {
            if i == 0 {
                segment.to_string()
            } else {
                title_case(segment)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Uppercase letters that follow a non-letter, lowercase the rest.
fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut previous_is_letter = false;
    for c in word.chars() {
        if previous_is_letter {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        previous_is_letter = c.is_alphabetic();
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub series_created: usize,
    pub datapoints_written: usize,
}

/// Creates missing output series and appends computed datapoints.
pub struct ResultUpserter {
    store: Arc<dyn TimeSeriesStore>,
    data_set_id: String,
}

impl ResultUpserter {
    pub fn new(store: Arc<dyn TimeSeriesStore>, data_set_id: impl Into<String>) -> Self {
        Self {
            store,
            data_set_id: data_set_id.into(),
        }
    }

    /// Write one metric batch.
    ///
    /// Re-running with the same batch creates no new series and rewrites the
    /// same (series, timestamp) datapoints.
    pub async fn upsert(&self, batch: &MetricBatch) -> Result<UpsertOutcome, StoreError> {
        if batch.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let filter = SeriesFilter::new()
            .with_data_set(self.data_set_id.as_str())
            .with_metadata("type", batch.metric_type.as_str());
        let known: HashSet<String> = self
            .store
            .list_series(&filter)
            .await?
            .into_iter()
            .map(|s| s.external_id)
            .collect();

        let mut seen = HashSet::new();
        let mut missing: Vec<NewSeries> = batch
            .series
            .iter()
            .map(|(external_id, _)| external_id)
            .filter(|id| !known.contains(*id) && seen.insert(id.as_str()))
            .map(|id| self.new_series(id, batch))
            .collect();

        let series_created = self.create_missing(&mut missing).await?;
        if series_created > 0 {
            tracing::info!(
                metric = %batch.metric_type,
                site = %batch.site,
                count = series_created,
                "Created missing series"
            );
        }

        let datapoints: Vec<DatapointBatch> = batch
            .series
            .iter()
            .map(|(external_id, points)| DatapointBatch {
                external_id: external_id.clone(),
                datapoints: points.clone(),
            })
            .collect();
        self.store.insert_datapoints(&datapoints).await?;

        let datapoints_written = batch.datapoint_count();
        tracing::debug!(
            metric = %batch.metric_type,
            site = %batch.site,
            series = datapoints.len(),
            datapoints = datapoints_written,
            "Inserted datapoints"
        );

        Ok(UpsertOutcome {
            series_created,
            datapoints_written,
        })
    }

    /// Create `missing`, tolerating ids another writer created in the meantime.
    async fn create_missing(&self, missing: &mut Vec<NewSeries>) -> Result<usize, StoreError> {
        while !missing.is_empty() {
            match self.store.create_series(missing).await {
                Ok(()) => return Ok(missing.len()),
                Err(StoreError::AlreadyExists(existing)) => {
                    let existing: HashSet<String> = existing.into_iter().collect();
                    let before = missing.len();
                    missing.retain(|s| !existing.contains(&s.external_id));
                    if missing.len() == before {
                        // The store named ids we did not ask for; nothing left to resolve
                        return Err(StoreError::AlreadyExists(existing.into_iter().collect()));
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(0)
    }

    fn new_series(&self, external_id: &str, batch: &MetricBatch) -> NewSeries {
        let mut metadata = BTreeMap::new();
        metadata.insert("type".to_string(), batch.metric_type.as_str().to_string());
        metadata.insert("site".to_string(), batch.site.clone());
        metadata.insert("equipment".to_string(), equipment_id_of(external_id).to_string());

        NewSeries {
            external_id: external_id.to_string(),
            name: display_name(external_id),
            data_set_id: Some(self.data_set_id.clone()),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::types::{SamplePoint, SignalType};
    use crate::storage::{Aggregate, DuckDbStore};

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("e1:off_spec"), "e1 Off Spec");
        assert_eq!(display_name("oslo_line2:oee"), "oslo Line2 Oee");
        assert_eq!(display_name("plain"), "plain");
        assert_eq!(display_name("a:PLANNED_status"), "a Planned Status");
    }

    async fn setup() -> (Arc<DuckDbStore>, ResultUpserter) {
        let store = Arc::new(DuckDbStore::in_memory().unwrap());
        store.init_schema().await.unwrap();
        let upserter = ResultUpserter::new(store.clone(), "uc:001:oee:ds");
        (store, upserter)
    }

    fn quality_batch(values: &[(i64, f64)]) -> MetricBatch {
        let mut batch = MetricBatch::new(SignalType::Quality, "Oslo");
        let points: Vec<SamplePoint> = values.iter().map(|&(t, v)| SamplePoint::new(t, v)).collect();
        batch.series.push(("e1:quality".to_string(), points.clone()));
        batch.series.push(("e2:quality".to_string(), points));
        batch
    }

    #[tokio::test]
    async fn test_creates_missing_series_with_metadata() {
        let (store, upserter) = setup().await;

        let outcome = upserter.upsert(&quality_batch(&[(0, 0.5)])).await.unwrap();
        assert_eq!(outcome.series_created, 2);
        assert_eq!(outcome.datapoints_written, 2);

        let created = store
            .list_series(&SeriesFilter::new().with_data_set("uc:001:oee:ds"))
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].external_id, "e1:quality");
        assert_eq!(created[0].name, "e1 Quality");
        assert_eq!(created[0].metadata["type"], "quality");
        assert_eq!(created[0].metadata["site"], "Oslo");
        assert_eq!(created[0].metadata["equipment"], "e1");
    }

    #[tokio::test]
    async fn test_upsert_twice_converges_to_same_state() {
        let (store, upserter) = setup().await;
        let batch = quality_batch(&[(0, 0.5), (60_000, 0.75)]);

        upserter.upsert(&batch).await.unwrap();
        let second = upserter.upsert(&batch).await.unwrap();
        assert_eq!(second.series_created, 0);

        let all = store.list_series(&SeriesFilter::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let points = store
            .retrieve_aggregates(&["e1:quality".to_string()], 0, 120_000, 60_000, Aggregate::Sum)
            .await
            .unwrap();
        assert_eq!(
            points[0].points,
            vec![SamplePoint::new(0, 0.5), SamplePoint::new(60_000, 0.75)]
        );
    }

    #[tokio::test]
    async fn test_series_created_outside_data_set_is_tolerated() {
        let (store, upserter) = setup().await;
        // Same id already exists but is not visible under the target data set
        store
            .create_series(&[NewSeries {
                external_id: "e1:quality".to_string(),
                name: "legacy".to_string(),
                data_set_id: None,
                metadata: BTreeMap::new(),
            }])
            .await
            .unwrap();

        let outcome = upserter.upsert(&quality_batch(&[(0, 1.0)])).await.unwrap();
        assert_eq!(outcome.series_created, 1);
        assert_eq!(store.list_series(&SeriesFilter::new()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let (_store, upserter) = setup().await;
        let outcome = upserter
            .upsert(&MetricBatch::new(SignalType::Oee, "Oslo"))
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::default());
    }
}
