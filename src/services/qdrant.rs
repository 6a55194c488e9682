//! Qdrant backend for the vector tier.
//!
//! One collection per project, named `{prefix}{project_id}`, created
//! lazily on first write. Every failure is surfaced as
//! `Error::VectorStore`, which the coordinator treats as degradable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use qdrant_client::qdrant::{
    condition::ConditionOneOf, r#match::MatchValue, Condition, CreateCollectionBuilder,
    DeletePointsBuilder, Distance, FieldCondition, Filter, Match, PointId, PointStruct,
    ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::QdrantConfig;
use crate::error::{Error, Result};

use super::vector::{VectorFilter, VectorHit, VectorIndex, VectorRecord, UPSERT_BATCH_SIZE};
use super::vector::{KEY_AGENT_ID, KEY_ENTITY_ID, KEY_KIND};

/// Vector tier backed by a Qdrant server.
#[derive(Clone)]
pub struct QdrantIndex {
    inner: Arc<QdrantIndexInner>,
}

struct QdrantIndexInner {
    client: Qdrant,
    prefix: String,
    dimension: usize,
}

impl QdrantIndex {
    /// Connect to Qdrant and verify the connection.
    pub async fn connect(config: &QdrantConfig, dimension: usize) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .build()
            .map_err(|e| Error::VectorStore(format!("Failed to connect to Qdrant: {}", e)))?;

        client
            .list_collections()
            .await
            .map_err(|e| Error::VectorStore(format!("Qdrant connection test failed: {}", e)))?;

        info!(url = %config.url, prefix = %config.collection_prefix, "Qdrant vector tier connected");

        Ok(Self {
            inner: Arc::new(QdrantIndexInner {
                client,
                prefix: config.collection_prefix.clone(),
                dimension,
            }),
        })
    }

    fn collection_name(&self, project_id: &str) -> String {
        format!("{}{}", self.inner.prefix, project_id)
    }

    /// Create the project's collection if it does not exist yet.
    async fn ensure_collection(&self, project_id: &str) -> Result<()> {
        let collection = self.collection_name(project_id);

        let exists = self
            .inner
            .client
            .collection_exists(&collection)
            .await
            .map_err(|e| Error::VectorStore(format!("Failed to check collection: {}", e)))?;

        if exists {
            return Ok(());
        }

        self.inner
            .client
            .create_collection(
                CreateCollectionBuilder::new(&collection).vectors_config(
                    VectorParamsBuilder::new(self.inner.dimension as u64, Distance::Cosine),
                ),
            )
            .await
            .map_err(|e| Error::VectorStore(format!("Failed to create collection: {}", e)))?;

        info!(collection = %collection, dimension = self.inner.dimension, "Created Qdrant collection");

        Ok(())
    }

    /// Delete individual points from a project's collection.
    pub async fn delete_points(&self, project_id: &str, ids: Vec<String>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let collection = self.collection_name(project_id);
        let point_ids: Vec<PointId> = ids
            .iter()
            .map(|id| PointId::from(point_uuid(id)))
            .collect();

        self.inner
            .client
            .delete_points(DeletePointsBuilder::new(&collection).points(point_ids))
            .await
            .map_err(|e| Error::VectorStore(format!("Failed to delete points: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn upsert(&self, project_id: &str, records: Vec<VectorRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        self.ensure_collection(project_id).await?;

        let collection = self.collection_name(project_id);
        let total = records.len();

        let points: Vec<PointStruct> = records
            .into_iter()
            .map(|record| {
                let mut payload: HashMap<String, QdrantValue> = record
                    .metadata
                    .into_iter()
                    .filter_map(|(k, v)| json_to_qdrant_value(v).map(|qv| (k, qv)))
                    .collect();

                // Qdrant only takes UUID or integer point ids; the store's
                // entity id rides in the payload and comes back on search.
                payload.insert(KEY_ENTITY_ID.to_string(), QdrantValue::from(record.id.as_str()));

                PointStruct::new(point_uuid(&record.id), record.embedding, payload)
            })
            .collect();

        for batch in points.chunks(UPSERT_BATCH_SIZE) {
            self.inner
                .client
                .upsert_points(UpsertPointsBuilder::new(&collection, batch.to_vec()))
                .await
                .map_err(|e| Error::VectorStore(format!("Failed to upsert points: {}", e)))?;
        }

        debug!(collection = %collection, count = total, "Upserted points");

        Ok(())
    }

    async fn search(
        &self,
        project_id: &str,
        embedding: Vec<f32>,
        top_k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<VectorHit>> {
        let collection = self.collection_name(project_id);

        let exists = self
            .inner
            .client
            .collection_exists(&collection)
            .await
            .map_err(|e| Error::VectorStore(format!("Failed to check collection: {}", e)))?;

        // Nothing has been written for this project yet
        if !exists {
            return Ok(Vec::new());
        }

        let mut builder =
            SearchPointsBuilder::new(&collection, embedding, top_k as u64).with_payload(true);

        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            builder = builder.filter(to_qdrant_filter(&f));
        }

        let response = self
            .inner
            .client
            .search_points(builder)
            .await
            .map_err(|e| Error::VectorStore(format!("Search failed: {}", e)))?;

        Ok(response.result.into_iter().map(scored_point_to_hit).collect())
    }

    async fn delete_project(&self, project_id: &str) -> Result<()> {
        let collection = self.collection_name(project_id);

        let exists = self
            .inner
            .client
            .collection_exists(&collection)
            .await
            .map_err(|e| Error::VectorStore(format!("Failed to check collection: {}", e)))?;

        if !exists {
            return Ok(());
        }

        self.inner
            .client
            .delete_collection(&collection)
            .await
            .map_err(|e| Error::VectorStore(format!("Failed to delete collection: {}", e)))?;

        info!(collection = %collection, "Deleted Qdrant collection");

        Ok(())
    }
}

fn to_qdrant_filter(filter: &VectorFilter) -> Filter {
    let mut conditions = Vec::new();

    if let Some(ref kind) = filter.kind {
        conditions.push(make_match_condition(KEY_KIND, kind));
    }

    if let Some(ref agent_id) = filter.agent_id {
        conditions.push(make_match_condition(KEY_AGENT_ID, agent_id));
    }

    Filter {
        must: conditions,
        ..Default::default()
    }
}

fn make_match_condition(key: &str, value: &str) -> Condition {
    Condition {
        condition_one_of: Some(ConditionOneOf::Field(FieldCondition {
            key: key.to_string(),
            r#match: Some(Match {
                match_value: Some(MatchValue::Keyword(value.to_string())),
            }),
            ..Default::default()
        })),
    }
}

fn json_to_qdrant_value(value: Value) -> Option<QdrantValue> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(QdrantValue::from(b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(QdrantValue::from(i))
            } else if let Some(f) = n.as_f64() {
                Some(QdrantValue::from(f))
            } else {
                None
            }
        }
        Value::String(s) => Some(QdrantValue::from(s)),
        Value::Array(arr) => {
            let values: Vec<QdrantValue> =
                arr.into_iter().filter_map(json_to_qdrant_value).collect();
            if values.is_empty() {
                None
            } else {
                Some(QdrantValue::from(values))
            }
        }
        // Nested objects are stored as their JSON text
        Value::Object(_) => Some(QdrantValue::from(value.to_string())),
    }
}

fn qdrant_value_to_json(value: QdrantValue) -> Option<Value> {
    use qdrant_client::qdrant::value::Kind;

    match value.kind {
        Some(Kind::NullValue(_)) => Some(Value::Null),
        Some(Kind::BoolValue(b)) => Some(Value::Bool(b)),
        Some(Kind::IntegerValue(i)) => Some(Value::Number(i.into())),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d).map(Value::Number),
        Some(Kind::StringValue(s)) => Some(Value::String(s)),
        Some(Kind::ListValue(list)) => {
            let values: Vec<Value> = list
                .values
                .into_iter()
                .filter_map(qdrant_value_to_json)
                .collect();
            Some(Value::Array(values))
        }
        Some(Kind::StructValue(obj)) => {
            let map: serde_json::Map<String, Value> = obj
                .fields
                .into_iter()
                .filter_map(|(k, v)| qdrant_value_to_json(v).map(|jv| (k, jv)))
                .collect();
            Some(Value::Object(map))
        }
        None => None,
    }
}

/// Deterministic UUID for a store entity id, since Qdrant rejects
/// arbitrary string point ids.
fn point_uuid(entity_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, entity_id.as_bytes()).to_string()
}

fn scored_point_to_hit(point: ScoredPoint) -> VectorHit {
    let point_id = match point.id {
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid)),
        }) => uuid,
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(num)),
        }) => num.to_string(),
        _ => String::new(),
    };

    let metadata: HashMap<String, Value> = point
        .payload
        .into_iter()
        .filter_map(|(k, v)| qdrant_value_to_json(v).map(|jv| (k, jv)))
        .collect();

    // The entity id travels in the payload; the raw point id is only a
    // fallback for points written by older code.
    let id = metadata
        .get(KEY_ENTITY_ID)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or(point_id);

    VectorHit {
        id,
        score: point.score,
        metadata,
    }
}
