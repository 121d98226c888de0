//! Resource API
//!
//! Create/get/list/update/delete for Emails and EmailSenderConfigs, and
//! write-only access to Secrets. Writes land in the same stores the
//! controllers watch.

use crate::error::ApiError;
use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use email::{Email, EmailSenderConfig, EmailSenderConfigSpec, EmailSpec, Secret};
use reconcile_worker::{InMemoryStore, ObjectKey, ObjectReader, Resource, StoreError};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

type ApiResult<T> = Result<T, ApiError>;

/// Object stores shared by the API and the controllers
#[derive(Clone, Default)]
pub struct Stores {
    pub emails: Arc<InMemoryStore<Email>>,
    pub sender_configs: Arc<InMemoryStore<EmailSenderConfig>>,
    pub secrets: Arc<InMemoryStore<Secret>>,
}

impl Stores {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A kind exposed through the generic CRUD handlers.
pub trait ApiResource: Resource + Serialize {
    type Spec: DeserializeOwned + Send + 'static;

    fn build(namespace: &str, name: &str, spec: Self::Spec) -> Self;

    fn store(stores: &Stores) -> &InMemoryStore<Self>;
}

impl ApiResource for Email {
    type Spec = EmailSpec;

    fn build(namespace: &str, name: &str, spec: EmailSpec) -> Self {
        Email::new(namespace, name, spec)
    }

    fn store(stores: &Stores) -> &InMemoryStore<Self> {
        &stores.emails
    }
}

impl ApiResource for EmailSenderConfig {
    type Spec = EmailSenderConfigSpec;

    fn build(namespace: &str, name: &str, spec: EmailSenderConfigSpec) -> Self {
        EmailSenderConfig::new(namespace, name, spec)
    }

    fn store(stores: &Stores) -> &InMemoryStore<Self> {
        &stores.sender_configs
    }
}

/// Request metadata. The namespace always comes from the path.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMeta {
    #[serde(default)]
    pub name: Option<String>,
    /// Non-zero makes an update conditional on the stored version.
    #[serde(default)]
    pub resource_version: u64,
}

/// `{"metadata": {...}, "spec": {...}}`; any status in the body is ignored.
#[derive(Debug, Deserialize)]
pub struct ObjectRequest<S> {
    #[serde(default)]
    pub metadata: RequestMeta,
    pub spec: S,
}

#[derive(Debug, Deserialize)]
pub struct SecretRequest {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

/// Create the resource API router
pub fn router(stores: Stores) -> Router {
    Router::new()
        .route(
            "/api/v1/namespaces/{namespace}/emails",
            get(list::<Email>).post(create::<Email>),
        )
        .route(
            "/api/v1/namespaces/{namespace}/emails/{name}",
            get(fetch::<Email>)
                .put(replace::<Email>)
                .delete(remove::<Email>),
        )
        .route(
            "/api/v1/namespaces/{namespace}/emailsenderconfigs",
            get(list::<EmailSenderConfig>).post(create::<EmailSenderConfig>),
        )
        .route(
            "/api/v1/namespaces/{namespace}/emailsenderconfigs/{name}",
            get(fetch::<EmailSenderConfig>)
                .put(replace::<EmailSenderConfig>)
                .delete(remove::<EmailSenderConfig>),
        )
        .route(
            "/api/v1/namespaces/{namespace}/secrets/{name}",
            put(put_secret).delete(delete_secret),
        )
        .with_state(stores)
}

async fn list<K: ApiResource>(
    State(stores): State<Stores>,
    Path(namespace): Path<String>,
) -> Json<Vec<K>> {
    Json(K::store(&stores).list_namespace(&namespace).await)
}

async fn create<K: ApiResource>(
    State(stores): State<Stores>,
    Path(namespace): Path<String>,
    payload: Result<Json<ObjectRequest<K::Spec>>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let name = request
        .metadata
        .name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ApiError::BadRequest("metadata.name is required".to_string()))?;

    let created = K::store(&stores)
        .create(K::build(&namespace, &name, request.spec))
        .await?;

    info!(kind = K::KIND, object = %created.key(), "Object created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn fetch<K: ApiResource>(
    State(stores): State<Stores>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<Json<K>> {
    let key = ObjectKey::new(namespace, name);
    K::store(&stores)
        .get(&key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} {} not found", K::KIND, key)))
}

async fn replace<K: ApiResource>(
    State(stores): State<Stores>,
    Path((namespace, name)): Path<(String, String)>,
    payload: Result<Json<ObjectRequest<K::Spec>>, JsonRejection>,
) -> ApiResult<Json<K>> {
    let Json(request) = payload?;
    match request.metadata.name.as_deref() {
        Some(body_name) if body_name != name => {
            return Err(ApiError::BadRequest(format!(
                "metadata.name '{body_name}' does not match '{name}'"
            )));
        }
        _ => {}
    }

    let mut object = K::build(&namespace, &name, request.spec);
    object.meta_mut().resource_version = request.metadata.resource_version;

    let updated = K::store(&stores).update(object).await?;
    info!(kind = K::KIND, object = %updated.key(), "Object updated");
    Ok(Json(updated))
}

async fn remove<K: ApiResource>(
    State(stores): State<Stores>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let key = ObjectKey::new(namespace, name);
    K::store(&stores).delete(&key).await?;
    info!(kind = K::KIND, object = %key, "Object deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Create or replace a Secret. Contents are never echoed back.
async fn put_secret(
    State(stores): State<Stores>,
    Path((namespace, name)): Path<(String, String)>,
    payload: Result<Json<SecretRequest>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(request) = payload?;
    let secret = request
        .data
        .into_iter()
        .fold(Secret::new(&namespace, &name), |secret, (key, value)| {
            secret.with_entry(key, value)
        });
    let key = secret.key();

    match stores.secrets.update(secret.clone()).await {
        Ok(_) => {
            info!(object = %key, "Secret replaced");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(StoreError::NotFound { .. }) => {
            stores.secrets.create(secret).await?;
            info!(object = %key, "Secret created");
            Ok(StatusCode::CREATED)
        }
        Err(e) => Err(e.into()),
    }
}

async fn delete_secret(
    State(stores): State<Stores>,
    Path((namespace, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let key = ObjectKey::new(namespace, name);
    stores.secrets.delete(&key).await?;
    info!(object = %key, "Secret deleted");
    Ok(StatusCode::NO_CONTENT)
}
