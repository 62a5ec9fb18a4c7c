//! Typed CRUD services over a resource path
//!
//! `CrudService<T>` turns a base path such as `/customers` into the six
//! standard operations. Each one is a single `RequestPipeline::request` call,
//! so renewal, classification and notification behave exactly as for any
//! other call.
//!
//! Ids are percent-encoded into a single path segment, so an id can never
//! address anything outside `{base}/{id}`.

use std::fmt::Display;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::{DeserializeOwned, IgnoredAny};

use crate::error::{ApiResult, ClassifiedError};
use crate::pipeline::{RequestPipeline, RequestSpec};

pub struct CrudService<T> {
    pipeline: RequestPipeline,
    base: String,
    _resource: PhantomData<fn() -> T>,
}

impl<T> Clone for CrudService<T> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            base: self.base.clone(),
            _resource: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> CrudService<T> {
    pub fn new(pipeline: RequestPipeline, base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            pipeline,
            base: base.trim_end_matches('/').to_owned(),
            _resource: PhantomData,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// `GET {base}` with optional query parameters.
    pub async fn get_all(&self, query: &[(&str, &str)]) -> ApiResult<Vec<T>> {
        let req = RequestSpec::get(self.base.clone()).with_query(query.iter().copied());
        self.pipeline.request(req).await
    }

    /// `GET {base}/{id}`
    pub async fn get_by_id(&self, id: impl Display) -> ApiResult<T> {
        self.pipeline.request(RequestSpec::get(self.item(id)?)).await
    }

    /// `POST {base}`
    pub async fn create(&self, data: &impl Serialize) -> ApiResult<T> {
        let req = RequestSpec::post(self.base.clone()).with_body(to_body(data)?);
        self.pipeline.request(req).await
    }

    /// `PUT {base}/{id}`: full replacement.
    pub async fn update(&self, id: impl Display, data: &impl Serialize) -> ApiResult<T> {
        let req = RequestSpec::put(self.item(id)?).with_body(to_body(data)?);
        self.pipeline.request(req).await
    }

    /// `PATCH {base}/{id}`: partial update.
    pub async fn patch(&self, id: impl Display, data: &impl Serialize) -> ApiResult<T> {
        let req = RequestSpec::patch(self.item(id)?).with_body(to_body(data)?);
        self.pipeline.request(req).await
    }

    /// `DELETE {base}/{id}`. Whatever the backend returns is discarded.
    pub async fn delete(&self, id: impl Display) -> ApiResult<()> {
        self.pipeline
            .request::<IgnoredAny>(RequestSpec::delete(self.item(id)?))
            .await
            .map(|_| ())
    }

    fn item(&self, id: impl Display) -> ApiResult<String> {
        let id = id.to_string();
        // dot segments survive encoding and would be collapsed by the URL parser
        if matches!(id.as_str(), "" | "." | "..") {
            return Err(ClassifiedError::unexpected(
                None,
                format!("invalid resource id {id:?}"),
            ));
        }
        Ok(format!("{}/{}", self.base, urlencoding::encode(&id)))
    }
}

fn to_body(data: &impl Serialize) -> ApiResult<serde_json::Value> {
    serde_json::to_value(data)
        .map_err(|e| ClassifiedError::unexpected(None, format!("serializing request body: {e}")))
}
