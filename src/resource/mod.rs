//! Typed CRUD services over the resilient client.
//!
//! # Cache Tags
//! ```text
//! find_all            → "{resource}"
//! find_by_id(id)      → "{resource}:{id}"
//! find_by_user_id(u)  → "{resource}:user:{u}"
//!
//! create              invalidates "{resource}"
//! update / delete     invalidates "{resource}", "{resource}:{id}"
//! *_for_user(u, ..)   additionally invalidates "{resource}:user:{u}"
//! ```
//!
//! Subject-scoped lists never carry the bare resource tag, so a mutation for
//! one subject leaves every other subject's cached list alone.

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::marker::PhantomData;
use std::time::Duration;

use crate::client::ResilientClient;
use crate::error::ApiError;
use crate::http::{to_body, ApiRequest, CachePolicy};

/// Generic CRUD over one REST collection.
pub struct ResourceService<T> {
    client: ResilientClient,
    resource: String,
    base_path: String,
    list_ttl: Option<Duration>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ResourceService<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            resource: self.resource.clone(),
            base_path: self.base_path.clone(),
            list_ttl: self.list_ttl,
            _marker: PhantomData,
        }
    }
}

impl<T: DeserializeOwned> ResourceService<T> {
    /// `resource` names the cache tag; `base_path` is the collection URL path.
    pub fn new(
        client: ResilientClient,
        resource: impl Into<String>,
        base_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            resource: resource.into(),
            base_path: base_path.into().trim_end_matches('/').to_string(),
            list_ttl: None,
            _marker: PhantomData,
        }
    }

    /// TTL for cached reads; the client's default applies otherwise.
    pub fn with_list_ttl(mut self, ttl: Duration) -> Self {
        self.list_ttl = Some(ttl);
        self
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    pub fn item_tag(&self, id: impl Display) -> String {
        format!("{}:{}", self.resource, id)
    }

    fn item_path(&self, id: impl Display) -> String {
        format!("{}/{}", self.base_path, id)
    }

    fn read_policy(&self, tag: String) -> CachePolicy {
        let policy = CachePolicy::new().tag(tag);
        match self.list_ttl {
            Some(ttl) => policy.ttl(ttl),
            None => policy,
        }
    }

    pub async fn find_all(&self, query: &[(&str, &str)]) -> Result<Vec<T>, ApiError> {
        let mut request = ApiRequest::get(self.base_path.as_str())
            .cache(self.read_policy(self.resource.clone()));
        for (key, value) in query {
            request = request.query(*key, value);
        }
        self.client.send(request).await
    }

    pub async fn find_by_id(&self, id: impl Display) -> Result<T, ApiError> {
        let request = ApiRequest::get(self.item_path(&id)).cache(self.read_policy(self.item_tag(&id)));
        self.client.send(request).await
    }

    pub async fn create<B: Serialize + ?Sized>(&self, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::post(self.base_path.as_str(), to_body(body)?)
            .invalidates([self.resource.clone()]);
        self.client.send(request).await
    }

    pub async fn update<B: Serialize + ?Sized>(
        &self,
        id: impl Display,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::put(self.item_path(&id), to_body(body)?)
            .invalidates([self.resource.clone(), self.item_tag(&id)]);
        self.client.send(request).await
    }

    /// Delete one item. The response body is ignored.
    pub async fn delete(&self, id: impl Display) -> Result<(), ApiError> {
        let request = ApiRequest::delete(self.item_path(&id))
            .invalidates([self.resource.clone(), self.item_tag(&id)]);
        self.client.execute(request).await.map(|_| ())
    }

    pub async fn batch_create<B: Serialize>(&self, bodies: &[B]) -> Vec<Result<T, ApiError>> {
        join_all(bodies.iter().map(|body| self.create(body))).await
    }

    pub async fn batch_update<I, B>(&self, items: &[(I, B)]) -> Vec<Result<T, ApiError>>
    where
        I: Display,
        B: Serialize,
    {
        join_all(items.iter().map(|(id, body)| self.update(id, body))).await
    }

    pub async fn batch_delete<I: Display>(&self, ids: &[I]) -> Vec<Result<(), ApiError>> {
        join_all(ids.iter().map(|id| self.delete(id))).await
    }
}

/// A `ResourceService` whose lists are partitioned by owning subject.
pub struct ScopedResourceService<T> {
    service: ResourceService<T>,
    owner_param: String,
}

impl<T> Clone for ScopedResourceService<T> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            owner_param: self.owner_param.clone(),
        }
    }
}

impl<T: DeserializeOwned> ScopedResourceService<T> {
    pub fn new(
        client: ResilientClient,
        resource: impl Into<String>,
        base_path: impl Into<String>,
    ) -> Self {
        Self::from_service(ResourceService::new(client, resource, base_path))
    }

    pub fn from_service(service: ResourceService<T>) -> Self {
        Self {
            service,
            owner_param: "userId".to_string(),
        }
    }

    /// Query parameter naming the owner (default `userId`).
    pub fn with_owner_param(mut self, param: impl Into<String>) -> Self {
        self.owner_param = param.into();
        self
    }

    /// The unscoped operations.
    pub fn service(&self) -> &ResourceService<T> {
        &self.service
    }

    pub fn subject_tag(&self, user_id: impl Display) -> String {
        format!("{}:user:{}", self.service.resource, user_id)
    }

    pub async fn find_by_user_id(&self, user_id: impl Display) -> Result<Vec<T>, ApiError> {
        let request = ApiRequest::get(self.service.base_path.as_str())
            .query(self.owner_param.as_str(), &user_id)
            .cache(self.service.read_policy(self.subject_tag(&user_id)));
        self.service.client.send(request).await
    }

    pub async fn create_for_user<B: Serialize + ?Sized>(
        &self,
        user_id: impl Display,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::post(self.service.base_path.as_str(), to_body(body)?)
            .invalidates([self.service.resource.clone(), self.subject_tag(&user_id)]);
        self.service.client.send(request).await
    }

    pub async fn update_for_user<B: Serialize + ?Sized>(
        &self,
        user_id: impl Display,
        id: impl Display,
        body: &B,
    ) -> Result<T, ApiError> {
        let request = ApiRequest::put(self.service.item_path(&id), to_body(body)?).invalidates([
            self.service.resource.clone(),
            self.subject_tag(&user_id),
            self.service.item_tag(&id),
        ]);
        self.service.client.send(request).await
    }

    pub async fn delete_for_user(
        &self,
        user_id: impl Display,
        id: impl Display,
    ) -> Result<(), ApiError> {
        let request = ApiRequest::delete(self.service.item_path(&id)).invalidates([
            self.service.resource.clone(),
            self.subject_tag(&user_id),
            self.service.item_tag(&id),
        ]);
        self.service.client.execute(request).await.map(|_| ())
    }
}
