//! Live HTTP backend for the data provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use tally_registry::{MonthKey, SyncScope};

use crate::access::DataAccess;
use crate::error::RemoteError;
use crate::types::{
    Allocation, ArchivedNote, CategoryStorePayload, Dashboard, GoalSummary, MonthNote,
    RolloverStatus, SavedView, SearchHit, StashItem, StashPatch, TransactionsPage,
};

/// Client for the provider's HTTP API.
///
/// Owns the network timeouts; the consistency layer above treats any
/// rejection as a failure requiring rollback.
pub struct RemoteBackend {
    http: Client,
    base_url: String,
    token: String,
}

impl RemoteBackend {
    /// Create a new backend for the given API base URL and bearer token.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.base_url, path)
    }

    /// Map a non-success response to a typed error.
    async fn check(&self, response: Response) -> Result<Response, RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(RemoteError::RateLimited { retry_after_secs });
        }

        if status == StatusCode::NOT_FOUND {
            let resource = response.url().path().to_string();
            return Err(RemoteError::NotFound { resource });
        }

        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        debug!(path, "GET");
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        debug!(path, "POST");
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Ok(self.check(response).await?.json().await?)
    }

    async fn post_empty<B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), RemoteError> {
        debug!(path, "POST");
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        debug!(path, "DELETE");
        let response = self
            .http
            .delete(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl DataAccess for RemoteBackend {
    async fn fetch_dashboard(&self) -> Result<Dashboard, RemoteError> {
        self.get_json("dashboard").await
    }

    async fn fetch_stash(&self) -> Result<Vec<StashItem>, RemoteError> {
        self.get_json("stash").await
    }

    async fn fetch_goals(&self) -> Result<Vec<GoalSummary>, RemoteError> {
        self.get_json("goals").await
    }

    async fn fetch_category_store(&self) -> Result<CategoryStorePayload, RemoteError> {
        self.get_json("categories").await
    }

    async fn fetch_unmapped_categories(&self) -> Result<Vec<String>, RemoteError> {
        self.get_json("categories/unmapped").await
    }

    async fn fetch_month_notes(&self, month: &MonthKey) -> Result<Vec<MonthNote>, RemoteError> {
        self.get_json(&format!("notes/{month}")).await
    }

    async fn fetch_archived_notes(&self) -> Result<Vec<ArchivedNote>, RemoteError> {
        self.get_json("notes/archived").await
    }

    async fn fetch_saved_views(&self) -> Result<Vec<SavedView>, RemoteError> {
        self.get_json("views").await
    }

    async fn fetch_rollover_status(
        &self,
        month: &MonthKey,
    ) -> Result<RolloverStatus, RemoteError> {
        self.get_json(&format!("rollover/{month}")).await
    }

    async fn fetch_transactions(
        &self,
        cursor: Option<&str>,
    ) -> Result<TransactionsPage, RemoteError> {
        match cursor {
            Some(cursor) => self.get_json(&format!("transactions?cursor={cursor}")).await,
            None => self.get_json("transactions").await,
        }
    }

    async fn search(&self, term: &str) -> Result<Vec<SearchHit>, RemoteError> {
        #[derive(Serialize)]
        struct SearchRequest<'a> {
            term: &'a str,
        }
        self.post_json("search", &SearchRequest { term }).await
    }

    async fn update_stash_item(
        &self,
        id: &str,
        patch: StashPatch,
    ) -> Result<StashItem, RemoteError> {
        self.post_json(&format!("stash/{id}"), &patch).await
    }

    async fn create_stash_item(&self, item: StashItem) -> Result<StashItem, RemoteError> {
        self.post_json("stash", &item).await
    }

    async fn delete_stash_item(&self, id: &str) -> Result<(), RemoteError> {
        self.delete(&format!("stash/{id}")).await
    }

    async fn batch_allocate(&self, allocations: Vec<Allocation>) -> Result<(), RemoteError> {
        self.post_empty("allocations/batch", &allocations).await
    }

    async fn rename_category(&self, id: &str, name: &str) -> Result<(), RemoteError> {
        #[derive(Serialize)]
        struct RenameRequest<'a> {
            name: &'a str,
        }
        self.post_empty(&format!("categories/{id}/rename"), &RenameRequest { name })
            .await
    }

    async fn remove_linked_category(&self, id: &str) -> Result<(), RemoteError> {
        self.delete(&format!("categories/{id}/link")).await
    }

    async fn set_rollover(
        &self,
        category_id: &str,
        month: &MonthKey,
        enabled: bool,
    ) -> Result<(), RemoteError> {
        #[derive(Serialize)]
        struct RolloverRequest<'a> {
            category_id: &'a str,
            enabled: bool,
        }
        self.post_empty(
            &format!("rollover/{month}"),
            &RolloverRequest {
                category_id,
                enabled,
            },
        )
        .await
    }

    async fn save_month_note(
        &self,
        month: &MonthKey,
        body: &str,
    ) -> Result<MonthNote, RemoteError> {
        #[derive(Serialize)]
        struct NoteRequest<'a> {
            body: &'a str,
        }
        self.post_json(&format!("notes/{month}"), &NoteRequest { body })
            .await
    }

    async fn archive_note(&self, month: &MonthKey) -> Result<ArchivedNote, RemoteError> {
        self.post_json(&format!("notes/{month}/archive"), &()).await
    }

    async fn reorder_saved_views(&self, ordered_ids: Vec<String>) -> Result<(), RemoteError> {
        self.post_empty("views/order", &ordered_ids).await
    }

    async fn update_goal(
        &self,
        id: &str,
        target_amount: i64,
        due_month: Option<MonthKey>,
    ) -> Result<GoalSummary, RemoteError> {
        #[derive(Serialize)]
        struct GoalRequest {
            target_amount: i64,
            #[serde(skip_serializing_if = "Option::is_none")]
            due_month: Option<MonthKey>,
        }
        self.post_json(
            &format!("goals/{id}"),
            &GoalRequest {
                target_amount,
                due_month,
            },
        )
        .await
    }

    async fn trigger_scoped_sync(&self, scope: SyncScope) -> Result<(), RemoteError> {
        #[derive(Serialize)]
        struct SyncRequest {
            scope: SyncScope,
        }
        self.post_empty("sync", &SyncRequest { scope }).await
    }
}
