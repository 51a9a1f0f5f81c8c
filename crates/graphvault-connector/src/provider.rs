//! The connector's [`CollectionSource`] implementation
//!
//! [`GraphConnector`] owns the authenticated client and dispatches each
//! (owner, category) request to the matching service module.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use graphvault_core::config::AzureCredentials;
use graphvault_core::domain::collection::{Collection, StatusSender};
use graphvault_core::domain::path::{Category, Service};
use graphvault_core::ports::source::{CollectionRequest, CollectionSource, RestoreCounts};

use crate::auth::TokenProvider;
use crate::client::GraphClient;
use crate::{exchange, onedrive, sharepoint};

/// Microsoft Graph implementation of the collection source port.
pub struct GraphConnector {
    client: Arc<GraphClient>,
}

impl GraphConnector {
    /// Builds a connector from environment credentials.
    pub fn new(credentials: AzureCredentials) -> Self {
        let tokens = Arc::new(TokenProvider::new(credentials));
        Self {
            client: Arc::new(GraphClient::new(tokens)),
        }
    }

    /// Wraps an existing client (tests use this with a local server).
    pub fn with_client(client: Arc<GraphClient>) -> Self {
        Self { client }
    }

    fn service_for(category: Category) -> Service {
        match category {
            Category::Email | Category::Contacts | Category::Events => Service::Exchange,
            Category::Files => Service::OneDrive,
            Category::Libraries | Category::Lists => Service::SharePoint,
        }
    }
}

#[async_trait::async_trait]
impl CollectionSource for GraphConnector {
    async fn produce_backup_collections(
        &self,
        request: CollectionRequest,
        statuses: StatusSender,
        cancel: CancellationToken,
    ) -> anyhow::Result<Vec<Box<dyn Collection>>> {
        info!(
            owner = request.owner,
            category = %request.category,
            prior_folders = request.prior.paths.len(),
            "Producing backup collections"
        );

        let collections = match Self::service_for(request.category) {
            Service::Exchange => {
                exchange::produce_collections(self.client.clone(), &request, statuses, cancel)
                    .await?
            }
            Service::OneDrive => {
                onedrive::produce_collections(self.client.clone(), &request, statuses, cancel)
                    .await?
            }
            Service::SharePoint => {
                sharepoint::produce_collections(self.client.clone(), &request, statuses, cancel)
                    .await?
            }
        };

        Ok(collections)
    }

    async fn consume_restore_collections(
        &self,
        collections: Vec<Box<dyn Collection>>,
        cancel: CancellationToken,
    ) -> anyhow::Result<RestoreCounts> {
        // Collections from one restore may span services; split and
        // route each batch.
        let mut exchange_batch = Vec::new();
        let mut onedrive_batch = Vec::new();
        let mut sharepoint_batch = Vec::new();

        for collection in collections {
            let Some(path) = collection.full_path() else {
                continue;
            };
            match path.service() {
                Service::Exchange => exchange_batch.push(collection),
                Service::OneDrive => onedrive_batch.push(collection),
                Service::SharePoint => sharepoint_batch.push(collection),
            }
        }

        let mut counts = RestoreCounts::default();
        for partial in [
            exchange::restore_collections(self.client.clone(), exchange_batch, cancel.clone())
                .await?,
            onedrive::restore_collections(self.client.clone(), onedrive_batch, cancel.clone())
                .await?,
            sharepoint::restore_collections(self.client.clone(), sharepoint_batch, cancel)
                .await?,
        ] {
            counts.items_written += partial.items_written;
            counts.items_failed += partial.items_failed;
            counts.bytes_written += partial.bytes_written;
        }

        Ok(counts)
    }
}
