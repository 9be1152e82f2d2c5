// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Landscape token lifecycle events from the control plane.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use crate::errors::RepositoryError;
use crate::repository::TraceRepository;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TokenEvent {
    Created {
        token: String,
    },
    /// Tombstone for a landscape.
    Deleted {
        token: String,
    },
    Cloned {
        token: String,
        #[serde(rename = "clonedToken")]
        cloned_token: String,
    },
}

pub struct TokenEventConsumer {
    repository: Arc<dyn TraceRepository>,
}

impl TokenEventConsumer {
    pub fn new(repository: Arc<dyn TraceRepository>) -> Self {
        Self { repository }
    }

    /// Applies an event to the repository. Failures are logged and returned.
    pub async fn process(&self, event: TokenEvent) -> Result<(), RepositoryError> {
        trace!("Received token event {:?}", event);

        let result = match &event {
            TokenEvent::Created { .. } => Ok(()),
            TokenEvent::Deleted { token } => {
                trace!("Deleting landscape for token {}", token);
                self.repository.delete_by_landscape_token(token).await
            }
            TokenEvent::Cloned {
                token,
                cloned_token,
            } => {
                trace!("Cloning landscape {} into {}", cloned_token, token);
                self.repository
                    .clone_all(token, cloned_token)
                    .await
                    .map(|count| trace!("Cloned {} traces into {}", count, token))
            }
        };

        if let Err(e) = &result {
            error!("Failed to apply token event {:?}: {}", event, e);
        }
        result
    }
}
