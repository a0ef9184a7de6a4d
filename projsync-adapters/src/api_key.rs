//! Remote project service authenticated by a static API-key header.
//!
//! - list:   `GET  <base_url><list_path>`   → `200` + `[{"label": …}, …]`
//! - create: `POST <base_url><create_path>` with `{"label": …}` → `201`

use serde_json::{json, Value};

use projsync_core::config::ApiKeySource;
use projsync_core::{Attributes, IdentitySet, ProjectIdentity, SourceId, SourceRead};

use crate::error::AdapterError;
use crate::http::{agent, decode_json, expect_status, join_url};
use crate::{CreateOutcome, SourceAdapter};

pub struct ApiKeyAdapter {
    id: SourceId,
    agent: ureq::Agent,
    list_url: String,
    create_url: String,
    header: String,
    api_key: String,
    label_field: String,
}

impl ApiKeyAdapter {
    /// Build from config, resolving the API key once.
    pub fn from_config(config: &ApiKeySource) -> Result<Self, AdapterError> {
        Ok(Self {
            id: config.id.clone(),
            agent: agent(config.timeout_secs),
            list_url: join_url(&config.base_url, &config.list_path),
            create_url: join_url(&config.base_url, &config.create_path),
            header: config.header.clone(),
            api_key: config.api_key.resolve(&config.id)?,
            label_field: config.label_field.clone(),
        })
    }

    pub fn fetch_labels(&self) -> Result<IdentitySet, AdapterError> {
        let response = self
            .agent
            .get(&self.list_url)
            .set("accept", "application/json")
            .set(&self.header, &self.api_key)
            .call()?;
        expect_status(&response, 200)?;
        let items: Vec<Value> = decode_json(response)?;
        parse_labels(&items, &self.label_field)
    }

    pub fn post_project(&self, identity: &ProjectIdentity) -> Result<CreateOutcome, AdapterError> {
        let mut body = serde_json::Map::new();
        body.insert(self.label_field.clone(), json!(identity.as_str()));

        let result = self
            .agent
            .post(&self.create_url)
            .set("accept", "application/json")
            .set("Content-Type", "application/json")
            .set(&self.header, &self.api_key)
            .send_json(Value::Object(body));

        match result {
            Ok(response) => {
                expect_status(&response, 201)?;
                Ok(CreateOutcome::Created)
            }
            Err(ureq::Error::Status(409, _)) => Ok(CreateOutcome::AlreadyExists),
            Err(err) => Err(err.into()),
        }
    }
}

/// Pull the label out of every list item. One malformed item fails the whole
/// read, so a half-parsed listing is never taken for the full set.
pub(crate) fn parse_labels(items: &[Value], label_field: &str) -> Result<IdentitySet, AdapterError> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            item.get(label_field)
                .and_then(Value::as_str)
                .map(ProjectIdentity::from)
                .ok_or_else(|| {
                    AdapterError::Shape(format!(
                        "project #{index} has no string field '{label_field}'"
                    ))
                })
        })
        .collect()
}

impl SourceAdapter for ApiKeyAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn list_identities(&self) -> SourceRead {
        match self.fetch_labels() {
            Ok(identities) => SourceRead::available(identities),
            Err(err) => {
                tracing::warn!(source = %self.id, error = %err, "failed to list remote projects");
                SourceRead::unavailable()
            }
        }
    }

    fn create_identity(&self, identity: &ProjectIdentity, _attributes: &Attributes) -> bool {
        match self.post_project(identity) {
            Ok(CreateOutcome::Created) => true,
            Ok(CreateOutcome::AlreadyExists) => {
                tracing::info!(source = %self.id, identity = %identity, "remote project already exists");
                true
            }
            Err(err) => {
                tracing::error!(
                    source = %self.id,
                    identity = %identity,
                    error = %err,
                    "failed to create remote project",
                );
                false
            }
        }
    }
}
