//! Remote project service that authenticates each call with a keyed hash.
//!
//! Every request is a `GET <base_url><api_path>?action=<action>&hash=<h>&…`
//! where `h = md5(page + action + secret)` in lowercase hex. Responses use the
//! envelope `{"status": "ok" | "error", "data": …, "message": …}`.
//!
//! After a project is created, an optional default task (and one subtask per
//! configured spreadsheet attribute) is added to it.

use md5::{Digest, Md5};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use projsync_core::config::{DefaultTaskConfig, ProjectMembers, SignedApiSource};
use projsync_core::{Attributes, IdentitySet, ProjectIdentity, SourceId, SourceRead};

use crate::error::AdapterError;
use crate::http::{agent, decode_json, expect_status, join_url};
use crate::SourceAdapter;

/// `md5(page + action + secret)` as lowercase hex.
pub fn sign(page: &str, action: &str, secret: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(page.as_bytes());
    hasher.update(action.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Leading ASCII digits of an identity, e.g. `"1204"` for `"1204 Kitchen"`.
pub fn project_code(identity: &ProjectIdentity) -> Option<&str> {
    let s = identity.as_str();
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some(&s[..end])
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteProject {
    name: String,
}

/// Payload of a successful create call; only the id is used.
#[derive(Debug, Deserialize)]
struct Created {
    id: Value,
}

impl Created {
    fn id_string(&self) -> Result<String, AdapterError> {
        match &self.id {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            other => Err(AdapterError::Shape(format!("unexpected id value {other}"))),
        }
    }
}

pub struct SignedApiAdapter {
    id: SourceId,
    agent: ureq::Agent,
    endpoint: String,
    secret: String,
    list_action: String,
    create_action: String,
    status_filter: Option<String>,
    members: ProjectMembers,
    default_task: Option<DefaultTaskConfig>,
}

impl SignedApiAdapter {
    /// Build from config, resolving the signing secret once.
    pub fn from_config(config: &SignedApiSource) -> Result<Self, AdapterError> {
        Ok(Self {
            id: config.id.clone(),
            agent: agent(config.timeout_secs),
            endpoint: join_url(&config.base_url, &config.api_path),
            secret: config.secret.resolve(&config.id)?,
            list_action: config.list_action.clone(),
            create_action: config.create_action.clone(),
            status_filter: config.status_filter.clone(),
            members: config.members.clone(),
            default_task: config.default_task.clone(),
        })
    }

    /// Issue one signed call and unwrap the `ok` envelope.
    fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<T>, AdapterError> {
        let mut request = self
            .agent
            .get(&self.endpoint)
            .set("accept", "application/json")
            .query("action", action)
            .query("hash", &sign("", action, &self.secret));
        for (key, value) in params {
            request = request.query(key, value);
        }
        tracing::debug!(source = %self.id, action, "signed API request");

        let response = request.call()?;
        expect_status(&response, 200)?;
        let envelope: Envelope<T> = decode_json(response)?;
        if envelope.status != "ok" {
            return Err(AdapterError::Api {
                action: action.to_string(),
                message: envelope
                    .message
                    .unwrap_or_else(|| format!("status '{}'", envelope.status)),
            });
        }
        Ok(envelope.data)
    }

    pub fn fetch_names(&self) -> Result<IdentitySet, AdapterError> {
        let mut params = Vec::new();
        if let Some(status) = &self.status_filter {
            params.push(("status", status.as_str()));
        }
        let projects: Vec<RemoteProject> = self
            .call(&self.list_action, &params)?
            .ok_or_else(|| AdapterError::Shape("list response has no data".to_string()))?;
        Ok(projects
            .into_iter()
            .map(|p| ProjectIdentity::from(p.name))
            .collect())
    }

    /// Create the project and return its remote id.
    pub fn post_project(&self, identity: &ProjectIdentity) -> Result<String, AdapterError> {
        let mut params = vec![("title", identity.as_str())];
        params.extend(self.member_params(true));
        let created: Created = self
            .call(&self.create_action, &params)?
            .ok_or_else(|| AdapterError::Shape("create response has no data".to_string()))?;
        created.id_string()
    }

    /// Create the default task and its attribute subtasks inside `project_id`.
    ///
    /// Returns the number of tasks created (task + subtasks), `0` when no
    /// default task is configured or the identity carries no project code.
    pub fn post_default_task(
        &self,
        project_id: &str,
        identity: &ProjectIdentity,
        attributes: &Attributes,
    ) -> Result<usize, AdapterError> {
        let Some(task) = &self.default_task else {
            return Ok(0);
        };
        let Some(code) = project_code(identity) else {
            tracing::warn!(
                source = %self.id,
                identity = %identity,
                "no numeric project code, skipping default task",
            );
            return Ok(0);
        };

        let title = render_title(&task.title, code, identity);
        let mut params = vec![("id_project", project_id), ("title", title.as_str())];
        params.extend(self.member_params(false));
        let created: Created = self
            .call(&task.action, &params)?
            .ok_or_else(|| AdapterError::Shape("task response has no data".to_string()))?;
        let task_id = created.id_string()?;

        let mut count = 1;
        for (column, value) in subtasks(task, attributes) {
            let title = format!("{column}: {value}");
            let params = [
                ("id_project", project_id),
                ("id_parent", task_id.as_str()),
                ("title", title.as_str()),
            ];
            self.call::<Value>(&task.action, &params)?;
            count += 1;
        }
        Ok(count)
    }

    fn member_params(&self, include_manager: bool) -> Vec<(&'static str, &str)> {
        let mut params = Vec::new();
        if let Some(from) = &self.members.user_from {
            params.push(("email_user_from", from.as_str()));
        }
        if let Some(to) = &self.members.user_to {
            params.push(("email_user_to", to.as_str()));
        }
        if include_manager {
            if let Some(manager) = &self.members.manager {
                params.push(("email_manager", manager.as_str()));
            }
        }
        params
    }
}

fn render_title(template: &str, code: &str, identity: &ProjectIdentity) -> String {
    template
        .replace("{code}", code)
        .replace("{identity}", identity.as_str())
}

/// Configured subtask columns that have a non-blank value, in config order.
fn subtasks<'a>(
    task: &'a DefaultTaskConfig,
    attributes: &'a Attributes,
) -> impl Iterator<Item = (&'a str, &'a str)> {
    task.subtask_columns.iter().filter_map(move |column| {
        attributes
            .get(column)
            .filter(|value| !value.trim().is_empty())
            .map(|value| (column.as_str(), value.as_str()))
    })
}

impl SourceAdapter for SignedApiAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn list_identities(&self) -> SourceRead {
        match self.fetch_names() {
            Ok(identities) => SourceRead::available(identities),
            Err(err) => {
                tracing::warn!(source = %self.id, error = %err, "failed to list remote projects");
                SourceRead::unavailable()
            }
        }
    }

    fn create_identity(&self, identity: &ProjectIdentity, attributes: &Attributes) -> bool {
        let project_id = match self.post_project(identity) {
            Ok(project_id) => project_id,
            Err(err) => {
                tracing::error!(
                    source = %self.id,
                    identity = %identity,
                    error = %err,
                    "failed to create remote project",
                );
                return false;
            }
        };

        // The project exists remotely from here on; a task failure must not
        // make the engine retry the project itself.
        match self.post_default_task(&project_id, identity, attributes) {
            Ok(0) => {}
            Ok(tasks) => {
                tracing::info!(source = %self.id, identity = %identity, tasks, "default task created");
            }
            Err(err) => {
                tracing::error!(
                    source = %self.id,
                    identity = %identity,
                    project_id = %project_id,
                    error = %err,
                    "failed to create default task",
                );
            }
        }
        true
    }
}
