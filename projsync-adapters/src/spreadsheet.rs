//! Read-only spreadsheet feed (Sheets v4 `values` API).
//!
//! The configured range is fetched in one call. Its first row is the header;
//! column roles are looked up by header name, so the sheet layout can change
//! without touching code. Every other non-ignored cell becomes an attribute of
//! the row's identity.
//!
//! Auth is a static bearer token, an OAuth refresh token, and/or an API key
//! query parameter. A refreshed token that the API rejects with 401 is
//! refreshed once more and the read retried.

use std::collections::BTreeMap;

use serde::Deserialize;

use projsync_core::config::{ColumnRole, SecretRef, SpreadsheetSource};
use projsync_core::{Attributes, ProjectIdentity, SourceId, SourceRead};

use crate::error::AdapterError;
use crate::http::{agent, decode_json, expect_status, join_url};
use crate::oauth::RefreshingToken;
use crate::SourceAdapter;

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

pub struct SpreadsheetAdapter {
    id: SourceId,
    agent: ureq::Agent,
    values_url: String,
    access_token: Option<String>,
    oauth: Option<RefreshingToken>,
    api_key: Option<String>,
    columns: BTreeMap<String, ColumnRole>,
}

impl SpreadsheetAdapter {
    /// Build from config, resolving credentials once.
    pub fn from_config(config: &SpreadsheetSource) -> Result<Self, AdapterError> {
        let resolve = |secret: &Option<SecretRef>| -> Result<Option<String>, AdapterError> {
            secret
                .as_ref()
                .map(|s| s.resolve(&config.id))
                .transpose()
                .map_err(AdapterError::from)
        };
        let path = format!(
            "spreadsheets/{}/values/{}",
            urlencoding::encode(&config.spreadsheet_id),
            urlencoding::encode(&config.range),
        );
        Ok(Self {
            id: config.id.clone(),
            agent: agent(config.timeout_secs),
            values_url: join_url(&config.base_url, &path),
            access_token: resolve(&config.access_token)?,
            oauth: config
                .oauth
                .as_ref()
                .map(|oauth| RefreshingToken::from_config(oauth, &config.id))
                .transpose()?,
            api_key: resolve(&config.api_key)?,
            columns: config.columns.clone(),
        })
    }

    /// Identities with their attribute maps.
    pub fn list_identities_with_attributes(
        &self,
    ) -> Result<BTreeMap<ProjectIdentity, Attributes>, AdapterError> {
        let response = match (self.fetch_values(), &self.oauth) {
            (Err(AdapterError::Http(ureq::Error::Status(401, _))), Some(oauth)) => {
                tracing::info!(source = %self.id, "access token rejected, refreshing");
                oauth.invalidate();
                self.fetch_values()?
            }
            (result, _) => result?,
        };
        expect_status(&response, 200)?;
        let range: ValueRange = decode_json(response)?;
        parse_rows(&range.values, &self.columns)
    }

    fn fetch_values(&self) -> Result<ureq::Response, AdapterError> {
        let mut request = self
            .agent
            .get(&self.values_url)
            .set("accept", "application/json")
            .query("majorDimension", "ROWS");
        let bearer = match &self.oauth {
            Some(oauth) => Some(oauth.bearer(&self.agent)?),
            None => self.access_token.clone(),
        };
        if let Some(token) = bearer {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        if let Some(key) = &self.api_key {
            request = request.query("key", key);
        }
        Ok(request.call()?)
    }
}

/// Turn raw rows (header first) into identity → attributes.
///
/// Rows without an identity cell are skipped; a later row with the same
/// identity replaces the earlier row's attributes.
pub fn parse_rows(
    rows: &[Vec<String>],
    columns: &BTreeMap<String, ColumnRole>,
) -> Result<BTreeMap<ProjectIdentity, Attributes>, AdapterError> {
    let mut projects = BTreeMap::new();
    let Some((header, body)) = rows.split_first() else {
        return Ok(projects);
    };

    let identity_idx = match columns.iter().find(|(_, role)| **role == ColumnRole::Identity) {
        Some((name, _)) => header.iter().position(|h| h == name).ok_or_else(|| {
            AdapterError::Shape(format!("identity column '{name}' not found in header"))
        })?,
        None => 0,
    };

    let attribute_columns: Vec<(usize, &String)> = header
        .iter()
        .enumerate()
        .filter(|(idx, name)| {
            *idx != identity_idx
                && !name.is_empty()
                && columns.get(*name).copied().unwrap_or(ColumnRole::Attribute)
                    == ColumnRole::Attribute
        })
        .collect();

    for row in body {
        let Some(identity) = row.get(identity_idx).filter(|cell| !cell.trim().is_empty()) else {
            continue;
        };
        // Sheets omits trailing empty cells, so short rows are normal.
        let attributes: Attributes = attribute_columns
            .iter()
            .filter_map(|(idx, name)| row.get(*idx).map(|value| ((*name).clone(), value.clone())))
            .collect();
        projects.insert(ProjectIdentity::from(identity.as_str()), attributes);
    }
    Ok(projects)
}

impl SourceAdapter for SpreadsheetAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn list_identities(&self) -> SourceRead {
        match self.list_identities_with_attributes() {
            Ok(projects) => SourceRead::with_attributes(projects),
            Err(err) => {
                tracing::warn!(source = %self.id, error = %err, "failed to read spreadsheet");
                SourceRead::unavailable()
            }
        }
    }

    fn create_identity(&self, identity: &ProjectIdentity, _attributes: &Attributes) -> bool {
        tracing::warn!(
            source = %self.id,
            identity = %identity,
            "spreadsheet source is read-only, refusing to create",
        );
        false
    }

    fn writable(&self) -> bool {
        false
    }
}
