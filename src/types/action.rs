use super::provider::Provider;
use crate::error::RelayError;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

/// An outbound provider API call, before authentication is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRequest {
    pub method: Method,
    /// Path relative to the provider's API base, or an absolute URL.
    pub target: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ProviderRequest {
    pub fn get(target: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            target: target.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(target: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            target: target.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// Raw provider answer. Any HTTP status ends up here; classifying it is the
/// caller's job.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: StatusCode,
    /// `Retry-After` in seconds, when the provider sent one.
    pub retry_after: Option<u64>,
    pub body: String,
}

impl ProviderResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RelayError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingKind {
    #[default]
    Upcoming,
    Scheduled,
}

impl MeetingKind {
    fn as_str(&self) -> &'static str {
        match self {
            MeetingKind::Upcoming => "upcoming",
            MeetingKind::Scheduled => "scheduled",
        }
    }
}

/// Task to create on a task-tracking provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskDraft {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Asana workspace gid, ClickUp list id or monday board id.
    pub container_id: Option<String>,
    /// monday group inside the board.
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
}

/// Business-level provider actions exposed to feature code.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProviderAction {
    ListCalendarEvents {
        #[serde(default)]
        max_results: Option<u32>,
    },
    ListMeetings {
        #[serde(default)]
        kind: MeetingKind,
    },
    CreateTask(TaskDraft),
    GetTask {
        task_id: String,
    },
}

const DEFAULT_PAGE_SIZE: u32 = 50;

const MONDAY_CREATE_ITEM: &str = "mutation ($boardId: ID!, $itemName: String!, $groupId: String) { \
create_item (board_id: $boardId, item_name: $itemName, group_id: $groupId) { id } }";

const MONDAY_GET_ITEM: &str = "query ($ids: [ID!]) { items (ids: $ids) { id name \
board { id name } group { id title } column_values { id text } } }";

impl ProviderAction {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderAction::ListCalendarEvents { .. } => "list_calendar_events",
            ProviderAction::ListMeetings { .. } => "list_meetings",
            ProviderAction::CreateTask(_) => "create_task",
            ProviderAction::GetTask { .. } => "get_task",
        }
    }

    /// Shape the provider-specific request for this action.
    pub fn to_request(&self, provider: Provider) -> Result<ProviderRequest, RelayError> {
        match (self, provider) {
            (ProviderAction::ListCalendarEvents { max_results }, Provider::Google) => Ok(
                ProviderRequest::get("calendars/primary/events")
                    .query("maxResults", max_results.unwrap_or(DEFAULT_PAGE_SIZE))
                    .query("singleEvents", true)
                    .query("orderBy", "startTime"),
            ),
            (ProviderAction::ListCalendarEvents { max_results }, Provider::MicrosoftTeams) => Ok(
                ProviderRequest::get("me/events")
                    .query("$top", max_results.unwrap_or(DEFAULT_PAGE_SIZE))
                    .query("$orderby", "start/dateTime ASC"),
            ),
            (ProviderAction::ListMeetings { kind }, Provider::Zoom) => {
                Ok(ProviderRequest::get("users/me/meetings").query("type", kind.as_str()))
            }
            (ProviderAction::CreateTask(draft), Provider::Asana) => {
                let workspace = self.require_container(provider, draft)?;
                let mut data = json!({
                    "workspace": workspace,
                    "name": draft.name,
                    "notes": draft.description.clone().unwrap_or_default(),
                });
                if let Some(assignee) = &draft.assignee {
                    data["assignee"] = json!(assignee);
                }
                Ok(ProviderRequest::post("tasks", json!({ "data": data })))
            }
            (ProviderAction::CreateTask(draft), Provider::Clickup) => {
                let list_id = self.require_container(provider, draft)?;
                let mut body = json!({
                    "name": draft.name,
                    "description": draft.description.clone().unwrap_or_default(),
                });
                if let Some(assignee) = &draft.assignee {
                    body["assignees"] = json!([assignee]);
                }
                Ok(ProviderRequest::post(format!("list/{list_id}/task"), body))
            }
            (ProviderAction::CreateTask(draft), Provider::Monday) => {
                let board_id = self.require_container(provider, draft)?;
                Ok(ProviderRequest::post(
                    "",
                    json!({
                        "query": MONDAY_CREATE_ITEM,
                        "variables": {
                            "boardId": board_id,
                            "itemName": draft.name,
                            "groupId": draft.group_id,
                        },
                    }),
                ))
            }
            (ProviderAction::GetTask { task_id }, Provider::Asana) => {
                Ok(ProviderRequest::get(format!("tasks/{task_id}")))
            }
            (ProviderAction::GetTask { task_id }, Provider::Clickup) => {
                Ok(ProviderRequest::get(format!("task/{task_id}")))
            }
            (ProviderAction::GetTask { task_id }, Provider::Monday) => Ok(ProviderRequest::post(
                "",
                json!({ "query": MONDAY_GET_ITEM, "variables": { "ids": [task_id] } }),
            )),
            _ => Err(RelayError::UnsupportedAction {
                provider,
                detail: format!("`{}` is not available for {provider}", self.name()),
            }),
        }
    }

    fn require_container<'a>(
        &self,
        provider: Provider,
        draft: &'a TaskDraft,
    ) -> Result<&'a str, RelayError> {
        draft
            .container_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| RelayError::UnsupportedAction {
                provider,
                detail: format!("`{}` needs a container_id for {provider}", self.name()),
            })
    }
}
