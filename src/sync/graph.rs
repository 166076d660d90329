use std::time::Duration;

use reqwest::Method;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{RemoteTaskList, SyncError, TaskPayload};

pub const GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_BODY: usize = 300;

/// One page of a Graph collection.
#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TodoList {
    id: String,
    #[serde(rename = "displayName", default)]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct TodoTask {
    id: String,
}

/// Microsoft To Do over Graph v1.0, authenticated with a bearer token.
pub struct GraphClient {
    http: Client,
    token: String,
    base: String,
}

impl GraphClient {
    pub fn new(token: impl Into<String>) -> Result<Self, SyncError> {
        GraphClient::with_base(token, GRAPH_BASE)
    }

    pub fn with_base(token: impl Into<String>, base: &str) -> Result<Self, SyncError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tasker/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(GraphClient {
            http,
            token: token.into(),
            base: base.trim_end_matches('/').to_string(),
        })
    }

    fn lists_url(&self) -> String {
        format!("{}/me/todo/lists", self.base)
    }

    fn tasks_url(&self, list_id: &str) -> String {
        format!("{}/me/todo/lists/{}/tasks", self.base, list_id)
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, SyncError> {
        let mut request = self.http.request(method.clone(), url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send()?;
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().unwrap_or_default();
            return Err(SyncError::Http {
                method: method.to_string(),
                url: url.to_string(),
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SyncError> {
        let text = self.send(Method::GET, url, None)?.text()?;
        parse_body(url, &text)
    }

    /// Every item of a paged collection, following `@odata.nextLink`.
    fn collect_pages<T: DeserializeOwned>(&self, first: String) -> Result<Vec<T>, SyncError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        while let Some(url) = next {
            let page: Page<T> = self.get_json(&url)?;
            items.extend(page.value);
            next = page.next_link;
        }
        Ok(items)
    }
}

impl RemoteTaskList for GraphClient {
    fn find_or_create_list(&mut self, name: &str) -> Result<String, SyncError> {
        let url = self.lists_url();
        let lists: Vec<TodoList> = self.collect_pages(url.clone())?;
        if let Some(found) = lists.into_iter().find(|l| l.display_name == name) {
            return Ok(found.id);
        }
        log::info!("creating To Do list {:?}", name);
        let body = serde_json::json!({ "displayName": name });
        let text = self.send(Method::POST, &url, Some(&body))?.text()?;
        let created: TodoList = parse_body(&url, &text)?;
        Ok(created.id)
    }

    fn task_ids(&mut self, list_id: &str) -> Result<Vec<String>, SyncError> {
        let tasks: Vec<TodoTask> = self.collect_pages(self.tasks_url(list_id))?;
        Ok(tasks.into_iter().map(|t| t.id).collect())
    }

    fn delete_task(&mut self, list_id: &str, task_id: &str) -> Result<(), SyncError> {
        let url = format!("{}/{}", self.tasks_url(list_id), task_id);
        self.send(Method::DELETE, &url, None)?;
        Ok(())
    }

    fn create_task(&mut self, list_id: &str, payload: &TaskPayload) -> Result<(), SyncError> {
        let url = self.tasks_url(list_id);
        let body = serde_json::to_value(payload).map_err(|e| SyncError::Response {
            url: url.clone(),
            message: e.to_string(),
        })?;
        self.send(Method::POST, &url, Some(&body))?;
        Ok(())
    }
}

fn parse_body<T: DeserializeOwned>(url: &str, text: &str) -> Result<T, SyncError> {
    serde_json::from_str(text).map_err(|e| SyncError::Response {
        url: url.to_string(),
        message: e.to_string(),
    })
}

/// Keep error bodies short enough for a one-line message.
pub(crate) fn truncate_body(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = GraphClient::with_base("t", "https://graph.test/v1.0/").unwrap();
        assert_eq!(client.lists_url(), "https://graph.test/v1.0/me/todo/lists");
        assert_eq!(
            client.tasks_url("AAA="),
            "https://graph.test/v1.0/me/todo/lists/AAA=/tasks"
        );
    }

    #[test]
    fn test_page_with_next_link() {
        let page: Page<TodoTask> = parse_body(
            "u",
            r#"{"value":[{"id":"1","title":"x"},{"id":"2"}],"@odata.nextLink":"https://next"}"#,
        )
        .unwrap();
        let ids: Vec<_> = page.value.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
        assert_eq!(page.next_link.as_deref(), Some("https://next"));
    }

    #[test]
    fn test_last_page_and_missing_value() {
        let page: Page<TodoList> = parse_body("u", r#"{"@odata.context":"x"}"#).unwrap();
        assert!(page.value.is_empty());
        assert!(page.next_link.is_none());
    }

    #[test]
    fn test_bad_body_names_url() {
        let err = parse_body::<Page<TodoList>>("https://graph.test/lists", "<html>").unwrap_err();
        assert!(err.to_string().starts_with("unexpected response from https://graph.test/lists"));
    }

    #[test]
    fn test_truncate_body() {
        assert_eq!(truncate_body("  short \n"), "short");
        let long = "é".repeat(MAX_ERROR_BODY + 10);
        let cut = truncate_body(&long);
        assert_eq!(cut.chars().count(), MAX_ERROR_BODY + 3);
        assert!(cut.ends_with("..."));
    }
}
