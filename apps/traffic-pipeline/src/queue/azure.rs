use super::shared_key::{SharedKeyCredential, SigningRequest};
use super::{MessageQueue, QueueError, QueueMessage, SentMessage};
use crate::config::QueueConfig;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

const API_VERSION: &str = "2021-12-02";
const XML_CONTENT_TYPE: &str = "application/xml";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const APPROXIMATE_COUNT_HEADER: &str = "x-ms-approximate-messages-count";
const ERROR_CODE_HEADER: &str = "x-ms-error-code";

/// Storage Queue REST client. One instance addresses one queue; `for_queue` derives a client for a
/// sibling queue in the same account.
#[derive(Clone, Debug)]
pub struct AzureQueueClient {
    http: reqwest::Client,
    credential: SharedKeyCredential,
    endpoint: String,
    queue_url: Url,
}

#[derive(Debug, Default, Deserialize)]
struct QueueMessagesList {
    #[serde(rename = "QueueMessage", default)]
    messages: Vec<WireQueueMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireQueueMessage {
    message_id: String,
    pop_receipt: String,
    #[serde(default)]
    dequeue_count: u32,
    #[serde(default)]
    message_text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl AzureQueueClient {
    pub fn new(
        endpoint: &str,
        account_name: &str,
        account_key: &str,
        queue_name: &str,
    ) -> Result<Self, QueueError> {
        let credential = SharedKeyCredential::new(account_name, account_key)?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        let queue_url = Url::parse(&format!("{endpoint}/{queue_name}"))?;
        Ok(Self {
            http,
            credential,
            endpoint,
            queue_url,
        })
    }

    pub fn from_config(config: &QueueConfig) -> Result<Self, QueueError> {
        Self::new(
            &config.endpoint,
            &config.account_name,
            &config.account_key,
            &config.queue_name,
        )
    }

    pub fn for_queue(&self, queue_name: &str) -> Result<Self, QueueError> {
        Ok(Self {
            http: self.http.clone(),
            credential: self.credential.clone(),
            endpoint: self.endpoint.clone(),
            queue_url: Url::parse(&format!("{}/{queue_name}", self.endpoint))?,
        })
    }

    /// Creates the queue when it does not exist yet. An existing queue is left untouched.
    pub async fn ensure_exists(&self) -> Result<(), QueueError> {
        match self
            .execute(Method::PUT, self.queue_url.clone(), None)
            .await
        {
            Ok(response) => {
                if response.status() == StatusCode::CREATED {
                    tracing::info!(queue = %self.queue_url, "created queue");
                }
                Ok(())
            }
            Err(QueueError::Status { status: 409, .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn messages_url(&self) -> Url {
        let mut url = self.queue_url.clone();
        url.set_path(&format!("{}/messages", url.path().trim_end_matches('/')));
        url
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<String>,
    ) -> Result<Response, QueueError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let ms_headers = [("x-ms-date", date.as_str()), ("x-ms-version", API_VERSION)];
        let authorization = self.credential.authorization(&SigningRequest {
            method: method.as_str(),
            url: &url,
            content_length: body.as_ref().map(String::len).unwrap_or(0),
            content_type: body.as_ref().map(|_| XML_CONTENT_TYPE),
            ms_headers: &ms_headers,
        });

        let mut request = self
            .http
            .request(method, url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header(AUTHORIZATION, authorization);
        if let Some(body) = body {
            request = request.header(CONTENT_TYPE, XML_CONTENT_TYPE).body(body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> QueueError {
    let status = response.status().as_u16();
    let header_code = response
        .headers()
        .get(ERROR_CODE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();
    let parsed: WireError = quick_xml::de::from_str(&body).unwrap_or_default();
    let code = header_code
        .or(parsed.code)
        .unwrap_or_else(|| "Unknown".to_string());
    let message = parsed
        .message
        .map(|m| m.lines().next().unwrap_or_default().trim().to_string())
        .unwrap_or_else(|| body.trim().to_string());
    QueueError::Status {
        status,
        code,
        message,
    }
}

/// A delete that finds no message means an earlier delete already went through.
fn delete_outcome(message_id: &str, result: Result<(), QueueError>) -> Result<(), QueueError> {
    match result {
        Err(err) if err.is_not_found() => {
            tracing::debug!(message_id, "message already deleted");
            Ok(())
        }
        other => other,
    }
}

fn envelope(text: &str) -> String {
    format!(
        "<QueueMessage><MessageText>{}</MessageText></QueueMessage>",
        quick_xml::escape::escape(text)
    )
}

fn parse_messages(body: &str) -> Result<Vec<QueueMessage>, QueueError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let list: QueueMessagesList =
        quick_xml::de::from_str(trimmed).map_err(|err| QueueError::Decode(err.to_string()))?;
    Ok(list
        .messages
        .into_iter()
        .map(|wire| QueueMessage {
            id: wire.message_id,
            pop_receipt: wire.pop_receipt,
            dequeue_count: wire.dequeue_count,
            body: wire.message_text,
        })
        .collect())
}

#[async_trait]
impl MessageQueue for AzureQueueClient {
    async fn send(&self, text: &str) -> Result<SentMessage, QueueError> {
        let response = self
            .execute(Method::POST, self.messages_url(), Some(envelope(text)))
            .await?;
        let body = response.text().await?;
        let sent = parse_messages(&body)?
            .into_iter()
            .next()
            .ok_or_else(|| QueueError::Decode("send response carried no message".to_string()))?;
        Ok(SentMessage { id: sent.id })
    }

    async fn receive(
        &self,
        max_messages: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let mut url = self.messages_url();
        url.query_pairs_mut()
            .append_pair("numofmessages", &max_messages.to_string())
            .append_pair(
                "visibilitytimeout",
                &visibility_timeout.as_secs().max(1).to_string(),
            );
        let response = self.execute(Method::GET, url, None).await?;
        let body = response.text().await?;
        parse_messages(&body)
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let mut url = self.messages_url();
        url.path_segments_mut()
            .map_err(|_| QueueError::Decode("queue endpoint cannot carry a path".to_string()))?
            .push(&message.id);
        url.query_pairs_mut()
            .append_pair("popreceipt", &message.pop_receipt);
        let result = self.execute(Method::DELETE, url, None).await.map(|_| ());
        delete_outcome(&message.id, result)
    }

    async fn approximate_count(&self) -> Result<u64, QueueError> {
        let mut url = self.queue_url.clone();
        url.query_pairs_mut().append_pair("comp", "metadata");
        let response = self.execute(Method::GET, url, None).await?;
        response
            .headers()
            .get(APPROXIMATE_COUNT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .ok_or_else(|| QueueError::Decode(format!("missing {APPROXIMATE_COUNT_HEADER} header")))
    }

    fn describe(&self) -> String {
        self.queue_url.to_string()
    }
}
