use super::QueueError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Storage account Shared Key credential.
#[derive(Clone)]
pub(super) struct SharedKeyCredential {
    account: String,
    mac: HmacSha256,
}

impl std::fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

pub(super) struct SigningRequest<'a> {
    pub(super) method: &'a str,
    pub(super) url: &'a Url,
    pub(super) content_length: usize,
    pub(super) content_type: Option<&'a str>,
    /// `x-ms-*` headers sent with the request.
    pub(super) ms_headers: &'a [(&'a str, &'a str)],
}

impl SharedKeyCredential {
    pub(super) fn new(account: &str, account_key: &str) -> Result<Self, QueueError> {
        let key = STANDARD.decode(account_key.trim())?;
        let mac = HmacSha256::new_from_slice(&key)
            .map_err(|err| QueueError::Decode(format!("account key rejected: {err}")))?;
        Ok(Self {
            account: account.to_string(),
            mac,
        })
    }

    pub(super) fn authorization(&self, request: &SigningRequest<'_>) -> String {
        let string_to_sign = string_to_sign(&self.account, request);
        let mut mac = self.mac.clone();
        mac.update(string_to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());
        format!("SharedKey {}:{}", self.account, signature)
    }
}

fn string_to_sign(account: &str, request: &SigningRequest<'_>) -> String {
    let content_length = if request.content_length == 0 {
        String::new()
    } else {
        request.content_length.to_string()
    };
    let mut out = String::new();
    out.push_str(&request.method.to_ascii_uppercase());
    out.push('\n');
    // Content-Encoding, Content-Language
    out.push_str("\n\n");
    out.push_str(&content_length);
    out.push('\n');
    // Content-MD5
    out.push('\n');
    out.push_str(request.content_type.unwrap_or_default());
    out.push('\n');
    // Date, If-Modified-Since, If-Match, If-None-Match, If-Unmodified-Since, Range
    out.push_str("\n\n\n\n\n\n");
    out.push_str(&canonicalized_headers(request.ms_headers));
    out.push_str(&canonicalized_resource(account, request.url));
    out
}

fn canonicalized_headers(headers: &[(&str, &str)]) -> String {
    let mut sorted: BTreeMap<String, &str> = BTreeMap::new();
    for (name, value) in headers {
        let name = name.trim().to_ascii_lowercase();
        if name.starts_with("x-ms-") {
            sorted.insert(name, value.trim());
        }
    }
    sorted
        .into_iter()
        .map(|(name, value)| format!("{name}:{value}\n"))
        .collect()
}

fn canonicalized_resource(account: &str, url: &Url) -> String {
    let mut out = format!("/{}{}", account, url.path());
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        out.push('\n');
        out.push_str(&name);
        out.push(':');
        out.push_str(&values.join(","));
    }
    out
}
