//! # rolemirror-source
//!
//! HTTP member-listing client implementing [`MemberSource`].
//!
//! Requests `GET {base_url}/guilds/{group}/members?limit={n}&after={cursor}`
//! with `Authorization: {scheme} {token}` and decodes a JSON array of
//! `{"user": {"id": ".."}, "roles": [".."]}` objects.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use thiserror::Error;

use rolemirror_core::{GroupId, MemberId, MemberRoleObservation, SourceConfig};
use rolemirror_sync::{FetchError, MemberPage, MemberSource};

/// Errors building the HTTP client.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source token is not set")]
    MissingToken,

    #[error("source token is not a valid header value")]
    InvalidToken,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct MemberPayload {
    #[serde(default)]
    user: Option<UserPayload>,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
}

/// Reqwest-backed member listing.
#[derive(Clone)]
pub struct HttpMemberSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMemberSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let token = config.token.as_deref().ok_or(SourceError::MissingToken)?;
        let mut auth = HeaderValue::from_str(&format!("{} {}", config.auth_scheme, token))
            .map_err(|_| SourceError::InvalidToken)?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn members_url(&self, group: &GroupId) -> String {
        format!("{}/guilds/{}/members", self.base_url, group)
    }
}

#[async_trait]
impl MemberSource for HttpMemberSource {
    async fn fetch_page(
        &self,
        group: &GroupId,
        after: Option<&MemberId>,
        limit: usize,
    ) -> Result<MemberPage, FetchError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }

        let response = self
            .client
            .get(self.members_url(group))
            .query(&query)
            .send()
            .await
            .map_err(|err| transport_error(group, err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                group: group.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| transport_error(group, err))?;
        let page = decode_page(group, &bytes)?;
        tracing::trace!(group = %group, members = page.members.len(), "fetched member page");
        Ok(page)
    }
}

fn transport_error(group: &GroupId, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            group: group.clone(),
        }
    } else {
        FetchError::Request {
            group: group.clone(),
            message: err.to_string(),
        }
    }
}

/// Decode one listing page. Members without a user decode with an empty id.
fn decode_page(group: &GroupId, body: &[u8]) -> Result<MemberPage, FetchError> {
    let payload: Vec<MemberPayload> =
        serde_json::from_slice(body).map_err(|err| FetchError::Decode {
            group: group.clone(),
            message: err.to_string(),
        })?;

    let members = payload
        .into_iter()
        .map(|member| {
            let id = member.user.map(|user| user.id).unwrap_or_default();
            MemberRoleObservation::new(
                group.clone(),
                MemberId::from(id),
                member.roles.into_iter().collect(),
            )
        })
        .collect();
    Ok(MemberPage::new(members))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn source_config(base_url: &str, token: Option<&str>) -> SourceConfig {
        SourceConfig {
            base_url: base_url.to_string(),
            token: token.map(str::to_string),
            ..SourceConfig::default()
        }
    }

    #[test]
    fn decode_collapses_duplicate_roles_and_keeps_order_of_members() {
        let body = br#"[
            {"user": {"id": "2", "username": "b"}, "roles": ["r1", "r1", "r2"], "nick": null},
            {"user": {"id": "1"}, "roles": []}
        ]"#;
        let page = decode_page(&GroupId::from("g"), body).expect("decode");
        assert_eq!(page.has_more, None);
        assert_eq!(page.members.len(), 2);
        assert_eq!(page.members[0].member_id, MemberId::from("2"));
        assert_eq!(page.members[0].roles.len(), 2);
        assert!(page.members[1].roles.is_empty());
    }

    #[test]
    fn member_without_user_gets_empty_id() {
        let page = decode_page(&GroupId::from("g"), br#"[{"roles": ["r"]}]"#).expect("decode");
        assert!(page.members[0].member_id.is_empty());
    }

    #[rstest]
    #[case(br#"{"message": "Missing Access"}"#.as_slice())]
    #[case(b"not json".as_slice())]
    fn non_array_body_is_decode_error(#[case] body: &[u8]) {
        let err = decode_page(&GroupId::from("g"), body).expect_err("decode error");
        assert!(matches!(err, FetchError::Decode { .. }));
    }

    #[test]
    fn members_url_trims_trailing_slash() {
        let source = HttpMemberSource::new(&source_config("https://example.test/api/", Some("t")))
            .expect("client");
        assert_eq!(
            source.members_url(&GroupId::from("42")),
            "https://example.test/api/guilds/42/members"
        );
    }

    #[test]
    fn missing_token_is_rejected() {
        let err = HttpMemberSource::new(&source_config("https://example.test", None))
            .err()
            .expect("missing token");
        assert!(matches!(err, SourceError::MissingToken));
    }

    #[test]
    fn token_with_newline_is_rejected() {
        let err = HttpMemberSource::new(&source_config("https://example.test", Some("a\nb")))
            .err()
            .expect("invalid token");
        assert!(matches!(err, SourceError::InvalidToken));
    }
}
