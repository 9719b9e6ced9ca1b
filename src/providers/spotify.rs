use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::traits::{OAuthProvider, ProviderProfile, TokenSet};
use crate::error::AuthError;

/// Scope needed to read the user's playback state.
pub const PLAYBACK_SCOPE: &str = "user-read-currently-playing";

/// Spotify OAuth 2.0 client.
///
/// Token endpoint: `{accounts_url}/api/token`, client authenticated with HTTP Basic.
/// Token lifetime: 1 hour. Refresh responses usually omit the refresh token.
pub struct SpotifyProvider {
    client_id: String,
    client_secret: String,
    redirect_url: String,
    accounts_url: String,
    api_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SpotifyTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyUser {
    id: String,
    display_name: Option<String>,
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

/// One size variant of an album cover or avatar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotifyImage {
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Pick the largest image. A candidate only replaces the current best when
/// it is strictly larger on both width and height; ties keep the first seen.
pub fn best_image(images: &[SpotifyImage]) -> Option<&SpotifyImage> {
    let mut best: Option<&SpotifyImage> = None;
    for image in images {
        let dominates = match best {
            None => true,
            Some(current) => {
                image.width.unwrap_or(0) > current.width.unwrap_or(0)
                    && image.height.unwrap_or(0) > current.height.unwrap_or(0)
            }
        };
        if dominates {
            best = Some(image);
        }
    }
    best
}

impl SpotifyProvider {
    pub fn new(
        client_id: String,
        client_secret: String,
        redirect_url: String,
        accounts_url: String,
        api_url: String,
    ) -> Self {
        Self {
            client_id,
            client_secret,
            redirect_url,
            accounts_url: accounts_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, AuthError> {
        let resp = self
            .http
            .post(format!("{}/api/token", self.accounts_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Upstream {
                status: None,
                body: format!("token request failed: {e}"),
            })?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "Spotify token endpoint rejected request");
            return Err(AuthError::Upstream {
                status: Some(status.as_u16()),
                body,
            });
        }

        let token_resp: SpotifyTokenResponse =
            serde_json::from_str(&body).map_err(|e| AuthError::Upstream {
                status: Some(status.as_u16()),
                body: format!("invalid token response ({e}): {body}"),
            })?;

        Ok(TokenSet {
            access_token: token_resp.access_token,
            refresh_token: token_resp.refresh_token,
            token_type: token_resp.token_type,
            expires_in: token_resp.expires_in,
            scope: token_resp.scope,
        })
    }
}

#[async_trait]
impl OAuthProvider for SpotifyProvider {
    fn id(&self) -> &str {
        "spotify"
    }

    fn auth_url(&self, state: &str) -> String {
        format!(
            "{accounts}/authorize?\
             response_type=code\
             &client_id={client_id}\
             &scope={scope}\
             &state={state}\
             &redirect_uri={redirect_uri}",
            accounts = self.accounts_url,
            client_id = urlencoding(&self.client_id),
            scope = urlencoding(PLAYBACK_SCOPE),
            state = urlencoding(state),
            redirect_uri = urlencoding(&self.redirect_url),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenSet, AuthError> {
        self.token_request(&[
            ("code", code),
            ("redirect_uri", self.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<ProviderProfile, AuthError> {
        let resp = self
            .http
            .get(format!("{}/v1/me", self.api_url))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::Upstream {
                status: None,
                body: format!("profile request failed: {e}"),
            })?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = status.as_u16(), body = %body, "Spotify profile lookup failed");
            return Err(AuthError::Upstream {
                status: Some(status.as_u16()),
                body,
            });
        }

        let user: SpotifyUser = serde_json::from_str(&body).map_err(|e| AuthError::Upstream {
            status: Some(status.as_u16()),
            body: format!("invalid profile response ({e}): {body}"),
        })?;

        Ok(ProviderProfile {
            display_name: user.display_name.unwrap_or_else(|| user.id.clone()),
            avatar_url: best_image(&user.images).map(|i| i.url.clone()),
            id: user.id,
        })
    }
}

/// Simple percent-encoding for URL parameters.
fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn provider(server_url: &str) -> SpotifyProvider {
        SpotifyProvider::new(
            "client-id".into(),
            "client-secret".into(),
            "http://localhost:8430/auth/callback".into(),
            server_url.into(),
            server_url.into(),
        )
    }

    fn image(w: u32, h: u32) -> SpotifyImage {
        SpotifyImage {
            url: format!("https://i.scdn.co/image/{w}x{h}"),
            width: Some(w),
            height: Some(h),
        }
    }

    #[test]
    fn test_best_image_requires_both_dimensions() {
        let images = vec![image(64, 64), image(300, 300), image(300, 64)];
        assert_eq!(best_image(&images), Some(&images[1]));
    }

    #[test]
    fn test_best_image_keeps_first_on_tie() {
        let mut second = image(640, 640);
        second.url = "second".into();
        let images = vec![image(640, 640), second];
        assert_eq!(best_image(&images).map(|i| i.url.as_str()), Some("https://i.scdn.co/image/640x640"));
    }

    #[test]
    fn test_best_image_not_by_area() {
        let images = vec![image(300, 300), image(1000, 200)];
        assert_eq!(best_image(&images), Some(&images[0]));
        assert_eq!(best_image(&[]), None);
    }

    #[test]
    fn test_auth_url() {
        let p = provider("https://accounts.example");
        let url = p.auth_url("st/ate");
        assert!(url.starts_with("https://accounts.example/authorize?response_type=code"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("scope=user-read-currently-playing"));
        assert!(url.contains("state=st%2Fate"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8430%2Fauth%2Fcallback"));
    }

    #[tokio::test]
    async fn test_refresh_posts_form_with_basic_auth() {
        let mut server = Server::new_async().await;
        // base64("client-id:client-secret")
        let mock = server
            .mock("POST", "/api/token")
            .match_header(
                "authorization",
                Matcher::Exact("Basic Y2xpZW50LWlkOmNsaWVudC1zZWNyZXQ=".into()),
            )
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
                Matcher::UrlEncoded("refresh_token".into(), "rt-1".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at-2","token_type":"Bearer","expires_in":3600,"scope":"user-read-currently-playing"}"#,
            )
            .create_async()
            .await;

        let tokens = provider(&server.url()).refresh_token("rt-1").await.unwrap();
        mock.assert_async().await;

        assert_eq!(tokens.access_token, "at-2");
        assert_eq!(tokens.refresh_token, None);
        assert_eq!(tokens.expires_in, Some(3600));
    }

    #[tokio::test]
    async fn test_exchange_error_carries_status_and_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/token")
            .match_body(Matcher::UrlEncoded(
                "grant_type".into(),
                "authorization_code".into(),
            ))
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let err = provider(&server.url()).exchange_code("bad").await.unwrap_err();
        mock.assert_async().await;

        match err {
            AuthError::Upstream { status, body } => {
                assert_eq!(status, Some(400));
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_profile_picks_avatar() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/me")
            .match_header("authorization", "Bearer at-1")
            .with_status(200)
            .with_body(
                r#"{"id":"listener","display_name":"Listener","images":[
                    {"url":"small","width":64,"height":64},
                    {"url":"large","width":300,"height":300}]}"#,
            )
            .create_async()
            .await;

        let profile = provider(&server.url()).fetch_profile("at-1").await.unwrap();
        mock.assert_async().await;

        assert_eq!(profile.id, "listener");
        assert_eq!(profile.display_name, "Listener");
        assert_eq!(profile.avatar_url.as_deref(), Some("large"));
    }
}
