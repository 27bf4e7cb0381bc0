//! Endpoint construction
//!
//! Priority: explicit endpoint override, host override, API base URL with
//! the scheme upgraded, then `ws://localhost:8000`. Every candidate except
//! the explicit override gets the path `/ws/game/{session_id}`. The token is
//! always appended as the `token` query parameter.

use url::Url;

use super::error::ConnectionError;
use super::shared::{DEFAULT_HOST, SESSION_ID_PLACEHOLDER, TOKEN_QUERY_PARAM};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointConfig {
    /// Full endpoint; `{session_id}` is substituted when present
    pub url_override: Option<String>,
    /// `host[:port]` used with the session path
    pub host_override: Option<String>,
    /// `wss` instead of `ws` for the host override
    pub secure: bool,
    /// HTTP API base; `http→ws`, `https→wss`
    pub api_base_url: Option<String>,
}

impl EndpointConfig {
    /// Build the connection URL for `session_id` authenticated with `token`
    pub fn resolve(&self, session_id: &str, token: &str) -> Result<Url, ConnectionError> {
        let mut url = if let Some(raw) = &self.url_override {
            Url::parse(&raw.replace(SESSION_ID_PLACEHOLDER, session_id))?
        } else if let Some(host) = &self.host_override {
            let scheme = if self.secure { "wss" } else { "ws" };
            let mut url = Url::parse(&format!("{scheme}://{}", host.trim_end_matches('/')))?;
            set_session_path(&mut url, session_id)?;
            url
        } else if let Some(api) = &self.api_base_url {
            let mut url = Url::parse(api)?;
            let scheme = match url.scheme() {
                "http" | "ws" => "ws",
                "https" | "wss" => "wss",
                other => {
                    return Err(ConnectionError::InvalidEndpoint(format!(
                        "unsupported API scheme '{other}'"
                    )))
                }
            };
            url.set_scheme(scheme).map_err(|_| {
                ConnectionError::InvalidEndpoint(format!("cannot switch {api} to {scheme}"))
            })?;
            url.set_query(None);
            url.set_fragment(None);
            set_session_path(&mut url, session_id)?;
            url
        } else {
            let mut url = Url::parse(&format!("ws://{DEFAULT_HOST}"))?;
            set_session_path(&mut url, session_id)?;
            url
        };

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConnectionError::InvalidEndpoint(format!(
                "expected ws:// or wss://, got {}://",
                url.scheme()
            )));
        }

        url.query_pairs_mut().append_pair(TOKEN_QUERY_PARAM, token);
        Ok(url)
    }
}

fn set_session_path(url: &mut Url, session_id: &str) -> Result<(), ConnectionError> {
    let shown = url.to_string();
    url.path_segments_mut()
        .map_err(|_| ConnectionError::InvalidEndpoint(format!("{shown} cannot carry a path")))?
        .clear()
        .extend(["ws", "game", session_id]);
    Ok(())
}

/// URL with the token value masked, for logs
pub fn redact(url: &Url) -> String {
    let mut masked = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == TOKEN_QUERY_PARAM {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return masked.to_string();
    }
    masked.query_pairs_mut().clear().extend_pairs(pairs);
    masked.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_localhost() {
        let url = EndpointConfig::default().resolve("g1", "tok").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/game/g1?token=tok");
    }

    #[test]
    fn override_substitutes_placeholder() {
        let config = EndpointConfig {
            url_override: Some("wss://play.example.com/live/{session_id}".into()),
            host_override: Some("ignored:1".into()),
            ..EndpointConfig::default()
        };
        let url = config.resolve("abc", "tok").unwrap();
        assert_eq!(url.as_str(), "wss://play.example.com/live/abc?token=tok");
    }

    #[test]
    fn override_without_placeholder_is_used_as_is() {
        let config = EndpointConfig {
            url_override: Some("ws://127.0.0.1:9000/socket".into()),
            ..EndpointConfig::default()
        };
        let url = config.resolve("abc", "tok").unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:9000/socket?token=tok");
    }

    #[test]
    fn host_override_uses_secure_flag() {
        let config = EndpointConfig {
            host_override: Some("game.example.com".into()),
            secure: true,
            api_base_url: Some("http://api.example.com".into()),
            ..EndpointConfig::default()
        };
        let url = config.resolve("g7", "tok").unwrap();
        assert_eq!(url.as_str(), "wss://game.example.com/ws/game/g7?token=tok");
    }

    #[test]
    fn api_base_is_upgraded_and_path_replaced() {
        let config = EndpointConfig {
            api_base_url: Some("https://api.example.com/api/v1?x=1".into()),
            ..EndpointConfig::default()
        };
        let url = config.resolve("g7", "tok").unwrap();
        assert_eq!(url.as_str(), "wss://api.example.com/ws/game/g7?token=tok");

        let config = EndpointConfig {
            api_base_url: Some("http://localhost:8000".into()),
            ..EndpointConfig::default()
        };
        let url = config.resolve("g7", "tok").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:8000/ws/game/g7?token=tok");
    }

    #[test]
    fn token_is_query_encoded() {
        let url = EndpointConfig::default().resolve("g1", "a b&c").unwrap();
        assert_eq!(url.query(), Some("token=a+b%26c"));
    }

    #[test]
    fn rejects_non_websocket_override() {
        let config = EndpointConfig {
            url_override: Some("ftp://example.com/x".into()),
            ..EndpointConfig::default()
        };
        assert!(matches!(
            config.resolve("g1", "tok"),
            Err(ConnectionError::InvalidEndpoint(_))
        ));

        let config = EndpointConfig {
            url_override: Some("not a url".into()),
            ..EndpointConfig::default()
        };
        assert!(config.resolve("g1", "tok").is_err());
    }

    #[test]
    fn opaque_url_cannot_take_session_path() {
        let mut url = Url::parse("mailto:gm@example.com").unwrap();
        match set_session_path(&mut url, "g1") {
            Err(ConnectionError::InvalidEndpoint(message)) => {
                assert!(message.starts_with("mailto:gm@example.com"), "{message}")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn redact_masks_token_only() {
        let url = Url::parse("ws://h/ws/game/1?token=secret&v=2").unwrap();
        assert_eq!(redact(&url), "ws://h/ws/game/1?token=***&v=2");
    }
}
