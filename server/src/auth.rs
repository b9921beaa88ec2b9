//! Ticket verification against the Steam Web API.
//!
//! Verification fails closed: anything other than a clean "OK" for an
//! unbanned, plausible account is a denial, including transport failures,
//! timeouts and responses that do not parse.

use crate::error::AuthError;
use crate::session::{AuthTicket, SteamId};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use std::time::Duration;

pub const STEAM_API_BASE: &str = "https://api.steampowered.com";

/// Steam application id of the game.
pub const APP_ID: u32 = 674940;

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Display name used when the profile lookup finds nobody.
pub const NAME_NOT_FOUND: &str = "NOT_FOUND";

/// A verified player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub identity: SteamId,
    pub name: String,
}

/// Turns an auth ticket into a verified identity, or a reason for denial.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, ticket: &AuthTicket) -> Result<VerifiedIdentity, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TicketEnvelope {
    response: TicketResponse,
}

#[derive(Debug, Deserialize)]
struct TicketResponse {
    params: Option<TicketParams>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct TicketParams {
    result: String,
    steamid: String,
    #[serde(default)]
    vacbanned: bool,
    #[serde(default)]
    publisherbanned: bool,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    errorcode: i64,
    errordesc: String,
}

#[derive(Debug, Deserialize)]
struct SummaryEnvelope {
    response: SummaryResponse,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    players: Vec<PlayerSummary>,
}

#[derive(Debug, Deserialize)]
struct PlayerSummary {
    personaname: String,
}

/// Checks a ticket verification body and extracts the verified account.
fn interpret_ticket_response(body: &str) -> Result<SteamId, AuthError> {
    let envelope: TicketEnvelope =
        serde_json::from_str(body).map_err(|e| AuthError::Malformed(e.to_string()))?;

    let Some(params) = envelope.response.params else {
        let reason = envelope
            .response
            .error
            .map(|e| format!("{} (code {})", e.errordesc, e.errorcode))
            .unwrap_or_else(|| "response carried no result".to_string());
        return Err(AuthError::Rejected(reason));
    };

    if params.result != "OK" {
        return Err(AuthError::Rejected(format!("result was {}", params.result)));
    }
    if params.vacbanned || params.publisherbanned {
        return Err(AuthError::Rejected("account is banned".to_string()));
    }

    let id: u64 = params
        .steamid
        .parse()
        .map_err(|_| AuthError::Malformed(format!("steamid {:?}", params.steamid)))?;
    let identity = SteamId(id);
    if !identity.is_plausible() {
        return Err(AuthError::ImplausibleIdentity(id));
    }
    Ok(identity)
}

fn interpret_summary_response(body: &str) -> Result<String, AuthError> {
    let envelope: SummaryEnvelope =
        serde_json::from_str(body).map_err(|e| AuthError::Malformed(e.to_string()))?;
    Ok(envelope
        .response
        .players
        .into_iter()
        .next()
        .map(|p| p.personaname)
        .unwrap_or_else(|| NAME_NOT_FOUND.to_string()))
}

/// Verifies tickets with the Steam Web API.
pub struct SteamAuthGateway {
    client: reqwest::Client,
    api_key: String,
    host_steam_id: u64,
    delay: Duration,
    base_url: String,
}

impl SteamAuthGateway {
    pub fn new(api_key: String, host_steam_id: u64, delay: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(concat!("brawl-server/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_key,
            host_steam_id,
            delay,
            base_url: STEAM_API_BASE.to_string(),
        })
    }

    /// Points the gateway at a different API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn authenticate_ticket(&self, ticket: &AuthTicket) -> Result<SteamId, AuthError> {
        let url = format!(
            "{}/ISteamUserAuth/AuthenticateUserTicket/v1/",
            self.base_url
        );
        let body = self
            .client
            .get(url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("appid", &APP_ID.to_string()),
                ("ticket", ticket.as_hex()),
                ("steamid", &self.host_steam_id.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        debug!("Ticket verification response: {}", body);
        interpret_ticket_response(&body)
    }

    async fn fetch_display_name(&self, identity: SteamId) -> Result<String, AuthError> {
        let url = format!("{}/ISteamUser/GetPlayerSummaries/v0002/", self.base_url);
        let body = self
            .client
            .get(url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("steamids", &identity.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        interpret_summary_response(&body)
    }
}

#[async_trait]
impl IdentityVerifier for SteamAuthGateway {
    async fn verify(&self, ticket: &AuthTicket) -> Result<VerifiedIdentity, AuthError> {
        info!("Verifying ticket {}", ticket);
        // Tickets verified immediately after issue are often reported invalid.
        tokio::time::sleep(self.delay).await;

        let identity = match self.authenticate_ticket(ticket).await {
            Ok(identity) => identity,
            Err(e) => {
                match &e {
                    AuthError::Unreachable(_) | AuthError::Timeout => {
                        warn!("Identity service unavailable: {}", e)
                    }
                    _ => info!("Ticket {} denied: {}", ticket, e),
                }
                return Err(e);
            }
        };

        // The account is already verified; a failed name lookup is cosmetic.
        let name = match self.fetch_display_name(identity).await {
            Ok(name) => name,
            Err(e) => {
                warn!("Name lookup for {} failed: {}", identity, e);
                NAME_NOT_FOUND.to_string()
            }
        };

        info!("Ticket {} verified as {} ({})", ticket, name, identity);
        Ok(VerifiedIdentity { identity, name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_response_yields_identity() {
        let body = r#"{"response":{"params":{"result":"OK","steamid":"76561198000000001",
            "ownersteamid":"76561198000000001","vacbanned":false,"publisherbanned":false}}}"#;
        assert_eq!(
            interpret_ticket_response(body).unwrap(),
            SteamId(76561198000000001)
        );
    }

    #[test]
    fn test_error_response_is_rejected() {
        let body = r#"{"response":{"error":{"errorcode":101,"errordesc":"Invalid ticket"}}}"#;
        match interpret_ticket_response(body) {
            Err(AuthError::Rejected(reason)) => assert!(reason.contains("Invalid ticket")),
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_non_ok_result_is_rejected() {
        let body = r#"{"response":{"params":{"result":"Invalid","steamid":"76561198000000001"}}}"#;
        assert!(matches!(
            interpret_ticket_response(body),
            Err(AuthError::Rejected(_))
        ));
    }

    #[test]
    fn test_banned_account_is_rejected() {
        let body = r#"{"response":{"params":{"result":"OK","steamid":"76561198000000001",
            "vacbanned":true,"publisherbanned":false}}}"#;
        assert!(matches!(
            interpret_ticket_response(body),
            Err(AuthError::Rejected(_))
        ));
    }

    #[test]
    fn test_implausible_identity_is_rejected() {
        let body = r#"{"response":{"params":{"result":"OK","steamid":"0"}}}"#;
        assert!(matches!(
            interpret_ticket_response(body),
            Err(AuthError::ImplausibleIdentity(0))
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            interpret_ticket_response("<html>"),
            Err(AuthError::Malformed(_))
        ));
        let body = r#"{"response":{"params":{"result":"OK","steamid":"abc"}}}"#;
        assert!(matches!(
            interpret_ticket_response(body),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn test_summary_name() {
        let body = r#"{"response":{"players":[{"steamid":"1","personaname":"Brawler"}]}}"#;
        assert_eq!(interpret_summary_response(body).unwrap(), "Brawler");
        let empty = r#"{"response":{"players":[]}}"#;
        assert_eq!(interpret_summary_response(empty).unwrap(), NAME_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unreachable_service_denies() {
        let gateway = SteamAuthGateway::new("KEY".to_string(), 1, Duration::ZERO)
            .unwrap()
            .with_base_url("http://127.0.0.1:1");
        let result = gateway.verify(&AuthTicket::from_bytes(&[0xAA])).await;
        assert!(matches!(result, Err(AuthError::Unreachable(_))));
    }
}
