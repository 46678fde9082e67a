//! An HTTP client for the local TSS daemon.

use std::borrow::Cow;

use ledger::keys::PublicKey;
use ledger::keysign::Blame;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use super::TssInteract;
use crate::config::Settings;
use crate::error::Error;
use crate::error::KeysignError;

#[derive(Debug, Serialize)]
struct KeysignRequest {
    pub_key: PublicKey,
    message: String,
}

#[derive(Debug, Deserialize)]
struct KeysignResponse {
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    blame: Option<Blame>,
}

/// A client for the keysign endpoint of the TSS daemon running next to the
/// bridge. The daemon coordinates the round with the other validators.
#[derive(Debug, Clone)]
pub struct TssClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl TssClient {
    /// Create a client for the daemon at `endpoint`. Requests are not
    /// given a timeout here, the [`super::TssSigner`] bounds each round.
    pub fn new(endpoint: Url) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(Error::HttpClient)?;
        Ok(Self { endpoint, client })
    }

    fn url(&self, path: &'static str) -> Result<Url, Error> {
        self.endpoint
            .join(path)
            .map_err(|err| Error::PathJoin(err, self.endpoint.clone(), Cow::Borrowed(path)))
    }
}

fn decode_signature(signature: &str) -> Option<[u8; 64]> {
    let bytes = hex::decode(signature.trim_start_matches("0x")).ok()?;
    bytes.try_into().ok()
}

impl TssInteract for TssClient {
    #[tracing::instrument(skip_all, fields(%pub_key))]
    async fn sign(&self, message: [u8; 32], pub_key: &PublicKey) -> Result<[u8; 64], Error> {
        let body = KeysignRequest {
            pub_key: *pub_key,
            message: hex::encode(message),
        };

        let response = self
            .client
            .post(self.url("/keysign")?)
            .json(&body)
            .send()
            .await
            .map_err(Error::TssRequest)?
            .error_for_status()
            .map_err(Error::TssResponse)?
            .json::<KeysignResponse>()
            .await
            .map_err(Error::TssResponse)?;

        if let Some(signature) = response.signature.as_deref().and_then(decode_signature) {
            return Ok(signature);
        }

        let mut blame = response.blame.unwrap_or_default();
        if blame.fail_reason.is_empty() {
            blame.fail_reason = "no signature returned".to_string();
        }
        Err(KeysignError { blame }.into())
    }

    async fn start(&self) -> Result<(), Error> {
        self.client
            .get(self.url("/ping")?)
            .send()
            .await
            .map_err(Error::TssRequest)?
            .error_for_status()
            .map_err(Error::TssResponse)?;
        tracing::info!(endpoint = %self.endpoint, "tss daemon is reachable");
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        // The daemon outlives the bridge.
        tracing::info!("stopping tss client");
        Ok(())
    }
}

impl TryFrom<&Settings> for TssClient {
    type Error = Error;

    fn try_from(settings: &Settings) -> Result<Self, Self::Error> {
        TssClient::new(settings.tss.endpoint.clone())
    }
}
