//! A module with the trait and client the bridge uses to talk to the
//! ledger.

use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use ledger::chain::Chain;
use ledger::keys::PublicKey;
use ledger::keysign::KeysignFailure;
use ledger::observed::ObservedTx;
use ledger::tx::TxId;
use ledger::tx_out::TxOutItem;
use ledger::vault::ErrataBlock;
use ledger::vault::NetworkFee;
use ledger::vault::Solvency;
use ledger::vault::Vault;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use url::Url;

use crate::config::Settings;
use crate::error::Error;
use crate::util::ApiFallbackClient;

/// The ledger operations the bridge depends on.
pub trait LedgerInteract: Send + Sync {
    /// The current ledger height.
    fn get_block_height(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// The protocol version memos are decoded with.
    fn get_protocol_version(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// The asgard vaults, including retiring ones.
    fn get_asgard_vaults(&self) -> impl Future<Output = Result<Vec<Vault>, Error>> + Send;

    /// Submit this validator's observations of `chain`.
    fn submit_observations(
        &self,
        chain: Chain,
        observations: Vec<ObservedTx>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Post a new network fee.
    fn post_network_fee(&self, fee: NetworkFee) -> impl Future<Output = Result<(), Error>> + Send;

    /// Post a failed keysign, returning the id of the ledger transaction.
    fn post_keysign_failure(
        &self,
        failure: KeysignFailure,
    ) -> impl Future<Output = Result<TxId, Error>> + Send;

    /// Post the transactions of an orphaned block.
    fn post_errata(
        &self,
        chain: Chain,
        errata: ErrataBlock,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Post a solvency report.
    fn post_solvency(&self, solvency: Solvency) -> impl Future<Output = Result<(), Error>> + Send;

    /// The outbound items of `chain` scheduled at `height`.
    fn get_outbound_items(
        &self,
        chain: Chain,
        height: u64,
    ) -> impl Future<Output = Result<Vec<TxOutItem>, Error>> + Send;

    /// Whether trading on `chain` is halted.
    fn is_chain_halted(&self, chain: Chain) -> impl Future<Output = Result<bool, Error>> + Send;
}

#[derive(Debug, Deserialize)]
struct HeightResponse {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: u64,
}

#[derive(Debug, Deserialize)]
struct HaltedResponse {
    halted: bool,
}

#[derive(Debug, Deserialize)]
struct TxIdResponse {
    tx_id: TxId,
}

#[derive(Debug, Serialize)]
struct ObservationsRequest<'a> {
    signer: PublicKey,
    txs: &'a [ObservedTx],
}

#[derive(Debug, Serialize)]
struct SignedRequest<'a, T> {
    signer: PublicKey,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Debug, Serialize)]
struct FailureBody<'a> {
    failure: &'a KeysignFailure,
}

#[derive(Debug, Serialize)]
struct ErrataBody<'a> {
    errata: &'a ErrataBlock,
}

#[derive(Debug, Serialize)]
struct SolvencyBody<'a> {
    solvency: &'a Solvency,
}

/// A client for the HTTP API of one ledger node. Writes are signed off by
/// the validator key the client is created with.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    endpoint: Url,
    client: reqwest::Client,
    signer: PublicKey,
}

impl LedgerClient {
    /// Create a client for the node at `endpoint`.
    pub fn new(endpoint: Url, signer: PublicKey, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self { endpoint, client, signer })
    }

    fn url(&self, path: String) -> Result<Url, Error> {
        self.endpoint
            .join(&path)
            .map_err(|err| Error::PathJoin(err, self.endpoint.clone(), Cow::Owned(path)))
    }

    async fn get<R: DeserializeOwned>(&self, path: String) -> Result<R, Error> {
        let url = self.url(path)?;
        self.client
            .get(url)
            .send()
            .await
            .map_err(Error::LedgerRequest)?
            .error_for_status()
            .map_err(Error::LedgerResponse)?
            .json::<R>()
            .await
            .map_err(Error::LedgerResponse)
    }

    /// Post `body`. Server errors, timeouts and rate limits are reported as
    /// [`Error::LedgerUnavailable`], any other failure status as
    /// [`Error::LedgerRefused`].
    async fn post<B: Serialize + ?Sized>(&self, path: String, body: &B) -> Result<reqwest::Response, Error> {
        let url = self.url(path)?;
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(Error::LedgerRequest)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let reason = response.text().await.unwrap_or_default();
        let message = Cow::Owned(format!("{status}: {}", reason.trim()));
        if status.is_server_error()
            || status == StatusCode::REQUEST_TIMEOUT
            || status == StatusCode::TOO_MANY_REQUESTS
        {
            Err(Error::LedgerUnavailable(message))
        } else {
            Err(Error::LedgerRefused(message))
        }
    }

    /// Get the current ledger height.
    ///
    /// This is done by making a `GET /bifrost/height` request.
    #[tracing::instrument(skip_all)]
    pub async fn get_block_height(&self) -> Result<u64, Error> {
        self.get::<HeightResponse>("/bifrost/height".to_string())
            .await
            .map(|resp| resp.height)
    }

    /// Get the protocol version.
    #[tracing::instrument(skip_all)]
    pub async fn get_protocol_version(&self) -> Result<u64, Error> {
        self.get::<VersionResponse>("/bifrost/version".to_string())
            .await
            .map(|resp| resp.version)
    }

    /// Get the asgard vaults.
    #[tracing::instrument(skip_all)]
    pub async fn get_asgard_vaults(&self) -> Result<Vec<Vault>, Error> {
        self.get("/bifrost/vaults/asgard".to_string()).await
    }

    /// Submit observations by making a `POST /bifrost/observations/<chain>`
    /// request.
    #[tracing::instrument(skip_all, fields(%chain, count = observations.len()))]
    pub async fn submit_observations(&self, chain: Chain, observations: &[ObservedTx]) -> Result<(), Error> {
        let body = ObservationsRequest { signer: self.signer, txs: observations };
        self.post(format!("/bifrost/observations/{chain}"), &body)
            .await
            .map(|_| ())
    }

    /// Post a network fee.
    #[tracing::instrument(skip_all, fields(chain = %fee.chain, height = fee.height))]
    pub async fn post_network_fee(&self, fee: &NetworkFee) -> Result<(), Error> {
        let body = SignedRequest { signer: self.signer, body: fee };
        self.post("/bifrost/network_fee".to_string(), &body)
            .await
            .map(|_| ())
    }

    /// Post a keysign failure and return the ledger transaction id.
    #[tracing::instrument(skip_all, fields(height = failure.height))]
    pub async fn post_keysign_failure(&self, failure: &KeysignFailure) -> Result<TxId, Error> {
        let body = SignedRequest { signer: self.signer, body: &FailureBody { failure } };
        self.post("/bifrost/keysign_failure".to_string(), &body)
            .await?
            .json::<TxIdResponse>()
            .await
            .map_err(Error::LedgerResponse)
            .map(|resp| resp.tx_id)
    }

    /// Post an errata block.
    #[tracing::instrument(skip_all, fields(%chain, height = errata.height))]
    pub async fn post_errata(&self, chain: Chain, errata: &ErrataBlock) -> Result<(), Error> {
        let body = SignedRequest { signer: self.signer, body: &ErrataBody { errata } };
        self.post(format!("/bifrost/errata/{chain}"), &body)
            .await
            .map(|_| ())
    }

    /// Post a solvency report.
    #[tracing::instrument(skip_all, fields(chain = %solvency.chain, height = solvency.height))]
    pub async fn post_solvency(&self, solvency: &Solvency) -> Result<(), Error> {
        let body = SignedRequest { signer: self.signer, body: &SolvencyBody { solvency } };
        self.post("/bifrost/solvency".to_string(), &body)
            .await
            .map(|_| ())
    }

    /// Get the outbound items of a chain at a ledger height.
    #[tracing::instrument(skip_all, fields(%chain, height = height))]
    pub async fn get_outbound_items(&self, chain: Chain, height: u64) -> Result<Vec<TxOutItem>, Error> {
        self.get(format!("/bifrost/outbound/{chain}/{height}")).await
    }

    /// Whether a chain is halted.
    #[tracing::instrument(skip_all, fields(%chain))]
    pub async fn is_chain_halted(&self, chain: Chain) -> Result<bool, Error> {
        self.get::<HaltedResponse>(format!("/bifrost/halted/{chain}"))
            .await
            .map(|resp| resp.halted)
    }
}

impl LedgerInteract for LedgerClient {
    async fn get_block_height(&self) -> Result<u64, Error> {
        LedgerClient::get_block_height(self).await
    }

    async fn get_protocol_version(&self) -> Result<u64, Error> {
        LedgerClient::get_protocol_version(self).await
    }

    async fn get_asgard_vaults(&self) -> Result<Vec<Vault>, Error> {
        LedgerClient::get_asgard_vaults(self).await
    }

    async fn submit_observations(&self, chain: Chain, observations: Vec<ObservedTx>) -> Result<(), Error> {
        LedgerClient::submit_observations(self, chain, &observations).await
    }

    async fn post_network_fee(&self, fee: NetworkFee) -> Result<(), Error> {
        LedgerClient::post_network_fee(self, &fee).await
    }

    async fn post_keysign_failure(&self, failure: KeysignFailure) -> Result<TxId, Error> {
        LedgerClient::post_keysign_failure(self, &failure).await
    }

    async fn post_errata(&self, chain: Chain, errata: ErrataBlock) -> Result<(), Error> {
        LedgerClient::post_errata(self, chain, &errata).await
    }

    async fn post_solvency(&self, solvency: Solvency) -> Result<(), Error> {
        LedgerClient::post_solvency(self, &solvency).await
    }

    async fn get_outbound_items(&self, chain: Chain, height: u64) -> Result<Vec<TxOutItem>, Error> {
        LedgerClient::get_outbound_items(self, chain, height).await
    }

    async fn is_chain_halted(&self, chain: Chain) -> Result<bool, Error> {
        LedgerClient::is_chain_halted(self, chain).await
    }
}

impl LedgerInteract for ApiFallbackClient<LedgerClient> {
    async fn get_block_height(&self) -> Result<u64, Error> {
        self.exec(|client| client.get_block_height()).await
    }

    async fn get_protocol_version(&self) -> Result<u64, Error> {
        self.exec(|client| client.get_protocol_version()).await
    }

    async fn get_asgard_vaults(&self) -> Result<Vec<Vault>, Error> {
        self.exec(|client| client.get_asgard_vaults()).await
    }

    async fn submit_observations(&self, chain: Chain, observations: Vec<ObservedTx>) -> Result<(), Error> {
        self.exec(|client| client.submit_observations(chain, &observations))
            .await
    }

    async fn post_network_fee(&self, fee: NetworkFee) -> Result<(), Error> {
        self.exec(|client| client.post_network_fee(&fee)).await
    }

    async fn post_keysign_failure(&self, failure: KeysignFailure) -> Result<TxId, Error> {
        self.exec(|client| client.post_keysign_failure(&failure))
            .await
    }

    async fn post_errata(&self, chain: Chain, errata: ErrataBlock) -> Result<(), Error> {
        self.exec(|client| client.post_errata(chain, &errata)).await
    }

    async fn post_solvency(&self, solvency: Solvency) -> Result<(), Error> {
        self.exec(|client| client.post_solvency(&solvency)).await
    }

    async fn get_outbound_items(&self, chain: Chain, height: u64) -> Result<Vec<TxOutItem>, Error> {
        self.exec(|client| client.get_outbound_items(chain, height))
            .await
    }

    async fn is_chain_halted(&self, chain: Chain) -> Result<bool, Error> {
        self.exec(|client| client.is_chain_halted(chain)).await
    }
}

impl TryFrom<&Settings> for ApiFallbackClient<LedgerClient> {
    type Error = Error;

    fn try_from(settings: &Settings) -> Result<Self, Self::Error> {
        let signer = settings.bifrost.validator_public_key;
        let clients = settings
            .ledger
            .endpoints
            .iter()
            .map(|url| LedgerClient::new(url.clone(), signer, settings.ledger.timeout))
            .collect::<Result<Vec<_>, _>>()?;

        ApiFallbackClient::from_clients(clients)
    }
}
