//! JSON-RPC over HTTP client for the broker.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use multimpi_core::rpc::{RpcRequest, RpcResponse};
use multimpi_core::{
    AgentConfig, Error, FollowerCheckin, FollowerInstruction, HelloWorld, LeaderAssignment,
    LeaderCheckin, Result, METHOD_FOLLOWER_CHECKIN, METHOD_HELLO_WORLD, METHOD_LEADER_CHECKIN,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::transport::Broker;

/// Broker reached over HTTP. Transient failures are masked as "no reply"
/// until too many happen in a row for one method.
pub struct HttpBroker {
    client: Client,
    url: String,
    max_failures: u32,
    leader_failures: AtomicU32,
    follower_failures: AtomicU32,
    next_id: AtomicU64,
}

impl HttpBroker {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.connect_timeout + config.read_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            max_failures: config.max_consecutive_failures,
            leader_failures: AtomicU32::new(0),
            follower_failures: AtomicU32::new(0),
            next_id: AtomicU64::new(0),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Liveness probe. Any failure or unexpected payload is an error.
    pub async fn hello_world(&self) -> Result<()> {
        let reply: HelloWorld = self
            .call(METHOD_HELLO_WORLD, &Value::Null)
            .await
            .map_err(|e| Error::Broker(format!("hello_world failed: {}", e)))?;
        if reply != HelloWorld::default() {
            return Err(Error::Broker(format!(
                "hello_world returned unexpected payload: {}",
                reply.hello
            )));
        }
        Ok(())
    }

    async fn call<P, R>(&self, method: &str, params: &P) -> Result<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::new(method, serde_json::to_value(params)?, id);

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} request failed: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "{} returned status {}",
                method,
                response.status()
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("{} reply unreadable: {}", method, e)))?;

        if let Some(err) = body.error {
            return Err(Error::Network(format!(
                "{} rpc error {}: {}",
                method, err.code, err.message
            )));
        }

        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|e| Error::Network(format!("{} result malformed: {}", method, e)))
    }

    /// Mask a transient failure as `None`, counting consecutive failures.
    fn masked<T>(
        &self,
        method: &str,
        failures: &AtomicU32,
        result: Result<Option<T>>,
    ) -> Result<Option<T>> {
        match result {
            Ok(reply) => {
                failures.store(0, Ordering::Relaxed);
                Ok(reply)
            }
            Err(e) if e.is_transient() => {
                let count = failures.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(method, failures = count, "checkin failed: {}", e);
                if count > self.max_failures {
                    error!(method, failures = count, "giving up on the broker");
                    return Err(Error::TooManyFailures {
                        method: method.to_string(),
                        failures: count,
                    });
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

impl Broker for HttpBroker {
    async fn leader_checkin(&self, req: &LeaderCheckin) -> Result<Option<LeaderAssignment>> {
        let result = self.call(METHOD_LEADER_CHECKIN, req).await;
        self.masked(METHOD_LEADER_CHECKIN, &self.leader_failures, result)
    }

    async fn follower_checkin(&self, req: &FollowerCheckin) -> Result<Option<FollowerInstruction>> {
        let result = self.call(METHOD_FOLLOWER_CHECKIN, req).await;
        self.masked(METHOD_FOLLOWER_CHECKIN, &self.follower_failures, result)
    }
}
