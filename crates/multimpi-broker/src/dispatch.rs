//! JSON-RPC dispatch onto a shared [`Scheduler`].
//!
//! Every checkin runs under one mutex, so each reply reflects a single
//! consistent registry state.

use multimpi_core::rpc::{
    RpcRequest, RpcResponse, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, JSONRPC_VERSION,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
use multimpi_core::{
    FollowerCheckin, HelloWorld, LeaderCheckin, METHOD_FOLLOWER_CHECKIN, METHOD_HELLO_WORLD,
    METHOD_LEADER_CHECKIN,
};
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::scheduler::Scheduler;

pub struct Dispatcher {
    scheduler: Mutex<Scheduler>,
}

impl Dispatcher {
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            scheduler: Mutex::new(scheduler),
        }
    }

    /// Exclusive access to the registry (reaper, shutdown, tests).
    pub fn scheduler(&self) -> MutexGuard<'_, Scheduler> {
        self.scheduler.lock()
    }

    /// Handle a raw HTTP body. Returns `None` when nothing should be sent
    /// back (notifications, or a batch made only of notifications).
    pub fn handle_body(&self, body: &[u8]) -> Option<Value> {
        let parsed: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => {
                debug!("unparseable request body: {}", e);
                return to_value(RpcResponse::failure(Value::Null, PARSE_ERROR, "Parse error"));
            }
        };

        match parsed {
            Value::Array(items) if items.is_empty() => to_value(RpcResponse::failure(
                Value::Null,
                INVALID_REQUEST,
                "Invalid Request",
            )),
            Value::Array(items) => {
                let replies: Vec<Value> = items
                    .into_iter()
                    .filter_map(|item| self.handle_value(item))
                    .collect();
                (!replies.is_empty()).then_some(Value::Array(replies))
            }
            single => self.handle_value(single),
        }
    }

    fn handle_value(&self, value: Value) -> Option<Value> {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        // `"id": null` still expects a reply; only a missing id does not.
        let notification = value.get("id").is_none();
        match serde_json::from_value::<RpcRequest>(value) {
            Ok(req) if req.jsonrpc == JSONRPC_VERSION => {
                let response = self.handle_request(req);
                if notification {
                    None
                } else {
                    to_value(response)
                }
            }
            _ => to_value(RpcResponse::failure(id, INVALID_REQUEST, "Invalid Request")),
        }
    }

    /// Route one request to its method.
    pub fn handle_request(&self, req: RpcRequest) -> RpcResponse {
        let id = req.id.clone().unwrap_or(Value::Null);
        let result = match req.method.as_str() {
            METHOD_LEADER_CHECKIN => call(req.params, |p: LeaderCheckin| {
                self.scheduler.lock().leader_checkin(&p)
            }),
            METHOD_FOLLOWER_CHECKIN => call(req.params, |p: FollowerCheckin| {
                self.scheduler.lock().follower_checkin(&p)
            }),
            METHOD_HELLO_WORLD => serde_json::to_value(HelloWorld::default())
                .map_err(|e| (INTERNAL_ERROR, e.to_string())),
            other => Err((METHOD_NOT_FOUND, format!("Method not found: {}", other))),
        };

        match result {
            Ok(value) => RpcResponse::success(id, value),
            Err((code, message)) => {
                if code == METHOD_NOT_FOUND {
                    debug!(method = %req.method, "unknown method");
                } else {
                    warn!(method = %req.method, code, "rpc error: {}", message);
                }
                RpcResponse::failure(id, code, message)
            }
        }
    }
}

/// Decode params (a single object, or a one-element positional array) and
/// run `f`.
fn call<P, R>(params: Value, f: impl FnOnce(P) -> R) -> Result<Value, (i64, String)>
where
    P: DeserializeOwned,
    R: Serialize,
{
    let params = match params {
        Value::Array(mut items) if items.len() == 1 => items.remove(0),
        other => other,
    };
    let p: P = serde_json::from_value(params)
        .map_err(|e| (INVALID_PARAMS, format!("Invalid params: {}", e)))?;
    serde_json::to_value(f(p)).map_err(|e| (INTERNAL_ERROR, e.to_string()))
}

fn to_value(response: RpcResponse) -> Option<Value> {
    serde_json::to_value(response).ok()
}
