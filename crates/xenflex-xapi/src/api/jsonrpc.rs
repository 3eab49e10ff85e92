//! Blocking JSON-RPC client for the XenAPI management endpoint.

use super::{SessionOps, SrOps, VbdOps, VdiOps, VifOps, VmOps, XapiConnector};
use crate::{
    NewVbd, NewVdi, SessionRef, SrRef, VbdRecord, VbdRef, VdiRecord, VdiRef, VifRecord, VifRef,
    VmRef, XapiError, XapiResult,
};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Accept self-signed management certificates.
    pub accept_invalid_certs: bool,
    /// Per-request timeout; `None` keeps the HTTP client's default.
    pub timeout: Option<Duration>,
}

/// XenAPI client speaking JSON-RPC 2.0 over HTTPS.
#[derive(Debug)]
pub struct JsonRpcXapi {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl RpcError {
    fn into_xapi(self) -> XapiError {
        let params = match self.data {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.to_string()],
        };
        XapiError::Api {
            code: self.message,
            params,
        }
    }
}

/// JSON-RPC endpoint for a management host. A bare host name gets `https://`.
pub fn endpoint_for(host: &str) -> String {
    let base = if host.contains("://") {
        host.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", host.trim_end_matches('/'))
    };
    format!("{}/jsonrpc", base)
}

impl JsonRpcXapi {
    pub fn new(host: &str, options: &ClientOptions) -> XapiResult<Self> {
        let mut builder = Client::builder()
            .user_agent("xenflex")
            .danger_accept_invalid_certs(options.accept_invalid_certs);
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| XapiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint_for(host),
            next_id: AtomicU64::new(1),
        })
    }

    fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> XapiResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        // Params are never logged: login carries the password.
        log::debug!("xapi {} (id {})", method, id);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| XapiError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(XapiError::Http {
                status: status.as_u16(),
            });
        }

        let envelope: RpcResponse = response.json().map_err(|e| XapiError::Decode {
            method: method.to_string(),
            message: e.to_string(),
        })?;
        if let Some(err) = envelope.error {
            let err = err.into_xapi();
            log::debug!("xapi {} failed: {}", method, err);
            return Err(err);
        }

        serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|e| {
            XapiError::Decode {
                method: method.to_string(),
                message: e.to_string(),
            }
        })
    }

    fn call_void(&self, method: &str, params: Value) -> XapiResult<()> {
        self.call::<Value>(method, params).map(|_| ())
    }
}

impl SessionOps for JsonRpcXapi {
    fn login_with_password(
        &self,
        username: &str,
        password: &str,
        version: &str,
        originator: &str,
    ) -> XapiResult<SessionRef> {
        self.call(
            "session.login_with_password",
            json!([username, password, version, originator]),
        )
    }

    fn logout(&self, session: &SessionRef) -> XapiResult<()> {
        self.call_void("session.logout", json!([session]))
    }
}

impl VmOps for JsonRpcXapi {
    fn vm_allowed_vbd_devices(&self, session: &SessionRef, vm: &VmRef) -> XapiResult<Vec<String>> {
        self.call("VM.get_allowed_VBD_devices", json!([session, vm]))
    }
}

impl VdiOps for JsonRpcXapi {
    fn vdi_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VdiRef, VdiRecord>> {
        self.call("VDI.get_all_records", json!([session]))
    }

    fn vdi_create(&self, session: &SessionRef, vdi: &NewVdi) -> XapiResult<VdiRef> {
        self.call("VDI.create", json!([session, vdi]))
    }

    fn vdi_destroy(&self, session: &SessionRef, vdi: &VdiRef) -> XapiResult<()> {
        self.call_void("VDI.destroy", json!([session, vdi]))
    }
}

impl VbdOps for JsonRpcXapi {
    fn vbd_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VbdRef, VbdRecord>> {
        self.call("VBD.get_all_records", json!([session]))
    }

    fn vbd_create(&self, session: &SessionRef, vbd: &NewVbd) -> XapiResult<VbdRef> {
        self.call("VBD.create", json!([session, vbd]))
    }

    fn vbd_plug(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()> {
        self.call_void("VBD.plug", json!([session, vbd]))
    }

    fn vbd_unplug(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()> {
        self.call_void("VBD.unplug", json!([session, vbd]))
    }

    fn vbd_unplug_force(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()> {
        self.call_void("VBD.unplug_force", json!([session, vbd]))
    }

    fn vbd_destroy(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<()> {
        self.call_void("VBD.destroy", json!([session, vbd]))
    }

    fn vbd_device(&self, session: &SessionRef, vbd: &VbdRef) -> XapiResult<String> {
        self.call("VBD.get_device", json!([session, vbd]))
    }
}

impl VifOps for JsonRpcXapi {
    fn vif_all_records(&self, session: &SessionRef) -> XapiResult<BTreeMap<VifRef, VifRecord>> {
        self.call("VIF.get_all_records", json!([session]))
    }
}

impl SrOps for JsonRpcXapi {
    fn sr_by_name_label(&self, session: &SessionRef, label: &str) -> XapiResult<Vec<SrRef>> {
        self.call("SR.get_by_name_label", json!([session, label]))
    }
}

/// Connector producing [`JsonRpcXapi`] clients.
#[derive(Debug, Clone, Default)]
pub struct JsonRpcConnector {
    pub options: ClientOptions,
}

impl JsonRpcConnector {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

impl XapiConnector for JsonRpcConnector {
    type Client = JsonRpcXapi;

    fn connect(&self, host: &str) -> XapiResult<JsonRpcXapi> {
        JsonRpcXapi::new(host, &self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{VbdMode, DEVICE_DETACH_REJECTED};
    use httpmock::Method::POST;
    use httpmock::MockServer;

    fn client(server: &MockServer) -> JsonRpcXapi {
        JsonRpcXapi::new(&server.base_url(), &ClientOptions::default()).unwrap()
    }

    #[test]
    fn endpoint_defaults_to_https() {
        assert_eq!(endpoint_for("xen01"), "https://xen01/jsonrpc");
        assert_eq!(
            endpoint_for("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080/jsonrpc"
        );
    }

    #[test]
    fn login_returns_session_ref() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/jsonrpc")
                .body_contains("\"method\":\"session.login_with_password\"")
                .body_contains("\"root\"");
            then.status(200)
                .json_body(json!({"jsonrpc": "2.0", "result": "OpaqueRef:s1", "id": 1}));
        });

        let session = client(&server)
            .login_with_password("root", "secret", "1.0", "xenflex")
            .unwrap();

        mock.assert();
        assert_eq!(session, SessionRef::new("OpaqueRef:s1"));
    }

    #[test]
    fn api_errors_keep_code_and_params() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).body_contains("\"method\":\"VBD.unplug\"");
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "error": {"code": 1, "message": DEVICE_DETACH_REJECTED, "data": ["VBD", "OpaqueRef:v", "in use"]},
                "id": 1
            }));
        });

        let err = client(&server)
            .vbd_unplug(&SessionRef::new("OpaqueRef:s"), &VbdRef::new("OpaqueRef:v"))
            .unwrap_err();

        assert!(err.has_code(DEVICE_DETACH_REJECTED));
        match err {
            XapiError::Api { params, .. } => assert_eq!(params[2], "in use"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn void_calls_accept_empty_results() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).body_contains("\"method\":\"session.logout\"");
            then.status(200)
                .json_body(json!({"jsonrpc": "2.0", "result": "", "id": 1}));
        });

        client(&server)
            .logout(&SessionRef::new("OpaqueRef:s"))
            .unwrap();
    }

    #[test]
    fn records_decode_into_typed_maps() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).body_contains("\"method\":\"VBD.get_all_records\"");
            then.status(200).json_body(json!({
                "jsonrpc": "2.0",
                "result": {
                    "OpaqueRef:b1": {
                        "VM": "OpaqueRef:vm", "VDI": "OpaqueRef:d1", "device": "xvdb",
                        "userdevice": "1", "currently_attached": true, "mode": "RW", "type": "Disk"
                    }
                },
                "id": 1
            }));
        });

        let records = client(&server)
            .vbd_all_records(&SessionRef::new("OpaqueRef:s"))
            .unwrap();

        let record = &records[&VbdRef::new("OpaqueRef:b1")];
        assert_eq!(record.device, "xvdb");
        assert_eq!(record.mode, VbdMode::ReadWrite);
    }

    #[test]
    fn http_failures_are_reported_with_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(502);
        });

        let err = client(&server)
            .sr_by_name_label(&SessionRef::new("OpaqueRef:s"), "Local storage")
            .unwrap_err();

        assert!(matches!(err, XapiError::Http { status: 502 }));
        assert!(err.is_transient());
    }

    #[test]
    fn malformed_result_is_a_decode_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200)
                .json_body(json!({"jsonrpc": "2.0", "result": 42, "id": 1}));
        });

        let err = client(&server)
            .vm_allowed_vbd_devices(&SessionRef::new("OpaqueRef:s"), &VmRef::new("OpaqueRef:vm"))
            .unwrap_err();

        assert!(matches!(err, XapiError::Decode { .. }));
    }
}
