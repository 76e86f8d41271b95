use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcRequest<T = serde_json::Value> {
    pub id: String,
    pub jsonrpc: String,
    pub method: String,
    pub params: Vec<T>,
}

impl<T> JsonRpcRequest<T> {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Vec<T>) -> Self {
        Self {
            id: id.into(),
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct JsonRpcError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl<T> JsonRpcResponse<T> {
    /// Split into the result or a readable error message
    pub fn into_result(self) -> Result<T, String> {
        if let Some(err) = self.error {
            return Err(match err.code {
                Some(code) => format!("{} (code {})", err.message, code),
                None => err.message,
            });
        }
        self.result
            .ok_or_else(|| "JSON-RPC response has neither result nor error".to_string())
    }
}
