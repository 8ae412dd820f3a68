use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use avm_interface::{CallRequest, CallServiceResult};
use avm_runtime::ServiceInvoker;

/// Return code for calls with no entry in the table.
pub const UNKNOWN_SERVICE_CODE: i32 = 1;

/// Canned service results keyed by `"service_id.function_name"`.
#[derive(Debug, Default, Clone)]
pub struct StaticServices {
    table: HashMap<String, CallServiceResult>,
}

impl StaticServices {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read services file {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid services file {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let table = serde_json::from_str(content)?;
        Ok(Self { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }
}

impl ServiceInvoker for StaticServices {
    fn call(&self, request: CallRequest) -> Result<CallServiceResult> {
        let key = format!("{}.{}", request.service_id, request.function_name);
        match self.table.get(&key) {
            Some(result) => Ok(result.clone()),
            None => {
                tracing::warn!(service = %key, "no static result configured");
                let message = serde_json::Value::String(format!("service {key} not found"));
                Ok(CallServiceResult::error(UNKNOWN_SERVICE_CODE, message.to_string()))
            }
        }
    }
}
