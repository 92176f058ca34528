//! Request handlers of the development engine.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use mc_protocol::{EngineError, EngineResult, FieldDescriptor, Handler, HandlerResponse};
use serde::Serialize;
use serde_json::json;

use super::ENGINE_NAME;
use super::context::DevState;

const JSON: &str = "application/json";
const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Version,
    Libraries,
    Upload,
    Echo,
}

/// Pick the handler for `method` and `path`.
pub(crate) fn resolve(
    method: &str,
    path: &str,
    state: Arc<DevState>,
) -> EngineResult<Box<dyn Handler>> {
    let route = match (method, path) {
        ("GET", "/api/version") => Route::Version,
        ("GET", "/api/libraries") => Route::Libraries,
        ("POST", "/api/upload") => Route::Upload,
        ("POST", "/api/echo") => Route::Echo,
        _ => return Err(EngineError::unknown_route(method, path)),
    };
    Ok(Box::new(DevHandler {
        route,
        state,
        file: None,
        name: None,
        payload: Vec::new(),
    }))
}

struct DevHandler {
    route: Route,
    state: Arc<DevState>,
    file: Option<Vec<u8>>,
    name: Option<String>,
    payload: Vec<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LibraryView<'a> {
    name: &'a str,
    binary: String,
    resources: Option<String>,
}

impl DevHandler {
    fn upload_fields() -> [FieldDescriptor; 2] {
        [
            FieldDescriptor::file("file", true),
            FieldDescriptor::scalar("name", false),
        ]
    }

    fn version(&self) -> serde_json::Value {
        let state = &self.state;
        json!({
            "engine": ENGINE_NAME,
            "version": state.version.to_string(),
            "storage": state.storage.connection_string(),
            "database": state.storage.database().map(|d| d.as_str()),
            "configured": state.configuration.read().is_some(),
            "uptimeMs": state.started.elapsed().as_millis() as u64,
            "heartbeats": state.heartbeats.load(Ordering::Relaxed),
        })
    }

    fn libraries(&self) -> EngineResult<Vec<u8>> {
        let libraries = self.state.libraries.read();
        let view: Vec<LibraryView<'_>> = libraries
            .iter()
            .map(|(name, entry)| LibraryView {
                name,
                binary: entry.binary_path.display().to_string(),
                resources: entry
                    .resource_path
                    .as_ref()
                    .map(|p| p.display().to_string()),
            })
            .collect();
        to_json(&view)
    }

    fn upload(&mut self) -> EngineResult<Vec<u8>> {
        let file = self
            .file
            .take()
            .ok_or_else(|| EngineError::invalid_param("upload without file"))?;
        let uploads = self.state.uploads.fetch_add(1, Ordering::Relaxed) + 1;
        to_json(&json!({
            "name": self.name.as_deref().unwrap_or("upload"),
            "size": file.len(),
            "uploads": uploads,
        }))
    }
}

impl Handler for DevHandler {
    fn expects_raw_body(&self) -> EngineResult<bool> {
        Ok(self.route == Route::Echo)
    }

    fn expects_form_data(&self) -> EngineResult<(u32, bool)> {
        Ok(match self.route {
            Route::Upload => (Self::upload_fields().len() as u32, true),
            _ => (0, false),
        })
    }

    fn field_descriptor(&self, index: u32) -> EngineResult<FieldDescriptor> {
        let fields = match self.route {
            Route::Upload => Self::upload_fields(),
            _ => return Err(EngineError::invalid_param("route has no form fields")),
        };
        fields
            .into_iter()
            .nth(index as usize)
            .ok_or_else(|| EngineError::invalid_param(format!("field index {index}")))
    }

    fn set_file_field(&mut self, name: &str, data: Vec<u8>) -> EngineResult<()> {
        match (self.route, name) {
            (Route::Upload, "file") => {
                self.file = Some(data);
                Ok(())
            }
            _ => Err(EngineError::invalid_param(format!("unexpected file field {name:?}"))),
        }
    }

    fn set_scalar_field(&mut self, name: &str, value: &str) -> EngineResult<()> {
        match (self.route, name) {
            (Route::Upload, "name") => {
                self.name = Some(value.to_string());
                Ok(())
            }
            _ => Err(EngineError::invalid_param(format!("unexpected field {name:?}"))),
        }
    }

    fn handle(&mut self, raw_body: &[u8]) -> EngineResult<HandlerResponse> {
        let (payload, content_type) = match self.route {
            Route::Version => (to_json(&self.version())?, JSON),
            Route::Libraries => (self.libraries()?, JSON),
            Route::Upload => (self.upload()?, JSON),
            Route::Echo => (raw_body.to_vec(), OCTET_STREAM),
        };
        self.payload = payload;
        Ok(HandlerResponse::ok(content_type))
    }

    fn result_payload(&self) -> EngineResult<Vec<u8>> {
        Ok(self.payload.clone())
    }
}

fn to_json<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| EngineError::new(format!("JSON encoding failed: {e}")))
}
