//! D-Bus interface for the Rollcall attendance daemon.
//!
//! Bus name: org.rollcall.Attendance1
//! Object path: /org/rollcall/Attendance1
//!
//! Every method returns a JSON string payload: `{"status":"ok", ...}` on
//! success or `{"status":"error","category":...,"detail":...}` on failure.
//! Domain failures never surface as D-Bus errors, so callers always get a
//! well-formed payload with a stable error category.

use crate::service::Service;
use rollcall_core::Result;
use serde_json::{json, Value};
use std::sync::Arc;
use zbus::interface;

pub struct AttendanceInterface {
    service: Arc<Service>,
}

impl AttendanceInterface {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }

    /// Run a blocking service call off the async executor and render the
    /// response payload.
    async fn run<F>(&self, f: F) -> String
    where
        F: FnOnce(&Service) -> Result<Value> + Send + 'static,
    {
        let service = self.service.clone();
        match tokio::task::spawn_blocking(move || f(&service)).await {
            Ok(result) => render(result),
            Err(err) => {
                tracing::error!(error = %err, "request task failed");
                json!({
                    "status": "error",
                    "category": "internal",
                    "detail": "request task failed",
                })
                .to_string()
            }
        }
    }
}

fn render(result: Result<Value>) -> String {
    match result {
        Ok(Value::Object(fields)) => {
            let mut payload = serde_json::Map::new();
            payload.insert("status".into(), json!("ok"));
            payload.extend(fields);
            Value::Object(payload).to_string()
        }
        Ok(other) => json!({ "status": "ok", "result": other }).to_string(),
        Err(err) => json!({
            "status": "error",
            "category": err.category(),
            "detail": err.to_string(),
        })
        .to_string(),
    }
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceInterface {
    /// Enroll a new identity from five images.
    async fn enroll(&self, name: String, images: Vec<Vec<u8>>) -> String {
        tracing::info!(name = %name, images = images.len(), "enroll requested");
        self.run(move |s| s.enroll(&name, images)).await
    }

    /// Recognize the most prominent face in an image.
    async fn recognize(&self, image: Vec<u8>) -> String {
        self.run(move |s| s.recognize(&image)).await
    }

    /// Recognize every face in an image, each matched independently.
    async fn recognize_all(&self, image: Vec<u8>) -> String {
        self.run(move |s| s.recognize_all(&image)).await
    }

    /// Record a present mark from a recognition hit.
    async fn mark_attendance(&self, identity_id: String) -> String {
        self.run(move |s| s.mark_attendance(&identity_id)).await
    }

    /// Record a manual attendance event. `timestamp` is RFC 3339 or empty
    /// for "now".
    async fn manual_attendance(
        &self,
        identity_id: String,
        status: String,
        timestamp: String,
    ) -> String {
        self.run(move |s| s.manual_attendance(&identity_id, &status, &timestamp))
            .await
    }

    async fn list_attendance(&self) -> String {
        self.run(|s| s.list_attendance()).await
    }

    /// Patch a record's status and/or timestamp; empty strings leave the
    /// field unchanged.
    async fn update_attendance(
        &self,
        record_id: String,
        status: String,
        timestamp: String,
    ) -> String {
        self.run(move |s| s.update_attendance(&record_id, &status, &timestamp))
            .await
    }

    async fn delete_attendance(&self, record_id: String) -> String {
        self.run(move |s| s.delete_attendance(&record_id)).await
    }

    async fn clear_attendance(&self) -> String {
        self.run(|s| s.clear_attendance()).await
    }

    async fn deduplicate_attendance(&self) -> String {
        self.run(|s| s.deduplicate_attendance()).await
    }

    async fn list_identities(&self) -> String {
        self.run(|s| s.list_identities()).await
    }

    /// Soft-delete an identity into the trash directory.
    async fn delete_identity(&self, identity_id: String, confirm: bool) -> String {
        tracing::info!(identity_id, confirm, "delete_identity requested");
        self.run(move |s| s.delete_identity(&identity_id, confirm))
            .await
    }

    async fn list_alerts(&self) -> String {
        self.run(|s| s.list_alerts()).await
    }

    /// Daemon status information.
    async fn status(&self) -> String {
        self.run(|s| s.status()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Error;

    #[test]
    fn test_render_merges_ok_fields() {
        let payload = render(Ok(json!({ "id": "001" })));
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["id"], "001");
    }

    #[test]
    fn test_render_failure_has_stable_category() {
        let payload = render(Err(Error::NotFound("identity 042 not found".into())));
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["category"], "not_found");
        assert_eq!(value["detail"], "identity 042 not found");
    }
}
