//! Transport boundary.
//!
//! The engine never talks to the remote service itself. A
//! [`PipelineTransport`] receives a finished canonical document and reports
//! what the service did with it; diagnostics are carried back opaque.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::error::Result;
use crate::pipeline::assembler::CanonicalDocument;
use crate::pipeline::types::PipelineDefinition;
use crate::pipeline::validator::check_name;

/// Workspace and pipeline a document is submitted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionTarget {
    pub workspace_id: String,
    pub pipeline_id: String,
}

impl SubmissionTarget {
    pub fn new(workspace_id: impl Into<String>, pipeline_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            pipeline_id: pipeline_id.into(),
        }
    }
}

/// Outcome reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmissionStatus {
    Accepted,
    /// Accepted for asynchronous processing; `operation` identifies it
    AcceptedPending { operation: String },
    /// Rejected by the service; `diagnostic` is the raw response body
    Rejected { status: u16, diagnostic: String },
}

impl SubmissionStatus {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, SubmissionStatus::Rejected { .. })
    }
}

/// Submits canonical documents to the remote service.
#[async_trait]
pub trait PipelineTransport: Send + Sync {
    /// Submit a document. Transport-level failures are errors; a service
    /// rejection is a `Rejected` status.
    async fn submit(&self, target: &SubmissionTarget, document: &CanonicalDocument) -> Result<SubmissionStatus>;

    fn name(&self) -> &str {
        "transport"
    }
}

/// Compile a definition and submit it.
///
/// The transport is only called once compilation has fully succeeded.
pub async fn publish(
    engine: &Engine,
    transport: &dyn PipelineTransport,
    target: &SubmissionTarget,
    definition: &PipelineDefinition,
) -> Result<SubmissionStatus> {
    let document = engine.compile(definition)?;
    let status = transport.submit(target, &document).await?;

    match &status {
        SubmissionStatus::Rejected { status: code, .. } => warn!(
            transport = transport.name(),
            pipeline = %target.pipeline_id,
            status = code,
            "Pipeline rejected"
        ),
        _ => info!(
            transport = transport.name(),
            pipeline = %target.pipeline_id,
            workspace = %target.workspace_id,
            "Pipeline submitted"
        ),
    }
    Ok(status)
}

/// Writes item definitions to `<root>/<workspace>/<pipeline>.json`.
///
/// A local outbox for staging documents before another tool uploads them.
pub struct DirectoryTransport {
    root: PathBuf,
}

impl DirectoryTransport {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Output file for a target. Ids are checked so they cannot escape the root.
    pub fn path_for(&self, target: &SubmissionTarget) -> Result<PathBuf> {
        check_name(&target.workspace_id, 260)?;
        check_name(&target.pipeline_id, 260)?;
        Ok(self
            .root
            .join(&target.workspace_id)
            .join(format!("{}.json", target.pipeline_id)))
    }
}

#[async_trait]
impl PipelineTransport for DirectoryTransport {
    async fn submit(&self, target: &SubmissionTarget, document: &CanonicalDocument) -> Result<SubmissionStatus> {
        let path = self.path_for(target)?;
        let item = serde_json::json!({
            "displayName": document.name,
            "definition": { "parts": document.definition_parts()? },
        });

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_string_pretty(&item)?).await?;
        debug!(path = %path.display(), "Wrote item definition");
        Ok(SubmissionStatus::Accepted)
    }

    fn name(&self) -> &str {
        "directory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::parse_pipeline;
    use std::sync::Mutex;

    /// Records submissions and replies with a fixed status.
    struct RecordingTransport {
        reply: SubmissionStatus,
        submitted: Mutex<Vec<(SubmissionTarget, String)>>,
    }

    impl RecordingTransport {
        fn new(reply: SubmissionStatus) -> Self {
            Self {
                reply,
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.submitted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PipelineTransport for RecordingTransport {
        async fn submit(&self, target: &SubmissionTarget, document: &CanonicalDocument) -> Result<SubmissionStatus> {
            self.submitted
                .lock()
                .unwrap()
                .push((target.clone(), document.to_json()?));
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    const VALID: &str = r#"
name: waiter
activities:
  - { name: W, type: Wait, typeProperties: { waitTimeInSeconds: 5 } }
"#;

    #[tokio::test]
    async fn test_publish_submits_compiled_document() {
        let transport = RecordingTransport::new(SubmissionStatus::Accepted);
        let target = SubmissionTarget::new("ws-1", "pl-1");
        let status = publish(&Engine::default(), &transport, &target, &parse_pipeline(VALID).unwrap())
            .await
            .unwrap();

        assert_eq!(status, SubmissionStatus::Accepted);
        let submitted = transport.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].0, target);
        assert!(submitted[0].1.contains("\"waitTimeInSeconds\":5"));
    }

    #[tokio::test]
    async fn test_publish_skips_transport_on_invalid_definition() {
        let transport = RecordingTransport::new(SubmissionStatus::Accepted);
        let yaml = r#"
name: broken
activities:
  - { name: A, type: Wait, dependsOn: [B], typeProperties: { waitTimeInSeconds: 1 } }
  - { name: B, type: Wait, dependsOn: [A], typeProperties: { waitTimeInSeconds: 1 } }
"#;
        let err = publish(
            &Engine::default(),
            &transport,
            &SubmissionTarget::new("ws", "pl"),
            &parse_pipeline(yaml).unwrap(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::CyclicDependency { .. }));
        assert_eq!(transport.count(), 0);
    }

    #[tokio::test]
    async fn test_rejection_is_returned_opaque() {
        let body = r#"{"errorCode":"InvalidRequest","message":"Invalid pipeline"}"#;
        let transport = RecordingTransport::new(SubmissionStatus::Rejected {
            status: 400,
            diagnostic: body.to_string(),
        });
        let status = publish(
            &Engine::default(),
            &transport,
            &SubmissionTarget::new("ws", "pl"),
            &parse_pipeline(VALID).unwrap(),
        )
        .await
        .unwrap();

        assert!(!status.is_accepted());
        assert_eq!(
            status,
            SubmissionStatus::Rejected {
                status: 400,
                diagnostic: body.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_directory_transport_writes_parts() {
        let dir = tempfile::tempdir().unwrap();
        let transport = DirectoryTransport::new(dir.path());
        let target = SubmissionTarget::new("ws-1", "nightly");

        let status = publish(&Engine::default(), &transport, &target, &parse_pipeline(VALID).unwrap())
            .await
            .unwrap();
        assert_eq!(status, SubmissionStatus::Accepted);

        let written = std::fs::read_to_string(dir.path().join("ws-1").join("nightly.json")).unwrap();
        let item: serde_json::Value = serde_json::from_str(&written).unwrap();
        assert_eq!(item["displayName"], "waiter");
        assert_eq!(item["definition"]["parts"][0]["path"], "pipeline-content.json");
        assert_eq!(item["definition"]["parts"][0]["payloadType"], "InlineBase64");
    }

    #[test]
    fn test_directory_transport_rejects_path_escape() {
        let transport = DirectoryTransport::new("/tmp/outbox");
        let target = SubmissionTarget::new("..", "p");
        assert!(matches!(transport.path_for(&target), Err(Error::InvalidName { .. })));
    }

    #[test]
    fn test_status_serialization() {
        let pending = SubmissionStatus::AcceptedPending {
            operation: "op-1".into(),
        };
        assert_eq!(
            serde_json::to_value(&pending).unwrap(),
            serde_json::json!({"outcome": "accepted_pending", "operation": "op-1"})
        );
        assert!(pending.is_accepted());

        let rejected = SubmissionStatus::Rejected {
            status: 400,
            diagnostic: "bad dataset".into(),
        };
        let json = serde_json::to_value(&rejected).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"outcome": "rejected", "status": 400, "diagnostic": "bad dataset"})
        );
        let back: SubmissionStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, rejected);
    }
}
