mod sandbox;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use aegis_common::{GatewayError, Result};

pub use sandbox::{SandboxError, SandboxRequest, SandboxRunner, SandboxVerdict};

use super::{EvaluationContext, Evaluator, EvaluatorVerdict, ScoreDimension};

/// Resource limits a plugin declares for its sandbox.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxLimits {
    pub memory_mb: u64,
    pub timeout_seconds: u64,
    #[serde(default)]
    pub network_access: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

/// One evaluator exposed by a plugin.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginEvaluatorSpec {
    pub id: String,
    pub priority: u8,
    pub timeout_seconds: u64,
    /// DSL condition controlling when this evaluator runs; absent = always.
    #[serde(default)]
    pub trigger: Option<String>,
}

/// A third-party plugin: the manifest plus the entry command the sandbox
/// executes per evaluation.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    pub version: String,
    /// Path of the sandboxed executable, relative to the manifest.
    pub entry: String,
    pub evaluators: Vec<PluginEvaluatorSpec>,
    pub sandbox: SandboxLimits,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl PluginManifest {
    /// Validation on load: at least one evaluator, priority in [1,10],
    /// per-evaluator timeout in [1s, 30s].
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() || self.version.trim().is_empty() {
            return Err(GatewayError::BadRequest(
                "plugin manifest requires id and version".into(),
            ));
        }
        if self.entry.trim().is_empty() {
            return Err(GatewayError::BadRequest(format!(
                "plugin '{}' declares no entry command",
                self.id
            )));
        }
        if self.evaluators.is_empty() {
            return Err(GatewayError::BadRequest(format!(
                "plugin '{}' declares no evaluators",
                self.id
            )));
        }
        for evaluator in &self.evaluators {
            if !(1..=10).contains(&evaluator.priority) {
                return Err(GatewayError::BadRequest(format!(
                    "plugin '{}' evaluator '{}': priority must be within [1, 10]",
                    self.id, evaluator.id
                )));
            }
            if !(1..=30).contains(&evaluator.timeout_seconds) {
                return Err(GatewayError::BadRequest(format!(
                    "plugin '{}' evaluator '{}': timeout must be within [1s, 30s]",
                    self.id, evaluator.id
                )));
            }
        }
        Ok(())
    }
}

/// A plugin evaluator wired into the mesh through the sandbox.
pub struct PluginEvaluator {
    plugin_id: String,
    spec: PluginEvaluatorSpec,
    runner: Arc<SandboxRunner>,
}

impl Evaluator for PluginEvaluator {
    fn id(&self) -> &str {
        &self.spec.id
    }

    fn dimension(&self) -> ScoreDimension {
        ScoreDimension::Auxiliary
    }

    fn priority(&self) -> u8 {
        self.spec.priority
    }

    fn trigger(&self) -> Option<&str> {
        self.spec.trigger.as_deref()
    }

    fn evaluate(
        &self,
        ctx: Arc<EvaluationContext>,
    ) -> Pin<Box<dyn Future<Output = Result<EvaluatorVerdict>> + Send>> {
        let runner = Arc::clone(&self.runner);
        let evaluator_id = self.spec.id.clone();
        let plugin_id = self.plugin_id.clone();
        let timeout = Duration::from_secs(self.spec.timeout_seconds);

        Box::pin(async move {
            let verdict = runner
                .run(
                    &SandboxRequest {
                        evaluator: &evaluator_id,
                        org_id: &ctx.org_id,
                        prompt: &ctx.prompt,
                        response: &ctx.response,
                    },
                    timeout,
                )
                .await
                .map_err(|e| {
                    tracing::warn!(
                        plugin = plugin_id.as_str(),
                        evaluator = evaluator_id.as_str(),
                        error = %e,
                        "Plugin evaluation failed"
                    );
                    GatewayError::Evaluation(e.to_string())
                })?;

            Ok(EvaluatorVerdict {
                score: verdict.score,
                violations: verdict.violations,
            })
        })
    }
}

/// Load every valid plugin under `dir`. Each plugin is a subdirectory with
/// a `manifest.json`; invalid manifests are skipped with a warning.
pub fn load_plugins(dir: &Path) -> Vec<Arc<dyn Evaluator>> {
    let mut evaluators: Vec<Arc<dyn Evaluator>> = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Plugin directory unreadable");
            return evaluators;
        }
    };

    for entry in entries.flatten() {
        let plugin_dir = entry.path();
        if !plugin_dir.is_dir() {
            continue;
        }
        let manifest_path = plugin_dir.join("manifest.json");
        if !manifest_path.exists() {
            continue;
        }

        match load_manifest(&manifest_path) {
            Ok(manifest) => {
                let command = plugin_dir.join(&manifest.entry);
                let runner = Arc::new(SandboxRunner::new(command, manifest.sandbox.clone()));

                tracing::info!(
                    plugin = manifest.id.as_str(),
                    version = manifest.version.as_str(),
                    evaluators = manifest.evaluators.len(),
                    "Plugin loaded"
                );

                for spec in manifest.evaluators {
                    evaluators.push(Arc::new(PluginEvaluator {
                        plugin_id: manifest.id.clone(),
                        spec,
                        runner: Arc::clone(&runner),
                    }));
                }
            }
            Err(e) => {
                tracing::warn!(
                    manifest = %manifest_path.display(),
                    error = %e,
                    "Rejected invalid plugin manifest"
                );
            }
        }
    }

    evaluators
}

fn load_manifest(path: &PathBuf) -> Result<PluginManifest> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("read {}: {}", path.display(), e)))?;
    let manifest: PluginManifest = serde_json::from_str(&raw)?;
    manifest.validate()?;
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> PluginManifest {
        PluginManifest {
            id: "acme-screener".into(),
            version: "1.0.0".into(),
            entry: "run.sh".into(),
            evaluators: vec![PluginEvaluatorSpec {
                id: "pii-screener".into(),
                priority: 7,
                timeout_seconds: 5,
                trigger: None,
            }],
            sandbox: SandboxLimits {
                memory_mb: 128,
                timeout_seconds: 10,
                network_access: false,
                allowed_domains: Vec::new(),
            },
            permissions: Vec::new(),
        }
    }

    #[test]
    fn test_valid_manifest_passes() {
        assert!(manifest().validate().is_ok());
    }

    #[test]
    fn test_manifest_requires_evaluators() {
        let mut m = manifest();
        m.evaluators.clear();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_priority_bounds() {
        let mut m = manifest();
        m.evaluators[0].priority = 0;
        assert!(m.validate().is_err());
        m.evaluators[0].priority = 11;
        assert!(m.validate().is_err());
        m.evaluators[0].priority = 10;
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_timeout_bounds() {
        let mut m = manifest();
        m.evaluators[0].timeout_seconds = 0;
        assert!(m.validate().is_err());
        m.evaluators[0].timeout_seconds = 31;
        assert!(m.validate().is_err());
        m.evaluators[0].timeout_seconds = 30;
        assert!(m.validate().is_ok());
    }

    #[test]
    fn test_manifest_json_shape() {
        let raw = r#"{
            "id": "vendor-plugin",
            "version": "2.1.0",
            "entry": "evaluate.sh",
            "evaluators": [
                {"id": "screener", "priority": 3, "timeoutSeconds": 10, "trigger": "business hours"}
            ],
            "sandbox": {"memoryMb": 256, "timeoutSeconds": 20, "networkAccess": true, "allowedDomains": ["api.vendor.example"]},
            "permissions": ["read_response"]
        }"#;
        let parsed: PluginManifest = serde_json::from_str(raw).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.evaluators[0].trigger.as_deref(), Some("business hours"));
        assert!(parsed.sandbox.network_access);
    }
}
