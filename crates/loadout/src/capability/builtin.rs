//! A built-in capability that echoes its inputs, and the reference catalog
//! of development-tool modules wired to it.
//!
//! [`EchoCapability`] does no real work. It exists so the catalog, planner,
//! and engine can be driven end to end (from the CLI and from tests)
//! without any external tool behind them. Its failure and delay knobs are
//! what the integration tests use to exercise error paths.

use super::catalog::{Catalog, CatalogConfig};
use super::core::{
    Action, Capability, CapabilityFactory, CapabilityFuture, CapabilityMetadata, PriorityTier,
};
use crate::error::CapabilityError;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Where an [`EchoCapability`] should fail, if anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Fault {
    None,
    Initialize(String),
    Execute(String),
    Cleanup(String),
    /// Panic on every `execute` after the first `after` calls.
    Panic { after: usize },
}

/// Capability that reports what it was asked to do.
#[derive(Debug)]
pub struct EchoCapability {
    id: String,
    operations: Vec<String>,
    fault: Fault,
    delay: Option<Duration>,
    initializations: AtomicUsize,
    executions: AtomicUsize,
    cleanups: AtomicUsize,
}

impl EchoCapability {
    pub fn new<I, S>(id: impl Into<String>, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            operations: operations.into_iter().map(Into::into).collect(),
            fault: Fault::None,
            delay: None,
            initializations: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
        }
    }

    /// Echo instance supporting the operations listed in the metadata's
    /// keywords.
    pub fn from_metadata(metadata: &CapabilityMetadata) -> Self {
        Self::new(metadata.id.clone(), metadata.keywords.iter().cloned())
    }

    pub fn failing_initialize(message: impl Into<String>) -> Self {
        Self::new("echo", Vec::<String>::new()).with_fault(Fault::Initialize(message.into()))
    }

    pub fn failing_execute(message: impl Into<String>) -> Self {
        Self::new("echo", Vec::<String>::new()).with_fault(Fault::Execute(message.into()))
    }

    pub fn failing_cleanup(message: impl Into<String>) -> Self {
        Self::new("echo", Vec::<String>::new()).with_fault(Fault::Cleanup(message.into()))
    }

    /// Instance whose `execute` panics. Used to exercise fault recovery.
    pub fn panicking() -> Self {
        Self::panicking_after(0)
    }

    /// Instance that answers `successes` calls normally, then panics.
    pub fn panicking_after(successes: usize) -> Self {
        Self::new("echo", Vec::<String>::new()).with_fault(Fault::Panic { after: successes })
    }

    fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = fault;
        self
    }

    /// Sleep this long inside every `execute`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn initializations(&self) -> usize {
        self.initializations.load(Ordering::Relaxed)
    }

    /// Number of `execute` calls that have started.
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::Relaxed)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::Relaxed)
    }
}

impl Capability for EchoCapability {
    fn initialize(&self) -> CapabilityFuture<'_, ()> {
        Box::pin(async move {
            self.initializations.fetch_add(1, Ordering::Relaxed);
            match &self.fault {
                Fault::Initialize(msg) => Err(CapabilityError::new(msg.clone())),
                _ => Ok(()),
            }
        })
    }

    fn execute(&self, action: Action, params: Value) -> CapabilityFuture<'_, Value> {
        Box::pin(async move {
            let call = self.executions.fetch_add(1, Ordering::Relaxed);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.fault {
                Fault::Execute(msg) => return Err(CapabilityError::new(msg.clone())),
                Fault::Panic { after } if call >= *after => {
                    panic!("{} panicked during {action}", self.id)
                }
                _ => {}
            }

            let description = params
                .get("step_description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(json!({
                "capability": self.id,
                "action": action.as_str(),
                "content": format!("[{}] {action}: {description}", self.id),
                "params": params,
            }))
        })
    }

    fn cleanup(&self) -> CapabilityFuture<'_, ()> {
        Box::pin(async move {
            self.cleanups.fetch_add(1, Ordering::Relaxed);
            match &self.fault {
                Fault::Cleanup(msg) => Err(CapabilityError::new(msg.clone())),
                _ => Ok(()),
            }
        })
    }

    fn capabilities(&self) -> Vec<String> {
        self.operations.clone()
    }
}

/// Factory building an [`EchoCapability`] from the registered metadata.
pub fn echo_factory() -> CapabilityFactory {
    Arc::new(|metadata: &CapabilityMetadata| {
        Ok(Arc::new(EchoCapability::from_metadata(metadata)) as Arc<dyn Capability>)
    })
}

/// Metadata for the reference set of development-tool capabilities.
pub fn reference_metadata() -> Vec<CapabilityMetadata> {
    use PriorityTier::{P0, P1, P2};

    vec![
        CapabilityMetadata::new(
            "smart_intervention",
            "intervention system that detects capability gaps and routes tasks",
            P0,
        )
        .with_keywords(["capability_detection", "auto_switch", "task_routing"])
        .with_tags(["intervention", "automation", "intelligence", "ux"])
        .with_context_cost(1000)
        .with_scores(0.98, 0.95),
        CapabilityMetadata::new(
            "codeflow_mcp",
            "code generation, analysis, refactoring and test generation",
            P0,
        )
        .with_keywords([
            "generate_code",
            "generate_api",
            "analyze",
            "refactor",
            "generate_tests",
            "code_to_spec",
        ])
        .with_tags(["code", "generation", "analysis", "api", "backend"])
        .with_context_cost(2000)
        .with_scores(0.95, 0.92),
        CapabilityMetadata::new(
            "smartui_mcp",
            "ui generation and responsive design",
            P0,
        )
        .with_keywords(["generate_ui", "responsive_design", "theme_management"])
        .with_tags(["ui", "design", "responsive", "frontend"])
        .with_dependencies(["ag_ui_mcp"])
        .with_context_cost(1500)
        .with_scores(0.90, 0.88),
        CapabilityMetadata::new(
            "ag_ui_mcp",
            "ui component generation and test interface creation",
            P0,
        )
        .with_keywords(["generate_components", "create_test_ui", "dashboard_builder"])
        .with_tags(["ui", "components", "testing"])
        .with_context_cost(1500)
        .with_scores(0.88, 0.90),
        CapabilityMetadata::new("test_mcp", "automated test generation and execution", P0)
            .with_keywords(["generate_tests", "integration_testing", "coverage_analysis"])
            .with_tags(["testing", "test", "quality", "automation"])
            .with_dependencies(["codeflow_mcp"])
            .with_context_cost(1800)
            .with_scores(0.85, 0.87),
        CapabilityMetadata::new(
            "stagewise_mcp",
            "end-to-end testing and user flow testing",
            P1,
        )
        .with_keywords(["e2e_testing", "user_flow_testing", "scenario_testing"])
        .with_tags(["testing", "e2e", "workflow"])
        .with_dependencies(["ag_ui_mcp", "test_mcp"])
        .with_context_cost(2000)
        .with_scores(0.82, 0.85),
        CapabilityMetadata::new(
            "deepgraph_mcp",
            "dependency analysis and code structure visualization",
            P1,
        )
        .with_keywords([
            "dependency_analysis",
            "code_visualization",
            "architecture_mapping",
            "analyze",
        ])
        .with_tags(["analysis", "visualization", "architecture", "database"])
        .with_dependencies(["codeflow_mcp"])
        .with_context_cost(1200)
        .with_scores(0.80, 0.88),
        CapabilityMetadata::new(
            "security_mcp",
            "security scanning and vulnerability detection",
            P1,
        )
        .with_keywords(["security_scan", "vulnerability_detection", "compliance_check", "analyze"])
        .with_tags(["security", "scanning", "compliance"])
        .with_dependencies(["codeflow_mcp", "test_mcp"])
        .with_context_cost(1500)
        .with_scores(0.78, 0.90),
        CapabilityMetadata::new(
            "xmasters_mcp",
            "deep reasoning and complex problem solving",
            P2,
        )
        .with_keywords(["deep_reasoning", "complex_problem_solving", "algorithm_optimization"])
        .with_tags(["reasoning", "optimization", "complex"])
        .with_dependencies(["codeflow_mcp"])
        .with_context_cost(3000)
        .with_scores(0.70, 0.75),
        CapabilityMetadata::new(
            "operations_mcp",
            "operations, deployment and monitoring",
            P2,
        )
        .with_keywords(["monitoring", "alerting", "deploy"])
        .with_tags(["operations", "monitoring", "devops", "deployment"])
        .with_context_cost(1000)
        .with_scores(0.75, 0.82),
        CapabilityMetadata::new(
            "smarttool_mcp",
            "external tool integration and workflow execution",
            P1,
        )
        .with_keywords(["external_tools", "workflow_execution", "tool_recommendation"])
        .with_tags(["tools", "integration", "external", "automation"])
        .with_context_cost(1200)
        .with_scores(0.85, 0.88),
        CapabilityMetadata::new(
            "memoryrag_mcp",
            "memory management and retrieval augmented generation",
            P0,
        )
        .with_keywords(["memory_management", "rag", "learning_adapter"])
        .with_tags(["memory", "rag", "learning", "optimization"])
        .with_context_cost(2500)
        .with_scores(0.92, 0.90),
        CapabilityMetadata::new(
            "realtime_collector_mcp",
            "realtime session collection and training data generation",
            P0,
        )
        .with_keywords(["realtime_collection", "training_data_generation", "session_monitoring"])
        .with_tags(["collection", "training", "realtime", "data"])
        .with_dependencies(["memoryrag_mcp"])
        .with_context_cost(3000)
        .with_scores(0.94, 0.91),
    ]
}

/// Catalog populated with [`reference_metadata`], every entry backed by
/// [`EchoCapability`].
pub fn reference_catalog(config: CatalogConfig) -> Catalog {
    let catalog = Catalog::new(config);
    for metadata in reference_metadata() {
        catalog.register(metadata, echo_factory());
    }
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_catalog_is_acyclic_and_closed() {
        let catalog = reference_catalog(CatalogConfig::default());
        let ids = catalog.ids();
        assert_eq!(ids.len(), 13);
        for id in &ids {
            for dep in catalog.metadata(id).unwrap().dependencies {
                assert!(ids.contains(&dep), "{id} depends on unknown {dep}");
            }
        }
        assert!(catalog.topological_order(&ids).is_ok());
    }

    #[test]
    fn search_finds_ui_modules() {
        let catalog = reference_catalog(CatalogConfig::default());
        let hits = catalog.search("ui design", 3);
        assert_eq!(hits.first().map(String::as_str), Some("smartui_mcp"));
    }

    #[tokio::test]
    async fn echo_reports_action_and_description() {
        let echo = EchoCapability::new("codeflow_mcp", ["generate_code"]);
        assert!(echo.supports(Action::GenerateCode));
        assert!(!echo.supports(Action::Deploy));

        let out = echo
            .execute(Action::GenerateCode, json!({ "step_description": "write parser" }))
            .await
            .unwrap();
        assert_eq!(out["action"], "generate_code");
        assert_eq!(out["content"], "[codeflow_mcp] generate_code: write parser");
        assert_eq!(echo.executions(), 1);
    }

    #[tokio::test]
    async fn echo_faults_surface_as_errors() {
        let init = EchoCapability::failing_initialize("x");
        assert!(init.initialize().await.is_err());
        assert_eq!(init.initializations(), 1);
        let cleanup = EchoCapability::failing_cleanup("x");
        assert!(cleanup.cleanup().await.is_err());
        assert_eq!(cleanup.cleanups(), 1);
        let err = EchoCapability::failing_execute("bad input")
            .execute(Action::Execute, Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.message, "bad input");
    }
}
