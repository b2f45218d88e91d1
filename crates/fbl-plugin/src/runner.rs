//! Plugin table, requirement resolution and the flow entry point.
//!
//! Requirements (engine range, plugin ranges, applications on `PATH`) are
//! checked for every registered plugin and for the flow document before any
//! step runs. In strict mode all failures are aggregated into one
//! [`PluginError::Requirements`]; in unsafe mode they are logged as warnings
//! and returned.
//!
//! Plugins pulled in by a requirement are registered only after their own
//! requirements passed. Once a sibling requirement has failed in strict mode,
//! later siblings are validated as a dry run so a rejected run never leaves a
//! half-registered plugin set behind.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use fbl_engine::{
    ActionSnapshot, Context, DelegatedParameters, ENGINE_VERSION, FlowDocument, FlowService,
    HandlerRegistry, Reporter, Requirements, TemplateEngine, TemplateUtility,
};
use semver::Version;

use crate::locator::PluginLocator;
use crate::plugin::Plugin;
use crate::requirement::{RequirementErrors, RequirementFailure, find_on_path};
use crate::version::{VersionRange, parse_version};
use crate::{PluginError, Result};

/// Owns the plugins of a run and executes flows with them.
pub struct FlowRunner {
    plugins: Vec<Arc<dyn Plugin>>,
    registry: HandlerRegistry,
    reporters: HashMap<String, Arc<dyn Reporter>>,
    utilities: Vec<Arc<dyn TemplateUtility>>,
    engine_version: Version,
    locator: PluginLocator,
    allow_unsafe_plugins: bool,
    allow_unsafe_flows: bool,
}

impl FlowRunner {
    pub fn new(locator: PluginLocator) -> Self {
        Self {
            plugins: Vec::new(),
            registry: HandlerRegistry::new(),
            reporters: HashMap::new(),
            utilities: Vec::new(),
            engine_version: parse_version(ENGINE_VERSION).unwrap_or(Version::new(0, 0, 0)),
            locator,
            allow_unsafe_plugins: false,
            allow_unsafe_flows: false,
        }
    }

    /// Check requirements against a different engine version.
    pub fn with_engine_version(mut self, version: Version) -> Self {
        self.engine_version = version;
        self
    }

    /// Downgrade plugin requirement failures to warnings.
    pub fn allow_unsafe_plugins(mut self, allow: bool) -> Self {
        self.allow_unsafe_plugins = allow;
        self
    }

    /// Downgrade flow requirement failures to warnings.
    pub fn allow_unsafe_flows(mut self, allow: bool) -> Self {
        self.allow_unsafe_flows = allow;
        self
    }

    pub fn engine_version(&self) -> &Version {
        &self.engine_version
    }

    pub fn locator(&self) -> &PluginLocator {
        &self.locator
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name() == name)
    }

    pub fn reporter(&self, name: &str) -> Option<Arc<dyn Reporter>> {
        self.reporters.get(name).cloned()
    }

    pub fn reporter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.reporters.keys().cloned().collect();
        names.sort();
        names
    }

    /// Add a plugin's handlers, reporters and utilities without validating it.
    ///
    /// Registering a plugin with a name that is already present replaces it.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.retain(|p| p.name() != plugin.name());

        for handler in plugin.action_handlers() {
            self.registry.register_arc(handler);
        }
        for reporter in plugin.reporters() {
            self.reporters.insert(reporter.name().to_string(), reporter);
        }
        self.utilities.extend(plugin.template_utilities());

        tracing::info!(
            plugin = plugin.name(),
            version = plugin.version(),
            "registered plugin"
        );
        self.plugins.push(plugin);
    }

    /// Validate one plugin's requirements, loading missing dependencies.
    pub fn validate_plugin(
        &mut self,
        plugin: &Arc<dyn Plugin>,
        wd: &Path,
    ) -> Result<Vec<RequirementFailure>> {
        let unsafe_mode = self.allow_unsafe_plugins;
        let failures = self.plugin_failures(plugin, wd, false, unsafe_mode);
        conclude(failures, unsafe_mode)
    }

    /// Validate every registered plugin and report all failures at once.
    pub fn validate_plugins(&mut self, wd: &Path) -> Result<Vec<RequirementFailure>> {
        let unsafe_mode = self.allow_unsafe_plugins;
        let mut failures = Vec::new();
        for plugin in self.plugins.clone() {
            let dry_run = !unsafe_mode && !failures.is_empty();
            failures.extend(self.plugin_failures(&plugin, wd, dry_run, unsafe_mode));
        }
        conclude(failures, unsafe_mode)
    }

    /// Validate a flow document's `requires` block.
    pub fn validate_flow_requirements(
        &mut self,
        document: &FlowDocument,
        wd: &Path,
    ) -> Result<Vec<RequirementFailure>> {
        let unsafe_mode = self.allow_unsafe_flows;
        let failures =
            self.collect_failures("flow", &document.requires, wd, false, unsafe_mode, &mut Vec::new());
        conclude(failures, unsafe_mode)
    }

    /// Check one `requires.plugins` entry.
    ///
    /// A plugin that is neither registered nor on the validation `stack` is
    /// located, version-checked and validated recursively. It is registered
    /// only when `dry_run` is false and its requirements passed (or
    /// `unsafe_mode` is set). A plugin already on the stack is part of a
    /// dependency cycle and counts as located.
    #[allow(clippy::too_many_arguments)]
    pub fn validate_required_plugin(
        &mut self,
        subject: &str,
        name: &str,
        range: &str,
        wd: &Path,
        dry_run: bool,
        unsafe_mode: bool,
        stack: &mut Vec<Arc<dyn Plugin>>,
    ) -> Vec<RequirementFailure> {
        let range = match VersionRange::parse(range) {
            Ok(range) => range,
            Err(e) => {
                return vec![RequirementFailure::InvalidRange {
                    subject: subject.to_string(),
                    range: range.to_string(),
                    reason: e.to_string(),
                }];
            }
        };

        let in_progress = stack.iter().find(|p| p.name() == name).cloned();
        let (plugin, known) = match in_progress.or_else(|| self.plugin(name)) {
            Some(plugin) => (plugin, true),
            None => match self.locator.locate(name, wd) {
                Ok(plugin) => (plugin, false),
                Err(e) => {
                    return vec![RequirementFailure::PluginUnavailable {
                        subject: subject.to_string(),
                        plugin: name.to_string(),
                        reason: e.to_string(),
                    }];
                }
            },
        };

        let mut failures = Vec::new();
        match parse_version(plugin.version()) {
            Ok(version) if range.matches(&version) => {}
            Ok(_) => failures.push(RequirementFailure::PluginVersionMismatch {
                subject: subject.to_string(),
                plugin: name.to_string(),
                range: range.to_string(),
                actual: plugin.version().to_string(),
            }),
            Err(e) => failures.push(RequirementFailure::PluginUnavailable {
                subject: subject.to_string(),
                plugin: name.to_string(),
                reason: format!("invalid version '{}': {e}", plugin.version()),
            }),
        }

        if known {
            return failures;
        }

        stack.push(Arc::clone(&plugin));
        let nested_dry_run = dry_run || (!unsafe_mode && !failures.is_empty());
        let nested = self.collect_failures(
            &describe(plugin.as_ref()),
            plugin.requires(),
            wd,
            nested_dry_run,
            unsafe_mode,
            stack,
        );
        stack.pop();
        failures.extend(nested);

        if dry_run {
            tracing::debug!(plugin = name, "dry run, plugin not registered");
        } else if failures.is_empty() || unsafe_mode {
            self.register_plugin(plugin);
        }
        failures
    }

    /// Validate requirements, then execute the document's pipeline.
    pub async fn run(
        &mut self,
        wd: &Path,
        document: &FlowDocument,
        context: Context,
    ) -> Result<ActionSnapshot> {
        self.validate_plugins(wd)?;
        self.validate_flow_requirements(document, wd)?;

        let service = self.service();
        let context = context.into_shared();
        let parameters = DelegatedParameters::new();
        Ok(service
            .execute_flow(wd, document, &context, &parameters)
            .await?)
    }

    /// Render raw flow text with the global pass, then behave like [`run`](Self::run).
    pub async fn run_text(
        &mut self,
        wd: &Path,
        text: &str,
        context: Context,
    ) -> Result<ActionSnapshot> {
        self.validate_plugins(wd)?;

        let context = context.into_shared();
        let parameters = DelegatedParameters::new();
        let document = self
            .service()
            .render_document(wd, text, &context, &parameters)?;
        self.validate_flow_requirements(&document, wd)?;

        let service = self.service();
        Ok(service
            .execute_flow(wd, &document, &context, &parameters)
            .await?)
    }

    /// Engine context for one run, built from the current plugin table.
    pub fn service(&self) -> FlowService {
        let mut templates = TemplateEngine::new();
        for utility in &self.utilities {
            templates.register_utility(utility.as_ref());
        }
        FlowService::new(self.registry.clone(), templates)
    }

    fn plugin_failures(
        &mut self,
        plugin: &Arc<dyn Plugin>,
        wd: &Path,
        dry_run: bool,
        unsafe_mode: bool,
    ) -> Vec<RequirementFailure> {
        let mut stack = vec![Arc::clone(plugin)];
        self.collect_failures(
            &describe(plugin.as_ref()),
            plugin.requires(),
            wd,
            dry_run,
            unsafe_mode,
            &mut stack,
        )
    }

    fn collect_failures(
        &mut self,
        subject: &str,
        requires: &Requirements,
        wd: &Path,
        dry_run: bool,
        unsafe_mode: bool,
        stack: &mut Vec<Arc<dyn Plugin>>,
    ) -> Vec<RequirementFailure> {
        let mut failures = Vec::new();

        if let Some(range) = &requires.fbl {
            match VersionRange::parse(range) {
                Ok(parsed) if parsed.matches(&self.engine_version) => {}
                Ok(parsed) => failures.push(RequirementFailure::EngineIncompatible {
                    subject: subject.to_string(),
                    range: parsed.to_string(),
                    actual: self.engine_version.to_string(),
                }),
                Err(e) => failures.push(RequirementFailure::InvalidRange {
                    subject: subject.to_string(),
                    range: range.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        for (name, range) in &requires.plugins {
            let sibling_dry_run = dry_run || (!unsafe_mode && !failures.is_empty());
            let found = self.validate_required_plugin(
                subject,
                name,
                range,
                wd,
                sibling_dry_run,
                unsafe_mode,
                stack,
            );
            failures.extend(found);
        }

        for application in &requires.applications {
            if find_on_path(application).is_none() {
                failures.push(RequirementFailure::ApplicationMissing {
                    subject: subject.to_string(),
                    application: application.clone(),
                });
            }
        }

        failures
    }
}

impl fmt::Debug for FlowRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowRunner")
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("registry", &self.registry)
            .field("reporters", &self.reporter_names())
            .field("engine_version", &self.engine_version.to_string())
            .field("locator", &self.locator)
            .field("allow_unsafe_plugins", &self.allow_unsafe_plugins)
            .field("allow_unsafe_flows", &self.allow_unsafe_flows)
            .finish()
    }
}

fn describe(plugin: &dyn Plugin) -> String {
    format!("plugin '{}' {}", plugin.name(), plugin.version())
}

fn conclude(
    failures: Vec<RequirementFailure>,
    unsafe_mode: bool,
) -> Result<Vec<RequirementFailure>> {
    if failures.is_empty() {
        return Ok(failures);
    }
    if unsafe_mode {
        for failure in &failures {
            tracing::warn!(failure = %failure, "requirement not satisfied, continuing in unsafe mode");
        }
        return Ok(failures);
    }
    Err(PluginError::Requirements(RequirementErrors::new(failures)))
}
