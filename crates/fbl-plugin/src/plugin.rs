//! The plugin contract and compiled-in plugins.

use std::fmt;
use std::sync::Arc;

use fbl_engine::{
    ActionHandler, ENGINE_VERSION, Reporter, Requirements, TemplateUtility, builtin_handlers,
    builtin_reporters,
};

/// A bundle of handlers, reporters and template utilities.
pub trait Plugin: Send + Sync {
    /// Package name, used to satisfy `requires.plugins` entries.
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    fn requires(&self) -> &Requirements;

    fn action_handlers(&self) -> Vec<Arc<dyn ActionHandler>>;

    fn reporters(&self) -> Vec<Arc<dyn Reporter>> {
        Vec::new()
    }

    fn template_utilities(&self) -> Vec<Arc<dyn TemplateUtility>> {
        Vec::new()
    }
}

/// A plugin assembled in code.
///
/// ```rust,ignore
/// let plugin = StaticPlugin::new("fbl-plugin-k8s", "1.2.0")
///     .with_requirements(Requirements { fbl: Some("^1.0.0".into()), ..Default::default() })
///     .with_handler(ApplyHandler::new());
/// ```
#[derive(Clone)]
pub struct StaticPlugin {
    name: String,
    version: String,
    description: Option<String>,
    requires: Requirements,
    handlers: Vec<Arc<dyn ActionHandler>>,
    reporters: Vec<Arc<dyn Reporter>>,
    utilities: Vec<Arc<dyn TemplateUtility>>,
}

impl StaticPlugin {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            requires: Requirements::default(),
            handlers: Vec::new(),
            reporters: Vec::new(),
            utilities: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_requirements(mut self, requires: Requirements) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_handler(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn with_handlers(mut self, handlers: impl IntoIterator<Item = Arc<dyn ActionHandler>>) -> Self {
        self.handlers.extend(handlers);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn with_reporters(mut self, reporters: impl IntoIterator<Item = Arc<dyn Reporter>>) -> Self {
        self.reporters.extend(reporters);
        self
    }

    pub fn with_utility(mut self, utility: Arc<dyn TemplateUtility>) -> Self {
        self.utilities.push(utility);
        self
    }
}

impl fmt::Debug for StaticPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPlugin")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("requires", &self.requires)
            .field(
                "handlers",
                &self
                    .handlers
                    .iter()
                    .map(|h| h.metadata().id.as_str())
                    .collect::<Vec<_>>(),
            )
            .field(
                "reporters",
                &self.reporters.iter().map(|r| r.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Plugin for StaticPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn requires(&self) -> &Requirements {
        &self.requires
    }

    fn action_handlers(&self) -> Vec<Arc<dyn ActionHandler>> {
        self.handlers.clone()
    }

    fn reporters(&self) -> Vec<Arc<dyn Reporter>> {
        self.reporters.clone()
    }

    fn template_utilities(&self) -> Vec<Arc<dyn TemplateUtility>> {
        self.utilities.clone()
    }
}

/// Name of the plugin returned by [`core_plugin`].
pub const CORE_PLUGIN_NAME: &str = "fbl-core";

/// The built-in handlers and reporters, versioned with the engine.
pub fn core_plugin() -> StaticPlugin {
    StaticPlugin::new(CORE_PLUGIN_NAME, ENGINE_VERSION)
        .with_description("Built-in flow, context, entity, exec and file handlers")
        .with_handlers(builtin_handlers())
        .with_reporters(builtin_reporters())
}
