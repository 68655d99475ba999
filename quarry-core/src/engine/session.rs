//! Engine session provider: lazily creates the single shared engine session.

use super::{Engine, LocalEngine};
use crate::config::EngineSettings;
use std::sync::{Arc, OnceLock};
use tracing::info;

type EngineFactory = Box<dyn Fn(&EngineSettings) -> Arc<dyn Engine> + Send + Sync>;

/// Hands out one engine session, created on first use.
///
/// Creation is idempotent: concurrent first callers all receive the same session.
pub struct SessionProvider {
    settings: EngineSettings,
    factory: EngineFactory,
    session: OnceLock<Arc<dyn Engine>>,
}

impl SessionProvider {
    /// A provider whose session is a [`LocalEngine`].
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_factory(settings, |s| Arc::new(LocalEngine::new(s.clone())))
    }

    /// A provider that builds its session with a custom factory.
    pub fn with_factory(
        settings: EngineSettings,
        factory: impl Fn(&EngineSettings) -> Arc<dyn Engine> + Send + Sync + 'static,
    ) -> Self {
        Self {
            settings,
            factory: Box::new(factory),
            session: OnceLock::new(),
        }
    }

    /// A provider around an already created engine.
    pub fn with_engine(engine: Arc<dyn Engine>) -> Self {
        let provider = Self::new(EngineSettings::default());
        let _ = provider.session.set(engine);
        provider
    }

    /// The process-wide provider, using default settings.
    pub fn global() -> &'static SessionProvider {
        static GLOBAL: OnceLock<SessionProvider> = OnceLock::new();
        GLOBAL.get_or_init(|| SessionProvider::new(EngineSettings::default()))
    }

    /// The shared session, creating it on first call.
    pub fn session(&self) -> Arc<dyn Engine> {
        Arc::clone(self.session.get_or_init(|| {
            let engine = (self.factory)(&self.settings);
            info!(engine = engine.name(), "Created engine session");
            engine
        }))
    }

    pub fn is_initialized(&self) -> bool {
        self.session.get().is_some()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }
}

impl std::fmt::Debug for SessionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProvider")
            .field("settings", &self.settings)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
