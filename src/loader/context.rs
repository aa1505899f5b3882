//! Shared services of a loader instance.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::LoaderSettings;
use crate::handler::{DefaultRequestHandler, RequestHandler};
use crate::loader::LoadError;
use crate::net::cookies::{AllowAllCookies, CookiePolicy, CookieStore, InMemoryCookieStore};
use crate::net::http_stack::HttpNetworkStack;
use crate::net::job_factory::JobFactory;
use crate::net::transaction::NetworkStack;
use crate::runtime::IoThread;
use crate::scheme::SchemeRegistry;

/// What every request proxy needs. Shared with the IO thread.
pub(crate) struct LoaderServices {
    pub(crate) settings: LoaderSettings,
    pub(crate) job_factory: Arc<JobFactory>,
    pub(crate) request_handler: Arc<dyn RequestHandler>,
}

/// A loader instance: the IO thread, the job factory, the scheme registry
/// and the host hooks. Bridges hold it by `Arc`.
pub struct LoaderContext {
    io: IoThread,
    services: Arc<LoaderServices>,
    registry: Arc<SchemeRegistry>,
    cookie_store: Option<Arc<dyn CookieStore>>,
}

impl LoaderContext {
    /// Starts building a context.
    pub fn builder(settings: LoaderSettings) -> LoaderContextBuilder {
        LoaderContextBuilder::new(settings)
    }

    pub fn settings(&self) -> &LoaderSettings {
        &self.services.settings
    }

    pub fn io_thread(&self) -> &IoThread {
        &self.io
    }

    pub fn job_factory(&self) -> &Arc<JobFactory> {
        &self.services.job_factory
    }

    pub fn scheme_registry(&self) -> &Arc<SchemeRegistry> {
        &self.registry
    }

    /// The cookie store, unless cookies are disabled.
    pub fn cookie_store(&self) -> Option<&Arc<dyn CookieStore>> {
        self.cookie_store.as_ref()
    }

    pub(crate) fn services(&self) -> Arc<LoaderServices> {
        self.services.clone()
    }
}

impl std::fmt::Debug for LoaderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderContext")
            .field("io", &self.io)
            .field("settings", &self.services.settings)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Builder for [`LoaderContext`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use ki_resource_loader::config::LoaderSettings;
/// use ki_resource_loader::loader::LoaderContext;
/// use ki_resource_loader::net::MockNetworkStack;
///
/// let context = LoaderContext::builder(LoaderSettings::default())
///     .network_stack(Arc::new(MockNetworkStack::new()))
///     .build()
///     .unwrap();
/// ```
pub struct LoaderContextBuilder {
    settings: LoaderSettings,
    network: Option<Arc<dyn NetworkStack>>,
    request_handler: Option<Arc<dyn RequestHandler>>,
    cookie_store: Option<Arc<dyn CookieStore>>,
    cookie_policy: Option<Arc<dyn CookiePolicy>>,
    thread_name: String,
}

impl LoaderContextBuilder {
    fn new(settings: LoaderSettings) -> Self {
        Self {
            settings,
            network: None,
            request_handler: None,
            cookie_store: None,
            cookie_policy: None,
            thread_name: "ki-io".to_string(),
        }
    }

    /// Uses `network` for URLs without a scheme handler. Defaults to an
    /// [`HttpNetworkStack`].
    pub fn network_stack(mut self, network: Arc<dyn NetworkStack>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn request_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.request_handler = Some(handler);
        self
    }

    /// Defaults to an [`InMemoryCookieStore`].
    pub fn cookie_store(mut self, store: Arc<dyn CookieStore>) -> Self {
        self.cookie_store = Some(store);
        self
    }

    /// Defaults to [`AllowAllCookies`].
    pub fn cookie_policy(mut self, policy: Arc<dyn CookiePolicy>) -> Self {
        self.cookie_policy = Some(policy);
        self
    }

    pub fn io_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validates the settings, starts the IO thread and wires the services.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid settings, if the HTTP stack cannot be
    /// created or if the IO thread cannot be started.
    pub fn build(self) -> Result<LoaderContext, LoadError> {
        self.settings.validate()?;

        let cookie_store: Option<Arc<dyn CookieStore>> = if self.settings.cookies_enabled {
            Some(
                self.cookie_store
                    .unwrap_or_else(|| Arc::new(InMemoryCookieStore::new())),
            )
        } else {
            debug!("Cookies disabled");
            None
        };
        let cookie_policy = self
            .cookie_policy
            .unwrap_or_else(|| Arc::new(AllowAllCookies));

        let network: Arc<dyn NetworkStack> = match self.network {
            Some(network) => network,
            None => {
                let store = cookie_store
                    .clone()
                    .unwrap_or_else(|| Arc::new(NoCookies));
                Arc::new(HttpNetworkStack::new(
                    self.settings.user_agent.clone(),
                    self.settings.proxy.as_ref(),
                    store,
                    cookie_policy.clone(),
                )?)
            }
        };

        let job_factory = Arc::new(JobFactory::new(network));
        let registry = SchemeRegistry::new(
            job_factory.clone(),
            cookie_store.clone(),
            cookie_policy,
        );
        let io = IoThread::start(&self.thread_name)?;

        info!(
            "Loader context ready (read buffer: {} bytes, max redirects: {})",
            self.settings.read_buffer_size, self.settings.max_redirects
        );

        Ok(LoaderContext {
            io,
            services: Arc::new(LoaderServices {
                settings: self.settings,
                job_factory,
                request_handler: self
                    .request_handler
                    .unwrap_or_else(|| Arc::new(DefaultRequestHandler)),
            }),
            registry,
            cookie_store,
        })
    }
}

/// Store used by the HTTP stack when cookies are disabled.
struct NoCookies;

#[async_trait::async_trait]
impl CookieStore for NoCookies {
    async fn get_cookie_line(&self, _url: &url::Url) -> String {
        String::new()
    }

    async fn set_cookie(&self, _url: &url::Url, _cookie_line: &str) -> bool {
        false
    }
}
