//! (scheme, domain) → handler factory registry.
//!
//! The registry is created once per loader context and shared by `Arc`. All
//! of its state sits behind one lock. For every scheme with at least one
//! factory it installs a [`ProtocolHandler`] into the [`JobFactory`], which
//! turns matching requests into [`SchemeJob`]s.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::handler::scheme::SchemeHandlerFactory;
use crate::net::cookies::{CookiePolicy, CookieStore};
use crate::net::job_factory::{JobFactory, ProtocolHandler};
use crate::net::request::BrowserInfo;
use crate::net::transaction::{NetEventSender, NetworkRequest, NetworkTransaction};
use crate::scheme::internal::{InternalSchemeHandlerFactory, INTERNAL_SCHEME};
use crate::scheme::job::SchemeJob;

/// Schemes known to the loader itself. They count as registered and can
/// never be registered again. The flag marks standard (host-based) schemes.
const BUILT_IN_SCHEMES: &[(&str, bool)] = &[
    ("http", true),
    ("https", true),
    ("ws", true),
    ("wss", true),
    ("ftp", true),
    ("file", true),
    (INTERNAL_SCHEME, true),
    ("about", false),
    ("blob", false),
    ("data", false),
    ("javascript", false),
];

/// Errors from scheme registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemeError {
    #[error("invalid scheme name: '{0}'")]
    InvalidName(String),

    #[error("scheme '{0}' is built in")]
    BuiltIn(String),

    #[error("scheme '{0}' is already registered")]
    AlreadyRegistered(String),
}

/// Attributes declared for a custom scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchemeInfo {
    /// Hierarchical `scheme://host/path` URLs; factories can be per domain.
    pub is_standard: bool,
    /// Treated like `file:` for security checks.
    pub is_local: bool,
    /// Content can only be displayed by pages of the same scheme.
    pub is_display_isolated: bool,
}

type FactoryKey = (String, String);

#[derive(Default)]
struct RegistryState {
    schemes: HashMap<String, SchemeInfo>,
    factories: HashMap<FactoryKey, Arc<dyn SchemeHandlerFactory>>,
}

/// Scheme and handler factory registry.
pub struct SchemeRegistry {
    state: Mutex<RegistryState>,
    job_factory: Arc<JobFactory>,
    cookie_store: Option<Arc<dyn CookieStore>>,
    cookie_policy: Arc<dyn CookiePolicy>,
    self_ref: Weak<SchemeRegistry>,
}

impl SchemeRegistry {
    /// Creates the registry and installs the internal factories.
    ///
    /// Scheme jobs read and write cookies through `cookie_store`; `None`
    /// disables cookies for custom schemes.
    pub fn new(
        job_factory: Arc<JobFactory>,
        cookie_store: Option<Arc<dyn CookieStore>>,
        cookie_policy: Arc<dyn CookiePolicy>,
    ) -> Arc<Self> {
        let registry = Arc::new_cyclic(|self_ref| Self {
            state: Mutex::new(RegistryState::default()),
            job_factory,
            cookie_store,
            cookie_policy,
            self_ref: self_ref.clone(),
        });
        registry.register_internal_factories();
        registry
    }

    /// Declares a custom scheme. Each name can be declared once.
    ///
    /// # Errors
    ///
    /// Fails without side effects for invalid names, built-in schemes and
    /// schemes that were already declared.
    pub fn register_scheme(
        &self,
        name: &str,
        is_standard: bool,
        is_local: bool,
        is_display_isolated: bool,
    ) -> Result<(), SchemeError> {
        let scheme = normalize_scheme(name)?;
        if is_built_in(&scheme) {
            warn!("Refusing to register built-in scheme '{}'", scheme);
            return Err(SchemeError::BuiltIn(scheme));
        }

        let mut state = self.state.lock();
        if state.schemes.contains_key(&scheme) {
            warn!("Scheme '{}' is already registered", scheme);
            return Err(SchemeError::AlreadyRegistered(scheme));
        }

        state.schemes.insert(
            scheme.clone(),
            SchemeInfo {
                is_standard,
                is_local,
                is_display_isolated,
            },
        );
        info!(
            "Registered scheme '{}' (standard: {}, local: {}, display isolated: {})",
            scheme, is_standard, is_local, is_display_isolated
        );
        Ok(())
    }

    /// Returns true for built-in and declared schemes.
    pub fn has_registered_scheme(&self, name: &str) -> bool {
        let scheme = name.to_ascii_lowercase();
        is_built_in(&scheme) || self.state.lock().schemes.contains_key(&scheme)
    }

    /// Returns the attributes of a scheme.
    pub fn scheme_info(&self, name: &str) -> Option<SchemeInfo> {
        let scheme = name.to_ascii_lowercase();
        if let Some(standard) = built_in_standard(&scheme) {
            return Some(SchemeInfo {
                is_standard: standard,
                is_local: scheme == "file",
                is_display_isolated: false,
            });
        }
        self.state.lock().schemes.get(&scheme).copied()
    }

    /// Returns the declared custom schemes, sorted.
    pub fn registered_schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.state.lock().schemes.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    /// Registers `factory` for (`scheme`, `domain`). The domain is ignored
    /// for non-standard schemes; an empty domain matches every host. `None`
    /// removes the registration.
    ///
    /// # Errors
    ///
    /// Fails if `scheme` is not a valid scheme name.
    pub fn add_factory(
        &self,
        scheme: &str,
        domain: &str,
        factory: Option<Arc<dyn SchemeHandlerFactory>>,
    ) -> Result<(), SchemeError> {
        let scheme = normalize_scheme(scheme)?;

        let Some(factory) = factory else {
            self.remove_factory(&scheme, domain);
            return Ok(());
        };

        let key = self.factory_key(&scheme, domain);
        let replaced = self.state.lock().factories.insert(key.clone(), factory).is_some();
        debug!(
            "{} factory for ({}, '{}')",
            if replaced { "Replaced" } else { "Added" },
            key.0,
            key.1
        );

        self.install_protocol_handler(&scheme);
        Ok(())
    }

    /// Removes the factory for (`scheme`, `domain`). Returns true if one
    /// was registered.
    pub fn remove_factory(&self, scheme: &str, domain: &str) -> bool {
        let scheme = scheme.to_ascii_lowercase();
        let key = self.factory_key(&scheme, domain);

        let (removed, scheme_in_use) = {
            let mut state = self.state.lock();
            let removed = state.factories.remove(&key).is_some();
            let in_use = state.factories.keys().any(|(s, _)| *s == scheme);
            (removed, in_use)
        };

        if removed {
            debug!("Removed factory for ({}, '{}')", key.0, key.1);
        }
        if !scheme_in_use {
            self.job_factory.set_protocol_handler(&scheme, None);
        }
        removed
    }

    /// Removes every factory, then re-installs the internal ones.
    pub fn clear_factories(&self) {
        let schemes: Vec<String> = {
            let mut state = self.state.lock();
            let mut schemes: Vec<String> =
                state.factories.keys().map(|(scheme, _)| scheme.clone()).collect();
            state.factories.clear();
            schemes.sort();
            schemes.dedup();
            schemes
        };

        for scheme in &schemes {
            self.job_factory.set_protocol_handler(scheme, None);
        }
        debug!("Cleared factories for {} schemes", schemes.len());

        self.register_internal_factories();
    }

    /// Finds the factory for a request to `scheme://host`: the exact
    /// (scheme, host) registration first, then (scheme, "").
    pub fn factory_for(&self, scheme: &str, host: Option<&str>) -> Option<Arc<dyn SchemeHandlerFactory>> {
        let scheme = scheme.to_ascii_lowercase();
        let state = self.state.lock();

        if let Some(host) = host.filter(|h| !h.is_empty()) {
            let exact = (scheme.clone(), host.to_ascii_lowercase());
            if let Some(factory) = state.factories.get(&exact) {
                return Some(factory.clone());
            }
        }
        state.factories.get(&(scheme, String::new())).cloned()
    }

    /// Returns the number of registered factories.
    pub fn factory_count(&self) -> usize {
        self.state.lock().factories.len()
    }

    fn factory_key(&self, scheme: &str, domain: &str) -> FactoryKey {
        let standard = self
            .scheme_info(scheme)
            .map(|info| info.is_standard)
            .unwrap_or(false);
        let domain = if standard {
            domain.to_ascii_lowercase()
        } else {
            String::new()
        };
        (scheme.to_string(), domain)
    }

    fn install_protocol_handler(&self, scheme: &str) {
        if self.job_factory.has_protocol_handler(scheme) {
            return;
        }
        let handler = SchemeProtocolHandler {
            registry: self.self_ref.clone(),
        };
        self.job_factory
            .set_protocol_handler(scheme, Some(Arc::new(handler)));
        trace!("Installed protocol handler for '{}'", scheme);
    }

    fn register_internal_factories(&self) {
        let factory: Arc<dyn SchemeHandlerFactory> = Arc::new(InternalSchemeHandlerFactory);
        if let Err(e) = self.add_factory(INTERNAL_SCHEME, "", Some(factory)) {
            warn!("Failed to register internal factory: {}", e);
        }
    }

    fn create_job(
        &self,
        request: &NetworkRequest,
        events: &NetEventSender,
    ) -> Option<Box<dyn NetworkTransaction>> {
        let url = &request.request.url;
        let factory = self.factory_for(url.scheme(), url.host_str())?;

        let browser = request.metadata.browser_id.map(|id: Uuid| BrowserInfo { id });
        let handler = factory.create(browser.as_ref(), url.scheme(), &request.request)?;

        trace!(
            "Request {} served by scheme handler for {}",
            request.metadata.request_id,
            url.scheme()
        );
        Some(Box::new(SchemeJob::new(
            handler,
            request.clone(),
            events.clone(),
            self.cookie_store.clone(),
            self.cookie_policy.clone(),
        )))
    }
}

impl std::fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        let mut factories: Vec<&FactoryKey> = state.factories.keys().collect();
        factories.sort();
        f.debug_struct("SchemeRegistry")
            .field("schemes", &state.schemes.keys().collect::<Vec<_>>())
            .field("factories", &factories)
            .finish()
    }
}

/// Job factory entry point for schemes with registered factories.
struct SchemeProtocolHandler {
    registry: Weak<SchemeRegistry>,
}

impl ProtocolHandler for SchemeProtocolHandler {
    fn create_job(
        &self,
        request: &NetworkRequest,
        events: &NetEventSender,
    ) -> Option<Box<dyn NetworkTransaction>> {
        self.registry.upgrade()?.create_job(request, events)
    }
}

fn is_built_in(scheme: &str) -> bool {
    built_in_standard(scheme).is_some()
}

fn built_in_standard(scheme: &str) -> Option<bool> {
    BUILT_IN_SCHEMES
        .iter()
        .find(|(name, _)| *name == scheme)
        .map(|(_, standard)| *standard)
}

/// Lower-cases and validates a scheme name: a letter followed by letters,
/// digits, `+`, `-` or `.`.
fn normalize_scheme(name: &str) -> Result<String, SchemeError> {
    let scheme = name.to_ascii_lowercase();
    let mut chars = scheme.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if valid {
        Ok(scheme)
    } else {
        Err(SchemeError::InvalidName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::scheme::SchemeHandler;
    use crate::net::cookies::AllowAllCookies;
    use crate::net::mock::MockNetworkStack;
    use crate::net::request::Request;
    use crate::scheme::buffer::BufferSchemeHandler;
    use http::StatusCode;

    struct Named(&'static str);

    impl SchemeHandlerFactory for Named {
        fn create(
            &self,
            _browser: Option<&BrowserInfo>,
            _scheme: &str,
            _request: &Request,
        ) -> Option<Box<dyn SchemeHandler>> {
            Some(Box::new(BufferSchemeHandler::new(StatusCode::OK, "text/plain", self.0)))
        }
    }

    fn registry() -> (Arc<JobFactory>, Arc<SchemeRegistry>) {
        let job_factory = Arc::new(JobFactory::new(Arc::new(MockNetworkStack::new())));
        let registry = SchemeRegistry::new(job_factory.clone(), None, Arc::new(AllowAllCookies));
        (job_factory, registry)
    }

    fn same(a: &Arc<dyn SchemeHandlerFactory>, b: &Arc<dyn SchemeHandlerFactory>) -> bool {
        Arc::ptr_eq(a, b)
    }

    #[test]
    fn test_register_scheme_once() {
        let (_, registry) = registry();
        assert!(!registry.has_registered_scheme("widget"));
        assert!(registry.register_scheme("Widget", true, false, false).is_ok());
        assert!(registry.has_registered_scheme("widget"));

        let before = registry.registered_schemes();
        assert_eq!(
            registry.register_scheme("widget", false, true, true),
            Err(SchemeError::AlreadyRegistered("widget".to_string()))
        );
        assert_eq!(registry.registered_schemes(), before);
        assert_eq!(
            registry.scheme_info("widget"),
            Some(SchemeInfo {
                is_standard: true,
                is_local: false,
                is_display_isolated: false
            })
        );
    }

    #[test]
    fn test_built_in_and_invalid_schemes_rejected() {
        let (_, registry) = registry();
        assert!(registry.has_registered_scheme("https"));
        assert_eq!(
            registry.register_scheme("HTTP", true, false, false),
            Err(SchemeError::BuiltIn("http".to_string()))
        );
        assert!(matches!(
            registry.register_scheme("9lives", true, false, false),
            Err(SchemeError::InvalidName(_))
        ));
        assert!(matches!(
            registry.register_scheme("", true, false, false),
            Err(SchemeError::InvalidName(_))
        ));
        assert!(registry.registered_schemes().is_empty());
    }

    #[test]
    fn test_domain_precedence() {
        let (job_factory, registry) = registry();
        registry.register_scheme("widget", true, false, false).unwrap();

        let generic: Arc<dyn SchemeHandlerFactory> = Arc::new(Named("generic"));
        let specific: Arc<dyn SchemeHandlerFactory> = Arc::new(Named("specific"));
        registry.add_factory("widget", "", Some(generic.clone())).unwrap();
        assert!(job_factory.has_protocol_handler("widget"));

        let found = registry.factory_for("widget", Some("anything.example")).unwrap();
        assert!(same(&found, &generic));

        registry
            .add_factory("WIDGET", "Example", Some(specific.clone()))
            .unwrap();
        assert!(same(&registry.factory_for("widget", Some("example")).unwrap(), &specific));
        assert!(same(
            &registry.factory_for("widget", Some("anything.example")).unwrap(),
            &generic
        ));
    }

    #[test]
    fn test_domain_ignored_for_non_standard_scheme() {
        let (_, registry) = registry();
        registry.register_scheme("note", false, false, false).unwrap();

        let factory: Arc<dyn SchemeHandlerFactory> = Arc::new(Named("note"));
        registry.add_factory("note", "ignored.example", Some(factory.clone())).unwrap();
        assert!(same(&registry.factory_for("note", Some("other")).unwrap(), &factory));
        assert!(registry.remove_factory("note", ""));
    }

    #[test]
    fn test_none_factory_removes_and_uninstalls() {
        let (job_factory, registry) = registry();
        registry.register_scheme("widget", true, false, false).unwrap();

        registry.add_factory("widget", "", Some(Arc::new(Named("a")))).unwrap();
        registry.add_factory("widget", "", None).unwrap();
        assert!(registry.factory_for("widget", Some("x")).is_none());
        assert!(!job_factory.has_protocol_handler("widget"));
        assert!(!registry.remove_factory("widget", ""));
    }

    #[test]
    fn test_clear_keeps_internal_factory() {
        let (job_factory, registry) = registry();
        assert!(registry.factory_for(INTERNAL_SCHEME, Some("version")).is_some());

        registry.add_factory("widget", "", Some(Arc::new(Named("a")))).unwrap();
        registry.clear_factories();

        assert!(registry.factory_for("widget", None).is_none());
        assert!(!job_factory.has_protocol_handler("widget"));
        assert!(registry.factory_for(INTERNAL_SCHEME, Some("version")).is_some());
        assert!(job_factory.has_protocol_handler(INTERNAL_SCHEME));
        assert_eq!(registry.factory_count(), 1);
    }
}
