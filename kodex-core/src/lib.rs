//! Wires the authentication primitives in this crate into a single value
//! a host owns and passes around explicitly. There is no process-wide
//! singleton here: every service is a plain struct holding `Arc`
//! collaborators, and [`Core`] is just the bundle of all of them
//! constructed once at startup.

pub mod authentication;
pub mod config;
pub mod error;
pub mod hooks;
pub mod lockout;
pub mod metrics;
pub mod model;
pub mod password_reset;
pub mod roles;
pub mod storage;
pub mod token;
pub mod update;
pub mod user;

use std::sync::Arc;

use kodex_audit::{EventBus, SubscriberRegistry};
use kodex_auth::TokenSigner;
use kodex_crypto::{PasswordHashParams, PasswordHasherService};

use authentication::{AuthenticatedContext, AuthenticationService, LoginAttempt, LoginFailureContext};
use config::KodexConfig;
use hooks::HookChain;
use lockout::LockoutService;
use metrics::KodexMetrics;
use password_reset::{PasswordResetService, ResetSender};
use roles::RoleAssignmentService;
use storage::{
    AttributeStore, LockoutStore, PasswordResetStore, ProfileStore, RateLimitStore, RoleStore,
    TokenStore, UserStore,
};
use token::TokenManager;
use update::UpdateProcessor;
use user::{NewUser, UserDeletion, UserLifecycleService};

/// Every storage collaborator a host must supply. Each trait covers one
/// aggregate; a host backed by a single database typically implements all
/// eight against the same connection pool.
pub struct CoreStores {
    pub users: Arc<dyn UserStore>,
    pub roles: Arc<dyn RoleStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub attributes: Arc<dyn AttributeStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub password_resets: Arc<dyn PasswordResetStore>,
    pub lockouts: Arc<dyn LockoutStore>,
    pub rate_limits: Arc<dyn RateLimitStore>,
}

/// The lifecycle hook chains a host registers plugins against. Every
/// chain runs with the single [`config::HooksConfig::failure_strategy`]
/// a host configured; a host that wants different strategies per chain
/// builds its [`Core`] fields directly instead of going through
/// [`Core::new`].
pub struct CoreHooks {
    pub before_login: HookChain<LoginAttempt>,
    pub after_login_failure: HookChain<LoginFailureContext>,
    pub after_authentication: HookChain<AuthenticatedContext>,
    pub before_create_user: HookChain<NewUser>,
    pub before_delete_user: HookChain<UserDeletion>,
}

impl CoreHooks {
    pub fn new(strategy: hooks::FailureStrategy) -> Self {
        Self {
            before_login: HookChain::new(strategy),
            after_login_failure: HookChain::new(strategy),
            after_authentication: HookChain::new(strategy),
            before_create_user: HookChain::new(strategy),
            before_delete_user: HookChain::new(strategy),
        }
    }
}

/// The assembled authentication core: one instance per host process (or
/// per realm cluster, for a host that partitions by tenant), constructed
/// once at startup and held behind whatever `Arc`/`Data` wrapper the
/// host's own framework uses.
pub struct Core {
    pub config: KodexConfig,
    pub bus: Arc<EventBus>,
    pub metrics: Option<Arc<KodexMetrics>>,
    pub hooks: CoreHooks,
    pub authentication: Arc<AuthenticationService>,
    pub tokens: Arc<TokenManager>,
    pub lockout: Arc<LockoutService>,
    pub password_reset: Arc<PasswordResetService>,
    pub roles: Arc<RoleAssignmentService>,
    pub users: Arc<UserLifecycleService>,
    pub update: Arc<UpdateProcessor>,
}

impl Core {
    /// Builds every service from its storage and infrastructure
    /// collaborators. `hash_params` selects the Argon2id cost for the
    /// password hasher; callers with no strong opinion can reach for one
    /// of [`PasswordHashParams`]'s named presets.
    pub fn new(
        config: KodexConfig,
        stores: CoreStores,
        signer: Arc<dyn TokenSigner>,
        reset_sender: Arc<dyn ResetSender>,
        hash_params: PasswordHashParams,
        metrics_registry: Option<&prometheus::Registry>,
    ) -> Result<Self, prometheus::Error> {
        let bus = Arc::new(EventBus::new(SubscriberRegistry::new()));
        let metrics = match metrics_registry {
            Some(registry) => Some(Arc::new(KodexMetrics::register(registry)?)),
            None => None,
        };
        let hasher = PasswordHasherService::new(hash_params);

        let lockout = Arc::new(LockoutService::new(
            stores.lockouts.clone(),
            bus.clone(),
            metrics.clone(),
            config.lockout,
        ));
        let tokens = Arc::new(TokenManager::new(
            signer,
            stores.tokens.clone(),
            stores.roles.clone(),
            bus.clone(),
            metrics.clone(),
            config.token.clone(),
        ));
        let authentication = Arc::new(AuthenticationService::new(
            stores.users.clone(),
            hasher.clone(),
            lockout.clone(),
            tokens.clone(),
            bus.clone(),
            metrics.clone(),
            config.password.clone(),
        ));
        let password_reset = Arc::new(PasswordResetService::new(
            stores.users.clone(),
            stores.password_resets.clone(),
            stores.rate_limits.clone(),
            reset_sender,
            bus.clone(),
            metrics.clone(),
            config.password_reset.clone(),
        ));
        let roles = Arc::new(RoleAssignmentService::new(stores.roles.clone(), bus.clone()));
        let users = Arc::new(UserLifecycleService::new(
            stores.users.clone(),
            roles.clone(),
            hasher,
            bus.clone(),
            config.email.clone(),
            config.phone.clone(),
            config.password.clone(),
        ));
        let update = Arc::new(UpdateProcessor::new(
            stores.users,
            stores.profiles,
            stores.attributes,
            config.custom_attributes.clone(),
            config.email.clone(),
            config.phone.clone(),
            bus.clone(),
        ));

        let hooks = CoreHooks::new(config.hooks.failure_strategy);

        Ok(Self {
            config,
            bus,
            metrics,
            hooks,
            authentication,
            tokens,
            lockout,
            password_reset,
            roles,
            users,
            update,
        })
    }
}
