//! One-time loading of the third-party embed API scripts.
//!
//! Each technology's script is injected at most once per [`ScriptBootstrap`].
//! Every caller of [`ScriptBootstrap::when_ready`] registers a waiter on the
//! same pending load; all waiters are resolved together when the host reports
//! the API ready (or failed). Callers arriving after a successful load are
//! resolved immediately.
//!
//! A failed load is remembered until the next `when_ready` call, which
//! injects the script again.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use playerconfig::Config;
use tracing::{debug, info, warn};

use crate::model::EmbedTechnology;

/// Callback resolved once the technology's API is usable.
pub type ReadyWaiter = Box<dyn FnOnce(Result<(), String>) + Send>;

/// What the host is asked to inject.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptRequest {
    pub technology: EmbedTechnology,
    pub url: String,
}

/// Host side of script injection.
pub trait ScriptInjector: Send + Sync {
    /// Starts loading the script described by `request`.
    ///
    /// The host resolves `notifier` once the API has signalled readiness, or
    /// when loading fails. An `Err` here is an immediate failure.
    fn inject(&self, request: &ScriptRequest, notifier: ReadyNotifier) -> Result<(), String>;
}

enum BootstrapState {
    Loading {
        attempt: u64,
        waiters: Vec<ReadyWaiter>,
    },
    Ready,
    Failed(String),
}

impl fmt::Debug for BootstrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapState::Loading { attempt, waiters } => f
                .debug_struct("Loading")
                .field("attempt", attempt)
                .field("waiters", &waiters.len())
                .finish(),
            BootstrapState::Ready => f.write_str("Ready"),
            BootstrapState::Failed(reason) => f.debug_tuple("Failed").field(reason).finish(),
        }
    }
}

/// Outcome of registering a waiter.
enum Admission {
    Ready(ReadyWaiter),
    Queued,
    Inject(u64),
}

#[derive(Default)]
struct BootstrapTable {
    states: HashMap<EmbedTechnology, BootstrapState>,
    attempts: u64,
}

/// Resolves one pending script load.
///
/// Consumed on use, so a load is resolved at most once. Dropping it without
/// resolving leaves the waiters pending.
pub struct ReadyNotifier {
    table: Arc<Mutex<BootstrapTable>>,
    technology: EmbedTechnology,
    attempt: u64,
}

impl ReadyNotifier {
    pub fn technology(&self) -> EmbedTechnology {
        self.technology
    }

    /// The API is loaded and ready.
    pub fn ready(self) {
        resolve(&self.table, self.technology, self.attempt, Ok(()));
    }

    /// The script failed to load or the API never became ready.
    pub fn failed(self, reason: impl Into<String>) {
        resolve(&self.table, self.technology, self.attempt, Err(reason.into()));
    }
}

impl fmt::Debug for ReadyNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadyNotifier")
            .field("technology", &self.technology)
            .field("attempt", &self.attempt)
            .finish()
    }
}

fn resolve(
    table: &Arc<Mutex<BootstrapTable>>,
    technology: EmbedTechnology,
    attempt: u64,
    result: Result<(), String>,
) {
    let waiters = {
        let mut table = table.lock().expect("Bootstrap table mutex poisoned");
        match table.states.get(&technology) {
            Some(BootstrapState::Loading { attempt: current, .. }) if *current == attempt => {}
            _ => {
                debug!(
                    technology = technology.name(),
                    attempt, "Ignoring resolution of a superseded script load"
                );
                return;
            }
        }

        let next = match &result {
            Ok(()) => BootstrapState::Ready,
            Err(reason) => BootstrapState::Failed(reason.clone()),
        };
        match table.states.insert(technology, next) {
            Some(BootstrapState::Loading { waiters, .. }) => waiters,
            _ => Vec::new(),
        }
    };

    match &result {
        Ok(()) => info!(
            technology = technology.name(),
            waiters = waiters.len(),
            "Embed API ready"
        ),
        Err(reason) => warn!(
            technology = technology.name(),
            waiters = waiters.len(),
            reason = reason.as_str(),
            "Embed API failed to load"
        ),
    }

    // waiters run outside the lock, they may call back into the bootstrap
    for waiter in waiters {
        waiter(result.clone());
    }
}

/// Shared, memoized loader of embed API scripts.
pub struct ScriptBootstrap {
    injector: Arc<dyn ScriptInjector>,
    script_urls: HashMap<EmbedTechnology, String>,
    table: Arc<Mutex<BootstrapTable>>,
}

static SHARED: OnceLock<Arc<ScriptBootstrap>> = OnceLock::new();

impl ScriptBootstrap {
    /// Creates a bootstrap using each technology's default script URL.
    pub fn new(injector: Arc<dyn ScriptInjector>) -> Self {
        let script_urls = [EmbedTechnology::YouTube, EmbedTechnology::Vimeo]
            .into_iter()
            .map(|tech| (tech, tech.default_script_url().to_string()))
            .collect();
        Self {
            injector,
            script_urls,
            table: Arc::new(Mutex::new(BootstrapTable::default())),
        }
    }

    /// Creates a bootstrap with script URLs from `embed.<technology>.script_url`.
    pub fn from_config(injector: Arc<dyn ScriptInjector>, config: &Config) -> Self {
        let mut bootstrap = Self::new(injector);
        for tech in [EmbedTechnology::YouTube, EmbedTechnology::Vimeo] {
            match config.get_script_url(tech.name()) {
                Ok(url) => {
                    bootstrap.script_urls.insert(tech, url);
                }
                Err(e) => warn!(
                    technology = tech.name(),
                    error = %e,
                    "Using default embed script URL"
                ),
            }
        }
        bootstrap
    }

    /// Returns the process-wide bootstrap, creating it with `init` on first use.
    ///
    /// Players mounted anywhere in the process share this instance, so each
    /// script is injected once per process.
    pub fn shared(init: impl FnOnce() -> ScriptBootstrap) -> Arc<ScriptBootstrap> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(init())))
    }

    pub fn script_url(&self, technology: EmbedTechnology) -> &str {
        self.script_urls
            .get(&technology)
            .map(String::as_str)
            .unwrap_or_else(|| technology.default_script_url())
    }

    pub fn is_ready(&self, technology: EmbedTechnology) -> bool {
        let table = self.table.lock().expect("Bootstrap table mutex poisoned");
        matches!(table.states.get(&technology), Some(BootstrapState::Ready))
    }

    /// Last failure reason, if the latest load for `technology` failed.
    pub fn failure(&self, technology: EmbedTechnology) -> Option<String> {
        let table = self.table.lock().expect("Bootstrap table mutex poisoned");
        match table.states.get(&technology) {
            Some(BootstrapState::Failed(reason)) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Calls `waiter` once `technology`'s API is ready or has failed.
    ///
    /// The first call (or the first after a failure) injects the script;
    /// concurrent calls wait on that same load.
    pub fn when_ready(&self, technology: EmbedTechnology, waiter: ReadyWaiter) {
        let admission = {
            let mut table = self.table.lock().expect("Bootstrap table mutex poisoned");
            match table.states.get_mut(&technology) {
                Some(BootstrapState::Ready) => Admission::Ready(waiter),
                Some(BootstrapState::Loading { waiters, .. }) => {
                    waiters.push(waiter);
                    debug!(
                        technology = technology.name(),
                        waiters = waiters.len(),
                        "Waiting on pending embed script load"
                    );
                    Admission::Queued
                }
                Some(BootstrapState::Failed(_)) | None => {
                    table.attempts += 1;
                    let attempt = table.attempts;
                    table.states.insert(
                        technology,
                        BootstrapState::Loading {
                            attempt,
                            waiters: vec![waiter],
                        },
                    );
                    Admission::Inject(attempt)
                }
            }
        };

        let attempt = match admission {
            Admission::Ready(waiter) => {
                waiter(Ok(()));
                return;
            }
            Admission::Queued => return,
            Admission::Inject(attempt) => attempt,
        };

        let request = ScriptRequest {
            technology,
            url: self.script_url(technology).to_string(),
        };
        info!(
            technology = technology.name(),
            url = request.url.as_str(),
            attempt,
            "Injecting embed API script"
        );

        let notifier = ReadyNotifier {
            table: Arc::clone(&self.table),
            technology,
            attempt,
        };
        if let Err(reason) = self.injector.inject(&request, notifier) {
            resolve(&self.table, technology, attempt, Err(reason));
        }
    }
}

impl fmt::Debug for ScriptBootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.lock().expect("Bootstrap table mutex poisoned");
        f.debug_struct("ScriptBootstrap")
            .field("script_urls", &self.script_urls)
            .field("states", &table.states)
            .finish()
    }
}
