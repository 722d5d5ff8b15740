use std::time::Instant;

use argos_client::{EngineLauncher, OutboundNotifier, ReqwestRobotsPolicy};
use argos_core::traits::{
    BrowserLauncher, Notifier, RegistrationStore, ResultSink, RobotsPolicy, SiteConfigSource,
};
use argos_core::{Scheduler, ScrapeService, SiteConfigLoader};
use argos_store::{FileResultStore, JsonRegistrationStore};

/// The collaborators one server instance is wired with.
pub trait Services: Send + Sync + 'static {
    type Launcher: BrowserLauncher;
    type Robots: RobotsPolicy;
    type Sites: SiteConfigSource;
    type Registrations: RegistrationStore;
    type Sink: ResultSink;
    type Notifier: Notifier;
}

/// Real engines, files on disk, robots.txt over HTTP.
pub struct LiveServices;

impl Services for LiveServices {
    type Launcher = EngineLauncher;
    type Robots = ReqwestRobotsPolicy;
    type Sites = SiteConfigLoader;
    type Registrations = JsonRegistrationStore;
    type Sink = FileResultStore;
    type Notifier = OutboundNotifier;
}

pub type ScrapeServiceOf<S> =
    ScrapeService<<S as Services>::Launcher, <S as Services>::Robots, <S as Services>::Sites>;

pub type SchedulerOf<S> = Scheduler<
    ScrapeServiceOf<S>,
    <S as Services>::Registrations,
    <S as Services>::Sink,
    <S as Services>::Notifier,
>;

/// Shared application state, available to all route handlers via `State<Arc<AppState<S>>>`.
pub struct AppState<S: Services> {
    pub scraper: ScrapeServiceOf<S>,
    pub scheduler: SchedulerOf<S>,
    pub started_at: Instant,
}

impl<S: Services> AppState<S> {
    pub fn new(scraper: ScrapeServiceOf<S>, scheduler: SchedulerOf<S>) -> Self {
        Self {
            scraper,
            scheduler,
            started_at: Instant::now(),
        }
    }
}
