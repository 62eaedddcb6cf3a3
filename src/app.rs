use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::watch;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::net::{Connectivity, ConnectivityProbe, NetworkStatus, SmartClient};
use crate::preload::{CachePreloader, HomeContext, HomeDataSource, PreloaderHandle};
use crate::queue::{HttpSender, RequestQueue};
use crate::store::{KvStore, SqliteStore};
use crate::upstream::{CachedUpstream, UpstreamClient};
use crate::worker::{QueueWorker, WorkerHandle};

/// Wired-up services sharing one store and one connectivity flag.
pub struct App {
  pub config: Config,
  pub store: Arc<dyn KvStore>,
  pub status: NetworkStatus,
  pub queue: Arc<RequestQueue>,
  pub client: SmartClient,
  pub cache: CacheManager,
  pub upstream: CachedUpstream,
  pub preloader: Arc<CachePreloader>,
}

impl App {
  /// Open the configured database and build every service on top of it.
  pub fn new(config: Config, status: NetworkStatus) -> Result<Self> {
    let path = config.storage.resolved_path()?;
    tracing::debug!("app: opening store at {}", path.display());
    let store = SqliteStore::open(&path)?;
    Self::with_store(config, status, Arc::new(store))
  }

  pub fn with_store(config: Config, status: NetworkStatus, store: Arc<dyn KvStore>) -> Result<Self> {
    let http = SmartClient::build_http(config.network.request_timeout())?;

    let mut connectivity =
      Connectivity::new(status.clone()).with_min_latency(config.network.probe_latency());
    if let Some(health_url) = config.network.health_url()? {
      connectivity =
        connectivity.with_health_check(http.clone(), health_url, config.network.probe_timeout());
    }
    let probe: Arc<dyn ConnectivityProbe> = Arc::new(connectivity);

    let queue = Arc::new(
      RequestQueue::new(Arc::clone(&store), Arc::clone(&probe))
        .with_policy(config.queue.retry_policy()),
    );
    let client = SmartClient::new(http, probe, Arc::clone(&queue))
      .with_bearer_token(Config::get_api_token());

    let cache = CacheManager::new(Arc::clone(&store));
    let api = UpstreamClient::new(client.clone(), config.api.clone());
    let source: Arc<dyn HomeDataSource> = Arc::new(api.clone());
    let preloader = Arc::new(CachePreloader::new(cache.clone(), source));
    let upstream = CachedUpstream::new(api, cache.clone());

    Ok(Self {
      config,
      store,
      status,
      queue,
      client,
      cache,
      upstream,
      preloader,
    })
  }

  /// Start replaying the queue in the background.
  pub fn start_worker(&self) -> WorkerHandle {
    let sender = Arc::new(HttpSender::new(self.client.clone()));
    QueueWorker::new(Arc::clone(&self.queue), sender, self.status.clone())
      .with_poll_interval(self.config.queue.poll_interval())
      .start()
  }

  /// Refresh the home domains whenever `foreground` turns true.
  pub fn start_preloader(
    &self,
    foreground: watch::Receiver<bool>,
    context: HomeContext,
  ) -> PreloaderHandle {
    self.preloader.spawn_visibility_preloader(foreground, context)
  }
}
