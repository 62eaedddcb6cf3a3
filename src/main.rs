use agrisync::app::App;
use agrisync::cache::{CacheDomain, CacheResult, GeoPoint};
use agrisync::config::Config;
use agrisync::logging::{self, LogTarget};
use agrisync::net::{FetchRequest, NetworkStatus};
use agrisync::preload::HomeContext;
use agrisync::queue::{HttpMethod, HttpSender};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "agrisync")]
#[command(about = "Offline request queue and cache for the farmer advisory client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/agrisync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  /// Treat the network as unavailable
  #[arg(long, global = true)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Inspect or replay queued requests
  #[command(subcommand)]
  Queue(QueueCommand),

  /// Inspect or clear cached data
  #[command(subcommand)]
  Cache(CacheCommand),

  /// Send a request, queueing it if it cannot be delivered
  Send {
    #[arg(long)]
    url: String,
    #[arg(short, long, default_value = "POST")]
    method: HttpMethod,
    #[arg(short, long)]
    body: Option<String>,
    /// Fail instead of queueing
    #[arg(long)]
    no_queue: bool,
  },

  /// Show a user's farms, from cache when fresh
  Farms {
    /// User mobile number
    #[arg(long)]
    user: String,
  },

  /// Show market prices for a commodity selection, from cache when fresh
  Prices {
    /// Commodities to price (default: the saved crop selection)
    commodities: Vec<String>,
  },

  /// Refresh stale home-page data
  Preload(HomeArgs),

  /// Replay the queue and keep home data warm until Ctrl-C
  Run(HomeArgs),
}

#[derive(Subcommand, Debug)]
enum QueueCommand {
  /// List pending and dead-lettered requests
  List,
  /// Replay pending requests now
  Drain,
  /// Drop every pending request
  Clear {
    /// Drop the dead-letter list instead
    #[arg(long)]
    dead: bool,
  },
  /// Move dead-lettered requests back to the queue
  RetryDead,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Show presence and age of each domain
  Info,
  /// Clear one domain, or everything
  Clear {
    #[arg(long)]
    domain: Option<CacheDomain>,
  },
}

#[derive(clap::Args, Debug)]
struct HomeArgs {
  #[arg(long, requires = "lon", allow_hyphen_values = true)]
  lat: Option<f64>,
  #[arg(long, requires = "lat", allow_hyphen_values = true)]
  lon: Option<f64>,
  /// User id (mobile number) for personalised alerts
  #[arg(long)]
  user: Option<String>,
}

impl HomeArgs {
  fn context(&self) -> HomeContext {
    HomeContext {
      location: self.lat.zip(self.lon).map(|(lat, lon)| GeoPoint::new(lat, lon)),
      user_id: self.user.clone(),
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let _log_guard = if args.log_stderr {
    logging::init(LogTarget::Stderr)?
  } else {
    let db_path = config.storage.resolved_path()?;
    let log_dir = db_path
      .parent()
      .ok_or_else(|| eyre!("Invalid storage path {}", db_path.display()))?
      .to_path_buf();
    logging::init(LogTarget::Directory(&log_dir))?
  };

  let status = NetworkStatus::new(!args.offline);
  let app = App::new(config, status)?;

  match args.command {
    Command::Queue(cmd) => queue_command(&app, cmd).await,
    Command::Cache(cmd) => cache_command(&app, cmd),
    Command::Send {
      url,
      method,
      body,
      no_queue,
    } => send(&app, url, method, body, !no_queue).await,
    Command::Farms { user } => farms(&app, &user).await,
    Command::Prices { commodities } => prices(&app, commodities).await,
    Command::Preload(home) => {
      let context = home.context();
      let report = app
        .preloader
        .preload_home_data(context.location, context.user_id.as_deref())
        .await;
      println!("refreshed: {:?}", report.refreshed);
      println!("skipped:   {:?}", report.skipped);
      println!("failed:    {:?}", report.failed);
      Ok(())
    }
    Command::Run(home) => run(&app, home.context()).await,
  }
}

async fn queue_command(app: &App, cmd: QueueCommand) -> Result<()> {
  match cmd {
    QueueCommand::List => {
      let pending = app.queue.pending()?;
      let dead = app.queue.dead_letters()?;
      println!("{} pending, {} dead-lettered", pending.len(), dead.len());
      for (label, entries) in [("pending", pending), ("dead", dead)] {
        for entry in entries {
          println!(
            "{:<8} {} {:<4} {} attempts={}{}",
            label,
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.method,
            entry.url,
            entry.attempts,
            entry
              .last_error
              .map(|e| format!(" last_error={}", e))
              .unwrap_or_default()
          );
        }
      }
    }
    QueueCommand::Drain => {
      let sender = HttpSender::new(app.client.clone());
      let report = app.queue.drain(&sender).await?;
      if report.offline {
        println!("offline, nothing sent");
      } else {
        println!(
          "delivered={} retained={} deferred={} dead_lettered={}",
          report.delivered, report.retained, report.deferred, report.dead_lettered
        );
      }
    }
    QueueCommand::Clear { dead: false } => {
      app.queue.clear()?;
      println!("queue cleared");
    }
    QueueCommand::Clear { dead: true } => {
      app.queue.clear_dead_letters()?;
      println!("dead letters cleared");
    }
    QueueCommand::RetryDead => {
      let moved = app.queue.requeue_dead_letters()?;
      println!("{} requests requeued", moved);
    }
  }
  Ok(())
}

fn cache_command(app: &App, cmd: CacheCommand) -> Result<()> {
  match cmd {
    CacheCommand::Info => {
      for info in app.cache.cache_info().domains {
        let age = info
          .age_minutes
          .map(|m| format!("{}m", m))
          .unwrap_or_else(|| "-".to_string());
        println!(
          "{:<20} present={:<5} age={:<6} expired={}",
          info.domain.name(),
          info.present,
          age,
          info.expired
        );
      }
    }
    CacheCommand::Clear { domain: Some(domain) } => {
      app.cache.clear_domain(domain);
      println!("cleared {}", domain);
    }
    CacheCommand::Clear { domain: None } => {
      app.cache.clear_all();
      println!("cache cleared");
    }
  }
  Ok(())
}

fn print_source<T>(result: &CacheResult<T>) {
  match result.age_minutes() {
    Some(age) => println!("source: {} ({}m old)", result.source, age),
    None => println!("source: {}", result.source),
  }
}

async fn farms(app: &App, user: &str) -> Result<()> {
  let result = app
    .upstream
    .farms(user)
    .await
    .map_err(|e| eyre!("Failed to load farms: {}", e))?;

  print_source(&result);
  for farm in &result.data {
    println!(
      "{:<12} {:<24} crop={} acres={}",
      farm.id,
      farm.name,
      farm.crop.as_deref().unwrap_or("-"),
      farm
        .area_acres
        .map(|a| a.to_string())
        .unwrap_or_else(|| "-".to_string())
    );
  }
  Ok(())
}

async fn prices(app: &App, commodities: Vec<String>) -> Result<()> {
  let commodities = if commodities.is_empty() {
    app.cache.load_selected_crops().unwrap_or_default()
  } else {
    commodities
  };
  if commodities.is_empty() {
    return Err(eyre!("No commodities given and no crop selection saved"));
  }

  let result = app
    .upstream
    .prices(&commodities)
    .await
    .map_err(|e| eyre!("Failed to load prices: {}", e))?;

  print_source(&result);
  for price in &result.data {
    println!(
      "{:<16} {:<20} min={} max={} modal={}",
      price.commodity, price.market, price.min_price, price.max_price, price.modal_price
    );
  }
  Ok(())
}

async fn send(
  app: &App,
  url: String,
  method: HttpMethod,
  body: Option<String>,
  queue_on_fail: bool,
) -> Result<()> {
  let request = FetchRequest {
    url,
    method,
    headers: Default::default(),
    body,
    queue_on_fail,
  };

  let response = app
    .client
    .smart_fetch(request)
    .await
    .map_err(|e| eyre!("Request failed: {}", e))?;

  if response.is_queued() {
    println!("{} (queued)", response.status);
  } else {
    println!("{}", response.status);
    println!("{}", response.text());
  }
  Ok(())
}

async fn run(app: &App, context: HomeContext) -> Result<()> {
  let worker = app.start_worker();

  app
    .preloader
    .preload_home_data(context.location, context.user_id.as_deref())
    .await;
  let (_foreground, foreground_rx) = watch::channel(true);
  let preloader = app.start_preloader(foreground_rx, context);

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
  tracing::info!("shutting down");

  preloader.stop().await;
  worker.stop().await;
  Ok(())
}
