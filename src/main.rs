mod cache;
mod config;
mod db;
mod logging;
mod net;
mod notify;
mod outbox;
mod page;
mod platform;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::db::Database;
use crate::net::{HttpTransport, Method, Request, Response, Transport};
use crate::page::PageBridge;
use crate::platform::{BackgroundSync, Console, SyncRegistrar};
use crate::worker::{resume, Host, ServiceWorker, WorkerSettings};

#[derive(Parser, Debug)]
#[command(name = "story-offline")]
#[command(about = "Offline-resilience layer for the Story App")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/story-offline/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Database file, overriding storage.path
  #[arg(long)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the app shell and retire old cache generations
  Install,
  /// Issue a request the way the application would
  Fetch {
    url: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
    /// Request header as `name: value`
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Request body
    #[arg(short, long)]
    data: Option<String>,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Fire a background sync event
  Sync {
    /// Sync tag (default: sync.tag)
    #[arg(long)]
    tag: Option<String>,
  },
  /// Inspect the outbox from the page side
  Queue {
    #[command(subcommand)]
    action: QueueAction,
  },
  /// List response caches and their entries
  Caches {
    /// Only this cache
    name: Option<String>,
  },
  /// Deliver a push message
  Push {
    /// Raw push payload, usually JSON
    #[arg(short, long)]
    payload: Option<String>,
  },
  /// Click a notification built from a push payload
  Click {
    #[arg(short, long)]
    payload: Option<String>,
    /// Button that was clicked (`view` or `close`)
    #[arg(short, long)]
    action: Option<String>,
  },
  /// Post a JSON message to the worker
  Message {
    data: String,
    /// Wait for a direct reply instead of broadcasting
    #[arg(long)]
    reply: bool,
  },
  /// Check connectivity and replay the outbox whenever the network is back
  Watch,
}

#[derive(Subcommand, Debug)]
enum QueueAction {
  List,
  Clear,
  /// Replay queued writes directly, removing each one the API confirms
  Replay,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.logging)?;

  let db_path = match args.db.or_else(|| config.storage.path.clone()) {
    Some(path) => path,
    None => Database::default_path()?,
  };
  let db = Database::open_shared(&db_path)?;
  debug!(path = ?db.path(), "database opened");

  let transport: Arc<dyn Transport> =
    Arc::new(HttpTransport::new(config.app_origin()?, config.api_timeout())?);
  let background_sync = Arc::new(BackgroundSync::new());
  let console = Arc::new(Console);

  let worker = Arc::new(ServiceWorker::new(
    WorkerSettings::from_config(&config)?,
    db,
    Host {
      transport: Arc::clone(&transport),
      registrar: background_sync.clone(),
      clients: console.clone(),
      notifications: console,
    },
  ));

  match args.command {
    Command::Install => {
      let installed = worker.install().await?;
      println!("cached {}/{} app shell files", installed.cached, installed.total);
      for path in &installed.failed {
        println!("  failed: {}", path);
      }
      let activated = worker.activate().await?;
      for name in &activated.deleted {
        println!("deleted cache {}", name);
      }
      println!("state: {:?}", worker.state());
    }

    Command::Fetch {
      url,
      method,
      headers,
      data,
      navigate,
    } => {
      let request = build_request(&url, &method, &headers, data, navigate)?;
      let route = worker.route(&request);
      debug!(?route, intercepted = route.is_intercepted(), "routing");

      let registration = resume(worker.clone(), transport, config.registration_timeout()).await;
      if let Some(active) = registration.worker() {
        debug!(state = ?active.state(), "worker active");
      } else if let Some(reason) = registration.degraded_reason() {
        eprintln!("warning: offline support disabled ({})", reason);
      }
      match registration.fetch(request).await {
        Ok(response) => print_response(&response),
        Err(e) => return Err(eyre!("Request failed: {}", e)),
      }
    }

    Command::Sync { tag } => {
      let tag = tag.unwrap_or_else(|| config.sync.tag.clone());
      match worker.handle_sync(&tag).await? {
        Some(report) => {
          println!(
            "delivered {}, rejected {}, remaining {}",
            report.delivered, report.rejected, report.remaining
          );
          if let Some(halt) = report.halted {
            println!("halted at entry {}: {}", halt.entry_id, halt.cause);
          }
        }
        None => println!("no handler for sync tag {}", tag),
      }
    }

    Command::Queue { action } => {
      let page = PageBridge::new(worker.outbox_store().clone(), transport);
      match action {
        QueueAction::List => {
          for entry in page.list_queued_writes().await? {
            println!("{}", serde_json::to_string(&entry)?);
          }
        }
        QueueAction::Clear => {
          page.clear_queued_writes().await?;
          println!("outbox cleared");
        }
        QueueAction::Replay => {
          let report = page.replay_queued_writes().await?;
          println!(
            "attempted {}, confirmed {}, drained {}",
            report.attempted, report.confirmed, report.drained
          );
        }
      }
    }

    Command::Caches { name } => {
      let caches = worker.caches();
      let names = match name {
        Some(name) if caches.has(&name).await? => vec![name],
        Some(name) => return Err(eyre!("No cache named {}", name)),
        None => caches.keys().await?,
      };
      for name in names {
        println!("{}", name);
        for url in caches.urls(&name).await? {
          println!("  {}", url);
        }
      }
    }

    Command::Push { payload } => {
      worker.handle_push(payload.as_deref().map(str::as_bytes)).await?;
    }

    Command::Click { payload, action } => {
      let notification =
        notify::build_notification(payload.as_deref().map(str::as_bytes), &worker.settings().base_path);
      debug!(story = ?notification.story_id(), "notification clicked");
      match worker
        .handle_notification_click(&notification, action.as_deref())
        .await?
      {
        notify::ClickTarget::Dismiss => println!("dismissed"),
        notify::ClickTarget::Open(url) => debug!(url = %url, "window opened"),
      }
    }

    Command::Message { data, reply } => {
      let data: Value = serde_json::from_str(&data)?;
      if reply {
        let (tx, rx) = oneshot::channel();
        worker.handle_message(data, Some(tx)).await?;
        let answer = rx.await.map_err(|_| eyre!("Worker did not reply"))?;
        println!("{}", answer);
      } else {
        worker.handle_message(data, None).await?;
      }
    }

    Command::Watch => {
      let registration = resume(worker.clone(), transport.clone(), config.registration_timeout()).await;
      if !registration.is_active() {
        return Err(eyre!("Worker could not be registered, nothing to watch"));
      }
      watch(&worker, transport.as_ref(), &background_sync, &config).await?;
    }
  }

  Ok(())
}

fn build_request(
  url: &str,
  method: &str,
  headers: &[String],
  data: Option<String>,
  navigate: bool,
) -> Result<Request> {
  let url = Url::parse(url).map_err(|e| eyre!("Invalid URL {}: {}", url, e))?;
  let method = Method::parse(method).ok_or_else(|| eyre!("Unsupported method {}", method))?;

  let mut request = if navigate {
    Request::navigate(url)
  } else {
    Request::new(method, url)
  };
  for header in headers {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Header must look like `name: value`: {}", header))?;
    request = request.with_header(name.trim(), value.trim());
  }
  if let Some(data) = data {
    request = request.with_body(data);
  }
  Ok(request)
}

fn print_response(response: &Response) {
  println!("{} {}", response.status, response.status_text);
  for (name, value) in response.headers.iter() {
    println!("{}: {}", name, value);
  }
  println!();
  println!("{}", response.body_text());
}

/// Poll the API origin; when it answers, fire every pending sync tag. Tags
/// whose run halts are registered again for the next check.
async fn watch(
  worker: &ServiceWorker,
  transport: &dyn Transport,
  background_sync: &BackgroundSync,
  config: &Config,
) -> Result<()> {
  let ping = Request::get(config.api_base()?);
  let mut interval = tokio::time::interval(config.check_interval());
  let mut online: Option<bool> = None;
  info!(interval = ?config.check_interval(), "watching connectivity");

  loop {
    tokio::select! {
      _ = interval.tick() => {}
      _ = tokio::signal::ctrl_c() => {
        info!("stopping");
        return Ok(());
      }
    }

    let reachable = transport.fetch(&ping).await.is_ok();
    if online != Some(reachable) {
      info!(online = reachable, "connectivity changed");
      online = Some(reachable);
    }
    if !reachable {
      continue;
    }

    // Writes queued by other processes never registered a tag here
    if worker.outbox_store().len().await? > 0 {
      background_sync.register(&config.sync.tag).await?;
    }

    for pending in background_sync.take_pending() {
      match worker.handle_sync(&pending).await {
        Ok(Some(report)) if report.is_complete() => {
          info!(delivered = report.delivered, rejected = report.rejected, "outbox drained");
        }
        Ok(Some(report)) => {
          warn!(remaining = report.remaining, "sync halted, retrying on next check");
          background_sync.register(&pending).await?;
        }
        Ok(None) => {}
        Err(e) => {
          warn!(error = %e, "sync failed, retrying on next check");
          background_sync.register(&pending).await?;
        }
      }
    }
  }
}
