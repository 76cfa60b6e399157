use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ServiceWorker;
use crate::net::{Request, Response, Transport, TransportError};

/// Outcome of bringing the worker up at startup.
pub enum Registration {
  /// Installed and activated; requests go through the worker
  Active(Arc<ServiceWorker>),
  /// Registration failed or timed out; requests go straight to the network
  /// and nothing works offline
  Degraded {
    transport: Arc<dyn Transport>,
    reason: String,
  },
}

/// Install and activate `worker`, giving up after `timeout` so startup is
/// never blocked.
pub async fn register(
  worker: Arc<ServiceWorker>,
  transport: Arc<dyn Transport>,
  timeout: Duration,
) -> Registration {
  bring_up(worker, transport, timeout, true).await
}

/// Bring up a worker that may already be installed.
///
/// When the current app shell cache exists, only activation runs and the
/// shell is not fetched again. Otherwise this is a full [`register`].
pub async fn resume(
  worker: Arc<ServiceWorker>,
  transport: Arc<dyn Transport>,
  timeout: Duration,
) -> Registration {
  let installed = match worker.caches().has(&worker.settings().names.app_shell).await {
    Ok(installed) => installed,
    Err(e) => {
      warn!(error = %e, "could not inspect caches, reinstalling");
      false
    }
  };
  if !installed {
    return register(worker, transport, timeout).await;
  }
  debug!(cache = %worker.settings().names.app_shell, "app shell present, skipping install");
  bring_up(worker, transport, timeout, false).await
}

async fn bring_up(
  worker: Arc<ServiceWorker>,
  transport: Arc<dyn Transport>,
  timeout: Duration,
  install: bool,
) -> Registration {
  let steps = async {
    if install {
      worker.install().await?;
    }
    worker.activate().await?;
    color_eyre::Result::<()>::Ok(())
  };

  let reason = match tokio::time::timeout(timeout, steps).await {
    Ok(Ok(())) => {
      info!(installed = install, "worker registered");
      return Registration::Active(worker);
    }
    Ok(Err(e)) => format!("registration failed: {}", e),
    Err(_) => format!("registration timed out after {:?}", timeout),
  };

  warn!(reason = %reason, "continuing without offline support");
  Registration::Degraded { transport, reason }
}

impl Registration {
  pub fn is_active(&self) -> bool {
    matches!(self, Registration::Active(_))
  }

  pub fn worker(&self) -> Option<&Arc<ServiceWorker>> {
    match self {
      Registration::Active(worker) => Some(worker),
      Registration::Degraded { .. } => None,
    }
  }

  /// Why offline support is unavailable, when it is.
  pub fn degraded_reason(&self) -> Option<&str> {
    match self {
      Registration::Active(_) => None,
      Registration::Degraded { reason, .. } => Some(reason),
    }
  }

  /// Issue a request the way the application would.
  pub async fn fetch(&self, request: Request) -> Result<Response, TransportError> {
    match self {
      Registration::Active(worker) => worker.handle_fetch(request).await,
      Registration::Degraded { transport, .. } => transport.fetch(&request).await,
    }
  }
}
