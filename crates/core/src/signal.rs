// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use tokio::sync::mpsc;

/// Coordinates process shutdown: either an OS signal (SIGTERM/SIGINT) or an
/// explicit trigger (e.g. the control API's shutdown endpoint) can initiate it.
pub struct Shutdown {
	shutdown_tx: mpsc::Sender<()>,
	shutdown_rx: mpsc::Receiver<()>,
}

impl Shutdown {
	pub fn new() -> Self {
		let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
		Shutdown {
			shutdown_tx,
			shutdown_rx,
		}
	}

	/// Returns a trigger that can be used to start shutdown from elsewhere.
	pub fn trigger(&self) -> ShutdownTrigger {
		ShutdownTrigger {
			shutdown_tx: self.shutdown_tx.clone(),
		}
	}

	/// Completes once shutdown has been requested, by signal or trigger.
	pub async fn wait(mut self) {
		imp::wait_for_shutdown(&mut self.shutdown_rx).await
	}
}

impl Default for Shutdown {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Clone, Debug)]
pub struct ShutdownTrigger {
	shutdown_tx: mpsc::Sender<()>,
}

impl ShutdownTrigger {
	pub async fn shutdown_now(&self) {
		let _ = self.shutdown_tx.send(()).await;
	}
}

#[cfg(unix)]
mod imp {
	use std::process;

	use tokio::signal::unix::{SignalKind, signal};
	use tokio::sync::mpsc::Receiver;
	use tracing::info;

	pub(super) async fn wait_for_shutdown(receiver: &mut Receiver<()>) {
		tokio::select! {
			_ = watch_signal(SignalKind::interrupt(), "SIGINT") => {
				tokio::spawn(async move {
					watch_signal(SignalKind::interrupt(), "SIGINT").await;
					info!("second interrupt received, exiting immediately");
					process::exit(1);
				});
			}
			_ = watch_signal(SignalKind::terminate(), "SIGTERM") => {}
			_ = receiver.recv() => { info!("received explicit shutdown request") }
		};
	}

	async fn watch_signal(kind: SignalKind, name: &'static str) {
		signal(kind)
			.expect("failed to register signal handler")
			.recv()
			.await;
		info!("received signal {}, starting shutdown", name);
	}
}

#[cfg(not(unix))]
mod imp {
	use tokio::sync::mpsc::Receiver;
	use tracing::info;

	pub(super) async fn wait_for_shutdown(receiver: &mut Receiver<()>) {
		tokio::select! {
			_ = tokio::signal::ctrl_c() => { info!("received ctrl-c, starting shutdown") }
			_ = receiver.recv() => { info!("received explicit shutdown request") }
		};
	}
}
