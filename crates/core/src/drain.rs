// Originally derived from https://github.com/istio/ztunnel (Apache 2.0 licensed)

use tokio::sync::{mpsc, watch};

/// Creates a drain channel pair.
///
/// The [`DrainTrigger`] starts a drain and waits for it to complete. Each
/// [`DrainWatcher`] should be held for the lifetime of one piece of in-flight
/// work (e.g. one proxied connection); a drain does not complete until every
/// clone has been dropped.
pub fn new() -> (DrainTrigger, DrainWatcher) {
	let (signal_tx, signal_rx) = watch::channel(false);
	let (drained_tx, drained_rx) = mpsc::channel(1);
	(
		DrainTrigger {
			drained_rx,
			signal_tx,
		},
		DrainWatcher {
			drained_tx,
			signal_rx,
		},
	)
}

enum Never {}

pub struct DrainTrigger {
	drained_rx: mpsc::Receiver<Never>,
	signal_tx: watch::Sender<bool>,
}

impl DrainTrigger {
	/// Signals all watchers to begin draining and waits for every outstanding
	/// [`DrainWatcher`]/[`ReleaseShutdown`] to be dropped.
	pub async fn start_drain_and_wait(mut self) {
		let _ = self.signal_tx.send(true);
		match self.drained_rx.recv().await {
			None => {},
			Some(never) => match never {},
		}
	}

	pub fn count(&self) -> usize {
		self.signal_tx.receiver_count()
	}
}

#[derive(Clone)]
pub struct DrainWatcher {
	drained_tx: mpsc::Sender<Never>,
	signal_rx: watch::Receiver<bool>,
}

impl DrainWatcher {
	/// Waits until a drain has been signaled, then returns a handle that must
	/// be dropped once the holder has wound down its work.
	pub async fn signaled(mut self) -> ReleaseShutdown {
		let _ = self.signal_rx.wait_for(|draining| *draining).await;
		ReleaseShutdown(self.drained_tx)
	}
}

#[must_use = "dropping this immediately releases the drain, finish outstanding work first"]
pub struct ReleaseShutdown(#[allow(dead_code)] mpsc::Sender<Never>);

#[cfg(test)]
mod test {
	use std::sync::Arc;
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[tokio::test]
	async fn drain_waits_for_watchers() {
		let (trigger, watcher) = new();
		let completed = Arc::new(AtomicUsize::new(0));

		for _ in 0..3 {
			let watcher = watcher.clone();
			let completed = completed.clone();
			tokio::spawn(async move {
				let release = watcher.signaled().await;
				tokio::time::sleep(std::time::Duration::from_millis(5)).await;
				completed.fetch_add(1, Ordering::SeqCst);
				drop(release);
			});
		}
		drop(watcher);

		tokio::time::timeout(std::time::Duration::from_secs(1), trigger.start_drain_and_wait())
			.await
			.expect("drain should complete");
		assert_eq!(completed.load(Ordering::SeqCst), 3);
	}
}
