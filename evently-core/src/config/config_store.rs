//! Settings replaced at runtime by a SIGHUP reload.
//!
//! The current value sits in a `watch` channel as an `Arc<T>`. The
//! dispatcher takes one snapshot per notification and the scheduler holds a
//! [`ConfigWatcher`] to retime its sweep interval, so neither ever sees a
//! half-applied reload.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared, reloadable settings. Clones share the same value.
pub struct ConfigStore<T> {
    tx: Arc<watch::Sender<Arc<T>>>,
}

/// Follows the updates of one [`ConfigStore`].
pub struct ConfigWatcher<T> {
    rx: watch::Receiver<Arc<T>>,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Replace the value and wake every watcher.
    pub fn update(&self, value: T) {
        self.tx.send_replace(Arc::new(value));
    }

    /// The value in effect right now.
    pub fn snapshot(&self) -> Arc<T> {
        self.tx.borrow().clone()
    }

    /// A watcher that has already seen the current value.
    pub fn subscribe(&self) -> ConfigWatcher<T> {
        ConfigWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            tx: Arc::clone(&self.tx),
        }
    }
}

impl<T> ConfigWatcher<T> {
    /// The latest value, marking it seen.
    pub fn current(&mut self) -> Arc<T> {
        self.rx.borrow_and_update().clone()
    }

    /// Wait for the next update and return it.
    ///
    /// Returns `None` once every [`ConfigStore`] clone has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<T>> {
        self.rx.changed().await.ok()?;
        Some(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationTemplates;

    #[tokio::test]
    async fn test_reload_reaches_watchers_and_snapshots() {
        let templates = ConfigStore::new(NotificationTemplates::default());
        let mut watcher = templates.subscribe();
        let before = templates.snapshot();

        templates.clone().update(NotificationTemplates {
            winners_title: "Tickets are yours".to_string(),
            ..Default::default()
        });

        let Some(updated) = watcher.changed().await else {
            panic!("store dropped");
        };
        assert_eq!(updated.winners_title, "Tickets are yours");
        assert_eq!(templates.snapshot().winners_title, "Tickets are yours");
        // A snapshot taken before the reload keeps the old text.
        assert_eq!(before.winners_title, NotificationTemplates::default().winners_title);
    }

    #[tokio::test]
    async fn test_watcher_only_wakes_for_new_values() {
        let store = ConfigStore::new(1u32);
        store.update(2);
        let mut watcher = store.subscribe();
        assert_eq!(*watcher.current(), 2);

        store.update(3);
        assert_eq!(watcher.changed().await.as_deref(), Some(&3));
    }

    #[tokio::test]
    async fn test_watcher_ends_after_store_dropped() {
        let store = ConfigStore::new(());
        let mut watcher = store.subscribe();
        drop(store);
        assert!(watcher.changed().await.is_none());
    }
}
