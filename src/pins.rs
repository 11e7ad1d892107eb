use crate::catalog::StopCatalog;
use crate::models::Stop;
use crate::persistence;
use crate::state::StoreEvent;

use compact_str::CompactString;
use std::path::PathBuf;
use tokio::sync::{RwLock, broadcast};
use tracing::warn;

/// User-pinned stop codes, in pin order.
pub struct PinStore {
    codes: RwLock<Vec<CompactString>>,
    data_dir: PathBuf,
    events: broadcast::Sender<StoreEvent>,
}

impl PinStore {
    /// Loads the saved pins; an unreadable file starts empty.
    pub fn open(data_dir: impl Into<PathBuf>, events: broadcast::Sender<StoreEvent>) -> Self {
        let data_dir = data_dir.into();
        let codes = persistence::load_pins(&data_dir).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load pinned stops");
            Vec::new()
        });
        Self {
            codes: RwLock::new(codes),
            data_dir,
            events,
        }
    }

    pub async fn is_pinned(&self, code: &str) -> bool {
        self.codes.read().await.iter().any(|c| c == code)
    }

    pub async fn codes(&self) -> Vec<CompactString> {
        self.codes.read().await.clone()
    }

    /// No-op when already pinned.
    pub async fn pin(&self, stop: &Stop) {
        let mut codes = self.codes.write().await;
        if codes.contains(&stop.code) {
            return;
        }
        codes.push(stop.code.clone());
        self.save(&codes).await;
    }

    /// No-op when not pinned.
    pub async fn unpin(&self, stop: &Stop) {
        let mut codes = self.codes.write().await;
        let before = codes.len();
        codes.retain(|c| *c != stop.code);
        if codes.len() != before {
            self.save(&codes).await;
        }
    }

    /// Returns whether the stop is pinned afterwards.
    pub async fn toggle(&self, stop: &Stop) -> bool {
        if self.is_pinned(&stop.code).await {
            self.unpin(stop).await;
            false
        } else {
            self.pin(stop).await;
            true
        }
    }

    /// Pinned stops in pin order. Codes missing from the catalog are skipped.
    pub async fn pinned_stops(&self, catalog: &StopCatalog) -> Vec<Stop> {
        self.codes
            .read()
            .await
            .iter()
            .filter_map(|code| catalog.get(code).cloned())
            .collect()
    }

    async fn save(&self, codes: &[CompactString]) {
        let snapshot = codes.to_vec();
        let dir = self.data_dir.clone();
        match tokio::task::spawn_blocking(move || persistence::save_pins(&snapshot, &dir)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to save pinned stops"),
            Err(e) => warn!(error = %e, "Pin save task failed"),
        }
        let _ = self.events.send(StoreEvent::PinsChanged);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::stop;
    use chrono::Utc;

    fn open(dir: &std::path::Path) -> PinStore {
        let (tx, _) = broadcast::channel(16);
        PinStore::open(dir, tx)
    }

    #[tokio::test]
    async fn test_pin_is_idempotent_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let pins = open(dir.path());
        let a = stop("01012", 1.0, 1.0);

        pins.pin(&a).await;
        pins.pin(&a).await;

        assert!(pins.is_pinned("01012").await);
        assert_eq!(pins.codes().await.len(), 1);
        assert_eq!(persistence::load_pins(dir.path()).unwrap(), vec![a.code.clone()]);
    }

    #[tokio::test]
    async fn test_unpin_restores_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let pins = open(dir.path());
        let a = stop("1", 0.0, 0.0);
        let b = stop("2", 0.0, 0.0);
        pins.pin(&a).await;
        let before = pins.codes().await;

        pins.pin(&b).await;
        pins.unpin(&b).await;
        pins.unpin(&b).await;

        assert_eq!(pins.codes().await, before);
    }

    #[tokio::test]
    async fn test_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let pins = open(dir.path());
        let a = stop("1", 0.0, 0.0);
        assert!(pins.toggle(&a).await);
        assert!(!pins.toggle(&a).await);
        assert!(!pins.is_pinned("1").await);
    }

    #[tokio::test]
    async fn test_pins_survive_reopen_in_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let pins = open(dir.path());
            pins.pin(&stop("30", 0.0, 0.0)).await;
            pins.pin(&stop("10", 0.0, 0.0)).await;
        }
        let reopened = open(dir.path());
        let codes: Vec<String> = reopened.codes().await.iter().map(|c| c.to_string()).collect();
        assert_eq!(codes, vec!["30", "10"]);
    }

    #[tokio::test]
    async fn test_pinned_stops_drop_unknown_codes() {
        let dir = tempfile::tempdir().unwrap();
        let pins = open(dir.path());
        pins.pin(&stop("2", 0.0, 0.0)).await;
        pins.pin(&stop("gone", 0.0, 0.0)).await;
        pins.pin(&stop("1", 0.0, 0.0)).await;

        let catalog = StopCatalog::from_stops(vec![stop("1", 0.0, 0.0), stop("2", 1.0, 1.0)], Utc::now());
        let resolved: Vec<String> = pins
            .pinned_stops(&catalog)
            .await
            .into_iter()
            .map(|s| s.code.to_string())
            .collect();

        assert_eq!(resolved, vec!["2", "1"]);
    }
}
