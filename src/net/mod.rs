//! Wi-Fi management: station association with bounded retries and the
//! captive-portal fallback
//!
//! The manager owns the policy (credential lookup, retry budget, portal
//! state); everything that actually touches the wireless stack sits behind
//! [`WifiBackend`] so the policy is testable without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::WifiConfig;
use crate::cues::KvStore;

pub mod nmcli;

pub use nmcli::NmcliBackend;

/// Store keys inside the Wi-Fi namespace.
const SSID_KEY: &str = "ssid";
const PASS_KEY: &str = "pass";

/// Station status as reported over /api/health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStatus {
    Connected,
    Idle,
    Disconnected,
    ConnectionLost,
    SsidUnavailable,
    Unknown,
}

impl WifiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WifiStatus::Connected => "connected",
            WifiStatus::Idle => "idle",
            WifiStatus::Disconnected => "disconnected",
            WifiStatus::ConnectionLost => "connection_lost",
            WifiStatus::SsidUnavailable => "ssid_unavailable",
            WifiStatus::Unknown => "unknown",
        }
    }
}

/// One network from a scan.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NetworkInfo {
    pub ssid: String,
    pub rssi: i32,
    pub secure: bool,
}

/// Wireless stack capability. All methods take `&self`; implementations use
/// interior mutability where they need state.
#[async_trait]
pub trait WifiBackend: Send + Sync {
    /// Drop the current association, if any. Best-effort.
    async fn disconnect(&self);

    /// Associate with a network. Resolves once the attempt concludes; the
    /// manager applies its own timeout around this.
    async fn connect(&self, ssid: &str, password: Option<&str>) -> Result<()>;

    async fn status(&self) -> WifiStatus;

    async fn ip_address(&self) -> Option<String>;

    async fn current_ssid(&self) -> Option<String>;

    async fn scan(&self) -> Result<Vec<NetworkInfo>>;

    /// Bring up the fallback access point. An empty password means an open
    /// network.
    async fn start_access_point(&self, ssid: &str, password: &str) -> Result<()>;

    async fn stop_access_point(&self) -> Result<()>;
}

/// Owns Wi-Fi policy: credentials, the bounded retry loop, portal state.
pub struct WifiManager {
    backend: Box<dyn WifiBackend>,
    store: Option<Arc<dyn KvStore>>,
    config: WifiConfig,
    portal_active: AtomicBool,
}

impl WifiManager {
    pub fn new(
        backend: Box<dyn WifiBackend>,
        store: Option<Arc<dyn KvStore>>,
        config: WifiConfig,
    ) -> Self {
        Self {
            backend,
            store,
            config,
            portal_active: AtomicBool::new(false),
        }
    }

    /// Startup sequence: try the saved (or compiled-in) credentials, fall
    /// back to portal mode. Returns whether the station connected. This is
    /// the only intentionally blocking/retrying routine and runs only here.
    pub async fn start(&self) -> bool {
        let mut connected = false;

        if let Some((ssid, password)) = self.load_credentials() {
            if !ssid.is_empty() {
                connected = self.connect_with_retries(&ssid, password.as_deref()).await;
            }
        } else {
            info!("📶 No Wi-Fi credentials stored");
        }

        if !connected {
            self.start_portal().await;
        }
        connected
    }

    async fn connect_with_retries(&self, ssid: &str, password: Option<&str>) -> bool {
        info!("🔌 Connecting to network '{}'", ssid);

        for attempt in 1..=self.config.max_retries {
            self.backend.disconnect().await;
            sleep(Duration::from_millis(50)).await;

            let budget = Duration::from_millis(self.config.connect_timeout_ms);
            match timeout(budget, self.backend.connect(ssid, password)).await {
                Ok(Ok(())) => {
                    if self.backend.status().await == WifiStatus::Connected {
                        let ip = self.backend.ip_address().await.unwrap_or_default();
                        info!("✅ Connected to '{}' ({})", ssid, ip);
                        self.stop_portal().await;
                        return true;
                    }
                    warn!("⚠️  Attempt {} ended without association", attempt);
                }
                Ok(Err(e)) => warn!("⚠️  Attempt {} failed: {}", attempt, e),
                Err(_) => warn!("⚠️  Attempt {} timed out", attempt),
            }

            sleep(Duration::from_millis(200)).await;
        }

        warn!("❌ Could not join the saved network");
        false
    }

    /// Bring up the fallback access point so an operator can reach the
    /// configuration pages.
    pub async fn start_portal(&self) {
        if let Err(e) = self
            .backend
            .start_access_point(&self.config.ap_ssid, &self.config.ap_password)
            .await
        {
            warn!("❌ Secured access point failed ({}), trying an open one", e);
            if let Err(e) = self.backend.start_access_point(&self.config.ap_ssid, "").await {
                warn!("❌ Could not start the access point: {}", e);
                return;
            }
        }

        self.portal_active.store(true, Ordering::Release);
        info!("📶 Captive portal active (SSID: {})", self.config.ap_ssid);
    }

    async fn stop_portal(&self) {
        if self.portal_active.swap(false, Ordering::AcqRel) {
            if let Err(e) = self.backend.stop_access_point().await {
                warn!("⚠️  Failed to stop the access point: {}", e);
            }
            info!("📴 Captive portal disabled");
        }
    }

    pub fn is_portal_active(&self) -> bool {
        self.portal_active.load(Ordering::Acquire)
    }

    /// Saved credentials take precedence; the compiled-in config is the
    /// fallback for first boots.
    pub fn load_credentials(&self) -> Option<(String, Option<String>)> {
        if let Some(store) = &self.store {
            if let Some(ssid) = store.load(SSID_KEY).filter(|s| !s.is_empty()) {
                return Some((ssid, store.load(PASS_KEY)));
            }
        }
        self.config
            .ssid
            .clone()
            .filter(|s| !s.is_empty())
            .map(|ssid| (ssid, self.config.password.clone()))
    }

    pub fn save_credentials(&self, ssid: &str, password: &str) -> bool {
        let Some(store) = &self.store else {
            warn!("⚠️  No store available, cannot save Wi-Fi credentials");
            return false;
        };
        let ok = store.save(SSID_KEY, ssid) && store.save(PASS_KEY, password);
        if ok {
            info!("💾 Wi-Fi credentials saved for '{}'", ssid);
        }
        ok
    }

    pub fn forget_credentials(&self) {
        if let Some(store) = &self.store {
            store.remove(SSID_KEY);
            store.remove(PASS_KEY);
            info!("🧹 Wi-Fi credentials forgotten");
        }
    }

    pub async fn status(&self) -> WifiStatus {
        self.backend.status().await
    }

    pub async fn ip_address(&self) -> Option<String> {
        self.backend.ip_address().await
    }

    pub async fn current_ssid(&self) -> Option<String> {
        self.backend.current_ssid().await
    }

    pub async fn scan(&self) -> Result<Vec<NetworkInfo>> {
        self.backend.scan().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    #[derive(Clone)]
    struct MockBackend {
        connect_attempts: Arc<AtomicU32>,
        /// Attempt number (1-based) that succeeds; 0 means never.
        succeed_on: u32,
        ap_started: Arc<AtomicBool>,
        ap_stopped: Arc<AtomicBool>,
    }

    impl MockBackend {
        fn succeeding_on(attempt: u32) -> Self {
            Self {
                connect_attempts: Arc::new(AtomicU32::new(0)),
                succeed_on: attempt,
                ap_started: Arc::new(AtomicBool::new(false)),
                ap_stopped: Arc::new(AtomicBool::new(false)),
            }
        }

        fn never_connecting() -> Self {
            Self::succeeding_on(0)
        }
    }

    #[async_trait]
    impl WifiBackend for MockBackend {
        async fn disconnect(&self) {}

        async fn connect(&self, _ssid: &str, _password: Option<&str>) -> Result<()> {
            let n = self.connect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if self.succeed_on != 0 && n >= self.succeed_on {
                Ok(())
            } else {
                anyhow::bail!("association rejected")
            }
        }

        async fn status(&self) -> WifiStatus {
            let n = self.connect_attempts.load(Ordering::SeqCst);
            if self.succeed_on != 0 && n >= self.succeed_on {
                WifiStatus::Connected
            } else {
                WifiStatus::Disconnected
            }
        }

        async fn ip_address(&self) -> Option<String> {
            Some("192.168.1.50".to_string())
        }

        async fn current_ssid(&self) -> Option<String> {
            Some("venue-wifi".to_string())
        }

        async fn scan(&self) -> Result<Vec<NetworkInfo>> {
            Ok(vec![NetworkInfo {
                ssid: "venue-wifi".to_string(),
                rssi: -55,
                secure: true,
            }])
        }

        async fn start_access_point(&self, _ssid: &str, _password: &str) -> Result<()> {
            self.ap_started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_access_point(&self) -> Result<()> {
            self.ap_stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        map: Mutex<HashMap<String, String>>,
    }

    impl MemoryStore {
        fn with_credentials(ssid: &str, pass: &str) -> Self {
            let store = Self::default();
            store.map.lock().insert(SSID_KEY.to_string(), ssid.to_string());
            store.map.lock().insert(PASS_KEY.to_string(), pass.to_string());
            store
        }
    }

    impl KvStore for MemoryStore {
        fn load(&self, key: &str) -> Option<String> {
            self.map.lock().get(key).cloned()
        }

        fn save(&self, key: &str, value: &str) -> bool {
            self.map.lock().insert(key.to_string(), value.to_string());
            true
        }

        fn remove(&self, key: &str) -> bool {
            self.map.lock().remove(key);
            true
        }
    }

    fn test_config() -> WifiConfig {
        WifiConfig {
            connect_timeout_ms: 100,
            max_retries: 3,
            ..WifiConfig::default()
        }
    }

    #[tokio::test]
    async fn no_credentials_starts_portal() {
        let backend = MockBackend::never_connecting();
        let manager = WifiManager::new(Box::new(backend.clone()), None, test_config());

        assert!(!manager.start().await);
        assert!(manager.is_portal_active());
        assert!(backend.ap_started.load(Ordering::SeqCst));
        assert_eq!(backend.connect_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stored_credentials_connect_first_try() {
        let backend = MockBackend::succeeding_on(1);
        let store = Arc::new(MemoryStore::with_credentials("venue-wifi", "secret"));
        let manager = WifiManager::new(Box::new(backend.clone()), Some(store), test_config());

        assert!(manager.start().await);
        assert!(!manager.is_portal_active());
        assert_eq!(backend.connect_attempts.load(Ordering::SeqCst), 1);
        assert!(!backend.ap_started.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn retries_are_bounded_then_portal() {
        let backend = MockBackend::never_connecting();
        let store = Arc::new(MemoryStore::with_credentials("venue-wifi", "secret"));
        let manager = WifiManager::new(Box::new(backend.clone()), Some(store), test_config());

        assert!(!manager.start().await);
        assert_eq!(backend.connect_attempts.load(Ordering::SeqCst), 3);
        assert!(manager.is_portal_active());
    }

    #[tokio::test]
    async fn second_attempt_can_succeed() {
        let backend = MockBackend::succeeding_on(2);
        let store = Arc::new(MemoryStore::with_credentials("venue-wifi", "secret"));
        let manager = WifiManager::new(Box::new(backend.clone()), Some(store), test_config());

        assert!(manager.start().await);
        assert_eq!(backend.connect_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn config_credentials_are_the_fallback() {
        let backend = MockBackend::succeeding_on(1);
        let mut config = test_config();
        config.ssid = Some("compiled-in".to_string());
        config.password = Some("pw".to_string());
        let manager = WifiManager::new(Box::new(backend), None, config);

        assert_eq!(
            manager.load_credentials(),
            Some(("compiled-in".to_string(), Some("pw".to_string())))
        );
        assert!(manager.start().await);
    }

    #[tokio::test]
    async fn save_and_forget_credentials() {
        let backend = MockBackend::never_connecting();
        let store = Arc::new(MemoryStore::default());
        let manager = WifiManager::new(Box::new(backend), Some(store), test_config());

        assert!(manager.save_credentials("venue-wifi", "secret"));
        assert_eq!(
            manager.load_credentials(),
            Some(("venue-wifi".to_string(), Some("secret".to_string())))
        );

        manager.forget_credentials();
        assert_eq!(manager.load_credentials(), None);
    }
}
