//! In-memory backend: a shared service registry for tests and examples.
//!
//! Advertisers and browsers created from the same backend see each other,
//! which makes full register/watch round trips possible without touching
//! the network. Failure injection and request counters cover the paths the
//! lifecycle manager must tolerate.

use async_channel::{Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use zconf_core::record::ServiceRecord;

use super::{
    AdvertiseHandle, AdvertiseUpdate, BackendError, BackendResult, BrowseHandle, BrowseUpdate,
    NsdBackend, ResolveUpdate,
};

struct AdvertiserState {
    key: String,
    record: ServiceRecord,
    updates: Sender<AdvertiseUpdate>,
}

struct BrowserState {
    service_type: String,
    updates: Sender<BrowseUpdate>,
}

struct Inner {
    next_handle: AtomicU64,
    /// Registration key -> currently published record
    published: DashMap<String, ServiceRecord>,
    advertisers: DashMap<u64, AdvertiserState>,
    browsers: DashMap<u64, BrowserState>,
    /// Instance name -> scripted resolve failure reason
    resolve_failures: DashMap<String, String>,
    advertise_starts: AtomicU64,
    advertise_stops: AtomicU64,
    browse_starts: AtomicU64,
    browse_stops: AtomicU64,
    fail_stop_advertise: AtomicBool,
    fail_stop_browse: AtomicBool,
    next_advertise_error: Mutex<Option<BackendError>>,
    next_browse_error: Mutex<Option<BackendError>>,
}

/// Shared in-memory service registry
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_handle: AtomicU64::new(1),
                published: DashMap::new(),
                advertisers: DashMap::new(),
                browsers: DashMap::new(),
                resolve_failures: DashMap::new(),
                advertise_starts: AtomicU64::new(0),
                advertise_stops: AtomicU64::new(0),
                browse_starts: AtomicU64::new(0),
                browse_stops: AtomicU64::new(0),
                fail_stop_advertise: AtomicBool::new(false),
                fail_stop_browse: AtomicBool::new(false),
                next_advertise_error: Mutex::new(None),
                next_browse_error: Mutex::new(None),
            }),
        }
    }

    /// Pushes a found sighting into every browse session watching this
    /// record's type, as if the network had reported it.
    pub fn announce_found(&self, record: &ServiceRecord) {
        self.notify_browsers(&record.service_type, BrowseUpdate::Found(record.clone()));
    }

    /// Pushes a lost sighting into every browse session watching this
    /// record's type.
    pub fn announce_lost(&self, record: &ServiceRecord) {
        self.notify_browsers(&record.service_type, BrowseUpdate::Lost(record.clone()));
    }

    /// Scripts the next `start_advertise` call to fail with `error`.
    pub fn fail_next_advertise(&self, error: BackendError) {
        *self.inner.next_advertise_error.lock() = Some(error);
    }

    /// Scripts the next `start_browse` call to fail with `error`.
    pub fn fail_next_browse(&self, error: BackendError) {
        *self.inner.next_browse_error.lock() = Some(error);
    }

    /// Makes every `stop_advertise` call fail while enabled.
    pub fn fail_stop_advertise(&self, enabled: bool) {
        self.inner.fail_stop_advertise.store(enabled, Ordering::SeqCst);
    }

    /// Makes every `stop_browse` call fail while enabled.
    pub fn fail_stop_browse(&self, enabled: bool) {
        self.inner.fail_stop_browse.store(enabled, Ordering::SeqCst);
    }

    /// Scripts resolution of the named instance to fail.
    pub fn set_resolve_failure(&self, name: &str, reason: &str) {
        self.inner
            .resolve_failures
            .insert(name.to_string(), reason.to_string());
    }

    pub fn advertise_starts(&self) -> u64 {
        self.inner.advertise_starts.load(Ordering::SeqCst)
    }

    pub fn advertise_stops(&self) -> u64 {
        self.inner.advertise_stops.load(Ordering::SeqCst)
    }

    pub fn browse_starts(&self) -> u64 {
        self.inner.browse_starts.load(Ordering::SeqCst)
    }

    pub fn browse_stops(&self) -> u64 {
        self.inner.browse_stops.load(Ordering::SeqCst)
    }

    pub fn published_count(&self) -> usize {
        self.inner.published.len()
    }

    fn notify_browsers(&self, service_type: &str, update: BrowseUpdate) {
        for browser in self.inner.browsers.iter() {
            if types_match(&browser.service_type, service_type) {
                let _ = browser.updates.try_send(update.clone());
            }
        }
    }

    fn next_handle(&self) -> u64 {
        self.inner.next_handle.fetch_add(1, Ordering::SeqCst)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Service types compare equal regardless of surrounding dots.
fn types_match(a: &str, b: &str) -> bool {
    a.trim_matches('.') == b.trim_matches('.')
}

impl NsdBackend for MemoryBackend {
    fn start_advertise(
        &self,
        record: &ServiceRecord,
    ) -> BackendResult<(AdvertiseHandle, Receiver<AdvertiseUpdate>)> {
        if let Some(error) = self.inner.next_advertise_error.lock().take() {
            return Err(error);
        }

        self.inner.advertise_starts.fetch_add(1, Ordering::SeqCst);
        let id = self.next_handle();
        let key = record.registration_key();
        let (tx, rx) = async_channel::unbounded();

        let _ = tx.try_send(AdvertiseUpdate::Registered(record.clone()));
        self.inner.published.insert(key.clone(), record.clone());
        self.inner.advertisers.insert(
            id,
            AdvertiserState {
                key,
                record: record.clone(),
                updates: tx,
            },
        );
        self.notify_browsers(&record.service_type, BrowseUpdate::Found(record.clone()));

        Ok((AdvertiseHandle(id), rx))
    }

    fn stop_advertise(&self, handle: AdvertiseHandle) -> BackendResult<()> {
        self.inner.advertise_stops.fetch_add(1, Ordering::SeqCst);

        if self.inner.fail_stop_advertise.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected(
                "stop_advertise failure injected".to_string(),
            ));
        }

        if let Some((_, advertiser)) = self.inner.advertisers.remove(&handle.0) {
            self.inner.published.remove(&advertiser.key);
            let _ = advertiser.updates.try_send(AdvertiseUpdate::Unregistered);
            self.notify_browsers(
                &advertiser.record.service_type,
                BrowseUpdate::Lost(advertiser.record.clone()),
            );
        } else {
            debug!(handle = handle.0, "stop_advertise for unknown handle");
        }

        Ok(())
    }

    fn start_browse(
        &self,
        service_type: &str,
    ) -> BackendResult<(BrowseHandle, Receiver<BrowseUpdate>)> {
        if let Some(error) = self.inner.next_browse_error.lock().take() {
            return Err(error);
        }

        self.inner.browse_starts.fetch_add(1, Ordering::SeqCst);
        let id = self.next_handle();
        let (tx, rx) = async_channel::unbounded();

        // Replay what is already published, the way a browse picks up
        // existing advertisements.
        for entry in self.inner.published.iter() {
            if types_match(&entry.service_type, service_type) {
                let _ = tx.try_send(BrowseUpdate::Found(entry.clone()));
            }
        }

        self.inner.browsers.insert(
            id,
            BrowserState {
                service_type: service_type.to_string(),
                updates: tx,
            },
        );

        Ok((BrowseHandle(id), rx))
    }

    fn stop_browse(&self, handle: BrowseHandle) -> BackendResult<()> {
        self.inner.browse_stops.fetch_add(1, Ordering::SeqCst);

        if self.inner.fail_stop_browse.load(Ordering::SeqCst) {
            return Err(BackendError::Rejected(
                "stop_browse failure injected".to_string(),
            ));
        }

        // Dropping the sender closes the session's update channel.
        self.inner.browsers.remove(&handle.0);
        Ok(())
    }

    fn start_resolve(&self, record: &ServiceRecord) -> BackendResult<Receiver<ResolveUpdate>> {
        let (tx, rx) = async_channel::unbounded();

        if let Some(reason) = self.inner.resolve_failures.get(&record.name) {
            let _ = tx.try_send(ResolveUpdate::Failed(reason.clone()));
            return Ok(rx);
        }

        // Resolve from the registry when the instance is published there,
        // otherwise echo the sighting back as-is.
        let resolved = self
            .inner
            .published
            .iter()
            .find(|entry| {
                entry.name == record.name && types_match(&entry.service_type, &record.service_type)
            })
            .map(|entry| entry.clone())
            .unwrap_or_else(|| record.clone());

        let _ = tx.try_send(ResolveUpdate::Resolved(resolved));
        Ok(rx)
    }
}
