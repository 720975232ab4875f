//! Backend adapter over the `mdns-sd` service daemon.
//!
//! `mdns-sd` resolves services on its own as part of browsing, so this
//! adapter reports a partial `Found` when an instance is first sighted and
//! feeds the eventual `ServiceResolved` into a cache that `start_resolve`
//! completes from. No timeout applies; a service the daemon never resolves
//! never produces a verdict.

use async_channel::{Receiver, Sender};
use dashmap::DashMap;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo, UnregisterStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use zconf_core::record::ServiceRecord;

use super::{
    AdvertiseHandle, AdvertiseUpdate, BackendError, BackendResult, BrowseHandle, BrowseUpdate,
    NsdBackend, ResolveUpdate,
};

struct AdvertisedService {
    fullname: String,
    updates: Sender<AdvertiseUpdate>,
}

struct State {
    next_handle: AtomicU64,
    advertised: DashMap<u64, AdvertisedService>,
    /// Browse handle -> full service type string passed to the daemon
    browses: DashMap<u64, String>,
    browse_tasks: DashMap<u64, JoinHandle<()>>,
    /// Fullname -> last resolved record seen by any browse session
    resolved: DashMap<String, ServiceRecord>,
    resolved_notify: Notify,
}

/// DNS-SD engine backed by `mdns_sd::ServiceDaemon`
pub struct MdnsSdBackend {
    daemon: ServiceDaemon,
    state: Arc<State>,
}

impl MdnsSdBackend {
    pub fn new() -> BackendResult<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| BackendError::Unavailable(format!("failed to create mDNS daemon: {e}")))?;

        Ok(Self {
            daemon,
            state: Arc::new(State {
                next_handle: AtomicU64::new(1),
                advertised: DashMap::new(),
                browses: DashMap::new(),
                browse_tasks: DashMap::new(),
                resolved: DashMap::new(),
                resolved_notify: Notify::new(),
            }),
        })
    }

    /// Shuts the daemon down. Outstanding sessions are dropped by the daemon
    /// itself; their channels close as a consequence.
    pub fn shutdown(&self) {
        for entry in self.state.browse_tasks.iter() {
            entry.value().abort();
        }
        self.state.browse_tasks.clear();

        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "mDNS daemon shutdown failed");
        }
    }

    fn next_handle(&self) -> u64 {
        self.state.next_handle.fetch_add(1, Ordering::SeqCst)
    }
}

/// `_http._tcp.` as callers pass it -> `_http._tcp.local.` as the daemon
/// expects it.
fn full_browse_type(service_type: &str) -> String {
    format!("{}.local.", service_type.trim_matches('.'))
}

fn instance_name(fullname: &str, full_type: &str) -> String {
    fullname
        .strip_suffix(&format!(".{full_type}"))
        .unwrap_or(fullname)
        .to_string()
}

fn record_from_info(info: &ServiceInfo) -> ServiceRecord {
    let full_type = info.get_type();
    let (service_type, domain) = match full_type.strip_suffix("local.") {
        Some(prefix) => (prefix.to_string(), "local.".to_string()),
        None => (full_type.to_string(), String::new()),
    };

    let mut record = ServiceRecord::new(
        service_type,
        domain,
        instance_name(info.get_fullname(), full_type),
        info.get_port(),
    );
    record.hostname = Some(info.get_hostname().to_string());
    record.addresses = info.get_addresses().iter().copied().collect();
    for prop in info.get_properties().iter() {
        record
            .txt
            .insert(prop.key().to_string(), prop.val_str().to_string());
    }
    record
}

impl NsdBackend for MdnsSdBackend {
    fn start_advertise(
        &self,
        record: &ServiceRecord,
    ) -> BackendResult<(AdvertiseHandle, Receiver<AdvertiseUpdate>)> {
        let type_domain = record.type_with_domain();
        let host = record.hostname.clone().unwrap_or_default();
        let addresses = record
            .addresses
            .iter()
            .map(|addr| addr.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let info = ServiceInfo::new(
            &type_domain,
            &record.name,
            &host,
            addresses.as_str(),
            record.port,
            record.txt.clone(),
        )
        .map_err(|e| BackendError::Rejected(format!("invalid service info: {e}")))?;

        let fullname = info.get_fullname().to_string();
        self.daemon
            .register(info)
            .map_err(|e| BackendError::Rejected(format!("register failed: {e}")))?;

        let (tx, rx) = async_channel::unbounded();
        // mdns-sd reports registration failures through its own logging;
        // a successful register call is the positive signal we get.
        let _ = tx.try_send(AdvertiseUpdate::Registered(record.clone()));

        let id = self.next_handle();
        self.state.advertised.insert(
            id,
            AdvertisedService {
                fullname,
                updates: tx,
            },
        );

        Ok((AdvertiseHandle(id), rx))
    }

    fn stop_advertise(&self, handle: AdvertiseHandle) -> BackendResult<()> {
        let Some((_, advertised)) = self.state.advertised.remove(&handle.0) else {
            debug!(handle = handle.0, "stop_advertise for unknown handle");
            return Ok(());
        };

        let receiver = self
            .daemon
            .unregister(&advertised.fullname)
            .map_err(|e| BackendError::Rejected(format!("unregister failed: {e}")))?;

        let updates = advertised.updates;
        let fullname = advertised.fullname;
        tokio::spawn(async move {
            match receiver.recv_async().await {
                Ok(UnregisterStatus::OK) => {
                    let _ = updates.try_send(AdvertiseUpdate::Unregistered);
                }
                Ok(UnregisterStatus::NotFound) => {
                    let _ = updates.try_send(AdvertiseUpdate::UnregistrationFailed(format!(
                        "{fullname} was not registered"
                    )));
                }
                Err(e) => {
                    error!(service = fullname, error = %e, "unregister status channel failed");
                }
            }
        });

        Ok(())
    }

    fn start_browse(
        &self,
        service_type: &str,
    ) -> BackendResult<(BrowseHandle, Receiver<BrowseUpdate>)> {
        let full_type = full_browse_type(service_type);
        let receiver = self
            .daemon
            .browse(&full_type)
            .map_err(|e| BackendError::Rejected(format!("browse failed: {e}")))?;

        let (tx, rx) = async_channel::unbounded();
        let id = self.next_handle();
        let state = self.state.clone();
        let reported_type = service_type.to_string();
        let browse_type = full_type.clone();

        let task = tokio::spawn(async move {
            loop {
                match receiver.recv_async().await {
                    Ok(ServiceEvent::ServiceFound(_, fullname)) => {
                        let record = ServiceRecord::new(
                            reported_type.clone(),
                            "local.",
                            instance_name(&fullname, &browse_type),
                            0,
                        );
                        if tx.send(BrowseUpdate::Found(record)).await.is_err() {
                            break;
                        }
                    }
                    Ok(ServiceEvent::ServiceResolved(info)) => {
                        let record = record_from_info(&info);
                        state
                            .resolved
                            .insert(info.get_fullname().to_string(), record);
                        state.resolved_notify.notify_waiters();
                    }
                    Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                        let record = match state.resolved.remove(&fullname) {
                            Some((_, resolved)) => resolved,
                            None => ServiceRecord::new(
                                reported_type.clone(),
                                "local.",
                                instance_name(&fullname, &browse_type),
                                0,
                            ),
                        };
                        if tx.send(BrowseUpdate::Lost(record)).await.is_err() {
                            break;
                        }
                    }
                    Ok(other) => {
                        debug!(event = ?other, "ignoring browse event");
                    }
                    Err(e) => {
                        debug!(service_type = browse_type, error = %e, "browse channel closed");
                        break;
                    }
                }
            }
        });

        self.state.browses.insert(id, full_type);
        self.state.browse_tasks.insert(id, task);

        Ok((BrowseHandle(id), rx))
    }

    fn stop_browse(&self, handle: BrowseHandle) -> BackendResult<()> {
        let Some((_, full_type)) = self.state.browses.remove(&handle.0) else {
            debug!(handle = handle.0, "stop_browse for unknown handle");
            return Ok(());
        };

        let result = self
            .daemon
            .stop_browse(&full_type)
            .map_err(|e| BackendError::Rejected(format!("stop browse failed: {e}")));

        if let Some((_, task)) = self.state.browse_tasks.remove(&handle.0) {
            task.abort();
        }

        result
    }

    fn start_resolve(&self, record: &ServiceRecord) -> BackendResult<Receiver<ResolveUpdate>> {
        let (tx, rx) = async_channel::unbounded();
        tokio::spawn(await_resolution(self.state.clone(), record.fullname(), tx));
        Ok(rx)
    }
}

/// Waits for the browse loop to cache a resolution for `fullname` and
/// forwards it. Wakes periodically in addition to cache notifications so
/// the task also exits once the caller has dropped the receiver.
async fn await_resolution(state: Arc<State>, fullname: String, tx: Sender<ResolveUpdate>) {
    loop {
        let notified = state.resolved_notify.notified();
        if let Some(resolved) = state.resolved.get(&fullname) {
            let _ = tx.try_send(ResolveUpdate::Resolved(resolved.clone()));
            break;
        }
        if tx.is_closed() {
            break;
        }
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
        }
    }
}
