//! Mount table for no-device filesystem instances.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use spin::Mutex;

use super::DevId;
use crate::error::{WrapfsError, WrapfsResult};

/// First device number handed to anonymous superblocks (major 0).
const ANON_DEV_BASE: DevId = 0x100;

enum MountSlot<S> {
    /// Reserved by an in-flight mount.
    Mounting,
    Mounted(Arc<S>),
}

/// Mounted instances keyed by target path.
///
/// A target is reserved for the whole duration of a mount attempt, so two
/// attempts on one target never run their fill step concurrently; the table
/// lock itself is not held while filling.
pub struct MountTable<S> {
    mounts: Mutex<BTreeMap<String, MountSlot<S>>>,
    next_anon_dev: AtomicU32,
}

impl<S> Default for MountTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> core::fmt::Debug for MountTable<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MountTable")
            .field("mounts", &self.mounts.lock().len())
            .finish()
    }
}

impl<S> MountTable<S> {
    pub fn new() -> Self {
        Self {
            mounts: Mutex::new(BTreeMap::new()),
            next_anon_dev: AtomicU32::new(ANON_DEV_BASE),
        }
    }

    /// Mount an instance that has no backing device of its own.
    ///
    /// `fill` receives a fresh anonymous device number and builds the
    /// instance. Only a successfully filled instance becomes visible.
    ///
    /// Device numbers are never reused, including those of failed attempts;
    /// once the number space is used up every mount fails with
    /// `DevicesExhausted`.
    pub fn mount_nodev<F>(&self, target: &str, fill: F) -> WrapfsResult<Arc<S>>
    where
        F: FnOnce(DevId) -> WrapfsResult<S>,
    {
        let target = normalize_target(target)?;
        let reservation = self.reserve(target)?;
        let s_dev = self
            .next_anon_dev
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |dev| dev.checked_add(1))
            .map_err(|_| WrapfsError::DevicesExhausted)?;
        let instance = Arc::new(fill(s_dev)?);
        reservation.commit(instance.clone());
        Ok(instance)
    }

    /// Detach the instance mounted at `target` and hand it back.
    pub fn umount(&self, target: &str) -> WrapfsResult<Arc<S>> {
        let target = normalize_target(target)?;
        let mut mounts = self.mounts.lock();
        if matches!(mounts.get(&target), Some(MountSlot::Mounting)) {
            return Err(WrapfsError::Busy(target));
        }
        match mounts.remove(&target) {
            Some(MountSlot::Mounted(instance)) => {
                debug!("mount table: detached {}", target);
                Ok(instance)
            }
            _ => Err(WrapfsError::NotMounted(target)),
        }
    }

    pub fn get(&self, target: &str) -> Option<Arc<S>> {
        let target = normalize_target(target).ok()?;
        match self.mounts.lock().get(&target) {
            Some(MountSlot::Mounted(instance)) => Some(instance.clone()),
            _ => None,
        }
    }

    /// Targets with a completed mount.
    pub fn targets(&self) -> Vec<String> {
        self.mounts
            .lock()
            .iter()
            .filter(|(_, slot)| matches!(slot, MountSlot::Mounted(_)))
            .map(|(target, _)| target.clone())
            .collect()
    }

    fn reserve(&self, target: String) -> WrapfsResult<Reservation<'_, S>> {
        let mut mounts = self.mounts.lock();
        if mounts.contains_key(&target) {
            return Err(WrapfsError::Busy(target));
        }
        mounts.insert(target.clone(), MountSlot::Mounting);
        Ok(Reservation {
            table: self,
            target: Some(target),
        })
    }
}

/// A reserved target; dropped without commit, the reservation is cleared.
struct Reservation<'a, S> {
    table: &'a MountTable<S>,
    target: Option<String>,
}

impl<S> Reservation<'_, S> {
    fn commit(mut self, instance: Arc<S>) {
        if let Some(target) = self.target.take() {
            debug!("mount table: attached {}", target);
            self.table
                .mounts
                .lock()
                .insert(target, MountSlot::Mounted(instance));
        }
    }
}

impl<S> Drop for Reservation<'_, S> {
    fn drop(&mut self) {
        if let Some(target) = self.target.take() {
            self.table.mounts.lock().remove(&target);
        }
    }
}

fn normalize_target(target: &str) -> WrapfsResult<String> {
    if !target.starts_with('/') {
        return Err(WrapfsError::InvalidPath(target.to_string()));
    }
    let trimmed = target.trim_end_matches('/');
    if trimmed.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_fill_leaves_no_trace() {
        let table: MountTable<u32> = MountTable::new();
        let err = table
            .mount_nodev("/mnt", |_| Err(WrapfsError::OutOfMemory))
            .unwrap_err();
        assert_eq!(err, WrapfsError::OutOfMemory);
        assert!(table.targets().is_empty());
        assert!(table.mount_nodev("/mnt", |dev| Ok(dev)).is_ok());
    }

    #[test]
    fn test_busy_target_rejected() {
        let table: MountTable<u32> = MountTable::new();
        table.mount_nodev("/mnt/", |dev| Ok(dev)).unwrap();
        let err = table.mount_nodev("/mnt", |dev| Ok(dev)).unwrap_err();
        assert!(matches!(err, WrapfsError::Busy(_)));
    }

    #[test]
    fn test_target_busy_while_filling() {
        let table: MountTable<u32> = MountTable::new();
        table
            .mount_nodev("/mnt", |dev| {
                assert!(matches!(
                    table.mount_nodev("/mnt", |d| Ok(d)),
                    Err(WrapfsError::Busy(_))
                ));
                assert!(matches!(table.umount("/mnt"), Err(WrapfsError::Busy(_))));
                Ok(dev)
            })
            .unwrap();
        assert_eq!(table.targets(), ["/mnt".to_string()]);
    }

    #[test]
    fn test_anonymous_devices_are_distinct() {
        let table: MountTable<u32> = MountTable::new();
        let a = table.mount_nodev("/a", |dev| Ok(dev)).unwrap();
        let b = table.mount_nodev("/b", |dev| Ok(dev)).unwrap();
        assert_ne!(*a, *b);
        assert!(*a >= ANON_DEV_BASE);
    }

    #[test]
    fn test_device_numbers_do_not_wrap() {
        let table: MountTable<u32> = MountTable::new();
        table.next_anon_dev.store(u32::MAX - 1, Ordering::SeqCst);
        let last = table.mount_nodev("/a", |dev| Ok(dev)).unwrap();
        assert_eq!(*last, u32::MAX - 1);

        let err = table.mount_nodev("/b", |dev| Ok(dev)).unwrap_err();
        assert_eq!(err, WrapfsError::DevicesExhausted);
        assert_eq!(err.errno(), -24);
        assert_eq!(table.targets(), ["/a".to_string()]);
    }

    #[test]
    fn test_umount() {
        let table: MountTable<u32> = MountTable::new();
        table.mount_nodev("/a", |dev| Ok(dev)).unwrap();
        assert!(table.umount("/a").is_ok());
        assert!(matches!(table.umount("/a"), Err(WrapfsError::NotMounted(_))));
        assert!(table.get("/a").is_none());
    }
}
