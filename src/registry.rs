//! Interface index registry.
//!
//! Maps kernel interface indices to display slots whose names can be looked
//! up cheaply on every capture cycle. The cache is a small fixed table sized
//! to the realistic number of distinct interfaces the process will ever see
//! — independent of the number of sockets explicitly opened, since
//! any-interface mode observes interfaces that were never bound.
//!
//! On a miss the registry first sweeps out entries whose interface has
//! disappeared from the system, then allocates a free slot. Running out of
//! slots after the sweep is a fatal configuration error, not a silent drop.

use tracing::{debug, warn};

use crate::error::{CaptureError, Result};

/// Resolves a kernel interface index to its current name.
///
/// The production implementation asks the kernel ([`SysResolver`]); tests
/// substitute a table-backed fake to drive reclamation behavior.
pub trait IndexResolver {
    /// Current name for `index`, or `None` if no such interface exists.
    fn name_of(&self, index: u32) -> Option<String>;
}

/// Kernel-backed resolver using `if_indextoname(3)`.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct SysResolver;

#[cfg(target_os = "linux")]
impl IndexResolver for SysResolver {
    fn name_of(&self, index: u32) -> Option<String> {
        let mut buf = [0u8; libc::IF_NAMESIZE];
        let ret = unsafe { libc::if_indextoname(index, buf.as_mut_ptr().cast()) };
        if ret.is_null() {
            return None;
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        Some(String::from_utf8_lossy(&buf[..end]).into_owned())
    }
}

#[derive(Debug)]
struct Entry {
    index: u32,
    name: String,
}

/// Fixed-capacity interface index cache.
#[derive(Debug)]
pub struct IfaceRegistry<R> {
    slots: Vec<Option<Entry>>,
    resolver: R,
    max_name_len: usize,
}

impl<R: IndexResolver> IfaceRegistry<R> {
    /// Create a registry with `capacity` slots backed by `resolver`.
    pub fn new(capacity: usize, resolver: R) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, resolver, max_name_len: 0 }
    }

    /// Return the display slot for `index`, creating one on first sight.
    ///
    /// Fails with [`CaptureError::CacheExhausted`] when every slot is
    /// occupied by a still-live interface.
    pub fn lookup(&mut self, index: u32) -> Result<usize> {
        if let Some(slot) = self
            .slots
            .iter()
            .position(|e| e.as_ref().is_some_and(|entry| entry.index == index))
        {
            return Ok(slot);
        }

        // remove index cache zombies before allocating
        self.sweep();

        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(CaptureError::CacheExhausted { capacity: self.slots.len() });
        };

        let name = match self.resolver.name_of(index) {
            Some(name) => name,
            None => {
                // the interface vanished between receive and lookup; keep a
                // placeholder so the frame's origin is still identifiable
                warn!(index, "failed to resolve interface name");
                format!("#{index}")
            }
        };
        self.max_name_len = self.max_name_len.max(name.len());
        debug!(index, name = %name, slot, "new interface index cache entry");
        self.slots[slot] = Some(Entry { index, name });
        Ok(slot)
    }

    /// Display name stored in `slot`.
    pub fn name(&self, slot: usize) -> &str {
        self.slots
            .get(slot)
            .and_then(|e| e.as_ref())
            .map(|entry| entry.name.as_str())
            .unwrap_or("?")
    }

    /// Longest interface name observed so far, for aligned column output.
    pub fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|e| e.is_some()).count()
    }

    /// Whether the registry holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(&mut self) {
        let resolver = &self.resolver;
        for slot in &mut self.slots {
            if let Some(entry) = slot
                && resolver.name_of(entry.index).is_none()
            {
                debug!(index = entry.index, name = %entry.name, "reclaiming stale cache entry");
                *slot = None;
            }
        }
    }
}
