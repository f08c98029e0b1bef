//! Packet stores and the store table
//!
//! A packet store is an ordered log of `(time, packet)` entries with a byte
//! capacity. Open retrieval plays the log back through a cursor; a
//! by-time-range retrieval walks it with its own index. Removing entries from
//! the front of the log shifts both so they keep pointing at the same logical
//! entry.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;

use log::{debug, trace};
use puslibgs::{
    ContentSummary, DeleteRange, OnboardTime, PusError, RequestId, ResourceError,
    RetrievalState, StoreConfiguration, StoreId, StoreKind, StoreSelection, StoreSpec,
    StoreStatus, ValidationError, VirtualChannel,
};

/// One stored packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPacket {
    pub time: OnboardTime,
    pub bytes: Vec<u8>,
}

/// State of a by-time-range retrieval in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeRangeScan {
    /// Request whose completion ends the scan
    pub request: RequestId,
    /// Index of the next entry to deliver
    pub next: usize,
    /// Index one past the last entry of the window, fixed when the scan
    /// starts so that entries appended later are not part of it
    pub end: usize,
    /// Next progress step
    pub step: u16,
}

/// A named, independently configured packet log
#[derive(Debug, Clone)]
pub struct PacketStore {
    id: StoreId,
    kind: StoreKind,
    capacity_bytes: usize,
    used_bytes: usize,
    virtual_channel: VirtualChannel,
    storage_enabled: bool,
    apids: Vec<u16>,
    retrieval: RetrievalState,
    /// Index of the next entry open retrieval delivers
    cursor: usize,
    /// Start time tag applied when open retrieval is next enabled
    start_time: Option<OnboardTime>,
    time_range: Option<TimeRangeScan>,
    entries: VecDeque<StoredPacket>,
}

impl PacketStore {
    pub fn from_spec(spec: StoreSpec) -> Self {
        Self {
            id: spec.id,
            kind: spec.kind,
            capacity_bytes: spec.capacity_bytes,
            used_bytes: 0,
            virtual_channel: spec.virtual_channel,
            storage_enabled: spec.storage_enabled,
            apids: spec.apids,
            retrieval: RetrievalState::Closed,
            cursor: 0,
            start_time: None,
            time_range: None,
            entries: VecDeque::new(),
        }
    }

    pub fn id(&self) -> &StoreId {
        &self.id
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn capacity_bytes(&self) -> usize {
        self.capacity_bytes
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn virtual_channel(&self) -> VirtualChannel {
        self.virtual_channel
    }

    pub fn storage_enabled(&self) -> bool {
        self.storage_enabled
    }

    pub fn retrieval(&self) -> RetrievalState {
        self.retrieval
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn start_time(&self) -> Option<OnboardTime> {
        self.start_time
    }

    pub fn time_range(&self) -> Option<&TimeRangeScan> {
        self.time_range.as_ref()
    }

    pub fn entries(&self) -> impl Iterator<Item = &StoredPacket> {
        self.entries.iter()
    }

    pub fn entry(&self, index: usize) -> Option<&StoredPacket> {
        self.entries.get(index)
    }

    /// Whether a packet from `apid` is ingested into this store
    pub fn accepts(&self, apid: Option<u16>) -> bool {
        if !self.storage_enabled {
            return false;
        }
        match apid {
            _ if self.apids.is_empty() => true,
            Some(apid) => self.apids.contains(&apid),
            None => false,
        }
    }

    pub fn set_kind(&mut self, kind: StoreKind) {
        self.kind = kind;
    }

    pub fn set_virtual_channel(&mut self, vc: VirtualChannel) {
        self.virtual_channel = vc;
    }

    pub fn set_storage_enabled(&mut self, enabled: bool) {
        self.storage_enabled = enabled;
    }

    /// Change the capacity. Never below the bytes in use.
    pub fn resize(&mut self, capacity_bytes: usize) -> Result<(), ResourceError> {
        if capacity_bytes < self.used_bytes {
            return Err(ResourceError::CapacityBelowUsage {
                id: self.id.clone(),
                used: self.used_bytes,
                capacity: capacity_bytes,
            });
        }
        self.capacity_bytes = capacity_bytes;
        Ok(())
    }

    /// Store a packet. Bounded stores refuse it when full, circular stores
    /// evict their oldest entries. Returns the number of entries evicted.
    pub fn store(&mut self, time: OnboardTime, bytes: Vec<u8>) -> Result<usize, ResourceError> {
        let size = bytes.len();
        if size > self.capacity_bytes {
            return Err(ResourceError::PacketTooLarge {
                id: self.id.clone(),
                size,
                capacity: self.capacity_bytes,
            });
        }

        let mut evicted = 0;
        if self.used_bytes + size > self.capacity_bytes {
            match self.kind {
                StoreKind::Bounded => return Err(ResourceError::StoreFull(self.id.clone())),
                StoreKind::Circular => {
                    while self.used_bytes + size > self.capacity_bytes {
                        self.remove_front(1);
                        evicted += 1;
                    }
                }
            }
        }

        // Entries arrive in time order; copies from other stores may not.
        let position = self.entries.partition_point(|e| e.time <= time);
        if position < self.cursor {
            self.cursor += 1;
        }
        if let Some(scan) = self.time_range.as_mut() {
            if position < scan.next {
                scan.next += 1;
            }
            if position < scan.end {
                scan.end += 1;
            }
        }
        self.entries.insert(position, StoredPacket { time, bytes });
        self.used_bytes += size;

        trace!("Store {}: stored {} bytes at {}, {} evicted", self.id, size, time, evicted);
        Ok(evicted)
    }

    /// Remove the `count` oldest entries, keeping the cursors on the same
    /// logical entries
    fn remove_front(&mut self, count: usize) -> usize {
        let count = count.min(self.entries.len());
        for packet in self.entries.drain(..count) {
            self.used_bytes -= packet.bytes.len();
        }
        self.cursor = self.cursor.saturating_sub(count);
        if let Some(scan) = self.time_range.as_mut() {
            scan.next = scan.next.saturating_sub(count);
            scan.end = scan.end.saturating_sub(count);
        }
        count
    }

    /// Delete content. Returns the number of entries removed.
    pub fn delete_content(&mut self, range: DeleteRange) -> usize {
        let count = match range {
            DeleteRange::All => self.entries.len(),
            DeleteRange::UpTo(time) => self.entries.partition_point(|e| e.time <= time),
        };
        let removed = self.remove_front(count);
        debug!("Store {}: deleted {} entries", self.id, removed);
        removed
    }

    /// Index of the first entry with a time tag at or after `time`
    pub fn first_at_or_after(&self, time: OnboardTime) -> usize {
        self.entries.partition_point(|e| e.time < time)
    }

    /// Indices of the entries with `from <= time <= to`
    pub fn window(&self, from: OnboardTime, to: OnboardTime) -> Range<usize> {
        let start = self.first_at_or_after(from);
        let end = self.entries.partition_point(|e| e.time <= to);
        start..end.max(start)
    }

    pub fn set_retrieval(&mut self, state: RetrievalState) {
        self.retrieval = state;
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.entries.len());
    }

    pub fn set_start_time(&mut self, time: Option<OnboardTime>) {
        self.start_time = time;
    }

    pub fn take_start_time(&mut self) -> Option<OnboardTime> {
        self.start_time.take()
    }

    /// Next entry of open retrieval, advancing the cursor
    pub fn next_open_entry(&mut self) -> Option<&StoredPacket> {
        if self.retrieval != RetrievalState::Open {
            return None;
        }
        let entry = self.entries.get(self.cursor)?;
        self.cursor += 1;
        Some(entry)
    }

    pub fn begin_time_range(&mut self, scan: TimeRangeScan) {
        self.time_range = Some(scan);
    }

    pub fn time_range_mut(&mut self) -> Option<&mut TimeRangeScan> {
        self.time_range.as_mut()
    }

    pub fn end_time_range(&mut self) -> Option<TimeRangeScan> {
        self.time_range.take()
    }

    pub fn configuration(&self) -> StoreConfiguration {
        StoreConfiguration {
            id: self.id.clone(),
            kind: self.kind,
            capacity_bytes: self.capacity_bytes,
            used_bytes: self.used_bytes,
            virtual_channel: self.virtual_channel,
            storage_enabled: self.storage_enabled,
            retrieval: self.retrieval,
        }
    }

    pub fn summary(&self) -> ContentSummary {
        ContentSummary {
            id: self.id.clone(),
            oldest: self.entries.front().map(|e| e.time),
            newest: self.entries.back().map(|e| e.time),
            entry_count: self.entries.len(),
            used_bytes: self.used_bytes,
            open_entry_count: self.entries.len() - self.cursor,
        }
    }

    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            id: self.id.clone(),
            retrieval: self.retrieval,
            cursor: self.cursor,
            storage_enabled: self.storage_enabled,
            time_range_in_progress: self.time_range.is_some(),
        }
    }
}

/// The table of packet stores, owned by the command interpreter
#[derive(Debug, Default)]
pub struct StoreTable {
    stores: BTreeMap<StoreId, PacketStore>,
}

impl StoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn contains(&self, id: &StoreId) -> bool {
        self.stores.contains_key(id)
    }

    pub fn get(&self, id: &StoreId) -> Option<&PacketStore> {
        self.stores.get(id)
    }

    pub fn get_mut(&mut self, id: &StoreId) -> Option<&mut PacketStore> {
        self.stores.get_mut(id)
    }

    /// Look up a store that a command names
    pub fn lookup(&self, id: &StoreId) -> Result<&PacketStore, ValidationError> {
        self.stores
            .get(id)
            .ok_or_else(|| ValidationError::UnknownStoreId(id.clone()))
    }

    pub fn lookup_mut(&mut self, id: &StoreId) -> Result<&mut PacketStore, ValidationError> {
        self.stores
            .get_mut(id)
            .ok_or_else(|| ValidationError::UnknownStoreId(id.clone()))
    }

    /// Look up a store whose open retrieval must be closed
    pub fn lookup_closed(&mut self, id: &StoreId) -> Result<&mut PacketStore, PusError> {
        let store = self.lookup_mut(id)?;
        if store.retrieval() != RetrievalState::Closed {
            return Err(ResourceError::RetrievalNotClosed(id.clone()).into());
        }
        Ok(store)
    }

    pub fn insert(&mut self, store: PacketStore) {
        self.stores.insert(store.id().clone(), store);
    }

    pub fn remove(&mut self, id: &StoreId) -> Option<PacketStore> {
        self.stores.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PacketStore> {
        self.stores.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PacketStore> {
        self.stores.values_mut()
    }

    /// Resolve a selection into known ids and unknown ids
    pub fn resolve(&self, selection: &StoreSelection) -> (Vec<StoreId>, Vec<StoreId>) {
        match selection {
            StoreSelection::All => (self.stores.keys().cloned().collect(), Vec::new()),
            StoreSelection::Ids(ids) => ids.iter().cloned().partition(|id| self.contains(id)),
        }
    }
}
