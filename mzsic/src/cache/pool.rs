//! Bounded in-memory spectrum pools with interchangeable eviction strategies
use std::collections::HashMap;

use identity_hash::BuildIdentityHasher;

use crate::spectrum::Spectrum;

pub(crate) type ScanIndexMap = HashMap<i32, usize, BuildIdentityHasher<i32>>;

/// A pooled spectrum buffer and whether its current contents are already in the page file
#[derive(Debug, Clone, Default)]
pub struct PoolEntry {
    pub spectrum: Spectrum,
    pub persisted: bool,
}

impl PoolEntry {
    fn fill(&mut self, scan_number: i32, spectrum: &Spectrum, persisted: bool) {
        self.spectrum.copy_from(spectrum);
        self.spectrum.scan_number = scan_number;
        self.persisted = persisted;
    }

    fn from_spectrum(scan_number: i32, spectrum: &Spectrum, persisted: bool) -> Self {
        let mut this = Self::default();
        this.fill(scan_number, spectrum, persisted);
        this
    }
}

/// The shared behavior of the in-memory spectrum pools.
///
/// A scan number is held by at most one slot. Inserting a scan number that is
/// already resident overwrites that slot in place, inserting a new scan number
/// into a full pool recycles the buffer of [`SpectrumPool::next_victim`].
pub trait SpectrumPool {
    /// Look up a resident spectrum, counting as an access
    fn get(&mut self, scan_number: i32) -> Option<&PoolEntry>;

    /// Look up a resident spectrum without counting as an access
    fn peek(&self, scan_number: i32) -> Option<&PoolEntry>;

    fn contains(&self, scan_number: i32) -> bool;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// The entry that inserting a new scan number would displace, if the pool is full
    fn next_victim(&self) -> Option<&PoolEntry>;

    /// Store a copy of `spectrum` under `scan_number`, returning the scan number that was
    /// evicted to make room, if any.
    fn insert(&mut self, scan_number: i32, spectrum: &Spectrum, persisted: bool) -> Option<i32>;

    fn mark_persisted(&mut self, scan_number: i32);

    /// Raise the capacity by `additional` slots
    fn grow(&mut self, additional: usize);

    fn clear(&mut self);

    /// Scan numbers of resident spectra whose contents are not in the page file
    fn unpersisted(&self) -> Vec<i32>;
}

/// A fixed-capacity array of slots, overwritten round-robin once full.
///
/// This approximates first-in-first-out eviction and ignores access recency.
#[derive(Debug, Default)]
pub struct ArrayPool {
    slots: Vec<PoolEntry>,
    index: ScanIndexMap,
    capacity: usize,
    next_slot: usize,
}

impl ArrayPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            index: ScanIndexMap::default(),
            capacity,
            next_slot: 0,
        }
    }
}

impl SpectrumPool for ArrayPool {
    fn get(&mut self, scan_number: i32) -> Option<&PoolEntry> {
        self.peek(scan_number)
    }

    fn peek(&self, scan_number: i32) -> Option<&PoolEntry> {
        self.index.get(&scan_number).map(|i| &self.slots[*i])
    }

    fn contains(&self, scan_number: i32) -> bool {
        self.index.contains_key(&scan_number)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_victim(&self) -> Option<&PoolEntry> {
        if self.is_full() {
            self.slots.get(self.next_slot)
        } else {
            None
        }
    }

    fn insert(&mut self, scan_number: i32, spectrum: &Spectrum, persisted: bool) -> Option<i32> {
        if let Some(i) = self.index.get(&scan_number).copied() {
            self.slots[i].fill(scan_number, spectrum, persisted);
            return None;
        }
        if self.slots.len() < self.capacity {
            self.slots
                .push(PoolEntry::from_spectrum(scan_number, spectrum, persisted));
            self.index.insert(scan_number, self.slots.len() - 1);
            return None;
        }
        if self.slots.is_empty() {
            return None;
        }
        let i = self.next_slot % self.slots.len();
        let evicted = self.slots[i].spectrum.scan_number;
        self.index.remove(&evicted);
        self.slots[i].fill(scan_number, spectrum, persisted);
        self.index.insert(scan_number, i);
        self.next_slot = (i + 1) % self.slots.len();
        Some(evicted)
    }

    fn mark_persisted(&mut self, scan_number: i32) {
        if let Some(i) = self.index.get(&scan_number) {
            self.slots[*i].persisted = true;
        }
    }

    fn grow(&mut self, additional: usize) {
        self.capacity += additional;
        self.slots.reserve(additional);
    }

    fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.next_slot = 0;
    }

    fn unpersisted(&self) -> Vec<i32> {
        self.slots
            .iter()
            .filter(|e| !e.persisted)
            .map(|e| e.spectrum.scan_number)
            .collect()
    }
}

#[derive(Debug, Default)]
struct LruNode {
    entry: PoolEntry,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A least-recently-used pool: a doubly linked list threaded through a slab of
/// nodes, with the least recently used entry at the head.
#[derive(Debug, Default)]
pub struct LruPool {
    nodes: Vec<LruNode>,
    index: ScanIndexMap,
    head: Option<usize>,
    tail: Option<usize>,
    capacity: usize,
}

impl LruPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            index: ScanIndexMap::default(),
            head: None,
            tail: None,
            capacity,
        }
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.nodes[i].prev, self.nodes[i].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[i].prev = None;
        self.nodes[i].next = None;
    }

    fn push_back(&mut self, i: usize) {
        self.nodes[i].prev = self.tail;
        self.nodes[i].next = None;
        match self.tail {
            Some(t) => self.nodes[t].next = Some(i),
            None => self.head = Some(i),
        }
        self.tail = Some(i);
    }

    fn touch(&mut self, i: usize) {
        if self.tail != Some(i) {
            self.unlink(i);
            self.push_back(i);
        }
    }

    /// Resident scan numbers from least to most recently used
    pub fn recency_order(&self) -> Vec<i32> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while let Some(i) = cursor {
            order.push(self.nodes[i].entry.spectrum.scan_number);
            cursor = self.nodes[i].next;
        }
        order
    }
}

impl SpectrumPool for LruPool {
    fn get(&mut self, scan_number: i32) -> Option<&PoolEntry> {
        let i = *self.index.get(&scan_number)?;
        self.touch(i);
        Some(&self.nodes[i].entry)
    }

    fn peek(&self, scan_number: i32) -> Option<&PoolEntry> {
        self.index.get(&scan_number).map(|i| &self.nodes[*i].entry)
    }

    fn contains(&self, scan_number: i32) -> bool {
        self.index.contains_key(&scan_number)
    }

    fn len(&self) -> usize {
        self.nodes.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn next_victim(&self) -> Option<&PoolEntry> {
        if self.is_full() {
            self.head.map(|i| &self.nodes[i].entry)
        } else {
            None
        }
    }

    fn insert(&mut self, scan_number: i32, spectrum: &Spectrum, persisted: bool) -> Option<i32> {
        if let Some(i) = self.index.get(&scan_number).copied() {
            self.nodes[i].entry.fill(scan_number, spectrum, persisted);
            self.touch(i);
            return None;
        }
        if self.nodes.len() < self.capacity {
            self.nodes.push(LruNode {
                entry: PoolEntry::from_spectrum(scan_number, spectrum, persisted),
                prev: None,
                next: None,
            });
            let i = self.nodes.len() - 1;
            self.push_back(i);
            self.index.insert(scan_number, i);
            return None;
        }
        let i = self.head?;
        let evicted = self.nodes[i].entry.spectrum.scan_number;
        self.index.remove(&evicted);
        self.nodes[i].entry.fill(scan_number, spectrum, persisted);
        self.touch(i);
        self.index.insert(scan_number, i);
        Some(evicted)
    }

    fn mark_persisted(&mut self, scan_number: i32) {
        if let Some(i) = self.index.get(&scan_number) {
            self.nodes[*i].entry.persisted = true;
        }
    }

    fn grow(&mut self, additional: usize) {
        self.capacity += additional;
        self.nodes.reserve(additional);
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    fn unpersisted(&self) -> Vec<i32> {
        self.nodes
            .iter()
            .filter(|n| !n.entry.persisted)
            .map(|n| n.entry.spectrum.scan_number)
            .collect()
    }
}
