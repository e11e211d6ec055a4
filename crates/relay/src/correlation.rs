use std::{
    collections::{HashMap, VecDeque},
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard, PoisonError},
};

use jupyter_bridge_kernel::MessageId;

use crate::protocol::RequestId;

/// Maps kernel message ids to the request that caused them.
///
/// Shared by the dispatcher, which registers executions, and the event relay,
/// which resolves the parent of every kernel event. The lock is only held for
/// a single map operation.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<Entries>,
}

#[derive(Default)]
struct Entries {
    map: HashMap<MessageId, Option<RequestId>>,
    // Insertion order, only tracked when a capacity is set.
    order: VecDeque<MessageId>,
    capacity: Option<NonZeroUsize>,
}

impl CorrelationTable {
    /// An unbounded table: entries live for the whole session.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that evicts its oldest registrations beyond `capacity`.
    pub fn with_capacity_limit(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                map: HashMap::with_capacity(capacity.get()),
                order: VecDeque::with_capacity(capacity.get()),
                capacity: Some(capacity),
            }),
        }
    }

    pub fn register(&self, kernel_msg_id: impl Into<MessageId>, request_id: Option<RequestId>) {
        let kernel_msg_id = kernel_msg_id.into();
        let mut entries = self.lock();

        let Some(capacity) = entries.capacity else {
            entries.map.insert(kernel_msg_id, request_id);
            return;
        };

        if entries.map.insert(kernel_msg_id.clone(), request_id).is_none() {
            entries.order.push_back(kernel_msg_id);
        }
        while entries.map.len() > capacity.get() {
            match entries.order.pop_front() {
                Some(oldest) => {
                    entries.map.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// The request id registered for `kernel_msg_id`, if any.
    pub fn resolve(&self, kernel_msg_id: &str) -> Option<RequestId> {
        self.lock().map.get(kernel_msg_id).cloned().flatten()
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
