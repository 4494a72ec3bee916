//! Pooled key-value envelopes carried across the call boundary.
//!
//! Every call and response allocates one envelope on a hot cross-process
//! path; pooling amortizes that cost. The pool is a lock-guarded singly
//! linked free list: recycled envelopes are cleared and threaded through
//! their own `next` pointer, so the pool itself needs no backing collection.
//!
//! # Invariant
//!
//! An envelope is never read after recycle; ownership moves into the pool.
//! The `Box` ownership model enforces this at compile time for safe callers.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::message::{Request, Response, Value};

/// Default maximum number of envelopes retained by a pool.
pub const DEFAULT_MAX_POOLED: usize = 64;

const KEY_REQUEST: &str = "request";
const KEY_RESPONSE: &str = "response";

/// One slot inside an envelope.
enum Slot {
    Request(Request),
    Response(Response),
    Value(Value),
}

/// Generic key-value container for one call or response.
///
/// The request and response ride in well-known slots; extension data can be
/// attached under arbitrary keys without touching the envelope layout.
pub struct ParameterEnvelope {
    slots: HashMap<String, Slot>,
    /// Free-list link, owned by the pool while recycled.
    next: Option<Box<ParameterEnvelope>>,
}

impl ParameterEnvelope {
    fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next: None,
        }
    }

    /// Store the request slot.
    pub fn set_request(&mut self, request: Request) {
        self.slots.insert(KEY_REQUEST.to_string(), Slot::Request(request));
    }

    /// Take the request slot, leaving it empty.
    pub fn take_request(&mut self) -> Option<Request> {
        match self.slots.remove(KEY_REQUEST) {
            Some(Slot::Request(request)) => Some(request),
            _ => None,
        }
    }

    /// Store the response slot.
    pub fn set_response(&mut self, response: Response) {
        self.slots
            .insert(KEY_RESPONSE.to_string(), Slot::Response(response));
    }

    /// Take the response slot, leaving it empty.
    pub fn take_response(&mut self) -> Option<Response> {
        match self.slots.remove(KEY_RESPONSE) {
            Some(Slot::Response(response)) => Some(response),
            _ => None,
        }
    }

    /// Attach an extension value under an arbitrary key.
    pub fn put_value(&mut self, key: impl Into<String>, value: Value) {
        self.slots.insert(key.into(), Slot::Value(value));
    }

    /// Take an extension value previously attached under `key`.
    pub fn take_value(&mut self, key: &str) -> Option<Value> {
        match self.slots.remove(key) {
            Some(Slot::Value(value)) => Some(value),
            _ => None,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn clear(&mut self) {
        self.slots.clear();
    }
}

struct FreeList {
    head: Option<Box<ParameterEnvelope>>,
    size: usize,
}

/// Lock-guarded free list of recycled envelopes.
pub struct ParameterPool {
    free: Mutex<FreeList>,
    max_pooled: usize,
}

impl ParameterPool {
    /// Create a pool retaining up to [`DEFAULT_MAX_POOLED`] envelopes.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_POOLED)
    }

    /// Create a pool retaining up to `max_pooled` envelopes.
    pub fn with_capacity(max_pooled: usize) -> Self {
        Self {
            free: Mutex::new(FreeList {
                head: None,
                size: 0,
            }),
            max_pooled,
        }
    }

    /// Pop a recycled envelope or allocate a fresh one.
    pub fn obtain(&self) -> Box<ParameterEnvelope> {
        let mut free = self.free.lock().unwrap();
        match free.head.take() {
            Some(mut envelope) => {
                free.head = envelope.next.take();
                free.size -= 1;
                envelope
            }
            None => Box::new(ParameterEnvelope::new()),
        }
    }

    /// Clear an envelope and return it to the pool.
    ///
    /// Envelopes beyond the pool's capacity are dropped instead of retained.
    pub fn recycle(&self, mut envelope: Box<ParameterEnvelope>) {
        envelope.clear();
        let mut free = self.free.lock().unwrap();
        if free.size >= self.max_pooled {
            return;
        }
        envelope.next = free.head.take();
        free.head = Some(envelope);
        free.size += 1;
    }

    /// Number of envelopes currently retained.
    pub fn pooled(&self) -> usize {
        self.free.lock().unwrap().size
    }
}

impl Default for ParameterPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Request;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_envelope_request_slot() {
        let pool = ParameterPool::new();
        let mut envelope = pool.obtain();

        envelope.set_request(Request::ReflectiveInvoke {
            interface: "svc".into(),
            method: "m".into(),
            args: vec![],
        });
        assert_eq!(envelope.len(), 1);

        let request = envelope.take_request().unwrap();
        assert_eq!(request.kind(), "reflective_invoke");
        assert!(envelope.take_request().is_none());
    }

    #[test]
    fn test_envelope_extension_values() {
        let pool = ParameterPool::new();
        let mut envelope = pool.obtain();

        envelope.put_value("trace_id", json!("abc-123"));
        assert_eq!(envelope.take_value("trace_id"), Some(json!("abc-123")));
        assert!(envelope.take_value("trace_id").is_none());
    }

    #[test]
    fn test_recycle_clears_contents() {
        let pool = ParameterPool::new();
        let mut envelope = pool.obtain();
        envelope.put_value("k", json!(1));
        pool.recycle(envelope);

        let envelope = pool.obtain();
        assert!(envelope.is_empty());
    }

    #[test]
    fn test_free_list_size_tracking() {
        let pool = ParameterPool::new();
        assert_eq!(pool.pooled(), 0);

        let a = pool.obtain();
        let b = pool.obtain();
        pool.recycle(a);
        assert_eq!(pool.pooled(), 1);
        pool.recycle(b);
        assert_eq!(pool.pooled(), 2);

        let _c = pool.obtain();
        assert_eq!(pool.pooled(), 1);
    }

    #[test]
    fn test_pool_capacity_bound() {
        let pool = ParameterPool::with_capacity(2);
        let envelopes: Vec<_> = (0..4).map(|_| pool.obtain()).collect();
        for envelope in envelopes {
            pool.recycle(envelope);
        }
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn test_concurrent_obtain_recycle() {
        let pool = Arc::new(ParameterPool::with_capacity(128));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..500 {
                    let mut envelope = pool.obtain();
                    envelope.put_value("i", json!(i));
                    pool.recycle(envelope);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Every recycled envelope went back through the list exactly once.
        assert!(pool.pooled() <= 128);
        let reused = pool.obtain();
        assert!(reused.is_empty());
    }
}
