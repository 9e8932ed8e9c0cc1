//! In-memory query history (spec §3 Lifecycles, §4.7): a fixed-capacity
//! ring buffer, oldest entry overwritten on wrap.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;

use crate::dns::RecordType;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum QueryStatus {
    Ok,
    Error,
}

/// One resolved query, as recorded by the listener (spec §4.7). Carries a
/// monotonic `id` (SPEC_FULL.md §3 supplement) so paginated admin reads
/// stay stable across concurrent writers.
#[derive(Clone, Debug, Serialize)]
pub struct QueryEvent {
    pub id: u64,
    pub name: String,
    pub qtype: RecordType,
    pub upstream: String,
    pub duration: Duration,
    pub status: QueryStatus,
    pub time: SystemTime,
    pub client_ip: IpAddr,
}

pub struct HistoryBuffer {
    capacity: usize,
    events: Mutex<VecDeque<QueryEvent>>,
    next_id: AtomicU64,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        HistoryBuffer {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn record(
        &self,
        name: String,
        qtype: RecordType,
        upstream: String,
        duration: Duration,
        status: QueryStatus,
        client_ip: IpAddr,
    ) {
        let event = QueryEvent {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name,
            qtype,
            upstream,
            duration,
            status,
            time: SystemTime::now(),
            client_ip,
        };
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn size(&self) -> usize {
        self.events.lock().len()
    }

    pub fn all(&self) -> Vec<QueryEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Most recent `limit` entries starting `offset` back from the newest.
    pub fn paginated(&self, offset: usize, limit: usize) -> Vec<QueryEvent> {
        let events = self.events.lock();
        events
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_overwrites_oldest_on_wrap() {
        let history = HistoryBuffer::new(2);
        for i in 0..3 {
            history.record(
                format!("host{i}.example"),
                RecordType::A,
                "udp:1.1.1.1:53".into(),
                Duration::from_millis(1),
                QueryStatus::Ok,
                "127.0.0.1".parse().unwrap(),
            );
        }
        let all = history.all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "host1.example");
        assert_eq!(all[1].name, "host2.example");
    }

    #[test]
    fn paginated_returns_newest_first() {
        let history = HistoryBuffer::new(10);
        for i in 0..5 {
            history.record(
                format!("host{i}.example"),
                RecordType::A,
                "udp:1.1.1.1:53".into(),
                Duration::from_millis(1),
                QueryStatus::Ok,
                "127.0.0.1".parse().unwrap(),
            );
        }
        let page = history.paginated(0, 2);
        assert_eq!(page[0].name, "host4.example");
        assert_eq!(page[1].name, "host3.example");
    }
}
