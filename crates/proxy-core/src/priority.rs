use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};

/// Scheduling tier for a forwarded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Normal,
}

impl Priority {
    /// Loopback peers (local controllers) are served ahead of remote pollers.
    pub fn for_peer(addr: &SocketAddr) -> Self {
        if is_loopback(addr.ip()) {
            Priority::High
        } else {
            Priority::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}

/// Two FIFO lanes; the high lane is always drained first.
#[derive(Debug)]
pub struct PriorityBuffer<T> {
    high: VecDeque<T>,
    normal: VecDeque<T>,
}

impl<T> PriorityBuffer<T> {
    pub fn new() -> Self {
        Self {
            high: VecDeque::new(),
            normal: VecDeque::new(),
        }
    }

    pub fn push(&mut self, priority: Priority, item: T) {
        match priority {
            Priority::High => self.high.push_back(item),
            Priority::Normal => self.normal.push_back(item),
        }
    }

    /// Oldest high entry, else oldest normal entry.
    pub fn pop_next(&mut self) -> Option<(Priority, T)> {
        if let Some(item) = self.high.pop_front() {
            return Some((Priority::High, item));
        }
        self.normal
            .pop_front()
            .map(|item| (Priority::Normal, item))
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.normal.len()
    }

    pub fn len_of(&self, priority: Priority) -> usize {
        match priority {
            Priority::High => self.high.len(),
            Priority::Normal => self.normal.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.normal.is_empty()
    }

    /// Empties both lanes, high first. Used on shutdown.
    pub fn drain(&mut self) -> Vec<T> {
        self.high.drain(..).chain(self.normal.drain(..)).collect()
    }
}

impl<T> Default for PriorityBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}
