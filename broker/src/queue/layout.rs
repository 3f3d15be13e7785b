//! Stream and key layout
//!
//! Every key the broker owns derives from the configured queue name:
//!
//! | key                    | role                                   |
//! |------------------------|----------------------------------------|
//! | `<q>`                  | priority-0 band                        |
//! | `<q>_p{k}`             | higher priority bands, k in 1..P-1     |
//! | `<q>_manual`           | isolation stream for manual moves      |
//! | `<q>_dlq`              | dead letter                            |
//! | `<q>_acknowledged`     | bounded ack history                    |
//! | `<q>_metadata`         | metadata hash                          |
//! | `<q>_total_acked`      | monotonic total-ack counter            |
//! | `<q>_reclaim_lock`     | reclaim lease                          |

/// Derived key names for one queue
#[derive(Debug, Clone)]
pub struct StreamLayout {
    prefix: String,
    levels: u8,
}

impl StreamLayout {
    pub fn new(queue_name: &str, levels: u8) -> Self {
        Self {
            prefix: queue_name.to_string(),
            levels: levels.max(1),
        }
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    /// Band stream for a priority; priority 0 is the bare queue name
    pub fn band(&self, priority: u8) -> String {
        let priority = priority.min(self.levels - 1);
        if priority == 0 {
            self.prefix.clone()
        } else {
            format!("{}_p{}", self.prefix, priority)
        }
    }

    /// All bands, priority ascending
    pub fn bands(&self) -> Vec<String> {
        (0..self.levels).map(|p| self.band(p)).collect()
    }

    pub fn manual(&self) -> String {
        format!("{}_manual", self.prefix)
    }

    pub fn dlq(&self) -> String {
        format!("{}_dlq", self.prefix)
    }

    pub fn acknowledged(&self) -> String {
        format!("{}_acknowledged", self.prefix)
    }

    pub fn meta_key(&self) -> String {
        format!("{}_metadata", self.prefix)
    }

    pub fn total_acked_key(&self) -> String {
        format!("{}_total_acked", self.prefix)
    }

    pub fn reclaim_lock_key(&self) -> String {
        format!("{}_reclaim_lock", self.prefix)
    }

    /// Streams consulted by dequeue, in read order: the manual stream wins
    /// over any natural band, then bands strictly high to low
    pub fn dequeue_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.levels as usize + 1);
        order.push(self.manual());
        for priority in (0..self.levels).rev() {
            order.push(self.band(priority));
        }
        order
    }

    /// Streams whose consumer-group PELs make up the virtual processing
    /// queue
    pub fn pel_streams(&self) -> Vec<String> {
        self.dequeue_order()
    }

    /// Every stream key (bands, manual, dlq, ack history)
    pub fn all_streams(&self) -> Vec<String> {
        let mut streams = self.bands();
        streams.push(self.manual());
        streams.push(self.dlq());
        streams.push(self.acknowledged());
        streams
    }

    /// Inverse of `band()`: which priority a band stream serves
    pub fn band_priority(&self, stream: &str) -> Option<u8> {
        if stream == self.prefix {
            return Some(0);
        }
        let suffix = stream.strip_prefix(&self.prefix)?.strip_prefix("_p")?;
        let priority: u8 = suffix.parse().ok()?;
        (priority >= 1 && priority < self.levels).then_some(priority)
    }
}
