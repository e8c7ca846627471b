// src/buffer.rs - Fixed capacity sample buffer for machine process variables
use ringbuffer::{AllocRingBuffer, RingBuffer};

/// Most recent samples of one tag, oldest first.
#[derive(Debug, Clone)]
pub struct Buffer {
    samples: AllocRingBuffer<f64>,
}

impl Buffer {
    pub fn new(size: usize) -> Self {
        Self {
            samples: AllocRingBuffer::new(size.max(1)),
        }
    }

    pub fn push(&mut self, sample: f64) {
        self.samples.push(sample);
    }

    pub fn is_full(&self) -> bool {
        self.samples.is_full()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    pub fn values(&self) -> Vec<f64> {
        self.samples.to_vec()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_keeps_most_recent() {
        let mut buf = Buffer::new(3);
        for v in 1..=5 {
            buf.push(v as f64);
        }
        assert!(buf.is_full());
        assert_eq!(buf.values(), vec![3.0, 4.0, 5.0]);
        assert_eq!(buf.latest(), Some(5.0));
        assert_eq!(buf.mean(), Some(4.0));
        buf.clear();
        assert!(buf.is_empty());
        assert!(!buf.is_full());
    }
}
