//! Flow-controlled outbound chunk sequencing.
//!
//! A [`SendPlan`] is a value: every step returns the next plan instead of
//! mutating a shared cursor. At most one chunk is in flight; the owner polls
//! for the next chunk, then acknowledges or rejects it once the transport
//! reports the write outcome.

use std::sync::Arc;

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPlan {
    chunks: Arc<[Bytes]>,
    next: usize,
    in_flight: bool,
}

impl SendPlan {
    pub fn new(chunks: Vec<Bytes>) -> Self {
        Self {
            chunks: chunks.into(),
            next: 0,
            in_flight: false,
        }
    }

    /// Take the next chunk to write, if the transport may be fed now.
    ///
    /// Returns `None` while a chunk is in flight or once every chunk was
    /// acknowledged.
    pub fn poll(self) -> (Self, Option<Bytes>) {
        if self.in_flight || self.is_complete() {
            return (self, None);
        }
        let chunk = self.chunks[self.next].clone();
        (
            Self {
                in_flight: true,
                ..self
            },
            Some(chunk),
        )
    }

    /// The in-flight chunk was written.
    pub fn acknowledge(self) -> Self {
        if !self.in_flight {
            return self;
        }
        Self {
            next: self.next + 1,
            in_flight: false,
            ..self
        }
    }

    /// The in-flight chunk was refused; it is offered again on the next poll.
    pub fn rejected(self) -> Self {
        Self {
            in_flight: false,
            ..self
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next >= self.chunks.len()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// (acknowledged, total)
    pub fn progress(&self) -> (usize, usize) {
        (self.next, self.chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(n: usize) -> SendPlan {
        SendPlan::new((0..n).map(|i| Bytes::from(vec![i as u8])).collect())
    }

    #[test]
    fn test_single_flight() {
        let (plan, first) = plan(3).poll();
        assert_eq!(first.unwrap()[..], [0]);
        let (plan, blocked) = plan.poll();
        assert!(blocked.is_none());
        assert!(plan.is_in_flight());

        let (plan, second) = plan.acknowledge().poll();
        assert_eq!(second.unwrap()[..], [1]);
        assert_eq!(plan.progress(), (1, 3));
    }

    #[test]
    fn test_rejected_chunk_is_retried() {
        let (plan, first) = plan(2).poll();
        let (plan, again) = plan.rejected().poll();
        assert_eq!(first, again);
        assert_eq!(plan.progress(), (0, 2));
    }

    #[test]
    fn test_completes_after_all_acknowledged() {
        let mut plan = plan(2);
        let mut sent = Vec::new();
        loop {
            let (next, chunk) = plan.poll();
            match chunk {
                Some(c) => {
                    sent.push(c);
                    plan = next.acknowledge();
                }
                None => {
                    plan = next;
                    break;
                }
            }
        }
        assert!(plan.is_complete());
        assert_eq!(sent.len(), 2);

        // Stray acknowledgements do not advance past the end
        let plan = plan.acknowledge();
        assert_eq!(plan.progress(), (2, 2));
    }

    #[test]
    fn test_empty_plan_is_complete() {
        let (plan, chunk) = SendPlan::new(Vec::new()).poll();
        assert!(chunk.is_none());
        assert!(plan.is_complete());
    }
}
