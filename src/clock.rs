//! Источник времени `wall_clock_utc`

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::now_ms;

/// Локальные UTC часы; допускается расхождение ±tolerance с медианой сети
pub trait Clock: Send + Sync {
    /// Миллисекунды UTC
    fn wall_clock_utc(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_clock_utc(&self) -> u64 {
        now_ms()
    }
}

/// Ручные часы для тестов и детерминированной симуляции
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now: AtomicU64::new(start_ms) }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn wall_clock_utc(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
