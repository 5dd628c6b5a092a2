//! Fan-out subscriber connection health tracking

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutHealthStatus {
    /// Fan-out is not configured
    Disabled,
    /// Subscribed and receiving
    Healthy,
    /// Subscription lost, attempting to reconnect
    Reconnecting,
}

impl FanoutHealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FanoutHealthStatus::Disabled => "disabled",
            FanoutHealthStatus::Healthy => "healthy",
            FanoutHealthStatus::Reconnecting => "reconnecting",
        }
    }
}

pub struct FanoutHealth {
    status: AtomicU8,
    last_connected_ms: AtomicI64,
    reconnection_attempts: AtomicU32,
    total_reconnections: AtomicU32,
}

impl FanoutHealth {
    pub fn new(enabled: bool) -> Self {
        let status = if enabled {
            FanoutHealthStatus::Reconnecting
        } else {
            FanoutHealthStatus::Disabled
        };
        Self {
            status: AtomicU8::new(status as u8),
            last_connected_ms: AtomicI64::new(0),
            reconnection_attempts: AtomicU32::new(0),
            total_reconnections: AtomicU32::new(0),
        }
    }

    pub fn set_connected(&self) {
        let previous = self
            .status
            .swap(FanoutHealthStatus::Healthy as u8, Ordering::AcqRel);
        self.last_connected_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);

        if previous == FanoutHealthStatus::Reconnecting as u8
            && self.reconnection_attempts.load(Ordering::Acquire) > 0
        {
            self.total_reconnections.fetch_add(1, Ordering::AcqRel);
        }
        self.reconnection_attempts.store(0, Ordering::Release);
    }

    pub fn set_reconnecting(&self) {
        self.status
            .store(FanoutHealthStatus::Reconnecting as u8, Ordering::Release);
        self.reconnection_attempts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn status(&self) -> FanoutHealthStatus {
        match self.status.load(Ordering::Acquire) {
            0 => FanoutHealthStatus::Disabled,
            1 => FanoutHealthStatus::Healthy,
            _ => FanoutHealthStatus::Reconnecting,
        }
    }

    pub fn stats(&self) -> FanoutHealthStats {
        FanoutHealthStats {
            status: self.status(),
            last_connected_ms: self.last_connected_ms.load(Ordering::Acquire),
            reconnection_attempts: self.reconnection_attempts.load(Ordering::Acquire),
            total_reconnections: self.total_reconnections.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FanoutHealthStats {
    pub status: FanoutHealthStatus,
    pub last_connected_ms: i64,
    pub reconnection_attempts: u32,
    pub total_reconnections: u32,
}
