use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::BookingError;
use crate::services::booking::BookingService;

/// Фоновая очистка неоплаченных броней.
///
/// Каждая бронь освобождается отдельной транзакцией через `BookingService::expire`,
/// так что места и счётчик события меняются по тем же правилам, что и при отмене.
pub struct ExpirySweeper {
    service: BookingService,
    interval: Duration,
}

impl ExpirySweeper {
    pub fn new(service: BookingService) -> Self {
        let interval = Duration::from_secs(service.settings().sweep_interval_seconds.max(1));
        Self { service, interval }
    }

    /// Бесконечный цикл для запуска в `tokio::spawn`.
    pub async fn run(self) {
        info!("🧹 Expiry sweeper started, interval {:?}", self.interval);
        loop {
            self.sweep_once().await;
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Один проход: находит просроченные брони и освобождает их места.
    pub async fn sweep_once(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let stale = match self.service.stale_pending_bookings(Utc::now()).await {
            Ok(ids) => ids,
            Err(e) => {
                error!("🎫 Failed to list stale bookings: {:?}", e);
                stats.failed += 1;
                return stats;
            }
        };

        if stale.is_empty() {
            return stats;
        }

        stats.found = stale.len();
        info!("🎫 Found {} stale pending bookings to expire", stale.len());

        for booking_id in stale {
            match self.service.expire(booking_id).await {
                Ok(released) => {
                    stats.expired += 1;
                    stats.seats_released += released.released_seat_ids.len();
                }
                // Бронь успели подтвердить или отменить между выборкой и освобождением.
                Err(BookingError::InvalidState(reason)) => {
                    warn!("🎫 Booking {} was not expired: {}", booking_id, reason);
                    stats.skipped += 1;
                }
                Err(e) => {
                    error!("🎫 Failed to expire booking {}: {:?}", booking_id, e);
                    stats.failed += 1;
                }
            }
        }

        info!(
            "✅ Expiry sweep done: {} expired, {} seats released, {} skipped, {} failed",
            stats.expired, stats.seats_released, stats.skipped, stats.failed
        );
        stats
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub found: usize,
    pub expired: usize,
    pub seats_released: usize,
    pub skipped: usize,
    pub failed: usize,
}
