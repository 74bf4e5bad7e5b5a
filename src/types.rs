use std::time::{SystemTime, UNIX_EPOCH};

/// Длина окна по умолчанию: 1 минута
pub const DEFAULT_INTERVAL_MS: u64 = 60_000;

/// Допуск расхождения UTC часов (±5 секунд)
pub const DEFAULT_TOLERANCE_MS: u64 = 5_000;

/// Fixed-point масштаб для score: 1.0 == 1_000_000
pub const SCORE_PRECISION: u64 = 1_000_000;

/// previous_hash первого checkpoint в цепи
pub const EMPTY_HASH: Hash = [0u8; 32];

/// Domain separation для seed delay proof в heartbeat
pub const HEARTBEAT_SEED_PREFIX: &[u8] = b"MONTANA_HEARTBEAT_SEED_V1";

/// Domain separation для подписи heartbeat
pub const HEARTBEAT_SIGN_PREFIX: &[u8] = b"MONTANA_HEARTBEAT_V1:";

pub type Hash = [u8; 32];
pub type PublicKey = Vec<u8>;  // ML-DSA-65: 1952 bytes
pub type Signature = Vec<u8>;  // ML-DSA-65: 3309 bytes

/// Участник идентифицируется своим публичным ключом
pub type ParticipantId = PublicKey;

/// Регион участника (для confidence)
pub type RegionId = u16;

// =============================================================================
// WINDOWS & BOUNDARIES
// =============================================================================
//
// Все времена в миллисекундах UTC.
// Окно W покрывает [W, W + interval). Checkpoint окна имеет
// boundary_timestamp = W + interval, всегда кратный interval.

/// Начало окна, содержащего `timestamp_ms`
pub fn window_start(timestamp_ms: u64, interval_ms: u64) -> u64 {
    timestamp_ms - timestamp_ms % interval_ms
}

/// Boundary, которым закрывается окно `window`
pub fn window_boundary(window: u64, interval_ms: u64) -> u64 {
    window.saturating_add(interval_ms)
}

/// Окно, которое закрывается на `boundary`
pub fn boundary_window(boundary: u64, interval_ms: u64) -> u64 {
    boundary.saturating_sub(interval_ms)
}

pub fn is_aligned(timestamp_ms: u64, interval_ms: u64) -> bool {
    interval_ms != 0 && timestamp_ms % interval_ms == 0
}

/// Порядковый номер окна с начала эпохи Unix
pub fn window_index(window: u64, interval_ms: u64) -> u64 {
    window / interval_ms
}

/// Current UTC time in milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Человекочитаемая метка boundary для логов
pub fn boundary_to_string(boundary_ms: u64) -> String {
    use chrono::{TimeZone, Utc};

    match Utc.timestamp_millis_opt(boundary_ms as i64).single() {
        Some(t) => format!("boundary {} ({})", boundary_ms, t.format("%Y-%m-%d %H:%M:%S UTC")),
        None => format!("boundary {}", boundary_ms),
    }
}

/// Короткий hex-префикс хеша для логов
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(8)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_arithmetic() {
        let interval = DEFAULT_INTERVAL_MS;
        let ts = 1_735_862_400_000 + 42_123;
        let w = window_start(ts, interval);

        assert_eq!(w, 1_735_862_400_000);
        assert!(is_aligned(w, interval));
        assert_eq!(window_boundary(w, interval), w + interval);
        assert_eq!(boundary_window(window_boundary(w, interval), interval), w);
        assert_eq!(window_index(w + interval, interval), window_index(w, interval) + 1);
    }

    #[test]
    fn test_unaligned() {
        assert!(!is_aligned(1, DEFAULT_INTERVAL_MS));
        assert!(!is_aligned(60_000, 0));
    }

    #[test]
    fn test_boundary_format() {
        let s = boundary_to_string(1_735_862_460_000);
        assert!(s.contains("2025-01-03 00:01:00 UTC"), "{}", s);
    }
}
