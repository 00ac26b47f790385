//! Conversions between wall-clock time and player-relative time
//!
//! Player seconds are measured from the start of the current window. Epoch
//! values are milliseconds since the Unix epoch.

/// Smallest player time handed out for a specific-time seek. Many native
/// players treat `0` as "seek to the live edge".
pub const MIN_SEEKABLE_SECONDS: f64 = 0.1;

/// Epoch milliseconds to whole player seconds within a window
pub fn epoch_ms_to_player_seconds(epoch_ms: i64, window_start_ms: i64) -> f64 {
    ((epoch_ms - window_start_ms) as f64 / 1000.0).floor()
}

/// Like [`epoch_ms_to_player_seconds`], never below [`MIN_SEEKABLE_SECONDS`]
pub fn epoch_ms_to_seekable_player_seconds(epoch_ms: i64, window_start_ms: i64) -> f64 {
    epoch_ms_to_player_seconds(epoch_ms, window_start_ms).max(MIN_SEEKABLE_SECONDS)
}

/// Player seconds back to epoch milliseconds
pub fn player_seconds_to_epoch_ms(seconds: f64, window_start_ms: Option<i64>) -> Option<i64> {
    window_start_ms.map(|start| start + (seconds * 1000.0).round() as i64)
}

/// Move a player time from one window onto a later (or earlier) one so it
/// keeps pointing at the same wall-clock instant.
pub fn rebase_player_seconds(
    seconds: f64,
    old_window_start_ms: Option<i64>,
    new_window_start_ms: Option<i64>,
) -> f64 {
    match (old_window_start_ms, new_window_start_ms) {
        (Some(old), Some(new)) => seconds - (new - old) as f64 / 1000.0,
        _ => seconds,
    }
}

/// Native adapter time to the logical timeline
pub fn to_logical(native_seconds: f64, correction_seconds: f64) -> f64 {
    native_seconds - correction_seconds
}

/// Logical time to the native adapter timeline
pub fn to_native(logical_seconds: f64, correction_seconds: f64) -> f64 {
    logical_seconds + correction_seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW_START: i64 = 1_700_000_000_000;

    #[test]
    fn test_epoch_to_player_floors() {
        assert_eq!(epoch_ms_to_player_seconds(WINDOW_START + 12_999, WINDOW_START), 12.0);
        assert_eq!(epoch_ms_to_player_seconds(WINDOW_START, WINDOW_START), 0.0);
        assert_eq!(epoch_ms_to_player_seconds(WINDOW_START - 500, WINDOW_START), -1.0);
    }

    #[test]
    fn test_seekable_never_below_minimum() {
        for offset in [-60_000, -1, 0, 1, 999, 1_000, 5_500] {
            let seconds = epoch_ms_to_seekable_player_seconds(WINDOW_START + offset, WINDOW_START);
            assert!(seconds >= MIN_SEEKABLE_SECONDS, "offset {offset} gave {seconds}");
        }
        assert_eq!(epoch_ms_to_seekable_player_seconds(WINDOW_START, WINDOW_START), 0.1);
        assert_eq!(epoch_ms_to_seekable_player_seconds(WINDOW_START + 7_000, WINDOW_START), 7.0);
    }

    #[test]
    fn test_round_trip_whole_seconds() {
        for seconds in (0..7_200).step_by(37) {
            let seconds = seconds as f64;
            let epoch = player_seconds_to_epoch_ms(seconds, Some(WINDOW_START)).unwrap();
            assert_eq!(epoch_ms_to_player_seconds(epoch, WINDOW_START), seconds);
        }
    }

    #[test]
    fn test_unknown_window_start() {
        assert_eq!(player_seconds_to_epoch_ms(10.0, None), None);
    }

    #[test]
    fn test_rebase_across_window_move() {
        // window moved forward 8s: the same instant is 8s earlier in the new window
        let rebased = rebase_player_seconds(100.0, Some(WINDOW_START), Some(WINDOW_START + 8_000));
        assert_eq!(rebased, 92.0);
        assert_eq!(rebase_player_seconds(100.0, None, Some(WINDOW_START)), 100.0);
    }

    #[test]
    fn test_correction_is_symmetric() {
        let correction = 3_600.5;
        assert_eq!(to_native(12.0, correction), 3_612.5);
        assert_eq!(to_logical(to_native(12.0, correction), correction), 12.0);
    }
}
