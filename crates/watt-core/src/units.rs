//! Power and energy unit conversions

/// Watt-seconds in one kilowatt-hour
pub const WATT_SECONDS_PER_KWH: f64 = 3_600_000.0;

/// Energy in kWh for an average power held over `seconds`
pub fn energy_kwh(avg_power_w: f64, seconds: i64) -> f64 {
    avg_power_w * seconds as f64 / WATT_SECONDS_PER_KWH
}

/// Energy for one minute at `avg_power_w` (W·min → kWh)
pub fn minute_energy_kwh(avg_power_w: f64) -> f64 {
    energy_kwh(avg_power_w, 60)
}

/// Difference between two counter readings, clamped at zero.
///
/// A device reboot zeroes its cumulative counter, so a later reading can be
/// lower than an earlier one; that span contributes nothing.
pub fn counter_delta_kwh(baseline_kwh: f64, final_kwh: f64) -> f64 {
    (final_kwh - baseline_kwh).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_energy() {
        // 120 W for one minute is 2 Wh
        assert!((minute_energy_kwh(120.0) - 0.002).abs() < 1e-12);
        assert!((minute_energy_kwh(120.0) - energy_kwh(120.0, 60)).abs() < 1e-12);
    }

    #[test]
    fn test_energy_over_hour() {
        assert!((energy_kwh(1000.0, 3600) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_counter_delta_clamps_resets() {
        assert!((counter_delta_kwh(10.0, 12.5) - 2.5).abs() < 1e-12);
        assert_eq!(counter_delta_kwh(10.0, 6.0), 0.0);
        assert_eq!(counter_delta_kwh(0.0, 0.0), 0.0);
    }
}
