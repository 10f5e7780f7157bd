//! Convergence Calculator
//!
//! Geometric growth of a size until a utilization ceiling or an absolute
//! floor is met. All functions are unit-agnostic: callers convert bytes to
//! MiB or GiB before or after calling, never inside.

/// Multiplicative step applied per growth iteration
pub const GROWTH_STEP: f64 = 1.05;

/// Multiplicative step used when growing the storage-capacity quota
pub const CAPACITY_STEP: f64 = 1.1;

/// Smallest size reachable by repeated 5% steps whose projected utilization
/// is at or below `ceiling_percent`.
///
/// At least one step is always applied, so the result is never below
/// `current_size * 1.05` even when `used` is zero. Callers guarantee
/// `current_size > 0` and `0 < ceiling_percent < 100`.
pub fn grow_to_threshold(current_size: f64, used: f64, ceiling_percent: f64) -> u64 {
    debug_assert!(current_size > 0.0, "current size must be positive");
    debug_assert!(
        ceiling_percent > 0.0 && ceiling_percent < 100.0,
        "ceiling must be a percentage"
    );

    let mut candidate = current_size * GROWTH_STEP;
    while used / candidate * 100.0 > ceiling_percent {
        candidate *= GROWTH_STEP;
    }
    candidate.ceil() as u64
}

/// Smallest size reachable by repeated `step` growth that is not below
/// `floor`. At least one step is always applied.
pub fn grow_to_floor(current_size: f64, floor: f64, step: f64) -> u64 {
    debug_assert!(current_size > 0.0, "current size must be positive");
    debug_assert!(step > 1.0, "step must grow the size");

    let mut candidate = current_size * step;
    while candidate < floor {
        candidate *= step;
    }
    candidate.ceil() as u64
}

/// New storage-capacity quota (GiB) for the pool pass.
///
/// The quota follows the raw aggregate's own margin (`quota + pool * (margin - 1)`)
/// but never grows by less than `margin` of itself.
pub fn storage_capacity_target(current_quota_gib: u64, aggregate_total_gib: f64, margin: f64) -> u64 {
    let quota = current_quota_gib as f64;
    let proportional = quota + (aggregate_total_gib * margin - aggregate_total_gib);
    let flat = quota * margin;
    proportional.max(flat).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    #[test]
    fn test_grow_to_threshold_meets_ceiling() {
        let sizes = [1.0 * GB, 100.0 * GB, 1536.0 * GB, 7.0];
        let fills = [0.0, 0.5, 0.9, 0.99, 1.0];
        let ceilings = [50.0, 80.0, 90.0, 99.0];

        for &size in &sizes {
            for &fill in &fills {
                for &ceiling in &ceilings {
                    let used = size * fill;
                    let new_size = grow_to_threshold(size, used, ceiling) as f64;
                    assert!(new_size >= size * GROWTH_STEP, "size={size} fill={fill}");
                    assert!(
                        used / new_size * 100.0 <= ceiling + 1e-9,
                        "size={size} fill={fill} ceiling={ceiling}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_grow_to_threshold_scenario() {
        // 100GB LUN, 92GB used, 90% ceiling
        let new_size = grow_to_threshold(100.0 * GB, 92.0 * GB, 90.0);
        assert_eq!(new_size, (100.0 * GB * 1.05).ceil() as u64);
        assert!(92.0 * GB / new_size as f64 * 100.0 <= 90.0);
        assert!(new_size as f64 >= 102.3 * GB);
    }

    #[test]
    fn test_grow_to_threshold_full_lun_needs_several_steps() {
        // used == size: 1.05^n must reach 100/80 = 1.25, n = 5
        let new_size = grow_to_threshold(1000.0, 1000.0, 80.0);
        assert_eq!(new_size, (1000.0 * 1.05_f64.powi(5)).ceil() as u64);
    }

    #[test]
    fn test_grow_to_threshold_empty_still_grows_once() {
        assert_eq!(grow_to_threshold(200.0, 0.0, 90.0), 210);
    }

    #[test]
    fn test_grow_to_floor() {
        assert_eq!(grow_to_floor(200.0, 205.0, GROWTH_STEP), 210);
        assert_eq!(grow_to_floor(200.0, 100.0, GROWTH_STEP), 210);
        // 1024 -> 1126.4 -> 1239.04
        assert_eq!(grow_to_floor(1024.0, 1200.0, CAPACITY_STEP), 1240);
    }

    #[test]
    fn test_storage_capacity_target_takes_larger_step() {
        // Proportional: 1024 + 204.8 = 1228.8 beats flat 1126.4
        assert_eq!(storage_capacity_target(1024, 2048.0, CAPACITY_STEP), 1229);
        // Proportional: 1024 + 51.2 = 1075.2 loses to flat 1126.4
        assert_eq!(storage_capacity_target(1024, 512.0, CAPACITY_STEP), 1127);
        // Degenerate pool figure still yields the flat bump
        assert_eq!(storage_capacity_target(1000, 0.0, CAPACITY_STEP), 1100);
    }
}
