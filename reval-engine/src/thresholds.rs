//! Fixed thresholds of the activation and pre-test logic.
//!
//! Tunable knobs live in `params`; these values are part of the method and
//! are shared by the classifier, the pre-test selector and the reports.

/// How many weeks the contiguous pre-test search may shift back.
/// The scattered search walks twice as far.
pub const PRETEST_MAX_LOOKBACK_WEEKS: usize = 26;

/// Largest pre-test window that can ever be found; longer requests are clamped.
pub const PRETEST_MAX_WINDOW_WEEKS: usize = PRETEST_MAX_LOOKBACK_WEEKS * 2;

/// Fact-price movement (percent) that releases the coincidence lock, and
/// below which the first test week counts as "price never changed".
pub const COINCIDENCE_LOCK_PCT: f64 = 1.0;

/// Fact-price movement (percent) reported as `fact_price_changed`.
pub const FACT_PRICE_CHANGED_PCT: f64 = 1.0;

/// Fact-price movement (percent) reported as `is_fact_change`; filters float noise.
pub const FACT_CHANGE_EPSILON_PCT: f64 = 0.01;

/// A plan price whose cents already sit this close to the rounding target
/// is left untouched.
pub const ROUNDING_FRACTION_TOLERANCE: f64 = 0.01;

/// Days in a week, as used by the availability share.
pub const DAYS_PER_WEEK: f64 = 7.0;

/// Weeks shown before the first pre-test week in a product timeline.
pub const TIMELINE_LEAD_WEEKS: i64 = 4;

/// Weeks shown before the search end when no pre-test window exists.
pub const TIMELINE_FALLBACK_WEEKS: i64 = 8;
