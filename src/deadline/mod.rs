use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;

/// Errors raised by deadline queries.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeadlineError {
    #[error("unknown resource class {0:?}")]
    UnknownResourceClass(String),

    #[error("deadline monitor queried before it was armed")]
    NotArmed,
}

/// Monotonic time source, measured from an arbitrary fixed origin.
pub trait MonotonicClock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Clock backed by [`Instant`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Used to replay deadline scenarios.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: parking_lot::Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: Duration) {
        *self.now.lock() = to;
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

/// Wall-clock allowance per scheduler resource class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBudgets {
    classes: BTreeMap<String, Duration>,
}

impl ResourceBudgets {
    pub fn empty() -> Self {
        Self {
            classes: BTreeMap::new(),
        }
    }

    /// Adds or replaces a class.
    pub fn with_class(mut self, name: impl Into<String>, budget: Duration) -> Self {
        self.classes.insert(name.into(), budget);
        self
    }

    pub fn budget(&self, class: &str) -> Result<Duration, DeadlineError> {
        self.classes
            .get(class)
            .copied()
            .ok_or_else(|| DeadlineError::UnknownResourceClass(class.to_string()))
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl Default for ResourceBudgets {
    /// HTCondor job flavours.
    fn default() -> Self {
        const MIN: u64 = 60;
        const HOUR: u64 = 60 * MIN;
        const DAY: u64 = 24 * HOUR;
        Self::empty()
            .with_class("espresso", Duration::from_secs(20 * MIN))
            .with_class("microcentury", Duration::from_secs(HOUR))
            .with_class("longlunch", Duration::from_secs(2 * HOUR))
            .with_class("workday", Duration::from_secs(8 * HOUR))
            .with_class("tomorrow", Duration::from_secs(DAY))
            .with_class("testmatch", Duration::from_secs(3 * DAY))
            .with_class("nextweek", Duration::from_secs(7 * DAY))
    }
}

/// Signed remaining time. Overdue means the budget is already spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeLeft {
    Remaining(Duration),
    Overdue(Duration),
}

impl TimeLeft {
    fn between(budget: Duration, elapsed: Duration) -> Self {
        match budget.checked_sub(elapsed) {
            Some(left) if !left.is_zero() => Self::Remaining(left),
            _ => Self::Overdue(elapsed.saturating_sub(budget)),
        }
    }

    /// True when no time is left at all.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Overdue(_))
    }

    /// True when less than `margin` remains (or the budget is spent).
    pub fn is_below(&self, margin: Duration) -> bool {
        match self {
            Self::Remaining(left) => *left < margin,
            Self::Overdue(_) => true,
        }
    }

    /// Signed seconds; negative when overdue.
    pub fn as_secs_f64(&self) -> f64 {
        match self {
            Self::Remaining(left) => left.as_secs_f64(),
            Self::Overdue(over) => -over.as_secs_f64(),
        }
    }
}

/// Tracks elapsed wall time since job start against resource-class budgets.
///
/// Built once per job and handed to the event loop. It reports nothing until
/// armed, which only happens in batch mode.
pub struct DeadlineMonitor {
    clock: Arc<dyn MonotonicClock>,
    budgets: ResourceBudgets,
    started_at: Option<Duration>,
}

impl std::fmt::Debug for DeadlineMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineMonitor")
            .field("budgets", &self.budgets)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl DeadlineMonitor {
    pub fn new(clock: Arc<dyn MonotonicClock>, budgets: ResourceBudgets) -> Self {
        Self {
            clock,
            budgets,
            started_at: None,
        }
    }

    /// Records the job start time. Arming twice keeps the first start time.
    pub fn arm(&mut self) {
        if self.started_at.is_some() {
            return;
        }
        let now = self.clock.now();
        self.started_at = Some(now);
        info!("deadline monitor armed");
    }

    pub fn started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Wall time since `arm`.
    pub fn elapsed(&self) -> Result<Duration, DeadlineError> {
        let start = self.started_at.ok_or(DeadlineError::NotArmed)?;
        Ok(self.clock.now().saturating_sub(start))
    }

    /// Budget of `class` minus the elapsed time.
    pub fn time_left(&self, class: &str) -> Result<TimeLeft, DeadlineError> {
        let budget = self.budgets.budget(class)?;
        Ok(TimeLeft::between(budget, self.elapsed()?))
    }

    /// Fraction of the budget of `class` consumed so far (may exceed 1.0).
    pub fn percent_consumed(&self, class: &str) -> Result<f64, DeadlineError> {
        let budget = self.budgets.budget(class)?;
        let elapsed = self.elapsed()?;
        if budget.is_zero() {
            return Ok(1.0);
        }
        Ok(elapsed.as_secs_f64() / budget.as_secs_f64())
    }

    pub fn budgets(&self) -> &ResourceBudgets {
        &self.budgets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(clock: &Arc<ManualClock>) -> DeadlineMonitor {
        let budgets = ResourceBudgets::empty().with_class("hour", Duration::from_secs(3600));
        DeadlineMonitor::new(clock.clone(), budgets)
    }

    #[test]
    fn test_not_started_until_armed() {
        let clock = Arc::new(ManualClock::new());
        let mut m = monitor(&clock);
        assert!(!m.started());
        assert_eq!(m.time_left("hour"), Err(DeadlineError::NotArmed));

        m.arm();
        assert!(m.started());
        assert_eq!(
            m.time_left("hour"),
            Ok(TimeLeft::Remaining(Duration::from_secs(3600)))
        );
    }

    #[test]
    fn test_time_left_near_end_of_slot() {
        let clock = Arc::new(ManualClock::new());
        clock.set(Duration::from_secs(1_000));
        let mut m = monitor(&clock);
        m.arm();

        clock.advance(Duration::from_secs(3595));
        let left = m.time_left("hour").expect("known class");
        assert_eq!(left, TimeLeft::Remaining(Duration::from_secs(5)));
        assert!(left.as_secs_f64() <= 5.0);
        assert!(left.is_below(Duration::from_secs(300)));
        assert!(!left.is_exhausted());
    }

    #[test]
    fn test_overdue_is_never_positive() {
        let clock = Arc::new(ManualClock::new());
        let mut m = monitor(&clock);
        m.arm();

        clock.advance(Duration::from_secs(3600));
        let left = m.time_left("hour").expect("known class");
        assert!(left.is_exhausted());
        assert_eq!(left.as_secs_f64(), 0.0);

        clock.advance(Duration::from_secs(30));
        let left = m.time_left("hour").expect("known class");
        assert_eq!(left, TimeLeft::Overdue(Duration::from_secs(30)));
        assert!(left.as_secs_f64() < 0.0);
    }

    #[test]
    fn test_percent_consumed() {
        let clock = Arc::new(ManualClock::new());
        let mut m = monitor(&clock);
        m.arm();
        clock.advance(Duration::from_secs(1800));
        let frac = m.percent_consumed("hour").expect("known class");
        assert!((frac - 0.5).abs() < 1e-9, "frac={frac}");
    }

    #[test]
    fn test_unknown_class() {
        let clock = Arc::new(ManualClock::new());
        let mut m = monitor(&clock);
        m.arm();
        assert_eq!(
            m.time_left("espresso"),
            Err(DeadlineError::UnknownResourceClass("espresso".into()))
        );
    }

    #[test]
    fn test_arm_is_sticky() {
        let clock = Arc::new(ManualClock::new());
        let mut m = monitor(&clock);
        m.arm();
        clock.advance(Duration::from_secs(10));
        m.arm();
        assert_eq!(m.elapsed(), Ok(Duration::from_secs(10)));
    }

    #[test]
    fn test_default_flavours() {
        let b = ResourceBudgets::default();
        assert_eq!(b.budget("espresso"), Ok(Duration::from_secs(20 * 60)));
        assert_eq!(b.budget("workday"), Ok(Duration::from_secs(8 * 3600)));
        assert_eq!(b.budget("nextweek"), Ok(Duration::from_secs(7 * 24 * 3600)));
        assert_eq!(b.class_names().count(), 7);
    }

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(5));
        assert!(clock.now() > a);
    }
}
