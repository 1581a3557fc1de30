// 📊 Fund Availability Estimator - Allocation data blended with community reports
//
// Rule-based and deterministic. The allocation decides the base level, recent
// reports may pull it by at most one step:
//
//   remaining ratio > threshold   → likely-available
//   0 < ratio <= threshold        → uncertain
//   ratio <= 0                    → likely-exhausted
//   consumption unknown           → uncertain (confidence grows through the month)
//   no allocation this month      → unknown (reports only lean, never decide)

use crate::allocation::MergedAllocation;
use crate::reports::{ReportKind, UserReport};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Tuning constants for the estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Reports older than this are ignored; weight decays linearly to zero across it
    pub window_hours: f64,

    /// Remaining share above which funds are likely available
    pub available_ratio_threshold: f64,

    /// Weighted report difference needed for a full one-step pull
    pub pull_margin: f64,

    /// Confidence when the consumed amount is known
    pub allocation_confidence: f64,

    /// Confidence at the start of the month when consumption is unknown
    pub month_progress_min_confidence: f64,

    /// Added on top of the minimum by the end of the month
    pub month_progress_confidence_span: f64,

    /// Confidence added per qualifying report
    pub report_confidence_step: f64,

    /// Maximum confidence reports can add
    pub report_confidence_cap: f64,

    pub reports_only_base_confidence: f64,
    pub reports_only_max_confidence: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        EstimatorConfig {
            window_hours: 48.0,
            available_ratio_threshold: 0.15,
            pull_margin: 1.0,
            allocation_confidence: 0.7,
            month_progress_min_confidence: 0.2,
            month_progress_confidence_span: 0.3,
            report_confidence_step: 0.05,
            report_confidence_cap: 0.15,
            reports_only_base_confidence: 0.1,
            reports_only_max_confidence: 0.3,
        }
    }
}

// ============================================================================
// STATUS TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AvailabilityLevel {
    LikelyAvailable,
    Uncertain,
    LikelyExhausted,
    Unknown,
}

impl AvailabilityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityLevel::LikelyAvailable => "likely-available",
            AvailabilityLevel::Uncertain => "uncertain",
            AvailabilityLevel::LikelyExhausted => "likely-exhausted",
            AvailabilityLevel::Unknown => "unknown",
        }
    }

    /// likely-available (2) > uncertain (1) > likely-exhausted (0); unknown has no rank
    pub fn availability_rank(&self) -> Option<u8> {
        match self {
            AvailabilityLevel::LikelyAvailable => Some(2),
            AvailabilityLevel::Uncertain => Some(1),
            AvailabilityLevel::LikelyExhausted => Some(0),
            AvailabilityLevel::Unknown => None,
        }
    }

    fn step_down(self) -> Self {
        match self {
            AvailabilityLevel::LikelyAvailable => AvailabilityLevel::Uncertain,
            AvailabilityLevel::Uncertain => AvailabilityLevel::LikelyExhausted,
            other => other,
        }
    }

    fn step_up(self) -> Self {
        match self {
            AvailabilityLevel::LikelyExhausted => AvailabilityLevel::Uncertain,
            AvailabilityLevel::Uncertain => AvailabilityLevel::LikelyAvailable,
            other => other,
        }
    }
}

/// Machine-usable reason behind a status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    /// Remaining ratio from allocated and consumed amounts
    AllocationData,

    /// Allocation data, moved by community reports
    AllocationWithReports,

    /// Allocation without consumption, judged by day of month
    MonthProgress,

    /// Month progress, moved by community reports
    MonthProgressWithReports,

    CommunityReportsOnly,
    NoData,
}

/// Coarse grouping of reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Basis {
    Allocation,
    CommunityReports,
    NoData,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::AllocationData => "allocation-data",
            ReasonCode::AllocationWithReports => "allocation-with-reports",
            ReasonCode::MonthProgress => "month-progress",
            ReasonCode::MonthProgressWithReports => "month-progress-with-reports",
            ReasonCode::CommunityReportsOnly => "community-reports-only",
            ReasonCode::NoData => "no-data",
        }
    }

    pub fn basis(&self) -> Basis {
        match self {
            ReasonCode::AllocationData
            | ReasonCode::AllocationWithReports
            | ReasonCode::MonthProgress
            | ReasonCode::MonthProgressWithReports => Basis::Allocation,
            ReasonCode::CommunityReportsOnly => Basis::CommunityReports,
            ReasonCode::NoData => Basis::NoData,
        }
    }

    /// True when community reports changed the level
    pub fn cites_reports(&self) -> bool {
        matches!(
            self,
            ReasonCode::AllocationWithReports
                | ReasonCode::MonthProgressWithReports
                | ReasonCode::CommunityReportsOnly
        )
    }
}

/// Direction community reports point to when there is no allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lean {
    Likely,
    Unlikely,
    Mixed,
}

/// Recency-weighted report counts inside the window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSignals {
    pub available_weight: f64,
    pub exhausted_weight: f64,

    /// Fund reports inside the window
    pub qualifying: usize,

    /// long-wait / good-service reports inside the window
    pub informational: usize,
}

impl ReportSignals {
    /// Positive when exhausted reports dominate
    pub fn pressure(&self) -> f64 {
        self.exhausted_weight - self.available_weight
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundStatus {
    pub level: AvailabilityLevel,

    /// 0..=1
    pub confidence: f64,

    pub explanation: ReasonCode,

    /// Only set for report-only estimates
    pub lean: Option<Lean>,

    pub remaining_ratio: Option<f64>,
    pub signals: ReportSignals,
}

// ============================================================================
// ESTIMATOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct FundEstimator {
    config: EstimatorConfig,
}

impl FundEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        FundEstimator { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Estimate availability as of `now`
    ///
    /// An allocation for another month than `now`, or with nothing allocated,
    /// counts as absent. Reports outside the window are ignored.
    pub fn estimate(
        &self,
        allocation: Option<&MergedAllocation>,
        reports: &[UserReport],
        now: DateTime<Utc>,
    ) -> FundStatus {
        let signals = self.report_signals(reports, now);

        let allocation = allocation
            .filter(|a| a.year == now.year() && a.month == now.month())
            .filter(|a| a.allocated.is_finite() && a.allocated > 0.0);

        let status = match allocation {
            Some(allocation) => self.estimate_from_allocation(allocation, signals, now),
            None => self.estimate_from_reports(signals),
        };

        tracing::debug!(
            level = status.level.as_str(),
            reason = status.explanation.as_str(),
            confidence = status.confidence,
            "fund estimate"
        );
        status
    }

    fn estimate_from_allocation(
        &self,
        allocation: &MergedAllocation,
        signals: ReportSignals,
        now: DateTime<Utc>,
    ) -> FundStatus {
        let remaining_ratio = allocation.remaining_ratio();

        let (base, base_confidence, reason, moved_reason) = match remaining_ratio {
            Some(ratio) => (
                self.level_for_ratio(ratio),
                self.config.allocation_confidence,
                ReasonCode::AllocationData,
                ReasonCode::AllocationWithReports,
            ),
            None => (
                AvailabilityLevel::Uncertain,
                self.month_progress_confidence(now),
                ReasonCode::MonthProgress,
                ReasonCode::MonthProgressWithReports,
            ),
        };

        let level = self.apply_reports(base, &signals);
        let explanation = if level != base { moved_reason } else { reason };
        let confidence = clamp_unit(base_confidence + self.report_bonus(&signals));

        FundStatus {
            level,
            confidence,
            explanation,
            lean: None,
            remaining_ratio,
            signals,
        }
    }

    fn estimate_from_reports(&self, signals: ReportSignals) -> FundStatus {
        if signals.qualifying == 0 {
            return FundStatus {
                level: AvailabilityLevel::Unknown,
                confidence: 0.0,
                explanation: ReasonCode::NoData,
                lean: None,
                remaining_ratio: None,
                signals,
            };
        }

        let pressure = signals.pressure();
        let lean = if pressure >= self.config.pull_margin {
            Lean::Unlikely
        } else if -pressure >= self.config.pull_margin {
            Lean::Likely
        } else {
            Lean::Mixed
        };

        let confidence = (self.config.reports_only_base_confidence + self.report_bonus(&signals))
            .min(self.config.reports_only_max_confidence);

        FundStatus {
            level: AvailabilityLevel::Unknown,
            confidence: clamp_unit(confidence),
            explanation: ReasonCode::CommunityReportsOnly,
            lean: Some(lean),
            remaining_ratio: None,
            signals,
        }
    }

    /// Base level from the remaining share of the quota
    pub fn level_for_ratio(&self, ratio: f64) -> AvailabilityLevel {
        if ratio > self.config.available_ratio_threshold {
            AvailabilityLevel::LikelyAvailable
        } else if ratio > 0.0 {
            AvailabilityLevel::Uncertain
        } else {
            AvailabilityLevel::LikelyExhausted
        }
    }

    /// Move the base level by at most one step
    ///
    /// Any exhausted majority caps the level at uncertain; a majority of at
    /// least `pull_margin` steps down. Positive pull is symmetric but needs the
    /// full margin.
    fn apply_reports(&self, base: AvailabilityLevel, signals: &ReportSignals) -> AvailabilityLevel {
        let pressure = signals.pressure();
        let margin = self.config.pull_margin;

        if pressure >= margin {
            base.step_down()
        } else if pressure > 0.0 && base == AvailabilityLevel::LikelyAvailable {
            AvailabilityLevel::Uncertain
        } else if -pressure >= margin {
            base.step_up()
        } else {
            base
        }
    }

    /// Recency-weighted counts of fund reports inside the window
    pub fn report_signals(&self, reports: &[UserReport], now: DateTime<Utc>) -> ReportSignals {
        let mut signals = ReportSignals::default();

        for report in reports {
            let weight = self.recency_weight(now - report.created_at);
            if weight <= 0.0 {
                continue;
            }
            match report.kind {
                ReportKind::FundsAvailable => {
                    signals.available_weight += weight;
                    signals.qualifying += 1;
                }
                ReportKind::FundsExhausted => {
                    signals.exhausted_weight += weight;
                    signals.qualifying += 1;
                }
                ReportKind::LongWait | ReportKind::GoodService => signals.informational += 1,
            }
        }

        signals
    }

    /// 1.0 for a fresh report, falling linearly to 0.0 at the end of the window
    ///
    /// Reports dated after `now` get no weight.
    pub fn recency_weight(&self, age: Duration) -> f64 {
        if age < Duration::zero() || self.config.window_hours <= 0.0 {
            return 0.0;
        }
        let age_hours = age.num_seconds() as f64 / 3600.0;
        (1.0 - age_hours / self.config.window_hours).max(0.0)
    }

    fn report_bonus(&self, signals: &ReportSignals) -> f64 {
        (signals.qualifying as f64 * self.config.report_confidence_step)
            .min(self.config.report_confidence_cap)
            .max(0.0)
    }

    /// Later in the month means more confidence that funds are running low
    fn month_progress_confidence(&self, now: DateTime<Utc>) -> f64 {
        let days = days_in_month(now.year(), now.month()) as f64;
        let elapsed = (now.day() - 1) as f64 + now.num_seconds_from_midnight() as f64 / 86_400.0;
        let progress = (elapsed / days).clamp(0.0, 1.0);
        clamp_unit(
            self.config.month_progress_min_confidence
                + self.config.month_progress_confidence_span * progress,
        )
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(first), Some(next)) => (next - first).num_days() as u32,
        _ => 30,
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::FundAllocation;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn allocation(allocated: f64, consumed: Option<f64>) -> MergedAllocation {
        let mut row = FundAllocation::new("p1", 2025, 3, "clinic", allocated, "cas.csv");
        row.consumed = consumed;
        MergedAllocation::from(&row)
    }

    fn report(kind: ReportKind, hours_ago: i64, submitter: &str) -> UserReport {
        UserReport::new("p1", kind, None, submitter, "salt", now() - Duration::hours(hours_ago))
    }

    fn exhausted(hours: &[i64]) -> Vec<UserReport> {
        hours
            .iter()
            .enumerate()
            .map(|(i, h)| report(ReportKind::FundsExhausted, *h, &format!("u{}", i)))
            .collect()
    }

    #[test]
    fn test_nearly_spent_allocation_is_uncertain() {
        let estimator = FundEstimator::default();
        let status = estimator.estimate(Some(&allocation(10000.0, Some(9200.0))), &[], now());

        assert_eq!(status.level, AvailabilityLevel::Uncertain);
        assert_eq!(status.explanation, ReasonCode::AllocationData);
        assert_eq!(status.explanation.basis(), Basis::Allocation);
        assert!((status.remaining_ratio.unwrap() - 0.08).abs() < 1e-9);
        assert!((status.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_exhausted_reports_pull_down_one_step() {
        let estimator = FundEstimator::default();
        let status = estimator.estimate(
            Some(&allocation(10000.0, Some(1000.0))),
            &exhausted(&[0, 1, 2]),
            now(),
        );

        assert_eq!(status.level, AvailabilityLevel::Uncertain);
        assert_eq!(status.explanation, ReasonCode::AllocationWithReports);
        assert!(status.explanation.cites_reports());
        assert_eq!(status.signals.qualifying, 3);
        assert!(status.confidence > 0.7);
        assert!(status.confidence <= 0.7 + 0.15 + 1e-9);
    }

    #[test]
    fn test_ratio_thresholds() {
        let estimator = FundEstimator::default();
        assert_eq!(estimator.level_for_ratio(0.9), AvailabilityLevel::LikelyAvailable);
        assert_eq!(estimator.level_for_ratio(0.15), AvailabilityLevel::Uncertain);
        assert_eq!(estimator.level_for_ratio(0.01), AvailabilityLevel::Uncertain);
        assert_eq!(estimator.level_for_ratio(0.0), AvailabilityLevel::LikelyExhausted);
        assert_eq!(estimator.level_for_ratio(-0.3), AvailabilityLevel::LikelyExhausted);
    }

    #[test]
    fn test_no_allocation_and_no_reports_is_no_data() {
        let status = FundEstimator::default().estimate(None, &[], now());

        assert_eq!(status.level, AvailabilityLevel::Unknown);
        assert_eq!(status.explanation, ReasonCode::NoData);
        assert_eq!(status.confidence, 0.0);
        assert_eq!(status.lean, None);
    }

    #[test]
    fn test_reports_only_lean_without_certainty() {
        let estimator = FundEstimator::default();
        let reports = exhausted(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let status = estimator.estimate(None, &reports, now());

        assert_eq!(status.level, AvailabilityLevel::Unknown);
        assert_eq!(status.explanation, ReasonCode::CommunityReportsOnly);
        assert_eq!(status.lean, Some(Lean::Unlikely));
        assert!(status.confidence <= 0.3 + 1e-9);
    }

    #[test]
    fn test_reports_only_mixed_signals() {
        let reports = vec![
            report(ReportKind::FundsAvailable, 1, "a"),
            report(ReportKind::FundsExhausted, 1, "b"),
        ];
        let status = FundEstimator::default().estimate(None, &reports, now());
        assert_eq!(status.lean, Some(Lean::Mixed));
    }

    #[test]
    fn test_allocation_for_other_month_counts_as_absent() {
        let mut old = allocation(10000.0, Some(0.0));
        old.month = 2;
        let status = FundEstimator::default().estimate(Some(&old), &[], now());
        assert_eq!(status.level, AvailabilityLevel::Unknown);
    }

    #[test]
    fn test_zero_allocation_counts_as_absent() {
        let status = FundEstimator::default().estimate(Some(&allocation(0.0, Some(0.0))), &[], now());
        assert_eq!(status.level, AvailabilityLevel::Unknown);
    }

    #[test]
    fn test_unknown_consumption_uses_month_progress() {
        let estimator = FundEstimator::default();
        let early = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2025, 3, 28, 0, 0, 0).unwrap();

        let a = allocation(10000.0, None);
        let early_status = estimator.estimate(Some(&a), &[], early);
        let late_status = estimator.estimate(Some(&a), &[], late);

        assert_eq!(early_status.level, AvailabilityLevel::Uncertain);
        assert_eq!(early_status.explanation, ReasonCode::MonthProgress);
        assert!((early_status.confidence - 0.2).abs() < 1e-9);
        assert!(late_status.confidence > early_status.confidence);
        assert!(late_status.confidence <= 0.5);
    }

    #[test]
    fn test_recency_weight_decays_over_window() {
        let estimator = FundEstimator::default();

        assert!(estimator.recency_weight(Duration::minutes(30)) > 0.98);
        assert!(estimator.recency_weight(Duration::hours(47)) < 0.03);
        assert_eq!(estimator.recency_weight(Duration::hours(48)), 0.0);
        assert_eq!(estimator.recency_weight(Duration::hours(72)), 0.0);
        assert_eq!(estimator.recency_weight(Duration::hours(-1)), 0.0);
    }

    #[test]
    fn test_informational_reports_do_not_move_level() {
        let reports = vec![
            report(ReportKind::LongWait, 1, "a"),
            report(ReportKind::LongWait, 1, "b"),
            report(ReportKind::GoodService, 1, "c"),
        ];
        let status = FundEstimator::default().estimate(Some(&allocation(10000.0, Some(1000.0))), &reports, now());

        assert_eq!(status.level, AvailabilityLevel::LikelyAvailable);
        assert_eq!(status.explanation, ReasonCode::AllocationData);
        assert_eq!(status.signals.informational, 3);
        assert!((status.confidence - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_stale_reports_ignored() {
        let status = FundEstimator::default().estimate(
            Some(&allocation(10000.0, Some(1000.0))),
            &exhausted(&[50, 60, 70]),
            now(),
        );
        assert_eq!(status.level, AvailabilityLevel::LikelyAvailable);
        assert_eq!(status.signals.qualifying, 0);
    }

    #[test]
    fn test_positive_reports_pull_up_one_step() {
        let reports = vec![
            report(ReportKind::FundsAvailable, 0, "a"),
            report(ReportKind::FundsAvailable, 1, "b"),
        ];
        let status = FundEstimator::default().estimate(Some(&allocation(10000.0, Some(10500.0))), &reports, now());

        assert_eq!(status.level, AvailabilityLevel::Uncertain);
        assert_eq!(status.explanation, ReasonCode::AllocationWithReports);
    }

    #[test]
    fn test_reports_never_move_more_than_one_step() {
        let reports = exhausted(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        let status = FundEstimator::default().estimate(Some(&allocation(10000.0, Some(0.0))), &reports, now());
        assert_eq!(status.level, AvailabilityLevel::Uncertain);
    }

    #[test]
    fn test_confidence_bonus_is_capped() {
        let estimator = FundEstimator::default();
        let few = estimator.estimate(Some(&allocation(10000.0, Some(9500.0))), &exhausted(&[1]), now());
        let many = estimator.estimate(Some(&allocation(10000.0, Some(9500.0))), &exhausted(&[1; 20]), now());

        assert!(many.confidence > few.confidence);
        assert!((many.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_monotonic_in_remaining_ratio() {
        let estimator = FundEstimator::default();
        let report_sets = vec![
            Vec::new(),
            exhausted(&[1]),
            exhausted(&[1, 2, 3]),
            vec![report(ReportKind::FundsAvailable, 1, "a"), report(ReportKind::FundsAvailable, 2, "b")],
            vec![report(ReportKind::FundsAvailable, 1, "a"), report(ReportKind::FundsExhausted, 30, "b")],
        ];

        for reports in &report_sets {
            let mut previous_rank = u8::MAX;
            // consumed rises, so remaining ratio falls
            for step in 0..=24 {
                let consumed = step as f64 * 500.0;
                let status = estimator.estimate(Some(&allocation(10000.0, Some(consumed))), reports, now());
                let rank = status.level.availability_rank().unwrap();
                assert!(rank <= previous_rank, "rank rose at consumed={}", consumed);
                previous_rank = rank;
            }
        }
    }

    #[test]
    fn test_exhausted_majority_never_likely_available() {
        let estimator = FundEstimator::default();
        let report_sets = vec![
            exhausted(&[40]),
            exhausted(&[1]),
            vec![
                report(ReportKind::FundsAvailable, 20, "a"),
                report(ReportKind::FundsExhausted, 2, "b"),
            ],
            vec![
                report(ReportKind::FundsAvailable, 1, "a"),
                report(ReportKind::FundsExhausted, 1, "b"),
                report(ReportKind::FundsExhausted, 30, "c"),
            ],
        ];

        for reports in &report_sets {
            let signals = estimator.report_signals(reports, now());
            assert!(signals.exhausted_weight > signals.available_weight);

            for consumed in [0.0, 2000.0, 8000.0, 9000.0, 12000.0] {
                let status = estimator.estimate(Some(&allocation(10000.0, Some(consumed))), reports, now());
                assert_ne!(status.level, AvailabilityLevel::LikelyAvailable);
            }
            let unknown_consumption = estimator.estimate(Some(&allocation(10000.0, None)), reports, now());
            assert_ne!(unknown_consumption.level, AvailabilityLevel::LikelyAvailable);
        }
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config: EstimatorConfig = serde_json::from_str(r#"{"window_hours": 24}"#).unwrap();
        assert_eq!(config.window_hours, 24.0);
        assert_eq!(config.pull_margin, 1.0);
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2025, 2), 28);
        assert_eq!(days_in_month(2025, 12), 31);
    }
}
