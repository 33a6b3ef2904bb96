//! Determinism enforcement for report generation
//!
//! A [`DeterminismScope`] temporarily forces deterministic numeric and
//! threading behavior for the duration of one operation, then restores the
//! prior process state exactly, on every exit path including panics and
//! early errors. It pins the thread-pool environment of any numeric kernel
//! or attribution-backend subprocess to a single worker, disables hash
//! randomization for subprocesses, and seeds the crate-global generator.
//!
//! Scopes are process-wide state. They must never overlap; a second `enter`
//! while one scope is active fails rather than producing undefined nesting.

use crate::errors::{ExplainError, Result};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Thread-pool environment variables pinned to one worker inside a scope.
const THREAD_PIN_VARS: &[&str] = &[
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "VECLIB_MAXIMUM_THREADS",
    "NUMEXPR_NUM_THREADS",
    "RAYON_NUM_THREADS",
];

/// Hash-randomization pin exported for attribution-backend subprocesses.
const HASH_SEED_VAR: &str = "PYTHONHASHSEED";

/// Reproducible-builds epoch override honored for report timestamps.
pub const SOURCE_DATE_EPOCH_VAR: &str = "SOURCE_DATE_EPOCH";

static SCOPE_ACTIVE: AtomicBool = AtomicBool::new(false);

static GLOBAL_RNG: Lazy<Mutex<Option<StdRng>>> = Lazy::new(|| Mutex::new(None));

/// Serializes environment-touching tests within this crate.
#[cfg(test)]
pub(crate) static ENV_TEST_LOCK: Mutex<()> = Mutex::new(());

/// Per-call scope options.
///
/// Strictness is always an explicit parameter here, never inferred from
/// ambient configuration: some call sites (PDF generation) require
/// `strict: true` regardless of the outer audit profile.
#[derive(Debug, Clone, Copy)]
pub struct ScopeOptions {
    pub seed: u64,
    /// Fail the operation when a control cannot be applied.
    pub strict: bool,
    /// With `strict`, collect failures into the report instead of aborting.
    pub warn_only: bool,
}

/// One determinism control applied on scope entry.
#[derive(Debug, Clone)]
pub struct Control {
    name: String,
    kind: ControlKind,
}

#[derive(Debug, Clone)]
enum ControlKind {
    EnvVar { key: String, value: String },
    SeedRng { seed: u64 },
    /// A hook this build does not expose (e.g. an unlinked numeric backend).
    Unavailable { reason: String },
}

impl Control {
    pub fn env(key: &str, value: impl Into<String>) -> Self {
        Self {
            name: key.to_string(),
            kind: ControlKind::EnvVar {
                key: key.to_string(),
                value: value.into(),
            },
        }
    }

    pub fn seed_rng(seed: u64) -> Self {
        Self {
            name: "global_rng".to_string(),
            kind: ControlKind::SeedRng { seed },
        }
    }

    pub fn unavailable(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ControlKind::Unavailable {
                reason: reason.to_string(),
            },
        }
    }
}

/// The standard control set for a given seed.
pub fn default_controls(seed: u64) -> Vec<Control> {
    let mut controls = vec![Control::env(HASH_SEED_VAR, seed.to_string())];
    for var in THREAD_PIN_VARS {
        controls.push(Control::env(var, "1"));
    }
    controls.push(Control::seed_rng(seed));
    controls
}

/// A control that could not be applied on entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFailure {
    pub control: String,
    pub reason: String,
}

/// Outcome of applying the control set on scope entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlReport {
    pub successful: usize,
    pub total: usize,
    pub failures: Vec<ControlFailure>,
}

impl ControlReport {
    pub fn is_complete(&self) -> bool {
        self.successful == self.total
    }
}

/// Scoped determinism guard. Restores all touched state on drop.
#[derive(Debug)]
pub struct DeterminismScope {
    seed: u64,
    report: ControlReport,
    prior_env: BTreeMap<String, Option<String>>,
    prior_rng: Option<Option<StdRng>>,
    restored: bool,
}

impl DeterminismScope {
    /// Enter a scope with the standard control set.
    pub fn enter(seed: u64, strict: bool) -> Result<Self> {
        Self::enter_with_options(ScopeOptions {
            seed,
            strict,
            warn_only: false,
        })
    }

    pub fn enter_with_options(options: ScopeOptions) -> Result<Self> {
        Self::enter_with_controls(options, default_controls(options.seed))
    }

    /// Enter a scope with an explicit control list.
    ///
    /// Exposed so callers with extra backend hooks (and tests modeling
    /// unavailable ones) can extend the standard set.
    pub fn enter_with_controls(options: ScopeOptions, controls: Vec<Control>) -> Result<Self> {
        if SCOPE_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(ExplainError::DeterminismControl {
                failed: 0,
                total: 0,
                detail: "a determinism scope is already active in this process; \
                         scopes must not nest or overlap"
                    .to_string(),
            });
        }

        let mut scope = Self {
            seed: options.seed,
            report: ControlReport {
                successful: 0,
                total: controls.len(),
                failures: Vec::new(),
            },
            prior_env: BTreeMap::new(),
            prior_rng: None,
            restored: false,
        };

        for control in controls {
            match scope.apply(&control) {
                Ok(()) => scope.report.successful += 1,
                Err(reason) => {
                    warn!(control = %control.name, %reason, "determinism control not applied");
                    scope.report.failures.push(ControlFailure {
                        control: control.name,
                        reason,
                    });
                }
            }
        }

        if !scope.report.is_complete() && options.strict && !options.warn_only {
            let failed = scope.report.failures.len();
            let total = scope.report.total;
            let detail = scope
                .report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.control, f.reason))
                .collect::<Vec<_>>()
                .join("; ");
            // all-or-nothing: roll back whatever was applied before failing
            scope.restore();
            return Err(ExplainError::DeterminismControl {
                failed,
                total,
                detail,
            });
        }

        debug!(
            seed = scope.seed,
            successful = scope.report.successful,
            total = scope.report.total,
            "determinism scope entered"
        );
        Ok(scope)
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// `successful/total` control counts plus individual failures.
    pub fn report(&self) -> &ControlReport {
        &self.report
    }

    fn apply(&mut self, control: &Control) -> std::result::Result<(), String> {
        match &control.kind {
            ControlKind::EnvVar { key, value } => {
                self.prior_env
                    .entry(key.clone())
                    .or_insert_with(|| std::env::var(key).ok());
                std::env::set_var(key, value);
                Ok(())
            }
            ControlKind::SeedRng { seed } => {
                let mut slot = GLOBAL_RNG.lock().unwrap_or_else(|e| e.into_inner());
                if self.prior_rng.is_none() {
                    self.prior_rng = Some(slot.take());
                }
                *slot = Some(StdRng::seed_from_u64(*seed));
                Ok(())
            }
            ControlKind::Unavailable { reason } => Err(reason.clone()),
        }
    }

    /// Restore all touched state. Idempotent; never panics.
    fn restore(&mut self) {
        if self.restored {
            return;
        }
        for (key, prior) in &self.prior_env {
            match prior {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
        if let Some(prior) = self.prior_rng.take() {
            match GLOBAL_RNG.lock() {
                Ok(mut slot) => *slot = prior,
                Err(poisoned) => {
                    warn!("global RNG lock poisoned during scope restore");
                    *poisoned.into_inner() = prior;
                }
            }
        }
        self.restored = true;
        SCOPE_ACTIVE.store(false, Ordering::SeqCst);
        debug!(seed = self.seed, "determinism scope restored");
    }
}

impl Drop for DeterminismScope {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Run `f` against the scope-seeded generator.
///
/// Fails outside an active scope so callers cannot accidentally fall back to
/// entropy-seeded randomness on a report path.
pub fn with_scope_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> Result<T> {
    let mut slot = GLOBAL_RNG.lock().unwrap_or_else(|e| e.into_inner());
    match slot.as_mut() {
        Some(rng) => Ok(f(rng)),
        None => Err(ExplainError::DeterminismControl {
            failed: 1,
            total: 1,
            detail: "no active determinism scope; seeded randomness is unavailable".to_string(),
        }),
    }
}

/// Overall status of an environment validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pass,
    Warning,
}

/// Per-control environment check results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentValidation {
    pub checks: BTreeMap<String, bool>,
    pub warnings: Vec<String>,
    pub status: ValidationStatus,
}

/// Check whether the current process environment is pinned for determinism.
pub fn validate_environment() -> EnvironmentValidation {
    let mut checks = BTreeMap::new();
    let mut warnings = Vec::new();

    let hash_pinned = std::env::var(HASH_SEED_VAR).is_ok();
    checks.insert(HASH_SEED_VAR.to_string(), hash_pinned);
    if !hash_pinned {
        warnings.push(format!("{HASH_SEED_VAR} is not set"));
    }

    for var in THREAD_PIN_VARS {
        let pinned = std::env::var(var).as_deref() == Ok("1");
        checks.insert((*var).to_string(), pinned);
        if !pinned {
            warnings.push(format!("{var} is not pinned to 1"));
        }
    }

    let status = if warnings.is_empty() {
        ValidationStatus::Pass
    } else {
        ValidationStatus::Warning
    };
    EnvironmentValidation {
        checks,
        warnings,
        status,
    }
}

/// Strict variant: any unpinned control is an error.
pub fn validate_environment_strict() -> Result<EnvironmentValidation> {
    let validation = validate_environment();
    if validation.status != ValidationStatus::Pass {
        let failed = validation.warnings.len();
        let total = validation.checks.len();
        return Err(ExplainError::DeterminismControl {
            failed,
            total,
            detail: validation.warnings.join("; "),
        });
    }
    Ok(validation)
}

// Derived report timestamps sit inside a fixed ten-year window starting at
// this anchor, so they stay plausible without ever touching the wall clock.
const TIMESTAMP_ANCHOR_EPOCH: i64 = 1_577_836_800; // 2020-01-01T00:00:00Z
const TIMESTAMP_WINDOW_SECS: u64 = 315_360_000;

fn format_epoch(epoch: i64) -> String {
    Utc.timestamp_opt(epoch, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Derive an RFC 3339 timestamp from a seed. Same seed, same string.
pub fn deterministic_timestamp(seed: u64) -> String {
    let offset = (seed % TIMESTAMP_WINDOW_SECS) as i64;
    format_epoch(TIMESTAMP_ANCHOR_EPOCH + offset)
}

/// Resolve the "generated at" timestamp for a report.
///
/// Prefers the `SOURCE_DATE_EPOCH` override when present, otherwise derives
/// from the seed. Never reads the system clock: embedded generation times
/// would break byte-identical output comparison.
pub fn resolve_timestamp(seed: u64) -> String {
    if let Ok(raw) = std::env::var(SOURCE_DATE_EPOCH_VAR) {
        match raw.trim().parse::<i64>() {
            Ok(epoch) => return format_epoch(epoch),
            Err(_) => warn!(
                value = %raw,
                "ignoring unparseable {SOURCE_DATE_EPOCH_VAR} override"
            ),
        }
    }
    deterministic_timestamp(seed)
}
