use once_cell::sync::Lazy;

/// Fallback spin budget, overridable via `LCC_SPIN_BUDGET`.
static ENV_SPIN_BUDGET: Lazy<u64> = Lazy::new(|| {
    std::env::var("LCC_SPIN_BUDGET")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1 << 26)
});

/// Bounded busy-wait policy.
///
/// Execution units cannot block or sleep; the only suspension primitive is a
/// spin on a shared flag cell. The budget makes that spin finite so a missing
/// partner turns into `WindowLibError::FlagTimeout` rather than a hang.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpinBudget {
    pub max_spins: u64,
}

impl SpinBudget {
    pub fn new(max_spins: u64) -> Self {
        Self { max_spins }
    }
}

impl Default for SpinBudget {
    fn default() -> Self {
        Self { max_spins: *ENV_SPIN_BUDGET }
    }
}

pub(crate) struct SpinWait {
    budget: SpinBudget,
    spun: u64,
}

impl SpinWait {
    pub(crate) fn new(budget: SpinBudget) -> Self {
        Self { budget, spun: 0 }
    }

    pub(crate) fn spun(&self) -> u64 {
        self.spun
    }

    /// One spin iteration. Returns false once the budget is exhausted.
    pub(crate) fn spin(&mut self) -> bool {
        if self.spun >= self.budget.max_spins {
            return false;
        }
        self.spun += 1;
        if self.spun.is_multiple_of(256) {
            std::thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
        true
    }
}
