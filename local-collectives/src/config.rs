use clap::Parser;
use window_lib::{DEFAULT_STAGE_CAPACITY, SpinBudget};

/// Tunables for the shared windows and the spin protocol, resolved from
/// flags or `LCC_*` environment variables.
#[derive(Debug, Clone, Parser)]
pub struct CommConfig {
    /// Ring slots per queue. Interleaved producer lanes require this to be
    /// a multiple of the rank count.
    #[clap(long, env = "LCC_SLOT_COUNT", default_value_t = 8)]
    pub slot_count: usize,

    /// Bytes per queue slot; must be a multiple of 8.
    #[clap(long, env = "LCC_SLOT_CAPACITY", default_value_t = 4096)]
    pub slot_capacity: usize,

    /// Bytes per staging buffer of each unit's copier.
    #[clap(long, env = "LCC_STAGE_CAPACITY", default_value_t = DEFAULT_STAGE_CAPACITY)]
    pub stage_capacity: usize,

    /// Spin budget per flag wait; unset falls back to the library default.
    #[clap(long, env = "LCC_SPIN_BUDGET")]
    pub spin_budget: Option<u64>,

    /// Pin execution units to CPUs starting at this index.
    #[clap(long, env = "LCC_PIN_BASE")]
    pub pin_base: Option<u16>,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            slot_count: 8,
            slot_capacity: 4096,
            stage_capacity: DEFAULT_STAGE_CAPACITY,
            spin_budget: None,
            pin_base: None,
        }
    }
}

impl CommConfig {
    pub fn budget(&self) -> SpinBudget {
        self.spin_budget.map(SpinBudget::new).unwrap_or_default()
    }
}
