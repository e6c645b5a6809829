//! Schedule bookkeeping: trigger evaluation, the schedule registry and
//! execution history

pub mod history;
pub mod registry;
pub mod trigger;

pub use history::ExecutionHistory;
pub use registry::ScheduleRegistry;
pub use trigger::CompiledTrigger;
