pub mod small_set;
pub mod queue;

pub use small_set::SmallSet;
pub use queue::{UniqueDeferredQueue, UniqueNonrepeatingDeferredQueue};
