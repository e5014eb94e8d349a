// ============================================================================
// Order Model
// ============================================================================
//
// The order aggregate as it travels over the bus, sits in the cache and is
// served to readers, plus the decode/validation rules applied to inbound
// messages.
//
// ============================================================================

pub mod order;
pub mod validation;

pub use order::*;
pub use validation::*;
