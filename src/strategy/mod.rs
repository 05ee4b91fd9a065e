// =============================================================================
// Strategies — per-scenario evaluators polled by the runtime loop
// =============================================================================
//
// Both strategies share the same shape: on each tick, read the two relevant
// prices from the cache; with no live position, evaluate entry; with one,
// evaluate exit. One position per strategy instance at a time.
// =============================================================================

pub mod scenario_a;
pub mod scenario_b;

pub use scenario_a::ScenarioAStrategy;
pub use scenario_b::ScenarioBStrategy;
