/*! Control-flow and temporal structure analyses.
 *
 * The lowering passes need to know which blocks execute within one logical
 * time step and which definitions dominate which uses. These analyses provide
 * CFG construction, dominance trees, and the temporal region partition—all
 * recomputed from scratch after structural mutation rather than maintained
 * incrementally.
 */

pub mod cfg;
pub mod dominator;
pub mod temporal;

pub use cfg::ControlFlowGraph;
pub use dominator::DominatorTree;
pub use temporal::{RegionInfo, TemporalError, TemporalRegionId, TemporalRegions};
