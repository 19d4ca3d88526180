pub mod circuit;
pub mod cli;
pub mod companion;
pub mod error;
pub mod integrator;
pub mod mna;
pub mod output;
pub mod results;
pub mod simulator;
pub mod solver;
pub mod topology;

// Re-export commonly used types
pub use circuit::{Circuit, CircuitElement, DynamicState, ElementId, ElementKind, NodeId, ResistanceCurve};
pub use integrator::{AdaptiveIntegrator, IntegratorConfig, TimeStepModel};
pub use mna::{solve, try_solve, Branch, BranchId, Network, Solution};
pub use results::{CircuitState, ResultSet, SubStep};
pub use simulator::{advance, Simulator, SimulatorConfig, TransientSolver};

// Error types
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
