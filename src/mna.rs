use std::collections::HashMap;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::circuit::NodeId;
use crate::error::SolverError;
use crate::solver::LinearSolver;
use crate::topology::Graph;

/// Solver view of a two-terminal element
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Branch {
    /// Current node0 -> node1 is (V0 - V1) / R; R == 0 is an ideal short
    Resistor { node0: NodeId, node1: NodeId, resistance: f64 },
    /// V(node1) - V(node0) = voltage while current flows node0 -> node1 through it
    Battery { node0: NodeId, node1: NodeId, voltage: f64 },
    /// Carries `current` node0 -> node1 through itself
    CurrentSource { node0: NodeId, node1: NodeId, current: f64 },
}

impl Branch {
    pub fn resistor(node0: NodeId, node1: NodeId, resistance: f64) -> Self {
        debug_assert!(resistance >= 0.0, "negative resistance {}", resistance);
        Branch::Resistor { node0, node1, resistance }
    }

    pub fn battery(node0: NodeId, node1: NodeId, voltage: f64) -> Self {
        Branch::Battery { node0, node1, voltage }
    }

    pub fn current_source(node0: NodeId, node1: NodeId, current: f64) -> Self {
        Branch::CurrentSource { node0, node1, current }
    }

    pub fn nodes(&self) -> (NodeId, NodeId) {
        match *self {
            Branch::Resistor { node0, node1, .. }
            | Branch::Battery { node0, node1, .. }
            | Branch::CurrentSource { node0, node1, .. } => (node0, node1),
        }
    }

    /// Batteries and exact shorts get their own current unknown.
    /// Self-loops never do: their current is indeterminate and reads as 0.
    fn has_current_unknown(&self) -> bool {
        let (node0, node1) = self.nodes();
        node0 != node1
            && match *self {
                Branch::Resistor { resistance, .. } => resistance == 0.0,
                Branch::Battery { .. } => true,
                Branch::CurrentSource { .. } => false,
            }
    }
}

/// Index of a branch inside a [`Network`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BranchId(pub usize);

/// Flat list of branches to be solved together
#[derive(Debug, Clone, Default)]
pub struct Network {
    pub branches: Vec<Branch>,
}

impl Network {
    pub fn new() -> Self {
        Network { branches: Vec::new() }
    }

    /// Build from separate lists; branch ids follow batteries, then resistors,
    /// then current sources.
    pub fn from_parts(batteries: &[Branch], resistors: &[Branch], current_sources: &[Branch]) -> Self {
        let mut branches = Vec::with_capacity(batteries.len() + resistors.len() + current_sources.len());
        branches.extend_from_slice(batteries);
        branches.extend_from_slice(resistors);
        branches.extend_from_slice(current_sources);
        Network { branches }
    }

    pub fn add(&mut self, branch: Branch) -> BranchId {
        self.branches.push(branch);
        BranchId(self.branches.len() - 1)
    }

    pub fn add_resistor(&mut self, node0: NodeId, node1: NodeId, resistance: f64) -> BranchId {
        self.add(Branch::resistor(node0, node1, resistance))
    }

    pub fn add_battery(&mut self, node0: NodeId, node1: NodeId, voltage: f64) -> BranchId {
        self.add(Branch::battery(node0, node1, voltage))
    }

    pub fn add_current_source(&mut self, node0: NodeId, node1: NodeId, current: f64) -> BranchId {
        self.add(Branch::current_source(node0, node1, current))
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}

/// Node voltages and branch currents of one static solve.
///
/// Voltages are relative to one reference node per connected component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solution {
    voltages: HashMap<NodeId, f64>,
    currents: Vec<f64>,
}

impl Solution {
    /// All-zero solution used when the system cannot be solved
    pub fn zero(network: &Network) -> Self {
        let mut voltages = HashMap::new();
        for branch in &network.branches {
            let (node0, node1) = branch.nodes();
            voltages.insert(node0, 0.0);
            voltages.insert(node1, 0.0);
        }
        Solution {
            voltages,
            currents: vec![0.0; network.len()],
        }
    }

    /// Voltage at `node`; nodes outside the system read 0 V
    pub fn voltage(&self, node: NodeId) -> f64 {
        self.voltages.get(&node).copied().unwrap_or(0.0)
    }

    /// V(node0) - V(node1)
    pub fn voltage_drop(&self, node0: NodeId, node1: NodeId) -> f64 {
        self.voltage(node0) - self.voltage(node1)
    }

    pub fn current(&self, branch: BranchId) -> f64 {
        self.currents.get(branch.0).copied().unwrap_or(0.0)
    }

    pub fn voltages(&self) -> &HashMap<NodeId, f64> {
        &self.voltages
    }

    pub fn currents(&self) -> &[f64] {
        &self.currents
    }
}

/// MNA system representation: [A][x] = [z]
///
/// Rows: one reference equation per connected component, one KCL equation
/// per node, one constraint per battery and per short. Columns: node
/// voltages, then battery and short currents. The system is over-determined
/// by one row per component and consistent, so it is solved by least squares.
#[derive(Debug, Clone)]
pub struct MnaSystem {
    /// System matrix A
    pub matrix: DMatrix<f64>,
    /// Right-hand side vector z
    pub rhs: DVector<f64>,
    /// Node ids in column order
    pub nodes: Vec<NodeId>,
    /// Mapping from node ids to voltage columns
    pub node_map: HashMap<NodeId, usize>,
    /// Mapping from branch index to current column, for batteries and shorts
    pub current_map: HashMap<usize, usize>,
    /// One representative node per connected component, held at 0 V
    pub references: Vec<NodeId>,
    solver: LinearSolver,
}

impl MnaSystem {
    pub fn new() -> Self {
        Self::with_solver(LinearSolver::new())
    }

    pub fn with_solver(solver: LinearSolver) -> Self {
        MnaSystem {
            matrix: DMatrix::zeros(0, 0),
            rhs: DVector::zeros(0),
            nodes: Vec::new(),
            node_map: HashMap::new(),
            current_map: HashMap::new(),
            references: Vec::new(),
            solver,
        }
    }

    /// (rows, columns) of the assembled system
    pub fn shape(&self) -> (usize, usize) {
        self.matrix.shape()
    }

    /// Build A and z for `network`, reusing storage when the shape is unchanged
    pub fn assemble(&mut self, network: &Network) {
        let graph = Graph::from_edges(network.branches.iter().map(Branch::nodes));
        let components = graph.components();

        self.nodes = graph.nodes();
        self.node_map = self.nodes.iter().enumerate().map(|(i, &node)| (node, i)).collect();
        self.references = components.iter().map(|component| component[0]).collect();

        let num_nodes = self.nodes.len();
        self.current_map.clear();
        for (i, branch) in network.branches.iter().enumerate() {
            if branch.has_current_unknown() {
                self.current_map.insert(i, num_nodes + self.current_map.len());
            }
        }

        let cols = num_nodes + self.current_map.len();
        let rows = components.len() + cols;
        if self.matrix.shape() == (rows, cols) {
            self.matrix.fill(0.0);
            self.rhs.fill(0.0);
        } else {
            self.matrix = DMatrix::zeros(rows, cols);
            self.rhs = DVector::zeros(rows);
        }

        let mut row = 0;
        for reference in &self.references {
            self.matrix[(row, self.node_map[reference])] = 1.0;
            row += 1;
        }

        let kcl = row;
        row += num_nodes;

        for (i, branch) in network.branches.iter().enumerate() {
            let (node0, node1) = branch.nodes();
            if node0 == node1 {
                continue;
            }
            let a = self.node_map[&node0];
            let b = self.node_map[&node1];

            match *branch {
                Branch::Resistor { resistance, .. } if resistance != 0.0 => {
                    self.stamp_conductance(kcl, a, b, 1.0 / resistance);
                }
                Branch::Resistor { .. } => {
                    let col = self.current_map[&i];
                    self.stamp_branch_current(kcl, a, b, col);
                    // V0 - V1 = 0
                    self.matrix[(row, a)] += 1.0;
                    self.matrix[(row, b)] -= 1.0;
                    row += 1;
                }
                Branch::Battery { voltage, .. } => {
                    let col = self.current_map[&i];
                    self.stamp_branch_current(kcl, a, b, col);
                    // V1 - V0 = voltage
                    self.matrix[(row, b)] += 1.0;
                    self.matrix[(row, a)] -= 1.0;
                    self.rhs[row] = voltage;
                    row += 1;
                }
                Branch::CurrentSource { current, .. } => {
                    self.rhs[kcl + a] -= current;
                    self.rhs[kcl + b] += current;
                }
            }
        }

        debug!(
            "assembled MNA system: {} nodes, {} current unknowns, {} components",
            num_nodes,
            self.current_map.len(),
            components.len()
        );
    }

    /// KCL rows hold current leaving each node: (V0 - V1) G leaves a, enters b
    fn stamp_conductance(&mut self, kcl: usize, a: usize, b: usize, g: f64) {
        self.matrix[(kcl + a, a)] += g;
        self.matrix[(kcl + a, b)] -= g;
        self.matrix[(kcl + b, a)] -= g;
        self.matrix[(kcl + b, b)] += g;
    }

    fn stamp_branch_current(&mut self, kcl: usize, a: usize, b: usize, col: usize) {
        self.matrix[(kcl + a, col)] += 1.0;
        self.matrix[(kcl + b, col)] -= 1.0;
    }

    /// Assemble and solve, surfacing solver failures
    pub fn solve(&mut self, network: &Network) -> Result<Solution, SolverError> {
        self.assemble(network);
        let (unknowns, stats) = self.solver.solve(&self.matrix, &self.rhs)?;

        if !stats.success {
            debug!("MNA residual {:.3e} above tolerance", stats.residual_norm);
        }

        let voltages: HashMap<NodeId, f64> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, &node)| (node, unknowns[i]))
            .collect();

        let currents = network
            .branches
            .iter()
            .enumerate()
            .map(|(i, branch)| match *branch {
                Branch::Resistor { node0, node1, resistance } if resistance != 0.0 => {
                    (voltages[&node0] - voltages[&node1]) / resistance
                }
                Branch::CurrentSource { current, .. } => current,
                Branch::Resistor { .. } | Branch::Battery { .. } => {
                    self.current_map.get(&i).map_or(0.0, |&col| unknowns[col])
                }
            })
            .collect();

        Ok(Solution { voltages, currents })
    }

    /// Assemble and solve; a failed solve yields the all-zero solution
    pub fn solve_or_zero(&mut self, network: &Network) -> Solution {
        match self.solve(network) {
            Ok(solution) => solution,
            Err(e) => {
                warn!("falling back to zero solution: {}", e);
                Solution::zero(network)
            }
        }
    }
}

impl Default for MnaSystem {
    fn default() -> Self {
        Self::new()
    }
}

/// Solve `network`, surfacing singular systems as errors
pub fn try_solve(network: &Network) -> Result<Solution, SolverError> {
    MnaSystem::new().solve(network)
}

/// Solve `network`; never fails, degenerate systems read as all zero
pub fn solve(network: &Network) -> Solution {
    MnaSystem::new().solve_or_zero(network)
}
