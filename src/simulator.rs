use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::circuit::{Circuit, CircuitElement, DynamicState, ElementKind, NodeId};
use crate::companion::{frozen_branch, to_companion_model, CompanionModel, DynamicElement};
use crate::error::IntegratorError;
use crate::integrator::{AdaptiveIntegrator, IntegratorConfig, TimeStepModel};
use crate::mna::{BranchId, MnaSystem, Network, Solution};
use crate::results::{CircuitState, ResultSet};
use crate::solver::{LinearSolver, SolverConfig};
use crate::topology::{propagate_voltages, Graph, Link};

/// Thresholds for the single corrective re-solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Series resistance every battery starts with; 0 means ideal
    pub default_series_resistance: f64,
    /// Battery current above which the true internal resistance is switched in
    pub battery_current_threshold: f64,
    /// Relative bulb resistance change that warrants a re-solve
    pub bulb_tolerance: f64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        CorrectionConfig {
            default_series_resistance: 1e-4,
            battery_current_threshold: 10.0,
            bulb_tolerance: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub integrator: IntegratorConfig,
    pub solver: SolverConfig,
    pub correction: CorrectionConfig,
}

/// How reactive elements enter a static solve
#[derive(Debug, Clone, Copy, PartialEq)]
enum Discretization {
    Companion(f64),
    /// Zero-duration solve: capacitors hold voltage, inductors hold current
    Frozen,
}

/// Where an element ended up in the solved network
#[derive(Debug, Clone, Copy)]
enum Placement {
    /// Not on a loop with a source; carries no current
    Inactive,
    Single(BranchId),
    Battery { battery: BranchId },
    Companion { model: CompanionModel },
    Frozen(BranchId),
}

/// Per-element values the one-shot correction may revise
#[derive(Debug, Clone)]
struct Estimates {
    bulb_resistance: Vec<f64>,
    series_resistance: Vec<f64>,
}

/// Elements that can carry current: on a loop whose loop group holds a source
fn find_active_elements(circuit: &Circuit) -> Vec<bool> {
    let mut graph = Graph::new();
    let edges: Vec<Option<usize>> = circuit
        .elements
        .iter()
        .map(|e| e.kind.conducts().then(|| graph.add_edge(e.node0, e.node1)))
        .collect();

    let bridges = graph.bridges();
    let groups = graph.loop_groups(&bridges);
    let group_of = |i: usize| edges[i].and_then(|edge| groups[edge]);

    let powered: HashSet<usize> = circuit
        .elements
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind.is_source())
        .filter_map(|(i, _)| group_of(i))
        .collect();

    (0..circuit.elements.len())
        .map(|i| group_of(i).map_or(false, |g| powered.contains(&g)))
        .collect()
}

/// One outer step's view of a fixed circuit: the step function driven by the
/// integrator.
pub struct CircuitStepper<'a> {
    circuit: &'a Circuit,
    config: &'a SimulatorConfig,
    system: &'a RefCell<MnaSystem>,
    active: Vec<bool>,
    nodes: Vec<NodeId>,
    first_internal_node: NodeId,
}

impl<'a> CircuitStepper<'a> {
    pub fn new(circuit: &'a Circuit, config: &'a SimulatorConfig, system: &'a RefCell<MnaSystem>) -> Self {
        let active = find_active_elements(circuit);
        debug!(
            "{} of {} elements on powered loops",
            active.iter().filter(|&&a| a).count(),
            active.len()
        );

        CircuitStepper {
            circuit,
            config,
            system,
            active,
            nodes: circuit.nodes(),
            first_internal_node: circuit.next_free_node(),
        }
    }

    /// State before the first sub-step: carried state from the snapshot
    pub fn initial_state(&self) -> CircuitState {
        CircuitState {
            dynamic: self.circuit.dynamic_states(),
            ..CircuitState::default()
        }
    }

    fn dynamic_element(&self, element: &CircuitElement, state: &CircuitState) -> Option<DynamicElement> {
        let carried = |fallback: DynamicState| state.dynamic.get(&element.id).copied().unwrap_or(fallback);
        match element.kind {
            ElementKind::Capacitor { capacitance, state: own } => Some(DynamicElement::capacitor(
                element.node0,
                element.node1,
                capacitance,
                carried(own),
            )),
            ElementKind::Inductor { inductance, state: own } => Some(DynamicElement::inductor(
                element.node0,
                element.node1,
                inductance,
                carried(own),
            )),
            _ => None,
        }
    }

    fn initial_estimates(&self, state: &CircuitState) -> Estimates {
        let correction = &self.config.correction;
        let mut estimates = Estimates {
            bulb_resistance: vec![0.0; self.circuit.elements.len()],
            series_resistance: vec![0.0; self.circuit.elements.len()],
        };

        for (i, element) in self.circuit.elements.iter().enumerate() {
            match element.kind {
                ElementKind::LightBulb { curve } => {
                    estimates.bulb_resistance[i] = curve.resistance_at(state.voltage(element.id));
                }
                ElementKind::Battery { .. } => {
                    estimates.series_resistance[i] = correction.default_series_resistance;
                }
                _ => {}
            }
        }

        estimates
    }

    fn build_network(
        &self,
        state: &CircuitState,
        mode: Discretization,
        estimates: &Estimates,
    ) -> (Network, Vec<Placement>) {
        let mut network = Network::new();
        let mut placements = Vec::with_capacity(self.circuit.elements.len());
        let mut next_internal = self.first_internal_node.0;

        for (i, element) in self.circuit.elements.iter().enumerate() {
            if !self.active[i] {
                placements.push(Placement::Inactive);
                continue;
            }

            let (n0, n1) = (element.node0, element.node1);
            let placement = match element.kind {
                ElementKind::Resistor { resistance } | ElementKind::Wire { resistance } => {
                    Placement::Single(network.add_resistor(n0, n1, resistance))
                }
                ElementKind::Switch { closed: true } => Placement::Single(network.add_resistor(n0, n1, 0.0)),
                ElementKind::Switch { closed: false } => Placement::Inactive,
                ElementKind::LightBulb { .. } => {
                    Placement::Single(network.add_resistor(n0, n1, estimates.bulb_resistance[i]))
                }
                ElementKind::CurrentSource { current } => Placement::Single(network.add_current_source(n0, n1, current)),
                ElementKind::Battery { voltage, .. } => {
                    let series = estimates.series_resistance[i];
                    if series == 0.0 {
                        Placement::Battery { battery: network.add_battery(n0, n1, voltage) }
                    } else {
                        let internal = NodeId(next_internal);
                        next_internal += 1;
                        let battery = network.add_battery(n0, internal, voltage);
                        network.add_resistor(internal, n1, series);
                        Placement::Battery { battery }
                    }
                }
                ElementKind::Capacitor { .. } | ElementKind::Inductor { .. } => {
                    match (self.dynamic_element(element, state), mode) {
                        (Some(dynamic), Discretization::Companion(dt)) => {
                            let model = to_companion_model(&dynamic, dt);
                            network.add(model.resistor());
                            network.add(model.source());
                            Placement::Companion { model }
                        }
                        (Some(dynamic), Discretization::Frozen) => Placement::Frozen(network.add(frozen_branch(&dynamic))),
                        (None, _) => Placement::Inactive,
                    }
                }
            };
            placements.push(placement);
        }

        (network, placements)
    }

    fn solve_network(&self, network: &Network) -> Solution {
        self.system.borrow_mut().solve_or_zero(network)
    }

    /// Revise bulb and battery estimates from a first solve; true if anything changed
    fn correct(&self, solution: &Solution, placements: &[Placement], estimates: &mut Estimates) -> bool {
        let correction = &self.config.correction;
        let mut changed = false;

        for (i, element) in self.circuit.elements.iter().enumerate() {
            match (&element.kind, placements[i]) {
                (ElementKind::LightBulb { curve }, Placement::Single(_)) => {
                    let voltage = solution.voltage_drop(element.node0, element.node1);
                    let revised = curve.resistance_at(voltage);
                    let previous = estimates.bulb_resistance[i];
                    if (revised - previous).abs() > correction.bulb_tolerance * previous.abs().max(1.0) {
                        estimates.bulb_resistance[i] = revised;
                        changed = true;
                    }
                }
                (ElementKind::Battery { internal_resistance, .. }, Placement::Battery { battery }) => {
                    let current = solution.current(battery);
                    if current.abs() > correction.battery_current_threshold
                        && *internal_resistance > estimates.series_resistance[i]
                    {
                        debug!(
                            "battery {} draws {:.3}A, switching in {}ohm internal resistance",
                            element.id, current, internal_resistance
                        );
                        estimates.series_resistance[i] = *internal_resistance;
                        changed = true;
                    }
                }
                _ => {}
            }
        }

        changed
    }

    /// Static solve with at most one corrective re-solve
    fn solve_state(&self, state: &CircuitState, mode: Discretization) -> CircuitState {
        let mut estimates = self.initial_estimates(state);
        let (network, placements) = self.build_network(state, mode, &estimates);
        let solution = self.solve_network(&network);

        if self.correct(&solution, &placements, &mut estimates) {
            let (network, placements) = self.build_network(state, mode, &estimates);
            let solution = self.solve_network(&network);
            return self.collect(state, &solution, &placements);
        }

        self.collect(state, &solution, &placements)
    }

    /// Element-level state from a network solution
    fn collect(&self, previous: &CircuitState, solution: &Solution, placements: &[Placement]) -> CircuitState {
        let seeds: Vec<(NodeId, f64)> = self
            .nodes
            .iter()
            .filter_map(|&node| solution.voltages().get(&node).map(|&v| (node, v)))
            .collect();

        // every solved island has its own ground; solved drops are rigid links
        // so islands joined through idle elements share one reference

        let links: Vec<(NodeId, NodeId, Link)> = self
            .circuit
            .elements
            .iter()
            .zip(placements)
            .map(|(element, placement)| {
                let link = match &element.kind {
                    _ if !matches!(placement, Placement::Inactive) => {
                        Link::Offset(solution.voltage(element.node1) - solution.voltage(element.node0))
                    }
                    ElementKind::Switch { closed: false } => Link::Open,
                    ElementKind::Battery { voltage, .. } => Link::Offset(*voltage),
                    ElementKind::Capacitor { .. } | ElementKind::Inductor { .. } => {
                        let drop = self.carried(element, previous).voltage;
                        Link::Offset(-drop)
                    }
                    _ => Link::Equal,
                };
                (element.node0, element.node1, link)
            })
            .collect();

        let node_voltages = propagate_voltages(&self.nodes, &links, &seeds);
        let at = |node: NodeId| node_voltages.get(&node).copied().unwrap_or(0.0);
        let drop = |element: &CircuitElement| at(element.node0) - at(element.node1);

        let mut next = CircuitState {
            node_voltages: HashMap::with_capacity(self.nodes.len()),
            currents: HashMap::with_capacity(placements.len()),
            voltages: HashMap::with_capacity(placements.len()),
            dynamic: HashMap::new(),
        };

        for (element, placement) in self.circuit.elements.iter().zip(placements) {
            let voltage = drop(element);
            let current = match *placement {
                Placement::Inactive => 0.0,
                Placement::Single(branch) | Placement::Frozen(branch) => solution.current(branch),
                Placement::Battery { battery } => solution.current(battery),
                Placement::Companion { model } => model.current_at(voltage),
            };

            if element.kind.is_dynamic() {
                let carried = match *placement {
                    Placement::Inactive => DynamicState {
                        voltage: self.carried(element, previous).voltage,
                        current: 0.0,
                    },
                    Placement::Companion { model } => model.updated_state(voltage),
                    _ => DynamicState { voltage, current },
                };
                next.dynamic.insert(element.id, carried);
            }

            next.currents.insert(element.id, current);
            next.voltages.insert(element.id, voltage);
        }

        next.node_voltages = node_voltages;
        next
    }

    fn carried(&self, element: &CircuitElement, state: &CircuitState) -> DynamicState {
        state
            .dynamic
            .get(&element.id)
            .copied()
            .or_else(|| element.kind.dynamic_state())
            .unwrap_or_default()
    }

    /// Zero-duration solve with reactive elements held at their carried state
    pub fn solve_instant(&self, state: &CircuitState) -> CircuitState {
        self.solve_state(state, Discretization::Frozen)
    }
}

impl TimeStepModel for CircuitStepper<'_> {
    type State = CircuitState;

    fn step(&self, state: &CircuitState, dt: f64) -> CircuitState {
        self.solve_state(state, Discretization::Companion(dt))
    }

    /// Summed disagreement of capacitor/inductor voltages and currents
    fn distance(&self, a: &CircuitState, b: &CircuitState) -> f64 {
        a.dynamic
            .iter()
            .map(|(id, sa)| {
                let sb = b.dynamic.get(id).copied().unwrap_or_default();
                (sa.voltage - sb.voltage).abs() + (sa.current - sb.current).abs()
            })
            .sum()
    }
}

/// Solves outer time steps of a circuit snapshot
#[derive(Debug)]
pub struct TransientSolver {
    config: SimulatorConfig,
    integrator: AdaptiveIntegrator,
    system: RefCell<MnaSystem>,
}

impl TransientSolver {
    pub fn new(config: SimulatorConfig) -> Result<Self, IntegratorError> {
        let integrator = AdaptiveIntegrator::new(config.integrator)?;
        let system = RefCell::new(MnaSystem::with_solver(LinearSolver::with_config(config.solver.clone())));
        Ok(TransientSolver { config, integrator, system })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Advance `circuit` by `dt` seconds.
    ///
    /// Reads carried state from the snapshot and returns the sub-steps; write
    /// the final dynamic state back with [`Circuit::with_dynamic_states`].
    /// A zero `dt` gives one zero-length sub-step.
    pub fn advance(&self, circuit: &Circuit, dt: f64) -> ResultSet<CircuitState> {
        let dt = if dt.is_finite() && dt >= 0.0 {
            dt
        } else {
            warn!("time step {} is negative or not finite, clamped to 0", dt);
            0.0
        };

        let stepper = CircuitStepper::new(circuit, &self.config, &self.system);
        let initial = stepper.initial_state();

        if dt == 0.0 {
            let mut results = ResultSet::new();
            results.push(0.0, stepper.solve_instant(&initial));
            return results;
        }

        let results = self.integrator.integrate(&stepper, &initial, dt);
        debug!("advanced {:.3e}s in {} sub-steps", dt, results.len());
        results
    }
}

impl Default for TransientSolver {
    fn default() -> Self {
        TransientSolver {
            config: SimulatorConfig::default(),
            integrator: AdaptiveIntegrator::default(),
            system: RefCell::new(MnaSystem::new()),
        }
    }
}

/// Advance with the default configuration
pub fn advance(circuit: &Circuit, dt: f64) -> ResultSet<CircuitState> {
    TransientSolver::default().advance(circuit, dt)
}

/// Main simulator engine: owns a circuit and feeds each step's carried state
/// into the next
#[derive(Debug)]
pub struct Simulator {
    circuit: Circuit,
    solver: TransientSolver,
    time: f64,
}

impl Simulator {
    /// Create a new simulator with default configuration
    pub fn new(circuit: Circuit) -> Self {
        Simulator {
            circuit,
            solver: TransientSolver::default(),
            time: 0.0,
        }
    }

    /// Create a new simulator with custom configuration
    pub fn with_config(circuit: Circuit, config: SimulatorConfig) -> Result<Self, IntegratorError> {
        Ok(Simulator {
            circuit,
            solver: TransientSolver::new(config)?,
            time: 0.0,
        })
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// Replace the topology; carried state of elements that survive is kept
    pub fn set_circuit(&mut self, circuit: Circuit) {
        let carried = self.circuit.dynamic_states();
        self.circuit = circuit.with_dynamic_states(&carried);
        info!("circuit replaced: {} elements", self.circuit.elements.len());
    }

    /// Simulated seconds so far
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn step(&mut self, dt: f64) -> ResultSet<CircuitState> {
        let results = self.solver.advance(&self.circuit, dt);
        self.circuit = self.circuit.with_dynamic_states(&results.dynamic_states());
        self.time += results.total_duration();
        results
    }
}
