//! Trapezoidal companion models for capacitors and inductors.
//!
//! Over one sub-step of length `dt` each reactive element is replaced by a
//! Norton pair between its terminals: a resistor and a history current
//! source, both oriented node0 -> node1. The element current is then
//!
//! ```text
//! i(n) = v(n) / R + I_src
//! ```
//!
//! Capacitor, from i = C dv/dt:
//!   G = 2C/dt, I_src = -(G v(n-1) + i(n-1))
//!
//! Inductor, from v = L di/dt:
//!   G = dt/(2L), I_src = i(n-1) + G v(n-1)

use crate::circuit::{DynamicState, NodeId};
use crate::mna::Branch;

/// Which reactive law the element follows
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reactance {
    Capacitance(f64),
    Inductance(f64),
}

/// Solver view of a capacitor or inductor with its carried state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicElement {
    pub node0: NodeId,
    pub node1: NodeId,
    pub reactance: Reactance,
    pub state: DynamicState,
}

impl DynamicElement {
    pub fn capacitor(node0: NodeId, node1: NodeId, capacitance: f64, state: DynamicState) -> Self {
        DynamicElement {
            node0,
            node1,
            reactance: Reactance::Capacitance(capacitance),
            state,
        }
    }

    pub fn inductor(node0: NodeId, node1: NodeId, inductance: f64, state: DynamicState) -> Self {
        DynamicElement {
            node0,
            node1,
            reactance: Reactance::Inductance(inductance),
            state,
        }
    }
}

/// Resistor plus current source standing in for a reactive element over `dt`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompanionModel {
    pub node0: NodeId,
    pub node1: NodeId,
    pub resistance: f64,
    /// Flows node0 -> node1 through the source
    pub source_current: f64,
}

impl CompanionModel {
    pub fn resistor(&self) -> Branch {
        Branch::resistor(self.node0, self.node1, self.resistance)
    }

    pub fn source(&self) -> Branch {
        Branch::current_source(self.node0, self.node1, self.source_current)
    }

    /// Element current for a solved terminal voltage drop
    pub fn current_at(&self, voltage: f64) -> f64 {
        voltage / self.resistance + self.source_current
    }

    /// Carried state after the sub-step; the element itself is left untouched
    pub fn updated_state(&self, voltage: f64) -> DynamicState {
        DynamicState {
            voltage,
            current: self.current_at(voltage),
        }
    }
}

/// Discretize a reactive element for one sub-step of length `dt`
pub fn to_companion_model(element: &DynamicElement, dt: f64) -> CompanionModel {
    debug_assert!(dt > 0.0, "companion model needs a positive dt, got {}", dt);

    let DynamicState { voltage, current } = element.state;
    let (conductance, source_current) = match element.reactance {
        Reactance::Capacitance(capacitance) => {
            let g = 2.0 * capacitance / dt;
            (g, -(g * voltage + current))
        }
        Reactance::Inductance(inductance) => {
            let g = dt / (2.0 * inductance);
            (g, current + g * voltage)
        }
    };

    CompanionModel {
        node0: element.node0,
        node1: element.node1,
        resistance: 1.0 / conductance,
        source_current,
    }
}

/// Ideal source that holds a reactive element at its carried state for a
/// zero-duration solve: capacitor voltage and inductor current cannot jump.
pub fn frozen_branch(element: &DynamicElement) -> Branch {
    match element.reactance {
        // battery convention is V(node1) - V(node0), the carried drop is the reverse
        Reactance::Capacitance(_) => Branch::battery(element.node0, element.node1, -element.state.voltage),
        Reactance::Inductance(_) => Branch::current_source(element.node0, element.node1, element.state.current),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_capacitor_companion_coefficients() {
        let state = DynamicState { voltage: 2.0, current: 0.5 };
        let cap = DynamicElement::capacitor(NodeId(0), NodeId(1), 1e-3, state);
        let model = to_companion_model(&cap, 1e-2);

        // G = 2C/dt = 0.2
        assert_relative_eq!(model.resistance, 5.0, epsilon = 1e-12);
        assert_relative_eq!(model.source_current, -(0.2 * 2.0 + 0.5), epsilon = 1e-12);
    }

    #[test]
    fn test_inductor_companion_coefficients() {
        let state = DynamicState { voltage: 1.0, current: 3.0 };
        let inductor = DynamicElement::inductor(NodeId(0), NodeId(1), 0.5, state);
        let model = to_companion_model(&inductor, 0.1);

        // G = dt/(2L) = 0.1
        assert_relative_eq!(model.resistance, 10.0, epsilon = 1e-12);
        assert_relative_eq!(model.source_current, 3.0 + 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_capacitor_holds_voltage_with_no_current() {
        // an isolated charged capacitor keeps its voltage and current stays 0
        let state = DynamicState { voltage: 5.0, current: 0.0 };
        let cap = DynamicElement::capacitor(NodeId(0), NodeId(1), 1e-6, state);
        let model = to_companion_model(&cap, 1e-3);

        assert_relative_eq!(model.current_at(5.0), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_updated_state_matches_trapezoidal_rule() {
        let capacitance = 2e-3;
        let dt = 1e-3;
        let state = DynamicState { voltage: 1.0, current: 0.2 };
        let cap = DynamicElement::capacitor(NodeId(0), NodeId(1), capacitance, state);
        let model = to_companion_model(&cap, dt);

        let next = model.updated_state(1.5);

        // (i(n) + i(n-1)) / 2 = C (v(n) - v(n-1)) / dt
        let lhs = (next.current + state.current) / 2.0;
        let rhs = capacitance * (next.voltage - state.voltage) / dt;
        assert_relative_eq!(lhs, rhs, epsilon = 1e-12);
        assert_eq!(cap.state, state);
    }

    #[test]
    fn test_frozen_branches() {
        let state = DynamicState { voltage: 3.0, current: 0.25 };
        let cap = DynamicElement::capacitor(NodeId(4), NodeId(5), 1e-6, state);
        let inductor = DynamicElement::inductor(NodeId(4), NodeId(5), 1e-3, state);

        assert_eq!(frozen_branch(&cap), Branch::battery(NodeId(4), NodeId(5), -3.0));
        assert_eq!(frozen_branch(&inductor), Branch::current_source(NodeId(4), NodeId(5), 0.25));
    }
}
