use std::collections::HashMap;

use crate::circuit::{DynamicState, ElementId, NodeId};

/// One accepted interval of the integrator
#[derive(Debug, Clone, PartialEq)]
pub struct SubStep<S> {
    pub dt: f64,
    pub state: S,
}

/// Ordered sub-steps making up one outer time step
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet<S> {
    steps: Vec<SubStep<S>>,
}

impl<S> Default for ResultSet<S> {
    fn default() -> Self {
        ResultSet { steps: Vec::new() }
    }
}

impl<S> ResultSet<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, dt: f64, state: S) {
        self.steps.push(SubStep { dt, state });
    }

    pub fn steps(&self) -> &[SubStep<S>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn total_duration(&self) -> f64 {
        self.steps.iter().map(|s| s.dt).sum()
    }

    /// State after the last sub-step; seeds the next outer step
    pub fn final_state(&self) -> Option<&S> {
        self.steps.last().map(|s| &s.state)
    }

    /// Quantity read from the last sub-step, 0 when there are none
    pub fn instantaneous(&self, quantity: impl Fn(&S) -> f64) -> f64 {
        self.final_state().map_or(0.0, quantity)
    }

    /// Duration-weighted mean: sum(q_i dt_i) / sum(dt_i).
    ///
    /// Falls back to the instantaneous value when the set has no duration.
    pub fn time_average(&self, quantity: impl Fn(&S) -> f64) -> f64 {
        let total = self.total_duration();
        if total <= 0.0 {
            return self.instantaneous(quantity);
        }
        let weighted: f64 = self.steps.iter().map(|s| quantity(&s.state) * s.dt).sum();
        weighted / total
    }
}

/// Element-level solution of one sub-step plus the state it carries forward
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CircuitState {
    pub node_voltages: HashMap<NodeId, f64>,
    /// Current node0 -> node1 through each element
    pub currents: HashMap<ElementId, f64>,
    /// V(node0) - V(node1) for each element
    pub voltages: HashMap<ElementId, f64>,
    pub dynamic: HashMap<ElementId, DynamicState>,
}

impl CircuitState {
    pub fn current(&self, element: ElementId) -> f64 {
        self.currents.get(&element).copied().unwrap_or(0.0)
    }

    pub fn voltage(&self, element: ElementId) -> f64 {
        self.voltages.get(&element).copied().unwrap_or(0.0)
    }

    pub fn node_voltage(&self, node: NodeId) -> f64 {
        self.node_voltages.get(&node).copied().unwrap_or(0.0)
    }
}

impl ResultSet<CircuitState> {
    pub fn instantaneous_current(&self, element: ElementId) -> f64 {
        self.instantaneous(|s| s.current(element))
    }

    pub fn instantaneous_voltage(&self, element: ElementId) -> f64 {
        self.instantaneous(|s| s.voltage(element))
    }

    pub fn time_average_current(&self, element: ElementId) -> f64 {
        self.time_average(|s| s.current(element))
    }

    pub fn time_average_voltage(&self, element: ElementId) -> f64 {
        self.time_average(|s| s.voltage(element))
    }

    pub fn node_voltage(&self, node: NodeId) -> f64 {
        self.instantaneous(|s| s.node_voltage(node))
    }

    /// Carried state of every capacitor and inductor after the last sub-step
    pub fn dynamic_states(&self) -> HashMap<ElementId, DynamicState> {
        self.final_state().map(|s| s.dynamic.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn state_with_current(element: ElementId, current: f64) -> CircuitState {
        let mut state = CircuitState::default();
        state.currents.insert(element, current);
        state
    }

    #[test]
    fn test_time_average_current() {
        let id = ElementId(0);
        let mut results = ResultSet::new();
        results.push(0.01, state_with_current(id, 3.0));
        results.push(0.03, state_with_current(id, 1.0));

        assert_relative_eq!(
            results.time_average_current(id),
            (3.0 * 0.01 + 1.0 * 0.03) / (0.01 + 0.03),
            epsilon = 1e-12
        );
        assert_eq!(results.instantaneous_current(id), 1.0);
    }

    #[test]
    fn test_single_sub_step_average() {
        let id = ElementId(4);
        let mut results = ResultSet::new();
        results.push(0.016, state_with_current(id, -2.5));

        assert_relative_eq!(results.time_average_current(id), -2.5, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_duration_average_is_instantaneous() {
        let id = ElementId(1);
        let mut results = ResultSet::new();
        results.push(0.0, state_with_current(id, 0.7));

        assert_eq!(results.time_average_current(id), 0.7);
    }

    #[test]
    fn test_empty_set_reads_zero() {
        let results: ResultSet<CircuitState> = ResultSet::new();

        assert_eq!(results.instantaneous_current(ElementId(0)), 0.0);
        assert_eq!(results.time_average_current(ElementId(0)), 0.0);
        assert!(results.dynamic_states().is_empty());
    }

    #[test]
    fn test_missing_element_reads_zero() {
        let mut results = ResultSet::new();
        results.push(0.01, state_with_current(ElementId(0), 1.0));

        assert_eq!(results.instantaneous_current(ElementId(9)), 0.0);
        assert_eq!(results.node_voltage(NodeId(3)), 0.0);
    }
}
