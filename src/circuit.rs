use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CircuitError;

/// Connection point shared by element terminals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Stable identity of an element in the topology snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub usize);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// State carried by a capacitor or inductor from one step to the next.
///
/// `voltage` is the drop V(node0) - V(node1); `current` flows node0 -> node1.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DynamicState {
    pub voltage: f64,
    pub current: f64,
}

/// Voltage-to-resistance relationship of a light bulb
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "curve", rename_all = "snake_case")]
pub enum ResistanceCurve {
    Constant { resistance: f64 },
    /// Interpolates from `cold` at 0 V to `hot` at `rated_voltage` and above.
    Filament { cold: f64, hot: f64, rated_voltage: f64 },
}

impl ResistanceCurve {
    pub fn resistance_at(&self, voltage: f64) -> f64 {
        match *self {
            ResistanceCurve::Constant { resistance } => resistance,
            ResistanceCurve::Filament { cold, hot, rated_voltage } => {
                if rated_voltage <= 0.0 {
                    return hot;
                }
                let fraction = (voltage.abs() / rated_voltage).min(1.0);
                cold + (hot - cold) * fraction
            }
        }
    }
}

/// Kinds of circuit elements and their parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ElementKind {
    Resistor {
        resistance: f64,
    },
    Wire {
        #[serde(default)]
        resistance: f64,
    },
    Switch {
        closed: bool,
    },
    Battery {
        voltage: f64,
        #[serde(default)]
        internal_resistance: f64,
    },
    CurrentSource {
        current: f64,
    },
    LightBulb {
        curve: ResistanceCurve,
    },
    Capacitor {
        capacitance: f64,
        #[serde(default)]
        state: DynamicState,
    },
    Inductor {
        inductance: f64,
        #[serde(default)]
        state: DynamicState,
    },
}

impl ElementKind {
    /// Returns true if this element can drive current around a loop
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            ElementKind::Battery { .. }
                | ElementKind::CurrentSource { .. }
                | ElementKind::Capacitor { .. }
                | ElementKind::Inductor { .. }
        )
    }

    /// Returns true for capacitors and inductors
    pub fn is_dynamic(&self) -> bool {
        matches!(self, ElementKind::Capacitor { .. } | ElementKind::Inductor { .. })
    }

    /// An open switch is the only element that joins nothing
    pub fn conducts(&self) -> bool {
        !matches!(self, ElementKind::Switch { closed: false })
    }

    pub fn dynamic_state(&self) -> Option<DynamicState> {
        match self {
            ElementKind::Capacitor { state, .. } | ElementKind::Inductor { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Resistor { .. } => "Resistors",
            ElementKind::Wire { .. } => "Wires",
            ElementKind::Switch { .. } => "Switches",
            ElementKind::Battery { .. } => "Batteries",
            ElementKind::CurrentSource { .. } => "Current Sources",
            ElementKind::LightBulb { .. } => "Light Bulbs",
            ElementKind::Capacitor { .. } => "Capacitors",
            ElementKind::Inductor { .. } => "Inductors",
        }
    }
}

/// Two-terminal element in the topology snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitElement {
    pub id: ElementId,
    pub node0: NodeId,
    pub node1: NodeId,
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl CircuitElement {
    pub fn new(id: ElementId, node0: NodeId, node1: NodeId, kind: ElementKind) -> Self {
        CircuitElement { id, node0, node1, kind }
    }

    fn validate(&self) -> Result<(), CircuitError> {
        let check = |parameter: &'static str, value: f64, allow_zero: bool| {
            let ok = value.is_finite() && if allow_zero { value >= 0.0 } else { value > 0.0 };
            if ok {
                Ok(())
            } else {
                Err(CircuitError::InvalidParameter { id: self.id, parameter, value })
            }
        };

        match &self.kind {
            ElementKind::Resistor { resistance } | ElementKind::Wire { resistance } => {
                check("resistance", *resistance, true)
            }
            ElementKind::Switch { .. } => Ok(()),
            ElementKind::Battery { voltage, internal_resistance } => {
                if !voltage.is_finite() {
                    return Err(CircuitError::InvalidParameter {
                        id: self.id,
                        parameter: "voltage",
                        value: *voltage,
                    });
                }
                check("internal_resistance", *internal_resistance, true)
            }
            ElementKind::CurrentSource { current } => {
                if current.is_finite() {
                    Ok(())
                } else {
                    Err(CircuitError::InvalidParameter { id: self.id, parameter: "current", value: *current })
                }
            }
            ElementKind::LightBulb { curve } => match *curve {
                ResistanceCurve::Constant { resistance } => check("resistance", resistance, true),
                ResistanceCurve::Filament { cold, hot, .. } => {
                    check("cold resistance", cold, true)?;
                    check("hot resistance", hot, true)
                }
            },
            ElementKind::Capacitor { capacitance, .. } => check("capacitance", *capacitance, false),
            ElementKind::Inductor { inductance, .. } => check("inductance", *inductance, false),
        }
    }
}

/// Immutable snapshot of the circuit topology handed to the solver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Circuit {
    pub elements: Vec<CircuitElement>,
}

impl Circuit {
    pub fn new() -> Self {
        Circuit { elements: Vec::new() }
    }

    /// Add an element with the next free id and return that id
    pub fn add(&mut self, node0: NodeId, node1: NodeId, kind: ElementKind) -> ElementId {
        let id = ElementId(self.elements.iter().map(|e| e.id.0 + 1).max().unwrap_or(0));
        self.elements.push(CircuitElement::new(id, node0, node1, kind));
        id
    }

    /// Add an element carrying its own id
    pub fn add_element(&mut self, element: CircuitElement) -> Result<(), CircuitError> {
        if self.element(element.id).is_some() {
            return Err(CircuitError::DuplicateElement(element.id));
        }
        element.validate()?;
        self.elements.push(element);
        Ok(())
    }

    pub fn element(&self, id: ElementId) -> Option<&CircuitElement> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Change an element's parameters in place, e.g. to flip a switch
    pub fn set_kind(&mut self, id: ElementId, kind: ElementKind) -> Result<(), CircuitError> {
        let element = self
            .elements
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(CircuitError::UnknownElement(id))?;
        let updated = CircuitElement::new(id, element.node0, element.node1, kind);
        updated.validate()?;
        *element = updated;
        Ok(())
    }

    /// Distinct node ids in order of first appearance
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for element in &self.elements {
            for node in [element.node0, element.node1] {
                if seen.insert(node) {
                    nodes.push(node);
                }
            }
        }
        nodes
    }

    /// Smallest node id not used by any element
    pub fn next_free_node(&self) -> NodeId {
        NodeId(
            self.elements
                .iter()
                .map(|e| e.node0.0.max(e.node1.0) + 1)
                .max()
                .unwrap_or(0),
        )
    }

    /// Carried state of every capacitor and inductor
    pub fn dynamic_states(&self) -> HashMap<ElementId, DynamicState> {
        self.elements
            .iter()
            .filter_map(|e| e.kind.dynamic_state().map(|state| (e.id, state)))
            .collect()
    }

    /// Copy of this circuit with carried state replaced where `states` has an entry
    pub fn with_dynamic_states(&self, states: &HashMap<ElementId, DynamicState>) -> Circuit {
        let mut next = self.clone();
        for element in &mut next.elements {
            if let Some(new_state) = states.get(&element.id) {
                match &mut element.kind {
                    ElementKind::Capacitor { state, .. } | ElementKind::Inductor { state, .. } => {
                        *state = *new_state;
                    }
                    _ => {}
                }
            }
        }
        next
    }

    /// Validate the entire circuit
    pub fn validate(&self) -> Result<(), CircuitError> {
        let mut ids = HashSet::new();
        for element in &self.elements {
            if !ids.insert(element.id) {
                return Err(CircuitError::DuplicateElement(element.id));
            }
            element.validate()?;
        }
        Ok(())
    }

    /// Print circuit summary
    pub fn print_summary(&self) {
        println!("Nodes: {}", self.nodes().len());
        println!("Elements: {}", self.elements.len());

        let mut type_counts: HashMap<&'static str, usize> = HashMap::new();
        for element in &self.elements {
            *type_counts.entry(element.kind.label()).or_insert(0) += 1;
        }

        let mut type_counts: Vec<_> = type_counts.into_iter().collect();
        type_counts.sort();
        for (type_name, count) in type_counts {
            println!("  {}: {}", type_name, count);
        }
    }
}
